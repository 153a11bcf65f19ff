//! Enclave Channel: attested secure channels between isolated enclaves
//!
//! Two mutually distrusting enclaves prove their identity to each other with
//! attestation reports, pin each other's public keys, agree on an ephemeral
//! symmetric key through a signed and encrypted key offer, and then exchange
//! authenticated, encrypted messages.

pub mod attestation;
pub mod channel;
pub mod config;
pub mod crypto;
pub mod error;

pub use attestation::{
    AttestationProvider, AttestationRejection, AttestationReport, IdentityPolicy, RejectionCode,
    VerifiedReport,
};
pub use channel::{HandshakeEngine, SessionState};
pub use config::ChannelConfig;
pub use crypto::CryptoIdentity;
pub use error::{ChannelError, ChannelResult, FailureKind};
