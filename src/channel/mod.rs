//! Secure Channel: attestation-gated key establishment and messaging
//!
//! 1. Both sides exchange (public key, report) pairs and verify each other
//!    through the attestation provider; success pins the peer's key
//! 2. The initiator generates an ephemeral session key, signs it, seals it
//!    to the peer's pinned key and sends it; the peer opens, verifies and
//!    answers with a signed confirmation
//! 3. Both sides derive per-direction keys and exchange AEAD messages

pub mod envelope;
pub mod handshake;
pub mod messenger;
pub mod peer_store;
pub mod registry;

pub use envelope::{HandshakeEnvelope, HandshakeKind, MessageEnvelope};
pub use handshake::HandshakeEngine;
pub use messenger::SecureMessenger;
pub use peer_store::{PeerKeyStore, PeerRecord};
pub use registry::{Role, SessionRegistry, SessionSnapshot, SessionState};
