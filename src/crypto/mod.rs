//! Cryptographic building blocks for the channel
//!
//! - `identity`: per-participant Ed25519 signing key + X25519 encryption key
//! - `sealed_box`: asymmetric encryption to a peer's published key
//! - `session_key`: ephemeral symmetric key and its directional expansion

pub mod identity;
pub mod sealed_box;
pub mod session_key;

pub use identity::{CryptoIdentity, PublicKeyBundle, PUBLIC_KEY_BUNDLE_LEN, SIGNATURE_LEN};
pub use session_key::{DirectionalKeys, MessageKey, SessionKey, SESSION_KEY_LEN};

/// Errors raised by the cryptographic layer
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    #[error("signing failed: {0}")]
    SigningError(String),

    #[error("encryption failed: {0}")]
    EncryptionError(String),

    /// Every decryption failure maps here without further detail.
    #[error("decryption failed")]
    DecryptionError,

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("key derivation failed")]
    KeyDerivationFailed,
}

/// Short hex fingerprint of arbitrary key material, safe to log
pub fn fingerprint(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(bytes);
    hex::encode(&digest[..8])
}
