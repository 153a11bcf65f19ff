//! Ephemeral session key
//!
//! Generated fresh per session by the initiator, lives only in process
//! memory, and is zeroized when dropped. Message traffic never uses it
//! directly: it is expanded into one key per direction.

use super::{fingerprint, CryptoError};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const SESSION_KEY_LEN: usize = 32;

const INITIATOR_TO_RESPONDER: &[u8] = b"enclave-channel/initiator->responder/v1";
const RESPONDER_TO_INITIATOR: &[u8] = b"enclave-channel/responder->initiator/v1";

/// Symmetric key agreed during the handshake
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; SESSION_KEY_LEN]);

impl SessionKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; SESSION_KEY_LEN];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != SESSION_KEY_LEN {
            return Err(CryptoError::InvalidKeyLength {
                expected: SESSION_KEY_LEN,
                actual: bytes.len(),
            });
        }
        let mut key = [0u8; SESSION_KEY_LEN];
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_LEN] {
        &self.0
    }

    /// Constant-time equality
    pub fn ct_eq(&self, other: &SessionKey) -> bool {
        self.0.ct_eq(&other.0).into()
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(&self.0)
    }

    /// Expand into per-direction message keys bound to `session_id`
    pub fn derive_directional(&self, session_id: &[u8]) -> Result<DirectionalKeys, CryptoError> {
        let hk = Hkdf::<Sha256>::new(Some(session_id), &self.0);

        let mut i2r = [0u8; SESSION_KEY_LEN];
        hk.expand(INITIATOR_TO_RESPONDER, &mut i2r)
            .map_err(|_| CryptoError::KeyDerivationFailed)?;
        let mut r2i = [0u8; SESSION_KEY_LEN];
        hk.expand(RESPONDER_TO_INITIATOR, &mut r2i)
            .map_err(|_| CryptoError::KeyDerivationFailed)?;

        Ok(DirectionalKeys {
            initiator_to_responder: MessageKey(i2r),
            responder_to_initiator: MessageKey(r2i),
        })
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionKey({})", self.fingerprint())
    }
}

/// AEAD key for one direction of traffic
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MessageKey([u8; SESSION_KEY_LEN]);

impl MessageKey {
    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for MessageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MessageKey(..)")
    }
}

/// The two message keys derived from one session key
#[derive(Debug)]
pub struct DirectionalKeys {
    pub initiator_to_responder: MessageKey,
    pub responder_to_initiator: MessageKey,
}
