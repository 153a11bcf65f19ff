//! Sealed boxes: anonymous public-key encryption
//!
//! Layout: ephemeral X25519 public key (32) || ChaCha20-Poly1305 ciphertext || tag (16).
//! The AEAD key is HKDF-SHA256 over the ECDH output, salted with both public
//! keys. Each box uses a fresh ephemeral key, so the AEAD key is single-use
//! and a fixed nonce is safe.

use super::CryptoError;
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey as X25519Public, StaticSecret};
use zeroize::Zeroizing;

const BOX_INFO: &[u8] = b"enclave-channel/sealed-box/v1";
const BOX_NONCE: [u8; 12] = [0u8; 12];

pub const EPHEMERAL_KEY_LEN: usize = 32;
pub const TAG_LEN: usize = 16;
/// Bytes added on top of the plaintext length
pub const SEALED_BOX_OVERHEAD: usize = EPHEMERAL_KEY_LEN + TAG_LEN;

/// Encrypt `plaintext` for `recipient`
pub fn seal(recipient: &X25519Public, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = X25519Public::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(recipient);
    if !shared.was_contributory() {
        return Err(CryptoError::EncryptionError(
            "recipient key is a low-order point".into(),
        ));
    }

    let key = derive_box_key(shared.as_bytes(), &ephemeral_public, recipient)
        .map_err(|_| CryptoError::EncryptionError("key derivation failed".into()))?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_slice()));
    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&BOX_NONCE),
            Payload {
                msg: plaintext,
                aad: ephemeral_public.as_bytes(),
            },
        )
        .map_err(|_| CryptoError::EncryptionError("aead encryption failed".into()))?;

    let mut out = Vec::with_capacity(EPHEMERAL_KEY_LEN + ciphertext.len());
    out.extend_from_slice(ephemeral_public.as_bytes());
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt a box addressed to `recipient_public`.
///
/// Every failure after the length check goes through the same AEAD
/// verification and surfaces as the same [`CryptoError::DecryptionError`].
pub fn open(
    recipient_secret: &StaticSecret,
    recipient_public: &X25519Public,
    sealed: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < SEALED_BOX_OVERHEAD {
        return Err(CryptoError::DecryptionError);
    }

    let mut ephemeral_bytes = [0u8; EPHEMERAL_KEY_LEN];
    ephemeral_bytes.copy_from_slice(&sealed[..EPHEMERAL_KEY_LEN]);
    let ephemeral_public = X25519Public::from(ephemeral_bytes);

    let shared = recipient_secret.diffie_hellman(&ephemeral_public);
    let key = derive_box_key(shared.as_bytes(), &ephemeral_public, recipient_public)
        .map_err(|_| CryptoError::DecryptionError)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_slice()));

    let plaintext = cipher
        .decrypt(
            Nonce::from_slice(&BOX_NONCE),
            Payload {
                msg: &sealed[EPHEMERAL_KEY_LEN..],
                aad: ephemeral_public.as_bytes(),
            },
        )
        .map_err(|_| CryptoError::DecryptionError)?;

    // A low-order ephemeral key yields an attacker-known shared secret.
    if !shared.was_contributory() {
        return Err(CryptoError::DecryptionError);
    }
    Ok(plaintext)
}

fn derive_box_key(
    shared: &[u8; 32],
    ephemeral_public: &X25519Public,
    recipient: &X25519Public,
) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    let mut salt = [0u8; 64];
    salt[..32].copy_from_slice(ephemeral_public.as_bytes());
    salt[32..].copy_from_slice(recipient.as_bytes());

    let hk = Hkdf::<Sha256>::new(Some(&salt), shared);
    let mut okm = Zeroizing::new([0u8; 32]);
    hk.expand(BOX_INFO, okm.as_mut_slice())
        .map_err(|_| CryptoError::KeyDerivationFailed)?;
    Ok(okm)
}
