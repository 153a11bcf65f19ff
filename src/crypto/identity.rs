//! Participant identity
//!
//! Each enclave owns a static Ed25519 signing key and a static X25519 key
//! used as the target of sealed boxes. Only the public halves ever leave the
//! enclave, packed into a versioned [`PublicKeyBundle`].

use super::{fingerprint, sealed_box, CryptoError};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};

/// Version tag of the canonical public key encoding
pub const PUBLIC_KEY_BUNDLE_VERSION: u8 = 1;

/// Length of the canonical public key encoding: version || ed25519 || x25519
pub const PUBLIC_KEY_BUNDLE_LEN: usize = 1 + 32 + 32;

/// Length of an Ed25519 signature
pub const SIGNATURE_LEN: usize = 64;

/// The public half of a participant identity
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKeyBundle {
    verifying: [u8; 32],
    exchange: [u8; 32],
}

impl PublicKeyBundle {
    /// Canonical serialized form, the only form sent to peers
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(PUBLIC_KEY_BUNDLE_LEN);
        out.push(PUBLIC_KEY_BUNDLE_VERSION);
        out.extend_from_slice(&self.verifying);
        out.extend_from_slice(&self.exchange);
        out
    }

    /// Parse and validate the canonical form
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != PUBLIC_KEY_BUNDLE_LEN {
            return Err(CryptoError::InvalidKeyLength {
                expected: PUBLIC_KEY_BUNDLE_LEN,
                actual: bytes.len(),
            });
        }
        if bytes[0] != PUBLIC_KEY_BUNDLE_VERSION {
            return Err(CryptoError::InvalidPublicKey(format!(
                "unsupported key bundle version {}",
                bytes[0]
            )));
        }

        let mut verifying = [0u8; 32];
        verifying.copy_from_slice(&bytes[1..33]);
        let mut exchange = [0u8; 32];
        exchange.copy_from_slice(&bytes[33..]);

        VerifyingKey::from_bytes(&verifying)
            .map_err(|_| CryptoError::InvalidPublicKey("not a valid ed25519 point".into()))?;
        if exchange == [0u8; 32] {
            return Err(CryptoError::InvalidPublicKey("all-zero x25519 key".into()));
        }

        Ok(Self {
            verifying,
            exchange,
        })
    }

    pub fn verifying_key(&self) -> Result<VerifyingKey, CryptoError> {
        VerifyingKey::from_bytes(&self.verifying)
            .map_err(|_| CryptoError::InvalidPublicKey("not a valid ed25519 point".into()))
    }

    pub fn exchange_key(&self) -> X25519Public {
        X25519Public::from(self.exchange)
    }

    /// Short identifier for logs
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.to_bytes())
    }
}

impl std::fmt::Debug for PublicKeyBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKeyBundle({})", self.fingerprint())
    }
}

/// A participant's static keypair
///
/// Immutable after construction, so a shared reference can be used from any
/// number of threads. Secret halves are zeroized on drop by the underlying
/// key types.
pub struct CryptoIdentity {
    name: String,
    signing_key: SigningKey,
    exchange_secret: StaticSecret,
    public: PublicKeyBundle,
}

impl CryptoIdentity {
    /// Generate a fresh identity from the OS RNG
    pub fn generate(name: &str) -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let exchange_secret = StaticSecret::random_from_rng(OsRng);
        Self::assemble(name, signing_key, exchange_secret)
    }

    /// Deterministic construction from seeds (tests, provisioning from sealed storage)
    pub fn from_seeds(name: &str, signing_seed: &[u8; 32], exchange_seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(signing_seed);
        let exchange_secret = StaticSecret::from(*exchange_seed);
        Self::assemble(name, signing_key, exchange_secret)
    }

    fn assemble(name: &str, signing_key: SigningKey, exchange_secret: StaticSecret) -> Self {
        let public = PublicKeyBundle {
            verifying: signing_key.verifying_key().to_bytes(),
            exchange: X25519Public::from(&exchange_secret).to_bytes(),
        };
        Self {
            name: name.to_string(),
            signing_key,
            exchange_secret,
            public,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn public_key(&self) -> &PublicKeyBundle {
        &self.public
    }

    /// Canonical public key bytes; pure accessor
    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.public.to_bytes()
    }

    /// Sign `payload` with the static signing key
    pub fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let signature: Signature = self
            .signing_key
            .try_sign(payload)
            .map_err(|e| CryptoError::SigningError(e.to_string()))?;
        Ok(signature.to_bytes().to_vec())
    }

    /// Verify `signature` over `payload` against a canonical public key.
    ///
    /// Any malformed key or signature simply yields `false`.
    pub fn verify(payload: &[u8], signature: &[u8], public_key: &[u8]) -> bool {
        let Ok(bundle) = PublicKeyBundle::from_bytes(public_key) else {
            return false;
        };
        Self::verify_with(&bundle, payload, signature)
    }

    /// Same as [`CryptoIdentity::verify`] for an already parsed bundle
    pub fn verify_with(bundle: &PublicKeyBundle, payload: &[u8], signature: &[u8]) -> bool {
        let Ok(verifying_key) = bundle.verifying_key() else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(signature) else {
            return false;
        };
        verifying_key.verify_strict(payload, &signature).is_ok()
    }

    /// Encrypt `plaintext` so only the holder of `public_key` can read it
    pub fn encrypt_for(public_key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let bundle = PublicKeyBundle::from_bytes(public_key)
            .map_err(|e| CryptoError::EncryptionError(e.to_string()))?;
        sealed_box::seal(&bundle.exchange_key(), plaintext)
    }

    /// Decrypt a sealed box addressed to this identity
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        sealed_box::open(&self.exchange_secret, &self.public.exchange_key(), ciphertext)
    }
}

impl std::fmt::Debug for CryptoIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoIdentity")
            .field("name", &self.name)
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}
