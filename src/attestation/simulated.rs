//! Simulated attestation platform
//!
//! A software stand-in for an isolation platform's quoting infrastructure:
//! - a [`SimulatedPlatform`] owns an Ed25519 quoting key (the role played by
//!   the hardware attestation key)
//! - enclaves launched from an [`EnclaveImage`] get a measurement
//!   (MRENCLAVE / MRSIGNER digests, product id, SVN, debug attribute)
//! - reports are JSON quote bodies signed by the quoting key, carrying the
//!   bound public key as report data
//!
//! Verification follows the same order as a hardware verifier: signature
//! chain first, then freshness, then identity policy.

use super::{
    AttestationProvider, AttestationRejection, AttestationReport, IdentityPolicy, ProviderError,
    RejectionCode, SecurityLevel, TeeBackend, VerifiedReport,
};
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const QUOTE_DOMAIN: &[u8] = b"enclave-channel/simulated-quote/v1";
const QUOTE_VERSION: u16 = 1;
/// Reports timestamped further in the future than this are rejected
const MAX_CLOCK_SKEW_SECS: i64 = 60;

/// Attribute flag set when the enclave runs in debug mode
pub const ATTRIBUTE_DEBUG: u64 = 0x0000_0000_0000_0002;
const ATTRIBUTE_INIT_MODE64: u64 = 0x0000_0000_0000_0005;

/// Build-time description of an enclave binary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnclaveImage {
    /// Identifies the code and initial data (hashed into MRENCLAVE)
    pub code_identity: String,
    /// Identifies the signing key (hashed into MRSIGNER)
    pub signer: String,
    pub product_id: u16,
    pub svn: u16,
    pub debug: bool,
}

impl EnclaveImage {
    pub fn new(code_identity: &str, signer: &str) -> Self {
        Self {
            code_identity: code_identity.to_string(),
            signer: signer.to_string(),
            product_id: 1,
            svn: 1,
            debug: false,
        }
    }

    pub fn with_svn(mut self, svn: u16) -> Self {
        self.svn = svn;
        self
    }

    pub fn with_product_id(mut self, product_id: u16) -> Self {
        self.product_id = product_id;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

/// Measurement of enclave identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnclaveMeasurement {
    /// MRENCLAVE: hash of enclave code + data at build time
    pub mrenclave: String,
    /// MRSIGNER: hash of the signing key
    pub mrsigner: String,
    pub product_id: u16,
    /// Security version number
    pub isv_svn: u16,
    /// Enclave attributes (flags)
    pub attributes: u64,
}

impl EnclaveMeasurement {
    /// Compute the measurement an image would have when launched
    pub fn compute(image: &EnclaveImage) -> Self {
        let mrenclave = {
            let mut h = Sha256::new();
            h.update(image.code_identity.as_bytes());
            h.update(b"mrenclave-v1");
            hex::encode(h.finalize())
        };
        let mrsigner = {
            let mut h = Sha256::new();
            h.update(image.signer.as_bytes());
            h.update(b"mrsigner-v1");
            hex::encode(h.finalize())
        };
        let mut attributes = ATTRIBUTE_INIT_MODE64;
        if image.debug {
            attributes |= ATTRIBUTE_DEBUG;
        }
        Self {
            mrenclave,
            mrsigner,
            product_id: image.product_id,
            isv_svn: image.svn,
            attributes,
        }
    }

    pub fn is_debug(&self) -> bool {
        self.attributes & ATTRIBUTE_DEBUG != 0
    }

    /// Verify measurement matches expected values
    pub fn matches(&self, expected: &EnclaveMeasurement) -> bool {
        self.mrenclave == expected.mrenclave
            && self.mrsigner == expected.mrsigner
            && self.isv_svn >= expected.isv_svn
    }
}

/// The signed part of a simulated report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteBody {
    pub version: u16,
    pub enclave_id: String,
    pub measurement: EnclaveMeasurement,
    pub backend: TeeBackend,
    pub security_level: SecurityLevel,
    pub timestamp: DateTime<Utc>,
    /// The public key this report vouches for
    #[serde(with = "hex::serde")]
    pub report_data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SignedQuote {
    #[serde(with = "hex::serde")]
    body: Vec<u8>,
    #[serde(with = "hex::serde")]
    signature: Vec<u8>,
}

fn quote_message(body: &[u8]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(QUOTE_DOMAIN.len() + body.len());
    msg.extend_from_slice(QUOTE_DOMAIN);
    msg.extend_from_slice(body);
    msg
}

/// Software quoting authority shared by a set of simulated enclaves
pub struct SimulatedPlatform {
    quoting_key: SigningKey,
    backend: TeeBackend,
    security_level: SecurityLevel,
}

impl SimulatedPlatform {
    pub fn new() -> Self {
        Self {
            quoting_key: SigningKey::generate(&mut OsRng),
            backend: TeeBackend::Simulated,
            security_level: SecurityLevel::Software,
        }
    }

    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            quoting_key: SigningKey::from_bytes(seed),
            backend: TeeBackend::Simulated,
            security_level: SecurityLevel::Software,
        }
    }

    /// Claim a different backend in issued reports (exercises hardware-only policies)
    pub fn with_backend(mut self, backend: TeeBackend, security_level: SecurityLevel) -> Self {
        self.backend = backend;
        self.security_level = security_level;
        self
    }

    pub fn quoting_public_key(&self) -> [u8; 32] {
        self.quoting_key.verifying_key().to_bytes()
    }

    /// Launch an enclave from `image`; it trusts this platform's quoting key
    pub fn launch(&self, image: &EnclaveImage) -> SimulatedEnclave {
        let id = uuid::Uuid::new_v4().to_string();
        let measurement = EnclaveMeasurement::compute(image);

        log::info!(
            "Simulated enclave launched: backend={}, security={:?}, id={}, mrenclave={}...",
            self.backend.name(),
            self.security_level,
            &id[..8],
            &measurement.mrenclave[..16]
        );

        SimulatedEnclave {
            id,
            measurement,
            backend: self.backend,
            security_level: self.security_level,
            quoting_key: self.quoting_key.clone(),
            trusted_quoting_keys: vec![self.quoting_key.verifying_key()],
        }
    }
}

impl Default for SimulatedPlatform {
    fn default() -> Self {
        Self::new()
    }
}

/// An enclave running on a [`SimulatedPlatform`], acting as its own attestation provider
pub struct SimulatedEnclave {
    id: String,
    measurement: EnclaveMeasurement,
    backend: TeeBackend,
    security_level: SecurityLevel,
    quoting_key: SigningKey,
    trusted_quoting_keys: Vec<VerifyingKey>,
}

impl SimulatedEnclave {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn measurement(&self) -> &EnclaveMeasurement {
        &self.measurement
    }

    pub fn backend(&self) -> TeeBackend {
        self.backend
    }

    pub fn security_level(&self) -> SecurityLevel {
        self.security_level
    }

    /// Also accept reports quoted by another platform
    pub fn trust_platform(&mut self, quoting_public_key: &[u8; 32]) -> Result<(), ProviderError> {
        let key = VerifyingKey::from_bytes(quoting_public_key)
            .map_err(|e| ProviderError(format!("invalid quoting key: {}", e)))?;
        if !self.trusted_quoting_keys.contains(&key) {
            self.trusted_quoting_keys.push(key);
        }
        Ok(())
    }

    /// Produce a report at an explicit time
    pub fn generate_report_at(
        &self,
        bound_public_key: &[u8],
        timestamp: DateTime<Utc>,
    ) -> Result<AttestationReport, ProviderError> {
        let body = QuoteBody {
            version: QUOTE_VERSION,
            enclave_id: self.id.clone(),
            measurement: self.measurement.clone(),
            backend: self.backend,
            security_level: self.security_level,
            timestamp,
            report_data: bound_public_key.to_vec(),
        };
        let body = serde_json::to_vec(&body)
            .map_err(|e| ProviderError(format!("quote encoding: {}", e)))?;
        let signature: Signature = self
            .quoting_key
            .try_sign(&quote_message(&body))
            .map_err(|e| ProviderError(format!("quote signing: {}", e)))?;

        let quote = SignedQuote {
            body,
            signature: signature.to_bytes().to_vec(),
        };
        let bytes = serde_json::to_vec(&quote)
            .map_err(|e| ProviderError(format!("quote encoding: {}", e)))?;
        Ok(AttestationReport::from_bytes(bytes))
    }

    fn check_signature(&self, quote: &SignedQuote) -> Result<QuoteBody, AttestationRejection> {
        let signature = Signature::from_slice(&quote.signature).map_err(|_| {
            AttestationRejection::new(RejectionCode::Malformed, "bad signature encoding")
        })?;
        let message = quote_message(&quote.body);
        let chained = self
            .trusted_quoting_keys
            .iter()
            .any(|key| key.verify_strict(&message, &signature).is_ok());
        if !chained {
            return Err(AttestationRejection::new(
                RejectionCode::BadSignature,
                "quote not signed by a trusted quoting key",
            ));
        }
        serde_json::from_slice(&quote.body).map_err(|e| {
            AttestationRejection::new(RejectionCode::Malformed, format!("quote body: {}", e))
        })
    }
}

impl AttestationProvider for SimulatedEnclave {
    fn generate_report(&self, bound_public_key: &[u8]) -> Result<AttestationReport, ProviderError> {
        self.generate_report_at(bound_public_key, Utc::now())
    }

    fn verify_report(
        &self,
        report: &AttestationReport,
        policy: &IdentityPolicy,
    ) -> Result<VerifiedReport, AttestationRejection> {
        // 1. Decode
        let quote: SignedQuote = serde_json::from_slice(report.as_bytes()).map_err(|e| {
            AttestationRejection::new(RejectionCode::Malformed, format!("report: {}", e))
        })?;

        // 2. Signature chain; nothing in the body is trusted before this
        let body = self.check_signature(&quote)?;
        if body.version != QUOTE_VERSION {
            return Err(AttestationRejection::new(
                RejectionCode::Malformed,
                format!("unsupported quote version {}", body.version),
            ));
        }

        // 3. Freshness
        let age = (Utc::now() - body.timestamp).num_seconds();
        if age > policy.max_report_age_secs {
            return Err(AttestationRejection::new(
                RejectionCode::Expired,
                format!("report is {}s old, limit {}s", age, policy.max_report_age_secs),
            ));
        }
        if age < -MAX_CLOCK_SKEW_SECS {
            return Err(AttestationRejection::new(
                RejectionCode::Expired,
                "report timestamp is in the future",
            ));
        }

        // 4. Simulated enclave policy
        if !policy.allow_simulated
            && (body.backend == TeeBackend::Simulated
                || body.security_level == SecurityLevel::Software)
        {
            return Err(AttestationRejection::new(
                RejectionCode::SimulatedNotAllowed,
                "software-simulated enclave not allowed by policy",
            ));
        }

        // 5. Debug attribute
        if !policy.allow_debug && body.measurement.is_debug() {
            return Err(AttestationRejection::new(
                RejectionCode::DebugNotAllowed,
                "debug enclave not allowed by policy",
            ));
        }

        // 6. Security level
        if !body.security_level.meets(policy.min_security_level) {
            return Err(AttestationRejection::new(
                RejectionCode::InsufficientSecurityLevel,
                format!(
                    "security level {:?} below minimum {:?}",
                    body.security_level, policy.min_security_level
                ),
            ));
        }

        // 7. SVN
        if body.measurement.isv_svn < policy.min_svn {
            return Err(AttestationRejection::new(
                RejectionCode::SvnTooLow,
                format!(
                    "SVN {} below minimum {}",
                    body.measurement.isv_svn, policy.min_svn
                ),
            ));
        }

        // 8. Product id
        if let Some(product_id) = policy.product_id {
            if body.measurement.product_id != product_id {
                return Err(AttestationRejection::new(
                    RejectionCode::ProductMismatch,
                    format!(
                        "product id {} != expected {}",
                        body.measurement.product_id, product_id
                    ),
                ));
            }
        }

        // 9. Trusted enclaves (if list is non-empty)
        if !policy.trusted_enclaves.is_empty()
            && !policy.trusted_enclaves.contains(&body.measurement.mrenclave)
        {
            return Err(AttestationRejection::new(
                RejectionCode::UntrustedMeasurement,
                "MRENCLAVE not in trusted list",
            ));
        }

        // 10. Trusted signers (if list is non-empty)
        if !policy.trusted_signers.is_empty()
            && !policy.trusted_signers.contains(&body.measurement.mrsigner)
        {
            return Err(AttestationRejection::new(
                RejectionCode::UntrustedSigner,
                "MRSIGNER not in trusted list",
            ));
        }

        Ok(VerifiedReport {
            bound_public_key: body.report_data,
            enclave_id: body.enclave_id,
            security_level: body.security_level,
        })
    }
}
