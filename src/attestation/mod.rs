//! Attestation: proving which code produced a public key
//!
//! The channel core consumes an [`AttestationProvider`]: it asks for a
//! report binding its own public key, and asks the provider to verify a
//! peer's report against the expected-identity policy for that peer. The
//! isolation technology behind the provider is opaque to the core.
//!
//! [`simulated`] contains a software platform used by the CLI and tests.

mod policy;
pub mod simulated;

pub use policy::IdentityPolicy;
pub use simulated::{EnclaveImage, EnclaveMeasurement, SimulatedEnclave, SimulatedPlatform};

use serde::{Deserialize, Serialize};

/// Kind of isolation backing an enclave
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TeeBackend {
    IntelSgx,
    AmdSevSnp,
    ArmTrustZone,
    /// Software only, NOT hardware-secured
    Simulated,
}

impl TeeBackend {
    pub fn name(&self) -> &str {
        match self {
            TeeBackend::IntelSgx => "Intel SGX",
            TeeBackend::AmdSevSnp => "AMD SEV-SNP",
            TeeBackend::ArmTrustZone => "ARM TrustZone",
            TeeBackend::Simulated => "Simulated (software)",
        }
    }

    pub fn is_hardware(&self) -> bool {
        !matches!(self, TeeBackend::Simulated)
    }
}

/// Assurance level claimed by a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecurityLevel {
    /// Hardware-backed and healthy
    Hardware,
    /// Software simulation, development only
    Software,
    /// Hardware present but a health check failed
    Degraded,
}

impl SecurityLevel {
    fn rank(self) -> u8 {
        match self {
            SecurityLevel::Degraded => 0,
            SecurityLevel::Software => 1,
            SecurityLevel::Hardware => 2,
        }
    }

    /// Whether this level satisfies `minimum`
    pub fn meets(self, minimum: SecurityLevel) -> bool {
        self.rank() >= minimum.rank()
    }
}

/// Opaque attestation evidence as it crosses the boundary
#[derive(Clone, PartialEq, Eq)]
pub struct AttestationReport(Vec<u8>);

impl AttestationReport {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for AttestationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AttestationReport({} bytes)", self.0.len())
    }
}

/// What a successful verification yields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedReport {
    /// Public key the report was generated over
    pub bound_public_key: Vec<u8>,
    /// Provider-specific identifier of the attested enclave, for diagnostics
    pub enclave_id: String,
    pub security_level: SecurityLevel,
}

/// Diagnostic code attached to a rejected report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectionCode {
    /// Report could not be decoded
    Malformed,
    /// Report signature does not chain to a trusted quoting key
    BadSignature,
    /// Report is older than the policy allows
    Expired,
    /// Key presented alongside the report differs from the bound key
    KeyMismatch,
    /// No expected-identity policy exists for the peer
    NoPolicy,
    SimulatedNotAllowed,
    DebugNotAllowed,
    InsufficientSecurityLevel,
    SvnTooLow,
    ProductMismatch,
    UntrustedMeasurement,
    UntrustedSigner,
}

/// Provider verdict for a report that failed verification
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("attestation rejected ({code:?}): {detail}")]
pub struct AttestationRejection {
    pub code: RejectionCode,
    pub detail: String,
}

impl AttestationRejection {
    pub fn new(code: RejectionCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
        }
    }
}

/// Internal failure of the provider while producing a report
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("attestation provider failure: {0}")]
pub struct ProviderError(pub String);

/// The isolation platform's attestation interface
pub trait AttestationProvider: Send + Sync {
    /// Produce a report binding `bound_public_key` to this enclave's identity
    fn generate_report(&self, bound_public_key: &[u8]) -> Result<AttestationReport, ProviderError>;

    /// Check a peer's report and return the public key it binds
    fn verify_report(
        &self,
        report: &AttestationReport,
        policy: &IdentityPolicy,
    ) -> Result<VerifiedReport, AttestationRejection>;
}

impl<P: AttestationProvider + ?Sized> AttestationProvider for std::sync::Arc<P> {
    fn generate_report(&self, bound_public_key: &[u8]) -> Result<AttestationReport, ProviderError> {
        (**self).generate_report(bound_public_key)
    }

    fn verify_report(
        &self,
        report: &AttestationReport,
        policy: &IdentityPolicy,
    ) -> Result<VerifiedReport, AttestationRejection> {
        (**self).verify_report(report, policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_security_level_ordering() {
        assert!(SecurityLevel::Hardware.meets(SecurityLevel::Software));
        assert!(SecurityLevel::Software.meets(SecurityLevel::Software));
        assert!(!SecurityLevel::Software.meets(SecurityLevel::Hardware));
        assert!(!SecurityLevel::Degraded.meets(SecurityLevel::Software));
    }

    #[test]
    fn test_backend_names() {
        assert!(TeeBackend::IntelSgx.is_hardware());
        assert!(!TeeBackend::Simulated.is_hardware());
        assert_eq!(TeeBackend::Simulated.name(), "Simulated (software)");
    }

    #[test]
    fn test_report_debug_hides_contents() {
        let report = AttestationReport::from_bytes(vec![1, 2, 3]);
        assert_eq!(format!("{:?}", report), "AttestationReport(3 bytes)");
    }
}
