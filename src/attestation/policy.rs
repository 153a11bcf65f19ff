//! Expected-identity policy applied when verifying a peer's report

use super::SecurityLevel;
use serde::{Deserialize, Serialize};

/// Policy for accepting or rejecting a peer's attestation report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityPolicy {
    /// Trusted MRENCLAVE values (empty = accept any)
    pub trusted_enclaves: Vec<String>,
    /// Trusted MRSIGNER values (empty = accept any)
    pub trusted_signers: Vec<String>,
    /// Required product id, if any
    pub product_id: Option<u16>,
    /// Minimum security version number
    pub min_svn: u16,
    /// Whether to accept software-simulated enclaves
    pub allow_simulated: bool,
    /// Whether to accept enclaves launched in debug mode
    pub allow_debug: bool,
    /// Maximum age of a report in seconds
    pub max_report_age_secs: i64,
    /// Minimum security level required
    pub min_security_level: SecurityLevel,
}

impl Default for IdentityPolicy {
    fn default() -> Self {
        Self {
            trusted_enclaves: Vec::new(),
            trusted_signers: Vec::new(),
            product_id: None,
            min_svn: 0,
            allow_simulated: true, // permissive default for development
            allow_debug: true,
            max_report_age_secs: 3600,
            min_security_level: SecurityLevel::Software,
        }
    }
}

impl IdentityPolicy {
    /// Strict policy: hardware TEE, no debug, pinned measurement and signer
    pub fn strict(trusted_enclaves: Vec<String>, trusted_signers: Vec<String>) -> Self {
        Self {
            trusted_enclaves,
            trusted_signers,
            product_id: None,
            min_svn: 1,
            allow_simulated: false,
            allow_debug: false,
            max_report_age_secs: 300,
            min_security_level: SecurityLevel::Hardware,
        }
    }

    /// Development policy pinned to one measurement, simulated enclaves allowed
    pub fn pinned(mrenclave: &str, mrsigner: &str) -> Self {
        Self {
            trusted_enclaves: vec![mrenclave.to_string()],
            trusted_signers: vec![mrsigner.to_string()],
            ..Self::default()
        }
    }
}
