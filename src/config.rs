//! Channel configuration
//!
//! Persisted as JSON. Holds this participant's name, structural limits for
//! boundary buffers, the renegotiation switch, and the expected-identity
//! policy for each peer. Peer identity is never compiled in; it arrives
//! through the policies here.

use crate::attestation::IdentityPolicy;
use crate::channel::envelope::{max_message_envelope_len, MAX_NAME_LEN};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Name of this enclave; bound into every handshake signature
    pub participant_name: String,
    /// Permit re-keying an established session without an explicit reset
    pub allow_renegotiation: bool,
    /// Upper bound for inbound envelopes, reports and public keys
    pub max_envelope_bytes: usize,
    /// Upper bound for plaintexts handed to the messenger
    pub max_message_bytes: usize,
    /// Policy used for peers without an entry in `peer_policies`
    pub default_policy: Option<IdentityPolicy>,
    pub peer_policies: HashMap<String, IdentityPolicy>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            participant_name: "enclave".to_string(),
            allow_renegotiation: false,
            max_envelope_bytes: 1024 * 1024,
            max_message_bytes: 256 * 1024,
            default_policy: None,
            peer_policies: HashMap::new(),
        }
    }
}

impl ChannelConfig {
    pub fn new(participant_name: &str) -> Self {
        Self {
            participant_name: participant_name.to_string(),
            ..Self::default()
        }
    }

    /// Register the expected identity of `peer`
    pub fn with_peer_policy(mut self, peer: &str, policy: IdentityPolicy) -> Self {
        self.peer_policies.insert(peer.to_string(), policy);
        self
    }

    pub fn with_default_policy(mut self, policy: IdentityPolicy) -> Self {
        self.default_policy = Some(policy);
        self
    }

    pub fn with_renegotiation(mut self, allow: bool) -> Self {
        self.allow_renegotiation = allow;
        self
    }

    /// Policy that applies to `peer`, if any
    pub fn policy_for(&self, peer: &str) -> Option<&IdentityPolicy> {
        self.peer_policies
            .get(peer)
            .or(self.default_policy.as_ref())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.participant_name.trim().is_empty() {
            return Err(ConfigError::Invalid("participant_name is empty".into()));
        }
        if self.participant_name.len() > MAX_NAME_LEN {
            return Err(ConfigError::Invalid(format!(
                "participant_name is longer than {} bytes",
                MAX_NAME_LEN
            )));
        }
        if self.max_envelope_bytes == 0 || self.max_message_bytes == 0 {
            return Err(ConfigError::Invalid("size limits must be non-zero".into()));
        }
        let needed = max_message_envelope_len(self.max_message_bytes);
        if needed > self.max_envelope_bytes {
            return Err(ConfigError::Invalid(format!(
                "a {}-byte message encodes to up to {} bytes, above max_envelope_bytes {}",
                self.max_message_bytes, needed, self.max_envelope_bytes
            )));
        }
        if self.peer_policies.contains_key(&self.participant_name) {
            return Err(ConfigError::Invalid(format!(
                "peer policy configured for self ('{}')",
                self.participant_name
            )));
        }
        Ok(())
    }

    /// Load and validate a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        info!(
            "Loaded channel config for '{}' ({} peer policies) from {}",
            config.participant_name,
            config.peer_policies.len(),
            path.display()
        );
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json)?;
        info!("Saved channel config to {}", path.as_ref().display());
        Ok(())
    }
}
