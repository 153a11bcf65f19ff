//! Pinned public keys of attested peers

use crate::crypto::PublicKeyBundle;
use crate::error::{ChannelError, ChannelResult};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

/// A peer whose report has been verified
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub peer_name: String,
    pub public_key: PublicKeyBundle,
    pub attested: bool,
    /// Provider-reported enclave id, for diagnostics
    pub enclave_id: String,
    pub attested_at: DateTime<Utc>,
}

/// Per-peer verified public keys
///
/// Only the handshake engine can write here, and only right after a
/// successful report verification.
#[derive(Debug, Default)]
pub struct PeerKeyStore {
    records: RwLock<HashMap<String, PeerRecord>>,
}

impl PeerKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&self, record: PeerRecord) -> ChannelResult<()> {
        let mut records = self
            .records
            .write()
            .map_err(|_| ChannelError::RegistryPoisoned)?;
        records.insert(record.peer_name.clone(), record);
        Ok(())
    }

    /// The attested record for `peer`; `PeerNotAttested` means no
    /// cryptographic operation may target this peer yet.
    pub fn lookup(&self, peer: &str) -> ChannelResult<PeerRecord> {
        let records = self
            .records
            .read()
            .map_err(|_| ChannelError::RegistryPoisoned)?;
        match records.get(peer) {
            Some(record) if record.attested => Ok(record.clone()),
            _ => Err(ChannelError::PeerNotAttested(peer.to_string())),
        }
    }

    pub fn contains(&self, peer: &str) -> ChannelResult<bool> {
        match self.lookup(peer) {
            Ok(_) => Ok(true),
            Err(ChannelError::PeerNotAttested(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub(crate) fn remove(&self, peer: &str) -> ChannelResult<Option<PeerRecord>> {
        let mut records = self
            .records
            .write()
            .map_err(|_| ChannelError::RegistryPoisoned)?;
        Ok(records.remove(peer))
    }

    pub fn peers(&self) -> ChannelResult<Vec<String>> {
        let records = self
            .records
            .read()
            .map_err(|_| ChannelError::RegistryPoisoned)?;
        Ok(records.keys().cloned().collect())
    }

    pub fn len(&self) -> ChannelResult<usize> {
        let records = self
            .records
            .read()
            .map_err(|_| ChannelError::RegistryPoisoned)?;
        Ok(records.len())
    }

    pub fn is_empty(&self) -> ChannelResult<bool> {
        Ok(self.len()? == 0)
    }
}
