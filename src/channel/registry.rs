//! Session registry: per-peer handshake state and established keys
//!
//! The map itself is only locked long enough to find or insert a slot.
//! Each slot carries two locks: the entry mutex, held by every operation
//! that reads or mutates the session, and a handshake gate that only key
//! establishment takes with `try_lock`. Work for different peers never
//! serializes, and only two overlapping handshakes for the same peer see
//! `ConcurrentHandshakeInProgress`.

use super::messenger::SecureMessenger;
use crate::crypto::SessionKey;
use crate::error::{ChannelError, ChannelResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, TryLockError};
use uuid::Uuid;

/// Handshake progress for one peer relationship; ordered
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Uninitiated,
    /// Our report has been handed to the transport for this peer
    ReportSent,
    /// Peer's report verified and its key pinned
    PeerAttested,
    /// Our key offer is out, waiting for confirmation
    KeySent,
    KeyEstablished,
}

/// Which side generated the session key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Initiator,
    Responder,
}

/// A key offer awaiting the peer's confirmation
#[derive(Debug)]
pub(crate) struct PendingOffer {
    pub(crate) session_id: Uuid,
    pub(crate) key: SessionKey,
}

/// Mutable state of one peer relationship
#[derive(Debug)]
pub struct SessionEntry {
    state: SessionState,
    pub(crate) pending: Option<PendingOffer>,
    pub(crate) messenger: Option<SecureMessenger>,
    established_at: Option<DateTime<Utc>>,
}

impl SessionEntry {
    fn new() -> Self {
        Self {
            state: SessionState::Uninitiated,
            pending: None,
            messenger: None,
            established_at: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Move forward to `next`; never moves backwards
    pub(crate) fn advance(&mut self, next: SessionState) {
        if next > self.state {
            self.state = next;
        }
    }

    /// Install a freshly established messenger, dropping any previous one
    pub(crate) fn establish(&mut self, messenger: SecureMessenger) {
        self.pending = None;
        self.messenger = Some(messenger);
        self.established_at = Some(Utc::now());
        self.advance(SessionState::KeyEstablished);
    }

    /// Whether a key offer of ours is outstanding
    pub(crate) fn handshake_in_flight(&self) -> bool {
        self.pending.is_some()
    }

    /// Explicit reset: drop all key material and set the state to `floor`
    pub(crate) fn reset(&mut self, floor: SessionState) {
        self.pending = None;
        self.messenger = None;
        self.established_at = None;
        self.state = floor;
    }

    fn snapshot(&self, peer: &str) -> SessionSnapshot {
        SessionSnapshot {
            peer: peer.to_string(),
            state: self.state,
            session_id: self
                .messenger
                .as_ref()
                .map(|m| m.session_id())
                .or_else(|| self.pending.as_ref().map(|p| p.session_id)),
            role: self.messenger.as_ref().map(|m| m.role()),
            established_at: self.established_at,
            messages_sent: self.messenger.as_ref().map_or(0, |m| m.messages_sent()),
            messages_received: self
                .messenger
                .as_ref()
                .map_or(0, |m| m.messages_received()),
        }
    }
}

/// Read-only view of a session, safe to log or display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub peer: String,
    pub state: SessionState,
    pub session_id: Option<Uuid>,
    pub role: Option<Role>,
    pub established_at: Option<DateTime<Utc>>,
    pub messages_sent: u64,
    pub messages_received: u64,
}

impl SessionSnapshot {
    pub fn summary(&self) -> String {
        format!(
            "Session {} | peer={} | state={:?} | role={:?} | sent={} recv={}",
            self.session_id
                .map(|id| id.to_string()[..8].to_string())
                .unwrap_or_else(|| "none".into()),
            self.peer,
            self.state,
            self.role,
            self.messages_sent,
            self.messages_received,
        )
    }
}

/// Per-peer locks around a [`SessionEntry`]
#[derive(Debug)]
pub(crate) struct SessionSlot {
    handshake: Mutex<()>,
    entry: Mutex<SessionEntry>,
}

impl SessionSlot {
    fn new() -> Self {
        Self {
            handshake: Mutex::new(()),
            entry: Mutex::new(SessionEntry::new()),
        }
    }
}

/// Process-wide map from peer name to session slot
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<SessionSlot>>>,
    /// Session ids ever established per peer; survives reset and removal
    consumed: Mutex<HashMap<String, HashSet<Uuid>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot for `peer`, created on first use
    pub(crate) fn entry(&self, peer: &str) -> ChannelResult<Arc<SessionSlot>> {
        if let Some(slot) = self.existing(peer)? {
            return Ok(slot);
        }
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| ChannelError::RegistryPoisoned)?;
        Ok(sessions
            .entry(peer.to_string())
            .or_insert_with(|| Arc::new(SessionSlot::new()))
            .clone())
    }

    /// Slot for `peer` without creating one
    pub(crate) fn existing(&self, peer: &str) -> ChannelResult<Option<Arc<SessionSlot>>> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| ChannelError::RegistryPoisoned)?;
        Ok(sessions.get(peer).cloned())
    }

    pub(crate) fn remove(&self, peer: &str) -> ChannelResult<Option<Arc<SessionSlot>>> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| ChannelError::RegistryPoisoned)?;
        Ok(sessions.remove(peer))
    }

    /// Mark `session_id` as used with `peer`; false if it already was
    pub(crate) fn consume_session_id(&self, peer: &str, session_id: Uuid) -> ChannelResult<bool> {
        let mut consumed = self
            .consumed
            .lock()
            .map_err(|_| ChannelError::RegistryPoisoned)?;
        Ok(consumed
            .entry(peer.to_string())
            .or_default()
            .insert(session_id))
    }

    pub(crate) fn is_consumed(&self, peer: &str, session_id: &Uuid) -> ChannelResult<bool> {
        let consumed = self
            .consumed
            .lock()
            .map_err(|_| ChannelError::RegistryPoisoned)?;
        Ok(consumed
            .get(peer)
            .is_some_and(|ids| ids.contains(session_id)))
    }

    /// Current state for `peer`; `Uninitiated` if never touched
    pub fn state(&self, peer: &str) -> ChannelResult<SessionState> {
        match self.existing(peer)? {
            Some(slot) => Ok(lock(&slot)?.state()),
            None => Ok(SessionState::Uninitiated),
        }
    }

    pub fn snapshot(&self, peer: &str) -> ChannelResult<SessionSnapshot> {
        match self.existing(peer)? {
            Some(slot) => Ok(lock(&slot)?.snapshot(peer)),
            None => Ok(SessionEntry::new().snapshot(peer)),
        }
    }

    pub fn peers(&self) -> ChannelResult<Vec<String>> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| ChannelError::RegistryPoisoned)?;
        Ok(sessions.keys().cloned().collect())
    }

    /// Zeroize and drop every session
    pub(crate) fn teardown_all(&self) -> ChannelResult<usize> {
        let drained: Vec<_> = {
            let mut sessions = self
                .sessions
                .write()
                .map_err(|_| ChannelError::RegistryPoisoned)?;
            sessions.drain().collect()
        };
        for (_, slot) in &drained {
            if let Ok(mut guard) = slot.entry.lock() {
                guard.reset(SessionState::Uninitiated);
            }
        }
        Ok(drained.len())
    }
}

/// Blocking lock on a session entry
pub(crate) fn lock(slot: &SessionSlot) -> ChannelResult<MutexGuard<'_, SessionEntry>> {
    slot.entry.lock().map_err(|_| ChannelError::RegistryPoisoned)
}

/// Non-blocking claim on the handshake gate of `slot`. Held for the whole
/// key establishment call, alongside the entry lock.
pub(crate) fn begin_handshake<'a>(
    slot: &'a SessionSlot,
    peer: &str,
) -> ChannelResult<MutexGuard<'a, ()>> {
    match slot.handshake.try_lock() {
        Ok(guard) => Ok(guard),
        Err(TryLockError::WouldBlock) => {
            Err(ChannelError::ConcurrentHandshakeInProgress(peer.to_string()))
        }
        Err(TryLockError::Poisoned(_)) => Err(ChannelError::RegistryPoisoned),
    }
}
