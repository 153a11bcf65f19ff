//! Handshake engine: the boundary operations of the secure channel
//!
//! One engine per enclave, constructed explicitly with its identity,
//! attestation provider and configuration, and shared by reference with
//! whatever transport drives it. Every peer-directed operation looks the
//! peer up in the [`PeerKeyStore`] first; only a successful
//! [`HandshakeEngine::verify_report_and_set_pubkey`] puts it there.

use super::envelope::{
    handshake_transcript, pack_signed_key, unpack_signed_key, HandshakeEnvelope, HandshakeKind,
    MessageEnvelope, ENVELOPE_VERSION, MAX_NAME_LEN,
};
use super::messenger::SecureMessenger;
use super::peer_store::{PeerKeyStore, PeerRecord};
use super::registry::{self, PendingOffer, Role, SessionRegistry, SessionSnapshot, SessionState};
use crate::attestation::{AttestationProvider, AttestationReport, RejectionCode};
use crate::config::ChannelConfig;
use crate::crypto::{CryptoIdentity, PublicKeyBundle, SessionKey, PUBLIC_KEY_BUNDLE_LEN};
use crate::error::{ChannelError, ChannelResult};
use chrono::Utc;
use log::{debug, info, warn};
use std::sync::RwLock;
use subtle::ConstantTimeEq;
use uuid::Uuid;
use zeroize::Zeroizing;

/// Attestation-gated key establishment and messaging for one enclave
pub struct HandshakeEngine<P: AttestationProvider> {
    identity: CryptoIdentity,
    provider: P,
    config: ChannelConfig,
    peers: PeerKeyStore,
    sessions: SessionRegistry,
    provisioned_secret: RwLock<Option<Zeroizing<Vec<u8>>>>,
}

impl<P: AttestationProvider> HandshakeEngine<P> {
    pub fn new(identity: CryptoIdentity, provider: P, config: ChannelConfig) -> ChannelResult<Self> {
        config
            .validate()
            .map_err(|e| ChannelError::InvalidConfig(e.to_string()))?;
        if identity.name() != config.participant_name {
            return Err(ChannelError::InvalidConfig(format!(
                "identity '{}' does not match participant_name '{}'",
                identity.name(),
                config.participant_name
            )));
        }

        info!(
            "Handshake engine ready: participant={}, key={}, renegotiation={}",
            config.participant_name,
            identity.public_key().fingerprint(),
            config.allow_renegotiation
        );

        Ok(Self {
            identity,
            provider,
            config,
            peers: PeerKeyStore::new(),
            sessions: SessionRegistry::new(),
            provisioned_secret: RwLock::new(None),
        })
    }

    pub fn name(&self) -> &str {
        self.identity.name()
    }

    pub fn identity(&self) -> &CryptoIdentity {
        &self.identity
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn peers(&self) -> &PeerKeyStore {
        &self.peers
    }

    // --- Attestation ---

    /// This enclave's public key and a fresh report over it.
    ///
    /// Touches no session state; callable at any time.
    pub fn get_report_with_pubkey(&self) -> ChannelResult<(Vec<u8>, AttestationReport)> {
        let public_key = self.identity.public_key_bytes();
        let report = self
            .provider
            .generate_report(&public_key)
            .map_err(|e| ChannelError::ReportGenerationFailed(e.0))?;
        debug!(
            "Generated report ({} bytes) over key {}",
            report.len(),
            self.identity.public_key().fingerprint()
        );
        Ok((public_key, report))
    }

    /// Like [`Self::get_report_with_pubkey`], and records that our report
    /// went out to `peer`.
    pub fn send_report_to(&self, peer: &str) -> ChannelResult<(Vec<u8>, AttestationReport)> {
        self.check_peer_name(peer)?;
        let pair = self.get_report_with_pubkey()?;

        let slot = self.sessions.entry(peer)?;
        let mut session = registry::lock(&slot)?;
        if session.state() == SessionState::Uninitiated {
            session.advance(SessionState::ReportSent);
            debug!("Session with {}: Uninitiated -> ReportSent", peer);
        }
        Ok(pair)
    }

    /// Verify `peer`'s report against its expected-identity policy and pin
    /// its public key.
    ///
    /// Nothing is recorded unless every check passes.
    pub fn verify_report_and_set_pubkey(
        &self,
        peer: &str,
        peer_public_key: &[u8],
        report: &AttestationReport,
    ) -> ChannelResult<()> {
        self.check_peer_name(peer)?;
        self.check_buffer("peer public key", peer_public_key)?;
        self.check_buffer("attestation report", report.as_bytes())?;
        if peer_public_key.len() != PUBLIC_KEY_BUNDLE_LEN {
            return Err(ChannelError::MalformedInput(format!(
                "peer public key is {} bytes, expected {}",
                peer_public_key.len(),
                PUBLIC_KEY_BUNDLE_LEN
            )));
        }

        let policy = self.config.policy_for(peer).ok_or_else(|| {
            warn!("Attestation of {} rejected: no identity policy configured", peer);
            ChannelError::AttestationFailed {
                code: RejectionCode::NoPolicy,
                detail: format!("no identity policy for '{}'", peer),
            }
        })?;

        let verified = self.provider.verify_report(report, policy).map_err(|rejection| {
            warn!(
                "Attestation of {} rejected: {:?} ({})",
                peer, rejection.code, rejection.detail
            );
            ChannelError::AttestationFailed {
                code: rejection.code,
                detail: rejection.detail,
            }
        })?;

        let bound_matches: bool = verified
            .bound_public_key
            .as_slice()
            .ct_eq(peer_public_key)
            .into();
        if !bound_matches {
            warn!("Attestation of {} rejected: presented key is not the attested key", peer);
            return Err(ChannelError::AttestationFailed {
                code: RejectionCode::KeyMismatch,
                detail: "public key differs from the key bound in the report".into(),
            });
        }

        let public_key = PublicKeyBundle::from_bytes(peer_public_key).map_err(|e| {
            ChannelError::AttestationFailed {
                code: RejectionCode::Malformed,
                detail: e.to_string(),
            }
        })?;

        let slot = self.sessions.entry(peer)?;
        let mut session = registry::lock(&slot)?;

        if let Ok(previous) = self.peers.lookup(peer) {
            if previous.public_key != public_key {
                info!(
                    "Peer {} re-attested with a new key: {} -> {}",
                    peer,
                    previous.public_key.fingerprint(),
                    public_key.fingerprint()
                );
            }
        }
        self.peers.record(PeerRecord {
            peer_name: peer.to_string(),
            public_key,
            attested: true,
            enclave_id: verified.enclave_id.clone(),
            attested_at: Utc::now(),
        })?;
        session.advance(SessionState::PeerAttested);

        info!(
            "Peer {} attested: enclave={}, security={:?}, key={}, state={:?}",
            peer,
            short_id(&verified.enclave_id),
            verified.security_level,
            public_key.fingerprint(),
            session.state()
        );
        Ok(())
    }

    // --- Key establishment ---

    /// Generate a fresh session key for `peer` and return the sealed,
    /// signed key offer.
    pub fn establish_secure_channel(&self, peer: &str) -> ChannelResult<Vec<u8>> {
        self.check_peer_name(peer)?;
        let record = self.peers.lookup(peer)?;

        let slot = self.sessions.entry(peer)?;
        let _handshake = registry::begin_handshake(&slot, peer)?;
        let mut session = registry::lock(&slot)?;
        if session.handshake_in_flight() || session.state() == SessionState::KeySent {
            return Err(ChannelError::ConcurrentHandshakeInProgress(peer.to_string()));
        }
        if session.state() == SessionState::KeyEstablished && !self.config.allow_renegotiation {
            return Err(ChannelError::RenegotiationRequiresReset(peer.to_string()));
        }

        let session_id = Uuid::new_v4();
        let key = SessionKey::generate();
        let envelope = self
            .seal_handshake(HandshakeKind::KeyOffer, &record, session_id, &key)
            .map_err(ChannelError::ChannelEstablishmentFailed)?;

        session.pending = Some(PendingOffer { session_id, key });
        session.advance(SessionState::KeySent);

        info!(
            "Key offer sent to {}: session={}, state={:?}",
            peer,
            &session_id.to_string()[..8],
            session.state()
        );
        Ok(envelope)
    }

    /// Process a handshake envelope from `peer`.
    ///
    /// A key offer is accepted and answered with a confirmation envelope
    /// (`Some`). A confirmation of our own pending offer completes the
    /// handshake (`None`).
    pub fn acknowledge_secure_channel(
        &self,
        peer: &str,
        envelope_bytes: &[u8],
    ) -> ChannelResult<Option<Vec<u8>>> {
        self.check_peer_name(peer)?;
        self.check_buffer("handshake envelope", envelope_bytes)?;
        let record = self.peers.lookup(peer)?;

        let envelope = HandshakeEnvelope::decode(envelope_bytes)
            .map_err(|e| reject(peer, format!("malformed handshake envelope: {}", e)))?;
        if envelope.version != ENVELOPE_VERSION {
            return Err(reject(
                peer,
                format!("unsupported envelope version {}", envelope.version),
            ));
        }

        // Decrypt, then verify; nothing opened here is used before the
        // signature checks out against the attested key.
        let payload = Zeroizing::new(
            self.identity
                .decrypt(&envelope.sealed)
                .map_err(|_| reject(peer, "sealed key could not be opened"))?,
        );
        let (key, signature) = unpack_signed_key(&payload)
            .ok_or_else(|| reject(peer, "sealed payload has the wrong length"))?;
        let transcript =
            handshake_transcript(envelope.kind, peer, self.name(), &envelope.session_id, &key);
        if !CryptoIdentity::verify_with(&record.public_key, &transcript, signature) {
            return Err(reject(peer, "signature does not match attested key"));
        }
        if envelope.sender != peer || envelope.recipient != self.name() {
            return Err(reject(peer, "envelope addressing does not match"));
        }

        let slot = self.sessions.entry(peer)?;
        let _handshake = registry::begin_handshake(&slot, peer)?;
        let mut session = registry::lock(&slot)?;

        // A session id is good for one establishment only; an old offer
        // must not bring back a key whose traffic may have been captured.
        if self.sessions.is_consumed(peer, &envelope.session_id)? {
            return Err(reject(peer, "session id has already been used"));
        }

        match envelope.kind {
            HandshakeKind::KeyOffer => {
                if session.handshake_in_flight() && self.name() < peer {
                    return Err(reject(
                        peer,
                        "simultaneous key offer; keeping our own offer",
                    ));
                }
                if session.state() == SessionState::KeyEstablished
                    && !session.handshake_in_flight()
                    && !self.config.allow_renegotiation
                {
                    return Err(ChannelError::RenegotiationRequiresReset(peer.to_string()));
                }

                let messenger = SecureMessenger::new(
                    self.name(),
                    peer,
                    envelope.session_id,
                    Role::Responder,
                    &key,
                )
                .map_err(|e| ChannelError::ChannelEstablishmentFailed(e.to_string()))?;
                let confirm = self
                    .seal_handshake(HandshakeKind::KeyConfirm, &record, envelope.session_id, &key)
                    .map_err(ChannelError::ChannelEstablishmentFailed)?;

                if !self.sessions.consume_session_id(peer, envelope.session_id)? {
                    return Err(reject(peer, "session id has already been used"));
                }
                if session.handshake_in_flight() {
                    info!("Simultaneous key offer from {}: yielding to theirs", peer);
                }
                session.establish(messenger);
                info!(
                    "Secure channel with {} established (responder): session={}",
                    peer,
                    &envelope.session_id.to_string()[..8]
                );
                Ok(Some(confirm))
            }
            HandshakeKind::KeyConfirm => {
                let pending = session
                    .pending
                    .as_ref()
                    .ok_or_else(|| reject(peer, "confirmation without a pending key offer"))?;
                if pending.session_id != envelope.session_id || !pending.key.ct_eq(&key) {
                    return Err(reject(peer, "confirmation does not match our key offer"));
                }

                let messenger = SecureMessenger::new(
                    self.name(),
                    peer,
                    pending.session_id,
                    Role::Initiator,
                    &pending.key,
                )
                .map_err(|e| ChannelError::ChannelEstablishmentFailed(e.to_string()))?;
                if !self.sessions.consume_session_id(peer, envelope.session_id)? {
                    return Err(reject(peer, "session id has already been used"));
                }
                session.establish(messenger);
                info!(
                    "Secure channel with {} established (initiator): session={}",
                    peer,
                    &envelope.session_id.to_string()[..8]
                );
                Ok(None)
            }
        }
    }

    fn seal_handshake(
        &self,
        kind: HandshakeKind,
        record: &PeerRecord,
        session_id: Uuid,
        key: &SessionKey,
    ) -> Result<Vec<u8>, String> {
        let transcript =
            handshake_transcript(kind, self.name(), &record.peer_name, &session_id, key);
        let signature = self.identity.sign(&transcript).map_err(|e| e.to_string())?;
        let payload = pack_signed_key(key, &signature);
        let sealed = CryptoIdentity::encrypt_for(&record.public_key.to_bytes(), &payload)
            .map_err(|e| e.to_string())?;

        HandshakeEnvelope {
            version: ENVELOPE_VERSION,
            kind,
            sender: self.name().to_string(),
            recipient: record.peer_name.clone(),
            session_id,
            sealed,
        }
        .encode()
        .map_err(|e| format!("envelope encoding: {}", e))
    }

    // --- Messaging ---

    /// Encrypt `plaintext` for `peer` over the established session
    pub fn generate_encrypted_message(&self, peer: &str, plaintext: &[u8]) -> ChannelResult<Vec<u8>> {
        let entry = self
            .sessions
            .existing(peer)?
            .ok_or_else(|| ChannelError::NoActiveSession(peer.to_string()))?;
        let mut session = registry::lock(&entry)?;
        let messenger = session
            .messenger
            .as_mut()
            .ok_or_else(|| ChannelError::NoActiveSession(peer.to_string()))?;

        if plaintext.len() > self.config.max_message_bytes {
            return Err(ChannelError::MalformedInput(format!(
                "message is {} bytes, limit {}",
                plaintext.len(),
                self.config.max_message_bytes
            )));
        }

        let envelope = messenger.encrypt_message(plaintext)?;
        envelope
            .encode()
            .map_err(|e| ChannelError::MalformedInput(format!("envelope encoding: {}", e)))
    }

    /// Authenticate and decrypt an envelope received from `peer`
    pub fn process_encrypted_message(&self, peer: &str, envelope_bytes: &[u8]) -> ChannelResult<Vec<u8>> {
        self.check_buffer("message envelope", envelope_bytes)?;
        let entry = self
            .sessions
            .existing(peer)?
            .ok_or_else(|| ChannelError::NoActiveSession(peer.to_string()))?;
        let mut session = registry::lock(&entry)?;
        let messenger = session
            .messenger
            .as_mut()
            .ok_or_else(|| ChannelError::NoActiveSession(peer.to_string()))?;

        let result = MessageEnvelope::decode(envelope_bytes)
            .map_err(|_| ChannelError::TamperedMessage)
            .and_then(|envelope| messenger.decrypt_message(&envelope));
        if let Err(e) = &result {
            warn!("Message from {} rejected: {}", peer, e);
        }
        result
    }

    // --- Secret provisioning ---

    /// Inject this enclave's secret at runtime, after at least one peer has
    /// been attested.
    pub fn provision_secret(&self, secret: &[u8]) -> ChannelResult<()> {
        if secret.is_empty() {
            return Err(ChannelError::MalformedInput("secret is empty".into()));
        }
        if secret.len() > self.config.max_message_bytes {
            return Err(ChannelError::MalformedInput(format!(
                "secret is {} bytes, limit {}",
                secret.len(),
                self.config.max_message_bytes
            )));
        }
        if self.peers.is_empty()? {
            return Err(ChannelError::PeerNotAttested(
                "no peer has been attested".into(),
            ));
        }

        let mut slot = self
            .provisioned_secret
            .write()
            .map_err(|_| ChannelError::RegistryPoisoned)?;
        *slot = Some(Zeroizing::new(secret.to_vec()));
        info!("Secret provisioned ({} bytes)", secret.len());
        Ok(())
    }

    /// Send the provisioned secret to `peer` over the established session
    pub fn generate_secret_message(&self, peer: &str) -> ChannelResult<Vec<u8>> {
        let secret = self
            .provisioned_secret
            .read()
            .map_err(|_| ChannelError::RegistryPoisoned)?
            .clone()
            .ok_or(ChannelError::NoProvisionedSecret)?;
        self.generate_encrypted_message(peer, &secret)
    }

    // --- Lifecycle ---

    /// Drop the session key for `peer` and fall back to `PeerAttested`
    /// (or `Uninitiated` if the peer is not attested).
    pub fn reset_session(&self, peer: &str) -> ChannelResult<SessionState> {
        let floor = if self.peers.contains(peer)? {
            SessionState::PeerAttested
        } else {
            SessionState::Uninitiated
        };
        if let Some(slot) = self.sessions.existing(peer)? {
            let mut session = registry::lock(&slot)?;
            session.reset(floor);
            info!("Session with {} reset to {:?}", peer, floor);
        }
        Ok(floor)
    }

    /// Remove `peer`'s pinned key and session; returns whether anything was known
    pub fn forget_peer(&self, peer: &str) -> ChannelResult<bool> {
        let session = match self.sessions.existing(peer)? {
            Some(slot) => {
                registry::lock(&slot)?.reset(SessionState::Uninitiated);
                self.sessions.remove(peer)?.is_some()
            }
            None => false,
        };
        let record = self.peers.remove(peer)?.is_some();
        if session || record {
            info!("Forgot peer {}", peer);
        }
        Ok(session || record)
    }

    /// Tear down every session and drop the provisioned secret
    pub fn shutdown(&self) -> ChannelResult<usize> {
        let closed = self.sessions.teardown_all()?;
        if let Ok(mut slot) = self.provisioned_secret.write() {
            *slot = None;
        }
        info!("Handshake engine {} shut down: {} sessions closed", self.name(), closed);
        Ok(closed)
    }

    pub fn session_state(&self, peer: &str) -> ChannelResult<SessionState> {
        self.sessions.state(peer)
    }

    pub fn session_summary(&self, peer: &str) -> ChannelResult<SessionSnapshot> {
        self.sessions.snapshot(peer)
    }

    // --- Input validation ---

    fn check_peer_name(&self, peer: &str) -> ChannelResult<()> {
        if peer.trim().is_empty() {
            return Err(ChannelError::MalformedInput("peer name is empty".into()));
        }
        if peer.len() > MAX_NAME_LEN {
            return Err(ChannelError::MalformedInput(format!(
                "peer name is longer than {} bytes",
                MAX_NAME_LEN
            )));
        }
        if peer == self.name() {
            return Err(ChannelError::MalformedInput(
                "cannot open a channel to ourselves".into(),
            ));
        }
        Ok(())
    }

    fn check_buffer(&self, what: &str, bytes: &[u8]) -> ChannelResult<()> {
        if bytes.is_empty() {
            return Err(ChannelError::MalformedInput(format!("{} is empty", what)));
        }
        if bytes.len() > self.config.max_envelope_bytes {
            return Err(ChannelError::MalformedInput(format!(
                "{} is {} bytes, limit {}",
                what,
                bytes.len(),
                self.config.max_envelope_bytes
            )));
        }
        Ok(())
    }
}

/// First eight characters of a provider-supplied id, for log lines
fn short_id(id: &str) -> String {
    id.chars().take(8).collect()
}

fn reject(peer: &str, reason: impl Into<String>) -> ChannelError {
    let reason = reason.into();
    warn!("Handshake from {} rejected: {}", peer, reason);
    ChannelError::HandshakeRejected(reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attestation::{
        EnclaveImage, EnclaveMeasurement, IdentityPolicy, SimulatedEnclave, SimulatedPlatform,
    };
    use std::sync::{Arc, Barrier};
    use std::thread;

    const SIGNER: &str = "channel-signing-key";

    type Engine = HandshakeEngine<SimulatedEnclave>;

    fn pinned_policy(code_identity: &str) -> IdentityPolicy {
        let m = EnclaveMeasurement::compute(&EnclaveImage::new(code_identity, SIGNER));
        IdentityPolicy::pinned(&m.mrenclave, &m.mrsigner)
    }

    fn engine_with(platform: &SimulatedPlatform, name: &str, peer: &str, renegotiate: bool) -> Engine {
        let enclave = platform.launch(&EnclaveImage::new(name, SIGNER));
        let config = ChannelConfig::new(name)
            .with_peer_policy(peer, pinned_policy(peer))
            .with_renegotiation(renegotiate);
        HandshakeEngine::new(CryptoIdentity::generate(name), enclave, config).unwrap()
    }

    fn engines() -> (Engine, Engine) {
        let platform = SimulatedPlatform::new();
        (
            engine_with(&platform, "enclave-a", "enclave-b", false),
            engine_with(&platform, "enclave-b", "enclave-a", false),
        )
    }

    fn attest(from: &Engine, to: &Engine) {
        let (pubkey, report) = from.send_report_to(to.name()).unwrap();
        to.verify_report_and_set_pubkey(from.name(), &pubkey, &report)
            .unwrap();
    }

    fn attest_both(a: &Engine, b: &Engine) {
        attest(a, b);
        attest(b, a);
    }

    fn establish(initiator: &Engine, responder: &Engine) {
        let offer = initiator.establish_secure_channel(responder.name()).unwrap();
        let confirm = responder
            .acknowledge_secure_channel(initiator.name(), &offer)
            .unwrap()
            .unwrap();
        assert!(initiator
            .acknowledge_secure_channel(responder.name(), &confirm)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_full_scenario() {
        let (a, b) = engines();

        let (pub_a, report_a) = a.send_report_to("enclave-b").unwrap();
        assert_eq!(a.session_state("enclave-b").unwrap(), SessionState::ReportSent);
        b.verify_report_and_set_pubkey("enclave-a", &pub_a, &report_a)
            .unwrap();
        assert_eq!(b.session_state("enclave-a").unwrap(), SessionState::PeerAttested);

        let (pub_b, report_b) = b.get_report_with_pubkey().unwrap();
        a.verify_report_and_set_pubkey("enclave-b", &pub_b, &report_b)
            .unwrap();

        let e1 = a.establish_secure_channel("enclave-b").unwrap();
        assert_eq!(a.session_state("enclave-b").unwrap(), SessionState::KeySent);

        let e2 = b.acknowledge_secure_channel("enclave-a", &e1).unwrap().unwrap();
        assert_eq!(b.session_state("enclave-a").unwrap(), SessionState::KeyEstablished);

        assert!(a.acknowledge_secure_channel("enclave-b", &e2).unwrap().is_none());
        assert_eq!(a.session_state("enclave-b").unwrap(), SessionState::KeyEstablished);

        let e3 = a.generate_encrypted_message("enclave-b", b"hello").unwrap();
        assert_eq!(b.process_encrypted_message("enclave-a", &e3).unwrap(), b"hello");

        let e4 = b.generate_encrypted_message("enclave-a", b"hi back").unwrap();
        assert_eq!(a.process_encrypted_message("enclave-b", &e4).unwrap(), b"hi back");

        let summary = a.session_summary("enclave-b").unwrap();
        assert_eq!(summary.role, Some(Role::Initiator));
        assert_eq!(summary.messages_sent, 1);
        assert_eq!(summary.messages_received, 1);
        assert_eq!(
            b.session_summary("enclave-a").unwrap().session_id,
            summary.session_id
        );
    }

    #[test]
    fn test_report_accessor_is_pure() {
        let (a, _) = engines();
        let (k1, _) = a.get_report_with_pubkey().unwrap();
        let (k2, _) = a.get_report_with_pubkey().unwrap();
        assert_eq!(k1, k2);
        assert_eq!(k1, a.identity().public_key_bytes());
        assert!(a.session_summary("enclave-b").unwrap().session_id.is_none());
        assert_eq!(a.session_state("enclave-b").unwrap(), SessionState::Uninitiated);
    }

    #[test]
    fn test_attestation_gate() {
        let (a, b) = engines();
        assert_eq!(
            a.establish_secure_channel("enclave-b"),
            Err(ChannelError::PeerNotAttested("enclave-b".into()))
        );

        // b has attested a, but a has not attested b
        attest(&a, &b);
        let offer = b.establish_secure_channel("enclave-a").unwrap();
        assert_eq!(
            a.acknowledge_secure_channel("enclave-b", &offer),
            Err(ChannelError::PeerNotAttested("enclave-b".into()))
        );
        assert!(matches!(
            a.generate_encrypted_message("enclave-b", b"x"),
            Err(ChannelError::NoActiveSession(_))
        ));
    }

    #[test]
    fn test_no_half_trust_on_failed_attestation() {
        let platform = SimulatedPlatform::new();
        let rogue_platform = SimulatedPlatform::new();
        let a = engine_with(&platform, "enclave-a", "enclave-b", false);
        let b = engine_with(&platform, "enclave-b", "enclave-a", false);

        // Wrong code identity
        let impostor = rogue_platform.launch(&EnclaveImage::new("enclave-x", SIGNER));
        let key = CryptoIdentity::generate("enclave-b").public_key_bytes();
        let report = impostor.generate_report(&key).unwrap();
        let before = a.session_summary("enclave-b").unwrap();

        let err = a
            .verify_report_and_set_pubkey("enclave-b", &key, &report)
            .unwrap_err();
        assert!(matches!(
            err,
            ChannelError::AttestationFailed {
                code: RejectionCode::BadSignature,
                ..
            }
        ));
        assert!(a.peers().is_empty().unwrap());
        assert_eq!(a.session_summary("enclave-b").unwrap(), before);

        // Right enclave, but a key other than the one it attested
        let (_, report_b) = b.get_report_with_pubkey().unwrap();
        let other_key = CryptoIdentity::generate("enclave-b").public_key_bytes();
        let err = a
            .verify_report_and_set_pubkey("enclave-b", &other_key, &report_b)
            .unwrap_err();
        assert!(matches!(
            err,
            ChannelError::AttestationFailed {
                code: RejectionCode::KeyMismatch,
                ..
            }
        ));
        assert!(a.peers().is_empty().unwrap());
        assert_eq!(a.session_state("enclave-b").unwrap(), SessionState::Uninitiated);
    }

    #[test]
    fn test_peer_without_policy_is_rejected() {
        let (a, _) = engines();
        let platform = SimulatedPlatform::new();
        let c = engine_with(&platform, "enclave-c", "enclave-a", false);
        let (key, report) = c.get_report_with_pubkey().unwrap();
        assert!(matches!(
            a.verify_report_and_set_pubkey("enclave-c", &key, &report),
            Err(ChannelError::AttestationFailed {
                code: RejectionCode::NoPolicy,
                ..
            })
        ));
    }

    #[test]
    fn test_structural_validation() {
        let (a, b) = engines();
        let (key, report) = b.get_report_with_pubkey().unwrap();

        assert!(matches!(
            a.verify_report_and_set_pubkey("enclave-b", &[], &report),
            Err(ChannelError::MalformedInput(_))
        ));
        assert!(matches!(
            a.verify_report_and_set_pubkey("enclave-b", &key[..10], &report),
            Err(ChannelError::MalformedInput(_))
        ));
        assert!(matches!(
            a.verify_report_and_set_pubkey("enclave-b", &key, &AttestationReport::from_bytes(vec![])),
            Err(ChannelError::MalformedInput(_))
        ));
        assert!(matches!(
            a.verify_report_and_set_pubkey("", &key, &report),
            Err(ChannelError::MalformedInput(_))
        ));
        assert!(matches!(
            a.send_report_to("enclave-a"),
            Err(ChannelError::MalformedInput(_))
        ));
        assert!(matches!(
            a.send_report_to(&"b".repeat(MAX_NAME_LEN + 1)),
            Err(ChannelError::MalformedInput(_))
        ));

        attest_both(&a, &b);
        assert!(matches!(
            a.acknowledge_secure_channel("enclave-b", &[]),
            Err(ChannelError::MalformedInput(_))
        ));
        let huge = vec![b'{'; a.config().max_envelope_bytes + 1];
        assert!(matches!(
            a.acknowledge_secure_channel("enclave-b", &huge),
            Err(ChannelError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_identity_must_match_config() {
        let platform = SimulatedPlatform::new();
        let enclave = platform.launch(&EnclaveImage::new("enclave-a", SIGNER));
        let result = HandshakeEngine::new(
            CryptoIdentity::generate("someone-else"),
            enclave,
            ChannelConfig::new("enclave-a"),
        );
        assert!(matches!(result, Err(ChannelError::InvalidConfig(_))));
    }

    #[test]
    fn test_messaging_before_establishment() {
        let (a, b) = engines();
        assert_eq!(
            a.generate_encrypted_message("enclave-b", b"early"),
            Err(ChannelError::NoActiveSession("enclave-b".into()))
        );

        attest_both(&a, &b);
        assert_eq!(
            a.generate_encrypted_message("enclave-b", b"early"),
            Err(ChannelError::NoActiveSession("enclave-b".into()))
        );

        let offer = a.establish_secure_channel("enclave-b").unwrap();
        assert_eq!(
            a.generate_encrypted_message("enclave-b", b"early"),
            Err(ChannelError::NoActiveSession("enclave-b".into()))
        );
        assert!(matches!(
            b.process_encrypted_message("enclave-a", b"{}"),
            Err(ChannelError::NoActiveSession(_))
        ));

        b.acknowledge_secure_channel("enclave-a", &offer).unwrap();
        assert!(b.generate_encrypted_message("enclave-a", b"now").is_ok());
    }

    #[test]
    fn test_round_trip_sizes() {
        let (a, b) = engines();
        attest_both(&a, &b);
        establish(&a, &b);

        let max = vec![0xa5u8; a.config().max_message_bytes];
        for msg in [&b""[..], &b"x"[..], &max[..]] {
            let env = a.generate_encrypted_message("enclave-b", msg).unwrap();
            assert_eq!(b.process_encrypted_message("enclave-a", &env).unwrap(), msg);
        }

        let too_big = vec![0u8; a.config().max_message_bytes + 1];
        assert!(matches!(
            a.generate_encrypted_message("enclave-b", &too_big),
            Err(ChannelError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_max_message_round_trips_with_raised_limits() {
        let platform = SimulatedPlatform::new();
        let build = |name: &str, peer: &str| {
            let mut config = ChannelConfig::new(name).with_peer_policy(peer, pinned_policy(peer));
            config.max_message_bytes = 600 * 1024;
            config.max_envelope_bytes = 2 * 1024 * 1024;
            let enclave = platform.launch(&EnclaveImage::new(name, SIGNER));
            HandshakeEngine::new(CryptoIdentity::generate(name), enclave, config).unwrap()
        };
        let a = build("enclave-a", "enclave-b");
        let b = build("enclave-b", "enclave-a");
        attest_both(&a, &b);
        establish(&a, &b);

        let max = vec![0x5au8; a.config().max_message_bytes];
        let env = a.generate_encrypted_message("enclave-b", &max).unwrap();
        assert!(env.len() > max.len() * 2);
        assert_eq!(b.process_encrypted_message("enclave-a", &env).unwrap(), max);
    }

    #[test]
    fn test_tamper_detection() {
        let (a, b) = engines();
        attest_both(&a, &b);
        establish(&a, &b);

        let bytes = a.generate_encrypted_message("enclave-b", b"secret").unwrap();
        let envelope = MessageEnvelope::decode(&bytes).unwrap();
        for i in 0..envelope.ciphertext.len() * 8 {
            let mut tampered = envelope.clone();
            tampered.ciphertext[i / 8] ^= 1 << (i % 8);
            assert_eq!(
                b.process_encrypted_message("enclave-a", &tampered.encode().unwrap()),
                Err(ChannelError::TamperedMessage)
            );
        }
        assert_eq!(
            b.process_encrypted_message("enclave-a", b"not json at all"),
            Err(ChannelError::TamperedMessage)
        );

        assert_eq!(b.process_encrypted_message("enclave-a", &bytes).unwrap(), b"secret");
        assert!(matches!(
            b.process_encrypted_message("enclave-a", &bytes),
            Err(ChannelError::ReplayDetected { .. })
        ));
    }

    #[test]
    fn test_tampered_handshake_rejected_without_state_change() {
        let (a, b) = engines();
        attest_both(&a, &b);
        let offer = a.establish_secure_channel("enclave-b").unwrap();
        let envelope = HandshakeEnvelope::decode(&offer).unwrap();

        let mut flipped = envelope.clone();
        flipped.sealed[40] ^= 0x01;
        assert!(matches!(
            b.acknowledge_secure_channel("enclave-a", &flipped.encode().unwrap()),
            Err(ChannelError::HandshakeRejected(_))
        ));

        let mut relabeled = envelope.clone();
        relabeled.kind = HandshakeKind::KeyConfirm;
        assert!(matches!(
            b.acknowledge_secure_channel("enclave-a", &relabeled.encode().unwrap()),
            Err(ChannelError::HandshakeRejected(_))
        ));

        let mut other_session = envelope.clone();
        other_session.session_id = Uuid::new_v4();
        assert!(matches!(
            b.acknowledge_secure_channel("enclave-a", &other_session.encode().unwrap()),
            Err(ChannelError::HandshakeRejected(_))
        ));
        assert_eq!(b.session_state("enclave-a").unwrap(), SessionState::PeerAttested);

        assert!(b.acknowledge_secure_channel("enclave-a", &offer).unwrap().is_some());
    }

    #[test]
    fn test_offer_signed_by_other_key_rejected() {
        let (a, b) = engines();
        attest_both(&a, &b);

        // A forged offer sealed to b but signed by a key b never attested
        let forger = CryptoIdentity::generate("enclave-a");
        let session_id = Uuid::new_v4();
        let key = SessionKey::generate();
        let transcript =
            handshake_transcript(HandshakeKind::KeyOffer, "enclave-a", "enclave-b", &session_id, &key);
        let signature = forger.sign(&transcript).unwrap();
        let sealed = CryptoIdentity::encrypt_for(
            &b.identity().public_key_bytes(),
            &pack_signed_key(&key, &signature),
        )
        .unwrap();
        let forged = HandshakeEnvelope {
            version: ENVELOPE_VERSION,
            kind: HandshakeKind::KeyOffer,
            sender: "enclave-a".into(),
            recipient: "enclave-b".into(),
            session_id,
            sealed,
        };

        assert!(matches!(
            b.acknowledge_secure_channel("enclave-a", &forged.encode().unwrap()),
            Err(ChannelError::HandshakeRejected(_))
        ));
        assert_eq!(b.session_state("enclave-a").unwrap(), SessionState::PeerAttested);
    }

    #[test]
    fn test_confirm_without_offer_rejected() {
        let platform = SimulatedPlatform::new();
        let a = engine_with(&platform, "enclave-a", "enclave-b", false);
        let b = engine_with(&platform, "enclave-b", "enclave-a", false);
        attest_both(&a, &b);

        let offer = a.establish_secure_channel("enclave-b").unwrap();
        let confirm = b.acknowledge_secure_channel("enclave-a", &offer).unwrap().unwrap();
        a.acknowledge_secure_channel("enclave-b", &confirm).unwrap();

        // Replaying the confirmation finds no pending offer
        assert!(matches!(
            a.acknowledge_secure_channel("enclave-b", &confirm),
            Err(ChannelError::HandshakeRejected(_))
        ));
    }

    #[test]
    fn test_replayed_offer_rejected() {
        // After an explicit reset
        let (a, b) = engines();
        attest_both(&a, &b);
        let offer = a.establish_secure_channel("enclave-b").unwrap();
        let confirm = b.acknowledge_secure_channel("enclave-a", &offer).unwrap().unwrap();
        a.acknowledge_secure_channel("enclave-b", &confirm).unwrap();
        let captured = a.generate_encrypted_message("enclave-b", b"captured").unwrap();
        assert_eq!(b.process_encrypted_message("enclave-a", &captured).unwrap(), b"captured");

        b.reset_session("enclave-a").unwrap();
        assert!(matches!(
            b.acknowledge_secure_channel("enclave-a", &offer),
            Err(ChannelError::HandshakeRejected(_))
        ));
        assert_eq!(b.session_state("enclave-a").unwrap(), SessionState::PeerAttested);
        assert!(matches!(
            b.process_encrypted_message("enclave-a", &captured),
            Err(ChannelError::NoActiveSession(_))
        ));

        // Forgetting and re-attesting the peer does not clear used ids
        b.forget_peer("enclave-a").unwrap();
        attest(&a, &b);
        assert!(matches!(
            b.acknowledge_secure_channel("enclave-a", &offer),
            Err(ChannelError::HandshakeRejected(_))
        ));

        // With renegotiation on, an old offer must not replace the live session
        let platform = SimulatedPlatform::new();
        let a = engine_with(&platform, "enclave-a", "enclave-b", true);
        let b = engine_with(&platform, "enclave-b", "enclave-a", true);
        attest_both(&a, &b);
        let first_offer = a.establish_secure_channel("enclave-b").unwrap();
        let confirm = b
            .acknowledge_secure_channel("enclave-a", &first_offer)
            .unwrap()
            .unwrap();
        a.acknowledge_secure_channel("enclave-b", &confirm).unwrap();
        let captured = a.generate_encrypted_message("enclave-b", b"first").unwrap();
        b.process_encrypted_message("enclave-a", &captured).unwrap();

        let second_offer = a.establish_secure_channel("enclave-b").unwrap();
        let confirm = b
            .acknowledge_secure_channel("enclave-a", &second_offer)
            .unwrap()
            .unwrap();
        a.acknowledge_secure_channel("enclave-b", &confirm).unwrap();
        let live = b.session_summary("enclave-a").unwrap().session_id;

        for replayed in [&first_offer, &second_offer] {
            assert!(matches!(
                b.acknowledge_secure_channel("enclave-a", replayed),
                Err(ChannelError::HandshakeRejected(_))
            ));
        }
        assert_eq!(b.session_summary("enclave-a").unwrap().session_id, live);
        assert!(b.process_encrypted_message("enclave-a", &captured).is_err());
        let env = a.generate_encrypted_message("enclave-b", b"second").unwrap();
        assert_eq!(b.process_encrypted_message("enclave-a", &env).unwrap(), b"second");
    }

    #[test]
    fn test_renegotiation_requires_reset_by_default() {
        let (a, b) = engines();
        attest_both(&a, &b);
        establish(&a, &b);

        assert_eq!(
            a.establish_secure_channel("enclave-b"),
            Err(ChannelError::RenegotiationRequiresReset("enclave-b".into()))
        );

        assert_eq!(a.reset_session("enclave-b").unwrap(), SessionState::PeerAttested);
        assert!(matches!(
            a.generate_encrypted_message("enclave-b", b"x"),
            Err(ChannelError::NoActiveSession(_))
        ));
        let offer = a.establish_secure_channel("enclave-b").unwrap();

        // b still holds the old session
        assert_eq!(
            b.acknowledge_secure_channel("enclave-a", &offer),
            Err(ChannelError::RenegotiationRequiresReset("enclave-a".into()))
        );
        b.reset_session("enclave-a").unwrap();
        let confirm = b.acknowledge_secure_channel("enclave-a", &offer).unwrap().unwrap();
        a.acknowledge_secure_channel("enclave-b", &confirm).unwrap();

        let env = b.generate_encrypted_message("enclave-a", b"fresh").unwrap();
        assert_eq!(a.process_encrypted_message("enclave-b", &env).unwrap(), b"fresh");
    }

    #[test]
    fn test_renegotiation_when_enabled() {
        let platform = SimulatedPlatform::new();
        let a = engine_with(&platform, "enclave-a", "enclave-b", true);
        let b = engine_with(&platform, "enclave-b", "enclave-a", true);
        attest_both(&a, &b);
        establish(&a, &b);
        let first = a.session_summary("enclave-b").unwrap().session_id;

        let offer = a.establish_secure_channel("enclave-b").unwrap();
        assert_eq!(a.session_state("enclave-b").unwrap(), SessionState::KeyEstablished);
        // Old session keeps working until the new one is confirmed
        let env = a.generate_encrypted_message("enclave-b", b"old").unwrap();
        assert_eq!(b.process_encrypted_message("enclave-a", &env).unwrap(), b"old");

        let confirm = b.acknowledge_secure_channel("enclave-a", &offer).unwrap().unwrap();
        a.acknowledge_secure_channel("enclave-b", &confirm).unwrap();
        let second = a.session_summary("enclave-b").unwrap().session_id;
        assert_ne!(first, second);

        let env = a.generate_encrypted_message("enclave-b", b"new").unwrap();
        assert_eq!(b.process_encrypted_message("enclave-a", &env).unwrap(), b"new");
    }

    #[test]
    fn test_simultaneous_initiation_converges() {
        let (a, b) = engines();
        attest_both(&a, &b);

        let offer_a = a.establish_secure_channel("enclave-b").unwrap();
        let offer_b = b.establish_secure_channel("enclave-a").unwrap();

        // "enclave-a" sorts lower and keeps its own offer
        assert!(matches!(
            a.acknowledge_secure_channel("enclave-b", &offer_b),
            Err(ChannelError::HandshakeRejected(_))
        ));
        let confirm = b.acknowledge_secure_channel("enclave-a", &offer_a).unwrap().unwrap();
        a.acknowledge_secure_channel("enclave-b", &confirm).unwrap();

        assert_eq!(
            a.session_summary("enclave-b").unwrap().session_id,
            b.session_summary("enclave-a").unwrap().session_id
        );
        let env = a.generate_encrypted_message("enclave-b", b"agreed").unwrap();
        assert_eq!(b.process_encrypted_message("enclave-a", &env).unwrap(), b"agreed");
    }

    #[test]
    fn test_concurrent_establish_single_winner() {
        for _ in 0..20 {
            let (a, b) = engines();
            attest_both(&a, &b);
            let a = Arc::new(a);
            let barrier = Arc::new(Barrier::new(2));

            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let a = Arc::clone(&a);
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        a.establish_secure_channel("enclave-b")
                    })
                })
                .collect();
            let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

            let offers: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
            assert_eq!(offers.len(), 1);
            assert!(results.iter().any(|r| matches!(
                r,
                Err(ChannelError::ConcurrentHandshakeInProgress(_))
            )));

            let confirm = b
                .acknowledge_secure_channel("enclave-a", offers[0])
                .unwrap()
                .unwrap();
            a.acknowledge_secure_channel("enclave-b", &confirm).unwrap();
        }
    }

    #[test]
    fn test_different_peers_are_independent() {
        let platform = SimulatedPlatform::new();
        let hub_enclave = platform.launch(&EnclaveImage::new("hub", SIGNER));
        let config = ChannelConfig::new("hub")
            .with_peer_policy("spoke-1", pinned_policy("spoke-1"))
            .with_peer_policy("spoke-2", pinned_policy("spoke-2"));
        let hub = Arc::new(
            HandshakeEngine::new(CryptoIdentity::generate("hub"), hub_enclave, config).unwrap(),
        );
        let spokes: Vec<_> = ["spoke-1", "spoke-2"]
            .iter()
            .map(|name| Arc::new(engine_with(&platform, name, "hub", false)))
            .collect();
        for spoke in &spokes {
            attest(spoke, &hub);
            attest(&hub, spoke);
        }

        let barrier = Arc::new(Barrier::new(spokes.len()));
        let handles: Vec<_> = spokes
            .iter()
            .map(|spoke| {
                let hub = Arc::clone(&hub);
                let spoke = Arc::clone(spoke);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let offer = hub.establish_secure_channel(spoke.name()).unwrap();
                    let confirm = spoke
                        .acknowledge_secure_channel("hub", &offer)
                        .unwrap()
                        .unwrap();
                    hub.acknowledge_secure_channel(spoke.name(), &confirm).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        for spoke in &spokes {
            assert_eq!(
                hub.session_state(spoke.name()).unwrap(),
                SessionState::KeyEstablished
            );
        }
        // A message for spoke-1 is not readable on spoke-2's session
        let env = hub.generate_encrypted_message("spoke-1", b"for one").unwrap();
        assert!(spokes[1].process_encrypted_message("hub", &env).is_err());
        assert_eq!(spokes[0].process_encrypted_message("hub", &env).unwrap(), b"for one");
    }

    #[test]
    fn test_secret_provisioning() {
        let (a, b) = engines();
        assert!(matches!(
            a.provision_secret(b"api-token"),
            Err(ChannelError::PeerNotAttested(_))
        ));
        assert_eq!(
            a.generate_secret_message("enclave-b"),
            Err(ChannelError::NoProvisionedSecret)
        );

        attest_both(&a, &b);
        assert!(matches!(
            a.provision_secret(b""),
            Err(ChannelError::MalformedInput(_))
        ));
        a.provision_secret(b"api-token").unwrap();
        assert!(matches!(
            a.generate_secret_message("enclave-b"),
            Err(ChannelError::NoActiveSession(_))
        ));

        establish(&a, &b);
        let env = a.generate_secret_message("enclave-b").unwrap();
        assert_eq!(b.process_encrypted_message("enclave-a", &env).unwrap(), b"api-token");

        a.shutdown().unwrap();
        assert_eq!(
            a.generate_secret_message("enclave-b"),
            Err(ChannelError::NoProvisionedSecret)
        );
    }

    #[test]
    fn test_forget_peer_and_shutdown() {
        let (a, b) = engines();
        attest_both(&a, &b);
        establish(&a, &b);

        assert!(a.forget_peer("enclave-b").unwrap());
        assert!(!a.forget_peer("enclave-b").unwrap());
        assert_eq!(a.session_state("enclave-b").unwrap(), SessionState::Uninitiated);
        assert_eq!(
            a.establish_secure_channel("enclave-b"),
            Err(ChannelError::PeerNotAttested("enclave-b".into()))
        );
        assert_eq!(a.reset_session("enclave-b").unwrap(), SessionState::Uninitiated);

        assert_eq!(b.shutdown().unwrap(), 1);
        assert!(matches!(
            b.generate_encrypted_message("enclave-a", b"x"),
            Err(ChannelError::NoActiveSession(_))
        ));
    }

    /// Reports a provider id made of multibyte characters
    struct WideIdEnclave(SimulatedEnclave);

    impl AttestationProvider for WideIdEnclave {
        fn generate_report(
            &self,
            bound_public_key: &[u8],
        ) -> Result<AttestationReport, crate::attestation::ProviderError> {
            self.0.generate_report(bound_public_key)
        }

        fn verify_report(
            &self,
            report: &AttestationReport,
            policy: &IdentityPolicy,
        ) -> Result<crate::attestation::VerifiedReport, crate::attestation::AttestationRejection>
        {
            let mut verified = self.0.verify_report(report, policy)?;
            verified.enclave_id = "飞地标识符".to_string();
            Ok(verified)
        }
    }

    #[test]
    fn test_multibyte_enclave_id_is_logged_safely() {
        assert_eq!(short_id("飞地标识符-0123456789"), "飞地标识符-01");
        assert_eq!(short_id("abc"), "abc");

        let platform = SimulatedPlatform::new();
        let b = engine_with(&platform, "enclave-b", "enclave-a", false);
        let enclave = WideIdEnclave(platform.launch(&EnclaveImage::new("enclave-a", SIGNER)));
        let config = ChannelConfig::new("enclave-a")
            .with_peer_policy("enclave-b", pinned_policy("enclave-b"));
        let a = HandshakeEngine::new(CryptoIdentity::generate("enclave-a"), enclave, config)
            .unwrap();

        let (key, report) = b.get_report_with_pubkey().unwrap();
        a.verify_report_and_set_pubkey("enclave-b", &key, &report)
            .unwrap();
        assert_eq!(a.peers().lookup("enclave-b").unwrap().enclave_id, "飞地标识符");
    }

    #[test]
    fn test_messaging_does_not_block_handshake_calls() {
        let (a, b) = engines();
        attest_both(&a, &b);
        establish(&a, &b);
        let a = Arc::new(a);
        let b = Arc::new(b);

        let sender = {
            let a = Arc::clone(&a);
            thread::spawn(move || {
                (0..200)
                    .map(|_| a.generate_encrypted_message("enclave-b", &[7u8; 4096]).unwrap())
                    .collect::<Vec<_>>()
            })
        };
        // Re-attestation and reset wait for the entry lock instead of
        // reporting a concurrent handshake
        for _ in 0..50 {
            attest(&b, &a);
        }
        let envelopes = sender.join().unwrap();
        for env in &envelopes {
            assert_eq!(b.process_encrypted_message("enclave-a", env).unwrap(), [7u8; 4096]);
        }

        let sender = {
            let a = Arc::clone(&a);
            thread::spawn(move || {
                (0..200)
                    .filter_map(|_| a.generate_encrypted_message("enclave-b", b"ping").err())
                    .collect::<Vec<_>>()
            })
        };
        for _ in 0..50 {
            assert_eq!(a.reset_session("enclave-b").unwrap(), SessionState::PeerAttested);
        }
        for err in sender.join().unwrap() {
            assert_eq!(err, ChannelError::NoActiveSession("enclave-b".into()));
        }
    }

    #[test]
    fn test_reattestation_keeps_session() {
        let (a, b) = engines();
        attest_both(&a, &b);
        establish(&a, &b);

        attest(&b, &a);
        assert_eq!(a.session_state("enclave-b").unwrap(), SessionState::KeyEstablished);
        let env = a.generate_encrypted_message("enclave-b", b"still here").unwrap();
        assert_eq!(b.process_encrypted_message("enclave-a", &env).unwrap(), b"still here");
    }
}
