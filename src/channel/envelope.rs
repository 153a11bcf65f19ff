//! Wire envelopes
//!
//! Envelopes travel as JSON with hex-encoded binary fields. The handshake
//! envelope carries a sealed box holding `session key || signature`; the
//! signature covers a transcript binding the key to kind, sender, recipient
//! and session id. The message envelope carries an AEAD ciphertext whose
//! associated data binds sender, session id and sequence number.

use crate::crypto::sealed_box::TAG_LEN;
use crate::crypto::{SessionKey, SESSION_KEY_LEN, SIGNATURE_LEN};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

pub const ENVELOPE_VERSION: u8 = 1;

const HANDSHAKE_DOMAIN: &[u8] = b"enclave-channel/handshake/v1";
const MESSAGE_DOMAIN: &[u8] = b"enclave-channel/message/v1";

/// Length of the sealed handshake payload: key || signature
pub const SIGNED_KEY_LEN: usize = SESSION_KEY_LEN + SIGNATURE_LEN;

/// Longest participant name accepted in an envelope, in bytes
pub const MAX_NAME_LEN: usize = 256;

/// Fixed JSON framing of a message envelope: field names, version,
/// session id and a 20-digit sequence number
const MESSAGE_ENVELOPE_FRAMING: usize = 160;

/// Upper bound on the encoded size of a message envelope carrying
/// `plaintext_len` bytes.
///
/// The ciphertext (plaintext plus tag) doubles under hex, and a sender
/// name can grow sixfold when every byte is escaped as `\u00XX`.
pub fn max_message_envelope_len(plaintext_len: usize) -> usize {
    (plaintext_len + TAG_LEN)
        .saturating_mul(2)
        .saturating_add(MESSAGE_ENVELOPE_FRAMING)
        .saturating_add(6 * MAX_NAME_LEN)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandshakeKind {
    /// Initiator delivers a fresh session key
    KeyOffer,
    /// Responder echoes the key back under its own signature
    KeyConfirm,
}

impl HandshakeKind {
    fn tag(self) -> u8 {
        match self {
            HandshakeKind::KeyOffer => 1,
            HandshakeKind::KeyConfirm => 2,
        }
    }
}

/// Key establishment envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeEnvelope {
    pub version: u8,
    pub kind: HandshakeKind,
    /// Sender identity hint
    pub sender: String,
    pub recipient: String,
    pub session_id: Uuid,
    #[serde(with = "hex::serde")]
    pub sealed: Vec<u8>,
}

impl HandshakeEnvelope {
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Application message envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub version: u8,
    /// Sender identity hint
    pub sender: String,
    pub session_id: Uuid,
    pub sequence: u64,
    /// ChaCha20-Poly1305 ciphertext with trailing tag
    #[serde(with = "hex::serde")]
    pub ciphertext: Vec<u8>,
}

impl MessageEnvelope {
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

fn push_field(out: &mut Vec<u8>, field: &[u8]) {
    out.extend_from_slice(&(field.len() as u32).to_be_bytes());
    out.extend_from_slice(field);
}

/// Bytes signed by the sender of a handshake envelope
pub(crate) fn handshake_transcript(
    kind: HandshakeKind,
    sender: &str,
    recipient: &str,
    session_id: &Uuid,
    key: &SessionKey,
) -> Zeroizing<Vec<u8>> {
    let mut out = Zeroizing::new(Vec::with_capacity(
        HANDSHAKE_DOMAIN.len() + 1 + 8 + sender.len() + recipient.len() + 16 + SESSION_KEY_LEN,
    ));
    out.extend_from_slice(HANDSHAKE_DOMAIN);
    out.push(kind.tag());
    push_field(&mut out, sender.as_bytes());
    push_field(&mut out, recipient.as_bytes());
    out.extend_from_slice(session_id.as_bytes());
    out.extend_from_slice(key.as_bytes());
    out
}

pub(crate) fn pack_signed_key(key: &SessionKey, signature: &[u8]) -> Zeroizing<Vec<u8>> {
    let mut out = Zeroizing::new(Vec::with_capacity(SIGNED_KEY_LEN));
    out.extend_from_slice(key.as_bytes());
    out.extend_from_slice(signature);
    out
}

/// Split an opened handshake payload into key and signature
pub(crate) fn unpack_signed_key(payload: &[u8]) -> Option<(SessionKey, &[u8])> {
    if payload.len() != SIGNED_KEY_LEN {
        return None;
    }
    let key = SessionKey::from_slice(&payload[..SESSION_KEY_LEN]).ok()?;
    Some((key, &payload[SESSION_KEY_LEN..]))
}

/// Associated data authenticated with every message
pub(crate) fn message_aad(sender: &str, session_id: &Uuid, sequence: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(MESSAGE_DOMAIN.len() + 4 + sender.len() + 16 + 8);
    out.extend_from_slice(MESSAGE_DOMAIN);
    push_field(&mut out, sender.as_bytes());
    out.extend_from_slice(session_id.as_bytes());
    out.extend_from_slice(&sequence.to_be_bytes());
    out
}
