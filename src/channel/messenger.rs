//! Encrypted message relay over an established session
//!
//! ChaCha20-Poly1305 with one key per direction. The sequence number is the
//! nonce and is authenticated as associated data, so a message can neither
//! be reflected back to its sender nor replayed.

use super::envelope::{message_aad, MessageEnvelope, ENVELOPE_VERSION};
use super::registry::Role;
use crate::crypto::{CryptoError, MessageKey, SessionKey};
use crate::error::{ChannelError, ChannelResult};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use uuid::Uuid;

fn sequence_nonce(sequence: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[4..].copy_from_slice(&sequence.to_be_bytes());
    nonce
}

/// Symmetric state of one established session
#[derive(Debug)]
pub struct SecureMessenger {
    local_name: String,
    peer_name: String,
    session_id: Uuid,
    role: Role,
    send_key: MessageKey,
    recv_key: MessageKey,
    /// Next sequence number to send
    send_sequence: u64,
    /// Lowest sequence number still acceptable
    recv_sequence: u64,
}

impl SecureMessenger {
    pub(crate) fn new(
        local_name: &str,
        peer_name: &str,
        session_id: Uuid,
        role: Role,
        key: &SessionKey,
    ) -> Result<Self, CryptoError> {
        let keys = key.derive_directional(session_id.as_bytes())?;
        let (send_key, recv_key) = match role {
            Role::Initiator => (keys.initiator_to_responder, keys.responder_to_initiator),
            Role::Responder => (keys.responder_to_initiator, keys.initiator_to_responder),
        };
        Ok(Self {
            local_name: local_name.to_string(),
            peer_name: peer_name.to_string(),
            session_id,
            role,
            send_key,
            recv_key,
            send_sequence: 0,
            recv_sequence: 0,
        })
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn messages_sent(&self) -> u64 {
        self.send_sequence
    }

    pub fn messages_received(&self) -> u64 {
        self.recv_sequence
    }

    /// Encrypt and authenticate `plaintext` for the peer
    pub fn encrypt_message(&mut self, plaintext: &[u8]) -> ChannelResult<MessageEnvelope> {
        let sequence = self.send_sequence;
        let next = sequence
            .checked_add(1)
            .ok_or_else(|| ChannelError::SequenceExhausted(self.peer_name.clone()))?;

        let cipher = ChaCha20Poly1305::new(Key::from_slice(self.send_key.as_bytes()));
        let aad = message_aad(&self.local_name, &self.session_id, sequence);
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&sequence_nonce(sequence)),
                Payload {
                    msg: plaintext,
                    aad: &aad,
                },
            )
            .map_err(|_| ChannelError::ChannelEstablishmentFailed("aead encryption failed".into()))?;

        self.send_sequence = next;
        Ok(MessageEnvelope {
            version: ENVELOPE_VERSION,
            sender: self.local_name.clone(),
            session_id: self.session_id,
            sequence,
            ciphertext,
        })
    }

    /// Authenticate and decrypt an envelope from the peer.
    ///
    /// Associated data is rebuilt from this session's own view of peer name
    /// and session id; header fields that disagree with it are reported the
    /// same way as a failed tag.
    pub fn decrypt_message(&mut self, envelope: &MessageEnvelope) -> ChannelResult<Vec<u8>> {
        if envelope.version != ENVELOPE_VERSION
            || envelope.session_id != self.session_id
            || envelope.sender != self.peer_name
        {
            return Err(ChannelError::TamperedMessage);
        }

        let cipher = ChaCha20Poly1305::new(Key::from_slice(self.recv_key.as_bytes()));
        let aad = message_aad(&self.peer_name, &self.session_id, envelope.sequence);
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&sequence_nonce(envelope.sequence)),
                Payload {
                    msg: &envelope.ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|_| ChannelError::TamperedMessage)?;

        if envelope.sequence < self.recv_sequence {
            return Err(ChannelError::ReplayDetected {
                sequence: envelope.sequence,
                expected: self.recv_sequence,
            });
        }
        self.recv_sequence = envelope.sequence.saturating_add(1);
        Ok(plaintext)
    }
}
