//! Failure kinds surfaced by the channel boundary operations

use crate::attestation::RejectionCode;

/// Result alias used by every boundary operation
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Broad classification of a [`ChannelError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Peer identity or report is not acceptable; trust is denied
    Attestation,
    /// Malformed ciphertext, bad signature, failed authentication
    Cryptographic,
    /// Operation invoked out of order for the current session state
    State,
    /// The attestation provider or a crypto primitive failed internally
    Provider,
    /// Input buffer or configuration violates structural limits
    Structural,
}

/// Errors returned by the handshake engine and secure messenger
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("report generation failed: {0}")]
    ReportGenerationFailed(String),

    #[error("attestation failed ({code:?}): {detail}")]
    AttestationFailed { code: RejectionCode, detail: String },

    #[error("peer '{0}' has not been attested")]
    PeerNotAttested(String),

    #[error("secure channel establishment failed: {0}")]
    ChannelEstablishmentFailed(String),

    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    #[error("no active session with '{0}'")]
    NoActiveSession(String),

    /// Carries no detail about which check failed.
    #[error("message failed authentication")]
    TamperedMessage,

    #[error("replayed message: sequence {sequence} is below next expected {expected}")]
    ReplayDetected { sequence: u64, expected: u64 },

    #[error("a handshake with '{0}' is already in progress")]
    ConcurrentHandshakeInProgress(String),

    #[error("session with '{0}' is already established; reset it before re-keying")]
    RenegotiationRequiresReset(String),

    #[error("message sequence space exhausted for session with '{0}'")]
    SequenceExhausted(String),

    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("no secret has been provisioned")]
    NoProvisionedSecret,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("session registry lock poisoned")]
    RegistryPoisoned,
}

impl ChannelError {
    /// Classify this error so callers can decide whether to re-attest,
    /// reset the session, or abandon the peer.
    pub fn kind(&self) -> FailureKind {
        match self {
            ChannelError::AttestationFailed { .. } | ChannelError::PeerNotAttested(_) => {
                FailureKind::Attestation
            }
            ChannelError::HandshakeRejected(_)
            | ChannelError::TamperedMessage
            | ChannelError::ReplayDetected { .. } => FailureKind::Cryptographic,
            ChannelError::NoActiveSession(_)
            | ChannelError::ConcurrentHandshakeInProgress(_)
            | ChannelError::RenegotiationRequiresReset(_)
            | ChannelError::SequenceExhausted(_)
            | ChannelError::NoProvisionedSecret => FailureKind::State,
            ChannelError::ReportGenerationFailed(_)
            | ChannelError::ChannelEstablishmentFailed(_)
            | ChannelError::RegistryPoisoned => FailureKind::Provider,
            ChannelError::MalformedInput(_) | ChannelError::InvalidConfig(_) => {
                FailureKind::Structural
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kinds() {
        assert_eq!(
            ChannelError::PeerNotAttested("b".into()).kind(),
            FailureKind::Attestation
        );
        assert_eq!(ChannelError::TamperedMessage.kind(), FailureKind::Cryptographic);
        assert_eq!(
            ChannelError::NoActiveSession("b".into()).kind(),
            FailureKind::State
        );
        assert_eq!(
            ChannelError::MalformedInput("empty".into()).kind(),
            FailureKind::Structural
        );
    }

    #[test]
    fn test_tampered_message_is_undifferentiated() {
        assert_eq!(
            ChannelError::TamperedMessage.to_string(),
            "message failed authentication"
        );
    }
}
