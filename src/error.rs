use crate::peer::PeerId;

/// Failures surfaced while running a journal transfer.
#[derive(thiserror::Error, Debug)]
pub enum TransferError {
    #[error("no peers available for journal transfer")]
    NoPeersAvailable,
    #[error("peer {peer} reported the journal transfer failed")]
    RemoteTransferFailed { peer: PeerId },
    #[error("local invariant violation during commit: {0}")]
    LocalCommitViolation(String),
    #[error("unexpected error during commit: {0}")]
    UnexpectedCommitError(String),
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("unknown embedded body type '{0}'")]
    UnknownBodyType(String),
    #[error("expected {expected} body, got {found}")]
    UnexpectedBody { expected: &'static str, found: &'static str },
    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),
    #[error("a transfer session already owns the {0:?} handler")]
    SessionActive(crate::messages::MessageKind),
    #[error("message channel closed")]
    ChannelClosed,
}

/// Outcome of a single rejected submission to the journal.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CommitError {
    #[error("local invariant violation: {0}")]
    Violation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl From<CommitError> for TransferError {
    fn from(e: CommitError) -> Self {
        match e {
            CommitError::Violation(msg) => TransferError::LocalCommitViolation(msg),
            CommitError::Unexpected(msg) => TransferError::UnexpectedCommitError(msg),
        }
    }
}
