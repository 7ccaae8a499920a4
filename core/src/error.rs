use thiserror::Error;

/// Classification of everything that can go wrong while handling a
/// consensus message. Errors never escape the event loop; they decide
/// whether a message is processed, backlogged or dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsensusError {
    /// Malformed or semantically impossible in the current state.
    #[error("invalid message")]
    InvalidMessage,

    /// Ahead of the current view; admissible for the backlog.
    #[error("future message")]
    FutureMessage,

    /// Behind the current view; silently dropped.
    #[error("old message")]
    OldMessage,

    /// The signature did not recover to a current validator.
    #[error("message signer is not a validator")]
    InvalidSigner,

    /// PRE-PREPARE whose source is not the round's proposer.
    #[error("message does not come from the round's proposer")]
    NotFromProposer,

    /// The justification attached to a proposal failed verification.
    #[error("proposal justification is invalid")]
    InvalidPreparedBlock,

    /// The proposal references a future timestamp; retried later.
    #[error("proposal is a future block")]
    FutureBlock,

    /// The downstream committer rejected the block.
    #[error("failed to commit proposal")]
    CommitFailed,
}
