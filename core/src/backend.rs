use std::time::Duration;

use alloy_primitives::B256;
use bytes::Bytes;
use obsidian_qbft_types::signing::secp256k1::SigningError;
use obsidian_qbft_types::{Proposal, Signature, ValidatorSet};
use thiserror::Error;

/// A failure reported by a collaborator outside the consensus core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct BackendError(pub String);

/// Outcome of proposal verification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    /// The proposal's timestamp is ahead of the verifier's clock; retry
    /// after the reported delay.
    #[error("future block, retry in {0:?}")]
    FutureBlock(Duration),

    /// The proposal is invalid and must be dropped.
    #[error("invalid block")]
    Invalid,
}

/// The collaborators the consensus core drives: a signer bound to the
/// local validator key, the gossip broadcaster, the block verifier and
/// committer, and the validator-set oracle.
///
/// All calls are treated as blocking by the event loop; implementations
/// that need to go async must complete before returning. `broadcast`
/// must deliver the message to every validator in the set *including
/// the local node*, whose copy re-enters the core through its event
/// channel like any other message.
pub trait Backend: Send + 'static {
    /// Signs `keccak256(payload)` with the local validator key.
    fn sign(&self, payload: &[u8]) -> Result<Signature, SigningError>;

    /// Signs a 32-byte digest directly; the commit-seal path, whose
    /// preimage is already a header hash.
    fn sign_without_hashing(&self, prehash: &B256) -> Result<Signature, SigningError>;

    /// Gossips an encoded consensus message to the validator set.
    fn broadcast(
        &self,
        validators: &ValidatorSet,
        code: u64,
        payload: Bytes,
    ) -> Result<(), BackendError>;

    /// Verifies a proposal outside consensus fields.
    fn verify(&self, proposal: &Proposal) -> Result<(), VerifyError>;

    /// Writes a finalized proposal with its committed seals and the
    /// round it committed in. A successful commit eventually surfaces
    /// as [`crate::Event::FinalCommitted`] once the chain head moves.
    fn commit(
        &self,
        proposal: &Proposal,
        seals: &[Signature],
        round: u64,
    ) -> Result<(), BackendError>;

    /// The validator set for a height.
    fn validators(&self, sequence: u64) -> ValidatorSet;
}
