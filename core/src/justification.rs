//! The justification predicate for new-round proposals.
//!
//! A PRE-PREPARE at round > 0 must prove that entering the new round
//! with this proposal is safe: either a quorum of validators reported
//! holding no lock, or the proposal is the block a quorum locked onto
//! at the highest prepared round. Every rule here is safety-critical;
//! an off-by-one admits either a liveness failure or a chain split.

use std::collections::HashSet;

use obsidian_qbft_types::message::{
    ConsensusPayload, Prepare, RoundChange, SignedRoundChangePayload,
};
use obsidian_qbft_types::{Address, Proposal, ValidatorSet};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JustificationError {
    #[error("number of round-change messages is less than the required quorum")]
    InsufficientRoundChanges,

    #[error("prepare messages do not share one round or do not match the proposal")]
    PrepareMismatch,

    #[error("prepare message has an empty source (signature not verified)")]
    PrepareWithoutSource,

    #[error("prepare message signer is not in the validator set")]
    PrepareFromNonValidator,

    #[error("duplicate prepare signer in justification")]
    DuplicatePrepareSigner,

    #[error("number of distinct prepare signers is less than the required quorum")]
    InsufficientPrepareSigners,

    #[error("no quorum of round-change messages with a nil prepared round")]
    NoNilPreparedQuorum,

    #[error("no quorum of round-change messages covering the prepared round and block")]
    NoPreparedQuorum,

    #[error("round-change message has no prepared round")]
    RoundChangeWithoutPreparedRound,

    #[error("more prepare messages than validators")]
    TooManyPrepares,
}

/// Whether `proposal` is justified by `round_changes` and `prepares`.
///
/// Either a quorum of ROUND-CHANGEs reported no prepared certificate,
/// or the prepares form a quorum certificate for one round and digest
/// and a quorum of ROUND-CHANGEs is consistent with that round, at
/// least one of them naming exactly that round and digest. When a
/// quorum of ROUND-CHANGEs flags the previous proposal as bad, digest
/// equality is relaxed.
pub fn is_justified(
    proposal: &Proposal,
    round_changes: &[SignedRoundChangePayload],
    prepares: &[Prepare],
    quorum: usize,
    validators: &ValidatorSet,
) -> Result<(), JustificationError> {
    if round_changes.len() < quorum {
        return Err(JustificationError::InsufficientRoundChanges);
    }

    let bad_proposal_count = round_changes.iter().filter(|rc| rc.has_bad_proposal).count();
    let bad_proposal_mode = bad_proposal_count >= quorum;

    let mut prepared_round = None;
    if !prepares.is_empty() {
        if prepares.len() > validators.size() {
            return Err(JustificationError::TooManyPrepares);
        }

        let mut seen: HashSet<Address> = HashSet::with_capacity(prepares.len());
        let first_round = prepares[0].view().round;

        for prepare in prepares {
            if prepare.view().round != first_round
                || (prepare.digest != proposal.hash() && !bad_proposal_mode)
            {
                return Err(JustificationError::PrepareMismatch);
            }

            let source = prepare.source();
            if source.is_zero() {
                return Err(JustificationError::PrepareWithoutSource);
            }
            if !validators.contains(&source) {
                return Err(JustificationError::PrepareFromNonValidator);
            }

            seen.insert(source);
        }

        if seen.len() < quorum {
            return Err(JustificationError::InsufficientPrepareSigners);
        }

        prepared_round = Some(first_round);
    }

    match prepared_round {
        None => has_quorum_for_nil_prepared(round_changes, quorum),
        Some(round) => has_quorum_for_prepared_round_and_block(
            round_changes,
            round,
            proposal,
            quorum,
            bad_proposal_mode,
        ),
    }
}

/// A quorum of ROUND-CHANGEs with no prepared round (nil or zero) and
/// an empty prepared digest.
fn has_quorum_for_nil_prepared(
    round_changes: &[SignedRoundChangePayload],
    quorum: usize,
) -> Result<(), JustificationError> {
    let nil_count = round_changes
        .iter()
        .filter(|rc| {
            rc.prepared_round.unwrap_or(0) == 0 && rc.prepared_digest.is_zero()
        })
        .count();

    if nil_count >= quorum {
        Ok(())
    } else {
        Err(JustificationError::NoNilPreparedQuorum)
    }
}

/// A quorum of ROUND-CHANGEs whose prepared round is nil or at most
/// `prepared_round`, at least one of which names exactly
/// `prepared_round` with the proposal's digest (any digest in
/// bad-proposal mode).
fn has_quorum_for_prepared_round_and_block(
    round_changes: &[SignedRoundChangePayload],
    prepared_round: u64,
    proposal: &Proposal,
    quorum: usize,
    bad_proposal_mode: bool,
) -> Result<(), JustificationError> {
    let mut lower_or_equal = 0;
    let mut has_matching = false;

    for rc in round_changes {
        match rc.prepared_round {
            Some(round) if round > prepared_round => continue,
            round => {
                lower_or_equal += 1;
                if round == Some(prepared_round)
                    && (rc.prepared_digest == proposal.hash() || bad_proposal_mode)
                {
                    has_matching = true;
                }
            }
        }
    }

    if lower_or_equal >= quorum && has_matching {
        Ok(())
    } else {
        Err(JustificationError::NoPreparedQuorum)
    }
}

/// Validates that the PREPAREs carried by a ROUND-CHANGE really form a
/// certificate for its advertised prepared round and digest: matching
/// round and digest on every entry, recovered in-set distinct signers,
/// quorum weight, and no more entries than validators (a decode-time
/// DoS guard against padded certificates).
pub fn has_matching_round_change_and_prepares(
    round_change: &RoundChange,
    prepares: &[Prepare],
    quorum: usize,
    bad_proposal_mode: bool,
    validators: &ValidatorSet,
) -> Result<(), JustificationError> {
    if prepares.len() < quorum {
        return Err(JustificationError::InsufficientPrepareSigners);
    }
    if prepares.len() > validators.size() {
        return Err(JustificationError::TooManyPrepares);
    }

    let prepared_round = round_change
        .prepared_round()
        .ok_or(JustificationError::RoundChangeWithoutPreparedRound)?;

    let mut seen: HashSet<Address> = HashSet::with_capacity(prepares.len());

    for prepare in prepares {
        if prepare.digest != round_change.prepared_digest() && !bad_proposal_mode {
            return Err(JustificationError::PrepareMismatch);
        }

        if prepare.view().round != prepared_round {
            return Err(JustificationError::PrepareMismatch);
        }

        let source = prepare.source();
        if source.is_zero() {
            return Err(JustificationError::PrepareWithoutSource);
        }
        if !validators.contains(&source) {
            return Err(JustificationError::PrepareFromNonValidator);
        }
        if !seen.insert(source) {
            return Err(JustificationError::DuplicatePrepareSigner);
        }
    }

    if seen.len() < quorum {
        return Err(JustificationError::InsufficientPrepareSigners);
    }

    Ok(())
}
