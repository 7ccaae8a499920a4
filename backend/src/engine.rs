//! Sealed-header verification.
//!
//! A sealed header proves finalization only through its committed
//! seals: at least a quorum (2f+1) of valid, distinct signatures from
//! the height's validator set over the commit-seal preimage for the
//! round the header claims. Anything weaker would let f+1 colluding
//! validators finalize two conflicting blocks at one height.

use std::collections::HashSet;

use alloy_consensus::Header;
use obsidian_qbft_types::extra::{
    apply_header_extra, commit_seal_preimage, header_extra, write_committed_seals, write_round,
    ExtraError,
};
use obsidian_qbft_types::{Address, Signature, ValidatorSet};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error(transparent)]
    Extra(#[from] ExtraError),

    #[error("committed seal is not a valid signature")]
    InvalidSeal,

    #[error("committed seal signer {0} is not in the validator set")]
    UnknownSealer(Address),

    #[error("duplicate committed seal from {0}")]
    DuplicateSealer(Address),

    #[error("header carries {have} committed seals, quorum is {need}")]
    InsufficientSeals { have: usize, need: usize },
}

/// Verifies the committed seals on a sealed header against the
/// validator set for its height.
///
/// Every seal must recover, over the commit-seal preimage for the
/// header's claimed round, to a distinct member of the set, and the
/// distinct count must reach quorum.
pub fn verify_committed_seals(
    header: &Header,
    validators: &ValidatorSet,
) -> Result<(), EngineError> {
    let extra = header_extra(header)?;
    let preimage = commit_seal_preimage(header, extra.round)?;

    let mut sealers: HashSet<Address> = HashSet::with_capacity(extra.committed_seals.len());
    for seal in &extra.committed_seals {
        let seal = Signature::from_slice(seal).map_err(|_| EngineError::InvalidSeal)?;
        let sealer = seal
            .recover_prehashed(&preimage)
            .map_err(|_| EngineError::InvalidSeal)?;

        if !validators.contains(&sealer) {
            return Err(EngineError::UnknownSealer(sealer));
        }
        if !sealers.insert(sealer) {
            return Err(EngineError::DuplicateSealer(sealer));
        }
    }

    let need = validators.quorum();
    let have = sealers.len();
    if have < need {
        debug!(have, need, number = header.number, "rejecting under-sealed header");
        return Err(EngineError::InsufficientSeals { have, need });
    }

    Ok(())
}

/// Writes the commit round and the gathered seals into a header's
/// extra-data, producing the sealed header handed to the chain.
pub fn seal_header(
    header: &mut Header,
    round: u64,
    seals: &[Signature],
) -> Result<(), EngineError> {
    let round = u32::try_from(round).unwrap_or(u32::MAX);
    apply_header_extra(header, |extra| {
        write_round(extra, round);
        write_committed_seals(extra, seals)
    })?;
    Ok(())
}
