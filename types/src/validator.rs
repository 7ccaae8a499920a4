use core::fmt;

use serde::{Deserialize, Serialize};

use crate::{Address, View};

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Validator {
    pub address: Address,
}

impl Validator {
    pub const fn new(address: Address) -> Self {
        Self { address }
    }
}

impl fmt::Display for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)
    }
}

/// How the proposer for a view is chosen.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProposerPolicy {
    /// Proposer index is `(sequence + round) mod N`.
    #[default]
    RoundRobin,
    /// The proposer of the previous height keeps proposing; the index
    /// advances only on round change.
    Sticky,
}

/// Canonical validator ordering, fixed at genesis and stable per height.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortMode {
    /// Sort by raw address bytes.
    #[default]
    Byte,
    /// Sort by the EIP-55 checksummed hex rendering.
    HexString,
}

/// The ordered validator set for one consensus height.
///
/// Addresses are deduplicated and sorted according to the configured
/// [`SortMode`] at construction, so proposer selection is deterministic
/// across nodes that agree on genesis parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorSet {
    validators: Vec<Validator>,
    policy: ProposerPolicy,
    sort_mode: SortMode,
}

impl ValidatorSet {
    pub fn new(addresses: Vec<Address>, policy: ProposerPolicy, sort_mode: SortMode) -> Self {
        let mut validators: Vec<Validator> = addresses.into_iter().map(Validator::new).collect();
        match sort_mode {
            SortMode::Byte => validators.sort_by_key(|v| v.address),
            SortMode::HexString => validators.sort_by_key(|v| v.address.to_checksum_string()),
        }
        validators.dedup();

        Self {
            validators,
            policy,
            sort_mode,
        }
    }

    pub fn round_robin(addresses: Vec<Address>) -> Self {
        Self::new(addresses, ProposerPolicy::RoundRobin, SortMode::Byte)
    }

    pub fn size(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn list(&self) -> &[Validator] {
        &self.validators
    }

    pub fn addresses(&self) -> impl Iterator<Item = Address> + '_ {
        self.validators.iter().map(|v| v.address)
    }

    pub fn policy(&self) -> ProposerPolicy {
        self.policy
    }

    pub fn sort_mode(&self) -> SortMode {
        self.sort_mode
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.get_by_address(address).is_some()
    }

    pub fn get_by_address(&self, address: &Address) -> Option<&Validator> {
        self.validators.iter().find(|v| &v.address == address)
    }

    pub fn index_of(&self, address: &Address) -> Option<usize> {
        self.validators.iter().position(|v| &v.address == address)
    }

    /// The maximum number of Byzantine validators the set tolerates.
    pub fn faulty(&self) -> usize {
        self.validators.len().saturating_sub(1) / 3
    }

    /// The agreement threshold, strictly `2f + 1`.
    pub fn quorum(&self) -> usize {
        2 * self.faulty() + 1
    }

    /// Selects the proposer for `view`.
    ///
    /// `last_proposer` is the validator that proposed the previous
    /// committed height; it only matters under the sticky policy. A
    /// sticky set whose previous proposer has left the validator set
    /// falls back to the round-robin index for the view.
    pub fn proposer(&self, view: &View, last_proposer: Option<&Address>) -> Option<&Validator> {
        if self.validators.is_empty() {
            return None;
        }

        let n = self.validators.len() as u64;
        let index = match self.policy {
            ProposerPolicy::RoundRobin => (view.sequence.wrapping_add(view.round)) % n,
            ProposerPolicy::Sticky => {
                match last_proposer.and_then(|addr| self.index_of(addr)) {
                    Some(base) => (base as u64).wrapping_add(view.round) % n,
                    None => (view.sequence.wrapping_add(view.round)) % n,
                }
            }
        };

        self.validators.get(index as usize)
    }

    /// Whether `address` proposes at `view`.
    pub fn is_proposer(&self, view: &View, last_proposer: Option<&Address>, address: &Address) -> bool {
        self.proposer(view, last_proposer)
            .is_some_and(|v| &v.address == address)
    }
}
