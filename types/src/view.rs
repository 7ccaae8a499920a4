use core::fmt;

use serde::{Deserialize, Serialize};

/// A consensus view: the block height under negotiation and the attempt
/// number within it. Ordering is lexicographic on (sequence, round).
#[derive(
    Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Debug,
)]
pub struct View {
    pub sequence: u64,
    pub round: u64,
}

impl View {
    pub const fn new(sequence: u64, round: u64) -> Self {
        Self { sequence, round }
    }

    /// The same sequence, one round further.
    pub const fn next_round(&self) -> Self {
        Self::new(self.sequence, self.round + 1)
    }

    /// The next sequence, back at round zero.
    pub const fn next_sequence(&self) -> Self {
        Self::new(self.sequence + 1, 0)
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.sequence, self.round)
    }
}
