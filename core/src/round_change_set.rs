use std::collections::BTreeMap;

use obsidian_qbft_types::message::{ConsensusPayload, RoundChange};
use obsidian_qbft_types::View;

use crate::msg_set::MessageSet;

/// ROUND-CHANGE messages for the current sequence, bucketed by the
/// round they ask to enter. Backs both round-change rules: catching up
/// when f+1 distinct validators want the same future round, and
/// starting a round once a quorum asks for it.
pub struct RoundChangeSet {
    sequence: u64,
    by_round: BTreeMap<u64, MessageSet<RoundChange>>,
}

impl RoundChangeSet {
    pub fn new(sequence: u64) -> Self {
        Self {
            sequence,
            by_round: BTreeMap::new(),
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Starts over for a new sequence.
    pub fn reset(&mut self, sequence: u64) {
        self.sequence = sequence;
        self.by_round.clear();
    }

    /// Drops buckets for rounds already entered or passed.
    pub fn clear_below(&mut self, round: u64) {
        self.by_round.retain(|r, _| *r >= round);
    }

    /// Adds a ROUND-CHANGE to its round bucket; messages for other
    /// sequences are ignored.
    pub fn add(&mut self, round_change: RoundChange) {
        let view = round_change.view();
        if view.sequence != self.sequence {
            return;
        }
        self.by_round
            .entry(view.round)
            .or_insert_with(|| MessageSet::new(View::new(view.sequence, view.round)))
            .add(round_change);
    }

    /// Distinct senders asking to enter `round`.
    pub fn count_at(&self, round: u64) -> usize {
        self.by_round.get(&round).map_or(0, MessageSet::len)
    }

    /// The highest round above `above` with at least `weight` distinct
    /// senders; the catch-up target for the f+1 rule.
    pub fn max_round_with_at_least(&self, weight: usize, above: u64) -> Option<u64> {
        self.by_round
            .iter()
            .rev()
            .find(|(round, set)| **round > above && set.len() >= weight)
            .map(|(round, _)| *round)
    }

    pub fn messages_at(&self, round: u64) -> Option<&MessageSet<RoundChange>> {
        self.by_round.get(&round)
    }

    /// The ROUND-CHANGE carrying the highest prepared round among the
    /// messages at `round`; the block a new proposer must re-propose.
    pub fn highest_prepared_at(&self, round: u64) -> Option<&RoundChange> {
        self.by_round.get(&round).and_then(|set| {
            set.values()
                .filter(|rc| rc.prepared_round().is_some() && rc.prepared_block.is_some())
                .max_by_key(|rc| rc.prepared_round())
        })
    }
}

#[cfg(test)]
mod tests {
    use obsidian_qbft_types::Address;

    use super::*;

    fn rc(seq: u64, round: u64, src: u8) -> RoundChange {
        let mut rc = RoundChange::new(seq, round, None, None, false);
        rc.set_source(Address::new([src; 20]));
        rc
    }

    #[test]
    fn buckets_count_distinct_senders() {
        let mut set = RoundChangeSet::new(5);
        set.add(rc(5, 1, 1));
        set.add(rc(5, 1, 1));
        set.add(rc(5, 1, 2));
        set.add(rc(5, 2, 3));
        set.add(rc(6, 1, 4)); // wrong sequence, ignored

        assert_eq!(set.count_at(1), 2);
        assert_eq!(set.count_at(2), 1);
        assert_eq!(set.count_at(3), 0);
    }

    #[test]
    fn max_round_finds_the_highest_heavy_bucket() {
        let mut set = RoundChangeSet::new(5);
        for src in 0..2 {
            set.add(rc(5, 3, src + 1));
        }
        for src in 0..3 {
            set.add(rc(5, 7, src + 10));
        }

        assert_eq!(set.max_round_with_at_least(2, 0), Some(7));
        assert_eq!(set.max_round_with_at_least(3, 0), Some(7));
        assert_eq!(set.max_round_with_at_least(4, 0), None);
        assert_eq!(set.max_round_with_at_least(2, 7), None);
    }

    #[test]
    fn clear_below_drops_entered_rounds() {
        let mut set = RoundChangeSet::new(5);
        set.add(rc(5, 1, 1));
        set.add(rc(5, 2, 2));
        set.add(rc(5, 3, 3));

        set.clear_below(2);
        assert_eq!(set.count_at(1), 0);
        assert_eq!(set.count_at(2), 1);
        assert_eq!(set.count_at(3), 1);
    }
}
