use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use obsidian_qbft_types::message::{
    Message, COMMIT_CODE, PREPARE_CODE, PREPREPARE_CODE, ROUND_CHANGE_CODE,
};
use obsidian_qbft_types::{Address, ValidatorSet, View};
use tracing::trace;

// === Future window limits ===

/// 32 blocks ahead is far beyond any legitimate async delivery. A node
/// that far behind needs chain sync, not a bigger backlog.
pub const MAX_FUTURE_SEQUENCE_GAP: u64 = 32;

/// 15 rounds covers hours of continuously failing consensus; nothing
/// legitimate exceeds it within one sequence.
pub const MAX_FUTURE_ROUND_GAP: u64 = 15;

// === Memory protection limits ===

/// Per-validator cap, generous enough for legitimate bursts.
pub const MAX_BACKLOG_PER_VALIDATOR: usize = 1024;

/// Floor for small validator sets, so a four-node network still has
/// usable capacity.
pub const MIN_BACKLOG_TOTAL: usize = 4096;

/// Hard ceiling regardless of validator count.
pub const MAX_BACKLOG_TOTAL_CEILING: usize = 131_072;

/// Processing priority inside one view:
/// PRE-PREPARE before COMMIT before PREPARE.
fn code_priority(code: u64) -> u64 {
    match code {
        PREPREPARE_CODE => 1,
        COMMIT_CODE => 2,
        PREPARE_CODE => 3,
        _ => 0,
    }
}

/// Drain order key; lower keys drain first. ROUND-CHANGE orders by
/// sequence alone since its round resets with every new sequence.
fn priority(code: u64, view: &View) -> u64 {
    if code == ROUND_CHANGE_CODE {
        return view.sequence.saturating_mul(1000);
    }
    view.sequence
        .saturating_mul(1000)
        .saturating_add(view.round.saturating_mul(10))
        .saturating_add(code_priority(code))
}

struct Entry {
    priority: u64,
    arrival: u64,
    message: Message,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.arrival == other.arrival
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.priority, self.arrival).cmp(&(other.priority, other.arrival))
    }
}

/// Per-sender bounded priority queues of future messages.
///
/// Admission (validator membership, the future window, the caps) is the
/// caller's job via [`Backlog::within_future_window`] and the cap
/// accessors; the queue itself only orders and counts.
#[derive(Default)]
pub struct Backlog {
    queues: HashMap<Address, BinaryHeap<Reverse<Entry>>>,
    total: usize,
    arrivals: u64,
}

impl Backlog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Global count across every sender queue.
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn len_for(&self, address: &Address) -> usize {
        self.queues.get(address).map_or(0, BinaryHeap::len)
    }

    pub fn senders(&self) -> Vec<Address> {
        self.queues.keys().copied().collect()
    }

    /// Dynamic global cap: twice the per-validator cap per validator,
    /// clamped to `[MIN_BACKLOG_TOTAL, MAX_BACKLOG_TOTAL_CEILING]`.
    pub fn max_total(validators: Option<&ValidatorSet>) -> usize {
        let Some(validators) = validators else {
            return MIN_BACKLOG_TOTAL;
        };

        let dynamic = validators.size() * MAX_BACKLOG_PER_VALIDATOR * 2;
        dynamic.clamp(MIN_BACKLOG_TOTAL, MAX_BACKLOG_TOTAL_CEILING)
    }

    /// Whether a message view is close enough ahead of `current` to be
    /// worth buffering. Same-sequence messages are commonly received
    /// early and are allowed, except ROUND-CHANGE rounds beyond the
    /// round gap, which are the round-spam vector. Non-ROUND-CHANGE
    /// messages at the current sequence stay round-unbounded here; the
    /// PRE-PREPARE justification check bounds them later.
    pub fn within_future_window(current: Option<View>, code: u64, view: &View) -> bool {
        let Some(current) = current else {
            // Not ready yet, drop the message.
            return false;
        };

        if view.sequence == current.sequence {
            if code == ROUND_CHANGE_CODE && view.round > current.round + MAX_FUTURE_ROUND_GAP {
                return false;
            }
            return true;
        }

        if view.sequence < current.sequence {
            return false;
        }

        view.sequence <= current.sequence + MAX_FUTURE_SEQUENCE_GAP
    }

    /// Queues a message under its sender, enforcing the per-sender and
    /// global caps. Returns false when the message was dropped.
    pub fn push(&mut self, message: Message, max_total: usize) -> bool {
        if self.total >= max_total {
            trace!(cap = max_total, total = self.total, "dropping backlog message (global cap)");
            return false;
        }

        let queue = self.queues.entry(message.source()).or_default();
        if queue.len() >= MAX_BACKLOG_PER_VALIDATOR {
            trace!(
                src = %message.source(),
                cap = MAX_BACKLOG_PER_VALIDATOR,
                "dropping backlog message (per-validator cap)"
            );
            return false;
        }

        let priority = priority(message.code(), &message.view());
        let arrival = self.arrivals;
        self.arrivals += 1;

        queue.push(Reverse(Entry {
            priority,
            arrival,
            message,
        }));
        self.total += 1;
        true
    }

    /// Pops the highest-priority message queued for `address`.
    pub fn pop(&mut self, address: &Address) -> Option<Message> {
        let queue = self.queues.get_mut(address)?;
        let entry = queue.pop()?;
        self.total -= 1;
        if queue.is_empty() {
            self.queues.remove(address);
        }
        Some(entry.0.message)
    }

    /// Drops the entire queue of a sender that left the validator set.
    pub fn drop_sender(&mut self, address: &Address) {
        if let Some(queue) = self.queues.remove(address) {
            self.total -= queue.len();
        }
    }

    #[cfg(test)]
    pub(crate) fn assert_counts_consistent(&self) {
        let sum: usize = self.queues.values().map(BinaryHeap::len).sum();
        assert_eq!(sum, self.total, "backlog global count out of sync");
    }
}
