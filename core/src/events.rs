use bytes::Bytes;
use obsidian_qbft_types::message::Message;
use obsidian_qbft_types::{Address, View};
use tokio::sync::mpsc;

use crate::core::Request;

/// Everything that can wake the consensus core. The network reader,
/// the miner, the chain-head watcher and the timers all feed one FIFO
/// channel; handlers run to completion against the current round
/// state, so the core needs no internal locking for state transitions.
#[derive(Debug)]
pub enum Event {
    /// A raw consensus message from a peer, not yet decoded.
    Message { code: u64, payload: Bytes },

    /// A locally built proposal from the miner.
    LocalRequest(Request),

    /// The round timer for `view` expired.
    RoundTimeout(View),

    /// A previously backlogged (or retried) message, already decoded
    /// and signature-recovered.
    Backlog(Message),

    /// The chain head moved: `number` was written by `proposer`.
    FinalCommitted { number: u64, proposer: Address },
}

/// Cloneable producer half of the core's event channel, handed to the
/// network layer and the miner.
#[derive(Clone)]
pub struct CoreHandle {
    tx: mpsc::UnboundedSender<Event>,
}

impl CoreHandle {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Event>) -> Self {
        Self { tx }
    }

    pub fn sender(&self) -> mpsc::UnboundedSender<Event> {
        self.tx.clone()
    }

    /// Posts a raw peer message for decoding and handling.
    pub fn submit_message(&self, code: u64, payload: Bytes) {
        let _ = self.tx.send(Event::Message { code, payload });
    }

    /// Posts a locally built proposal.
    pub fn submit_request(&self, request: Request) {
        let _ = self.tx.send(Event::LocalRequest(request));
    }

    /// Announces that the chain head advanced.
    pub fn final_committed(&self, number: u64, proposer: Address) {
        let _ = self.tx.send(Event::FinalCommitted { number, proposer });
    }
}
