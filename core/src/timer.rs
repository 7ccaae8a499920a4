use std::time::Duration;

use obsidian_qbft_types::message::Message;
use obsidian_qbft_types::View;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::events::Event;

/// Monotonic timers feeding the event loop. Entering a new view cancels
/// the previous round timer; a fresh one is armed with the exponential
/// round duration. The future-proposal timer re-posts a PRE-PREPARE as
/// a backlog event once the verifier's reported delay elapses.
pub(crate) struct Timers {
    events: mpsc::UnboundedSender<Event>,
    round_timer: Option<JoinHandle<()>>,
    future_proposal_timer: Option<JoinHandle<()>>,
}

impl Timers {
    pub(crate) fn new(events: mpsc::UnboundedSender<Event>) -> Self {
        Self {
            events,
            round_timer: None,
            future_proposal_timer: None,
        }
    }

    pub(crate) fn arm_round_timer(&mut self, view: View, after: Duration) {
        self.cancel_round_timer();
        let events = self.events.clone();
        self.round_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = events.send(Event::RoundTimeout(view));
        }));
    }

    pub(crate) fn cancel_round_timer(&mut self) {
        if let Some(timer) = self.round_timer.take() {
            timer.abort();
        }
    }

    pub(crate) fn arm_future_proposal_timer(&mut self, message: Message, after: Duration) {
        self.cancel_future_proposal_timer();
        let events = self.events.clone();
        self.future_proposal_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = events.send(Event::Backlog(message));
        }));
    }

    pub(crate) fn cancel_future_proposal_timer(&mut self) {
        if let Some(timer) = self.future_proposal_timer.take() {
            timer.abort();
        }
    }

    pub(crate) fn cancel_all(&mut self) {
        self.cancel_round_timer();
        self.cancel_future_proposal_timer();
    }
}

impl Drop for Timers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
