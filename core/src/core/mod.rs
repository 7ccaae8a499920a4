mod commit;
mod prepare;
mod preprepare;
mod round_change;

use std::sync::Mutex;

use bytes::Bytes;
use obsidian_qbft_types::message::{self, ConsensusPayload, Message, ROUND_CHANGE_CODE};
use obsidian_qbft_types::{Address, Proposal, ValidatorSet, View};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::backend::Backend;
use crate::backlog::{Backlog, MAX_BACKLOG_PER_VALIDATOR};
use crate::config::QbftConfig;
use crate::error::ConsensusError;
use crate::events::{CoreHandle, Event};
use crate::round_change_set::RoundChangeSet;
use crate::round_state::{RoundState, State};
use crate::timer::Timers;

/// A locally built proposal handed to the core by the miner.
#[derive(Clone, Debug)]
pub struct Request {
    pub proposal: Proposal,
}

/// The QBFT state machine for one validator.
///
/// Runs single-threaded: [`Core::run`] drains one FIFO event channel
/// and every handler completes against the current round state before
/// the next event is looked at. The backlog sits behind a mutex since
/// admission may race a drain once a direct network-side admission
/// path is wired in.
pub struct Core<B: Backend> {
    address: Address,
    config: QbftConfig,
    backend: B,
    val_set: ValidatorSet,
    state: State,
    current: Option<RoundState>,
    backlog: Mutex<Backlog>,
    round_changes: RoundChangeSet,
    pending_request: Option<Request>,
    last_proposer: Option<Address>,
    timers: Timers,
    events: mpsc::UnboundedSender<Event>,
}

impl<B: Backend> Core<B> {
    /// Builds a core and its event channel. Call [`Core::start`] before
    /// feeding events, then hand the receiver to [`Core::run`].
    pub fn new(
        address: Address,
        config: QbftConfig,
        backend: B,
    ) -> (Self, CoreHandle, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();

        let core = Self {
            address,
            config,
            val_set: ValidatorSet::round_robin(Vec::new()),
            backend,
            state: State::AcceptRequest,
            current: None,
            backlog: Mutex::new(Backlog::new()),
            round_changes: RoundChangeSet::new(0),
            pending_request: None,
            last_proposer: None,
            timers: Timers::new(tx.clone()),
            events: tx.clone(),
        };

        (core, CoreHandle::new(tx), rx)
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn validators(&self) -> &ValidatorSet {
        &self.val_set
    }

    pub fn current_view(&self) -> Option<View> {
        self.current.as_ref().map(RoundState::view)
    }

    /// The accumulator for the round in progress, if consensus started.
    pub fn round_state(&self) -> Option<&RoundState> {
        self.current.as_ref()
    }

    pub fn quorum(&self) -> usize {
        self.val_set.quorum()
    }

    /// Begins consensus at `sequence`, round zero.
    pub fn start(&mut self, sequence: u64) {
        self.start_new_sequence(sequence, None);
    }

    /// Runs the event loop to completion; ends when every handle is
    /// dropped and the channel closes.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<Event>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event);
        }
        self.timers.cancel_all();
    }

    pub fn handle_event(&mut self, event: Event) {
        match event {
            Event::Message { code, payload } => {
                if let Err(err) = self.handle_raw_message(code, &payload) {
                    debug!(code, %err, "dropped consensus message");
                }
            }
            Event::Backlog(message) => {
                let view = message.view();
                if let Err(err) = self.handle_message(message) {
                    trace!(%view, %err, "dropped backlog message");
                }
            }
            Event::LocalRequest(request) => self.handle_request(request),
            Event::RoundTimeout(view) => self.handle_round_timeout(view),
            Event::FinalCommitted { number, proposer } => {
                self.handle_final_committed(number, proposer);
            }
        }
    }

    // === Inbound message path ===

    fn handle_raw_message(&mut self, code: u64, payload: &Bytes) -> Result<(), ConsensusError> {
        let mut message = message::decode(code, payload).map_err(|err| {
            debug!(code, %err, "undecodable consensus message");
            ConsensusError::InvalidMessage
        })?;

        self.recover_message(&mut message)?;
        self.handle_message(message)
    }

    /// Recovers the outer signer and, for messages that embed signed
    /// certificates, every embedded signer. Wire-supplied sources are
    /// never trusted.
    fn recover_message(&self, message: &mut Message) -> Result<(), ConsensusError> {
        message
            .recover_source()
            .map_err(|_| ConsensusError::InvalidSigner)?;

        match message {
            Message::Preprepare(preprepare) => {
                for rc in &mut preprepare.justification_round_changes {
                    rc.recover_source()
                        .map_err(|_| ConsensusError::InvalidSigner)?;
                }
                for prepare in &mut preprepare.justification_prepares {
                    let source = prepare
                        .recover_source()
                        .map_err(|_| ConsensusError::InvalidSigner)?;
                    if source.is_zero() {
                        return Err(ConsensusError::InvalidSigner);
                    }
                }
            }
            Message::RoundChange(round_change) => {
                for prepare in &mut round_change.justification {
                    prepare
                        .recover_source()
                        .map_err(|_| ConsensusError::InvalidSigner)?;
                }
            }
            _ => {}
        }

        Ok(())
    }

    /// Routes a decoded, signature-recovered message: process it now,
    /// stash it in the backlog, or drop it.
    pub fn handle_message(&mut self, message: Message) -> Result<(), ConsensusError> {
        if !self.val_set.contains(&message.source()) {
            return Err(ConsensusError::InvalidSigner);
        }

        match self.check_message(message.code(), &message.view()) {
            Ok(()) => {}
            Err(ConsensusError::FutureMessage) => {
                self.add_to_backlog(message);
                return Err(ConsensusError::FutureMessage);
            }
            Err(err) => return Err(err),
        }

        match message {
            Message::Preprepare(preprepare) => self.handle_preprepare(preprepare),
            Message::Prepare(prepare) => self.handle_prepare(prepare),
            Message::Commit(commit) => self.handle_commit(commit),
            Message::RoundChange(round_change) => self.handle_round_change(round_change),
        }
    }

    /// Classifies a message view against the current state machine
    /// position.
    pub fn check_message(&self, code: u64, view: &View) -> Result<(), ConsensusError> {
        let Some(current) = self.current_view() else {
            return Err(ConsensusError::InvalidMessage);
        };

        if code == ROUND_CHANGE_CODE {
            // ROUND-CHANGE only needs its sequence to match; any round
            // at or above ours is current.
            if view.sequence > current.sequence {
                return Err(ConsensusError::FutureMessage);
            }
            if *view < current {
                return Err(ConsensusError::OldMessage);
            }
            return Ok(());
        }

        if *view > current {
            return Err(ConsensusError::FutureMessage);
        }
        if *view < current {
            return Err(ConsensusError::OldMessage);
        }

        match self.state {
            State::AcceptRequest => match code {
                message::PREPREPARE_CODE => Ok(()),
                _ => Err(ConsensusError::FutureMessage),
            },
            State::Preprepared => match code {
                message::PREPREPARE_CODE => Err(ConsensusError::InvalidMessage),
                message::PREPARE_CODE => Ok(()),
                _ => Err(ConsensusError::FutureMessage),
            },
            State::Prepared => match code {
                message::COMMIT_CODE => Ok(()),
                _ => Err(ConsensusError::InvalidMessage),
            },
            State::Committed => Err(ConsensusError::InvalidMessage),
            // While waiting for a round change, same-view messages go
            // straight to their handlers; each handler is a no-op
            // without an accepted proposal for the round.
            State::WaitingForRoundChange => Ok(()),
        }
    }

    // === Backlog ===

    fn add_to_backlog(&self, message: Message) {
        let source = message.source();
        if source == self.address {
            warn!("backlog message from self");
            return;
        }

        // Unknown senders never get a queue; this is what keeps the
        // backlog map from filling with arbitrary addresses.
        if !self.val_set.contains(&source) {
            trace!(src = %source, "dropping backlog message from non-validator");
            return;
        }

        let view = message.view();
        if !Backlog::within_future_window(self.current_view(), message.code(), &view) {
            trace!(src = %source, %view, "dropping far-future backlog message");
            return;
        }

        let max_total = Backlog::max_total(Some(&self.val_set));
        let mut backlog = self.backlog.lock().unwrap_or_else(|e| e.into_inner());
        if backlog.push(message, max_total) {
            trace!(total = backlog.total(), "new backlog message");
        }
    }

    /// Number of messages currently buffered for future views.
    pub fn backlog_total(&self) -> usize {
        self.backlog
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .total()
    }

    /// Re-examines backlogged messages against the live state and posts
    /// the now-processable ones back onto the event channel. Runs on
    /// every state transition.
    pub fn process_backlog(&self) {
        let current = self.current_view();
        let max_total = Backlog::max_total(Some(&self.val_set));
        let mut ready = Vec::new();

        {
            let mut backlog = self.backlog.lock().unwrap_or_else(|e| e.into_inner());

            for sender in backlog.senders() {
                // A sender that left the validator set loses its queue.
                if !self.val_set.contains(&sender) {
                    backlog.drop_sender(&sender);
                    continue;
                }

                while let Some(message) = backlog.pop(&sender) {
                    match self.check_message(message.code(), &message.view()) {
                        Err(ConsensusError::FutureMessage) => {
                            // Still early; requeue if it still fits and
                            // stop draining this sender.
                            if Backlog::within_future_window(current, message.code(), &message.view())
                                && backlog.len_for(&sender) < MAX_BACKLOG_PER_VALIDATOR
                                && backlog.total() < max_total
                            {
                                backlog.push(message, max_total);
                            }
                            break;
                        }
                        Err(err) => {
                            trace!(src = %sender, %err, "skip backlog message");
                        }
                        Ok(()) => ready.push(message),
                    }
                }
            }
        }

        for message in ready {
            let _ = self.events.send(Event::Backlog(message));
        }
    }

    // === Round lifecycle ===

    fn start_new_sequence(&mut self, sequence: u64, last_proposer: Option<Address>) {
        let view = View::new(sequence, 0);
        info!(%view, "starting new sequence");

        self.val_set = self.backend.validators(sequence);
        self.last_proposer = last_proposer;
        self.round_changes.reset(sequence);
        self.pending_request = None;
        self.current = Some(RoundState::new(view, None));
        self.state = State::AcceptRequest;

        self.timers.cancel_future_proposal_timer();
        self.timers
            .arm_round_timer(view, self.config.at(sequence).round_timeout(0));
        self.process_backlog();
    }

    /// Moves to `round` within the current sequence, carrying the
    /// prepared certificate. Entered either waiting for a round-change
    /// quorum or, once that quorum exists, accepting proposals.
    fn enter_round(&mut self, round: u64, waiting: bool) {
        let Some(previous) = self.current.take() else {
            return;
        };

        let view = View::new(previous.sequence(), round);
        debug!(%view, waiting, "entering round");

        let has_bad_proposal = previous.has_bad_proposal;
        let mut next = RoundState::new(view, previous.prepared);
        next.has_bad_proposal = has_bad_proposal;
        self.current = Some(next);
        self.state = if waiting {
            State::WaitingForRoundChange
        } else {
            State::AcceptRequest
        };

        self.round_changes.clear_below(round);
        self.timers
            .arm_round_timer(view, self.config.at(view.sequence).round_timeout(round));
        self.process_backlog();
    }

    // === Local requests ===

    fn handle_request(&mut self, request: Request) {
        let Some(current) = self.current_view() else {
            return;
        };

        let number = request.proposal.number();
        if number < current.sequence {
            debug!(number, %current, "dropping old proposal request");
            return;
        }

        self.pending_request = Some(request);
        if number > current.sequence {
            debug!(number, %current, "storing proposal request for a future sequence");
            return;
        }

        if self.state == State::AcceptRequest {
            self.send_preprepare();
        }
    }

    // === Timeouts and sequence hand-off ===

    fn handle_round_timeout(&mut self, view: View) {
        if self.current_view() != Some(view) {
            // A timer armed for a view we already left.
            return;
        }

        info!(%view, "round timed out");
        self.send_round_change(view.round + 1);
    }

    fn handle_final_committed(&mut self, number: u64, proposer: Address) {
        if let Some(view) = self.current_view() {
            if number < view.sequence {
                trace!(number, %view, "stale chain head announcement");
                return;
            }
        }

        info!(number, %proposer, "chain head advanced");
        self.timers.cancel_all();
        self.start_new_sequence(number + 1, Some(proposer));
    }

    // === Outbound helpers ===

    fn set_state(&mut self, state: State) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "state transition");
            self.state = state;
        }
        self.process_backlog();
    }

    fn sign_and_broadcast(&self, mut message: Message) {
        message.set_source(self.address);

        let signature = match self.backend.sign(&message.signing_payload()) {
            Ok(signature) => signature,
            Err(err) => {
                error!(%err, "failed to sign consensus message");
                return;
            }
        };
        message.set_signature(signature);

        let code = message.code();
        let payload = Bytes::from(message.encode_wire());
        if let Err(err) = self.backend.broadcast(&self.val_set, code, payload) {
            error!(%err, code, "failed to broadcast consensus message");
        }
    }

    fn is_local_proposer(&self) -> bool {
        self.current_view().is_some_and(|view| {
            self.val_set
                .is_proposer(&view, self.last_proposer.as_ref(), &self.address)
        })
    }
}
