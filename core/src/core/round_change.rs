use obsidian_qbft_types::message::{ConsensusPayload, Message, RoundChange};
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::core::Core;
use crate::error::ConsensusError;
use crate::justification::has_matching_round_change_and_prepares;
use crate::round_state::State;

impl<B: Backend> Core<B> {
    /// Abandons the current round for `round`: enters it waiting for a
    /// round-change quorum and broadcasts our own ROUND-CHANGE carrying
    /// the prepared certificate, if this node holds one.
    pub(crate) fn send_round_change(&mut self, round: u64) {
        self.enter_round(round, true);
        self.broadcast_round_change(round);
    }

    fn broadcast_round_change(&self, round: u64) {
        let Some(current) = self.current.as_ref() else {
            return;
        };

        let mut round_change = RoundChange::new(
            current.sequence(),
            round,
            current.prepared_round(),
            current.prepared_block().cloned(),
            current.has_bad_proposal,
        );
        round_change.justification = current
            .prepared
            .as_ref()
            .map(|cert| cert.prepares.clone())
            .unwrap_or_default();

        self.sign_and_broadcast(Message::RoundChange(round_change));
    }

    /// Handles a ROUND-CHANGE at the current sequence.
    ///
    /// A message carrying a prepared certificate must prove it with a
    /// matching quorum of PREPAREs. Then two thresholds drive the
    /// round machinery: f+1 distinct validators at one future round
    /// pull us up to it (they cannot all be faulty), and a quorum at
    /// our own round starts it.
    pub(crate) fn handle_round_change(
        &mut self,
        round_change: RoundChange,
    ) -> Result<(), ConsensusError> {
        let Some(current) = self.current_view() else {
            return Err(ConsensusError::InvalidMessage);
        };

        let quorum = self.val_set.quorum();
        let catch_up_weight = self.val_set.faulty() + 1;

        if round_change.prepared_round().is_some() && !round_change.prepared_digest().is_zero() {
            has_matching_round_change_and_prepares(
                &round_change,
                &round_change.justification,
                quorum,
                round_change.has_bad_proposal(),
                &self.val_set,
            )
            .map_err(|err| {
                warn!(src = %round_change.source(), %err, "invalid ROUND-CHANGE prepared certificate");
                ConsensusError::InvalidPreparedBlock
            })?;
        }

        debug!(
            src = %round_change.source(),
            view = %round_change.view(),
            prepared_round = ?round_change.prepared_round(),
            "accepted ROUND-CHANGE message"
        );
        self.round_changes.add(round_change);

        // Catch up when f+1 distinct validators already moved ahead.
        if let Some(target) = self
            .round_changes
            .max_round_with_at_least(catch_up_weight, current.round)
        {
            info!(target, current = current.round, "catching up round");
            self.send_round_change(target);
        }

        // Start the round once a quorum wants it.
        if let Some(view) = self.current_view() {
            if self.state == State::WaitingForRoundChange
                && self.round_changes.count_at(view.round) >= quorum
            {
                info!(%view, "round-change quorum reached, starting round");
                self.set_state(State::AcceptRequest);
                self.send_preprepare();
            }
        }

        Ok(())
    }
}
