use obsidian_qbft_types::message::{
    ConsensusPayload, Message, Prepare, Preprepare, SignedRoundChangePayload,
};
use tracing::{debug, info, warn};

use crate::backend::{Backend, VerifyError};
use crate::core::Core;
use crate::error::ConsensusError;
use crate::justification::is_justified;
use crate::round_state::State;

impl<B: Backend> Core<B> {
    /// Broadcasts our PRE-PREPARE for the current round, justified by
    /// the round-change certificate when the round is above zero. Only
    /// acts when this node proposes the current view and has not yet
    /// proposed this round.
    pub(crate) fn send_preprepare(&mut self) {
        let Some(current) = self.current.as_ref() else {
            return;
        };
        let view = current.view();

        if current.preprepare_sent == Some(view.round) || !self.is_local_proposer() {
            return;
        }

        let (proposal, round_changes, prepares) = if view.round > 0 {
            let round_changes: Vec<SignedRoundChangePayload> = self
                .round_changes
                .messages_at(view.round)
                .map(|set| set.values().map(|rc| rc.signed_payload.clone()).collect())
                .unwrap_or_default();

            // Re-propose the block the highest prepared certificate
            // locks, if any validator brought one into the new round.
            let locked = self
                .round_changes
                .highest_prepared_at(view.round)
                .and_then(|rc| {
                    rc.prepared_block
                        .clone()
                        .map(|block| (block, rc.justification.clone()))
                });

            match locked {
                Some((block, justification)) => (block, round_changes, justification),
                None => match &self.pending_request {
                    Some(request) => (request.proposal.clone(), round_changes, Vec::new()),
                    None => {
                        debug!(%view, "no proposal available for the new round yet");
                        return;
                    }
                },
            }
        } else {
            match &self.pending_request {
                Some(request) => (request.proposal.clone(), Vec::new(), Vec::new()),
                None => return,
            }
        };

        if proposal.number() != view.sequence {
            debug!(
                number = proposal.number(),
                %view,
                "proposal height does not match the sequence under negotiation"
            );
            return;
        }

        info!(%view, digest = %proposal.hash(), "proposing block");

        let mut preprepare = Preprepare::new(view.sequence, view.round, proposal);
        preprepare.justification_round_changes = round_changes;
        preprepare.justification_prepares = prepares;

        self.sign_and_broadcast(Message::Preprepare(preprepare));

        if let Some(current) = self.current.as_mut() {
            current.preprepare_sent = Some(view.round);
        }
    }

    /// Handles a PRE-PREPARE from the round's proposer: checks
    /// provenance and justification, verifies the proposal, and on
    /// success moves to Preprepared and votes PREPARE.
    pub(crate) fn handle_preprepare(
        &mut self,
        preprepare: Preprepare,
    ) -> Result<(), ConsensusError> {
        let Some(current) = self.current.as_ref() else {
            return Err(ConsensusError::InvalidMessage);
        };
        let view = current.view();

        if !self
            .val_set
            .is_proposer(&view, self.last_proposer.as_ref(), &preprepare.source())
        {
            warn!(src = %preprepare.source(), %view, "PRE-PREPARE from non-proposer");
            return Err(ConsensusError::NotFromProposer);
        }

        if preprepare.proposal.number() != view.sequence {
            warn!(
                number = preprepare.proposal.number(),
                %view,
                "PRE-PREPARE proposal at the wrong height"
            );
            return Err(ConsensusError::InvalidMessage);
        }

        if view.round > 0 {
            is_justified(
                &preprepare.proposal,
                &preprepare.justification_round_changes,
                &preprepare.justification_prepares,
                self.val_set.quorum(),
                &self.val_set,
            )
            .map_err(|err| {
                warn!(%view, %err, "invalid PRE-PREPARE justification");
                ConsensusError::InvalidPreparedBlock
            })?;
        }

        match self.backend.verify(&preprepare.proposal) {
            Ok(()) => {}
            Err(VerifyError::FutureBlock(delay)) => {
                // The block's timestamp is ahead of us; replay the
                // message once the verifier says it can pass.
                warn!(%view, ?delay, "PRE-PREPARE proposal is in the future, retrying later");
                self.timers
                    .arm_future_proposal_timer(Message::Preprepare(preprepare), delay);
                return Err(ConsensusError::FutureBlock);
            }
            Err(VerifyError::Invalid) => {
                warn!(%view, "invalid PRE-PREPARE block proposal");
                return Err(ConsensusError::InvalidMessage);
            }
        }

        if self.state == State::AcceptRequest {
            info!(src = %preprepare.source(), %view, digest = %preprepare.proposal.hash(), "accepted PRE-PREPARE");

            if let Some(current) = self.current.as_mut() {
                current.set_preprepare(preprepare);
            }
            self.set_state(State::Preprepared);
            self.broadcast_prepare();
        }

        Ok(())
    }

    /// Votes PREPARE for the proposal accepted this round.
    pub(crate) fn broadcast_prepare(&self) {
        let Some(current) = self.current.as_ref() else {
            return;
        };
        let Some(digest) = current.proposal_digest() else {
            return;
        };
        let view = current.view();

        let prepare = Prepare::new(view.sequence, view.round, digest);
        self.sign_and_broadcast(Message::Prepare(prepare));
    }
}
