use obsidian_qbft_types::extra::commit_seal_preimage;
use obsidian_qbft_types::message::{Commit, ConsensusPayload, Message};
use obsidian_qbft_types::Signature;
use tracing::{debug, error, info};

use crate::backend::Backend;
use crate::core::Core;
use crate::error::ConsensusError;
use crate::round_state::State;

impl<B: Backend> Core<B> {
    /// Signs the commit-seal preimage for the proposal at the current
    /// round and broadcasts our COMMIT.
    pub(crate) fn broadcast_commit(&self) {
        let Some(current) = self.current.as_ref() else {
            return;
        };
        let Some(proposal) = current.proposal() else {
            return;
        };
        let view = current.view();

        let round = u32::try_from(view.round).unwrap_or(u32::MAX);
        let preimage = match commit_seal_preimage(proposal.header(), round) {
            Ok(preimage) => preimage,
            Err(err) => {
                error!(%err, "failed to build commit-seal preimage");
                return;
            }
        };

        let commit_seal = match self.backend.sign_without_hashing(&preimage) {
            Ok(seal) => seal,
            Err(err) => {
                error!(%err, "failed to create commit seal");
                return;
            }
        };

        let commit = Commit::new(view.sequence, view.round, proposal.hash(), commit_seal);
        self.sign_and_broadcast(Message::Commit(commit));
    }

    /// Handles a COMMIT vote: the digest must match the proposal under
    /// negotiation and the commit seal must recover to the message's
    /// own signer. A quorum of distinct senders finalizes the round.
    pub(crate) fn handle_commit(&mut self, commit: Commit) -> Result<(), ConsensusError> {
        let quorum = self.val_set.quorum();

        let count = {
            let Some(current) = self.current.as_mut() else {
                return Err(ConsensusError::InvalidMessage);
            };
            let Some(proposal) = current.proposal() else {
                return Err(ConsensusError::InvalidMessage);
            };

            if commit.digest != proposal.hash() {
                error!(
                    digest = %commit.digest,
                    proposal = %proposal.hash(),
                    "invalid COMMIT message digest"
                );
                return Err(ConsensusError::InvalidMessage);
            }

            // The seal must be this validator's signature over the
            // committed-seal preimage at this round; anything else
            // would poison the sealed header.
            let round = u32::try_from(current.round()).unwrap_or(u32::MAX);
            let preimage = commit_seal_preimage(proposal.header(), round)
                .map_err(|_| ConsensusError::InvalidMessage)?;
            let sealer = commit
                .commit_seal
                .recover_prehashed(&preimage)
                .map_err(|_| ConsensusError::InvalidMessage)?;
            if sealer != commit.source() {
                error!(src = %commit.source(), %sealer, "COMMIT seal signer mismatch");
                return Err(ConsensusError::InvalidMessage);
            }

            current.commits_mut().add(commit);
            current.commits().len()
        };

        if count >= quorum {
            info!(count, quorum, "received quorum of COMMIT messages");
            self.commit_proposal();
        } else {
            debug!(count, quorum, "accepted COMMIT message");
        }

        Ok(())
    }

    /// Hands the proposal and its seals (in arrival order) to the
    /// committer. On failure the round is abandoned rather than
    /// retried: the next round's proposer can re-propose under the
    /// carried certificate.
    pub(crate) fn commit_proposal(&mut self) {
        self.set_state(State::Committed);

        let Some(current) = self.current.as_ref() else {
            return;
        };
        let Some(proposal) = current.proposal().cloned() else {
            return;
        };

        let seals: Vec<Signature> = current
            .commits()
            .values()
            .map(|commit| commit.commit_seal)
            .collect();
        let round = current.round();

        match self.backend.commit(&proposal, &seals, round) {
            Ok(()) => {
                info!(
                    number = proposal.number(),
                    digest = %proposal.hash(),
                    round,
                    "proposal committed, waiting for chain head"
                );
            }
            Err(err) => {
                error!(%err, "error committing proposal");
                if let Some(current) = self.current.as_mut() {
                    current.has_bad_proposal = true;
                }
                self.send_round_change(round + 1);
            }
        }
    }
}
