use obsidian_qbft_types::message::Prepare;
use tracing::{debug, error, info};

use crate::backend::Backend;
use crate::core::Core;
use crate::error::ConsensusError;
use crate::round_state::State;

impl<B: Backend> Core<B> {
    /// Handles a PREPARE vote: the digest must match the proposal
    /// accepted this round; on a quorum of distinct senders the round
    /// is locked (prepared certificate stored) and a COMMIT goes out.
    pub(crate) fn handle_prepare(&mut self, prepare: Prepare) -> Result<(), ConsensusError> {
        let quorum = self.val_set.quorum();

        let count = {
            let Some(current) = self.current.as_mut() else {
                return Err(ConsensusError::InvalidMessage);
            };
            let Some(digest) = current.proposal_digest() else {
                return Err(ConsensusError::InvalidMessage);
            };

            if prepare.digest != digest {
                error!(
                    digest = %prepare.digest,
                    proposal = %digest,
                    "invalid PREPARE message digest"
                );
                return Err(ConsensusError::InvalidMessage);
            }

            current.prepares_mut().add(prepare);
            current.prepares().len()
        };

        if count >= quorum && self.state < State::Prepared {
            info!(count, quorum, "received quorum of PREPARE messages");

            if let Some(current) = self.current.as_mut() {
                let block = current.proposal().cloned();
                let prepares: Vec<Prepare> = current.prepares().values().cloned().collect();
                if let Some(block) = block {
                    current.set_prepared(block, prepares);
                }
            }

            self.set_state(State::Prepared);
            self.broadcast_commit();
        } else {
            debug!(count, quorum, "accepted PREPARE message");
        }

        Ok(())
    }
}
