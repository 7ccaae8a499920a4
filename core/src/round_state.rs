use obsidian_qbft_types::message::{Commit, Prepare, Preprepare};
use obsidian_qbft_types::{Digest, Proposal, View};

use crate::msg_set::MessageSet;

/// Where the state machine stands within one (sequence, round).
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum State {
    /// Waiting for a proposal (or for our own turn to propose).
    AcceptRequest,
    /// Accepted a PRE-PREPARE, accumulating PREPAREs.
    Preprepared,
    /// Reached a PREPARE quorum, accumulating COMMITs.
    Prepared,
    /// Reached a COMMIT quorum and handed the block to the committer.
    Committed,
    /// Abandoned the round, accumulating ROUND-CHANGEs.
    WaitingForRoundChange,
}

/// A prepared certificate: quorum proof that this node locked onto a
/// digest at a round. Carried across round changes and into
/// ROUND-CHANGE justifications.
#[derive(Clone, Debug)]
pub struct PreparedCertificate {
    pub round: u64,
    pub block: Proposal,
    pub prepares: Vec<Prepare>,
}

/// Per-(sequence, round) accumulator.
pub struct RoundState {
    view: View,
    preprepare: Option<Preprepare>,
    prepares: MessageSet<Prepare>,
    commits: MessageSet<Commit>,
    /// The lock carried over from earlier rounds of this sequence.
    pub prepared: Option<PreparedCertificate>,
    /// The round we last broadcast our own PRE-PREPARE in, so a
    /// proposer never proposes twice for one round.
    pub preprepare_sent: Option<u64>,
    /// Set when the committer rejected a proposal this node had
    /// prepared; relaxes digest checks in outgoing round changes.
    pub has_bad_proposal: bool,
}

impl RoundState {
    pub fn new(view: View, prepared: Option<PreparedCertificate>) -> Self {
        Self {
            view,
            preprepare: None,
            prepares: MessageSet::new(view),
            commits: MessageSet::new(view),
            prepared,
            preprepare_sent: None,
            has_bad_proposal: false,
        }
    }

    pub fn view(&self) -> View {
        self.view
    }

    pub fn sequence(&self) -> u64 {
        self.view.sequence
    }

    pub fn round(&self) -> u64 {
        self.view.round
    }

    pub fn set_preprepare(&mut self, preprepare: Preprepare) {
        self.preprepare = Some(preprepare);
    }

    pub fn preprepare(&self) -> Option<&Preprepare> {
        self.preprepare.as_ref()
    }

    /// The proposal under negotiation this round, if one was accepted.
    pub fn proposal(&self) -> Option<&Proposal> {
        self.preprepare.as_ref().map(|pp| &pp.proposal)
    }

    pub fn proposal_digest(&self) -> Option<Digest> {
        self.proposal().map(Proposal::hash)
    }

    pub fn prepares(&self) -> &MessageSet<Prepare> {
        &self.prepares
    }

    pub fn prepares_mut(&mut self) -> &mut MessageSet<Prepare> {
        &mut self.prepares
    }

    pub fn commits(&self) -> &MessageSet<Commit> {
        &self.commits
    }

    pub fn commits_mut(&mut self) -> &mut MessageSet<Commit> {
        &mut self.commits
    }

    pub fn prepared_round(&self) -> Option<u64> {
        self.prepared.as_ref().map(|cert| cert.round)
    }

    pub fn prepared_block(&self) -> Option<&Proposal> {
        self.prepared.as_ref().map(|cert| &cert.block)
    }

    /// Records the PREPARE-quorum lock for the current round.
    pub fn set_prepared(&mut self, block: Proposal, prepares: Vec<Prepare>) {
        self.prepared = Some(PreparedCertificate {
            round: self.view.round,
            block,
            prepares,
        });
    }
}
