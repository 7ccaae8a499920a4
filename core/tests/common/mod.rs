#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use alloy_consensus::Header;
use alloy_primitives::B256;
use bytes::Bytes;
use obsidian_qbft_core::{
    Backend, BackendError, Core, CoreHandle, Event, QbftConfig, VerifyError,
};
use obsidian_qbft_types::extra::{apply_header_extra, commit_seal_preimage, write_validators};
use obsidian_qbft_types::message::{
    Commit, ConsensusPayload, Message, Prepare, RoundChange,
};
use obsidian_qbft_types::signing::secp256k1::SigningError;
use obsidian_qbft_types::{
    Address, PrivateKey, Proposal, Signature, Validator, ValidatorSet,
};
use tokio::sync::mpsc;

/// Deterministic validator keys shared by every consensus test.
pub fn keys<const N: usize>() -> [(Validator, PrivateKey); N] {
    obsidian_qbft_types::utils::validators::make_validators::<N>()
}

pub fn validator_set(keys: &[(Validator, PrivateKey)]) -> ValidatorSet {
    ValidatorSet::round_robin(keys.iter().map(|(v, _)| v.address).collect())
}

/// Index into `keys` of the validator proposing at (sequence, round)
/// under the round-robin policy.
pub fn proposer_index(
    set: &ValidatorSet,
    keys: &[(Validator, PrivateKey)],
    sequence: u64,
    round: u64,
) -> usize {
    let proposer = set
        .proposer(&obsidian_qbft_types::View::new(sequence, round), None)
        .unwrap()
        .address;
    keys.iter().position(|(v, _)| v.address == proposer).unwrap()
}

/// A block proposal for `number` carrying the validator set in its
/// extra-data, the way a sealing miner would hand it over.
pub fn build_proposal(number: u64, set: &ValidatorSet) -> Proposal {
    let mut header = Header {
        number,
        gas_limit: 30_000_000,
        timestamp: number,
        ..Default::default()
    };
    apply_header_extra(&mut header, |extra| {
        write_validators(extra, set.addresses().collect());
        Ok(())
    })
    .unwrap();
    Proposal::new(header)
}

/// Recorded collaborator traffic, shared with the test body.
#[derive(Clone, Default)]
pub struct Recorded {
    pub broadcasts: Arc<Mutex<Vec<(u64, Bytes)>>>,
    pub commits: Arc<Mutex<Vec<(u64, B256, usize, u64)>>>,
}

impl Recorded {
    /// Drains and returns every broadcast recorded so far.
    pub fn take_broadcasts(&self) -> Vec<(u64, Bytes)> {
        std::mem::take(&mut *self.broadcasts.lock().unwrap())
    }

    pub fn committed(&self) -> Vec<(u64, B256, usize, u64)> {
        self.commits.lock().unwrap().clone()
    }
}

/// In-memory backend: signs with a real key, records broadcasts and
/// commits, and returns configurable verify / commit outcomes.
pub struct TestBackend {
    key: PrivateKey,
    validators: ValidatorSet,
    pub recorded: Recorded,
    pub verify_outcome: Arc<Mutex<Option<VerifyError>>>,
    pub commit_outcome: Arc<Mutex<Option<BackendError>>>,
}

impl TestBackend {
    pub fn new(key: PrivateKey, validators: ValidatorSet) -> Self {
        Self {
            key,
            validators,
            recorded: Recorded::default(),
            verify_outcome: Arc::new(Mutex::new(None)),
            commit_outcome: Arc::new(Mutex::new(None)),
        }
    }
}

impl Backend for TestBackend {
    fn sign(&self, payload: &[u8]) -> Result<Signature, SigningError> {
        self.key.sign(payload)
    }

    fn sign_without_hashing(&self, prehash: &B256) -> Result<Signature, SigningError> {
        self.key.sign_prehashed(prehash)
    }

    fn broadcast(
        &self,
        _validators: &ValidatorSet,
        code: u64,
        payload: Bytes,
    ) -> Result<(), BackendError> {
        self.recorded
            .broadcasts
            .lock()
            .unwrap()
            .push((code, payload));
        Ok(())
    }

    fn verify(&self, _proposal: &Proposal) -> Result<(), VerifyError> {
        match self.verify_outcome.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn commit(
        &self,
        proposal: &Proposal,
        seals: &[Signature],
        round: u64,
    ) -> Result<(), BackendError> {
        if let Some(err) = self.commit_outcome.lock().unwrap().clone() {
            return Err(err);
        }
        self.recorded.commits.lock().unwrap().push((
            proposal.number(),
            proposal.hash(),
            seals.len(),
            round,
        ));
        Ok(())
    }

    fn validators(&self, _sequence: u64) -> ValidatorSet {
        self.validators.clone()
    }
}

/// A core under test at `keys[index]`, with its recorded traffic and
/// the event receiver for draining self-posted events.
pub struct TestNode {
    pub core: Core<TestBackend>,
    pub handle: CoreHandle,
    pub rx: mpsc::UnboundedReceiver<Event>,
    pub recorded: Recorded,
    pub verify_outcome: Arc<Mutex<Option<VerifyError>>>,
    pub commit_outcome: Arc<Mutex<Option<BackendError>>>,
    pub address: Address,
}

/// `index` addresses into `keys` (generation order), matching what
/// [`proposer_index`] returns.
pub fn test_node(keys: &[(Validator, PrivateKey)], index: usize, sequence: u64) -> TestNode {
    let set = validator_set(keys);
    let address = keys[index].0.address;
    let key = keys[index].1.clone();

    let backend = TestBackend::new(key, set.clone());
    let recorded = backend.recorded.clone();
    let verify_outcome = backend.verify_outcome.clone();
    let commit_outcome = backend.commit_outcome.clone();

    let (mut core, handle, rx) = Core::new(address, QbftConfig::default(), backend);
    core.start(sequence);

    TestNode {
        core,
        handle,
        rx,
        recorded,
        verify_outcome,
        commit_outcome,
        address,
    }
}

impl TestNode {
    /// Handles every event the core posted to itself (backlog drains,
    /// timer firings already delivered).
    pub fn drain_events(&mut self) {
        while let Ok(event) = self.rx.try_recv() {
            self.core.handle_event(event);
        }
    }

    /// Feeds the node's own recorded broadcasts back into it, the way
    /// the gossip layer loops a validator's messages to itself.
    pub fn deliver_own_broadcasts(&mut self) {
        for (code, payload) in self.recorded.take_broadcasts() {
            self.core.handle_event(Event::Message { code, payload });
        }
        self.drain_events();
    }
}

/// Wire-encodes a signed PREPARE from `key`.
pub fn signed_prepare(key: &PrivateKey, sequence: u64, round: u64, digest: B256) -> (u64, Bytes) {
    let mut prepare = Prepare::new(sequence, round, digest);
    prepare.sign(key).unwrap();
    (
        obsidian_qbft_types::message::PREPARE_CODE,
        Bytes::from(alloy_rlp::encode(&prepare)),
    )
}

/// Wire-encodes a signed COMMIT from `key`, with a real commit seal
/// over the proposal header at `round`.
pub fn signed_commit(
    key: &PrivateKey,
    sequence: u64,
    round: u64,
    proposal: &Proposal,
) -> (u64, Bytes) {
    let preimage = commit_seal_preimage(proposal.header(), round as u32).unwrap();
    let seal = key.sign_prehashed(&preimage).unwrap();
    let mut commit = Commit::new(sequence, round, proposal.hash(), seal);
    commit.sign(key).unwrap();
    (
        obsidian_qbft_types::message::COMMIT_CODE,
        Bytes::from(alloy_rlp::encode(&commit)),
    )
}

/// Wire-encodes a signed ROUND-CHANGE without a prepared certificate.
pub fn signed_round_change(key: &PrivateKey, sequence: u64, round: u64) -> (u64, Bytes) {
    let mut rc = RoundChange::new(sequence, round, None, None, false);
    rc.sign(key).unwrap();
    (
        obsidian_qbft_types::message::ROUND_CHANGE_CODE,
        Bytes::from(alloy_rlp::encode(&rc)),
    )
}

/// Decodes a recorded broadcast back into a message.
pub fn decode_broadcast(code: u64, payload: &Bytes) -> Message {
    obsidian_qbft_types::message::decode(code, payload).unwrap()
}
