mod common;

use common::*;
use obsidian_qbft_core::{BackendError, ConsensusError, Event, State, VerifyError};
use obsidian_qbft_types::extra::commit_seal_preimage;
use obsidian_qbft_types::message::{
    Commit, ConsensusPayload, Message, Prepare, Preprepare, COMMIT_CODE, PREPARE_CODE,
    PREPREPARE_CODE, ROUND_CHANGE_CODE,
};
use obsidian_qbft_types::View;

/// Happy path with N=4, f=1, quorum=3. One validator's
/// view of the protocol: accept the proposer's PRE-PREPARE, vote
/// PREPARE, reach the PREPARE quorum, vote COMMIT, reach the COMMIT
/// quorum, and commit the block with three seals at round 0.
#[test_log::test(tokio::test)]
async fn happy_path_commits_at_round_zero() {
    let keys = keys::<4>();
    let set = validator_set(&keys);
    let proposer = proposer_index(&set, &keys, 1, 0);
    // Run the node that is NOT the proposer at (1, 0).
    let me = (proposer + 1) % 4;
    let mut node = test_node(&keys, me, 1);

    assert_eq!(node.core.state(), State::AcceptRequest);
    assert_eq!(node.core.current_view(), Some(View::new(1, 0)));
    assert_eq!(node.core.quorum(), 3);

    // Proposer broadcasts PRE-PREPARE(seq=1, round=0, digest=D).
    let block = build_proposal(1, &set);
    let mut preprepare = Preprepare::new(1, 0, block.clone());
    preprepare.sign(&keys[proposer].1).unwrap();
    node.core.handle_event(Event::Message {
        code: PREPREPARE_CODE,
        payload: alloy_rlp::encode(&preprepare).into(),
    });

    assert_eq!(node.core.state(), State::Preprepared);

    // We answered with a PREPARE for the proposal digest.
    let broadcasts = node.recorded.take_broadcasts();
    assert_eq!(broadcasts.len(), 1);
    let (code, payload) = &broadcasts[0];
    assert_eq!(*code, PREPARE_CODE);
    match decode_broadcast(*code, payload) {
        Message::Prepare(prepare) => assert_eq!(prepare.digest, block.hash()),
        other => panic!("expected PREPARE, got {other:?}"),
    }

    // Our own PREPARE loops back, plus two peers: quorum of 3.
    node.core.handle_event(Event::Message {
        code: PREPARE_CODE,
        payload: payload.clone(),
    });
    for (_, key) in keys.iter().enumerate().filter(|(i, _)| *i != me).map(|(_, kv)| kv).take(2) {
        let (code, payload) = signed_prepare(key, 1, 0, block.hash());
        node.core.handle_event(Event::Message { code, payload });
    }
    node.drain_events();

    assert_eq!(node.core.state(), State::Prepared);
    let prepared = node.core.round_state().unwrap();
    assert_eq!(prepared.prepared_round(), Some(0));
    assert_eq!(prepared.prepared_block().unwrap().hash(), block.hash());

    // We broadcast a COMMIT; loop it back and add two peers.
    let broadcasts = node.recorded.take_broadcasts();
    assert_eq!(broadcasts.len(), 1);
    assert_eq!(broadcasts[0].0, COMMIT_CODE);
    node.core.handle_event(Event::Message {
        code: COMMIT_CODE,
        payload: broadcasts[0].1.clone(),
    });
    for (_, key) in keys.iter().enumerate().filter(|(i, _)| *i != me).map(|(_, kv)| kv).take(2) {
        let (code, payload) = signed_commit(key, 1, 0, &block);
        node.core.handle_event(Event::Message { code, payload });
    }
    node.drain_events();

    assert_eq!(node.core.state(), State::Committed);
    let committed = node.recorded.committed();
    assert_eq!(committed.len(), 1);
    let (number, digest, seals, round) = committed[0];
    assert_eq!(number, 1);
    assert_eq!(digest, block.hash());
    assert_eq!(seals, 3);
    assert_eq!(round, 0);

    // The chain head moves; consensus advances to the next sequence.
    node.handle.final_committed(1, keys[proposer].0.address);
    node.drain_events();
    assert_eq!(node.core.current_view(), Some(View::new(2, 0)));
    assert_eq!(node.core.state(), State::AcceptRequest);
}

/// The proposer proposes its own pending request, accepts its own
/// PRE-PREPARE off the loopback, and votes PREPARE.
#[test_log::test(tokio::test)]
async fn proposer_proposes_and_preprepares() {
    let keys = keys::<4>();
    let set = validator_set(&keys);
    let me = proposer_index(&set, &keys, 1, 0);
    let mut node = test_node(&keys, me, 1);

    let block = build_proposal(1, &set);
    node.handle
        .submit_request(obsidian_qbft_core::Request {
            proposal: block.clone(),
        });
    node.drain_events();

    // The PRE-PREPARE went out with no justification at round 0.
    let broadcasts = node.recorded.take_broadcasts();
    assert_eq!(broadcasts.len(), 1);
    assert_eq!(broadcasts[0].0, PREPREPARE_CODE);
    match decode_broadcast(broadcasts[0].0, &broadcasts[0].1) {
        Message::Preprepare(pp) => {
            assert_eq!(pp.proposal.hash(), block.hash());
            assert!(pp.justification_round_changes.is_empty());
            assert!(pp.justification_prepares.is_empty());
        }
        other => panic!("expected PRE-PREPARE, got {other:?}"),
    }

    // Loop it back: the proposer accepts its own proposal and votes.
    node.core.handle_event(Event::Message {
        code: broadcasts[0].0,
        payload: broadcasts[0].1.clone(),
    });
    assert_eq!(node.core.state(), State::Preprepared);
    let follow_up = node.recorded.take_broadcasts();
    assert_eq!(follow_up.len(), 1);
    assert_eq!(follow_up[0].0, PREPARE_CODE);
}

/// A PRE-PREPARE from anyone but the round's proposer is dropped.
#[test_log::test(tokio::test)]
async fn preprepare_from_non_proposer_is_rejected() {
    let keys = keys::<4>();
    let set = validator_set(&keys);
    let proposer = proposer_index(&set, &keys, 1, 0);
    let wrong = (proposer + 1) % 4;
    let me = (proposer + 2) % 4;
    let mut node = test_node(&keys, me, 1);

    let block = build_proposal(1, &set);
    let mut preprepare = Preprepare::new(1, 0, block);
    preprepare.sign(&keys[wrong].1).unwrap();

    let mut recovered = preprepare.clone();
    recovered.recover_source().unwrap();
    assert_eq!(
        node.core.handle_message(recovered.into()),
        Err(ConsensusError::NotFromProposer)
    );
    assert_eq!(node.core.state(), State::AcceptRequest);
    assert!(node.recorded.take_broadcasts().is_empty());
}

/// A round timeout abandons the round: WaitingForRoundChange plus a
/// broadcast ROUND-CHANGE asking for round+1.
#[test_log::test(tokio::test)]
async fn round_timeout_issues_round_change() {
    let keys = keys::<4>();
    let me = 0;
    let mut node = test_node(&keys, me, 1);

    node.core.handle_event(Event::RoundTimeout(View::new(1, 0)));

    assert_eq!(node.core.state(), State::WaitingForRoundChange);
    assert_eq!(node.core.current_view(), Some(View::new(1, 1)));

    let broadcasts = node.recorded.take_broadcasts();
    assert_eq!(broadcasts.len(), 1);
    assert_eq!(broadcasts[0].0, ROUND_CHANGE_CODE);
    match decode_broadcast(broadcasts[0].0, &broadcasts[0].1) {
        Message::RoundChange(rc) => {
            assert_eq!(rc.view(), View::new(1, 1));
            assert_eq!(rc.prepared_round(), None);
        }
        other => panic!("expected ROUND-CHANGE, got {other:?}"),
    }
}

/// A stale timer for a view we already left must not disturb the
/// current round.
#[test_log::test(tokio::test)]
async fn stale_round_timeout_is_ignored() {
    let keys = keys::<4>();
    let mut node = test_node(&keys, 0, 1);

    node.core.handle_event(Event::RoundTimeout(View::new(1, 0)));
    assert_eq!(node.core.current_view(), Some(View::new(1, 1)));
    node.recorded.take_broadcasts();

    // The old round's timer fires late.
    node.core.handle_event(Event::RoundTimeout(View::new(1, 0)));
    assert_eq!(node.core.current_view(), Some(View::new(1, 1)));
    assert!(node.recorded.take_broadcasts().is_empty());
}

/// f+1 ROUND-CHANGEs at one future round pull the node up to that
/// round (they cannot all be Byzantine), and it broadcasts its own
/// ROUND-CHANGE for it.
#[test_log::test(tokio::test)]
async fn f_plus_one_round_changes_trigger_catch_up() {
    let keys = keys::<4>();
    let me = 0;
    let mut node = test_node(&keys, me, 1);

    for key in [&keys[1].1, &keys[2].1] {
        let (code, payload) = signed_round_change(key, 1, 5);
        node.core.handle_event(Event::Message { code, payload });
    }

    assert_eq!(node.core.current_view(), Some(View::new(1, 5)));
    assert_eq!(node.core.state(), State::WaitingForRoundChange);

    let broadcasts = node.recorded.take_broadcasts();
    assert!(broadcasts.iter().any(|(code, payload)| {
        *code == ROUND_CHANGE_CODE
            && matches!(
                decode_broadcast(*code, payload),
                Message::RoundChange(rc) if rc.view() == View::new(1, 5)
            )
    }));
}

/// A quorum of ROUND-CHANGEs at the node's round starts it: back to
/// AcceptRequest, and the new proposer proposes with a justification.
#[test_log::test(tokio::test)]
async fn round_change_quorum_starts_round_with_justified_preprepare() {
    let keys = keys::<4>();
    let set = validator_set(&keys);
    // Choose the node that proposes at (1, 1).
    let me = proposer_index(&set, &keys, 1, 1);
    let mut node = test_node(&keys, me, 1);

    // Give the proposer something to propose.
    node.handle
        .submit_request(obsidian_qbft_core::Request {
            proposal: build_proposal(1, &set),
        });
    node.drain_events();
    node.recorded.take_broadcasts();

    // Our round times out; we move to round 1 waiting.
    node.core.handle_event(Event::RoundTimeout(View::new(1, 0)));
    let own_rc = node.recorded.take_broadcasts();

    // Our own ROUND-CHANGE loops back, plus two peers: quorum of 3.
    node.core.handle_event(Event::Message {
        code: own_rc[0].0,
        payload: own_rc[0].1.clone(),
    });
    for key in [&keys[(me + 1) % 4].1, &keys[(me + 2) % 4].1] {
        let (code, payload) = signed_round_change(key, 1, 1);
        node.core.handle_event(Event::Message { code, payload });
    }
    node.drain_events();

    assert_eq!(node.core.state(), State::AcceptRequest);
    assert_eq!(node.core.current_view(), Some(View::new(1, 1)));

    let broadcasts = node.recorded.take_broadcasts();
    let preprepare = broadcasts
        .iter()
        .find(|(code, _)| *code == PREPREPARE_CODE)
        .expect("the new proposer must propose");
    match decode_broadcast(preprepare.0, &preprepare.1) {
        Message::Preprepare(pp) => {
            assert_eq!(pp.view(), View::new(1, 1));
            assert!(pp.justification_round_changes.len() >= 3);
            // Nobody was prepared, so no PREPARE justification rides
            // along.
            assert!(pp.justification_prepares.is_empty());
        }
        other => panic!("expected PRE-PREPARE, got {other:?}"),
    }
}

/// A failed commit abandons the round instead of retrying it: the
/// committer said no, so the node asks for round+1.
#[test_log::test(tokio::test)]
async fn commit_failure_issues_next_round_change() {
    let keys = keys::<4>();
    let set = validator_set(&keys);
    let proposer = proposer_index(&set, &keys, 1, 0);
    let me = (proposer + 1) % 4;
    let mut node = test_node(&keys, me, 1);

    *node.commit_outcome.lock().unwrap() = Some(BackendError("import failed".into()));

    let block = build_proposal(1, &set);
    let mut preprepare = Preprepare::new(1, 0, block.clone());
    preprepare.sign(&keys[proposer].1).unwrap();
    node.core.handle_event(Event::Message {
        code: PREPREPARE_CODE,
        payload: alloy_rlp::encode(&preprepare).into(),
    });

    let own_prepare = node.recorded.take_broadcasts();
    node.core.handle_event(Event::Message {
        code: own_prepare[0].0,
        payload: own_prepare[0].1.clone(),
    });
    for key in [&keys[proposer].1, &keys[(proposer + 2) % 4].1] {
        let (code, payload) = signed_prepare(key, 1, 0, block.hash());
        node.core.handle_event(Event::Message { code, payload });
    }
    node.drain_events();

    let own_commit = node.recorded.take_broadcasts();
    node.core.handle_event(Event::Message {
        code: own_commit[0].0,
        payload: own_commit[0].1.clone(),
    });
    for key in [&keys[proposer].1, &keys[(proposer + 2) % 4].1] {
        let (code, payload) = signed_commit(key, 1, 0, &block);
        node.core.handle_event(Event::Message { code, payload });
    }
    node.drain_events();

    // No block was written; the node moved on to round 1.
    assert!(node.recorded.committed().is_empty());
    assert_eq!(node.core.state(), State::WaitingForRoundChange);
    assert_eq!(node.core.current_view(), Some(View::new(1, 1)));

    let broadcasts = node.recorded.take_broadcasts();
    let rc = broadcasts
        .iter()
        .find(|(code, _)| *code == ROUND_CHANGE_CODE)
        .expect("commit failure must trigger a round change");
    match decode_broadcast(rc.0, &rc.1) {
        Message::RoundChange(rc) => {
            assert_eq!(rc.view(), View::new(1, 1));
            // The prepared certificate rides along into the new round.
            assert_eq!(rc.prepared_round(), Some(0));
            assert_eq!(rc.prepared_digest(), block.hash());
            assert_eq!(rc.justification.len(), 3);
        }
        other => panic!("expected ROUND-CHANGE, got {other:?}"),
    }
}

/// A future-block verdict schedules a retry instead of dropping the
/// proposal outright.
#[test_log::test(tokio::test)]
async fn future_block_is_retried_after_the_reported_delay() {
    let keys = keys::<4>();
    let set = validator_set(&keys);
    let proposer = proposer_index(&set, &keys, 1, 0);
    let me = (proposer + 1) % 4;
    let mut node = test_node(&keys, me, 1);

    *node.verify_outcome.lock().unwrap() =
        Some(VerifyError::FutureBlock(std::time::Duration::from_millis(10)));

    let block = build_proposal(1, &set);
    let mut preprepare = Preprepare::new(1, 0, block.clone());
    preprepare.sign(&keys[proposer].1).unwrap();
    node.core.handle_event(Event::Message {
        code: PREPREPARE_CODE,
        payload: alloy_rlp::encode(&preprepare).into(),
    });

    // Not accepted yet.
    assert_eq!(node.core.state(), State::AcceptRequest);

    // Once the verifier's clock catches up, the retried message lands.
    *node.verify_outcome.lock().unwrap() = None;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    node.drain_events();

    assert_eq!(node.core.state(), State::Preprepared);
}

/// While waiting for a round change, same-view PREPARE and COMMIT
/// messages go straight to their handlers instead of the backlog; with
/// no accepted proposal for the round they are rejected on the spot.
#[test_log::test(tokio::test)]
async fn waiting_state_dispatches_current_view_messages_instead_of_backlogging() {
    let keys = keys::<4>();
    let set = validator_set(&keys);
    let mut node = test_node(&keys, 0, 1);

    // Our round times out; we wait for round changes at (1, 1).
    node.core.handle_event(Event::RoundTimeout(View::new(1, 0)));
    assert_eq!(node.core.state(), State::WaitingForRoundChange);
    node.recorded.take_broadcasts();

    let block = build_proposal(1, &set);

    let mut prepare = Prepare::new(1, 1, block.hash());
    prepare.sign(&keys[1].1).unwrap();
    prepare.recover_source().unwrap();
    assert_eq!(
        node.core.handle_message(prepare.into()),
        Err(ConsensusError::InvalidMessage)
    );
    assert_eq!(node.core.backlog_total(), 0);

    let preimage = commit_seal_preimage(block.header(), 1).unwrap();
    let seal = keys[2].1.sign_prehashed(&preimage).unwrap();
    let mut commit = Commit::new(1, 1, block.hash(), seal);
    commit.sign(&keys[2].1).unwrap();
    commit.recover_source().unwrap();
    assert_eq!(
        node.core.handle_message(commit.into()),
        Err(ConsensusError::InvalidMessage)
    );
    assert_eq!(node.core.backlog_total(), 0);
    assert_eq!(node.core.state(), State::WaitingForRoundChange);
}
