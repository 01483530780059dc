//! Integration tests for opponent scheduling: tickets, stale replies,
//! timeouts and retries.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chess_core::{Position, Side};
use session_sync::{
    EventOutcome, MemoryStore, OpponentMoveSource, OpponentReply, OpponentSettings,
    PlayerAssignment, SessionConfig, SessionError, SessionNotice, SyncPhase, Synchronizer,
    ENGINE_PLAYER_ID,
};

fn engine_session(
    opponent: Arc<dyn OpponentMoveSource>,
    config: SessionConfig,
) -> (
    Synchronizer,
    tokio::sync::mpsc::UnboundedReceiver<session_sync::SessionEvent>,
) {
    let ctx = common::context(Arc::new(MemoryStore::new()), config).with_opponent(opponent);
    Synchronizer::new(ctx, common::room("alice:engine"))
}

#[tokio::test]
async fn test_opponent_replies_after_user_move() {
    let opponent = common::ScriptedOpponent::new(&["e7e5"]);
    let (mut sync, mut events) = engine_session(opponent.clone(), common::fast_config());
    assert_eq!(sync.opponent_side(), Some(Side::Black));

    sync.submit_move("e2", "e4", None).unwrap();
    assert_eq!(sync.phase(), SyncPhase::AwaitingOpponentMove);
    assert!(matches!(
        sync.submit_move("d7", "d5", None),
        Err(SessionError::OpponentToMove)
    ));

    let outcome = common::wait_for(&mut sync, &mut events, |o| {
        matches!(o, EventOutcome::OpponentMoved(_))
    })
    .await;
    let EventOutcome::OpponentMoved(record) = outcome else {
        unreachable!()
    };
    assert_eq!(record.notation, "e5");
    assert_eq!(sync.state().history.len(), 2);
    assert_eq!(sync.state().side_to_move, Side::White);
    assert_eq!(sync.phase(), SyncPhase::Idle);
    assert_eq!(opponent.calls(), 1);
}

#[tokio::test]
async fn test_engine_playing_white_moves_first() {
    let (opponent, mut requests) = common::ManualOpponent::new();
    let (mut sync, mut events) = engine_session(opponent, common::fast_config());

    sync.assign_players(PlayerAssignment::new(ENGINE_PLAYER_ID, "alice"))
        .unwrap();
    assert_eq!(sync.opponent_side(), Some(Side::White));
    assert_eq!(sync.phase(), SyncPhase::AwaitingOpponentMove);

    let request = requests.recv().await.unwrap();
    assert_eq!(request.position, Position::initial());
    assert_eq!(request.depth, OpponentSettings::default().depth);
    request.answer("d2d4");

    let outcome = common::wait_for(&mut sync, &mut events, |o| {
        matches!(o, EventOutcome::OpponentMoved(_))
    })
    .await;
    assert!(matches!(outcome, EventOutcome::OpponentMoved(r) if r.uci == "d2d4"));
    assert_eq!(sync.state().side_to_move, Side::Black);

    assert!(matches!(
        sync.assign_players(PlayerAssignment::new("alice", ENGINE_PLAYER_ID)),
        Err(SessionError::PlayersAlreadyAssigned)
    ));
}

#[tokio::test]
async fn test_reply_after_undo_is_ignored() {
    let (opponent, mut requests) = common::ManualOpponent::new();
    let (mut sync, _events) = engine_session(opponent, common::fast_config());

    sync.submit_move("e2", "e4", None).unwrap();
    let ticket = sync.pending_ticket().expect("opponent request in flight");
    let requested_for = sync.state().position.clone();
    let _request = requests.recv().await.unwrap();

    sync.undo_last().unwrap();
    assert_eq!(sync.pending_ticket(), None);
    let after_undo = sync.state().clone();

    let outcome = sync.apply_opponent_move(OpponentReply {
        ticket,
        requested_for,
        attempt: 1,
        outcome: Ok("e7e5".into()),
    });

    assert_eq!(outcome, EventOutcome::Ignored);
    assert_eq!(sync.state(), &after_undo);
    assert_eq!(sync.state().position, Position::initial());
}

#[tokio::test]
async fn test_reply_for_another_position_is_discarded_and_reissued() {
    let (opponent, mut requests) = common::ManualOpponent::new();
    let (mut sync, _events) = engine_session(opponent, common::fast_config());

    sync.submit_move("e2", "e4", None).unwrap();
    let ticket = sync.pending_ticket().unwrap();
    let _first = requests.recv().await.unwrap();
    let before = sync.state().clone();

    let outcome = sync.apply_opponent_move(OpponentReply {
        ticket,
        requested_for: Position::initial(),
        attempt: 1,
        outcome: Ok("e7e5".into()),
    });

    assert_eq!(outcome, EventOutcome::StaleDiscarded);
    assert_eq!(sync.state(), &before);
    let reissued = sync.pending_ticket().expect("a fresh request");
    assert_ne!(reissued, ticket);

    let second = requests.recv().await.unwrap();
    assert_eq!(second.position, before.position);
}

#[tokio::test]
async fn test_illegal_suggestion_is_retried() {
    let opponent = common::ScriptedOpponent::new(&["e2e4", "e7e5"]);
    let (mut sync, mut events) = engine_session(opponent.clone(), common::fast_config());

    sync.submit_move("d2", "d4", None).unwrap();

    let first = common::next_outcome(&mut sync, &mut events).await;
    let first = if matches!(first, EventOutcome::Persisted { .. }) {
        common::next_outcome(&mut sync, &mut events).await
    } else {
        first
    };
    assert_eq!(first, EventOutcome::OpponentRetrying { attempt: 2 });

    common::wait_for(&mut sync, &mut events, |o| {
        matches!(o, EventOutcome::OpponentMoved(_))
    })
    .await;
    assert_eq!(sync.state().history.len(), 2);
    assert_eq!(opponent.calls(), 2);
}

#[tokio::test]
async fn test_timeouts_exhaust_retries_then_notice() {
    let opponent = common::ScriptedOpponent::with_delay(&["e7e5"], Duration::from_secs(5));
    let config = SessionConfig {
        opponent: OpponentSettings {
            timeout: Duration::from_millis(30),
            backoff: Duration::from_millis(5),
            max_attempts: 3,
            ..OpponentSettings::default()
        },
        ..SessionConfig::default()
    };
    let (mut sync, mut events) = engine_session(opponent.clone(), config);

    sync.submit_move("e2", "e4", None).unwrap();

    let outcome = common::wait_for(&mut sync, &mut events, |o| {
        matches!(o, EventOutcome::Notice(_))
    })
    .await;
    assert!(matches!(
        outcome,
        EventOutcome::Notice(SessionNotice::OpponentUnavailable { attempts: 3, .. })
    ));
    assert_eq!(opponent.calls(), 3);
    assert_eq!(sync.phase(), SyncPhase::Idle);
    assert!(sync.notice().is_some());
    assert_eq!(sync.state().history.len(), 1, "state must not change");

    // Still the engine's move, so the user cannot play for it
    assert!(matches!(
        sync.submit_move("e7", "e5", None),
        Err(SessionError::OpponentToMove)
    ));

    // A manual re-request clears the notice
    sync.request_opponent_move().unwrap();
    assert!(sync.notice().is_none());
    assert_eq!(sync.phase(), SyncPhase::AwaitingOpponentMove);
}

#[tokio::test]
async fn test_request_opponent_move_requires_its_turn() {
    let opponent = common::ScriptedOpponent::new(&[]);
    let (mut sync, _events) = engine_session(opponent, common::fast_config());

    assert!(matches!(
        sync.request_opponent_move(),
        Err(SessionError::NotOpponentTurn)
    ));
}

#[tokio::test]
async fn test_reset_cancels_pending_request() {
    let (opponent, mut requests) = common::ManualOpponent::new();
    let (mut sync, _events) = engine_session(opponent, common::fast_config());

    sync.submit_move("e2", "e4", None).unwrap();
    let ticket = sync.pending_ticket().unwrap();
    let request = requests.recv().await.unwrap();

    sync.reset_session();
    assert_eq!(sync.pending_ticket(), None);
    assert_eq!(sync.phase(), SyncPhase::Idle);

    // The engine answering late changes nothing
    request.answer("e7e5");
    let outcome = sync.apply_opponent_move(OpponentReply {
        ticket,
        requested_for: Position::initial(),
        attempt: 1,
        outcome: Ok("e7e5".into()),
    });
    assert_eq!(outcome, EventOutcome::Ignored);
    assert!(sync.state().history.is_empty());
}

#[tokio::test]
async fn test_undo_turn_takes_back_reply_and_move() {
    let opponent = common::ScriptedOpponent::new(&["e7e5"]);
    let (mut sync, mut events) = engine_session(opponent.clone(), common::fast_config());

    sync.submit_move("e2", "e4", None).unwrap();
    common::wait_for(&mut sync, &mut events, |o| {
        matches!(o, EventOutcome::OpponentMoved(_))
    })
    .await;

    assert_eq!(sync.undo_turn().unwrap(), 2);
    assert_eq!(sync.state().position, Position::initial());
    assert!(sync.state().history.is_empty());
    assert_eq!(sync.pending_ticket(), None);
    assert_eq!(sync.phase(), SyncPhase::Idle);
    assert_eq!(opponent.calls(), 1);
}

#[tokio::test]
async fn test_undo_turn_while_engine_thinks() {
    let (opponent, mut requests) = common::ManualOpponent::new();
    let (mut sync, _events) = engine_session(opponent, common::fast_config());

    sync.submit_move("e2", "e4", None).unwrap();
    let ticket = sync.pending_ticket().unwrap();
    let request = requests.recv().await.unwrap();

    // Only the user's move is on the board yet
    assert_eq!(sync.undo_turn().unwrap(), 1);
    assert_eq!(sync.state().position, Position::initial());
    assert_eq!(sync.pending_ticket(), None);

    let requested_for = request.position.clone();
    request.answer("e7e5");
    let outcome = sync.apply_opponent_move(OpponentReply {
        ticket,
        requested_for,
        attempt: 1,
        outcome: Ok("e7e5".into()),
    });
    assert_eq!(outcome, EventOutcome::Ignored);
    assert!(sync.state().history.is_empty());
}
