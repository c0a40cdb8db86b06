#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Integration tests for the lobby and game sessions: snapshot merges,
//! event application, reconnect recovery, command pre-flight, and scope
//! teardown — all against scripted transports and a scripted backend.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use common::MockBackend;
use minerace_client::protocol::{Cell, CellState, Field, Participant, RoomStatus};
use minerace_client::{
    CredentialSource, GameConfig, GameSession, GameUpdate, LobbyConfig, LobbyFilter, LobbyRoom,
    LobbySession, LobbyUpdate, MemoryCredentials, MineraceError,
};

fn creds() -> Arc<dyn CredentialSource> {
    Arc::new(MemoryCredentials::with_token("tok123"))
}

// ── Helpers ─────────────────────────────────────────────────────────

async fn next_rooms(updates: &mut mpsc::Receiver<LobbyUpdate>) -> Vec<LobbyRoom> {
    loop {
        match updates.recv().await.expect("update stream ended early") {
            LobbyUpdate::Rooms(rooms) => return rooms,
            LobbyUpdate::LoadFailed(e) => panic!("unexpected load failure: {e}"),
        }
    }
}

fn ids(rooms: &[LobbyRoom]) -> Vec<&str> {
    rooms.iter().map(|r| r.room.id.as_str()).collect()
}

fn closed_board() -> Field {
    Field::closed(8, 8, 10)
}

fn board_with_revealed(row: usize, col: usize, adjacency: u8) -> Field {
    let mut field = closed_board();
    field.cells_open = 1;
    if let Some(cell) = field.grid.get_mut(row).and_then(|r| r.get_mut(col)) {
        *cell = Cell {
            value: CellState::Revealed(adjacency),
            is_open: true,
        };
    }
    field
}

fn playing_participants() -> Vec<Participant> {
    vec![
        Participant {
            field: Some(closed_board()),
            ..common::participant(1, "alice", true)
        },
        Participant {
            field: Some(closed_board()),
            ..common::participant(2, "bob", false)
        },
    ]
}

/// A backend primed with a started two-player match in room `r1`.
fn started_backend() -> Arc<MockBackend> {
    let backend = Arc::new(MockBackend::default());
    *backend.detail.lock().unwrap() = Some(common::detail(
        "r1",
        RoomStatus::Started,
        vec![common::user(1, "alice"), common::user(2, "bob")],
    ));
    *backend.participants.lock().unwrap() = playing_participants();
    backend
}

async fn started_session(
    backend: Arc<MockBackend>,
    streams: usize,
) -> (
    GameSession,
    mpsc::Receiver<GameUpdate>,
    Vec<common::ScriptHandle>,
) {
    let (connector, handles, _dials, _sent) = common::scripted_connector(streams);
    let (session, mut updates) = GameSession::start(
        backend,
        connector,
        creds(),
        "r1".into(),
        common::user(1, "alice"),
        GameConfig::default(),
    )
    .await
    .expect("session start");

    // The bootstrap snapshot is always the first update.
    assert!(matches!(
        updates.recv().await,
        Some(GameUpdate::Snapshot { .. })
    ));

    (session, updates, handles)
}

// ── Lobby scenarios ─────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn created_room_is_prepended_highlighted_and_expires() {
    let backend = Arc::new(MockBackend::default());
    *backend.rooms.lock().unwrap() = vec![common::room("r1", 1)];

    let (connector, handles, _dials, _sent) = common::scripted_connector(1);
    let (mut session, mut updates) = LobbySession::start(
        Arc::clone(&backend) as Arc<dyn minerace_client::Backend>,
        connector,
        creds(),
        LobbyConfig::default(),
    );

    // Initial snapshot.
    let rooms = next_rooms(&mut updates).await;
    assert_eq!(ids(&rooms), ["r1"]);

    // A freshly created room arrives over the stream: prepended, marked.
    handles[0].frame(common::create_room_frame(&common::room("r2", 0)));
    let rooms = next_rooms(&mut updates).await;
    assert_eq!(ids(&rooms), ["r2", "r1"]);
    assert!(rooms[0].is_new);
    assert!(!rooms[1].is_new);

    // After the display window the mark clears; order is unchanged.
    let rooms = next_rooms(&mut updates).await;
    assert_eq!(ids(&rooms), ["r2", "r1"]);
    assert!(!rooms[0].is_new);

    session.close().await;
}

#[tokio::test(start_paused = true)]
async fn filter_change_reloads_the_list() {
    let backend = Arc::new(MockBackend::default());
    *backend.rooms.lock().unwrap() = vec![common::room("r1", 1)];

    let (connector, _handles, _dials, _sent) = common::scripted_connector(1);
    let (mut session, mut updates) = LobbySession::start(
        Arc::clone(&backend) as Arc<dyn minerace_client::Backend>,
        connector,
        creds(),
        LobbyConfig::default(),
    );

    let rooms = next_rooms(&mut updates).await;
    assert_eq!(ids(&rooms), ["r1"]);

    // Switching to "my rooms" triggers a fresh load against the other
    // endpoint.
    *backend.rooms.lock().unwrap() = vec![common::room("r7", 2)];
    session.set_filter(LobbyFilter {
        query: String::new(),
        my_rooms: true,
    });

    let rooms = next_rooms(&mut updates).await;
    assert_eq!(ids(&rooms), ["r7"]);
    assert!(backend.calls().iter().any(|c| c == "my_rooms"));

    session.close().await;
}

#[tokio::test(start_paused = true)]
async fn lobby_reconnect_reloads_the_list() {
    let backend = Arc::new(MockBackend::default());
    *backend.rooms.lock().unwrap() = vec![common::room("r1", 1)];

    let (connector, handles, dials, _sent) = common::scripted_connector(2);
    let (mut session, mut updates) = LobbySession::start(
        Arc::clone(&backend) as Arc<dyn minerace_client::Backend>,
        connector,
        creds(),
        LobbyConfig::default(),
    );

    let rooms = next_rooms(&mut updates).await;
    assert_eq!(ids(&rooms), ["r1"]);

    // A room appears while the channel is down; its CREATE_ROOM event is
    // lost with the outage. The post-reconnect snapshot recovers it.
    *backend.rooms.lock().unwrap() = vec![common::room("r3", 0), common::room("r1", 1)];
    handles[0].close();

    let rooms = next_rooms(&mut updates).await;
    assert_eq!(ids(&rooms), ["r3", "r1"]);
    assert_eq!(dials.load(std::sync::atomic::Ordering::SeqCst), 2);

    session.close().await;
}

#[tokio::test(start_paused = true)]
async fn lobby_events_adjust_counters_and_remove_rooms() {
    let backend = Arc::new(MockBackend::default());
    *backend.rooms.lock().unwrap() = vec![common::room("r1", 1), common::room("r2", 3)];

    let (connector, handles, _dials, _sent) = common::scripted_connector(1);
    let (mut session, mut updates) = LobbySession::start(
        Arc::clone(&backend) as Arc<dyn minerace_client::Backend>,
        connector,
        creds(),
        LobbyConfig::default(),
    );

    let _ = next_rooms(&mut updates).await;

    handles[0].frame(common::join_room_frame("r1", 9, "joiner"));
    let rooms = next_rooms(&mut updates).await;
    assert_eq!(rooms[0].room.players_count, 2);

    handles[0].frame(common::start_game_frame("r2"));
    let rooms = next_rooms(&mut updates).await;
    assert_eq!(ids(&rooms), ["r1"]);

    handles[0].frame(common::delete_room_frame("r1", 1));
    let rooms = next_rooms(&mut updates).await;
    assert!(rooms.is_empty());

    session.close().await;
}

// ── Match entry ─────────────────────────────────────────────────────

#[tokio::test]
async fn entry_falls_back_to_enter_command_and_refetches() {
    let backend = Arc::new(MockBackend::default());
    // The detail snapshot does not list the acting user yet.
    *backend.detail.lock().unwrap() = Some(common::detail(
        "r1",
        RoomStatus::Open,
        vec![common::user(1, "alice")],
    ));
    *backend.enter_adds.lock().unwrap() = Some(common::user(7, "grace"));

    let (connector, _handles, _dials, _sent) = common::scripted_connector(1);
    let (mut session, mut updates) = GameSession::start(
        Arc::clone(&backend) as Arc<dyn minerace_client::Backend>,
        connector,
        creds(),
        "r1".into(),
        common::user(7, "grace"),
        GameConfig::default(),
    )
    .await
    .expect("entry with fallback");

    match updates.recv().await {
        Some(GameUpdate::Snapshot { detail, .. }) => assert!(detail.contains_user(7)),
        other => panic!("expected Snapshot, got {other:?}"),
    }

    let calls = backend.calls();
    assert_eq!(
        calls.iter().take(3).collect::<Vec<_>>(),
        ["room_detail:r1", "enter_room:r1", "room_detail:r1"]
    );

    session.close().await;
}

#[tokio::test]
async fn entry_failure_is_terminal() {
    let backend = Arc::new(MockBackend::default());
    backend
        .fail_detail
        .store(true, std::sync::atomic::Ordering::SeqCst);
    backend
        .fail_enter
        .store(true, std::sync::atomic::Ordering::SeqCst);

    let (connector, _handles, _dials, _sent) = common::scripted_connector(1);
    let result = GameSession::start(
        Arc::clone(&backend) as Arc<dyn minerace_client::Backend>,
        connector,
        creds(),
        "r1".into(),
        common::user(7, "grace"),
        GameConfig::default(),
    )
    .await;

    assert!(matches!(result, Err(MineraceError::EntryFailed(_))));
    // Entry is not retried.
    let enters = backend.calls().iter().filter(|c| *c == "enter_room:r1").count();
    assert_eq!(enters, 1);
}

// ── Command pre-flight ──────────────────────────────────────────────

#[tokio::test]
async fn foreign_board_commands_are_rejected_without_network() {
    let backend = started_backend();
    let (session, _updates, _handles) = started_session(Arc::clone(&backend), 1).await;

    let err = session.flag_cell(2, 0, 0).await.unwrap_err();
    assert!(matches!(err, MineraceError::NotYourBoard));

    let err = session.open_cell(2, 1, 1).await.unwrap_err();
    assert!(matches!(err, MineraceError::NotYourBoard));

    // Neither attempt reached the backend, and the replica is untouched.
    assert!(!backend
        .calls()
        .iter()
        .any(|c| c.starts_with("open_cell") || c.starts_with("flag_cell")));
    let replica = session.replica();
    let field = replica.participant(2).unwrap().field.as_ref().unwrap();
    assert!(field.grid.iter().flatten().all(|c| c.value == CellState::Closed));
}

#[tokio::test]
async fn out_of_range_cells_are_rejected_locally() {
    let backend = started_backend();
    let (session, _updates, _handles) = started_session(Arc::clone(&backend), 1).await;

    let err = session.open_cell(1, 8, 0).await.unwrap_err();
    assert!(matches!(err, MineraceError::InvalidInput(_)));
    let err = session.open_cell(1, 0, 99).await.unwrap_err();
    assert!(matches!(err, MineraceError::InvalidInput(_)));

    assert!(!backend.calls().iter().any(|c| c.starts_with("open_cell")));
}

#[tokio::test]
async fn blank_chat_lines_never_reach_the_server() {
    let backend = started_backend();
    let (session, _updates, _handles) = started_session(Arc::clone(&backend), 1).await;

    let err = session.send_chat("   ").await.unwrap_err();
    assert!(matches!(err, MineraceError::InvalidInput(_)));
    assert!(!backend.calls().iter().any(|c| c.starts_with("send_message")));

    session.send_chat("  gl hf  ").await.unwrap();
    assert!(backend.calls().iter().any(|c| c == "send_message:r1:gl hf"));
}

// ── Board updates ───────────────────────────────────────────────────

#[tokio::test]
async fn open_cell_mutates_nothing_until_the_delta_arrives() {
    let backend = started_backend();
    let (session, mut updates, handles) = started_session(Arc::clone(&backend), 1).await;

    session.open_cell(1, 2, 3).await.unwrap();
    assert!(backend.calls().iter().any(|c| c == "open_cell:r1:2:3"));

    // No optimistic reveal: the replica still shows a closed cell.
    {
        let replica = session.replica();
        let field = replica.my_participant().unwrap().field.as_ref().unwrap();
        assert_eq!(field.cell(2, 3).unwrap().value, CellState::Closed);
    }

    // The confirmation arrives as a full-replace delta.
    let participants = vec![
        Participant {
            field: Some(board_with_revealed(2, 3, 3)),
            ..common::participant(1, "alice", true)
        },
        Participant {
            field: Some(closed_board()),
            ..common::participant(2, "bob", false)
        },
    ];
    handles[0].frame(common::open_cell_frame("r1", 1, &participants));

    match updates.recv().await {
        Some(GameUpdate::FieldsReplaced(participants)) => {
            let field = participants[0].field.as_ref().unwrap();
            assert_eq!(field.cell(2, 3).unwrap().value, CellState::Revealed(3));
        }
        other => panic!("expected FieldsReplaced, got {other:?}"),
    }

    // All viewers see the same board through the replica.
    let replica = session.replica();
    let field = replica.my_participant().unwrap().field.as_ref().unwrap();
    assert_eq!(field.cell(2, 3).unwrap().value, CellState::Revealed(3));
}

// ── Roster, chat, lifecycle ─────────────────────────────────────────

#[tokio::test]
async fn join_and_chat_events_flow_through_updates() {
    let backend = Arc::new(MockBackend::default());
    *backend.detail.lock().unwrap() = Some(common::detail(
        "r1",
        RoomStatus::Open,
        vec![common::user(1, "alice")],
    ));
    *backend.participants.lock().unwrap() = vec![common::participant(1, "alice", true)];

    let (session, mut updates, handles) = {
        let (connector, handles, _dials, _sent) = common::scripted_connector(1);
        let (session, mut updates) = GameSession::start(
            Arc::clone(&backend) as Arc<dyn minerace_client::Backend>,
            connector,
            creds(),
            "r1".into(),
            common::user(1, "alice"),
            GameConfig::default(),
        )
        .await
        .expect("session start");
        assert!(matches!(
            updates.recv().await,
            Some(GameUpdate::Snapshot { .. })
        ));
        (session, updates, handles)
    };

    handles[0].frame(common::join_room_frame("r1", 2, "bob"));
    assert!(matches!(
        updates.recv().await,
        Some(GameUpdate::PlayerJoined { username }) if username == "bob"
    ));
    assert!(matches!(
        updates.recv().await,
        Some(GameUpdate::ParticipantsChanged(p)) if p.len() == 2
    ));

    handles[0].frame(common::new_message_frame(
        "m1",
        &common::user(2, "bob"),
        "hi",
    ));
    assert!(matches!(
        updates.recv().await,
        Some(GameUpdate::MessageReceived(m)) if m.text == "hi"
    ));

    // Duplicate delivery of the same message id is swallowed.
    handles[0].frame(common::new_message_frame(
        "m1",
        &common::user(2, "bob"),
        "hi",
    ));
    handles[0].frame(common::update_room_frame("renamed", None));
    assert!(matches!(
        updates.recv().await,
        Some(GameUpdate::DetailChanged(d)) if d.room.title == "renamed"
    ));

    drop(session);
}

#[tokio::test]
async fn winning_outcome_concludes_and_tears_the_scope_down() {
    let (session, mut updates, handles) = started_session(started_backend(), 1).await;

    handles[0].frame(common::win_game_frame(1, "alice"));

    match updates.recv().await {
        Some(GameUpdate::Concluded(outcome)) => {
            assert!(outcome.won);
            assert_eq!(outcome.winner.as_ref().unwrap().id, 1);
            assert_eq!(outcome.loser.as_ref().unwrap().id, 2);
        }
        other => panic!("expected Concluded, got {other:?}"),
    }

    // Terminal: the session tore its channel down and the update stream
    // ends.
    assert!(updates.recv().await.is_none());
    drop(session);
}

#[tokio::test]
async fn losing_outcome_names_the_winner_from_the_roster() {
    let (session, mut updates, handles) = started_session(started_backend(), 1).await;

    // The historical LOSE_GAME encoding names only the loser.
    handles[0].frame(common::lose_game_frame(1, "alice"));

    match updates.recv().await {
        Some(GameUpdate::Concluded(outcome)) => {
            assert!(!outcome.won);
            assert_eq!(outcome.winner.as_ref().unwrap().username, "bob");
        }
        other => panic!("expected Concluded, got {other:?}"),
    }

    drop(session);
}

#[tokio::test]
async fn room_deletion_exits_the_scope() {
    let (session, mut updates, handles) = started_session(started_backend(), 1).await;

    handles[0].frame(common::delete_room_frame("r1", 1));

    assert!(matches!(updates.recv().await, Some(GameUpdate::RoomDeleted)));
    assert!(updates.recv().await.is_none());
    drop(session);
}

// ── Reconnect recovery ──────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn game_reconnect_resnapshots_before_resuming_events() {
    let backend = started_backend();
    let (session, mut updates, handles) = started_session(Arc::clone(&backend), 2).await;

    // The room is renamed while the channel is down; that UPDATE_ROOM
    // event is lost with the outage.
    if let Some(detail) = backend.detail.lock().unwrap().as_mut() {
        detail.room.title = "renamed while away".into();
    }
    handles[0].close();

    // After the fixed delay the channel redials and the session replaces
    // its replica from fresh snapshots.
    match updates.recv().await {
        Some(GameUpdate::Snapshot { detail, .. }) => {
            assert_eq!(detail.room.title, "renamed while away");
        }
        other => panic!("expected post-reconnect Snapshot, got {other:?}"),
    }

    assert_eq!(session.replica().detail().room.title, "renamed while away");

    drop(session);
}

#[tokio::test(start_paused = true)]
async fn closing_the_session_cancels_the_pending_reconnect() {
    let backend = started_backend();
    let (mut session, mut updates, handles) = started_session(Arc::clone(&backend), 2).await;
    let detail_calls_before = backend
        .calls()
        .iter()
        .filter(|c| c.starts_with("room_detail"))
        .count();

    handles[0].close();
    session.close().await;

    // No re-dial, no re-snapshot: teardown before the timer fired.
    tokio::time::sleep(Duration::from_secs(10)).await;
    let detail_calls_after = backend
        .calls()
        .iter()
        .filter(|c| c.starts_with("room_detail"))
        .count();
    assert_eq!(detail_calls_before, detail_calls_after);
    assert!(updates.recv().await.is_none());
}
