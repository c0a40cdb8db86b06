#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Wire-shape tests for the Minerace protocol types and the central
//! frame decoder: JSON fixtures matching real server output, round
//! trips of every payload, and the drop-don't-throw decoding policy.

use minerace_client::event::{decode_frame, Decoded, MineraceEvent};
use minerace_client::protocol::{
    AuthFrame, Cell, CellState, ChatMessage, EventEnvelope, Field, Participant, Room, RoomDetail,
    RoomStatus, User, STATUS_ERROR, STATUS_OK,
};

// ════════════════════════════════════════════════════════════════════
// Helper
// ════════════════════════════════════════════════════════════════════

/// Serialize `val` to JSON, then deserialize back to `T` and return it.
fn round_trip<T: serde::Serialize + serde::de::DeserializeOwned>(val: &T) -> T {
    let json = serde_json::to_string(val).expect("serialize");
    serde_json::from_str(&json).expect("deserialize")
}

fn sample_room() -> Room {
    Room {
        id: "7c9e6679-7425-40de-944b-e07fc1f90ae7".into(),
        title: "morning game".into(),
        owner_id: 12,
        owner_name: "alice".into(),
        is_public: true,
        mines: 10,
        rows: 8,
        cols: 8,
        created_at: "2025-05-17T09:30:00Z".into(),
        status: RoomStatus::Open,
        winner_id: None,
        players_count: 1,
        max_players: 2,
    }
}

fn sample_field() -> Field {
    let mut field = Field::closed(8, 8, 10);
    field.cells_open = 2;
    field.grid[0][0] = Cell {
        value: CellState::Revealed(1),
        is_open: true,
    };
    field.grid[0][1] = Cell {
        value: CellState::Flagged,
        is_open: false,
    };
    field
}

// ════════════════════════════════════════════════════════════════════
// Round trips
// ════════════════════════════════════════════════════════════════════

#[test]
fn room_round_trip() {
    let room = sample_room();
    assert_eq!(round_trip(&room), room);
}

#[test]
fn room_detail_round_trip_keeps_players() {
    let detail = RoomDetail {
        room: sample_room(),
        players: vec![
            User {
                id: 12,
                username: "alice".into(),
            },
            User {
                id: 13,
                username: "bob".into(),
            },
        ],
    };
    let back = round_trip(&detail);
    assert_eq!(back, detail);
    assert!(back.contains_user(13));
}

#[test]
fn field_round_trip_preserves_cells() {
    let field = sample_field();
    let back = round_trip(&field);
    assert_eq!(back.cell(0, 0).unwrap().value, CellState::Revealed(1));
    assert_eq!(back.cell(0, 1).unwrap().value, CellState::Flagged);
    assert_eq!(back.cell(7, 7).unwrap().value, CellState::Closed);
}

#[test]
fn participant_round_trip_with_and_without_field() {
    let with_field = Participant {
        id: 12,
        username: "alice".into(),
        is_owner: true,
        field: Some(sample_field()),
    };
    assert_eq!(round_trip(&with_field), with_field);

    let without_field = Participant {
        field: None,
        ..with_field
    };
    let json = serde_json::to_string(&without_field).unwrap();
    // Absent boards are omitted, not serialized as null.
    assert!(!json.contains("field"));
    assert_eq!(round_trip(&without_field), without_field);
}

#[test]
fn chat_message_round_trip() {
    let message = ChatMessage {
        id: "m-42".into(),
        creator_id: 12,
        creator_username: "alice".into(),
        text: "gl hf".into(),
        created_at: "2025-05-17T10:05:00Z".into(),
    };
    assert_eq!(round_trip(&message), message);
}

// ════════════════════════════════════════════════════════════════════
// Server-shape fixtures
// ════════════════════════════════════════════════════════════════════

#[test]
fn room_status_uses_lowercase_wire_strings() {
    assert_eq!(serde_json::to_string(&RoomStatus::Open).unwrap(), "\"open\"");
    assert_eq!(
        serde_json::to_string(&RoomStatus::Started).unwrap(),
        "\"started\""
    );
    assert_eq!(
        serde_json::to_string(&RoomStatus::Closed).unwrap(),
        "\"closed\""
    );
}

#[test]
fn cell_states_use_single_character_encoding() {
    let states = [
        (CellState::Closed, "\"c\""),
        (CellState::Flagged, "\"f\""),
        (CellState::Mine, "\"m\""),
        (CellState::Revealed(0), "\"0\""),
        (CellState::Revealed(8), "\"8\""),
    ];
    for (state, wire) in states {
        assert_eq!(serde_json::to_string(&state).unwrap(), wire);
        assert_eq!(serde_json::from_str::<CellState>(wire).unwrap(), state);
    }
}

#[test]
fn envelope_fixture_matches_server_output() {
    // Captured shape of a game_socket frame.
    let raw = r#"{
        "status": "OK",
        "event_type": "JOIN_ROOM",
        "payload": {"id": "r1", "user_id": 5, "username": "eve"}
    }"#;
    let envelope: EventEnvelope = serde_json::from_str(raw).unwrap();
    assert_eq!(envelope.status, STATUS_OK);
    assert_eq!(envelope.event_type.as_deref(), Some("JOIN_ROOM"));
    assert!(envelope.payload.is_some());
    assert!(envelope.error.is_none());
}

#[test]
fn error_envelope_fixture() {
    let raw = r#"{"status": "Error", "event_type": "AUTH", "error": "invalid token"}"#;
    let envelope: EventEnvelope = serde_json::from_str(raw).unwrap();
    assert_eq!(envelope.status, STATUS_ERROR);
    assert_eq!(envelope.error.as_deref(), Some("invalid token"));
}

#[test]
fn auth_frame_is_a_bare_token_object() {
    let frame = AuthFrame {
        token: "eyJhbGciOi".into(),
    };
    assert_eq!(
        serde_json::to_string(&frame).unwrap(),
        r#"{"token":"eyJhbGciOi"}"#
    );
}

// ════════════════════════════════════════════════════════════════════
// Decoder policy
// ════════════════════════════════════════════════════════════════════

#[test]
fn every_recognized_tag_decodes_to_its_event() {
    let room_json = serde_json::to_value(sample_room()).unwrap();
    let participant_json = serde_json::to_value(vec![Participant {
        id: 12,
        username: "alice".into(),
        is_owner: true,
        field: Some(sample_field()),
    }])
    .unwrap();

    let cases = [
        (
            "CREATE_ROOM",
            room_json.clone(),
            "RoomCreated",
        ),
        (
            "UPDATE_ROOM",
            serde_json::json!({"title": "t", "is_public": false}),
            "RoomUpdated",
        ),
        (
            "DELETE_ROOM",
            serde_json::json!({"id": "r1", "user_id": 1}),
            "RoomDeleted",
        ),
        (
            "JOIN_ROOM",
            serde_json::json!({"id": "r1", "user_id": 1, "username": "a"}),
            "PlayerJoined",
        ),
        (
            "EXIT_ROOM",
            serde_json::json!({"id": "r1", "user_id": 1, "username": "a"}),
            "PlayerLeft",
        ),
        ("START_GAME", serde_json::json!({"id": "r1"}), "MatchStarted"),
        (
            "OPEN_CELL",
            serde_json::json!({"id": "r1", "user_id": 1, "participants": participant_json}),
            "FieldsReplaced",
        ),
        (
            "WIN_GAME",
            serde_json::json!({"winner_id": 1, "winner_username": "a"}),
            "GameOver",
        ),
        (
            "LOSE_GAME",
            serde_json::json!({"loser_id": 2, "loser_username": "b"}),
            "GameOver",
        ),
        (
            "NEW_MESSAGE",
            serde_json::json!({
                "id": "m1", "creator_id": 1, "creator_username": "a",
                "text": "hi", "created_at": "2025-05-17T10:05:00Z"
            }),
            "ChatMessage",
        ),
    ];

    for (tag, payload, expected) in cases {
        let raw = serde_json::json!({
            "status": "OK",
            "event_type": tag,
            "payload": payload,
        })
        .to_string();

        let Decoded::Event(event) = decode_frame(&raw) else {
            panic!("{tag} did not decode to an event");
        };
        let name = match event {
            MineraceEvent::RoomCreated(_) => "RoomCreated",
            MineraceEvent::RoomUpdated { .. } => "RoomUpdated",
            MineraceEvent::RoomDeleted { .. } => "RoomDeleted",
            MineraceEvent::PlayerJoined { .. } => "PlayerJoined",
            MineraceEvent::PlayerLeft { .. } => "PlayerLeft",
            MineraceEvent::MatchStarted { .. } => "MatchStarted",
            MineraceEvent::FieldsReplaced { .. } => "FieldsReplaced",
            MineraceEvent::GameOver { .. } => "GameOver",
            MineraceEvent::ChatMessage(_) => "ChatMessage",
        };
        assert_eq!(name, expected, "wrong event for tag {tag}");
    }
}

#[test]
fn hostile_frames_are_dropped_not_fatal() {
    let hostile = [
        "",
        "ping",
        "{",
        "null",
        "42",
        r#"{"status": "OK"}"#,
        r#"{"status": "OK", "event_type": "CREATE_ROOM"}"#,
        r#"{"status": "OK", "event_type": "CREATE_ROOM", "payload": 7}"#,
        r#"{"status": "OK", "event_type": "NOT_A_REAL_EVENT", "payload": {}}"#,
        r#"{"status": "Error", "error": "boom", "event_type": "JOIN_ROOM", "payload": {}}"#,
    ];
    for raw in hostile {
        assert!(
            !matches!(decode_frame(raw), Decoded::Event(_)),
            "frame unexpectedly decoded: {raw}"
        );
    }
}

#[test]
fn win_and_lose_tags_converge_on_one_outcome_event() {
    let win = serde_json::json!({
        "status": "OK",
        "event_type": "WIN_GAME",
        "payload": {"winner_id": 1, "winner_username": "a"},
    })
    .to_string();
    let lose = serde_json::json!({
        "status": "OK",
        "event_type": "LOSE_GAME",
        "payload": {"loser_id": 1, "loser_username": "a"},
    })
    .to_string();

    let Decoded::Event(MineraceEvent::GameOver { winner, loser }) = decode_frame(&win) else {
        panic!("WIN_GAME did not decode to GameOver");
    };
    assert_eq!(winner.unwrap().id, 1);
    assert!(loser.is_none());

    let Decoded::Event(MineraceEvent::GameOver { winner, loser }) = decode_frame(&lose) else {
        panic!("LOSE_GAME did not decode to GameOver");
    };
    assert!(winner.is_none());
    assert_eq!(loser.unwrap().id, 1);
}
