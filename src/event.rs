//! Typed events and the central frame decoder for the event channel.
//!
//! Every inbound frame is parsed once, here, into the closed
//! [`MineraceEvent`] set. Unknown event types, malformed frames, frames
//! with an error status, and frames without a payload are logged and
//! dropped — decoding is never fatal to the channel.

use serde::de::DeserializeOwned;
use tracing::{debug, error, warn};

use crate::protocol::{
    ChatMessage, EventEnvelope, FieldsPayload, LosePayload, MatchStartedPayload, Participant,
    PresencePayload, Room, RoomDeletedPayload, RoomId, RoomUpdatedPayload, UserId, WinPayload,
    KEEP_ALIVE_FRAME, STATUS_OK, User,
};

// ── Wire tags ───────────────────────────────────────────────────────

/// `event_type` value carrying a full [`Room`]: a room was created.
pub const CREATE_ROOM: &str = "CREATE_ROOM";
/// `event_type` value patching title/visibility of the current room.
pub const UPDATE_ROOM: &str = "UPDATE_ROOM";
/// `event_type` value removing a room.
pub const DELETE_ROOM: &str = "DELETE_ROOM";
/// `event_type` value announcing a participant joined a room.
pub const JOIN_ROOM: &str = "JOIN_ROOM";
/// `event_type` value announcing a participant left a room.
pub const EXIT_ROOM: &str = "EXIT_ROOM";
/// `event_type` value marking a match as started.
pub const START_GAME: &str = "START_GAME";
/// `event_type` value carrying the complete participant board set.
pub const OPEN_CELL: &str = "OPEN_CELL";
/// Historical `event_type` naming the winner of a concluded match.
pub const WIN_GAME: &str = "WIN_GAME";
/// Historical `event_type` naming the loser of a concluded match.
pub const LOSE_GAME: &str = "LOSE_GAME";
/// `event_type` value carrying a new chat message.
pub const NEW_MESSAGE: &str = "NEW_MESSAGE";

// ── Typed events ────────────────────────────────────────────────────

/// A decoded server event.
///
/// The two historical match-outcome encodings (`WIN_GAME` naming only the
/// winner, `LOSE_GAME` naming only the loser) are normalized into the
/// single [`GameOver`](MineraceEvent::GameOver) variant; reconcilers
/// resolve the missing side from the already-known participant set.
#[derive(Debug, Clone, PartialEq)]
pub enum MineraceEvent {
    /// A room was created (boxed to reduce enum size).
    RoomCreated(Box<Room>),
    /// Title/visibility of the current room changed.
    RoomUpdated {
        title: String,
        is_public: Option<bool>,
    },
    /// A room was removed.
    RoomDeleted { id: RoomId, user_id: UserId },
    /// A participant joined a room.
    PlayerJoined {
        id: RoomId,
        user_id: UserId,
        username: String,
    },
    /// A participant left a room.
    PlayerLeft {
        id: RoomId,
        user_id: UserId,
        username: String,
    },
    /// A match started.
    MatchStarted { id: RoomId },
    /// The complete participant board set after a cell changed.
    /// Consumed by full replace, never by patching.
    FieldsReplaced {
        id: RoomId,
        user_id: UserId,
        participants: Vec<Participant>,
    },
    /// A match concluded. At least one side is present; the other is
    /// resolved from the participant set.
    GameOver {
        winner: Option<User>,
        loser: Option<User>,
    },
    /// A chat message arrived.
    ChatMessage(ChatMessage),
}

/// Result of decoding one raw frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// A recognized event.
    Event(MineraceEvent),
    /// The literal keep-alive marker; discarded before JSON parsing.
    KeepAlive,
    /// Anything else that was logged and dropped: malformed JSON, an
    /// error-status envelope, a missing payload, or an unknown tag.
    Skipped,
}

/// `true` if the raw frame is a keep-alive marker rather than an event.
pub fn is_keep_alive(raw: &str) -> bool {
    raw.is_empty() || raw == KEEP_ALIVE_FRAME
}

/// Decode one raw text frame from the event channel.
pub fn decode_frame(raw: &str) -> Decoded {
    if is_keep_alive(raw) {
        return Decoded::KeepAlive;
    }

    let envelope: EventEnvelope = match serde_json::from_str(raw) {
        Ok(env) => env,
        Err(e) => {
            warn!("failed to parse event envelope: {e} — raw: {raw}");
            return Decoded::Skipped;
        }
    };

    if envelope.status != STATUS_OK {
        warn!(
            "event frame with error status: {}",
            envelope.error.as_deref().unwrap_or("unknown")
        );
        return Decoded::Skipped;
    }

    let Some(event_type) = envelope.event_type.as_deref() else {
        debug!("event frame without event_type, dropping");
        return Decoded::Skipped;
    };

    let Some(payload) = envelope.payload else {
        // Defensive no-op events exist but carry no data.
        debug!(event_type, "event frame without payload, dropping");
        return Decoded::Skipped;
    };

    match event_type {
        CREATE_ROOM => payload_into(payload, event_type, |room: Room| {
            MineraceEvent::RoomCreated(Box::new(room))
        }),
        UPDATE_ROOM => payload_into(payload, event_type, |p: RoomUpdatedPayload| {
            MineraceEvent::RoomUpdated {
                title: p.title,
                is_public: p.is_public,
            }
        }),
        DELETE_ROOM => payload_into(payload, event_type, |p: RoomDeletedPayload| {
            MineraceEvent::RoomDeleted {
                id: p.id,
                user_id: p.user_id,
            }
        }),
        JOIN_ROOM => payload_into(payload, event_type, |p: PresencePayload| {
            MineraceEvent::PlayerJoined {
                id: p.id,
                user_id: p.user_id,
                username: p.username,
            }
        }),
        EXIT_ROOM => payload_into(payload, event_type, |p: PresencePayload| {
            MineraceEvent::PlayerLeft {
                id: p.id,
                user_id: p.user_id,
                username: p.username,
            }
        }),
        START_GAME => payload_into(payload, event_type, |p: MatchStartedPayload| {
            MineraceEvent::MatchStarted { id: p.id }
        }),
        OPEN_CELL => payload_into(payload, event_type, |p: FieldsPayload| {
            MineraceEvent::FieldsReplaced {
                id: p.id,
                user_id: p.user_id,
                participants: p.participants,
            }
        }),
        WIN_GAME => payload_into(payload, event_type, |p: WinPayload| {
            MineraceEvent::GameOver {
                winner: Some(User {
                    id: p.winner_id,
                    username: p.winner_username,
                }),
                loser: None,
            }
        }),
        LOSE_GAME => payload_into(payload, event_type, |p: LosePayload| {
            MineraceEvent::GameOver {
                winner: None,
                loser: Some(User {
                    id: p.loser_id,
                    username: p.loser_username,
                }),
            }
        }),
        NEW_MESSAGE => payload_into(payload, event_type, MineraceEvent::ChatMessage),
        other => {
            error!("unknown event_type: {other}");
            Decoded::Skipped
        }
    }
}

/// Deserialize the payload into `P` and map it into an event, dropping
/// the frame (with a warning) when the payload does not match the tag.
fn payload_into<P: DeserializeOwned>(
    payload: serde_json::Value,
    event_type: &str,
    into: impl FnOnce(P) -> MineraceEvent,
) -> Decoded {
    match serde_json::from_value(payload) {
        Ok(parsed) => Decoded::Event(into(parsed)),
        Err(e) => {
            warn!(event_type, "failed to parse event payload: {e}");
            Decoded::Skipped
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    fn frame(event_type: &str, payload: serde_json::Value) -> String {
        serde_json::json!({
            "status": "OK",
            "event_type": event_type,
            "payload": payload,
        })
        .to_string()
    }

    #[test]
    fn keep_alive_frames_are_filtered() {
        assert_eq!(decode_frame(""), Decoded::KeepAlive);
        assert_eq!(decode_frame("ping"), Decoded::KeepAlive);
    }

    #[test]
    fn malformed_json_is_skipped() {
        assert_eq!(decode_frame("{not json"), Decoded::Skipped);
    }

    #[test]
    fn error_status_is_skipped() {
        let raw = r#"{"status": "Error", "error": "no such game", "event_type": "AUTH"}"#;
        assert_eq!(decode_frame(raw), Decoded::Skipped);
    }

    #[test]
    fn missing_payload_is_skipped() {
        let raw = r#"{"status": "OK", "event_type": "DELETE_ROOM"}"#;
        assert_eq!(decode_frame(raw), Decoded::Skipped);
    }

    #[test]
    fn unknown_event_type_is_skipped() {
        let raw = frame("TELEPORT", serde_json::json!({"id": "r1"}));
        assert_eq!(decode_frame(&raw), Decoded::Skipped);
    }

    #[test]
    fn mismatched_payload_is_skipped() {
        // DELETE_ROOM requires id + user_id.
        let raw = frame(DELETE_ROOM, serde_json::json!({"unexpected": true}));
        assert_eq!(decode_frame(&raw), Decoded::Skipped);
    }

    #[test]
    fn decodes_room_created() {
        let raw = frame(
            CREATE_ROOM,
            serde_json::json!({
                "id": "r2", "title": "fresh", "owner_id": 3, "owner_name": "carol",
                "is_public": true, "mines": 10, "rows": 8, "cols": 8,
                "created_at": "2025-05-17T10:00:00Z", "status": "open",
                "players_count": 0, "max_players": 2
            }),
        );
        match decode_frame(&raw) {
            Decoded::Event(MineraceEvent::RoomCreated(room)) => {
                assert_eq!(room.id, "r2");
                assert_eq!(room.players_count, 0);
            }
            other => panic!("expected RoomCreated, got {other:?}"),
        }
    }

    #[test]
    fn decodes_presence_events() {
        let raw = frame(
            JOIN_ROOM,
            serde_json::json!({"id": "r1", "user_id": 5, "username": "eve"}),
        );
        assert_eq!(
            decode_frame(&raw),
            Decoded::Event(MineraceEvent::PlayerJoined {
                id: "r1".into(),
                user_id: 5,
                username: "eve".into(),
            })
        );

        let raw = frame(
            EXIT_ROOM,
            serde_json::json!({"id": "r1", "user_id": 5, "username": "eve"}),
        );
        assert_eq!(
            decode_frame(&raw),
            Decoded::Event(MineraceEvent::PlayerLeft {
                id: "r1".into(),
                user_id: 5,
                username: "eve".into(),
            })
        );
    }

    #[test]
    fn decodes_room_updated_without_visibility() {
        let raw = frame(UPDATE_ROOM, serde_json::json!({"title": "renamed"}));
        assert_eq!(
            decode_frame(&raw),
            Decoded::Event(MineraceEvent::RoomUpdated {
                title: "renamed".into(),
                is_public: None,
            })
        );
    }

    #[test]
    fn decodes_match_started() {
        let raw = frame(START_GAME, serde_json::json!({"id": "r1"}));
        assert_eq!(
            decode_frame(&raw),
            Decoded::Event(MineraceEvent::MatchStarted { id: "r1".into() })
        );
    }

    #[test]
    fn decodes_fields_replaced() {
        let raw = frame(
            OPEN_CELL,
            serde_json::json!({
                "id": "r1",
                "user_id": 1,
                "participants": [{
                    "id": 1, "username": "a", "is_owner": true,
                    "field": {
                        "rows": 2, "cols": 2, "mines": 1,
                        "cells_open": 1, "mine_is_open": false,
                        "grid": [
                            [{"value": "1", "is_open": true}, {"value": "c", "is_open": false}],
                            [{"value": "c", "is_open": false}, {"value": "c", "is_open": false}]
                        ]
                    }
                }]
            }),
        );
        match decode_frame(&raw) {
            Decoded::Event(MineraceEvent::FieldsReplaced { participants, .. }) => {
                assert_eq!(participants.len(), 1);
                let field = participants[0].field.as_ref().unwrap();
                assert_eq!(
                    field.cell(0, 0).unwrap().value,
                    crate::protocol::CellState::Revealed(1)
                );
            }
            other => panic!("expected FieldsReplaced, got {other:?}"),
        }
    }

    #[test]
    fn win_and_lose_normalize_to_game_over() {
        let raw = frame(
            WIN_GAME,
            serde_json::json!({"winner_id": 1, "winner_username": "a"}),
        );
        assert_eq!(
            decode_frame(&raw),
            Decoded::Event(MineraceEvent::GameOver {
                winner: Some(User {
                    id: 1,
                    username: "a".into()
                }),
                loser: None,
            })
        );

        let raw = frame(
            LOSE_GAME,
            serde_json::json!({"loser_id": 2, "loser_username": "b"}),
        );
        assert_eq!(
            decode_frame(&raw),
            Decoded::Event(MineraceEvent::GameOver {
                winner: None,
                loser: Some(User {
                    id: 2,
                    username: "b".into()
                }),
            })
        );
    }

    #[test]
    fn decodes_chat_message() {
        let raw = frame(
            NEW_MESSAGE,
            serde_json::json!({
                "id": "m1", "creator_id": 4, "creator_username": "dan",
                "text": "gl hf", "created_at": "2025-05-17T10:05:00Z"
            }),
        );
        match decode_frame(&raw) {
            Decoded::Event(MineraceEvent::ChatMessage(msg)) => {
                assert_eq!(msg.id, "m1");
                assert_eq!(msg.text, "gl hf");
            }
            other => panic!("expected ChatMessage, got {other:?}"),
        }
    }
}
