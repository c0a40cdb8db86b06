//! Wire-compatible protocol types for the Minerace service.
//!
//! Every type in this module produces identical JSON to the server's HTTP
//! handlers and WebSocket event loop. Key conventions:
//!
//! - Room ids and chat message ids are opaque server-issued strings.
//! - User ids are integers.
//! - Cell states use the single-character wire encoding
//!   (`"c"`, `"0"`..`"8"`, `"f"`, `"m"`).
//! - Timestamps are ISO 8601 strings and are left opaque.

use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

// ── Type aliases ────────────────────────────────────────────────────

/// Unique identifier for rooms. Opaque, server-issued.
pub type RoomId = String;

/// Unique identifier for users.
pub type UserId = i64;

/// Unique identifier for chat messages. Opaque, server-issued.
pub type MessageId = String;

// ── Envelope constants ──────────────────────────────────────────────

/// Envelope `status` value for a successful call or event.
pub const STATUS_OK: &str = "OK";

/// Envelope `status` value for a failed call or event.
pub const STATUS_ERROR: &str = "Error";

/// Literal keep-alive frame sent by the server on the event channel.
/// Some deployments send an empty frame instead; both are filtered
/// before JSON parsing.
pub const KEEP_ALIVE_FRAME: &str = "ping";

// ── Enums ───────────────────────────────────────────────────────────

/// Lifecycle status of a room.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    /// Accepting participants; the match has not started.
    #[default]
    Open,
    /// The match is in progress.
    Started,
    /// The match has concluded; `winner_id` identifies the winner.
    Closed,
}

impl RoomStatus {
    /// The lowercase wire string for this status, as used in list filters.
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomStatus::Open => "open",
            RoomStatus::Started => "started",
            RoomStatus::Closed => "closed",
        }
    }
}

/// State of a single cell on a participant's board.
///
/// A cell only ever transitions `closed → {revealed, flagged, mine}` or
/// `closed ↔ flagged`; a revealed numeric or mine cell never reverts.
/// The server enforces this; the client consumes full-board replaces and
/// relies on the server-side monotonicity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellState {
    /// Not yet opened.
    Closed,
    /// Opened, with the adjacent-mine count (0–8).
    Revealed(u8),
    /// Marked with a flag by the board owner.
    Flagged,
    /// An opened mine.
    Mine,
}

impl CellState {
    /// The single-character wire encoding for this state.
    pub fn as_wire(&self) -> &'static str {
        const DIGITS: [&str; 9] = ["0", "1", "2", "3", "4", "5", "6", "7", "8"];
        match self {
            CellState::Closed => "c",
            CellState::Flagged => "f",
            CellState::Mine => "m",
            // Adjacency counts above 8 cannot occur on a square grid;
            // `from_wire` never constructs them.
            CellState::Revealed(n) => DIGITS.get(usize::from(*n)).copied().unwrap_or("8"),
        }
    }

    /// Parse the single-character wire encoding. Returns `None` for any
    /// string outside the closed set.
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "c" => Some(CellState::Closed),
            "f" => Some(CellState::Flagged),
            "m" => Some(CellState::Mine),
            "0" | "1" | "2" | "3" | "4" | "5" | "6" | "7" | "8" => {
                s.parse::<u8>().ok().map(CellState::Revealed)
            }
            _ => None,
        }
    }

    /// `true` once the cell has been revealed as a number or a mine.
    /// Revealed cells are final: they never return to closed or flagged.
    pub fn is_revealed(&self) -> bool {
        matches!(self, CellState::Revealed(_) | CellState::Mine)
    }
}

impl Serialize for CellState {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_wire())
    }
}

impl<'de> Deserialize<'de> for CellState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct CellStateVisitor;

        impl Visitor<'_> for CellStateVisitor {
            type Value = CellState;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("one of \"c\", \"0\"-\"8\", \"f\", \"m\"")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<CellState, E> {
                CellState::from_wire(v)
                    .ok_or_else(|| E::invalid_value(de::Unexpected::Str(v), &self))
            }
        }

        deserializer.deserialize_str(CellStateVisitor)
    }
}

// ── Structs ─────────────────────────────────────────────────────────

/// An authenticated user identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub username: String,
}

/// A room as listed in the lobby and carried by `CREATE_ROOM` events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Room {
    pub id: RoomId,
    pub title: String,
    pub owner_id: UserId,
    pub owner_name: String,
    pub is_public: bool,
    /// Board parameters. The reference deployment sizes every board 8×8,
    /// but the client treats dimensions as data.
    pub mines: u32,
    pub rows: usize,
    pub cols: usize,
    /// ISO 8601 creation timestamp, left opaque.
    pub created_at: String,
    pub status: RoomStatus,
    /// Present iff `status == Closed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner_id: Option<UserId>,
    pub players_count: u32,
    pub max_players: u32,
}

impl Room {
    /// `true` when no further participants may enter.
    pub fn is_full(&self) -> bool {
        self.players_count >= self.max_players
    }
}

/// A room plus its current participant identities, as returned by the
/// room-detail snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomDetail {
    #[serde(flatten)]
    pub room: Room,
    /// Current participants, unique by id.
    #[serde(default)]
    pub players: Vec<User>,
}

impl RoomDetail {
    /// `true` if the given user is among the participants.
    pub fn contains_user(&self, id: UserId) -> bool {
        self.players.iter().any(|p| p.id == id)
    }
}

/// One cell of a participant's board.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cell {
    pub value: CellState,
    pub is_open: bool,
}

impl Cell {
    /// An unopened cell.
    pub fn closed() -> Self {
        Self {
            value: CellState::Closed,
            is_open: false,
        }
    }
}

/// A participant's board: a fixed-size two-dimensional grid addressed by
/// `(row, col)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Field {
    pub rows: usize,
    pub cols: usize,
    pub mines: u32,
    pub cells_open: u32,
    pub mine_is_open: bool,
    pub grid: Vec<Vec<Cell>>,
}

impl Field {
    /// An all-closed placeholder grid sized from configured dimensions,
    /// used before the match starts and any real field data exists.
    pub fn closed(rows: usize, cols: usize, mines: u32) -> Self {
        Self {
            rows,
            cols,
            mines,
            cells_open: 0,
            mine_is_open: false,
            grid: vec![vec![Cell::closed(); cols]; rows],
        }
    }

    /// `true` if `(row, col)` addresses a cell on this grid.
    pub fn in_bounds(&self, row: usize, col: usize) -> bool {
        row < self.rows && col < self.cols
    }

    /// Checked cell access by `(row, col)`.
    pub fn cell(&self, row: usize, col: usize) -> Option<&Cell> {
        self.grid.get(row).and_then(|r| r.get(col))
    }
}

/// One participant inside a match, with their board when the match has
/// started. `field` is absent before the first cell-state delta.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Participant {
    pub id: UserId,
    pub username: String,
    pub is_owner: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<Field>,
}

/// A chat message scoped to one match. Append-only; never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: MessageId,
    pub creator_id: UserId,
    pub creator_username: String,
    pub text: String,
    /// ISO 8601 timestamp, left opaque.
    pub created_at: String,
}

// ── Event channel frames ────────────────────────────────────────────

/// The envelope wrapping every frame on the event channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// The single outbound frame on the event channel: the authentication
/// handshake sent immediately after the transport opens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthFrame {
    pub token: String,
}

// ── Event payloads ──────────────────────────────────────────────────

/// Payload of an `UPDATE_ROOM` event. Patches title/visibility only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomUpdatedPayload {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_public: Option<bool>,
}

/// Payload of a `DELETE_ROOM` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomDeletedPayload {
    pub id: RoomId,
    pub user_id: UserId,
}

/// Payload of a `JOIN_ROOM` or `EXIT_ROOM` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresencePayload {
    pub id: RoomId,
    pub user_id: UserId,
    pub username: String,
}

/// Payload of a `START_GAME` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatchStartedPayload {
    pub id: RoomId,
}

/// Payload of an `OPEN_CELL` event: the complete set of participant
/// boards, consumed by full replace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldsPayload {
    pub id: RoomId,
    pub user_id: UserId,
    pub participants: Vec<Participant>,
}

/// Payload of a `WIN_GAME` event (historical encoding naming the winner).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WinPayload {
    pub winner_id: UserId,
    pub winner_username: String,
}

/// Payload of a `LOSE_GAME` event (historical encoding naming the loser).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LosePayload {
    pub loser_id: UserId,
    pub loser_username: String,
}

// ── HTTP request bodies ─────────────────────────────────────────────

/// Body of the register and login calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthRequest {
    pub username: String,
    pub password: String,
}

/// Body of the create-room and update-room calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomRequest {
    pub title: String,
    pub is_public: bool,
}

/// Body of the open-cell and flag-cell calls.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CellRequest {
    pub row: usize,
    pub col: usize,
}

/// Body of the send-chat-message call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub text: String,
}

// ── HTTP response bodies ────────────────────────────────────────────

/// Bare `{status, error?}` envelope returned by command calls.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    #[serde(default)]
    pub error: Option<String>,
}

/// Response of the list-rooms and my-rooms snapshots.
#[derive(Debug, Clone, Deserialize)]
pub struct RoomsResponse {
    pub status: String,
    #[serde(default)]
    pub error: Option<String>,
    /// A null list is an empty list.
    #[serde(default)]
    pub games: Option<Vec<Room>>,
}

/// Response of the room-detail snapshot.
#[derive(Debug, Clone, Deserialize)]
pub struct RoomDetailResponse {
    pub status: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub game: Option<RoomDetail>,
}

/// Response of the per-participant field snapshot.
#[derive(Debug, Clone, Deserialize)]
pub struct FieldInfoResponse {
    pub status: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub participants: Option<Vec<Participant>>,
}

/// Response of the chat backlog snapshot. An absent backlog (expired
/// retention) is not an error and yields an empty sequence.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatBacklogResponse {
    pub status: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub messages: Option<Vec<ChatMessage>>,
}

/// Response of the create-room command.
#[derive(Debug, Clone, Deserialize)]
pub struct RoomCreatedResponse {
    pub status: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub id: Option<RoomId>,
}

/// Response of the register call.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisteredResponse {
    pub status: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub id: Option<UserId>,
}

/// Response of the current-user snapshot.
#[derive(Debug, Clone, Deserialize)]
pub struct UserResponse {
    pub status: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub user: Option<User>,
}

/// Response of the winner congratulation snapshot.
#[derive(Debug, Clone, Deserialize)]
pub struct CongratulationResponse {
    pub status: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub congratulation: Option<String>,
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

    #[test]
    fn cell_state_wire_round_trip() {
        for wire in ["c", "f", "m", "0", "3", "8"] {
            let state = CellState::from_wire(wire).unwrap();
            assert_eq!(state.as_wire(), wire);
        }
    }

    #[test]
    fn cell_state_rejects_unknown_wire_values() {
        assert!(CellState::from_wire("x").is_none());
        assert!(CellState::from_wire("9").is_none());
        assert!(CellState::from_wire("").is_none());
        assert!(CellState::from_wire("10").is_none());
    }

    #[test]
    fn cell_state_serde_uses_wire_chars() {
        let json = serde_json::to_string(&CellState::Revealed(3)).unwrap();
        assert_eq!(json, "\"3\"");
        let state: CellState = serde_json::from_str("\"m\"").unwrap();
        assert_eq!(state, CellState::Mine);
        assert!(serde_json::from_str::<CellState>("\"q\"").is_err());
    }

    #[test]
    fn revealed_and_mine_are_final() {
        assert!(CellState::Revealed(0).is_revealed());
        assert!(CellState::Mine.is_revealed());
        assert!(!CellState::Closed.is_revealed());
        assert!(!CellState::Flagged.is_revealed());
    }

    #[test]
    fn closed_field_has_requested_dimensions() {
        let field = Field::closed(8, 8, 10);
        assert_eq!(field.grid.len(), 8);
        assert!(field.grid.iter().all(|row| row.len() == 8));
        assert!(field
            .grid
            .iter()
            .flatten()
            .all(|c| c.value == CellState::Closed && !c.is_open));
        assert_eq!(field.cells_open, 0);
    }

    #[test]
    fn field_cell_access_is_checked() {
        let field = Field::closed(2, 3, 1);
        assert!(field.cell(1, 2).is_some());
        assert!(field.cell(2, 0).is_none());
        assert!(field.cell(0, 3).is_none());
        assert!(field.in_bounds(1, 2));
        assert!(!field.in_bounds(2, 2));
    }

    #[test]
    fn room_parses_server_shape() {
        let json = r#"{
            "id": "7c9e6679-7425-40de-944b-e07fc1f90ae7",
            "title": "morning game",
            "owner_id": 12,
            "owner_name": "alice",
            "is_public": true,
            "mines": 10,
            "rows": 8,
            "cols": 8,
            "created_at": "2025-05-17T09:30:00Z",
            "status": "open",
            "players_count": 1,
            "max_players": 2
        }"#;
        let room: Room = serde_json::from_str(json).unwrap();
        assert_eq!(room.status, RoomStatus::Open);
        assert!(room.winner_id.is_none());
        assert!(!room.is_full());
    }

    #[test]
    fn closed_room_carries_winner() {
        let json = r#"{
            "id": "r1", "title": "t", "owner_id": 1, "owner_name": "a",
            "is_public": false, "mines": 10, "rows": 8, "cols": 8,
            "created_at": "2025-05-17T09:30:00Z", "status": "closed",
            "winner_id": 7, "players_count": 2, "max_players": 2
        }"#;
        let room: Room = serde_json::from_str(json).unwrap();
        assert_eq!(room.status, RoomStatus::Closed);
        assert_eq!(room.winner_id, Some(7));
        assert!(room.is_full());
    }

    #[test]
    fn room_detail_flattens_room_fields() {
        let json = r#"{
            "id": "r1", "title": "t", "owner_id": 1, "owner_name": "a",
            "is_public": true, "mines": 10, "rows": 8, "cols": 8,
            "created_at": "2025-05-17T09:30:00Z", "status": "open",
            "players_count": 2, "max_players": 4,
            "players": [{"id": 1, "username": "a"}, {"id": 2, "username": "b"}]
        }"#;
        let detail: RoomDetail = serde_json::from_str(json).unwrap();
        assert_eq!(detail.room.id, "r1");
        assert!(detail.contains_user(2));
        assert!(!detail.contains_user(3));
    }

    #[test]
    fn participant_field_defaults_to_none() {
        let json = r#"{"id": 5, "username": "e", "is_owner": false}"#;
        let p: Participant = serde_json::from_str(json).unwrap();
        assert!(p.field.is_none());
    }

    #[test]
    fn envelope_tolerates_missing_optional_fields() {
        let env: EventEnvelope = serde_json::from_str(r#"{"status": "OK"}"#).unwrap();
        assert_eq!(env.status, STATUS_OK);
        assert!(env.event_type.is_none());
        assert!(env.payload.is_none());
    }

    #[test]
    fn auth_frame_serializes_to_token_object() {
        let frame = AuthFrame {
            token: "tok123".into(),
        };
        assert_eq!(
            serde_json::to_string(&frame).unwrap(),
            r#"{"token":"tok123"}"#
        );
    }

    #[test]
    fn null_room_list_is_absent() {
        let resp: RoomsResponse =
            serde_json::from_str(r#"{"status": "OK", "games": null}"#).unwrap();
        assert!(resp.games.is_none());
    }
}
