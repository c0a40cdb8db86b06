#![allow(
    dead_code,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Shared test utilities for Minerace client integration tests.
//!
//! Provides a push-scripted transport/connector pair, a scripted
//! [`Backend`] implementation, and helpers for constructing common
//! server frame and snapshot fixtures.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use minerace_client::error::Result;
use minerace_client::protocol::{
    ChatMessage, Participant, Room, RoomDetail, RoomStatus, User,
};
use minerace_client::{Backend, Connector, MineraceError, Transport};

// ── Scripted transport ──────────────────────────────────────────────

/// One step of a scripted inbound stream.
pub enum ScriptItem {
    /// Deliver a text frame.
    Frame(String),
    /// Deliver a transport error (ends the connection).
    Error(String),
    /// Close the stream cleanly (server-side close).
    Close,
}

/// Test-side handle feeding frames into one [`ScriptedTransport`].
///
/// Frames may be pushed before the transport is dialed (they queue) or
/// while the session under test is live, which lets tests interleave
/// stream input with command calls deterministically.
#[derive(Clone)]
pub struct ScriptHandle {
    tx: mpsc::UnboundedSender<ScriptItem>,
}

impl ScriptHandle {
    pub fn frame(&self, raw: impl Into<String>) {
        let _ = self.tx.send(ScriptItem::Frame(raw.into()));
    }

    pub fn error(&self, message: impl Into<String>) {
        let _ = self.tx.send(ScriptItem::Error(message.into()));
    }

    pub fn close(&self) {
        let _ = self.tx.send(ScriptItem::Close);
    }
}

/// A [`Transport`] whose inbound stream is driven by a [`ScriptHandle`].
/// Outbound frames are recorded in a shared log.
pub struct ScriptedTransport {
    rx: mpsc::UnboundedReceiver<ScriptItem>,
    sent: Arc<StdMutex<Vec<String>>>,
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&mut self, message: String) -> std::result::Result<(), MineraceError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn recv(&mut self) -> Option<std::result::Result<String, MineraceError>> {
        match self.rx.recv().await {
            Some(ScriptItem::Frame(raw)) => Some(Ok(raw)),
            Some(ScriptItem::Error(message)) => {
                Some(Err(MineraceError::TransportReceive(message)))
            }
            Some(ScriptItem::Close) => None,
            // Script handle dropped — stay open until shutdown.
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> std::result::Result<(), MineraceError> {
        Ok(())
    }
}

/// Hands out scripted transports in dial order and counts dials.
pub struct ScriptedConnector {
    transports: StdMutex<VecDeque<ScriptedTransport>>,
    dials: Arc<AtomicUsize>,
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self) -> std::result::Result<Box<dyn Transport>, MineraceError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        match self.transports.lock().unwrap().pop_front() {
            Some(transport) => Ok(Box::new(transport)),
            None => Err(MineraceError::TransportClosed),
        }
    }
}

/// Build a connector backed by `streams` scripted transports, all
/// recording outbound frames into one shared log. Returns the connector,
/// one script handle per future dial, the dial counter, and the log.
pub fn scripted_connector(
    streams: usize,
) -> (
    ScriptedConnector,
    Vec<ScriptHandle>,
    Arc<AtomicUsize>,
    Arc<StdMutex<Vec<String>>>,
) {
    let sent = Arc::new(StdMutex::new(Vec::new()));
    let mut handles = Vec::new();
    let mut transports = VecDeque::new();
    for _ in 0..streams {
        let (tx, rx) = mpsc::unbounded_channel();
        handles.push(ScriptHandle { tx });
        transports.push_back(ScriptedTransport {
            rx,
            sent: Arc::clone(&sent),
        });
    }
    let dials = Arc::new(AtomicUsize::new(0));
    (
        ScriptedConnector {
            transports: StdMutex::new(transports),
            dials: Arc::clone(&dials),
        },
        handles,
        dials,
        sent,
    )
}

// ── Scripted backend ────────────────────────────────────────────────

/// A scripted [`Backend`] with mutable snapshot data and a call log.
#[derive(Default)]
pub struct MockBackend {
    pub rooms: StdMutex<Vec<Room>>,
    pub detail: StdMutex<Option<RoomDetail>>,
    pub participants: StdMutex<Vec<Participant>>,
    pub messages: StdMutex<Vec<ChatMessage>>,
    /// When set, `enter_room` succeeds by adding this user to `detail`.
    pub enter_adds: StdMutex<Option<User>>,
    pub fail_detail: AtomicBool,
    pub fail_enter: AtomicBool,
    pub calls: StdMutex<Vec<String>>,
}

impl MockBackend {
    pub fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn rejected(message: &str) -> MineraceError {
        MineraceError::ServerRejected {
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn list_rooms(&self, query: &str, _status: Option<RoomStatus>) -> Result<Vec<Room>> {
        self.record(format!("list_rooms:{query}"));
        Ok(self.rooms.lock().unwrap().clone())
    }

    async fn my_rooms(&self) -> Result<Vec<Room>> {
        self.record("my_rooms");
        Ok(self.rooms.lock().unwrap().clone())
    }

    async fn room_detail(&self, id: &str) -> Result<RoomDetail> {
        self.record(format!("room_detail:{id}"));
        if self.fail_detail.load(Ordering::SeqCst) {
            return Err(Self::rejected("no such game"));
        }
        self.detail
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Self::rejected("no such game"))
    }

    async fn enter_room(&self, id: &str) -> Result<()> {
        self.record(format!("enter_room:{id}"));
        if self.fail_enter.load(Ordering::SeqCst) {
            return Err(Self::rejected("room is full"));
        }
        if let Some(user) = self.enter_adds.lock().unwrap().clone() {
            if let Some(detail) = self.detail.lock().unwrap().as_mut() {
                if !detail.contains_user(user.id) {
                    detail.players.push(user);
                }
            }
        }
        Ok(())
    }

    async fn exit_room(&self, id: &str) -> Result<()> {
        self.record(format!("exit_room:{id}"));
        Ok(())
    }

    async fn start_match(&self, id: &str) -> Result<()> {
        self.record(format!("start_match:{id}"));
        Ok(())
    }

    async fn field_snapshot(&self, id: &str) -> Result<Vec<Participant>> {
        self.record(format!("field_snapshot:{id}"));
        Ok(self.participants.lock().unwrap().clone())
    }

    async fn chat_backlog(&self, id: &str) -> Result<Vec<ChatMessage>> {
        self.record(format!("chat_backlog:{id}"));
        Ok(self.messages.lock().unwrap().clone())
    }

    async fn open_cell(&self, id: &str, row: usize, col: usize) -> Result<()> {
        self.record(format!("open_cell:{id}:{row}:{col}"));
        Ok(())
    }

    async fn flag_cell(&self, id: &str, row: usize, col: usize) -> Result<()> {
        self.record(format!("flag_cell:{id}:{row}:{col}"));
        Ok(())
    }

    async fn send_message(&self, id: &str, text: &str) -> Result<()> {
        self.record(format!("send_message:{id}:{text}"));
        Ok(())
    }
}

// ── Snapshot fixtures ───────────────────────────────────────────────

pub fn room(id: &str, players_count: u32) -> Room {
    Room {
        id: id.to_string(),
        title: format!("room {id}"),
        owner_id: 1,
        owner_name: "alice".into(),
        is_public: true,
        mines: 10,
        rows: 8,
        cols: 8,
        created_at: "2025-05-17T09:30:00Z".into(),
        status: RoomStatus::Open,
        winner_id: None,
        players_count,
        max_players: 4,
    }
}

pub fn user(id: i64, name: &str) -> User {
    User {
        id,
        username: name.to_string(),
    }
}

pub fn detail(id: &str, status: RoomStatus, players: Vec<User>) -> RoomDetail {
    let mut room = room(id, players.len() as u32);
    room.status = status;
    RoomDetail { room, players }
}

pub fn participant(id: i64, name: &str, is_owner: bool) -> Participant {
    Participant {
        id,
        username: name.to_string(),
        is_owner,
        field: None,
    }
}

// ── Frame fixtures ──────────────────────────────────────────────────

fn frame(event_type: &str, payload: serde_json::Value) -> String {
    serde_json::json!({
        "status": "OK",
        "event_type": event_type,
        "payload": payload,
    })
    .to_string()
}

pub fn create_room_frame(room: &Room) -> String {
    frame("CREATE_ROOM", serde_json::to_value(room).unwrap())
}

pub fn update_room_frame(title: &str, is_public: Option<bool>) -> String {
    let mut payload = serde_json::json!({"title": title});
    if let Some(is_public) = is_public {
        payload["is_public"] = serde_json::Value::Bool(is_public);
    }
    frame("UPDATE_ROOM", payload)
}

pub fn delete_room_frame(id: &str, user_id: i64) -> String {
    frame("DELETE_ROOM", serde_json::json!({"id": id, "user_id": user_id}))
}

pub fn join_room_frame(id: &str, user_id: i64, username: &str) -> String {
    frame(
        "JOIN_ROOM",
        serde_json::json!({"id": id, "user_id": user_id, "username": username}),
    )
}

pub fn exit_room_frame(id: &str, user_id: i64, username: &str) -> String {
    frame(
        "EXIT_ROOM",
        serde_json::json!({"id": id, "user_id": user_id, "username": username}),
    )
}

pub fn start_game_frame(id: &str) -> String {
    frame("START_GAME", serde_json::json!({"id": id}))
}

pub fn open_cell_frame(id: &str, user_id: i64, participants: &[Participant]) -> String {
    frame(
        "OPEN_CELL",
        serde_json::json!({
            "id": id,
            "user_id": user_id,
            "participants": serde_json::to_value(participants).unwrap(),
        }),
    )
}

pub fn win_game_frame(winner_id: i64, winner_username: &str) -> String {
    frame(
        "WIN_GAME",
        serde_json::json!({"winner_id": winner_id, "winner_username": winner_username}),
    )
}

pub fn lose_game_frame(loser_id: i64, loser_username: &str) -> String {
    frame(
        "LOSE_GAME",
        serde_json::json!({"loser_id": loser_id, "loser_username": loser_username}),
    )
}

pub fn new_message_frame(id: &str, creator: &User, text: &str) -> String {
    frame(
        "NEW_MESSAGE",
        serde_json::json!({
            "id": id,
            "creator_id": creator.id,
            "creator_username": creator.username,
            "text": text,
            "created_at": "2025-05-17T10:05:00Z",
        }),
    )
}
