//! Lobby scope: the room-list reconciler and its session driver.
//!
//! [`LobbyState`] is the pure state machine over the visible room list,
//! keyed by room id. [`LobbySession`] drives it: it owns the lobby's
//! [`EventChannel`], loads snapshots (on entry, on filter changes, and
//! after every reconnect), applies events, schedules the transient "new"
//! highlight expiry, and surfaces the resulting list on an update
//! channel.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::api::Backend;
use crate::channel::{ChannelConfig, ChannelEvent, EventChannel, Subscription};
use crate::credentials::CredentialSource;
use crate::error::Result;
use crate::event::MineraceEvent;
use crate::protocol::{Room, RoomId, RoomStatus};
use crate::transport::Connector;

/// Default display window for the "new room" highlight.
const DEFAULT_NEW_ROOM_HIGHLIGHT: Duration = Duration::from_secs(5);

/// Default capacity of the update channel handed to the consumer.
const DEFAULT_UPDATE_CAPACITY: usize = 64;

/// Default timeout for the graceful session shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`LobbySession`].
#[derive(Debug, Clone)]
pub struct LobbyConfig {
    /// How long a freshly created room keeps its "new" highlight.
    /// Defaults to **5 seconds**.
    pub new_room_highlight: Duration,
    /// Capacity of the update channel. Defaults to **64**.
    pub update_capacity: usize,
    /// Timeout for the graceful shutdown. Defaults to **1 second**.
    pub shutdown_timeout: Duration,
    /// Configuration of the underlying event channel.
    pub channel: ChannelConfig,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            new_room_highlight: DEFAULT_NEW_ROOM_HIGHLIGHT,
            update_capacity: DEFAULT_UPDATE_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            channel: ChannelConfig::default(),
        }
    }
}

impl LobbyConfig {
    /// Set the "new room" highlight window.
    #[must_use]
    pub fn with_new_room_highlight(mut self, window: Duration) -> Self {
        self.new_room_highlight = window;
        self
    }

    /// Set the event channel configuration.
    #[must_use]
    pub fn with_channel(mut self, channel: ChannelConfig) -> Self {
        self.channel = channel;
        self
    }
}

/// The active list filter: a search string, or "my rooms only".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LobbyFilter {
    /// Free-text search over room titles. Ignored when `my_rooms` is set.
    pub query: String,
    /// Restrict the list to rooms the current user participates in.
    pub my_rooms: bool,
}

// ── Reconciler ──────────────────────────────────────────────────────

/// One entry of the visible room list.
#[derive(Debug, Clone, PartialEq)]
pub struct LobbyRoom {
    pub room: Room,
    /// Transient highlight for rooms that arrived via a `CREATE_ROOM`
    /// event. Cleared after the configured display window.
    pub is_new: bool,
}

/// What [`LobbyState::apply`] did with an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LobbyChange {
    /// A room was prepended to the list (and marked "new").
    Added(RoomId),
    /// A room was removed from the list.
    Removed(RoomId),
    /// A room's participant counter changed.
    Updated(RoomId),
}

/// Pure reconciler over the visible room list.
///
/// Guarantees: the list never contains two entries with the same id
/// (duplicate insertion is rejected, not merged), and participant
/// counters never go negative (decrements saturate at zero).
#[derive(Debug, Clone, Default)]
pub struct LobbyState {
    rooms: Vec<LobbyRoom>,
    applied_generation: u64,
}

impl LobbyState {
    /// An empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// The visible rooms, most-recently-created first for rooms that
    /// arrived via events, snapshot order otherwise.
    pub fn rooms(&self) -> &[LobbyRoom] {
        &self.rooms
    }

    /// Look a room up by id.
    pub fn get(&self, id: &str) -> Option<&LobbyRoom> {
        self.rooms.iter().find(|r| r.room.id == id)
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Replace the whole list with a snapshot.
    ///
    /// Snapshots are stamped with a monotonically increasing generation
    /// at load start; a snapshot older than the latest applied one is
    /// discarded (last-snapshot-wins) and `false` is returned.
    pub fn replace(&mut self, generation: u64, rooms: Vec<Room>) -> bool {
        if generation <= self.applied_generation {
            return false;
        }
        self.applied_generation = generation;
        self.rooms.clear();
        for room in rooms {
            // A well-behaved server never lists duplicates; reject them
            // anyway to keep the uniqueness guarantee unconditional.
            if self.get(&room.id).is_none() {
                self.rooms.push(LobbyRoom { room, is_new: false });
            }
        }
        true
    }

    /// Apply one decoded event to the list.
    ///
    /// Events for unknown rooms are no-ops, never errors: a race between
    /// the list snapshot and the stream resolves itself on the next
    /// snapshot.
    pub fn apply(&mut self, event: &MineraceEvent) -> Option<LobbyChange> {
        match event {
            MineraceEvent::RoomCreated(room) => {
                if self.get(&room.id).is_some() {
                    // Duplicate delivery; idempotent by id.
                    return None;
                }
                self.rooms.insert(
                    0,
                    LobbyRoom {
                        room: (**room).clone(),
                        is_new: true,
                    },
                );
                Some(LobbyChange::Added(room.id.clone()))
            }
            // The list shows joinable rooms; a started match leaves it
            // just like a deleted one.
            MineraceEvent::RoomDeleted { id, .. } | MineraceEvent::MatchStarted { id } => {
                let before = self.rooms.len();
                self.rooms.retain(|r| r.room.id != *id);
                (self.rooms.len() != before).then(|| LobbyChange::Removed(id.clone()))
            }
            MineraceEvent::PlayerJoined { id, .. } => self.adjust_count(id, true),
            MineraceEvent::PlayerLeft { id, .. } => self.adjust_count(id, false),
            _ => None,
        }
    }

    /// Clear the "new" highlight of a room. Returns `false` if the room
    /// is gone or was not marked — a stale expiry timer is a no-op.
    pub fn clear_new_mark(&mut self, id: &str) -> bool {
        match self.rooms.iter_mut().find(|r| r.room.id == id && r.is_new) {
            Some(entry) => {
                entry.is_new = false;
                true
            }
            None => false,
        }
    }

    fn adjust_count(&mut self, id: &str, joined: bool) -> Option<LobbyChange> {
        let entry = self.rooms.iter_mut().find(|r| r.room.id == id)?;
        let count = &mut entry.room.players_count;
        *count = if joined {
            count.saturating_add(1)
        } else {
            count.saturating_sub(1)
        };
        Some(LobbyChange::Updated(id.to_string()))
    }
}

// ── Session ─────────────────────────────────────────────────────────

/// What the lobby session surfaces to the consumer.
#[derive(Debug, Clone)]
pub enum LobbyUpdate {
    /// The current visible room list, after any change.
    Rooms(Vec<LobbyRoom>),
    /// A snapshot load failed; the previous list is retained and will
    /// self-correct on the next load.
    LoadFailed(String),
}

enum LobbyMsg {
    SetFilter(LobbyFilter),
    Refresh,
    Loaded {
        generation: u64,
        outcome: Result<Vec<Room>>,
    },
    ExpireNewMark(RoomId),
    Close,
}

/// The lobby scope driver.
///
/// Owns the lobby's event channel and reconciler for the lifetime of the
/// listing view. Created with [`start`](LobbySession::start); torn down
/// with [`close`](LobbySession::close) before entering a match scope —
/// teardown before setup keeps at most one channel live.
pub struct LobbySession {
    msg_tx: mpsc::UnboundedSender<LobbyMsg>,
    task: Option<tokio::task::JoinHandle<()>>,
    shutdown_timeout: Duration,
}

impl LobbySession {
    /// Start the lobby session: open the event channel, load the initial
    /// snapshot, and return the handle plus the update receiver.
    #[must_use = "the update receiver must be consumed to observe the room list"]
    pub fn start(
        backend: Arc<dyn Backend>,
        connector: impl Connector,
        credentials: Arc<dyn CredentialSource>,
        config: LobbyConfig,
    ) -> (Self, mpsc::Receiver<LobbyUpdate>) {
        let (update_tx, update_rx) = mpsc::channel(config.update_capacity.max(1));
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        let (channel, subscription) =
            EventChannel::open(connector, credentials, config.channel.clone());

        let shutdown_timeout = config.shutdown_timeout;
        let task = tokio::spawn(lobby_loop(
            backend,
            channel,
            subscription,
            msg_rx,
            msg_tx.clone(),
            update_tx,
            config,
        ));

        (
            Self {
                msg_tx,
                task: Some(task),
                shutdown_timeout,
            },
            update_rx,
        )
    }

    /// Change the active filter. Triggers a fresh snapshot load; while
    /// it is in flight the latest load wins.
    pub fn set_filter(&self, filter: LobbyFilter) {
        let _ = self.msg_tx.send(LobbyMsg::SetFilter(filter));
    }

    /// Reload the list with the current filter.
    pub fn refresh(&self) {
        let _ = self.msg_tx.send(LobbyMsg::Refresh);
    }

    /// Tear the scope down: close the event channel, cancel pending
    /// reconnect and highlight timers, and end the update stream.
    pub async fn close(&mut self) {
        debug!("LobbySession: close requested");
        let _ = self.msg_tx.send(LobbyMsg::Close);

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("lobby loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("lobby loop did not exit within timeout; aborting task");
                    task.abort();
                    let _ = task.await;
                }
            }
        }
    }
}

impl std::fmt::Debug for LobbySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LobbySession")
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for LobbySession {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Session loop ────────────────────────────────────────────────────

async fn lobby_loop(
    backend: Arc<dyn Backend>,
    mut channel: EventChannel,
    mut subscription: Subscription,
    mut msg_rx: mpsc::UnboundedReceiver<LobbyMsg>,
    msg_tx: mpsc::UnboundedSender<LobbyMsg>,
    update_tx: mpsc::Sender<LobbyUpdate>,
    config: LobbyConfig,
) {
    let mut state = LobbyState::new();
    let mut filter = LobbyFilter::default();
    let mut next_generation: u64 = 0;
    // Set while the channel is down; the next Connected re-snapshots.
    let mut outage_seen = false;

    debug!("lobby session started");

    // Initial snapshot. Also covers the case where the channel cannot
    // connect yet (e.g. no credential): the list still loads over HTTP.
    spawn_load(&backend, &msg_tx, &mut next_generation, filter.clone());

    loop {
        tokio::select! {
            msg = msg_rx.recv() => {
                let Some(msg) = msg else { break };
                match msg {
                    LobbyMsg::SetFilter(new_filter) => {
                        if filter != new_filter {
                            filter = new_filter;
                            spawn_load(&backend, &msg_tx, &mut next_generation, filter.clone());
                        }
                    }
                    LobbyMsg::Refresh => {
                        spawn_load(&backend, &msg_tx, &mut next_generation, filter.clone());
                    }
                    LobbyMsg::Loaded { generation, outcome } => match outcome {
                        Ok(rooms) => {
                            if state.replace(generation, rooms) {
                                emit(&update_tx, LobbyUpdate::Rooms(state.rooms().to_vec())).await;
                            } else {
                                debug!(generation, "discarding stale room list snapshot");
                            }
                        }
                        Err(e) => {
                            warn!("room list snapshot failed: {e}");
                            emit(&update_tx, LobbyUpdate::LoadFailed(e.to_string())).await;
                        }
                    },
                    LobbyMsg::ExpireNewMark(id) => {
                        // A timer outliving the room (or a duplicate
                        // timer) is a guarded no-op.
                        if state.clear_new_mark(&id) {
                            emit(&update_tx, LobbyUpdate::Rooms(state.rooms().to_vec())).await;
                        }
                    }
                    LobbyMsg::Close => break,
                }
            }

            event = subscription.recv() => {
                let Some(event) = event else { break };
                match event {
                    ChannelEvent::Connected => {
                        if std::mem::take(&mut outage_seen) {
                            // Events during the outage are lost for good;
                            // recover with a full-replace snapshot.
                            debug!("reconnected, reloading room list");
                            spawn_load(&backend, &msg_tx, &mut next_generation, filter.clone());
                        }
                    }
                    ChannelEvent::Disconnected { .. } => {
                        outage_seen = true;
                    }
                    ChannelEvent::Event(event) => match state.apply(&event) {
                        Some(LobbyChange::Added(id)) => {
                            schedule_mark_expiry(&msg_tx, id, config.new_room_highlight);
                            emit(&update_tx, LobbyUpdate::Rooms(state.rooms().to_vec())).await;
                        }
                        Some(_) => {
                            emit(&update_tx, LobbyUpdate::Rooms(state.rooms().to_vec())).await;
                        }
                        None => {}
                    },
                }
            }
        }
    }

    channel.close().await;
    debug!("lobby session ended");
}

/// Kick off a snapshot load without blocking event application. Loads
/// race; the generation stamp makes the latest one win.
fn spawn_load(
    backend: &Arc<dyn Backend>,
    msg_tx: &mpsc::UnboundedSender<LobbyMsg>,
    next_generation: &mut u64,
    filter: LobbyFilter,
) {
    *next_generation += 1;
    let generation = *next_generation;
    let backend = Arc::clone(backend);
    let msg_tx = msg_tx.clone();
    tokio::spawn(async move {
        let outcome = if filter.my_rooms {
            backend.my_rooms().await
        } else {
            backend.list_rooms(&filter.query, Some(RoomStatus::Open)).await
        };
        // The session may be gone by now; a failed send is the guard.
        let _ = msg_tx.send(LobbyMsg::Loaded { generation, outcome });
    });
}

/// Deferred single-shot removal of a "new" highlight. If the session is
/// torn down (or the room removed) before the timer fires, the message
/// lands nowhere or no-ops.
fn schedule_mark_expiry(
    msg_tx: &mpsc::UnboundedSender<LobbyMsg>,
    id: RoomId,
    window: Duration,
) {
    let msg_tx = msg_tx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(window).await;
        let _ = msg_tx.send(LobbyMsg::ExpireNewMark(id));
    });
}

async fn emit(update_tx: &mpsc::Sender<LobbyUpdate>, update: LobbyUpdate) {
    if update_tx.send(update).await.is_err() {
        debug!("update receiver dropped");
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
    use crate::protocol::RoomStatus;

    fn room(id: &str, players: u32) -> Room {
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
            players_count: players,
            max_players: 4,
        }
    }

    fn created(id: &str, players: u32) -> MineraceEvent {
        MineraceEvent::RoomCreated(Box::new(room(id, players)))
    }

    fn joined(id: &str) -> MineraceEvent {
        MineraceEvent::PlayerJoined {
            id: id.to_string(),
            user_id: 9,
            username: "joiner".into(),
        }
    }

    fn left(id: &str) -> MineraceEvent {
        MineraceEvent::PlayerLeft {
            id: id.to_string(),
            user_id: 9,
            username: "leaver".into(),
        }
    }

    #[test]
    fn snapshot_replaces_whole_list_in_order() {
        let mut state = LobbyState::new();
        assert!(state.replace(1, vec![room("r1", 1), room("r2", 0)]));
        let ids: Vec<&str> = state.rooms().iter().map(|r| r.room.id.as_str()).collect();
        assert_eq!(ids, ["r1", "r2"]);
        assert!(state.rooms().iter().all(|r| !r.is_new));
    }

    #[test]
    fn stale_snapshot_loses_to_latest() {
        let mut state = LobbyState::new();
        assert!(state.replace(2, vec![room("newer", 0)]));
        // An older load finishing late must be discarded.
        assert!(!state.replace(1, vec![room("older", 0)]));
        assert_eq!(state.len(), 1);
        assert!(state.get("newer").is_some());
    }

    #[test]
    fn created_room_is_prepended_and_marked_new() {
        let mut state = LobbyState::new();
        state.replace(1, vec![room("r1", 1)]);

        let change = state.apply(&created("r2", 0));
        assert_eq!(change, Some(LobbyChange::Added("r2".into())));

        let ids: Vec<&str> = state.rooms().iter().map(|r| r.room.id.as_str()).collect();
        assert_eq!(ids, ["r2", "r1"]);
        assert!(state.get("r2").unwrap().is_new);
        assert!(!state.get("r1").unwrap().is_new);
    }

    #[test]
    fn duplicate_created_event_is_idempotent() {
        let mut state = LobbyState::new();
        state.apply(&created("r1", 0));
        // Same event delivered twice.
        assert_eq!(state.apply(&created("r1", 0)), None);
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn snapshot_then_duplicate_create_keeps_unique_ids() {
        let mut state = LobbyState::new();
        state.replace(1, vec![room("r1", 2)]);
        assert_eq!(state.apply(&created("r1", 0)), None);
        assert_eq!(state.len(), 1);
        // The snapshot's counter is kept, not overwritten.
        assert_eq!(state.get("r1").unwrap().room.players_count, 2);
    }

    #[test]
    fn delete_and_start_remove_by_id() {
        let mut state = LobbyState::new();
        state.replace(1, vec![room("r1", 1), room("r2", 1)]);

        let change = state.apply(&MineraceEvent::RoomDeleted {
            id: "r1".into(),
            user_id: 1,
        });
        assert_eq!(change, Some(LobbyChange::Removed("r1".into())));

        let change = state.apply(&MineraceEvent::MatchStarted { id: "r2".into() });
        assert_eq!(change, Some(LobbyChange::Removed("r2".into())));
        assert!(state.is_empty());
    }

    #[test]
    fn removing_an_absent_room_is_a_no_op() {
        let mut state = LobbyState::new();
        let change = state.apply(&MineraceEvent::RoomDeleted {
            id: "ghost".into(),
            user_id: 1,
        });
        assert_eq!(change, None);
    }

    #[test]
    fn balanced_join_and_leave_restore_the_counter() {
        let mut state = LobbyState::new();
        state.replace(1, vec![room("r1", 1)]);

        state.apply(&joined("r1"));
        assert_eq!(state.get("r1").unwrap().room.players_count, 2);

        state.apply(&left("r1"));
        assert_eq!(state.get("r1").unwrap().room.players_count, 1);
    }

    #[test]
    fn counter_never_goes_negative() {
        let mut state = LobbyState::new();
        state.replace(1, vec![room("r1", 0)]);

        state.apply(&left("r1"));
        assert_eq!(state.get("r1").unwrap().room.players_count, 0);
    }

    #[test]
    fn presence_for_unknown_room_is_ignored() {
        let mut state = LobbyState::new();
        state.replace(1, vec![room("r1", 1)]);
        // Race between the snapshot and the stream: ignore, the counter
        // self-corrects on the next snapshot.
        assert_eq!(state.apply(&joined("ghost")), None);
    }

    #[test]
    fn clear_new_mark_is_single_shot() {
        let mut state = LobbyState::new();
        state.apply(&created("r1", 0));

        assert!(state.clear_new_mark("r1"));
        assert!(!state.get("r1").unwrap().is_new);
        // Second firing (or a stale timer) is a no-op.
        assert!(!state.clear_new_mark("r1"));
        assert!(!state.clear_new_mark("gone"));
    }

    #[test]
    fn match_scope_events_do_not_touch_the_list() {
        let mut state = LobbyState::new();
        state.replace(1, vec![room("r1", 1)]);

        assert_eq!(
            state.apply(&MineraceEvent::RoomUpdated {
                title: "x".into(),
                is_public: None
            }),
            None
        );
        assert_eq!(
            state.apply(&MineraceEvent::GameOver {
                winner: None,
                loser: None
            }),
            None
        );
        assert_eq!(state.get("r1").unwrap().room.title, "room r1");
    }
}
