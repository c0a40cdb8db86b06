//! Match scope: the in-match reconciler, its session driver, and the
//! cell/chat command dispatch.
//!
//! [`GameState`] is the pure state machine over one match's replica:
//! participant roster, per-participant boards, chat log, and lifecycle
//! status. [`GameSession`] drives it for exactly one room id: it runs
//! the entry sequence, owns the match's [`EventChannel`], re-snapshots
//! after every reconnect, applies events, and surfaces typed updates.
//!
//! Commands are deliberately non-optimistic: a successful `open`/`flag`
//! call mutates nothing locally — the board changes only when the next
//! full-replace field delta arrives, so there is never a second source
//! of truth for cell state.

use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::api::Backend;
use crate::channel::{ChannelConfig, ChannelEvent, EventChannel, Subscription};
use crate::credentials::CredentialSource;
use crate::error::{MineraceError, Result};
use crate::event::MineraceEvent;
use crate::protocol::{
    ChatMessage, MessageId, Participant, RoomDetail, RoomId, RoomStatus, User, UserId,
};
use crate::transport::Connector;

/// Default capacity of the update channel handed to the consumer.
const DEFAULT_UPDATE_CAPACITY: usize = 256;

/// Default timeout for the graceful session shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`GameSession`].
#[derive(Debug, Clone)]
pub struct GameConfig {
    /// Capacity of the update channel. Defaults to **256**.
    pub update_capacity: usize,
    /// Timeout for the graceful shutdown. Defaults to **1 second**.
    pub shutdown_timeout: Duration,
    /// Configuration of the underlying event channel.
    pub channel: ChannelConfig,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            update_capacity: DEFAULT_UPDATE_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            channel: ChannelConfig::default(),
        }
    }
}

impl GameConfig {
    /// Set the event channel configuration.
    #[must_use]
    pub fn with_channel(mut self, channel: ChannelConfig) -> Self {
        self.channel = channel;
        self
    }
}

// ── Outcome ─────────────────────────────────────────────────────────

/// The resolved end of a match, derived from the combined outcome event
/// plus the participant set.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    /// `true` when the acting user won.
    pub won: bool,
    /// The winner, when known or resolvable.
    pub winner: Option<User>,
    /// The loser, when known or resolvable.
    pub loser: Option<User>,
}

// ── Updates ─────────────────────────────────────────────────────────

/// What the game session surfaces to the consumer.
#[derive(Debug, Clone)]
pub enum GameUpdate {
    /// The full replica, after the entry snapshot or a post-reconnect
    /// re-snapshot. Always the first update of a session.
    Snapshot {
        detail: RoomDetail,
        participants: Vec<Participant>,
        messages: Vec<ChatMessage>,
    },
    /// Title/visibility of the room changed.
    DetailChanged(RoomDetail),
    /// The participant roster changed (someone joined or left).
    ParticipantsChanged(Vec<Participant>),
    /// The complete board set was replaced by a cell-state delta.
    FieldsReplaced(Vec<Participant>),
    /// A chat message arrived (deduplicated by id).
    MessageReceived(ChatMessage),
    /// The match started; boards become interactive.
    MatchStarted,
    /// Transient notice: another participant joined.
    PlayerJoined { username: String },
    /// Transient notice: another participant left.
    PlayerLeft { username: String },
    /// A post-reconnect re-snapshot failed; the stale replica is kept
    /// until the next reconnect.
    SnapshotFailed(String),
    /// Terminal: the room was deleted. The session tears down after
    /// emitting this; the consumer navigates back to the lobby.
    RoomDeleted,
    /// Terminal: the match concluded. The session tears down after
    /// emitting this; the consumer shows the outcome and navigates away.
    Concluded(MatchOutcome),
}

impl GameUpdate {
    fn is_terminal(&self) -> bool {
        matches!(self, GameUpdate::RoomDeleted | GameUpdate::Concluded(_))
    }
}

// ── Reconciler ──────────────────────────────────────────────────────

/// Pure reconciler over one match's replica.
#[derive(Debug, Clone)]
pub struct GameState {
    user: User,
    detail: RoomDetail,
    participants: Vec<Participant>,
    messages: Vec<ChatMessage>,
    seen_message_ids: HashSet<MessageId>,
}

impl GameState {
    /// Build the initial replica from the entry snapshots.
    pub fn new(
        user: User,
        detail: RoomDetail,
        participants: Vec<Participant>,
        messages: Vec<ChatMessage>,
    ) -> Self {
        let seen_message_ids = messages.iter().map(|m| m.id.clone()).collect();
        Self {
            user,
            detail,
            participants,
            messages,
            seen_message_ids,
        }
    }

    /// The acting user.
    pub fn user(&self) -> &User {
        &self.user
    }

    /// The room detail.
    pub fn detail(&self) -> &RoomDetail {
        &self.detail
    }

    /// The participant set with their boards.
    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    /// The chat log, in arrival order.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// `true` once the match has started and boards carry real data;
    /// before that, boards render as all-closed placeholders sized from
    /// the room's configured dimensions.
    pub fn is_started(&self) -> bool {
        self.detail.room.status == RoomStatus::Started
    }

    /// Look a participant up by user id.
    pub fn participant(&self, user_id: UserId) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == user_id)
    }

    /// The acting user's own participant entry, if they are in the match.
    pub fn my_participant(&self) -> Option<&Participant> {
        self.participant(self.user.id)
    }

    /// Replace the whole replica with fresh snapshots (post-reconnect
    /// recovery — events lost during the outage are unrecoverable, so
    /// the replica is rebuilt rather than patched).
    pub fn replace_snapshot(
        &mut self,
        detail: RoomDetail,
        participants: Vec<Participant>,
        messages: Vec<ChatMessage>,
    ) {
        self.detail = detail;
        self.participants = participants;
        self.seen_message_ids = messages.iter().map(|m| m.id.clone()).collect();
        self.messages = messages;
    }

    /// Apply one decoded event, returning the updates to surface in
    /// order. Terminal updates ([`GameUpdate::RoomDeleted`],
    /// [`GameUpdate::Concluded`]) end the scope.
    pub fn apply(&mut self, event: MineraceEvent) -> Vec<GameUpdate> {
        match event {
            MineraceEvent::PlayerJoined {
                user_id, username, ..
            } => {
                // The acting user's own join came back around the loop.
                if user_id == self.user.id || self.participant(user_id).is_some() {
                    return Vec::new();
                }
                self.detail.players.push(User {
                    id: user_id,
                    username: username.clone(),
                });
                self.participants.push(Participant {
                    id: user_id,
                    username: username.clone(),
                    is_owner: false,
                    field: None,
                });
                vec![
                    GameUpdate::PlayerJoined { username },
                    GameUpdate::ParticipantsChanged(self.participants.clone()),
                ]
            }

            MineraceEvent::PlayerLeft {
                user_id, username, ..
            } => {
                if user_id == self.user.id || self.participant(user_id).is_none() {
                    return Vec::new();
                }
                self.detail.players.retain(|p| p.id != user_id);
                self.participants.retain(|p| p.id != user_id);
                vec![
                    GameUpdate::PlayerLeft { username },
                    GameUpdate::ParticipantsChanged(self.participants.clone()),
                ]
            }

            MineraceEvent::RoomUpdated { title, is_public } => {
                self.detail.room.title = title;
                if let Some(is_public) = is_public {
                    self.detail.room.is_public = is_public;
                }
                vec![GameUpdate::DetailChanged(self.detail.clone())]
            }

            MineraceEvent::RoomDeleted { id, .. } => {
                if id == self.detail.room.id {
                    vec![GameUpdate::RoomDeleted]
                } else {
                    Vec::new()
                }
            }

            MineraceEvent::MatchStarted { .. } => {
                self.detail.room.status = RoomStatus::Started;
                vec![GameUpdate::MatchStarted]
            }

            MineraceEvent::FieldsReplaced { participants, .. } => {
                // Full replace, never a patch: the payload is the entire
                // board set and correctness relies on that.
                self.participants = participants;
                vec![GameUpdate::FieldsReplaced(self.participants.clone())]
            }

            MineraceEvent::GameOver { winner, loser } => {
                let outcome = self.resolve_outcome(winner, loser);
                self.detail.room.status = RoomStatus::Closed;
                self.detail.room.winner_id = outcome.winner.as_ref().map(|w| w.id);
                vec![GameUpdate::Concluded(outcome)]
            }

            MineraceEvent::ChatMessage(message) => {
                if !self.seen_message_ids.insert(message.id.clone()) {
                    // Duplicate delivery; the log is idempotent by id.
                    return Vec::new();
                }
                self.messages.push(message.clone());
                vec![GameUpdate::MessageReceived(message)]
            }

            // Lobby-only event; a match replica has nothing to do with it.
            MineraceEvent::RoomCreated(_) => Vec::new(),
        }
    }

    /// Resolve a combined outcome event against the participant set.
    ///
    /// The wire may name only one side. The missing side is derived as
    /// "the other participant" — only when exactly two are known, since
    /// with more the complement is ambiguous.
    pub fn resolve_outcome(&self, winner: Option<User>, loser: Option<User>) -> MatchOutcome {
        let complement = |named: &User| -> Option<User> {
            if self.participants.len() != 2 {
                return None;
            }
            self.participants
                .iter()
                .find(|p| p.id != named.id)
                .map(|p| User {
                    id: p.id,
                    username: p.username.clone(),
                })
        };

        let winner = winner.or_else(|| loser.as_ref().and_then(&complement));
        let loser = loser.or_else(|| winner.as_ref().and_then(&complement));
        let won = winner.as_ref().is_some_and(|w| w.id == self.user.id);
        MatchOutcome { won, winner, loser }
    }
}

/// Derive a field-less participant set from the room detail, used when
/// the field snapshot is unavailable (e.g. before the match starts).
fn participants_from_detail(detail: &RoomDetail) -> Vec<Participant> {
    detail
        .players
        .iter()
        .map(|p| Participant {
            id: p.id,
            username: p.username.clone(),
            is_owner: p.id == detail.room.owner_id,
            field: None,
        })
        .collect()
}

// ── Session ─────────────────────────────────────────────────────────

/// The match scope driver, scoped to exactly one room id.
///
/// Created with [`start`](GameSession::start), which runs the entry
/// sequence before any task is spawned: detail snapshot, enter-command
/// fallback, field snapshot, chat backlog, then the live channel. Entry
/// failure is terminal and returned as an error — it is not retried.
pub struct GameSession {
    room_id: RoomId,
    backend: Arc<dyn Backend>,
    state: Arc<StdMutex<GameState>>,
    close_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
    shutdown_timeout: Duration,
}

impl GameSession {
    /// Run the entry sequence and start the session.
    ///
    /// # Errors
    ///
    /// Returns [`MineraceError::EntryFailed`] when the detail snapshot
    /// cannot be loaded and the fallback enter command (or the re-fetch
    /// after it) also fails. The caller surfaces the failure and leaves
    /// the scope.
    #[must_use = "the update receiver must be consumed to observe the match"]
    pub async fn start(
        backend: Arc<dyn Backend>,
        connector: impl Connector,
        credentials: Arc<dyn CredentialSource>,
        room_id: RoomId,
        user: User,
        config: GameConfig,
    ) -> Result<(Self, mpsc::Receiver<GameUpdate>)> {
        let detail = fetch_or_enter(&backend, &room_id, user.id).await?;

        // Field snapshot and chat backlog failures are degraded starts,
        // not terminal ones: boards fall back to placeholder rosters and
        // the chat to empty, both self-correct via the stream.
        let participants = match backend.field_snapshot(&room_id).await {
            Ok(participants) if !participants.is_empty() => participants,
            Ok(_) => participants_from_detail(&detail),
            Err(e) => {
                warn!("field snapshot failed, using placeholder roster: {e}");
                participants_from_detail(&detail)
            }
        };
        let messages = match backend.chat_backlog(&room_id).await {
            Ok(messages) => messages,
            Err(e) => {
                warn!("chat backlog failed, starting empty: {e}");
                Vec::new()
            }
        };

        let state = GameState::new(user, detail, participants, messages);

        let (update_tx, update_rx) = mpsc::channel(config.update_capacity.max(1));
        // Queue the bootstrap replica before any event can arrive.
        let _ = update_tx.try_send(GameUpdate::Snapshot {
            detail: state.detail().clone(),
            participants: state.participants().to_vec(),
            messages: state.messages().to_vec(),
        });

        let (channel, subscription) =
            EventChannel::open(connector, credentials, config.channel.clone());
        let (close_tx, close_rx) = oneshot::channel::<()>();
        let state = Arc::new(StdMutex::new(state));

        let task = tokio::spawn(game_loop(
            Arc::clone(&backend),
            Arc::clone(&state),
            channel,
            subscription,
            close_rx,
            update_tx,
            room_id.clone(),
        ));

        Ok((
            Self {
                room_id,
                backend,
                state,
                close_tx: Some(close_tx),
                task: Some(task),
                shutdown_timeout: config.shutdown_timeout,
            },
            update_rx,
        ))
    }

    /// The room this session is scoped to.
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// A point-in-time copy of the replica.
    pub fn replica(&self) -> GameState {
        self.lock_state().clone()
    }

    // ── Command dispatch ────────────────────────────────────────────

    /// Open the cell at `(row, col)` on the board owned by `board_owner`.
    ///
    /// Verified client-side before any network traffic: the target board
    /// must belong to the acting user ([`MineraceError::NotYourBoard`])
    /// and the coordinates must be on the grid. On success nothing
    /// changes locally — the board updates when the next cell-state
    /// delta arrives.
    pub async fn open_cell(&self, board_owner: UserId, row: usize, col: usize) -> Result<()> {
        self.preflight_cell(board_owner, row, col)?;
        self.backend.open_cell(&self.room_id, row, col).await
    }

    /// Toggle a flag at `(row, col)` on the board owned by `board_owner`.
    /// Same pre-flight and non-optimistic semantics as
    /// [`open_cell`](Self::open_cell).
    pub async fn flag_cell(&self, board_owner: UserId, row: usize, col: usize) -> Result<()> {
        self.preflight_cell(board_owner, row, col)?;
        self.backend.flag_cell(&self.room_id, row, col).await
    }

    /// Send a chat line. The message is not appended locally — it comes
    /// back through the event stream, so the rendered history always
    /// matches server order with no speculative duplicates.
    pub async fn send_chat(&self, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Err(MineraceError::InvalidInput("empty chat message".into()));
        }
        self.backend.send_message(&self.room_id, text).await
    }

    /// Start the match (owner only; enforced server-side).
    pub async fn start_match(&self) -> Result<()> {
        self.backend.start_match(&self.room_id).await
    }

    /// Leave the match. Other participants observe the exit through the
    /// stream; the caller closes the session afterwards.
    pub async fn exit_room(&self) -> Result<()> {
        self.backend.exit_room(&self.room_id).await
    }

    /// Tear the scope down: close the event channel and cancel any
    /// pending reconnect.
    pub async fn close(&mut self) {
        debug!(room = %self.room_id, "GameSession: close requested");
        if let Some(tx) = self.close_tx.take() {
            let _ = tx.send(());
        }

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("game loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("game loop did not exit within timeout; aborting task");
                    task.abort();
                    let _ = task.await;
                }
            }
        }
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn lock_state(&self) -> MutexGuard<'_, GameState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn preflight_cell(&self, board_owner: UserId, row: usize, col: usize) -> Result<()> {
        let state = self.lock_state();

        // Ownership first: acting on an opponent's board never reaches
        // the network.
        if board_owner != state.user().id {
            return Err(MineraceError::NotYourBoard);
        }
        let mine = state.my_participant().ok_or(MineraceError::NotYourBoard)?;

        let (rows, cols) = match &mine.field {
            Some(field) => (field.rows, field.cols),
            None => (state.detail().room.rows, state.detail().room.cols),
        };
        if row >= rows || col >= cols {
            return Err(MineraceError::InvalidInput(format!(
                "cell ({row}, {col}) is outside the {rows}x{cols} board"
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for GameSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameSession")
            .field("room_id", &self.room_id)
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for GameSession {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Entry sequence ──────────────────────────────────────────────────

/// Fetch the room detail; when the current user is not yet a
/// participant (or the fetch failed), issue the enter command and
/// re-fetch. A failure of the fallback is terminal for the scope.
async fn fetch_or_enter(
    backend: &Arc<dyn Backend>,
    room_id: &str,
    user_id: UserId,
) -> Result<RoomDetail> {
    match backend.room_detail(room_id).await {
        Ok(detail) if detail.contains_user(user_id) => Ok(detail),
        Ok(_) | Err(_) => {
            backend
                .enter_room(room_id)
                .await
                .map_err(|e| MineraceError::EntryFailed(e.to_string()))?;
            backend
                .room_detail(room_id)
                .await
                .map_err(|e| MineraceError::EntryFailed(e.to_string()))
        }
    }
}

// ── Session loop ────────────────────────────────────────────────────

async fn game_loop(
    backend: Arc<dyn Backend>,
    state: Arc<StdMutex<GameState>>,
    mut channel: EventChannel,
    mut subscription: Subscription,
    mut close_rx: oneshot::Receiver<()>,
    update_tx: mpsc::Sender<GameUpdate>,
    room_id: RoomId,
) {
    // Set while the channel is down; the next Connected re-snapshots.
    let mut outage_seen = false;

    debug!(room = %room_id, "game session started");

    'session: loop {
        tokio::select! {
            _ = &mut close_rx => break 'session,

            event = subscription.recv() => {
                let Some(event) = event else { break 'session };
                match event {
                    ChannelEvent::Connected => {
                        if std::mem::take(&mut outage_seen) {
                            // Awaited inline: the fresh snapshot must be
                            // applied before further events are, so the
                            // replica never mixes pre- and post-outage
                            // state.
                            match resnapshot(&backend, &room_id, &state).await {
                                Ok(update) => emit(&update_tx, update).await,
                                Err(e) => {
                                    warn!("re-snapshot after reconnect failed: {e}");
                                    emit(&update_tx, GameUpdate::SnapshotFailed(e.to_string()))
                                        .await;
                                }
                            }
                        }
                    }
                    ChannelEvent::Disconnected { .. } => {
                        outage_seen = true;
                    }
                    ChannelEvent::Event(event) => {
                        let updates = state
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .apply(event);
                        for update in updates {
                            let terminal = update.is_terminal();
                            emit(&update_tx, update).await;
                            if terminal {
                                break 'session;
                            }
                        }
                    }
                }
            }
        }
    }

    channel.close().await;
    debug!(room = %room_id, "game session ended");
}

/// Re-fetch detail, fields, and backlog after a reconnect and replace
/// the replica wholesale.
async fn resnapshot(
    backend: &Arc<dyn Backend>,
    room_id: &str,
    state: &Arc<StdMutex<GameState>>,
) -> Result<GameUpdate> {
    let detail = backend.room_detail(room_id).await?;
    let participants = match backend.field_snapshot(room_id).await? {
        participants if participants.is_empty() => participants_from_detail(&detail),
        participants => participants,
    };
    let messages = backend.chat_backlog(room_id).await?;

    let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
    state.replace_snapshot(detail, participants, messages);
    Ok(GameUpdate::Snapshot {
        detail: state.detail().clone(),
        participants: state.participants().to_vec(),
        messages: state.messages().to_vec(),
    })
}

async fn emit(update_tx: &mpsc::Sender<GameUpdate>, update: GameUpdate) {
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
    use crate::protocol::{Cell, CellState, Field, Room};

    fn me() -> User {
        User {
            id: 1,
            username: "alice".into(),
        }
    }

    fn rival() -> User {
        User {
            id: 2,
            username: "bob".into(),
        }
    }

    fn detail(status: RoomStatus, players: Vec<User>) -> RoomDetail {
        RoomDetail {
            room: Room {
                id: "r1".into(),
                title: "duel".into(),
                owner_id: 1,
                owner_name: "alice".into(),
                is_public: true,
                mines: 10,
                rows: 8,
                cols: 8,
                created_at: "2025-05-17T09:30:00Z".into(),
                status,
                winner_id: None,
                players_count: players.len() as u32,
                max_players: 2,
            },
            players,
        }
    }

    fn two_player_state(status: RoomStatus) -> GameState {
        let detail = detail(status, vec![me(), rival()]);
        let participants = participants_from_detail(&detail);
        GameState::new(me(), detail, participants, Vec::new())
    }

    fn message(id: &str, text: &str) -> ChatMessage {
        ChatMessage {
            id: id.into(),
            creator_id: 2,
            creator_username: "bob".into(),
            text: text.into(),
            created_at: "2025-05-17T10:05:00Z".into(),
        }
    }

    fn board_with(cell: CellState) -> Field {
        let mut field = Field::closed(8, 8, 10);
        if let Some(row) = field.grid.get_mut(2) {
            if let Some(c) = row.get_mut(3) {
                *c = Cell {
                    value: cell,
                    is_open: cell.is_revealed(),
                };
            }
        }
        field
    }

    fn fields_event(owner: UserId, cell: CellState) -> MineraceEvent {
        MineraceEvent::FieldsReplaced {
            id: "r1".into(),
            user_id: owner,
            participants: vec![
                Participant {
                    id: 1,
                    username: "alice".into(),
                    is_owner: true,
                    field: Some(board_with(cell)),
                },
                Participant {
                    id: 2,
                    username: "bob".into(),
                    is_owner: false,
                    field: Some(Field::closed(8, 8, 10)),
                },
            ],
        }
    }

    // ── Roster ──────────────────────────────────────────────────────

    #[test]
    fn join_of_another_player_extends_roster_once() {
        let detail = detail(RoomStatus::Open, vec![me()]);
        let participants = participants_from_detail(&detail);
        let mut state = GameState::new(me(), detail, participants, Vec::new());

        let join = MineraceEvent::PlayerJoined {
            id: "r1".into(),
            user_id: 2,
            username: "bob".into(),
        };
        let updates = state.apply(join.clone());
        assert!(matches!(
            updates.first(),
            Some(GameUpdate::PlayerJoined { username }) if username == "bob"
        ));
        assert_eq!(state.participants().len(), 2);
        assert!(state.detail().contains_user(2));

        // Duplicate delivery is idempotent.
        assert!(state.apply(join).is_empty());
        assert_eq!(state.participants().len(), 2);
    }

    #[test]
    fn own_join_echo_is_ignored() {
        let mut state = two_player_state(RoomStatus::Open);
        let updates = state.apply(MineraceEvent::PlayerJoined {
            id: "r1".into(),
            user_id: 1,
            username: "alice".into(),
        });
        assert!(updates.is_empty());
        assert_eq!(state.participants().len(), 2);
    }

    #[test]
    fn leave_removes_from_roster() {
        let mut state = two_player_state(RoomStatus::Open);
        let updates = state.apply(MineraceEvent::PlayerLeft {
            id: "r1".into(),
            user_id: 2,
            username: "bob".into(),
        });
        assert!(matches!(
            updates.first(),
            Some(GameUpdate::PlayerLeft { username }) if username == "bob"
        ));
        assert_eq!(state.participants().len(), 1);
        assert!(!state.detail().contains_user(2));
    }

    // ── Detail patching ─────────────────────────────────────────────

    #[test]
    fn room_update_patches_title_and_visibility_only() {
        let mut state = two_player_state(RoomStatus::Open);
        let updates = state.apply(MineraceEvent::RoomUpdated {
            title: "renamed".into(),
            is_public: Some(false),
        });
        assert!(matches!(updates.first(), Some(GameUpdate::DetailChanged(_))));
        assert_eq!(state.detail().room.title, "renamed");
        assert!(!state.detail().room.is_public);
        // Everything else untouched.
        assert_eq!(state.detail().room.max_players, 2);
        assert_eq!(state.participants().len(), 2);
    }

    #[test]
    fn room_update_without_visibility_keeps_it() {
        let mut state = two_player_state(RoomStatus::Open);
        state.apply(MineraceEvent::RoomUpdated {
            title: "renamed".into(),
            is_public: None,
        });
        assert!(state.detail().room.is_public);
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    #[test]
    fn delete_of_this_room_is_terminal() {
        let mut state = two_player_state(RoomStatus::Open);
        let updates = state.apply(MineraceEvent::RoomDeleted {
            id: "r1".into(),
            user_id: 1,
        });
        assert!(matches!(updates.as_slice(), [GameUpdate::RoomDeleted]));
    }

    #[test]
    fn delete_of_another_room_is_ignored() {
        let mut state = two_player_state(RoomStatus::Open);
        let updates = state.apply(MineraceEvent::RoomDeleted {
            id: "other".into(),
            user_id: 1,
        });
        assert!(updates.is_empty());
    }

    #[test]
    fn match_started_flips_status() {
        let mut state = two_player_state(RoomStatus::Open);
        assert!(!state.is_started());
        let updates = state.apply(MineraceEvent::MatchStarted { id: "r1".into() });
        assert!(matches!(updates.as_slice(), [GameUpdate::MatchStarted]));
        assert!(state.is_started());
    }

    // ── Boards ──────────────────────────────────────────────────────

    #[test]
    fn field_delta_replaces_the_whole_board_set() {
        let mut state = two_player_state(RoomStatus::Started);
        assert!(state.my_participant().unwrap().field.is_none());

        state.apply(fields_event(1, CellState::Revealed(3)));

        let field = state.my_participant().unwrap().field.as_ref().unwrap();
        assert_eq!(field.cell(2, 3).unwrap().value, CellState::Revealed(3));
        // The opponent's board is visible too (spectating).
        assert!(state.participant(2).unwrap().field.is_some());
    }

    #[test]
    fn revealed_cell_survives_subsequent_replaces() {
        let mut state = two_player_state(RoomStatus::Started);
        state.apply(fields_event(1, CellState::Revealed(3)));

        // The server's reveals are monotonic: later full states still
        // carry the revealed cell.
        state.apply(fields_event(2, CellState::Revealed(3)));

        let field = state.my_participant().unwrap().field.as_ref().unwrap();
        assert!(field.cell(2, 3).unwrap().value.is_revealed());
    }

    // ── Chat ────────────────────────────────────────────────────────

    #[test]
    fn chat_appends_in_arrival_order() {
        let mut state = two_player_state(RoomStatus::Started);
        state.apply(MineraceEvent::ChatMessage(message("m1", "first")));
        state.apply(MineraceEvent::ChatMessage(message("m2", "second")));

        let texts: Vec<&str> = state.messages().iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["first", "second"]);
    }

    #[test]
    fn duplicate_chat_message_is_dropped() {
        let mut state = two_player_state(RoomStatus::Started);
        state.apply(MineraceEvent::ChatMessage(message("m1", "once")));
        let updates = state.apply(MineraceEvent::ChatMessage(message("m1", "once")));
        assert!(updates.is_empty());
        assert_eq!(state.messages().len(), 1);
    }

    #[test]
    fn backlog_ids_are_deduplicated_too() {
        let detail = detail(RoomStatus::Started, vec![me(), rival()]);
        let participants = participants_from_detail(&detail);
        let mut state = GameState::new(
            me(),
            detail,
            participants,
            vec![message("m1", "from backlog")],
        );

        // The same message echoed by the stream after the backlog fetch.
        let updates = state.apply(MineraceEvent::ChatMessage(message("m1", "from backlog")));
        assert!(updates.is_empty());
        assert_eq!(state.messages().len(), 1);
    }

    // ── Outcome ─────────────────────────────────────────────────────

    #[test]
    fn winner_event_naming_self_resolves_to_victory() {
        let mut state = two_player_state(RoomStatus::Started);
        let updates = state.apply(MineraceEvent::GameOver {
            winner: Some(me()),
            loser: None,
        });
        match updates.as_slice() {
            [GameUpdate::Concluded(outcome)] => {
                assert!(outcome.won);
                assert_eq!(outcome.winner.as_ref().unwrap().id, 1);
                // The loser is resolvable: the only other participant.
                assert_eq!(outcome.loser.as_ref().unwrap().id, 2);
            }
            other => panic!("expected Concluded, got {other:?}"),
        }
        assert_eq!(state.detail().room.status, RoomStatus::Closed);
        assert_eq!(state.detail().room.winner_id, Some(1));
    }

    #[test]
    fn loser_event_naming_self_resolves_winner_from_roster() {
        let mut state = two_player_state(RoomStatus::Started);
        let updates = state.apply(MineraceEvent::GameOver {
            winner: None,
            loser: Some(me()),
        });
        match updates.as_slice() {
            [GameUpdate::Concluded(outcome)] => {
                assert!(!outcome.won);
                // The winner was not named by the wire; it is the other
                // known participant.
                assert_eq!(outcome.winner.as_ref().unwrap().id, 2);
                assert_eq!(outcome.winner.as_ref().unwrap().username, "bob");
            }
            other => panic!("expected Concluded, got {other:?}"),
        }
    }

    #[test]
    fn loser_event_naming_rival_resolves_to_victory() {
        let mut state = two_player_state(RoomStatus::Started);
        let updates = state.apply(MineraceEvent::GameOver {
            winner: None,
            loser: Some(rival()),
        });
        match updates.as_slice() {
            [GameUpdate::Concluded(outcome)] => {
                assert!(outcome.won);
                assert_eq!(outcome.winner.as_ref().unwrap().id, 1);
            }
            other => panic!("expected Concluded, got {other:?}"),
        }
    }

    #[test]
    fn missing_side_stays_unresolved_beyond_two_participants() {
        let carol = User {
            id: 3,
            username: "carol".into(),
        };
        let detail = detail(RoomStatus::Started, vec![me(), rival(), carol]);
        let participants = participants_from_detail(&detail);
        let state = GameState::new(me(), detail, participants, Vec::new());

        let outcome = state.resolve_outcome(None, Some(rival()));
        // With three participants "the other one" is ambiguous.
        assert!(outcome.winner.is_none());
        assert!(!outcome.won);
        assert_eq!(outcome.loser.as_ref().unwrap().id, 2);
    }

    #[test]
    fn lobby_event_does_not_touch_match_replica() {
        let mut state = two_player_state(RoomStatus::Open);
        let room = state.detail().room.clone();
        let updates = state.apply(MineraceEvent::RoomCreated(Box::new(room)));
        assert!(updates.is_empty());
    }
}
