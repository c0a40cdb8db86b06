//! # Minerace Client
//!
//! Async Rust client engine for the Minerace competitive multiplayer
//! Minesweeper service.
//!
//! The crate keeps a consumer's view of the lobby and of an active match
//! consistent with server-authoritative state: snapshots arrive over
//! HTTP, live deltas over a single duplex event channel, and the two are
//! reconciled into an eventually-consistent in-memory replica that
//! survives reconnects without duplicate entries or lost updates.
//!
//! ## Architecture
//!
//! - [`ApiClient`] — typed HTTP snapshot and command calls
//! - [`EventChannel`](channel::EventChannel) — one duplex channel with
//!   auth handshake, keep-alive filtering, fixed-delay reconnect, and
//!   subscriber fan-out
//! - [`decode_frame`](event::decode_frame) — central decoder producing
//!   the closed [`MineraceEvent`] set
//! - [`LobbySession`](lobby::LobbySession) — room-list scope: snapshot
//!   merge, "new room" highlighting, counter reconciliation
//! - [`GameSession`](game::GameSession) — match scope: entry sequence,
//!   full-replace board deltas, chat, combined match outcome, and the
//!   non-optimistic cell/chat command dispatch
//!
//! Exactly one session (and therefore one channel) is live at a time;
//! switching scopes means closing the old session before starting the
//! new one.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use minerace_client::{
//!     ApiClient, LobbyConfig, LobbySession, MemoryCredentials, WebSocketConnector,
//! };
//!
//! # async fn example() -> Result<(), minerace_client::MineraceError> {
//! let credentials = Arc::new(MemoryCredentials::new());
//! let api = ApiClient::new("http://localhost:15050", credentials.clone())?;
//! api.login("alice", "hunter2").await?;
//!
//! let (mut lobby, mut updates) = LobbySession::start(
//!     Arc::new(api),
//!     WebSocketConnector::new("ws://localhost:15050/ws"),
//!     credentials,
//!     LobbyConfig::default(),
//! );
//!
//! while let Some(update) = updates.recv().await {
//!     println!("{update:?}");
//! }
//! lobby.close().await;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod channel;
pub mod credentials;
pub mod error;
pub mod event;
pub mod game;
pub mod lobby;
pub mod protocol;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use api::{ApiClient, Backend};
pub use channel::{ChannelConfig, ChannelEvent, EventChannel, Subscription};
pub use credentials::{CredentialSource, MemoryCredentials};
pub use error::MineraceError;
pub use event::{decode_frame, Decoded, MineraceEvent};
pub use game::{GameConfig, GameSession, GameState, GameUpdate, MatchOutcome};
pub use lobby::{LobbyConfig, LobbyFilter, LobbyRoom, LobbySession, LobbyState, LobbyUpdate};
pub use protocol::{
    Cell, CellState, ChatMessage, Field, Participant, Room, RoomDetail, RoomStatus, User,
};
pub use transport::{Connector, Transport};

#[cfg(feature = "transport-websocket")]
pub use transports::websocket::{WebSocketConnector, WebSocketTransport};
