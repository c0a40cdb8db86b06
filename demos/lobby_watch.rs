//! # Lobby Watch Example
//!
//! Demonstrates a complete Minerace client lifecycle:
//!
//! 1. Log in over HTTP and record the session credential
//! 2. Start a lobby session (snapshot + live event channel)
//! 3. React to lobby updates (new rooms, counters, removals)
//! 4. Shut down gracefully on Ctrl+C
//!
//! ## Running
//!
//! ```sh
//! # Against a Minerace deployment on localhost:15050:
//! cargo run --example lobby_watch
//!
//! # Override endpoints and account:
//! MINERACE_URL=http://play.example:15050 \
//! MINERACE_WS_URL=ws://play.example:15050/ws \
//! MINERACE_USER=alice MINERACE_PASS=hunter2 \
//! cargo run --example lobby_watch
//! ```

use std::sync::Arc;

use minerace_client::{
    ApiClient, LobbyConfig, LobbySession, LobbyUpdate, MemoryCredentials, WebSocketConnector,
};

/// Default HTTP endpoint when `MINERACE_URL` is not set.
const DEFAULT_URL: &str = "http://localhost:15050";

/// Default event channel endpoint when `MINERACE_WS_URL` is not set.
const DEFAULT_WS_URL: &str = "ws://localhost:15050/ws";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Initialize tracing. Set `RUST_LOG=debug` for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let url = std::env::var("MINERACE_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
    let ws_url = std::env::var("MINERACE_WS_URL").unwrap_or_else(|_| DEFAULT_WS_URL.to_string());
    let username = std::env::var("MINERACE_USER").unwrap_or_else(|_| "watcher".to_string());
    let password = std::env::var("MINERACE_PASS").unwrap_or_else(|_| "watcher-pass".to_string());

    // ── Login ───────────────────────────────────────────────────────
    // The credential store is shared: the login call writes the token,
    // the event channel and every later HTTP call read it back.
    let credentials = Arc::new(MemoryCredentials::new());
    let api = ApiClient::new(&url, credentials.clone())?;

    if api.login(&username, &password).await.is_err() {
        tracing::info!("login failed, registering a fresh account");
        api.register(&username, &password).await?;
        api.login(&username, &password).await?;
    }
    let user = api.current_user().await?;
    tracing::info!("logged in as {} (id {})", user.username, user.id);

    // ── Lobby session ───────────────────────────────────────────────
    let (mut lobby, mut updates) = LobbySession::start(
        Arc::new(api),
        WebSocketConnector::new(ws_url),
        credentials,
        LobbyConfig::default(),
    );

    // ── Update loop ─────────────────────────────────────────────────
    loop {
        tokio::select! {
            update = updates.recv() => {
                let Some(update) = update else {
                    tracing::info!("update stream ended, exiting");
                    break;
                };

                match update {
                    LobbyUpdate::Rooms(rooms) => {
                        tracing::info!("{} room(s) visible:", rooms.len());
                        for entry in &rooms {
                            tracing::info!(
                                "  [{}] {} by {} — {}/{}{}",
                                entry.room.id,
                                entry.room.title,
                                entry.room.owner_name,
                                entry.room.players_count,
                                entry.room.max_players,
                                if entry.is_new { "  (new)" } else { "" },
                            );
                        }
                    }
                    LobbyUpdate::LoadFailed(message) => {
                        tracing::warn!("room list load failed: {message}");
                    }
                }
            }

            // Ctrl+C — shut down gracefully.
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, shutting down…");
                break;
            }
        }
    }

    // ── Cleanup ─────────────────────────────────────────────────────
    lobby.close().await;
    tracing::info!("lobby session closed. Goodbye!");
    Ok(())
}
