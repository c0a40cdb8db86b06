//! Typed HTTP layer for snapshot and command calls.
//!
//! Every call returns a JSON envelope `{status: "OK"|"Error", error?,
//! ...payload}`; any non-OK status surfaces as
//! [`MineraceError::ServerRejected`] carrying the server's `error`
//! string. The session credential is presented as a `token` cookie on
//! every request, matching the server's auth middleware.
//!
//! Commands are fire-and-forget from the replica's point of view: a
//! successful call mutates nothing locally — the effect is observed
//! later through the event channel.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::credentials::CredentialSource;
use crate::error::{MineraceError, Result};
use crate::protocol::{
    AuthRequest, CellRequest, ChatBacklogResponse, ChatMessage, ChatRequest,
    CongratulationResponse, FieldInfoResponse, Participant, RegisteredResponse, Room, RoomCreatedResponse,
    RoomDetail, RoomDetailResponse, RoomRequest, RoomStatus, RoomsResponse, StatusResponse, User,
    UserId, UserResponse, STATUS_OK,
};

/// Default timeout for every HTTP call.
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// The snapshot and command calls consumed by the lobby and game
/// sessions.
///
/// Implemented by [`ApiClient`]; the seam exists so session logic can be
/// exercised against a scripted backend in tests.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// List rooms, optionally filtered by a search string and status.
    async fn list_rooms(&self, query: &str, status: Option<RoomStatus>) -> Result<Vec<Room>>;

    /// List the rooms the current user participates in.
    async fn my_rooms(&self) -> Result<Vec<Room>>;

    /// Fetch one room with its participant identities.
    async fn room_detail(&self, id: &str) -> Result<RoomDetail>;

    /// Enter a room as a participant.
    async fn enter_room(&self, id: &str) -> Result<()>;

    /// Leave a room.
    async fn exit_room(&self, id: &str) -> Result<()>;

    /// Start the match in a room. Owner only, enforced server-side.
    async fn start_match(&self, id: &str) -> Result<()>;

    /// Fetch the per-participant field snapshot for a match.
    async fn field_snapshot(&self, id: &str) -> Result<Vec<Participant>>;

    /// Fetch the chat backlog for a match. An expired or absent backlog
    /// is an empty sequence, not an error.
    async fn chat_backlog(&self, id: &str) -> Result<Vec<ChatMessage>>;

    /// Open the cell at `(row, col)` on the caller's own board.
    async fn open_cell(&self, id: &str, row: usize, col: usize) -> Result<()>;

    /// Toggle a flag on the cell at `(row, col)` on the caller's own board.
    async fn flag_cell(&self, id: &str, row: usize, col: usize) -> Result<()>;

    /// Send a chat message to the match.
    async fn send_message(&self, id: &str, text: &str) -> Result<()>;
}

/// HTTP client for the Minerace service.
///
/// Cheap to clone: the underlying `reqwest::Client` is reference-counted
/// and the credential source is shared.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Arc<dyn CredentialSource>,
}

impl ApiClient {
    /// Create a client for the given base URL (scheme + host + port,
    /// no trailing slash required).
    ///
    /// # Errors
    ///
    /// Returns [`MineraceError::Http`] if the underlying HTTP client
    /// cannot be constructed.
    pub fn new(base_url: impl Into<String>, credentials: Arc<dyn CredentialSource>) -> Result<Self> {
        Self::with_timeout(base_url, credentials, DEFAULT_HTTP_TIMEOUT)
    }

    /// Like [`new`](Self::new) with an explicit per-request timeout.
    pub fn with_timeout(
        base_url: impl Into<String>,
        credentials: Arc<dyn CredentialSource>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self {
            http,
            base_url,
            credentials,
        })
    }

    /// The base URL this client talks to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // ── Account calls ───────────────────────────────────────────────

    /// Register a new account and return its user id.
    pub async fn register(&self, username: &str, password: &str) -> Result<UserId> {
        let body = AuthRequest {
            username: username.to_string(),
            password: password.to_string(),
        };
        let resp: RegisteredResponse = self
            .json(self.request(Method::POST, "/game/api/v1/user").json(&body))
            .await?;
        check(&resp.status, resp.error)?;
        resp.id.ok_or_else(|| missing_field("id"))
    }

    /// Log in and record the server-issued token in the credential
    /// store. The token arrives as a `token` cookie on the response.
    pub async fn login(&self, username: &str, password: &str) -> Result<()> {
        let body = AuthRequest {
            username: username.to_string(),
            password: password.to_string(),
        };
        let resp = self
            .request(Method::POST, "/game/api/v1/user/login")
            .json(&body)
            .send()
            .await?;

        let token = extract_token_cookie(resp.headers());

        let envelope: StatusResponse = resp.json().await?;
        check(&envelope.status, envelope.error)?;

        let token = token.ok_or(MineraceError::MissingCredential)?;
        debug!("login succeeded, credential recorded");
        self.credentials.store(token);
        Ok(())
    }

    /// Fetch the current user for this credential.
    pub async fn current_user(&self) -> Result<User> {
        let resp: UserResponse = self.get("/game/api/v1/user/me").await?;
        check(&resp.status, resp.error)?;
        resp.user.ok_or_else(|| missing_field("user"))
    }

    /// Log out and discard the stored credential.
    pub async fn logout(&self) -> Result<()> {
        let resp: StatusResponse = self
            .json(self.request(Method::POST, "/game/api/v1/user/logout"))
            .await?;
        check(&resp.status, resp.error)?;
        self.credentials.clear();
        Ok(())
    }

    // ── Room commands ───────────────────────────────────────────────

    /// Create a room and return its id. The room itself arrives through
    /// the event channel as a `CREATE_ROOM` event.
    pub async fn create_room(&self, title: &str, is_public: bool) -> Result<String> {
        let body = RoomRequest {
            title: title.to_string(),
            is_public,
        };
        let resp: RoomCreatedResponse = self
            .json(self.request(Method::POST, "/game/api/v1/game").json(&body))
            .await?;
        check(&resp.status, resp.error)?;
        resp.id.ok_or_else(|| missing_field("id"))
    }

    /// Update a room's title and visibility.
    pub async fn update_room(&self, id: &str, title: &str, is_public: bool) -> Result<()> {
        let body = RoomRequest {
            title: title.to_string(),
            is_public,
        };
        self.command(
            self.request(Method::PUT, &format!("/game/api/v1/game/{id}"))
                .json(&body),
        )
        .await
    }

    /// Delete a room.
    pub async fn delete_room(&self, id: &str) -> Result<()> {
        self.command(self.request(Method::DELETE, &format!("/game/api/v1/game/{id}")))
            .await
    }

    /// Fetch the winner's congratulation message for a concluded match.
    pub async fn congratulation(&self, id: &str) -> Result<String> {
        let resp: CongratulationResponse = self
            .get(&format!("/game/api/v1/game/{id}/congratulation"))
            .await?;
        check(&resp.status, resp.error)?;
        resp.congratulation.ok_or_else(|| missing_field("congratulation"))
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.http.request(method, format!("{}{path}", self.base_url));
        match self.credentials.token() {
            Some(token) => builder.header(reqwest::header::COOKIE, format!("token={token}")),
            None => builder,
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.json(self.request(Method::GET, path)).await
    }

    async fn json<T: DeserializeOwned>(&self, builder: reqwest::RequestBuilder) -> Result<T> {
        Ok(builder.send().await?.json::<T>().await?)
    }

    /// Run a command call whose response is the bare status envelope.
    async fn command(&self, builder: reqwest::RequestBuilder) -> Result<()> {
        let resp: StatusResponse = self.json(builder).await?;
        check(&resp.status, resp.error)
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[async_trait]
impl Backend for ApiClient {
    async fn list_rooms(&self, query: &str, status: Option<RoomStatus>) -> Result<Vec<Room>> {
        let mut params = vec![("query", query.to_string())];
        if let Some(status) = status {
            params.push(("status", status.as_str().to_string()));
        }
        let resp: RoomsResponse = self
            .json(self.request(Method::GET, "/game/api/v1/game").query(&params))
            .await?;
        check(&resp.status, resp.error)?;
        Ok(resp.games.unwrap_or_default())
    }

    async fn my_rooms(&self) -> Result<Vec<Room>> {
        let resp: RoomsResponse = self.get("/game/api/v1/game/my").await?;
        check(&resp.status, resp.error)?;
        Ok(resp.games.unwrap_or_default())
    }

    async fn room_detail(&self, id: &str) -> Result<RoomDetail> {
        let resp: RoomDetailResponse = self.get(&format!("/game/api/v1/game/{id}")).await?;
        check(&resp.status, resp.error)?;
        resp.game.ok_or_else(|| missing_field("game"))
    }

    async fn enter_room(&self, id: &str) -> Result<()> {
        self.command(self.request(Method::POST, &format!("/game/api/v1/game/{id}/enter")))
            .await
    }

    async fn exit_room(&self, id: &str) -> Result<()> {
        self.command(self.request(Method::POST, &format!("/game/api/v1/game/{id}/exit")))
            .await
    }

    async fn start_match(&self, id: &str) -> Result<()> {
        self.command(self.request(Method::POST, &format!("/game/api/v1/game/{id}/start")))
            .await
    }

    async fn field_snapshot(&self, id: &str) -> Result<Vec<Participant>> {
        let resp: FieldInfoResponse = self.get(&format!("/ingame/api/v1/game/{id}/info")).await?;
        check(&resp.status, resp.error)?;
        Ok(resp.participants.unwrap_or_default())
    }

    async fn chat_backlog(&self, id: &str) -> Result<Vec<ChatMessage>> {
        let resp: ChatBacklogResponse = self.get(&format!("/ingame/api/v1/game/{id}/chat")).await?;
        check(&resp.status, resp.error)?;
        // Expired retention yields a null list; treat it as empty.
        Ok(resp.messages.unwrap_or_default())
    }

    async fn open_cell(&self, id: &str, row: usize, col: usize) -> Result<()> {
        let body = CellRequest { row, col };
        self.command(
            self.request(Method::PATCH, &format!("/ingame/api/v1/game/{id}/cell/open"))
                .json(&body),
        )
        .await
    }

    async fn flag_cell(&self, id: &str, row: usize, col: usize) -> Result<()> {
        let body = CellRequest { row, col };
        self.command(
            self.request(Method::PATCH, &format!("/ingame/api/v1/game/{id}/cell/flag"))
                .json(&body),
        )
        .await
    }

    async fn send_message(&self, id: &str, text: &str) -> Result<()> {
        let body = ChatRequest {
            text: text.to_string(),
        };
        self.command(
            self.request(Method::POST, &format!("/ingame/api/v1/game/{id}/chat"))
                .json(&body),
        )
        .await
    }
}

/// Translate a response envelope into a `Result`.
fn check(status: &str, error: Option<String>) -> Result<()> {
    if status == STATUS_OK {
        Ok(())
    } else {
        Err(MineraceError::ServerRejected {
            message: error.unwrap_or_else(|| "unknown server error".to_string()),
        })
    }
}

fn missing_field(field: &str) -> MineraceError {
    MineraceError::ServerRejected {
        message: format!("response missing `{field}`"),
    }
}

/// Pull the `token` cookie out of a login response's `Set-Cookie`
/// headers.
fn extract_token_cookie(headers: &reqwest::header::HeaderMap) -> Option<String> {
    headers
        .get_all(reqwest::header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(|cookie| {
            let (pair, _attrs) = cookie.split_once(';').unwrap_or((cookie, ""));
            let (name, token) = pair.split_once('=')?;
            (name.trim() == "token" && !token.is_empty()).then(|| token.to_string())
        })
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
    use crate::credentials::MemoryCredentials;
    use reqwest::header::{HeaderMap, HeaderValue, SET_COOKIE};

    #[test]
    fn check_accepts_ok_and_rejects_error() {
        assert!(check("OK", None).is_ok());
        let err = check("Error", Some("room is full".into())).unwrap_err();
        assert!(matches!(
            err,
            MineraceError::ServerRejected { ref message } if message == "room is full"
        ));
        let err = check("Error", None).unwrap_err();
        assert!(matches!(err, MineraceError::ServerRejected { .. }));
    }

    #[test]
    fn token_cookie_is_extracted_from_headers() {
        let mut headers = HeaderMap::new();
        headers.append(
            SET_COOKIE,
            HeaderValue::from_static("session_hint=1; Path=/"),
        );
        headers.append(
            SET_COOKIE,
            HeaderValue::from_static("token=abc123; Path=/; HttpOnly"),
        );
        assert_eq!(extract_token_cookie(&headers).as_deref(), Some("abc123"));
    }

    #[test]
    fn missing_or_empty_token_cookie_is_none() {
        let headers = HeaderMap::new();
        assert!(extract_token_cookie(&headers).is_none());

        let mut headers = HeaderMap::new();
        headers.append(SET_COOKIE, HeaderValue::from_static("token=; Path=/"));
        assert!(extract_token_cookie(&headers).is_none());
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = ApiClient::new(
            "http://localhost:15050/",
            Arc::new(MemoryCredentials::new()),
        )
        .unwrap();
        assert_eq!(client.base_url(), "http://localhost:15050");
    }
}
