//! Transport abstraction for the Minerace event channel.
//!
//! The [`Transport`] trait defines a bidirectional text message channel
//! between the client and server. The event protocol uses JSON text
//! frames, so every transport implementation must handle message framing
//! internally (e.g., WebSocket frames, length-prefixed TCP).
//!
//! # Connection Setup
//!
//! Connection setup is intentionally NOT part of [`Transport`] —
//! different transports have fundamentally different connection
//! parameters. Because the engine reconnects automatically, dialing is
//! instead modeled by the [`Connector`] trait: a factory the
//! [`EventChannel`](crate::channel::EventChannel) calls every time it
//! needs a fresh transport.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use minerace_client::error::MineraceError;
//! use minerace_client::transport::Transport;
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, message: String) -> Result<(), MineraceError> {
//!         // Send the JSON text message over your transport
//!         todo!()
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, MineraceError>> {
//!         // Receive the next JSON text message
//!         // Return None when the connection is closed cleanly
//!         todo!()
//!     }
//!
//!     async fn close(&mut self) -> Result<(), MineraceError> {
//!         // Gracefully shut down the connection
//!         todo!()
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::MineraceError;

/// A bidirectional text message transport for the Minerace event channel.
///
/// Implementors shuttle serialized JSON strings between the client and
/// server. Each call to [`send`](Transport::send) transmits one complete
/// JSON message. Each call to [`recv`](Transport::recv) returns one
/// complete JSON message.
///
/// # Object Safety
///
/// This trait is object-safe; the reconnect loop works with
/// `Box<dyn Transport>` values produced by a [`Connector`].
///
/// # Cancel Safety
///
/// The [`recv`](Transport::recv) method **MUST** be cancel-safe because
/// it is used inside `tokio::select!`. If `recv` is cancelled before
/// completion, calling it again must not lose data. Channel-based
/// implementations (e.g., wrapping `mpsc::Receiver`) are naturally
/// cancel-safe.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send a JSON text message to the server.
    ///
    /// # Errors
    ///
    /// Returns [`MineraceError::TransportSend`] if the message could not
    /// be sent (e.g., connection broken, write buffer full).
    async fn send(&mut self, message: String) -> Result<(), MineraceError>;

    /// Receive the next JSON text message from the server.
    ///
    /// Returns:
    /// - `Some(Ok(text))` — a complete message was received
    /// - `Some(Err(e))` — a transport error occurred
    /// - `None` — the connection was closed cleanly by the server
    ///
    /// # Cancel Safety
    ///
    /// This method **MUST** be cancel-safe (see [trait documentation](Transport)).
    async fn recv(&mut self) -> Option<Result<String, MineraceError>>;

    /// Close the transport connection gracefully.
    ///
    /// After calling this method, subsequent calls to
    /// [`send`](Transport::send) and [`recv`](Transport::recv) may return
    /// errors or `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the graceful shutdown fails. Implementations
    /// should still release resources even if the close handshake fails.
    async fn close(&mut self) -> Result<(), MineraceError>;
}

/// A factory that dials a fresh [`Transport`].
///
/// The [`EventChannel`](crate::channel::EventChannel) owns one connector
/// for its lifetime and calls [`connect`](Connector::connect) on the
/// initial dial and on every scheduled reconnect. Implementations carry
/// whatever connection parameters their transport needs (a URL, a
/// host:port pair, TLS configuration).
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Dial a new transport.
    ///
    /// # Errors
    ///
    /// Returns whatever connection error the underlying transport
    /// produces. The caller treats any error as "try again after the
    /// reconnect delay".
    async fn connect(&self) -> Result<Box<dyn Transport>, MineraceError>;
}
