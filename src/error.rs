//! Error types for the Minerace client.

use thiserror::Error;

/// Errors that can occur when using the Minerace client.
#[derive(Debug, Error)]
pub enum MineraceError {
    /// Failed to send a message through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a message from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed unexpectedly.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a protocol message.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An HTTP request failed before a server envelope could be read.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered a call with `status != "OK"`.
    #[error("server rejected the request: {message}")]
    ServerRejected {
        /// The `error` field of the response envelope.
        message: String,
    },

    /// Entering a match failed terminally: the detail snapshot could not be
    /// loaded and the fallback enter command also failed.
    #[error("failed to enter match: {0}")]
    EntryFailed(String),

    /// A cell command targeted a board the acting user does not own.
    /// Rejected client-side; the request never reaches the network.
    #[error("not your board")]
    NotYourBoard,

    /// No session credential is available for an operation that requires one.
    #[error("no credential available")]
    MissingCredential,

    /// A locally-validated input was rejected before contacting the server
    /// (out-of-range cell coordinates, blank chat text, …).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for Minerace client operations.
pub type Result<T> = std::result::Result<T, MineraceError>;
