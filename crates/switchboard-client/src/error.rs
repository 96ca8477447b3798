//! Client error type.

use serde_json::Value;
use thiserror::Error;

/// Failures surfaced to the client's error handler or returned by the async
/// request helpers.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// A request was issued without an authenticated session. Nothing was sent.
    #[error("not authenticated")]
    NotAuthenticated,
    /// The connection dropped before the reply arrived.
    #[error("connection lost before a reply arrived")]
    ConnectionLost,
    /// The server answered with a non-false `error` field.
    #[error("remote error: {0}")]
    Remote(Value),
    /// Connecting, reading or writing the socket failed.
    #[error("transport error: {0}")]
    Transport(String),
    /// An inbound frame was not a valid reply envelope. The connection stays up.
    #[error("invalid data: {0}")]
    Decode(String),
    /// The server rejected the login credentials.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(Value),
    /// The connection was closed by either side.
    #[error("connection closed")]
    Closed,
}

impl ClientError {
    /// Whether the error ends the current connection.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Closed)
    }
}
