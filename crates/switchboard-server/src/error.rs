//! Server and per-connection error types.

use std::sync::Arc;

use switchboard_core::{Action, CodecError, ConnectionId, RequestName};
use thiserror::Error;

/// Receives every per-connection failure.
pub type ErrorSink = Arc<dyn Fn(&ConnectionId, &ConnectionError) + Send + Sync>;

/// Errors that stop the server as a whole.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding or serving the listener failed.
    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The Prometheus recorder could not be installed.
    #[error("failed to install metrics recorder: {0}")]
    Metrics(String),
}

/// Why a single connection was closed. Delivered to the error sink; never
/// fatal to the server.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The WebSocket failed at the transport level.
    #[error("transport error: {0}")]
    Transport(String),
    /// An inbound frame was not a valid envelope.
    #[error("undecodable frame: {0}")]
    Decode(#[from] CodecError),
    /// No successful login within the authentication deadline.
    #[error("authentication deadline elapsed")]
    AuthTimeout,
    /// The authenticator returned without setting a session.
    #[error("authentication rejected")]
    AuthRejected,
    /// A non-login envelope arrived before authentication.
    #[error("{action}/{request} sent before authentication")]
    ProtocolViolation {
        /// Offending action.
        action: Action,
        /// Offending request name.
        request: RequestName,
    },
    /// The peer missed a heartbeat.
    #[error("heartbeat missed")]
    HeartbeatTimeout,
    /// The peer could not keep up with outbound traffic.
    #[error("slow consumer: {dropped} frames dropped")]
    SlowConsumer {
        /// Frames dropped before the disconnect.
        dropped: u64,
    },
}
