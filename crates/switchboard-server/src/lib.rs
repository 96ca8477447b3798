//! # switchboard-server
//!
//! Server side of the switchboard protocol, served over Axum WebSockets.
//!
//! - Authentication gate: only `auth/login` is accepted until the injected
//!   [`Authenticator`] sets a session, and a login deadline reaps idle sockets
//! - Route table for `call/<name>`, plus the built-in `echo`
//! - Per-connection group membership and group-scoped broadcast
//! - Process-wide heartbeat sweep over ping/pong
//! - `/health` and `/metrics` endpoints, graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod auth;
pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod routes;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use auth::{
    AuthContext, Authenticator, LogoutHandler, UpgradeGate, UpgradeRequest, auth_fn, gate_fn,
    logout_fn,
};
pub use config::ServerConfig;
pub use error::{ConnectionError, ErrorSink, ServerError};
pub use routes::{Responder, RouteHandler, RouteRequest, RouteTable, handler_fn};
pub use server::{ServerHandle, SocketServer};
