//! WebSocket connection management, heartbeat, message dispatch, and broadcasting.

pub mod broadcast;
pub mod connection;
pub mod handler;
pub mod heartbeat;
pub mod session;
