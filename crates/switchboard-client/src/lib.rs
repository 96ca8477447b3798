//! # switchboard-client
//!
//! Client side of the switchboard protocol over `tokio-tungstenite`.
//!
//! - [`SocketClient`]: connects, logs in, reconnects after drops
//! - [`correlation`]: sequence numbers and the pending-reply table
//! - [`listeners`]: broadcast subscriptions by channel name
//! - [`state`]: the I/O-free connect/login state machine

#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod correlation;
pub mod error;
pub mod listeners;
pub mod state;

pub use client::{ErrorHandler, LoginHandler, SocketClient};
pub use config::ClientConfig;
pub use error::ClientError;
pub use state::ClientState;
