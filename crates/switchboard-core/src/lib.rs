//! # switchboard-core
//!
//! Shared protocol pieces used by both ends of a switchboard connection.
//!
//! - [`envelope`]: the wire message shape (`info` + `data` / `error` + `response`)
//! - [`codec`]: JSON encode/decode with recoverable errors
//! - [`errors`]: error strings and payloads that travel inside replies
//! - [`ids`]: branded connection identifiers
//! - [`logging`]: `tracing` subscriber bootstrap

#![deny(unsafe_code)]

pub mod codec;
pub mod envelope;
pub mod errors;
pub mod ids;
pub mod logging;

pub use codec::{CodecError, decode_envelope, decode_reply, encode};
pub use envelope::{Action, Envelope, PackageInfo, Reply, RequestName};
pub use ids::ConnectionId;
