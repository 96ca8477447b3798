//! Client connection state machine.
//!
//! No I/O and no timers: the connection driver in [`client`](crate::client)
//! feeds transport events in and carries out whatever comes back. Callbacks
//! are handed out as [`Delivery`] values so they run after the caller has
//! released its lock.
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──open──▶ AuthPending ──login ok──▶ Ready
//!       ▲                                             │                     │
//!       └──────────────────── close (any state) ◀─────┴─────────────────────┘
//! ```

use std::fmt;

use serde_json::Value;
use switchboard_core::envelope::requests;
use switchboard_core::{Action, Envelope, RequestName, decode_reply};

use crate::correlation::{Callback, CorrelationTable};
use crate::listeners::{Listener, ListenerRegistry};

/// Where the client is in its connect/login cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ClientState {
    /// No transport.
    #[default]
    Disconnected,
    /// Transport being opened.
    Connecting,
    /// Transport open, login sent, reply outstanding.
    AuthPending,
    /// Logged in; requests are accepted.
    Ready,
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::AuthPending => "auth_pending",
            Self::Ready => "ready",
        };
        f.write_str(s)
    }
}

/// What an inbound frame asks the driver to do.
pub enum Delivery {
    /// Run a correlated reply callback.
    Reply {
        /// The parked callback.
        callback: Callback,
        /// Reply `error` (`None` when the wire carried `false`).
        error: Option<Value>,
        /// Reply payload.
        response: Value,
    },
    /// Run every listener of a broadcast channel.
    Broadcast {
        /// Listeners registered for the channel, possibly none.
        listeners: Vec<Listener>,
        /// Broadcast `error` field.
        error: Option<Value>,
        /// Broadcast payload.
        payload: Value,
    },
    /// The login reply: the session payload, or the server's error.
    Login(Result<Value, Value>),
    /// The frame did not decode. Carries the raw text.
    Invalid(String),
    /// A reply whose sequence has no parked callback.
    Unmatched(u64),
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reply { error, .. } => f.debug_struct("Reply").field("error", error).finish(),
            Self::Broadcast { listeners, .. } => f
                .debug_struct("Broadcast")
                .field("listeners", &listeners.len())
                .finish(),
            Self::Login(result) => f.debug_tuple("Login").field(result).finish(),
            Self::Invalid(frame) => f.debug_tuple("Invalid").field(frame).finish(),
            Self::Unmatched(seq) => f.debug_tuple("Unmatched").field(seq).finish(),
        }
    }
}

/// Result of a transport close.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CloseOutcome {
    /// Pending callbacks dropped without running.
    pub dropped: usize,
    /// Whether an automatic reconnect should be scheduled.
    pub reconnect: bool,
}

/// Client-side protocol state for one logical client across reconnects.
#[derive(Debug)]
pub struct ClientMachine {
    state: ClientState,
    session: Option<Value>,
    auth_failed: bool,
    stopped: bool,
    url: String,
    credentials: Value,
    login_sequence: Option<u64>,
    calls: CorrelationTable,
    listeners: ListenerRegistry,
}

impl ClientMachine {
    /// Fresh machine for `url` logging in with `credentials`.
    pub fn new(url: impl Into<String>, credentials: Value) -> Self {
        Self {
            state: ClientState::Disconnected,
            session: None,
            auth_failed: false,
            stopped: false,
            url: url.into(),
            credentials,
            login_sequence: None,
            calls: CorrelationTable::new(),
            listeners: ListenerRegistry::new(),
        }
    }

    // ── Queries ─────────────────────────────────────────────────────

    /// Current state.
    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Session payload returned by the last successful login.
    pub fn session(&self) -> Option<&Value> {
        self.session.as_ref()
    }

    /// Whether requests are currently accepted.
    pub fn is_authenticated(&self) -> bool {
        self.state == ClientState::Ready && self.session.is_some()
    }

    /// Whether the last login was rejected.
    pub fn auth_failed(&self) -> bool {
        self.auth_failed
    }

    /// Whether automatic reconnects are switched off.
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Server address.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Requests still waiting for a reply.
    pub fn pending(&self) -> usize {
        self.calls.len()
    }

    /// Broadcast subscriptions.
    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    // ── Transitions ─────────────────────────────────────────────────

    /// A connect attempt starts. Returns the address to dial.
    pub fn on_connecting(&mut self) -> String {
        self.state = ClientState::Connecting;
        self.url.clone()
    }

    /// The transport opened. Returns the login envelope to send first.
    pub fn on_open(&mut self) -> Envelope {
        let _ = self.calls.clear();
        self.session = None;
        self.state = ClientState::AuthPending;
        let sequence = self.calls.next_sequence();
        self.login_sequence = Some(sequence);
        Envelope::login(sequence, self.credentials.clone())
    }

    /// An inbound text frame arrived.
    pub fn on_message(&mut self, text: &str) -> Delivery {
        let Ok(reply) = decode_reply(text) else {
            return Delivery::Invalid(text.to_string());
        };
        let sequence = reply.info.sequence;

        match reply.info.action {
            Action::Broadcast => Delivery::Broadcast {
                listeners: self.listeners.listeners_for(&reply.info.request),
                error: reply.error,
                payload: reply.response,
            },
            Action::Auth if self.login_sequence == Some(sequence) => {
                self.login_sequence = None;
                match reply.error {
                    Some(error) => {
                        self.session = None;
                        self.auth_failed = true;
                        Delivery::Login(Err(error))
                    }
                    None => {
                        self.session = Some(reply.response.clone());
                        self.state = ClientState::Ready;
                        Delivery::Login(Ok(reply.response))
                    }
                }
            }
            Action::Auth | Action::Call | Action::Group | Action::Other(_) => {
                match self.calls.resolve(sequence) {
                    Some(callback) => Delivery::Reply {
                        callback,
                        error: reply.error,
                        response: reply.response,
                    },
                    None => Delivery::Unmatched(sequence),
                }
            }
        }
    }

    /// The transport closed or failed. Pending callbacks are dropped
    /// without running; listener registrations are kept.
    pub fn on_close(&mut self) -> CloseOutcome {
        self.state = ClientState::Disconnected;
        self.session = None;
        self.login_sequence = None;
        CloseOutcome {
            dropped: self.calls.clear(),
            reconnect: !self.auth_failed && !self.stopped,
        }
    }

    // ── Caller operations ───────────────────────────────────────────

    /// Assign a sequence to a request built by `build` and park `callback`.
    ///
    /// Hands the callback back when not authenticated; nothing is recorded
    /// in that case. A logout switches off automatic reconnects.
    pub fn begin(
        &mut self,
        build: impl FnOnce(u64) -> Envelope,
        callback: Callback,
    ) -> Result<Envelope, Callback> {
        if !self.is_authenticated() {
            return Err(callback);
        }
        let sequence = self.calls.next_sequence();
        let envelope = build(sequence);
        if envelope.info.action == Action::Auth && envelope.info.request.is(requests::LOGOUT) {
            self.stopped = true;
        }
        self.calls.register(sequence, callback);
        Ok(envelope)
    }

    /// Withdraw a request that could not be sent.
    pub fn cancel(&mut self, sequence: u64) -> Option<Callback> {
        self.calls.resolve(sequence)
    }

    /// Subscribe `listener` to broadcasts on `channel`.
    pub fn subscribe(&mut self, channel: impl Into<RequestName>, listener: Listener) {
        self.listeners.subscribe(channel, listener);
    }

    /// Switch off automatic reconnects.
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    /// Explicit retry: new credentials (and optionally a new address),
    /// clearing the auth-failure and stop flags.
    pub fn retry(&mut self, url: Option<String>, credentials: Value) {
        if let Some(url) = url {
            self.url = url;
        }
        self.credentials = credentials;
        self.auth_failed = false;
        self.stopped = false;
    }
}
