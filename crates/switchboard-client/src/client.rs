//! Reconnecting WebSocket client.
//!
//! A single supervisor task owns the transport. It dials, logs in with the
//! stored credentials, pumps frames both ways and, when the connection ends,
//! waits the reconnect delay before dialing again. Auto-reconnect pauses
//! after a rejected login, a logout or [`SocketClient::disconnect`] until
//! [`SocketClient::reconnect`] is called.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use switchboard_core::envelope::requests;
use switchboard_core::errors::NOT_AUTHENTICATED;
use switchboard_core::{Envelope, RequestName, encode};
use tokio::sync::{Notify, mpsc, oneshot, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::ClientConfig;
use crate::correlation::Callback;
use crate::error::ClientError;
use crate::state::{ClientMachine, ClientState, Delivery};

/// Login result callback: `(error, session)`. Runs after every login attempt,
/// including the ones made by automatic reconnects.
pub type LoginHandler = Arc<dyn Fn(Option<Value>, Value) + Send + Sync>;

/// Receives connection failures and undecodable frames.
pub type ErrorHandler = Arc<dyn Fn(&ClientError) + Send + Sync>;

struct Shared {
    machine: ClientMachine,
    outbound: Option<mpsc::UnboundedSender<String>>,
    connection: Option<CancellationToken>,
    on_login: LoginHandler,
}

struct Inner {
    shared: Mutex<Shared>,
    config: ClientConfig,
    on_error: ErrorHandler,
    state_tx: watch::Sender<ClientState>,
    wake: Notify,
    shutdown: CancellationToken,
}

impl Inner {
    fn publish(&self) {
        let state = self.shared.lock().machine.state();
        let _ = self.state_tx.send_replace(state);
    }

    /// Feed one inbound frame to the machine and run the resulting callback.
    fn deliver(&self, text: &str) {
        let (delivery, on_login) = {
            let mut shared = self.shared.lock();
            let delivery = shared.machine.on_message(text);
            let on_login = matches!(delivery, Delivery::Login(_)).then(|| shared.on_login.clone());
            (delivery, on_login)
        };

        match delivery {
            Delivery::Reply {
                callback,
                error,
                response,
            } => callback(error, response),
            Delivery::Broadcast {
                listeners,
                error,
                payload,
            } => {
                for listener in listeners {
                    listener(error.clone(), payload.clone());
                }
            }
            Delivery::Login(result) => {
                self.publish();
                let Some(on_login) = on_login else { return };
                match result {
                    Ok(session) => {
                        info!("logged in");
                        on_login(None, session);
                    }
                    Err(error) => {
                        warn!(%error, "login rejected");
                        on_login(Some(error), Value::Null);
                    }
                }
            }
            Delivery::Invalid(frame) => {
                warn!(len = frame.len(), "undecodable frame from server");
                (self.on_error)(&ClientError::Decode(frame));
            }
            Delivery::Unmatched(sequence) => trace!(sequence, "reply without a pending request"),
        }
    }
}

/// Handle to a reconnecting client. Cheap to clone; all clones drive the
/// same connection.
#[derive(Clone)]
pub struct SocketClient {
    inner: Arc<Inner>,
}

impl SocketClient {
    /// Start connecting to `config.url` and log in with `credentials`.
    ///
    /// Must be called inside a Tokio runtime. The client keeps running until
    /// [`shutdown`](Self::shutdown).
    pub fn connect<L, E>(config: ClientConfig, credentials: Value, on_login: L, on_error: E) -> Self
    where
        L: Fn(Option<Value>, Value) + Send + Sync + 'static,
        E: Fn(&ClientError) + Send + Sync + 'static,
    {
        let (state_tx, _) = watch::channel(ClientState::Disconnected);
        let inner = Arc::new(Inner {
            shared: Mutex::new(Shared {
                machine: ClientMachine::new(config.url.clone(), credentials),
                outbound: None,
                connection: None,
                on_login: Arc::new(on_login),
            }),
            config,
            on_error: Arc::new(on_error),
            state_tx,
            wake: Notify::new(),
            shutdown: CancellationToken::new(),
        });
        drop(tokio::spawn(run_supervisor(inner.clone())));
        Self { inner }
    }

    // ── Callback API ────────────────────────────────────────────────

    /// Call route `name` with `data`. `callback` runs once with
    /// `(error, response)`, immediately with a "not authenticated" error when
    /// not logged in, or never when the connection drops first.
    pub fn make_request<F>(&self, name: impl Into<RequestName>, data: Value, callback: F)
    where
        F: FnOnce(Option<Value>, Value) + Send + 'static,
    {
        let name = name.into();
        let _ = self.submit(move |seq| Envelope::call(seq, name, data), Box::new(callback));
    }

    /// Join `group`.
    pub fn join_group<F>(&self, group: &str, callback: F)
    where
        F: FnOnce(Option<Value>, Value) + Send + 'static,
    {
        let group = group.to_string();
        let _ = self.submit(
            move |seq| Envelope::group(seq, requests::JOIN, Some(group)),
            Box::new(callback),
        );
    }

    /// Leave `group`.
    pub fn leave_group<F>(&self, group: &str, callback: F)
    where
        F: FnOnce(Option<Value>, Value) + Send + 'static,
    {
        let group = group.to_string();
        let _ = self.submit(
            move |seq| Envelope::group(seq, requests::LEAVE, Some(group)),
            Box::new(callback),
        );
    }

    /// Leave every group.
    pub fn leave_all_groups<F>(&self, callback: F)
    where
        F: FnOnce(Option<Value>, Value) + Send + 'static,
    {
        let _ = self.submit(
            |seq| Envelope::group(seq, requests::LEAVE_ALL, None),
            Box::new(callback),
        );
    }

    /// Log out. The server closes the connection afterwards and automatic
    /// reconnects stay off until [`reconnect`](Self::reconnect).
    pub fn logout<F>(&self, callback: F)
    where
        F: FnOnce(Option<Value>, Value) + Send + 'static,
    {
        let _ = self.submit(Envelope::logout, Box::new(callback));
    }

    /// Subscribe to broadcasts on `channel`. Subscriptions survive reconnects.
    pub fn on<F>(&self, channel: impl Into<RequestName>, listener: F)
    where
        F: Fn(Option<Value>, Value) + Send + Sync + 'static,
    {
        self.inner
            .shared
            .lock()
            .machine
            .subscribe(channel, Arc::new(listener));
    }

    // ── Async API ───────────────────────────────────────────────────

    /// Call route `name` and wait for the reply.
    pub async fn request(
        &self,
        name: impl Into<RequestName>,
        data: Value,
    ) -> Result<Value, ClientError> {
        let name = name.into();
        self.await_reply(move |seq| Envelope::call(seq, name, data))
            .await
    }

    /// Join `group` and wait for the acknowledgement.
    pub async fn join(&self, group: &str) -> Result<Value, ClientError> {
        let group = group.to_string();
        self.await_reply(move |seq| Envelope::group(seq, requests::JOIN, Some(group)))
            .await
    }

    /// Leave `group` and wait for the acknowledgement.
    pub async fn leave(&self, group: &str) -> Result<Value, ClientError> {
        let group = group.to_string();
        self.await_reply(move |seq| Envelope::group(seq, requests::LEAVE, Some(group)))
            .await
    }

    async fn await_reply(
        &self,
        build: impl FnOnce(u64) -> Envelope,
    ) -> Result<Value, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.submit(
            build,
            Box::new(move |error, response| {
                let _ = tx.send((error, response));
            }),
        )?;
        match rx.await {
            Ok((None, response)) => Ok(response),
            Ok((Some(error), _)) => Err(ClientError::Remote(error)),
            Err(_) => Err(ClientError::ConnectionLost),
        }
    }

    // ── Connection control ──────────────────────────────────────────

    /// Retry with fresh credentials, optionally a new address and login
    /// callback. Clears the auth-failure and stop flags and connects now,
    /// replacing any live connection.
    pub fn reconnect(&self, url: Option<String>, credentials: Value, on_login: Option<LoginHandler>) {
        {
            let mut shared = self.inner.shared.lock();
            shared.machine.retry(url, credentials);
            if let Some(on_login) = on_login {
                shared.on_login = on_login;
            }
            if let Some(connection) = &shared.connection {
                connection.cancel();
            }
        }
        info!("reconnect requested");
        self.inner.wake.notify_one();
    }

    /// Close the connection and keep automatic reconnects off until
    /// [`reconnect`](Self::reconnect).
    pub fn disconnect(&self) {
        let mut shared = self.inner.shared.lock();
        shared.machine.stop();
        if let Some(connection) = &shared.connection {
            connection.cancel();
        }
    }

    /// Close the connection and stop the supervisor for good.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    // ── Queries ─────────────────────────────────────────────────────

    /// Current connection state.
    pub fn state(&self) -> ClientState {
        self.inner.shared.lock().machine.state()
    }

    /// Watch state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ClientState> {
        self.inner.state_tx.subscribe()
    }

    /// Session payload from the last successful login, while connected.
    pub fn session(&self) -> Option<Value> {
        self.inner.shared.lock().machine.session().cloned()
    }

    /// Whether requests are currently accepted.
    pub fn is_authenticated(&self) -> bool {
        self.inner.shared.lock().machine.is_authenticated()
    }

    /// Requests waiting on a reply.
    pub fn pending_requests(&self) -> usize {
        self.inner.shared.lock().machine.pending()
    }

    /// Park `callback`, then queue the envelope for the writer. On refusal
    /// the callback has already run with the error.
    fn submit(
        &self,
        build: impl FnOnce(u64) -> Envelope,
        callback: Callback,
    ) -> Result<(), ClientError> {
        let mut shared = self.inner.shared.lock();
        let Some(outbound) = shared.outbound.clone() else {
            drop(shared);
            callback(Some(Value::from(NOT_AUTHENTICATED)), Value::Null);
            return Err(ClientError::NotAuthenticated);
        };
        let envelope = match shared.machine.begin(build, callback) {
            Ok(envelope) => envelope,
            Err(callback) => {
                drop(shared);
                callback(Some(Value::from(NOT_AUTHENTICATED)), Value::Null);
                return Err(ClientError::NotAuthenticated);
            }
        };

        let sequence = envelope.info.sequence;
        match encode(&envelope) {
            Ok(text) => {
                if outbound.send(text).is_err() {
                    debug!(sequence, "writer gone, request will be dropped on close");
                }
                Ok(())
            }
            Err(e) => {
                let callback = shared.machine.cancel(sequence);
                drop(shared);
                let message = e.to_string();
                if let Some(callback) = callback {
                    callback(Some(Value::from(message.clone())), Value::Null);
                }
                Err(ClientError::Transport(message))
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Supervisor
// ─────────────────────────────────────────────────────────────────────────────

async fn run_supervisor(inner: Arc<Inner>) {
    loop {
        let (url, connection) = {
            let mut shared = inner.shared.lock();
            let url = shared.machine.on_connecting();
            let connection = inner.shutdown.child_token();
            shared.connection = Some(connection.clone());
            (url, connection)
        };
        inner.publish();
        debug!(%url, "connecting");

        let err = run_connection(&inner, &url, &connection).await;

        let outcome = {
            let mut shared = inner.shared.lock();
            shared.outbound = None;
            shared.connection = None;
            shared.machine.on_close()
        };
        inner.publish();
        if inner.shutdown.is_cancelled() {
            break;
        }
        warn!(error = %err, dropped = outcome.dropped, "connection ended");
        (inner.on_error)(&err);

        if outcome.reconnect {
            tokio::select! {
                () = tokio::time::sleep(inner.config.reconnect_delay()) => {}
                () = inner.wake.notified() => {}
                () = inner.shutdown.cancelled() => break,
            }
        } else {
            info!("automatic reconnect paused");
            tokio::select! {
                () = inner.wake.notified() => {}
                () = inner.shutdown.cancelled() => break,
            }
        }
    }
    debug!("client stopped");
}

/// Dial, log in and pump frames until the connection ends. Returns why it
/// ended.
async fn run_connection(inner: &Inner, url: &str, connection: &CancellationToken) -> ClientError {
    let attempt = tokio::time::timeout(inner.config.connect_timeout(), connect_async(url));
    let ws = tokio::select! {
        () = connection.cancelled() => return ClientError::Closed,
        result = attempt => match result {
            Err(_) => return ClientError::Transport(format!("connect to {url} timed out")),
            Ok(Err(e)) => return ClientError::Transport(e.to_string()),
            Ok(Ok((ws, _))) => ws,
        },
    };
    info!(%url, "connected");

    let (mut ws_tx, mut ws_rx) = ws.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let login = {
        let mut shared = inner.shared.lock();
        shared.outbound = Some(out_tx.clone());
        shared.machine.on_open()
    };
    inner.publish();
    match encode(&login) {
        Ok(text) => {
            let _ = out_tx.send(text);
        }
        Err(e) => return ClientError::Transport(e.to_string()),
    }
    drop(out_tx);

    loop {
        tokio::select! {
            () = connection.cancelled() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                return ClientError::Closed;
            }
            out = out_rx.recv() => {
                let Some(text) = out else { return ClientError::Closed };
                if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                    return ClientError::Transport(e.to_string());
                }
            }
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => inner.deliver(text.as_str()),
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => inner.deliver(text),
                    Err(e) => {
                        warn!(len = bytes.len(), "binary frame is not UTF-8");
                        (inner.on_error)(&ClientError::Decode(format!("binary frame: {e}")));
                    }
                },
                Some(Ok(Message::Close(_))) | None => return ClientError::Closed,
                Some(Ok(_)) => {}
                Some(Err(e)) => return ClientError::Transport(e.to_string()),
            },
        }
    }
}
