//! Authentication hooks: the upgrade gate, the login authenticator and the
//! logout callback.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{HeaderMap, Uri};
use serde_json::Value;
use switchboard_core::ConnectionId;

use crate::error::ConnectionError;
use crate::routes::Responder;
use crate::websocket::connection::ClientConnection;

/// The HTTP request that asked for the WebSocket upgrade.
#[derive(Debug, Clone, Default)]
pub struct UpgradeRequest {
    /// Request URI, including any query string.
    pub uri: Uri,
    /// Request headers.
    pub headers: HeaderMap,
}

/// Capabilities given to the authenticator for one `auth/login`.
pub struct AuthContext {
    connection: Arc<ClientConnection>,
    responder: Responder,
    request: Arc<UpgradeRequest>,
}

impl AuthContext {
    pub(crate) fn new(
        connection: Arc<ClientConnection>,
        responder: Responder,
        request: Arc<UpgradeRequest>,
    ) -> Self {
        Self {
            connection,
            responder,
            request,
        }
    }

    /// Attach the session payload, completing login. `null` does not count.
    pub fn set_session(&self, data: Value) {
        self.connection.set_session(data);
    }

    /// Reject the login and close the connection. The error sink receives
    /// [`ConnectionError::AuthRejected`].
    pub fn close(&self) {
        self.connection.terminate(ConnectionError::AuthRejected);
    }

    /// Send the correlated reply to the login request.
    pub fn reply(&self, error: Option<Value>, response: Value) -> bool {
        self.responder.send(error, response)
    }

    /// The upgrade request this connection arrived on.
    pub fn request(&self) -> &UpgradeRequest {
        &self.request
    }

    /// ID of the connection logging in.
    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection.id
    }
}

/// Validates `auth/login` credentials.
///
/// Login succeeds if [`AuthContext::set_session`] was called by the time
/// `authenticate` returns; otherwise the connection is closed.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Check `credentials` and act through `ctx`.
    async fn authenticate(&self, credentials: Value, ctx: AuthContext);
}

/// Runs on `auth/logout` before the connection closes.
#[async_trait]
pub trait LogoutHandler: Send + Sync {
    /// Tear down `session`; `respond` answers the logout request.
    async fn logout(&self, session: Value, respond: Responder);
}

/// Accepts or rejects a raw upgrade before any socket exists.
#[async_trait]
pub trait UpgradeGate: Send + Sync {
    /// `true` lets the upgrade proceed; `false` answers `401`.
    async fn admit(&self, request: &UpgradeRequest) -> bool;
}

// ── Closure adapters ────────────────────────────────────────────────

struct FnAuth<F>(F);

#[async_trait]
impl<F, Fut> Authenticator for FnAuth<F>
where
    F: Fn(Value, AuthContext) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    async fn authenticate(&self, credentials: Value, ctx: AuthContext) {
        (self.0)(credentials, ctx).await;
    }
}

/// Wrap an async closure as an [`Authenticator`].
pub fn auth_fn<F, Fut>(f: F) -> impl Authenticator
where
    F: Fn(Value, AuthContext) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    FnAuth(f)
}

struct FnLogout<F>(F);

#[async_trait]
impl<F, Fut> LogoutHandler for FnLogout<F>
where
    F: Fn(Value, Responder) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    async fn logout(&self, session: Value, respond: Responder) {
        (self.0)(session, respond).await;
    }
}

/// Wrap an async closure as a [`LogoutHandler`].
pub fn logout_fn<F, Fut>(f: F) -> impl LogoutHandler
where
    F: Fn(Value, Responder) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    FnLogout(f)
}

struct FnGate<F>(F);

#[async_trait]
impl<F, Fut> UpgradeGate for FnGate<F>
where
    F: Fn(UpgradeRequest) -> Fut + Send + Sync,
    Fut: Future<Output = bool> + Send,
{
    async fn admit(&self, request: &UpgradeRequest) -> bool {
        (self.0)(request.clone()).await
    }
}

/// Wrap an async predicate as an [`UpgradeGate`].
pub fn gate_fn<F, Fut>(f: F) -> impl UpgradeGate
where
    F: Fn(UpgradeRequest) -> Fut + Send + Sync,
    Fut: Future<Output = bool> + Send,
{
    FnGate(f)
}
