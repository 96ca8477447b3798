//! Route table and the reply capability handed to handlers.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use switchboard_core::{ConnectionId, PackageInfo, Reply, RequestName, errors};

use crate::websocket::connection::ClientConnection;

/// Input to a route handler: the call payload plus a snapshot of the
/// caller's session.
#[derive(Debug, Clone)]
pub struct RouteRequest {
    /// Call payload.
    pub data: Value,
    /// Authentication payload of the caller.
    pub session: Value,
    /// Groups the caller belonged to when the call arrived.
    pub groups: HashSet<String>,
}

/// Sends the single correlated reply to one request.
///
/// The reply echoes the request's `info` block unchanged.
#[derive(Clone)]
pub struct Responder {
    info: PackageInfo,
    connection: Arc<ClientConnection>,
}

impl Responder {
    pub(crate) fn new(info: PackageInfo, connection: Arc<ClientConnection>) -> Self {
        Self { info, connection }
    }

    /// Metadata of the request being answered.
    pub fn info(&self) -> &PackageInfo {
        &self.info
    }

    /// Connection that sent the request. Pass it as `exclude` to broadcast
    /// to everyone but the caller.
    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection.id
    }

    /// Send a reply. Returns `false` if it could not be queued.
    pub fn send(&self, error: Option<Value>, response: Value) -> bool {
        self.connection
            .send_reply(&Reply::to(self.info.clone(), error, response))
    }

    /// Send a successful reply.
    pub fn ok(&self, response: Value) -> bool {
        self.send(None, response)
    }

    /// Send an error reply with a `{done:false}` body.
    pub fn error(&self, error: impl Into<Value>) -> bool {
        self.send(Some(error.into()), errors::done(false))
    }
}

/// Handler for one named `call` route.
#[async_trait]
pub trait RouteHandler: Send + Sync {
    /// Handle a call. The handler answers through `respond`; it may also
    /// never answer, in which case the caller waits.
    async fn handle(&self, request: RouteRequest, respond: Responder);
}

struct FnRoute<F>(F);

#[async_trait]
impl<F, Fut> RouteHandler for FnRoute<F>
where
    F: Fn(RouteRequest, Responder) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    async fn handle(&self, request: RouteRequest, respond: Responder) {
        (self.0)(request, respond).await;
    }
}

/// Wrap an async closure as a [`RouteHandler`].
pub fn handler_fn<F, Fut>(f: F) -> impl RouteHandler
where
    F: Fn(RouteRequest, Responder) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    FnRoute(f)
}

/// Maps request names to handlers. Filled before the server starts and
/// read-only afterwards.
#[derive(Default)]
pub struct RouteTable {
    routes: HashMap<RequestName, Arc<dyn RouteHandler>>,
}

impl RouteTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for `name`.
    pub fn insert(&mut self, name: impl Into<RequestName>, handler: impl RouteHandler + 'static) {
        let _ = self.routes.insert(name.into(), Arc::new(handler));
    }

    /// Handler registered for `name`.
    pub fn get(&self, name: &RequestName) -> Option<Arc<dyn RouteHandler>> {
        self.routes.get(name).cloned()
    }

    /// Whether no routes are registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Registered names, sorted by their display form.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.routes.keys().map(ToString::to_string).collect();
        names.sort();
        names
    }
}
