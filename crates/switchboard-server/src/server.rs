//! `SocketServer`: builder for the protocol server and its Axum router.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::Mutex;
use serde_json::Value;
use switchboard_core::{ConnectionId, RequestName};
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::auth::{Authenticator, LogoutHandler, UpgradeGate, UpgradeRequest};
use crate::config::ServerConfig;
use crate::error::{ConnectionError, ErrorSink, ServerError};
use crate::health::{self, HealthResponse};
use crate::metrics;
use crate::routes::{RouteHandler, RouteTable};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::broadcast::BroadcastManager;
use crate::websocket::handler::Protocol;
use crate::websocket::heartbeat::run_heartbeat;
use crate::websocket::session::{SessionContext, run_ws_session};

/// Builder for a switchboard server.
///
/// Register routes and hooks, then either [`listen`](Self::listen) on the
/// configured address or take the [`Router`] with
/// [`into_router`](Self::into_router) and merge it into a host application.
pub struct SocketServer {
    config: ServerConfig,
    routes: RouteTable,
    authenticator: Arc<dyn Authenticator>,
    on_logout: Option<Arc<dyn LogoutHandler>>,
    gate: Option<Arc<dyn UpgradeGate>>,
    error_sink: Option<ErrorSink>,
    metrics: Option<PrometheusHandle>,
    handle: ServerHandle,
}

impl SocketServer {
    /// Create a server that checks logins with `authenticator`.
    pub fn new(config: ServerConfig, authenticator: impl Authenticator + 'static) -> Self {
        Self {
            config,
            routes: RouteTable::new(),
            authenticator: Arc::new(authenticator),
            on_logout: None,
            gate: None,
            error_sink: None,
            metrics: None,
            handle: ServerHandle::new(),
        }
    }

    /// Register the handler for `call/<name>`.
    pub fn on(mut self, name: impl Into<RequestName>, handler: impl RouteHandler + 'static) -> Self {
        self.routes.insert(name, handler);
        self
    }

    /// Set the callback run on `auth/logout`.
    pub fn set_on_logout(mut self, handler: impl LogoutHandler + 'static) -> Self {
        self.on_logout = Some(Arc::new(handler));
        self
    }

    /// Set the login deadline (may raise the heartbeat interval).
    pub fn set_auth_timeout(mut self, timeout: Duration) -> Self {
        self.config.set_auth_timeout(timeout);
        self
    }

    /// Set the heartbeat interval (may lower the login deadline).
    pub fn set_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.set_heartbeat_interval(interval);
        self
    }

    /// Gate raw upgrade requests; rejected upgrades get `401`.
    pub fn set_upgrade_gate(mut self, gate: impl UpgradeGate + 'static) -> Self {
        self.gate = Some(Arc::new(gate));
        self
    }

    /// Receive per-connection failures.
    pub fn set_error_sink<F>(mut self, sink: F) -> Self
    where
        F: Fn(&ConnectionId, &ConnectionError) + Send + Sync + 'static,
    {
        self.error_sink = Some(Arc::new(sink));
        self
    }

    /// Serve `/metrics` from this recorder handle.
    pub fn set_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Current configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Handle for broadcasting and closing; usable before the server starts.
    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    /// Build the router and start the heartbeat sweep.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn into_router(self) -> (Router, ServerHandle) {
        let Self {
            config,
            routes,
            authenticator,
            on_logout,
            gate,
            error_sink,
            metrics,
            handle,
        } = self;

        let heartbeat = tokio::spawn(run_heartbeat(
            handle.broadcast.clone(),
            config.heartbeat_interval(),
            handle.shutdown.token(),
        ));
        handle.track(heartbeat);

        let state = AppState {
            session: SessionContext {
                protocol: Arc::new(Protocol {
                    routes,
                    authenticator,
                    on_logout,
                }),
                broadcast: handle.broadcast.clone(),
                auth_timeout: config.auth_timeout(),
                send_queue_capacity: config.send_queue_capacity(),
                error_sink,
            },
            gate,
            shutdown: handle.shutdown.clone(),
            start_time: handle.start_time,
            metrics,
            max_message_size: config.max_message_size,
        };

        let router = Router::new()
            .route(&config.ws_path, get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive());

        (router, handle)
    }

    /// Bind the configured address and serve until the handle is closed.
    pub async fn listen(self) -> Result<(SocketAddr, ServerHandle), ServerError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        let ws_path = self.config.ws_path.clone();

        let (router, handle) = self.into_router();
        let token = handle.shutdown.token();
        let serve = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                warn!(error = %e, "server stopped with error");
            }
        });
        handle.track(serve);

        info!(%local_addr, ws_path = %ws_path, "switchboard server listening");
        Ok((local_addr, handle))
    }
}

/// Cloneable control surface of a running server.
#[derive(Clone)]
pub struct ServerHandle {
    broadcast: Arc<BroadcastManager>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl ServerHandle {
    fn new() -> Self {
        Self {
            broadcast: Arc::new(BroadcastManager::new()),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn track(&self, task: JoinHandle<()>) {
        self.tasks.lock().push(task);
    }

    /// Push `payload` on `channel` to authenticated connections, optionally
    /// only to members of `group` and skipping `exclude`.
    ///
    /// Returns the number of connections it was queued for.
    pub async fn broadcast(
        &self,
        channel: impl Into<RequestName>,
        group: Option<&str>,
        payload: Value,
        exclude: Option<&ConnectionId>,
    ) -> usize {
        self.broadcast.broadcast(channel, group, payload, exclude).await
    }

    /// Stop accepting upgrades, stop the heartbeat and close every connection.
    pub fn close(&self) {
        if !self.shutdown.is_shutting_down() {
            info!("closing switchboard server");
        }
        self.shutdown.shutdown();
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_shutting_down()
    }

    /// Close and wait (bounded) for the listener and heartbeat to stop.
    pub async fn shutdown(&self, timeout: Option<Duration>) {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        self.shutdown.graceful_shutdown(tasks, timeout).await;
    }

    /// Live connections.
    pub async fn connection_count(&self) -> usize {
        self.broadcast.connection_count().await
    }

    /// Live connections that have logged in.
    pub async fn authenticated_count(&self) -> usize {
        self.broadcast.authenticated_count().await
    }

    /// The live connection set.
    pub fn connections(&self) -> &Arc<BroadcastManager> {
        &self.broadcast
    }
}

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
struct AppState {
    session: SessionContext,
    gate: Option<Arc<dyn UpgradeGate>>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
    max_message_size: usize,
}

/// GET <ws_path>: gate, then upgrade.
async fn ws_handler(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if state.shutdown.is_shutting_down() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let upgrade = UpgradeRequest { uri, headers };
    if let Some(gate) = &state.gate {
        if !gate.admit(&upgrade).await {
            info!(uri = %upgrade.uri, "upgrade rejected by gate");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let conn_id = ConnectionId::new();
    let closed = state.shutdown.connection_token();
    let upgrade = Arc::new(upgrade);
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| run_ws_session(socket, conn_id, closed, upgrade, state.session))
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let broadcast = &state.session.broadcast;
    let connections = broadcast.connection_count().await;
    let authenticated = broadcast.authenticated_count().await;
    Json(health::health_check(state.start_time, connections, authenticated))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => metrics::render(handle).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthContext, auth_fn, gate_fn};
    use crate::routes::{Responder, RouteRequest, handler_fn};
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::json;
    use tower::ServiceExt;

    fn make_server() -> SocketServer {
        SocketServer::new(
            ServerConfig::default(),
            auth_fn(|_creds: Value, ctx: AuthContext| async move {
                ctx.set_session(json!(true));
            }),
        )
    }

    async fn get(app: Router, uri: &str) -> Response {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        app.oneshot(req).await.unwrap()
    }

    #[tokio::test]
    async fn builder_registers_routes_and_timers() {
        let server = make_server()
            .on("getUsers", handler_fn(|_r: RouteRequest, respond: Responder| async move {
                let _ = respond.ok(json!([]));
            }))
            .set_heartbeat_interval(Duration::from_secs(1));
        assert_eq!(server.routes.len(), 1);
        assert_eq!(server.config().auth_timeout_ms, 750);
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let (app, handle) = make_server().into_router();
        let resp = get(app, "/health").await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let parsed: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
        assert_eq!(parsed["authenticated"], 0);
        handle.close();
    }

    #[tokio::test]
    async fn metrics_endpoint_needs_recorder() {
        let (app, handle) = make_server().into_router();
        assert_eq!(get(app, "/metrics").await.status(), StatusCode::NOT_FOUND);
        handle.close();

        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new()
            .build_recorder()
            .handle();
        let (app, handle) = make_server().set_metrics(recorder).into_router();
        assert_eq!(get(app, "/metrics").await.status(), StatusCode::OK);
        handle.close();
    }

    #[tokio::test]
    async fn plain_get_on_ws_path_is_not_upgraded() {
        let (app, handle) = make_server().into_router();
        let resp = get(app, "/ws").await;
        assert!(resp.status().is_client_error());
        assert_ne!(resp.status(), StatusCode::UNAUTHORIZED);
        handle.close();
    }

    #[tokio::test]
    async fn gate_rejection_is_401() {
        let (app, handle) = make_server()
            .set_upgrade_gate(gate_fn(|req: UpgradeRequest| async move {
                req.uri.query() == Some("token=ok")
            }))
            .into_router();

        assert_eq!(get(app.clone(), "/ws?token=bad").await.status(), StatusCode::UNAUTHORIZED);
        assert_ne!(get(app, "/ws?token=ok").await.status(), StatusCode::UNAUTHORIZED);
        handle.close();
    }

    #[tokio::test]
    async fn closed_server_refuses_upgrades() {
        let (app, handle) = make_server().into_router();
        handle.close();
        assert!(handle.is_closed());
        assert_eq!(get(app, "/ws").await.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn custom_ws_path() {
        let config = ServerConfig {
            ws_path: "/socket".into(),
            ..ServerConfig::default()
        };
        let server = SocketServer::new(config, auth_fn(|_c: Value, _ctx: AuthContext| async {}));
        let (app, handle) = server.into_router();
        assert_eq!(get(app.clone(), "/ws").await.status(), StatusCode::NOT_FOUND);
        assert_ne!(get(app, "/socket").await.status(), StatusCode::NOT_FOUND);
        handle.close();
    }

    #[tokio::test]
    async fn broadcast_with_no_connections() {
        let server = make_server();
        let handle = server.handle();
        assert_eq!(handle.broadcast("news", None, json!(1), None).await, 0);
        assert_eq!(handle.connection_count().await, 0);
    }

    #[tokio::test]
    async fn listen_binds_ephemeral_port_and_shuts_down() {
        let (addr, handle) = make_server().listen().await.unwrap();
        assert_ne!(addr.port(), 0);
        handle.shutdown(Some(Duration::from_secs(2))).await;
        assert!(handle.is_closed());
    }
}
