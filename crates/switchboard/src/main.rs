//! # switchboard
//!
//! Demo host for the switchboard crates.
//!
//! - `serve`: a server with a toy `admin`/`admin` login, a `getUsers` route
//!   and two periodic broadcasts
//! - `client`: logs in to a server, joins a group and logs what arrives,
//!   optionally relaying every broadcast to a local server of its own

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use axum::routing::get;
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use switchboard_client::{ClientConfig, SocketClient};
use switchboard_core::logging::{init_json_subscriber, init_subscriber};
use switchboard_server::metrics::install_recorder;
use switchboard_server::{
    AuthContext, Responder, RouteRequest, ServerConfig, ServerHandle, SocketServer, auth_fn,
    handler_fn, logout_fn,
};
use switchboard_settings::{Settings, load_settings_from_path, settings_path};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const COMPANY_CHANNEL: &str = "company's broadcast";
const EVERYONE_CHANNEL: &str = "to everyone";
const COMPANY_GROUP: &str = "company";

/// Switchboard demo host.
#[derive(Parser, Debug)]
#[command(name = "switchboard", about = "Switchboard demo server and client")]
struct Cli {
    /// Settings file (defaults to `~/.switchboard/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the demo server.
    Serve {
        /// Host to bind (overrides settings).
        #[arg(long)]
        host: Option<String>,
        /// Port to bind (overrides settings).
        #[arg(long)]
        port: Option<u16>,
    },
    /// Connect to a server and log broadcasts.
    Client {
        /// Server WebSocket URL (overrides settings).
        #[arg(long)]
        url: Option<String>,
        /// Login user.
        #[arg(long, default_value = "admin")]
        user: String,
        /// Login password.
        #[arg(long, default_value = "admin")]
        password: String,
        /// Group to join after login.
        #[arg(long, default_value = COMPANY_GROUP)]
        group: String,
        /// Re-broadcast everything received on a local server at this port.
        #[arg(long)]
        relay_port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let path = cli.settings.clone().unwrap_or_else(settings_path);
    let settings = load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    if settings.logging.json {
        init_json_subscriber(&settings.logging.level);
    } else {
        init_subscriber(&settings.logging.level);
    }

    match cli.command {
        Command::Serve { host, port } => serve(&settings, host, port).await,
        Command::Client {
            url,
            user,
            password,
            group,
            relay_port,
        } => {
            let credentials = json!({"user": user, "password": password});
            run_client(&settings, url, credentials, group, relay_port).await
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Server
// ─────────────────────────────────────────────────────────────────────────────

/// Demo server: the protocol router merged into a host router.
fn demo_server(config: ServerConfig) -> SocketServer {
    SocketServer::new(config, auth_fn(demo_login))
        .on("getUsers", handler_fn(get_users))
        .set_on_logout(logout_fn(|session: Value, respond: Responder| async move {
            info!(user = %session["user"], "logged out");
            let _ = respond.ok(json!({"done": true}));
        }))
        .set_error_sink(|conn_id, err| warn!(%conn_id, error = %err, "connection error"))
}

async fn demo_login(credentials: Value, ctx: AuthContext) {
    let user = credentials["user"].as_str().unwrap_or_default().to_string();
    if user == "admin" && credentials["password"] == "admin" {
        ctx.set_session(json!({"user": user}));
        let _ = ctx.reply(None, json!({"user": user}));
    } else {
        info!(conn_id = %ctx.connection_id(), %user, "invalid credentials");
        let _ = ctx.reply(Some(json!("invalid credential")), Value::Null);
        ctx.close();
    }
}

async fn get_users(request: RouteRequest, respond: Responder) {
    debug!(caller = %request.session["user"], groups = request.groups.len(), "getUsers");
    let _ = respond.ok(json!({
        "users": [
            {"name": "user1", "id": 1},
            {"name": "user2", "id": 2},
        ]
    }));
}

/// Bind `config.host:config.port` and serve `router` until Ctrl-C, then
/// close the socket server behind `handle`.
async fn serve_router(config: &ServerConfig, router: Router, handle: ServerHandle) -> Result<()> {
    let app = Router::new()
        .route("/", get(|| async { "switchboard demo" }))
        .merge(router);

    let listener = TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", config.host, config.port))?;
    let addr = listener.local_addr().context("Failed to read bound address")?;
    info!(%addr, ws_path = %config.ws_path, "listening");

    let closer = handle.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down...");
            closer.close();
        })
        .await
        .context("Server error")?;

    handle.shutdown(None).await;
    info!("Shutdown complete");
    Ok(())
}

async fn serve(settings: &Settings, host: Option<String>, port: Option<u16>) -> Result<()> {
    let mut config = ServerConfig::from_settings(&settings.server);
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }

    let metrics = install_recorder().context("Failed to install metrics recorder")?;
    let (router, handle) = demo_server(config.clone()).set_metrics(metrics).into_router();

    let ticker = spawn_demo_broadcasts(handle.clone());
    let result = serve_router(&config, router, handle).await;
    ticker.abort();
    result
}

/// Company broadcast every second, global broadcast every 1.7 seconds.
fn spawn_demo_broadcasts(handle: ServerHandle) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut company = tokio::time::interval(Duration::from_millis(1_000));
        let mut everyone = tokio::time::interval(Duration::from_millis(1_700));
        loop {
            tokio::select! {
                _ = company.tick() => {
                    let payload = json!({
                        "message": "this is a message that only company group will receive",
                    });
                    let sent = handle.broadcast(COMPANY_CHANNEL, Some(COMPANY_GROUP), payload, None).await;
                    debug!(sent, channel = COMPANY_CHANNEL, "broadcast");
                }
                _ = everyone.tick() => {
                    let payload = json!({
                        "message": "this is a message that all groups will receive",
                    });
                    let sent = handle.broadcast(EVERYONE_CHANNEL, None, payload, None).await;
                    debug!(sent, channel = EVERYONE_CHANNEL, "broadcast");
                }
            }
        }
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────────────────────────

async fn run_client(
    settings: &Settings,
    url: Option<String>,
    credentials: Value,
    group: String,
    relay_port: Option<u16>,
) -> Result<()> {
    let mut config = ClientConfig::from_settings(&settings.client);
    if let Some(url) = url {
        config.url = url;
    }

    // The relay re-broadcasts on a local server of its own.
    let relay = match relay_port {
        Some(port) => {
            let mut relay_config = ServerConfig::from_settings(&settings.server);
            relay_config.port = port;
            let (addr, handle) = demo_server(relay_config)
                .listen()
                .await
                .context("Failed to start relay server")?;
            info!(%addr, "relay server listening");
            Some(handle)
        }
        None => None,
    };

    let (login_tx, mut logins) = mpsc::unbounded_channel();
    let client = SocketClient::connect(
        config,
        credentials,
        move |err, session| {
            let _ = login_tx.send((err, session));
        },
        |err| warn!(error = %err, "client error"),
    );

    for channel in [COMPANY_CHANNEL, EVERYONE_CHANNEL] {
        let relay = relay.clone();
        let scope = (channel == COMPANY_CHANNEL).then_some(COMPANY_GROUP);
        client.on(channel, move |err, payload| {
            if let Some(err) = err {
                warn!(channel, %err, "broadcast carried an error");
                return;
            }
            info!(channel, %payload, "broadcast");
            if let Some(relay) = relay.clone() {
                drop(tokio::spawn(async move {
                    let _ = relay.broadcast(channel, scope, payload, None).await;
                }));
            }
        });
    }

    let outcome = loop {
        tokio::select! {
            login = logins.recv() => {
                let Some((err, session)) = login else { break Ok(()) };
                if let Some(err) = err {
                    break Err(anyhow::anyhow!("login rejected: {err}"));
                }
                info!(%session, "logged in");
                match client.join(&group).await {
                    Ok(reply) => info!(%group, %reply, "joined group"),
                    Err(e) => warn!(%group, error = %e, "join failed"),
                }
                match client.request("getUsers", Value::Null).await {
                    Ok(users) => info!(%users, "getUsers"),
                    Err(e) => warn!(error = %e, "getUsers failed"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                break Ok(());
            }
        }
    };

    client.shutdown();
    if let Some(relay) = relay {
        relay.shutdown(None).await;
    }
    outcome
}
