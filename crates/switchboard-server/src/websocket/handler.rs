//! Inbound envelope dispatch: the per-connection protocol state machine.
//!
//! Before login only `auth/login` is accepted. Once the session carries an
//! authentication payload, `group`, `call` and `auth/logout` are served.

use std::sync::Arc;

use metrics::counter;
use serde_json::json;
use switchboard_core::codec::decode_envelope_bytes;
use switchboard_core::envelope::requests;
use switchboard_core::{Action, Envelope, errors};
use tracing::{debug, info, warn};

use super::connection::ClientConnection;
use crate::auth::{AuthContext, Authenticator, LogoutHandler, UpgradeRequest};
use crate::error::ConnectionError;
use crate::metrics::{SOCKET_AUTH_TOTAL, SOCKET_CALLS_TOTAL};
use crate::routes::{Responder, RouteRequest, RouteTable};

/// Server-wide protocol hooks, fixed once the server starts.
pub struct Protocol {
    /// Named `call` routes.
    pub routes: RouteTable,
    /// Login check.
    pub authenticator: Arc<dyn Authenticator>,
    /// Optional logout callback.
    pub on_logout: Option<Arc<dyn LogoutHandler>>,
}

/// What the session loop does after a message.
#[derive(Debug)]
pub enum Disposition {
    /// Keep reading.
    Continue,
    /// Close normally (logout).
    Close,
    /// Close and report the error.
    Fail(ConnectionError),
}

/// Handle one inbound frame.
pub async fn handle_message(
    payload: &[u8],
    connection: &Arc<ClientConnection>,
    protocol: &Protocol,
    upgrade: &Arc<UpgradeRequest>,
) -> Disposition {
    let envelope = match decode_envelope_bytes(payload) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, len = payload.len(), "undecodable frame");
            return Disposition::Fail(e.into());
        }
    };
    debug!(
        action = %envelope.info.action,
        request = %envelope.info.request,
        sequence = envelope.info.sequence,
        "dispatch"
    );

    if !connection.is_authenticated() {
        return handle_unauthenticated(envelope, connection, protocol, upgrade).await;
    }

    let respond = Responder::new(envelope.info.clone(), connection.clone());
    match envelope.info.action {
        Action::Group => {
            handle_group(&envelope, connection, &respond);
            Disposition::Continue
        }
        Action::Call => {
            handle_call(envelope, connection, protocol, respond);
            Disposition::Continue
        }
        Action::Auth if envelope.info.request.is(requests::LOGOUT) => {
            if let Some(on_logout) = &protocol.on_logout {
                let session = connection.session_data().unwrap_or_default();
                on_logout.logout(session, respond).await;
            }
            info!("client logged out");
            Disposition::Close
        }
        Action::Auth => {
            let _ = respond.error(errors::INVALID_AUTH);
            Disposition::Continue
        }
        Action::Broadcast | Action::Other(_) => {
            debug!(action = %envelope.info.action, "action not accepted from clients");
            let _ = respond.error(errors::INVALID_ACTION);
            Disposition::Continue
        }
    }
}

async fn handle_unauthenticated(
    envelope: Envelope,
    connection: &Arc<ClientConnection>,
    protocol: &Protocol,
    upgrade: &Arc<UpgradeRequest>,
) -> Disposition {
    let is_login = envelope.info.action == Action::Auth && envelope.info.request.is(requests::LOGIN);
    if !is_login {
        warn!(
            action = %envelope.info.action,
            request = %envelope.info.request,
            "request before login"
        );
        let _ = connection.send_reply(&envelope.reply(Some(errors::unauthorized()), errors::done(false)));
        return Disposition::Fail(ConnectionError::ProtocolViolation {
            action: envelope.info.action,
            request: envelope.info.request,
        });
    }

    let Envelope { info, data } = envelope;
    let ctx = AuthContext::new(
        connection.clone(),
        Responder::new(info, connection.clone()),
        upgrade.clone(),
    );
    protocol.authenticator.authenticate(data, ctx).await;

    if connection.is_authenticated() && !connection.is_closed() {
        counter!(SOCKET_AUTH_TOTAL, "result" => "ok").increment(1);
        info!("client authenticated");
        Disposition::Continue
    } else {
        counter!(SOCKET_AUTH_TOTAL, "result" => "rejected").increment(1);
        info!("authentication rejected");
        Disposition::Fail(ConnectionError::AuthRejected)
    }
}

fn handle_group(envelope: &Envelope, connection: &ClientConnection, respond: &Responder) {
    let request = &envelope.info.request;
    if request.is(requests::LEAVE_ALL) {
        connection.leave_all();
        let _ = respond.ok(errors::done(true));
        return;
    }

    let joining = request.is(requests::JOIN);
    if !joining && !request.is(requests::LEAVE) {
        let _ = respond.error(errors::INVALID_GROUP);
        return;
    }
    let Some(group) = envelope.info.group.as_deref().filter(|g| !g.is_empty()) else {
        let _ = respond.error(errors::INVALID_GROUP);
        return;
    };

    if joining {
        let _ = connection.join(group);
    } else {
        let _ = connection.leave(group);
    }
    debug!(group, joining, "group membership changed");
    let _ = respond.ok(errors::done(true));
}

fn handle_call(
    envelope: Envelope,
    connection: &ClientConnection,
    protocol: &Protocol,
    respond: Responder,
) {
    let Envelope { info, data } = envelope;
    counter!(SOCKET_CALLS_TOTAL, "request" => info.request.to_string()).increment(1);

    if info.request.is(requests::ECHO) {
        let _ = respond.ok(json!({
            "echoAt": chrono::Utc::now().timestamp_millis(),
            "received": data,
        }));
        return;
    }
    if protocol.routes.is_empty() {
        let _ = respond.error(errors::NO_ROUTES);
        return;
    }
    let Some(handler) = protocol.routes.get(&info.request) else {
        debug!(request = %info.request, "unknown route");
        let _ = respond.error(errors::INVALID_CALL);
        return;
    };

    let session = connection.session();
    let request = RouteRequest {
        data,
        session: session.data.unwrap_or_default(),
        groups: session.groups,
    };
    drop(tokio::spawn(async move {
        handler.handle(request, respond).await;
    }));
}
