//! Error strings and payloads carried inside replies.

use serde_json::{Value, json};

// ── Reply error strings ─────────────────────────────────────────────

/// Request issued without an authenticated session.
pub const NOT_AUTHENTICATED: &str = "not authenticated";
/// `call` to a name with no route.
pub const INVALID_CALL: &str = "invalid call request";
/// `call` while the route table is empty.
pub const NO_ROUTES: &str = "invalid call. No routes defined";
/// Unknown `group` request or missing group name.
pub const INVALID_GROUP: &str = "invalid group request";
/// Unknown `auth` request once authenticated.
pub const INVALID_AUTH: &str = "invalid auth request";
/// Action a client may not send.
pub const INVALID_ACTION: &str = "invalid action";

/// HTTP-style status used for the pre-authentication rejection.
pub const UNAUTHORIZED_STATUS: u16 = 401;

/// Rejection payload sent before closing a connection that skipped login.
pub fn unauthorized() -> Value {
    json!({ "code": UNAUTHORIZED_STATUS, "message": NOT_AUTHENTICATED })
}

/// `{ "done": <flag> }` acknowledgement used by group replies.
pub fn done(flag: bool) -> Value {
    json!({ "done": flag })
}
