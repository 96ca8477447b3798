//! Wire envelope types.
//!
//! A request travels as `{ info, data }`; every reply and every broadcast
//! travels as `{ info, error, response }`. The `info` block of a reply is the
//! request's `info` echoed unchanged, which is how the client correlates it.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Well-known request names handled by the protocol itself.
pub mod requests {
    /// `auth/login`: present credentials.
    pub const LOGIN: &str = "login";
    /// `auth/logout`: end the session and close.
    pub const LOGOUT: &str = "logout";
    /// `group/join`: add a group to the session.
    pub const JOIN: &str = "join";
    /// `group/leave`: remove a group from the session.
    pub const LEAVE: &str = "leave";
    /// `group/leaveAll`: clear all groups.
    pub const LEAVE_ALL: &str = "leaveAll";
    /// `call/echo`: built-in connectivity check.
    pub const ECHO: &str = "echo";
}

/// Top-level routing tag of an envelope.
///
/// Unknown tags decode into [`Action::Other`] with their spelling kept, so a
/// reply can echo them unchanged.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Action {
    /// Login / logout.
    Auth,
    /// Named route call.
    Call,
    /// Group membership change.
    Group,
    /// Server-initiated push (server → client only).
    Broadcast,
    /// Any other tag.
    Other(String),
}

impl Action {
    /// Wire spelling of the action.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Auth => "auth",
            Self::Call => "call",
            Self::Group => "group",
            Self::Broadcast => "broadcast",
            Self::Other(tag) => tag,
        }
    }
}

impl From<String> for Action {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "auth" => Self::Auth,
            "call" => Self::Call,
            "group" => Self::Group,
            "broadcast" => Self::Broadcast,
            _ => Self::Other(tag),
        }
    }
}

impl From<Action> for String {
    fn from(action: Action) -> Self {
        match action {
            Action::Other(tag) => tag,
            known => known.as_str().to_owned(),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation name inside an action: a string (`"login"`, `"getUsers"`) or an
/// integer. The JSON type is preserved on round-trip.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestName {
    /// Integer request identifier.
    Number(i64),
    /// String request identifier.
    Text(String),
}

impl RequestName {
    /// The name as a string slice, if it is textual.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Number(_) => None,
        }
    }

    /// Whether this is the textual name `name`.
    pub fn is(&self, name: &str) -> bool {
        self.as_str() == Some(name)
    }
}

impl fmt::Display for RequestName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for RequestName {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for RequestName {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for RequestName {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

/// Routing metadata shared by requests, replies and broadcasts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
    /// Routing tag.
    pub action: Action,
    /// Operation or broadcast channel name.
    pub request: RequestName,
    /// Group name for group actions and group-scoped broadcasts.
    #[serde(default)]
    pub group: Option<String>,
    /// Sender-assigned sequence number, echoed unchanged in the reply.
    #[serde(rename = "packageID")]
    pub sequence: u64,
}

impl PackageInfo {
    /// Build an info block.
    pub fn new(
        action: Action,
        request: impl Into<RequestName>,
        group: Option<String>,
        sequence: u64,
    ) -> Self {
        Self {
            action,
            request: request.into(),
            group,
            sequence,
        }
    }
}

/// Client → server request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Routing metadata.
    pub info: PackageInfo,
    /// Request payload.
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    /// Build a request envelope.
    pub fn new(info: PackageInfo, data: Value) -> Self {
        Self { info, data }
    }

    /// `auth/login` carrying credentials.
    pub fn login(sequence: u64, credentials: Value) -> Self {
        Self::new(
            PackageInfo::new(Action::Auth, requests::LOGIN, None, sequence),
            credentials,
        )
    }

    /// `auth/logout`.
    pub fn logout(sequence: u64) -> Self {
        Self::new(
            PackageInfo::new(Action::Auth, requests::LOGOUT, None, sequence),
            Value::Null,
        )
    }

    /// `call/<name>` carrying a payload.
    pub fn call(sequence: u64, name: impl Into<RequestName>, data: Value) -> Self {
        Self::new(PackageInfo::new(Action::Call, name, None, sequence), data)
    }

    /// `group/<request>` for the given group (`None` for `leaveAll`).
    pub fn group(sequence: u64, request: &str, group: Option<String>) -> Self {
        Self::new(
            PackageInfo::new(Action::Group, request, group, sequence),
            Value::Null,
        )
    }

    /// Build the reply to this request, echoing its `info`.
    pub fn reply(&self, error: Option<Value>, response: Value) -> Reply {
        Reply::to(self.info.clone(), error, response)
    }
}

/// Server → client reply or broadcast.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    /// Echoed request metadata, or broadcast metadata.
    pub info: PackageInfo,
    /// `false` on the wire when absent.
    #[serde(default, with = "error_flag")]
    pub error: Option<Value>,
    /// Reply payload.
    #[serde(default)]
    pub response: Value,
}

impl Reply {
    /// Reply correlated to `info`.
    pub fn to(info: PackageInfo, error: Option<Value>, response: Value) -> Self {
        Self {
            info,
            error,
            response,
        }
    }

    /// Uncorrelated broadcast on `channel`, optionally scoped to `group`.
    pub fn broadcast(
        channel: impl Into<RequestName>,
        group: Option<String>,
        sequence: u64,
        payload: Value,
    ) -> Self {
        Self {
            info: PackageInfo::new(Action::Broadcast, channel, group, sequence),
            error: None,
            response: payload,
        }
    }

    /// Whether this message is a broadcast rather than a correlated reply.
    pub fn is_broadcast(&self) -> bool {
        self.info.action == Action::Broadcast
    }
}

/// `error` is `false` on the wire when there is no error, and any other JSON
/// value otherwise. `null` is accepted as "no error" on input.
mod error_flag {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use serde_json::Value;

    pub(super) fn serialize<S: Serializer>(
        error: &Option<Value>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match error {
            Some(value) => value.serialize(serializer),
            None => serializer.serialize_bool(false),
        }
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Value>, D::Error> {
        Ok(match Value::deserialize(deserializer)? {
            Value::Null | Value::Bool(false) => None,
            other => Some(other),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn action_wire_spelling() {
        assert_eq!(serde_json::to_value(&Action::Auth).unwrap(), "auth");
        assert_eq!(serde_json::to_value(&Action::Broadcast).unwrap(), "broadcast");
        let parsed: Action = serde_json::from_value(json!("group")).unwrap();
        assert_eq!(parsed, Action::Group);
        assert_eq!(Action::Call.to_string(), "call");
    }

    #[test]
    fn unknown_action_keeps_its_spelling() {
        let parsed: Action = serde_json::from_value(json!("subscribe")).unwrap();
        assert_eq!(parsed, Action::Other("subscribe".into()));
        assert_eq!(serde_json::to_value(&parsed).unwrap(), "subscribe");
        assert!(serde_json::from_value::<Action>(json!(3)).is_err());
    }

    #[test]
    fn request_name_keeps_json_type() {
        let text: RequestName = serde_json::from_value(json!("echo")).unwrap();
        assert_eq!(text, RequestName::Text("echo".into()));
        let number: RequestName = serde_json::from_value(json!(42)).unwrap();
        assert_eq!(number, RequestName::Number(42));
        assert_eq!(serde_json::to_value(&number).unwrap(), json!(42));
        assert_eq!(serde_json::to_value(&text).unwrap(), json!("echo"));
    }

    #[test]
    fn request_name_helpers() {
        let name = RequestName::from("join");
        assert!(name.is(requests::JOIN));
        assert!(!RequestName::from(7).is("7"));
        assert_eq!(RequestName::from(7).to_string(), "7");
    }

    #[test]
    fn info_uses_package_id_on_the_wire() {
        let info = PackageInfo::new(Action::Call, "getUsers", None, 3);
        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(
            value,
            json!({"action": "call", "request": "getUsers", "group": null, "packageID": 3})
        );
    }

    #[test]
    fn reply_without_error_serializes_false() {
        let reply = Reply::to(
            PackageInfo::new(Action::Group, "join", Some("g".into()), 1),
            None,
            json!({"done": true}),
        );
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["error"], json!(false));
        assert_eq!(value["response"]["done"], true);
    }

    #[test]
    fn reply_error_payload_preserved() {
        let raw = json!({
            "info": {"action": "call", "request": "x", "group": null, "packageID": 9},
            "error": "invalid call request",
            "response": {"done": false}
        });
        let reply: Reply = serde_json::from_value(raw).unwrap();
        assert_eq!(reply.error, Some(json!("invalid call request")));
    }

    #[test]
    fn null_error_reads_as_none() {
        let raw = json!({
            "info": {"action": "auth", "request": "login", "group": null, "packageID": 0},
            "error": null,
            "response": {"user": "admin"}
        });
        let reply: Reply = serde_json::from_value(raw).unwrap();
        assert!(reply.error.is_none());
    }

    #[test]
    fn reply_mirrors_request_info() {
        let request = Envelope::call(5, "getUsers", json!({"page": 1}));
        let reply = request.reply(None, json!([]));
        assert_eq!(reply.info, request.info);
        assert!(!reply.is_broadcast());
    }

    #[test]
    fn broadcast_constructor() {
        let reply = Reply::broadcast("news", Some("company".into()), 4, json!({"m": 1}));
        assert!(reply.is_broadcast());
        assert_eq!(reply.info.group.as_deref(), Some("company"));
        assert_eq!(reply.info.sequence, 4);
        assert!(reply.error.is_none());
    }

    #[test]
    fn group_envelope_shapes() {
        let join = Envelope::group(2, requests::JOIN, Some("g".into()));
        assert_eq!(join.info.action, Action::Group);
        assert_eq!(join.info.group.as_deref(), Some("g"));
        assert!(join.data.is_null());
        let leave_all = Envelope::group(3, requests::LEAVE_ALL, None);
        assert!(leave_all.info.group.is_none());
    }

    #[test]
    fn login_and_logout_envelopes() {
        let login = Envelope::login(0, json!({"user": "admin"}));
        assert_eq!(login.info.action, Action::Auth);
        assert!(login.info.request.is(requests::LOGIN));
        assert_eq!(login.data["user"], "admin");
        let logout = Envelope::logout(8);
        assert!(logout.info.request.is(requests::LOGOUT));
    }
}
