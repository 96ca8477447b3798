//! JSON text codec for envelopes.
//!
//! Decoding never panics: malformed input surfaces as [`CodecError`] and the
//! caller decides what to do with the connection.

use serde::Serialize;

use crate::envelope::{Envelope, Reply};

/// Failure to encode or decode a wire message.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Not valid JSON, or missing/mistyped envelope fields.
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
    /// A binary frame whose bytes are not UTF-8.
    #[error("binary frame is not valid UTF-8")]
    InvalidUtf8,
}

/// Serialize any wire message to JSON text.
pub fn encode<T: Serialize>(message: &T) -> Result<String, CodecError> {
    Ok(serde_json::to_string(message)?)
}

/// Decode a client request.
pub fn decode_envelope(text: &str) -> Result<Envelope, CodecError> {
    Ok(serde_json::from_str(text)?)
}

/// Decode a client request from a binary frame.
pub fn decode_envelope_bytes(bytes: &[u8]) -> Result<Envelope, CodecError> {
    let text = std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)?;
    decode_envelope(text)
}

/// Decode a server reply or broadcast.
pub fn decode_reply(text: &str) -> Result<Reply, CodecError> {
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{Action, RequestName};
    use serde_json::json;

    #[test]
    fn decode_call_request() {
        let text = r#"{"info":{"action":"call","request":"getUsers","group":null,"packageID":12},"data":{"page":2}}"#;
        let envelope = decode_envelope(text).unwrap();
        assert_eq!(envelope.info.action, Action::Call);
        assert_eq!(envelope.info.request, RequestName::Text("getUsers".into()));
        assert_eq!(envelope.info.sequence, 12);
        assert_eq!(envelope.data["page"], 2);
    }

    #[test]
    fn integer_request_stays_integer() {
        let text = r#"{"info":{"action":"call","request":17,"group":null,"packageID":1},"data":null}"#;
        let envelope = decode_envelope(text).unwrap();
        assert_eq!(envelope.info.request, RequestName::Number(17));
        let back = encode(&envelope).unwrap();
        assert!(back.contains(r#""request":17"#));
    }

    #[test]
    fn sequence_beyond_f64_precision_is_exact() {
        let big = (1u64 << 53) + 1;
        let text = format!(
            r#"{{"info":{{"action":"call","request":"x","group":null,"packageID":{big}}},"data":null}}"#
        );
        let envelope = decode_envelope(&text).unwrap();
        assert_eq!(envelope.info.sequence, big);
        let encoded = encode(&envelope).unwrap();
        assert!(encoded.contains(&big.to_string()));
    }

    #[test]
    fn missing_group_and_data_default() {
        let text = r#"{"info":{"action":"auth","request":"logout","packageID":4}}"#;
        let envelope = decode_envelope(text).unwrap();
        assert!(envelope.info.group.is_none());
        assert!(envelope.data.is_null());
    }

    #[test]
    fn malformed_json_is_an_error() {
        let err = decode_envelope("{not json").unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));
        assert!(err.to_string().starts_with("malformed envelope"));
    }

    #[test]
    fn missing_info_is_an_error() {
        assert!(decode_envelope(r#"{"data":1}"#).is_err());
        assert!(decode_envelope("[1,2,3]").is_err());
        assert!(decode_envelope("").is_err());
    }

    #[test]
    fn missing_sequence_is_an_error() {
        let text = r#"{"info":{"action":"call","request":"x"},"data":null}"#;
        assert!(decode_envelope(text).is_err());
    }

    #[test]
    fn fractional_request_rejected() {
        let text = r#"{"info":{"action":"call","request":1.5,"packageID":1},"data":null}"#;
        assert!(decode_envelope(text).is_err());
    }

    #[test]
    fn binary_frame_must_be_utf8() {
        let err = decode_envelope_bytes(&[0xff, 0xfe]).unwrap_err();
        assert!(matches!(err, CodecError::InvalidUtf8));
        let ok = decode_envelope_bytes(
            br#"{"info":{"action":"call","request":"echo","packageID":0},"data":1}"#,
        )
        .unwrap();
        assert_eq!(ok.data, json!(1));
    }

    #[test]
    fn decode_broadcast_reply() {
        let text = r#"{"info":{"action":"broadcast","request":"to everyone","group":null,"packageID":3},"error":false,"response":{"message":"hi"}}"#;
        let reply = decode_reply(text).unwrap();
        assert!(reply.is_broadcast());
        assert!(reply.error.is_none());
        assert_eq!(reply.response["message"], "hi");
    }
}
