//! Signals crossing the isolation boundary, and defensive parsing of the
//! wire form that a browser-hosted frame posts to its parent.

use crate::error::{PreviewError, PreviewResult};
use crate::host::HostId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const UNKNOWN_ERROR: &str = "Unknown runtime error";

/// Maximum accepted length of an error message from the wire.
const MAX_MESSAGE_LEN: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Signal {
    Loaded,
    Error { message: String },
}

impl Signal {
    /// Error signal with a guaranteed non-empty message.
    pub fn error(message: impl Into<String>) -> Self {
        let message = message.into();
        let message = if message.trim().is_empty() {
            UNKNOWN_ERROR.to_string()
        } else {
            message
        };
        Signal::Error { message }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Signal::Error { .. })
    }
}

/// A signal stamped with the host that sent it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub origin: HostId,
    pub signal: Signal,
}

/// A validated wire message: the channel token it claims and its signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    pub channel: String,
    pub signal: Signal,
}

/// Parses `{"type": "loaded" | "error", "message"?, "channel"}`.
///
/// Anything else is rejected: non-objects, unknown types, and messages
/// without a channel token.
pub fn parse_wire(raw: &str) -> PreviewResult<WireMessage> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| PreviewError::InvalidSignal(format!("not valid JSON: {}", e)))?;
    let obj = value
        .as_object()
        .ok_or_else(|| PreviewError::InvalidSignal("expected a JSON object".to_string()))?;

    let kind = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| PreviewError::InvalidSignal("missing string field 'type'".to_string()))?;

    let channel = obj
        .get("channel")
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| PreviewError::UntrustedMessage {
            reason: "message carries no channel token".to_string(),
        })?
        .to_string();

    let signal = match kind {
        "loaded" => Signal::Loaded,
        "error" => {
            let message = match obj.get("message") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            };
            Signal::error(truncate(message, MAX_MESSAGE_LEN))
        }
        other => {
            return Err(PreviewError::InvalidSignal(format!(
                "unknown signal type '{}'",
                other
            )));
        }
    };

    Ok(WireMessage { channel, signal })
}

fn truncate(mut s: String, max: usize) -> String {
    if s.len() > max {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s.truncate(end);
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_signal_serialization() {
        assert_eq!(
            serde_json::to_string(&Signal::Loaded).unwrap(),
            r#"{"type":"loaded"}"#
        );
        assert_eq!(
            serde_json::to_string(&Signal::error("boom")).unwrap(),
            r#"{"type":"error","message":"boom"}"#
        );
    }

    #[test]
    fn test_parse_loaded() {
        let msg = parse_wire(r#"{"type":"loaded","channel":"abc"}"#).unwrap();
        assert_eq!(msg.signal, Signal::Loaded);
        assert_eq!(msg.channel, "abc");
    }

    #[test]
    fn test_parse_error_with_empty_message() {
        let msg = parse_wire(r#"{"type":"error","message":"","channel":"abc"}"#).unwrap();
        assert_eq!(msg.signal, Signal::error("Unknown runtime error"));
    }

    #[test]
    fn test_parse_error_with_non_string_message() {
        let msg = parse_wire(r#"{"type":"error","message":{"line":3},"channel":"abc"}"#).unwrap();
        assert_eq!(msg.signal, Signal::error(r#"{"line":3}"#));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let err = parse_wire(r#"{"type":"navigate","channel":"abc"}"#).unwrap_err();
        assert!(matches!(err, PreviewError::InvalidSignal(_)));
    }

    #[test]
    fn test_missing_channel_rejected() {
        let err = parse_wire(r#"{"type":"loaded"}"#).unwrap_err();
        assert!(matches!(err, PreviewError::UntrustedMessage { .. }));
    }

    #[test]
    fn test_non_object_rejected() {
        assert!(parse_wire(r#""loaded""#).is_err());
        assert!(parse_wire("not json").is_err());
    }

    #[test]
    fn test_long_message_truncated() {
        let long = "é".repeat(MAX_MESSAGE_LEN);
        let raw = serde_json::json!({"type": "error", "message": long, "channel": "c"}).to_string();
        match parse_wire(&raw).unwrap().signal {
            Signal::Error { message } => assert!(message.len() <= MAX_MESSAGE_LEN),
            other => panic!("unexpected signal: {other:?}"),
        }
    }
}
