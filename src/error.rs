//! Error types for ports and channels.

use std::time::Duration;
use thiserror::Error;

/// Error returned by a port when a frame cannot be posted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortError {
    #[error("port is closed")]
    Closed,

    #[error("could not transfer objects: {0}")]
    DataClone(String),
}

/// Error type for channel operations.
///
/// Every failure of a `send_data` call is reported to its caller as one of
/// these. The protocol violation variants are only surfaced as a channel's
/// close reason when strict mode is enabled.
#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    #[error("Send operation timed out for message ID {id} after {after:?}")]
    Timeout { id: String, after: Duration },

    #[error("Remote failure for message ID {id}: {message}")]
    Remote {
        id: String,
        message: String,
        payload: serde_json::Value,
    },

    #[error("Failed to transmit message ID {id}: {source}")]
    Transmit {
        id: String,
        #[source]
        source: PortError,
    },

    #[error("Channel is closed")]
    Closed,

    #[error("Message ID {id} was superseded by a later send with the same ID")]
    Superseded { id: String },

    #[error("Received acknowledgment for unknown message ID {id}")]
    UnknownAck { id: String },

    #[error("Received frame of unrecognized type")]
    UnknownFrame,
}

impl ChannelError {
    /// Build a remote failure from an error acknowledgment payload.
    ///
    /// Strings are used verbatim, objects carrying a `message` string use it,
    /// and any other value is rendered as JSON.
    pub fn from_remote(id: impl Into<String>, payload: serde_json::Value) -> Self {
        let message = match &payload {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Object(map) => match map.get("message") {
                Some(serde_json::Value::String(s)) => s.clone(),
                _ => payload.to_string(),
            },
            serde_json::Value::Null => "unknown remote error".to_string(),
            other => other.to_string(),
        };
        Self::Remote {
            id: id.into(),
            message,
            payload,
        }
    }

    /// Short label used for metric attributes.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Remote { .. } => "remote",
            Self::Transmit { .. } => "transmit",
            Self::Closed => "closed",
            Self::Superseded { .. } => "superseded",
            Self::UnknownAck { .. } => "unknown_ack",
            Self::UnknownFrame => "unknown_frame",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_remote_error_from_string() {
        let err = ChannelError::from_remote("x1", json!("boom"));
        assert!(err.to_string().contains("boom"));
        assert!(err.to_string().contains("x1"));
    }

    #[test]
    fn test_remote_error_from_object_with_message() {
        let err = ChannelError::from_remote("x2", json!({"message": "disk full", "code": 28}));
        match err {
            ChannelError::Remote { message, payload, .. } => {
                assert_eq!(message, "disk full");
                assert_eq!(payload["code"], 28);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_remote_error_wraps_non_string_payload() {
        let err = ChannelError::from_remote("x3", json!([1, 2, 3]));
        assert!(err.to_string().contains("[1,2,3]"));
    }

    #[test]
    fn test_timeout_message() {
        let err = ChannelError::Timeout {
            id: "abc".into(),
            after: Duration::from_millis(1),
        };
        assert!(err
            .to_string()
            .starts_with("Send operation timed out for message ID abc"));
        assert_eq!(err.kind(), "timeout");
    }
}
