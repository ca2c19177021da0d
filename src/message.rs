//! Wire frames exchanged between two channel endpoints.
//!
//! A frame is either a data message, which consumes a permit on the sending
//! side until it is acknowledged, or an acknowledgment correlated to a data
//! message by id. The data payload is opaque to the channel.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A frame as carried by a port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame<T> {
    Data(DataMessage<T>),
    Ack(AckMessage),
    /// A frame whose `type` discriminator is not understood.
    #[serde(other)]
    Unknown,
}

impl<T> Frame<T> {
    /// The frame's message id, if it carries one.
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Data(msg) => Some(&msg.id),
            Self::Ack(ack) => Some(&ack.id),
            Self::Unknown => None,
        }
    }
}

impl<T> From<DataMessage<T>> for Frame<T> {
    fn from(msg: DataMessage<T>) -> Self {
        Self::Data(msg)
    }
}

impl<T> From<AckMessage> for Frame<T> {
    fn from(ack: AckMessage) -> Self {
        Self::Ack(ack)
    }
}

/// A data message with a caller-assigned id.
///
/// The id must be unique among the sender's outstanding sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataMessage<T> {
    pub id: String,
    pub data: T,
}

impl<T> DataMessage<T> {
    pub fn new(id: impl Into<String>, data: T) -> Self {
        Self { id: id.into(), data }
    }
}

/// Outcome reported by an acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Ack,
    Error,
}

/// An acknowledgment for a previously received data message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckMessage {
    pub id: String,
    pub status: AckStatus,
    #[serde(default)]
    pub data: Value,
}

impl AckMessage {
    /// Successful acknowledgment carrying an optional response payload.
    pub fn ok(id: impl Into<String>, data: impl Into<Value>) -> Self {
        Self {
            id: id.into(),
            status: AckStatus::Ack,
            data: data.into(),
        }
    }

    /// Failure acknowledgment; `data` describes the error.
    pub fn error(id: impl Into<String>, data: impl Into<Value>) -> Self {
        Self {
            id: id.into(),
            status: AckStatus::Error,
            data: data.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == AckStatus::Ack
    }
}
