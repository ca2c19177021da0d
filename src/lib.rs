//! Weir: a flow-controlled, acknowledged message channel over duplex ports.
//!
//! Weir bounds the number of messages in flight between two parties (for example
//! a coordinator and a worker). Every data frame holds a permit until the remote
//! side acknowledges it, times out, or the channel closes.
//!
//! # Architecture
//!
//! - **Permit Gate**: FIFO counting semaphore bounding outstanding sends
//! - **Buffered Channel**: correlates acks to sends by id, queues inbound data
//! - **Ports**: pluggable duplex transport, with an in-memory entangled pair
//! - **Observable**: structured tracing and OpenTelemetry metrics
//!
//! # Modules
//!
//! - [`channel`]: `BufferedChannel`, its dispatcher and statistics
//! - [`config`]: channel options
//! - [`error`]: channel and port error types
//! - [`flow`]: permit gate
//! - [`message`]: data/ack frame types
//! - [`observability`]: metrics and tracing setup
//! - [`port`]: duplex port traits and the in-memory `MessageChannel`
//!
//! # Example
//!
//! ```
//! use weir::{AckMessage, BufferedChannel, ChannelOptions, DataMessage, MessageChannel};
//! use futures::StreamExt;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), weir::ChannelError> {
//! let (main_port, worker_port) = MessageChannel::new().into_ports();
//! let main = BufferedChannel::new(main_port, 2, ChannelOptions::named("main"));
//! let worker = BufferedChannel::<String>::new(worker_port, 2, ChannelOptions::named("worker"));
//!
//! let responder = tokio::spawn(async move {
//!     let mut incoming = worker.receive();
//!     if let Some(msg) = incoming.next().await {
//!         worker.send_ack(AckMessage::ok(msg.id, "done"), Vec::new()).await.unwrap();
//!     }
//! });
//!
//! main.send_data(DataMessage::new("msg-1", "hello".to_string()), Vec::new(), None).await?;
//! responder.await.unwrap();
//! assert_eq!(main.stats().received_acks_count(), 1);
//! # Ok(())
//! # }
//! ```

// Lint configuration
#![warn(clippy::all)]
#![allow(
    clippy::module_name_repetitions, // channel::ChannelStats is fine
    clippy::must_use_candidate,      // Not all functions need #[must_use]
    clippy::missing_errors_doc,      // Error docs can be verbose
    clippy::missing_panics_doc       // Panic docs can be verbose
)]

pub mod channel;
pub mod config;
pub mod error;
pub mod flow;
pub mod message;
pub mod observability;
pub mod port;

pub use channel::{BufferedChannel, ChannelStats, ProtocolErrors, Receive, StatsSnapshot};
pub use config::ChannelOptions;
pub use error::{ChannelError, PortError};
pub use flow::permit::{OwnedPermit, PermitGate};
pub use message::{AckMessage, AckStatus, DataMessage, Frame};
pub use port::{MessageChannel, MessagePort, Port, PortSink, Transferable};

use uuid::Uuid;

/// Generate a new UUIDv7 (time-sortable) message ID.
///
/// Message ids must be unique among a channel's outstanding sends; UUIDv7 gives
/// that for free and keeps ids ordered by creation time in logs.
///
/// # Example
///
/// ```
/// let id = weir::generate_message_id();
/// assert!(id.len() == 36); // UUID string format
/// ```
#[must_use]
pub fn generate_message_id() -> String {
    Uuid::now_v7().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_ids_are_unique() {
        let a = generate_message_id();
        let b = generate_message_id();
        assert_ne!(a, b);
        assert!(Uuid::parse_str(&a).is_ok());
    }
}
