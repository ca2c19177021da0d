//! Test utilities for Weir integration tests.
//!
//! Provides:
//! - A connected main/worker channel pair over an in-memory port
//! - A raw peer for injecting hand-crafted frames
//! - Polling helper for eventually-true conditions

#![allow(dead_code)]

use futures::stream::BoxStream;
use weir::port::MessagePortSink;
use weir::{BufferedChannel, ChannelOptions, DataMessage, Frame, MessageChannel, Port};

/// Payload type used across the tests.
pub type Payload = String;

/// Two channels connected back to back, as a coordinator and a worker would be.
pub struct ChannelPair {
    pub main: BufferedChannel<Payload>,
    pub worker: BufferedChannel<Payload>,
}

impl ChannelPair {
    /// Create a pair where both sides allow `capacity` outstanding sends.
    pub fn new(capacity: usize) -> Self {
        weir::observability::tracing::init_test_tracing();
        let (main_port, worker_port) = MessageChannel::new().into_ports();
        Self {
            main: BufferedChannel::new(main_port, capacity, ChannelOptions::named("main")),
            worker: BufferedChannel::new(worker_port, capacity, ChannelOptions::named("worker")),
        }
    }
}

/// A channel whose remote side is driven by hand, frame by frame.
pub struct RawPeer {
    pub channel: BufferedChannel<Payload>,
    pub sink: MessagePortSink<Frame<Payload>>,
    pub incoming: BoxStream<'static, Frame<Payload>>,
}

impl RawPeer {
    pub fn new(capacity: usize, options: ChannelOptions) -> Self {
        weir::observability::tracing::init_test_tracing();
        let (port, remote) = MessageChannel::new().into_ports();
        let (sink, incoming) = remote.split();
        Self {
            channel: BufferedChannel::new(port, capacity, options),
            sink,
            incoming,
        }
    }
}

/// Build a data message with the given id and payload.
pub fn data(id: &str, payload: &str) -> DataMessage<Payload> {
    DataMessage::new(id, payload.to_string())
}

/// Wait for a condition to become true with timeout.
///
/// # Arguments
///
/// * `timeout` - Maximum time to wait
/// * `condition` - Closure that returns true when condition is met
///
/// # Returns
///
/// `true` if condition was met, `false` if timeout expired
pub async fn wait_for<F>(timeout: std::time::Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    false
}
