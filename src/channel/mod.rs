//! Flow-controlled, acknowledged channel over a duplex port.
//!
//! Provides:
//! - `send_data`: permit-gated sends resolved by the remote acknowledgment
//! - `send_ack`: fire-and-forget acknowledgments, exempt from backpressure
//! - `receive`/`recv`: pull-based access to inbound data, FIFO across consumers
//! - `protocol_errors`: strict-mode protocol violations, for the application to act on
//! - Deterministic close that settles every outstanding operation

mod state;
mod stats;

pub use stats::{ChannelStats, StatsSnapshot};

use futures::stream::{BoxStream, Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_stream::wrappers::BroadcastStream;
use tracing::Instrument;

use crate::config::ChannelOptions;
use crate::error::ChannelError;
use crate::message::{AckMessage, DataMessage, Frame};
use crate::observability::metrics;
use crate::port::{Port, PortSink, Transferable};
use state::Shared;

type Sink<T> = Arc<dyn PortSink<Frame<T>>>;

struct Inner<T: Send + 'static> {
    shared: Arc<Shared<T>>,
    sink: Sink<T>,
}

impl<T: Send + 'static> Drop for Inner<T> {
    fn drop(&mut self) {
        close_channel(&self.shared, &self.sink);
    }
}

fn close_channel<T: Send + 'static>(shared: &Shared<T>, sink: &Sink<T>) {
    sink.close();
    shared.shutdown();
}

/// A flow-controlled channel over one port.
///
/// At most `capacity` data messages are unacknowledged at any time; further
/// sends wait for a permit in FIFO order. Handles are cheap to clone and
/// share the same channel; dropping the last handle closes it.
pub struct BufferedChannel<T: Send + 'static> {
    inner: Arc<Inner<T>>,
}

impl<T: Send + 'static> Clone for BufferedChannel<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> BufferedChannel<T> {
    /// Wrap `port` in a channel allowing `capacity` unacknowledged sends.
    ///
    /// Spawns the inbound dispatcher on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn new<P>(port: P, capacity: usize, options: ChannelOptions) -> Self
    where
        P: Port<Frame<T>>,
    {
        let (sink, incoming) = port.split();
        let sink: Sink<T> = Arc::new(sink);
        let shared = Arc::new(Shared::new(capacity, options));

        let span = tracing::info_span!("channel", name = %shared.name());
        tokio::spawn(dispatch(Arc::clone(&shared), Arc::clone(&sink), incoming).instrument(span));

        tracing::debug!(channel = %shared.name(), capacity = shared.gate.capacity(), "Channel created");

        Self {
            inner: Arc::new(Inner { shared, sink }),
        }
    }

    /// Wrap `port` with capacity 1 and default options.
    pub fn with_defaults<P>(port: P) -> Self
    where
        P: Port<Frame<T>>,
    {
        Self::new(port, 1, ChannelOptions::default())
    }

    fn shared(&self) -> &Arc<Shared<T>> {
        &self.inner.shared
    }

    /// Send a data message and wait for its acknowledgment.
    ///
    /// The pending send is registered before a permit is requested, so an
    /// acknowledgment can never outrun its record. `timeout` (or the channel's
    /// default timeout) bounds the whole operation, permit wait included; a
    /// zero duration disables it.
    ///
    /// Dropping the returned future abandons the send and frees its permit.
    pub async fn send_data(
        &self,
        message: DataMessage<T>,
        transfer: Vec<Transferable>,
        timeout: Option<Duration>,
    ) -> Result<(), ChannelError> {
        let shared = self.shared();
        let id = message.id.clone();

        shared.stats.record_send();
        metrics::record_send(shared.name());
        if shared.options.debug {
            tracing::debug!(channel = %shared.name(), id = %id, "Attempting to acquire a permit for sending");
        }

        let (tx, mut rx) = oneshot::channel();
        let seq = match shared.register(&id, tx) {
            Ok(seq) => seq,
            Err(err) => {
                shared.record_error(&err);
                return Err(err);
            }
        };
        let _abandon = AbandonGuard {
            shared,
            id: &id,
            seq,
        };

        let timeout = timeout
            .or_else(|| shared.options.default_timeout())
            .filter(|t| !t.is_zero());
        let exchange = self.exchange(message, transfer, &id, seq, &mut rx);

        let Some(after) = timeout else {
            return exchange.await;
        };

        let outcome = tokio::time::timeout(after, exchange).await;
        match outcome {
            Ok(result) => result,
            Err(_) => {
                if shared.take_pending(&id, seq).is_none() {
                    // Settled concurrently with the timer; the outcome is on its way.
                    return settled(rx.await.ok());
                }
                let err = ChannelError::Timeout {
                    id: id.clone(),
                    after,
                };
                tracing::error!(channel = %shared.name(), error = %err, "Send operation timed out");
                shared.record_error(&err);
                Err(err)
            }
        }
    }

    /// Acquire a permit, transmit, then wait for the outcome.
    async fn exchange(
        &self,
        message: DataMessage<T>,
        transfer: Vec<Transferable>,
        id: &str,
        seq: u64,
        rx: &mut oneshot::Receiver<Result<(), ChannelError>>,
    ) -> Result<(), ChannelError> {
        let shared = self.shared();

        // Dropping a pending acquire passes on any permit that raced in.
        let permit = tokio::select! {
            biased;
            // Shutdown already failed our record.
            () = shared.shutdown.cancelled() => return settled(rx.await.ok()),
            // Acked or superseded before a permit came free.
            outcome = &mut *rx => return settled(outcome.ok()),
            permit = shared.gate.acquire_owned() => permit,
        };

        if !shared.attach_permit(id, seq, permit) {
            return settled(rx.await.ok());
        }
        if shared.options.debug {
            tracing::debug!(channel = %shared.name(), id, "Permit acquired, transmitting");
        }

        if let Err(source) = self.inner.sink.post_message(Frame::Data(message), transfer) {
            if shared.take_pending(id, seq).is_none() {
                return settled(rx.await.ok());
            }
            let err = ChannelError::Transmit {
                id: id.to_string(),
                source,
            };
            tracing::error!(channel = %shared.name(), error = %err, "Failed to post data message");
            shared.record_error(&err);
            return Err(err);
        }

        settled(rx.await.ok())
    }

    /// Send an acknowledgment without waiting for anything.
    ///
    /// Acknowledgments do not consume permits. A transmission failure is logged
    /// and counted; it is only returned when `throw_on_error` is set.
    pub async fn send_ack(
        &self,
        ack: AckMessage,
        transfer: Vec<Transferable>,
    ) -> Result<(), ChannelError> {
        let shared = self.shared();
        let id = ack.id.clone();

        match self.inner.sink.post_message(Frame::Ack(ack), transfer) {
            Ok(()) => {
                if shared.options.debug {
                    tracing::debug!(channel = %shared.name(), id = %id, "Acknowledgment sent");
                }
                Ok(())
            }
            Err(source) => {
                let err = ChannelError::Transmit { id, source };
                tracing::error!(channel = %shared.name(), error = %err, "Failed to send acknowledgment");
                shared.record_error(&err);
                if shared.options.throw_on_error {
                    Err(err)
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Acknowledge message `id` successfully.
    pub async fn ack(
        &self,
        id: impl Into<String>,
        data: impl Into<serde_json::Value>,
    ) -> Result<(), ChannelError> {
        self.send_ack(AckMessage::ok(id, data), Vec::new()).await
    }

    /// Report failure processing message `id`.
    pub async fn nack(
        &self,
        id: impl Into<String>,
        data: impl Into<serde_json::Value>,
    ) -> Result<(), ChannelError> {
        self.send_ack(AckMessage::error(id, data), Vec::new()).await
    }

    /// Stream of inbound data messages.
    ///
    /// Each call returns an independent consumer; all consumers share one
    /// queue and every message reaches exactly one of them. The stream ends
    /// once the channel is closed and the queue is drained.
    pub fn receive(&self) -> Receive<T> {
        let stream = futures::stream::unfold(Arc::clone(self.shared()), |shared| async move {
            let msg = shared.recv().await?;
            Some((msg, shared))
        });
        Receive {
            inner: stream.boxed(),
        }
    }

    /// Next inbound data message, or `None` once closed and drained.
    pub async fn recv(&self) -> Option<DataMessage<T>> {
        self.shared().recv().await
    }

    /// Stream of protocol violations seen after this call.
    ///
    /// Only populated in strict mode (`throw_on_error`): unknown acknowledgment
    /// ids and unrecognized frames. The channel keeps running; call
    /// [`close`](Self::close) to treat a violation as fatal. The stream ends
    /// when the channel closes.
    pub fn protocol_errors(&self) -> ProtocolErrors {
        let shared = self.shared();
        let name = shared.name().to_string();
        let stream = BroadcastStream::new(shared.violations.subscribe())
            .filter_map(move |item| {
                futures::future::ready(match item {
                    Ok(err) => Some(err),
                    Err(lagged) => {
                        tracing::warn!(channel = %name, error = %lagged, "Protocol error subscriber fell behind");
                        None
                    }
                })
            })
            .take_until(shared.shutdown.clone().cancelled_owned());
        ProtocolErrors {
            inner: stream.boxed(),
        }
    }

    /// Close the channel and its port.
    ///
    /// Pending sends fail with [`ChannelError::Closed`], pending receives end,
    /// and the remote side observes the close. Idempotent.
    pub fn close(&self) {
        close_channel(&self.inner.shared, &self.inner.sink);
    }

    /// Wait until the channel has shut down, locally or remotely.
    pub async fn closed(&self) {
        self.shared().closed().await;
    }

    pub fn is_closed(&self) -> bool {
        self.shared().is_closed()
    }

    pub fn name(&self) -> &str {
        self.shared().name()
    }

    pub fn options(&self) -> &ChannelOptions {
        &self.shared().options
    }

    pub fn capacity(&self) -> usize {
        self.shared().gate.capacity()
    }

    /// Permits not currently held by an outstanding send.
    pub fn available_permits(&self) -> usize {
        self.shared().gate.available()
    }

    /// Number of sends registered and not yet settled.
    pub fn pending_sends(&self) -> usize {
        self.shared().pending_count()
    }

    pub fn stats(&self) -> &ChannelStats {
        &self.shared().stats
    }
}

/// Removes a send's pending record (and so frees its permit) if the
/// `send_data` future is dropped before settling.
struct AbandonGuard<'a, T: Send + 'static> {
    shared: &'a Shared<T>,
    id: &'a str,
    seq: u64,
}

impl<T: Send + 'static> Drop for AbandonGuard<'_, T> {
    fn drop(&mut self) {
        if self.shared.take_pending(self.id, self.seq).is_some() {
            tracing::debug!(channel = %self.shared.name(), id = self.id, "Send abandoned before settling");
        }
    }
}

fn settled(outcome: Option<Result<(), ChannelError>>) -> Result<(), ChannelError> {
    outcome.unwrap_or(Err(ChannelError::Closed))
}

/// Route inbound frames until the port or the channel closes.
async fn dispatch<T: Send + 'static>(
    shared: Arc<Shared<T>>,
    sink: Sink<T>,
    mut incoming: BoxStream<'static, Frame<T>>,
) {
    loop {
        let frame = tokio::select! {
            biased;
            () = shared.shutdown.cancelled() => return,
            frame = incoming.next() => frame,
        };

        let Some(frame) = frame else {
            tracing::debug!("Port closed");
            sink.close();
            shared.shutdown();
            return;
        };

        shared.route(frame);
    }
}

/// Strict-mode protocol violations of a [`BufferedChannel`].
pub struct ProtocolErrors {
    inner: BoxStream<'static, ChannelError>,
}

impl Stream for ProtocolErrors {
    type Item = ChannelError;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

/// Inbound data messages of a [`BufferedChannel`].
pub struct Receive<T> {
    inner: BoxStream<'static, DataMessage<T>>,
}

impl<T> Stream for Receive<T> {
    type Item = DataMessage<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::MessageChannel;

    #[tokio::test]
    async fn test_initial_state() {
        let (port, _remote) = MessageChannel::new().into_ports();
        let channel = BufferedChannel::<String>::new(port, 2, ChannelOptions::named("main"));

        assert_eq!(channel.name(), "main");
        assert_eq!(channel.capacity(), 2);
        assert_eq!(channel.available_permits(), 2);
        assert_eq!(channel.pending_sends(), 0);
        assert_eq!(channel.stats().sent_messages_count(), 0);
        assert_eq!(channel.stats().received_acks_count(), 0);
        assert_eq!(channel.stats().total_latency(), Duration::ZERO);
        assert_eq!(channel.stats().error_count(), 0);
        assert!(!channel.is_closed());
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (port, _remote) = MessageChannel::new().into_ports();
        let channel = BufferedChannel::<u8>::with_defaults(port);
        channel.close();
        channel.close();

        let result = channel.send_data(DataMessage::new("m1", 1), Vec::new(), None).await;
        assert!(matches!(result, Err(ChannelError::Closed)));
        assert_eq!(channel.stats().error_count(), 1);
        channel.closed().await;
        assert_eq!(channel.recv().await, None);
    }

    #[tokio::test]
    async fn test_abandoned_send_frees_permit() {
        let (port, _remote) = MessageChannel::new().into_ports();
        let channel = BufferedChannel::<u8>::with_defaults(port);

        let send = channel.send_data(DataMessage::new("m1", 1), Vec::new(), None);
        // Gives up before any acknowledgment can arrive.
        let result = tokio::time::timeout(Duration::from_millis(10), send).await;
        assert!(result.is_err());

        assert_eq!(channel.pending_sends(), 0);
        assert_eq!(channel.available_permits(), 1);
    }
}
