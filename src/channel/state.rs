//! Shared channel state and inbound routing.
//!
//! Everything that mutates the pending-send map, the receive queue or the
//! receive waiters lives here, each transition under a single lock.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;

use super::stats::ChannelStats;
use crate::config::ChannelOptions;
use crate::error::ChannelError;
use crate::flow::permit::{OwnedPermit, PermitGate};
use crate::message::{AckMessage, DataMessage, Frame};
use crate::observability::metrics;

pub(crate) type Completion = oneshot::Sender<Result<(), ChannelError>>;

/// Strict-mode violations buffered for slow `protocol_errors()` subscribers.
const VIOLATION_BACKLOG: usize = 64;

/// An outstanding data send.
///
/// Owns the send's permit once acquired, so removing the record from the
/// pending map releases the permit exactly once.
#[derive(Debug)]
pub(crate) struct PendingSend {
    completion: Completion,
    permit: Option<OwnedPermit>,
    started: Instant,
    seq: u64,
}

#[derive(Debug)]
struct State<T> {
    pending: HashMap<String, PendingSend>,
    receive_queue: VecDeque<DataMessage<T>>,
    receive_waiters: VecDeque<oneshot::Sender<DataMessage<T>>>,
    closed: bool,
}

/// Result of asking for the next inbound message.
pub(crate) enum NextMessage<T> {
    Ready(DataMessage<T>),
    Wait(oneshot::Receiver<DataMessage<T>>),
    Ended,
}

/// State shared between channel handles, receive streams and the dispatcher.
#[derive(Debug)]
pub(crate) struct Shared<T> {
    pub(crate) options: ChannelOptions,
    pub(crate) gate: Arc<PermitGate>,
    pub(crate) stats: ChannelStats,
    pub(crate) shutdown: CancellationToken,
    pub(crate) violations: broadcast::Sender<ChannelError>,
    next_seq: AtomicU64,
    state: Mutex<State<T>>,
}

impl<T: Send + 'static> Shared<T> {
    pub(crate) fn new(capacity: usize, options: ChannelOptions) -> Self {
        let (violations, _) = broadcast::channel(VIOLATION_BACKLOG);
        Self {
            gate: Arc::new(PermitGate::new(capacity, options.name.clone())),
            options,
            stats: ChannelStats::default(),
            shutdown: CancellationToken::new(),
            violations,
            next_seq: AtomicU64::new(0),
            state: Mutex::new(State {
                pending: HashMap::new(),
                receive_queue: VecDeque::new(),
                receive_waiters: VecDeque::new(),
                closed: false,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn name(&self) -> &str {
        &self.options.name
    }

    pub(crate) fn record_error(&self, err: &ChannelError) {
        self.stats.record_error();
        metrics::record_error(self.name(), err.kind());
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state().closed
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.state().pending.len()
    }

    /// Register a pending send before its permit is acquired.
    ///
    /// Returns the record's sequence number, used to tell it apart from a
    /// later send that reuses the same id.
    pub(crate) fn register(&self, id: &str, completion: Completion) -> Result<u64, ChannelError> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let replaced = {
            let mut state = self.state();
            if state.closed {
                return Err(ChannelError::Closed);
            }
            state.pending.insert(
                id.to_string(),
                PendingSend {
                    completion,
                    permit: None,
                    started: Instant::now(),
                    seq,
                },
            )
        };

        if let Some(old) = replaced {
            tracing::warn!(channel = %self.name(), id, "Pending send replaced by a send with the same ID");
            let err = ChannelError::Superseded { id: id.to_string() };
            self.record_error(&err);
            let _ = old.completion.send(Err(err));
        }
        Ok(seq)
    }

    /// Hand an acquired permit to its pending record.
    ///
    /// Returns false if the record was settled while the permit was awaited;
    /// the permit is released in that case.
    pub(crate) fn attach_permit(&self, id: &str, seq: u64, permit: OwnedPermit) -> bool {
        let mut state = self.state();
        match state.pending.get_mut(id) {
            Some(record) if record.seq == seq => {
                record.permit = Some(permit);
                true
            }
            _ => false,
        }
    }

    /// Remove the pending record for `id` if it is still the one created as `seq`.
    pub(crate) fn take_pending(&self, id: &str, seq: u64) -> Option<PendingSend> {
        let mut state = self.state();
        match state.pending.get(id) {
            Some(record) if record.seq == seq => state.pending.remove(id),
            _ => None,
        }
    }

    pub(crate) fn next_message(&self) -> NextMessage<T> {
        let mut state = self.state();
        if let Some(msg) = state.receive_queue.pop_front() {
            return NextMessage::Ready(msg);
        }
        if state.closed {
            return NextMessage::Ended;
        }
        let (tx, rx) = oneshot::channel();
        state.receive_waiters.push_back(tx);
        NextMessage::Wait(rx)
    }

    /// Give a data message to the earliest live waiter, else buffer it.
    fn deliver(&self, mut msg: DataMessage<T>, front: bool) {
        let mut state = self.state();
        while let Some(waiter) = state.receive_waiters.pop_front() {
            match waiter.send(msg) {
                Ok(()) => return,
                Err(returned) => msg = returned,
            }
        }
        if front {
            state.receive_queue.push_front(msg);
        } else {
            state.receive_queue.push_back(msg);
        }
    }

    /// Put back a message that was handed to a consumer who went away.
    pub(crate) fn requeue_front(&self, msg: DataMessage<T>) {
        self.deliver(msg, true);
    }

    pub(crate) async fn recv(&self) -> Option<DataMessage<T>> {
        let rx = match self.next_message() {
            NextMessage::Ready(msg) => return Some(msg),
            NextMessage::Ended => return None,
            NextMessage::Wait(rx) => rx,
        };

        let mut waiter = RecvWaiter {
            shared: self,
            rx,
            done: false,
        };
        // A dropped sender means the channel shut down.
        let msg = (&mut waiter.rx).await.ok();
        waiter.done = true;
        msg
    }

    /// Route one inbound frame.
    pub(crate) fn route(&self, frame: Frame<T>) {
        match frame {
            Frame::Ack(ack) => self.route_ack(ack),
            Frame::Data(msg) => {
                if self.options.debug {
                    tracing::debug!(channel = %self.name(), id = %msg.id, "Enqueuing received message");
                }
                self.deliver(msg, false);
            }
            Frame::Unknown => {
                tracing::warn!(channel = %self.name(), "Received frame of unrecognized type");
                self.protocol_violation(ChannelError::UnknownFrame);
            }
        }
    }

    fn route_ack(&self, ack: AckMessage) {
        let record = self.state().pending.remove(&ack.id);

        let Some(record) = record else {
            tracing::warn!(channel = %self.name(), id = %ack.id, "Received acknowledgment for unknown message ID");
            self.protocol_violation(ChannelError::UnknownAck { id: ack.id });
            return;
        };

        let latency = record.started.elapsed();
        let outcome = if ack.is_ok() {
            self.stats.record_ack(latency);
            metrics::record_ack(self.name(), latency.as_secs_f64());
            if self.options.debug {
                tracing::debug!(
                    channel = %self.name(),
                    id = %ack.id,
                    latency_ms = latency.as_secs_f64() * 1000.0,
                    "Acknowledgment received"
                );
            }
            Ok(())
        } else {
            let err = ChannelError::from_remote(ack.id, ack.data);
            tracing::error!(channel = %self.name(), error = %err, "Remote reported failure");
            self.record_error(&err);
            Err(err)
        };

        let PendingSend {
            completion, permit, ..
        } = record;
        let _ = completion.send(outcome);
        drop(permit);
    }

    /// Count a violation and, in strict mode, publish it to subscribers.
    ///
    /// The channel stays open either way; closing is up to the application.
    fn protocol_violation(&self, err: ChannelError) {
        self.record_error(&err);
        if self.options.throw_on_error {
            // No subscribers is fine.
            let _ = self.violations.send(err);
        }
    }

    /// Settle every outstanding operation and mark the channel closed.
    ///
    /// Pending sends fail with `Closed` (releasing their permits), receive
    /// waiters observe end of stream, and permit waiters are woken. Only the
    /// first call has any effect.
    pub(crate) fn shutdown(&self) {
        let (pending, waiters) = {
            let mut state = self.state();
            if state.closed {
                return;
            }
            state.closed = true;
            (
                std::mem::take(&mut state.pending),
                std::mem::take(&mut state.receive_waiters),
            )
        };

        tracing::debug!(
            channel = %self.name(),
            pending_sends = pending.len(),
            receive_waiters = waiters.len(),
            "Channel closing"
        );

        for (_, record) in pending {
            self.record_error(&ChannelError::Closed);
            let _ = record.completion.send(Err(ChannelError::Closed));
        }
        drop(waiters);
        self.shutdown.cancel();
    }

    pub(crate) async fn closed(&self) {
        self.shutdown.cancelled().await;
    }
}

/// A registered receive request. Dropping it after a message was handed over
/// puts the message back at the front of the queue.
struct RecvWaiter<'a, T: Send + 'static> {
    shared: &'a Shared<T>,
    rx: oneshot::Receiver<DataMessage<T>>,
    done: bool,
}

impl<T: Send + 'static> Drop for RecvWaiter<'_, T> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        self.rx.close();
        if let Ok(msg) = self.rx.try_recv() {
            self.shared.requeue_front(msg);
        }
    }
}
