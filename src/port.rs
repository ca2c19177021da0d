//! Duplex message ports.
//!
//! A port is one side of a duplex message-passing primitive. The channel only
//! needs three things from it: post a frame, observe arriving frames in order,
//! and close. [`MessageChannel`] provides an in-memory entangled pair backed
//! by tokio mpsc queues; other transports plug in through [`Port`].

use futures::stream::{BoxStream, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::error::PortError;

/// Outbound half of a port.
pub trait PortSink<F>: Send + Sync + 'static {
    /// Post a frame to the remote side.
    ///
    /// Fails synchronously if the port is closed or the transfer list is invalid;
    /// nothing is posted in that case.
    fn post_message(&self, frame: F, transfer: Vec<Transferable>) -> Result<(), PortError>;

    /// Close the port. No further frames arrive and posts fail afterwards.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// A duplex endpoint that can be split into its outbound sink and inbound stream.
///
/// The inbound stream yields frames in the order the remote side posted them
/// and ends once the port is closed (from either side).
pub trait Port<F>: Send + 'static {
    type Sink: PortSink<F>;

    fn split(self) -> (Self::Sink, BoxStream<'static, F>);
}

/// A resource whose ownership moves with a posted frame.
///
/// Transferring detaches the sender's handle; clones share the same state, so
/// every clone observes the detach.
#[derive(Debug, Clone, Default)]
pub struct Transferable {
    detached: Arc<AtomicBool>,
}

impl Transferable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    fn detach(&self) {
        self.detached.store(true, Ordering::SeqCst);
    }
}

/// Reject transfer lists containing detached or repeated entries.
fn check_transfer_list(transfer: &[Transferable]) -> Result<(), PortError> {
    for (i, item) in transfer.iter().enumerate() {
        if item.is_detached() {
            return Err(PortError::DataClone(format!(
                "transferable at index {i} is already detached"
            )));
        }
        if transfer[..i]
            .iter()
            .any(|earlier| Arc::ptr_eq(&earlier.detached, &item.detached))
        {
            return Err(PortError::DataClone(format!(
                "transferable at index {i} appears more than once in the transfer list"
            )));
        }
    }
    Ok(())
}

/// An in-memory pair of entangled ports.
///
/// Closing either port closes both.
pub struct MessageChannel<F> {
    pub port1: MessagePort<F>,
    pub port2: MessagePort<F>,
}

impl<F: Send + 'static> MessageChannel<F> {
    pub fn new() -> Self {
        let (tx1, rx1) = mpsc::unbounded_channel();
        let (tx2, rx2) = mpsc::unbounded_channel();
        let closed = CancellationToken::new();

        Self {
            port1: MessagePort {
                tx: tx2,
                rx: rx1,
                closed: closed.clone(),
            },
            port2: MessagePort {
                tx: tx1,
                rx: rx2,
                closed,
            },
        }
    }

    pub fn into_ports(self) -> (MessagePort<F>, MessagePort<F>) {
        (self.port1, self.port2)
    }
}

impl<F: Send + 'static> Default for MessageChannel<F> {
    fn default() -> Self {
        Self::new()
    }
}

/// One side of a [`MessageChannel`].
pub struct MessagePort<F> {
    tx: mpsc::UnboundedSender<F>,
    rx: mpsc::UnboundedReceiver<F>,
    closed: CancellationToken,
}

impl<F: Send + 'static> Port<F> for MessagePort<F> {
    type Sink = MessagePortSink<F>;

    fn split(self) -> (Self::Sink, BoxStream<'static, F>) {
        let sink = MessagePortSink {
            tx: self.tx,
            closed: self.closed.clone(),
        };

        // Frames posted before the close are still delivered.
        let frames = UnboundedReceiverStream::new(self.rx);
        let incoming = futures::stream::unfold((frames, self.closed), |(mut frames, closed)| async move {
            let next = tokio::select! {
                biased;
                frame = frames.next() => frame,
                () = closed.cancelled() => frames.as_mut().try_recv().ok(),
            };
            next.map(|frame| (frame, (frames, closed)))
        });

        (sink, incoming.boxed())
    }
}

/// Outbound half of a [`MessagePort`].
pub struct MessagePortSink<F> {
    tx: mpsc::UnboundedSender<F>,
    closed: CancellationToken,
}

impl<F: Send + 'static> PortSink<F> for MessagePortSink<F> {
    fn post_message(&self, frame: F, transfer: Vec<Transferable>) -> Result<(), PortError> {
        if self.closed.is_cancelled() {
            return Err(PortError::Closed);
        }
        check_transfer_list(&transfer)?;
        self.tx.send(frame).map_err(|_| PortError::Closed)?;
        for item in &transfer {
            item.detach();
        }
        Ok(())
    }

    fn close(&self) {
        self.closed.cancel();
    }

    fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}
