//! Permit gate: a FIFO counting semaphore.
//!
//! Bounds how many sends a channel may have outstanding. Excess acquirers
//! queue in arrival order and are handed a permit directly by `release()`,
//! so a released permit never goes back to the pool while someone is waiting.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

#[derive(Debug)]
struct GateState {
    available: usize,
    waiters: VecDeque<oneshot::Sender<()>>,
}

/// Counting semaphore with FIFO hand-off.
///
/// Invariant: `available + held == capacity`, and `available` never exceeds
/// `capacity`.
#[derive(Debug)]
pub struct PermitGate {
    capacity: usize,
    name: String,
    state: Mutex<GateState>,
}

impl PermitGate {
    /// Create a gate with `capacity` permits.
    ///
    /// A capacity of zero could never be acquired and is raised to one.
    pub fn new(capacity: usize, name: impl Into<String>) -> Self {
        let name = name.into();
        let capacity = if capacity == 0 {
            tracing::warn!(gate = %name, "Permit gate capacity of 0 raised to 1");
            1
        } else {
            capacity
        };
        tracing::debug!(gate = %name, capacity, "Permit gate initialized");

        Self {
            capacity,
            name,
            state: Mutex::new(GateState {
                available: capacity,
                waiters: VecDeque::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Acquire a permit, waiting in FIFO order if none is available.
    ///
    /// The caller must `release()` exactly once afterwards. If this future is
    /// dropped after a permit was handed to it, the permit is passed on.
    pub async fn acquire(&self) {
        let rx = {
            let mut state = self.state();
            if state.available > 0 {
                state.available -= 1;
                tracing::trace!(gate = %self.name, remaining = state.available, "Permit acquired");
                return;
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            tracing::trace!(gate = %self.name, waiting = state.waiters.len(), "No permits available, queuing");
            rx
        };

        let mut waiter = Waiter {
            gate: self,
            rx,
            granted: false,
        };
        // The sender is only dropped unsent when the gate itself is gone,
        // which cannot happen while it is borrowed here.
        let _ = (&mut waiter.rx).await;
        waiter.granted = true;
        tracing::trace!(gate = %self.name, "Queued acquire granted");
    }

    /// Acquire a permit that is released when the returned guard is dropped.
    pub async fn acquire_owned(self: &Arc<Self>) -> OwnedPermit {
        self.acquire().await;
        OwnedPermit {
            gate: Arc::clone(self),
        }
    }

    /// Release a permit.
    ///
    /// Hands the permit to the earliest live waiter, if any. Otherwise returns
    /// it to the pool; releasing beyond capacity is logged and ignored.
    pub fn release(&self) {
        let mut state = self.state();
        while let Some(waiter) = state.waiters.pop_front() {
            if waiter.send(()).is_ok() {
                tracing::trace!(gate = %self.name, "Permit handed to queued acquire");
                return;
            }
            // Acquirer gave up before being served.
        }

        if state.available < self.capacity {
            state.available += 1;
            tracing::trace!(gate = %self.name, available = state.available, "Permit released");
        } else {
            tracing::warn!(
                gate = %self.name,
                capacity = self.capacity,
                "Attempted to release more permits than the capacity"
            );
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of permits not currently held.
    pub fn available(&self) -> usize {
        self.state().available
    }

    /// Number of queued acquire requests (including abandoned ones not yet skipped).
    pub fn waiting(&self) -> usize {
        self.state().waiters.len()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A queued acquire. Dropping it un-granted returns any permit that raced in.
struct Waiter<'a> {
    gate: &'a PermitGate,
    rx: oneshot::Receiver<()>,
    granted: bool,
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        if self.granted {
            return;
        }
        self.rx.close();
        if self.rx.try_recv().is_ok() {
            self.gate.release();
        }
    }
}

/// A held permit, released exactly once when dropped.
pub struct OwnedPermit {
    gate: Arc<PermitGate>,
}

impl fmt::Debug for OwnedPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnedPermit")
            .field("gate", &self.gate.name)
            .finish()
    }
}

impl Drop for OwnedPermit {
    fn drop(&mut self) {
        self.gate.release();
    }
}
