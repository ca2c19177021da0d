//! Per-channel counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counters for one channel.
///
/// Uses atomics so the dispatcher and any number of senders can update them
/// without taking the channel lock.
#[derive(Debug, Default)]
pub struct ChannelStats {
    sent_messages: AtomicU64,
    received_acks: AtomicU64,
    total_latency_micros: AtomicU64,
    errors: AtomicU64,
}

impl ChannelStats {
    pub(crate) fn record_send(&self) {
        self.sent_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_ack(&self, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.total_latency_micros
            .fetch_add(micros, Ordering::Relaxed);
        self.received_acks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of `send_data` calls.
    pub fn sent_messages_count(&self) -> u64 {
        self.sent_messages.load(Ordering::Relaxed)
    }

    /// Number of successful acknowledgments received for our sends.
    pub fn received_acks_count(&self) -> u64 {
        self.received_acks.load(Ordering::Relaxed)
    }

    /// Cumulative send-to-ack latency over all successful acknowledgments.
    pub fn total_latency(&self) -> Duration {
        Duration::from_micros(self.total_latency_micros.load(Ordering::Relaxed))
    }

    /// Mean send-to-ack latency, or `None` before the first acknowledgment.
    pub fn average_latency(&self) -> Option<Duration> {
        let acks = self.received_acks_count();
        if acks == 0 {
            return None;
        }
        let acks = u32::try_from(acks).unwrap_or(u32::MAX);
        Some(self.total_latency() / acks)
    }

    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            sent_messages: self.sent_messages_count(),
            received_acks: self.received_acks_count(),
            total_latency_ms: self.total_latency().as_secs_f64() * 1000.0,
            average_latency_ms: self.average_latency().map(|d| d.as_secs_f64() * 1000.0),
            errors: self.error_count(),
        }
    }
}

/// Point-in-time copy of [`ChannelStats`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub sent_messages: u64,
    pub received_acks: u64,
    pub total_latency_ms: f64,
    pub average_latency_ms: Option<f64>,
    pub errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_empty() {
        let stats = ChannelStats::default();
        assert_eq!(stats.sent_messages_count(), 0);
        assert_eq!(stats.received_acks_count(), 0);
        assert_eq!(stats.total_latency(), Duration::ZERO);
        assert_eq!(stats.average_latency(), None);
        assert_eq!(stats.error_count(), 0);
    }

    #[test]
    fn test_average_latency() {
        let stats = ChannelStats::default();
        stats.record_send();
        stats.record_send();
        stats.record_ack(Duration::from_millis(10));
        stats.record_ack(Duration::from_millis(30));

        assert_eq!(stats.total_latency(), Duration::from_millis(40));
        assert_eq!(stats.average_latency(), Some(Duration::from_millis(20)));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.sent_messages, 2);
        assert_eq!(snapshot.received_acks, 2);
        assert!((snapshot.total_latency_ms - 40.0).abs() < 1e-6);
    }
}
