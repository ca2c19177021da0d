//! Channel configuration.
//!
//! Supports:
//! - Programmatic construction with builder-style setters
//! - Deserialization from any serde format (e.g. a JSON options bag)
//! - Sensible defaults for quick start

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default label used in logs and metrics.
pub const DEFAULT_CHANNEL_NAME: &str = "channel";

/// Options recognised by `BufferedChannel`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChannelOptions {
    /// Emit per-message debug logs
    pub debug: bool,

    /// Label for logs and metrics
    pub name: String,

    /// Treat protocol violations and ack transmission failures as errors
    /// instead of logging and counting them
    pub throw_on_error: bool,

    /// Timeout applied to `send_data` calls that do not pass their own
    pub default_timeout_ms: Option<u64>,
}

impl ChannelOptions {
    /// Default options with the given name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_throw_on_error(mut self, throw_on_error: bool) -> Self {
        self.throw_on_error = throw_on_error;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout_ms = timeout.map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// The configured default send timeout, if any.
    ///
    /// A zero value means "no timeout".
    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            debug: false,
            name: DEFAULT_CHANNEL_NAME.into(),
            throw_on_error: false,
            default_timeout_ms: None,
        }
    }
}
