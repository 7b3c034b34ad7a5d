//! Live feed for one (instrument, timeframe) pair: WebSocket subscription with reconnect
//! backoff, falling back to polling historical candles when streaming is unavailable.

use crate::candle::Candle;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::{fmt::Display, sync::Arc, time::Duration};

/// [`LiveFeedController`](controller::LiveFeedController) and its connection worker.
pub mod controller;

/// Explicit [`ConnectionState`] transitions.
pub mod machine;

/// Manual refresh rate limiting.
pub mod refresh;

/// Historical & live data source interfaces.
pub mod source;

pub use controller::LiveFeedController;
pub use source::{HistoricalSource, LiveSource, LiveStream};

/// Connection status of a [`LiveFeedController`].
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Live,
    Polling,
    Error,
}

impl Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                ConnectionState::Disconnected => "disconnected",
                ConnectionState::Connecting => "connecting",
                ConnectionState::Live => "live",
                ConnectionState::Polling => "polling",
                ConnectionState::Error => "error",
            }
        )
    }
}

/// Session generation tag. Deliveries carrying a superseded generation are discarded.
#[derive(
    Debug, Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize,
)]
pub struct Generation(pub u64);

impl Generation {
    pub fn next(&self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl Display for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Exponential reconnect backoff with random jitter.
#[derive(Debug, Copy, Clone, PartialEq, Deserialize, Serialize)]
pub struct ReconnectionBackoffPolicy {
    pub backoff_ms_initial: u64,
    pub backoff_multiplier: u32,
    pub backoff_ms_max: u64,
    /// Fraction of the base delay added as uniform random jitter, eg/ 0.25.
    pub jitter_ratio: f64,
}

impl Default for ReconnectionBackoffPolicy {
    fn default() -> Self {
        Self {
            backoff_ms_initial: 1_000,
            backoff_multiplier: 2,
            backoff_ms_max: 30_000,
            jitter_ratio: 0.25,
        }
    }
}

impl ReconnectionBackoffPolicy {
    /// Delay before reconnect attempt number `attempt` (1 based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_ms(attempt);
        let jitter_ms = if self.jitter_ratio > 0.0 {
            let max_jitter = (base_ms as f64 * self.jitter_ratio).round() as u64;
            rand::rng().random_range(0..=max_jitter)
        } else {
            0
        };
        Duration::from_millis(base_ms.saturating_add(jitter_ms))
    }

    fn base_ms(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1).min(32);
        u64::from(self.backoff_multiplier)
            .checked_pow(exponent)
            .and_then(|factor| self.backoff_ms_initial.checked_mul(factor))
            .unwrap_or(u64::MAX)
            .min(self.backoff_ms_max)
    }
}

/// [`LiveFeedController`] configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedConfig {
    /// Timeout for opening the live connection
    pub connect_timeout: Duration,
    /// Live stream is considered dead after this long without a message
    pub read_timeout: Duration,
    /// Keep-alive ping interval on the live connection
    pub ping_interval: Duration,
    /// Timeout for a single historical fetch
    pub fetch_timeout: Duration,
    pub backoff: ReconnectionBackoffPolicy,
    /// Failed attempts tolerated before falling back to polling
    pub max_retries: u32,
    /// Historical refetch interval while polling
    pub poll_interval: Duration,
    /// Interval between attempts to upgrade from polling back to live
    pub upgrade_interval: Duration,
    /// Number of candles requested per historical fetch
    pub history_limit: usize,
    /// Minimum spacing between manual refreshes
    pub min_refresh_interval: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(120),
            ping_interval: Duration::from_secs(30),
            fetch_timeout: Duration::from_secs(10),
            backoff: ReconnectionBackoffPolicy::default(),
            max_retries: 5,
            poll_interval: Duration::from_secs(30),
            upgrade_interval: Duration::from_secs(30),
            history_limit: 500,
            min_refresh_interval: Duration::from_secs(5),
        }
    }
}

impl FeedConfig {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, backoff: ReconnectionBackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the poll interval, also used as the upgrade interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self.upgrade_interval = interval;
        self
    }

    pub fn with_upgrade_interval(mut self, interval: Duration) -> Self {
        self.upgrade_interval = interval;
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }
}

/// Why a batch of historical candles was fetched.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub enum HistoryKind {
    /// Replaces the series (session opened or switched w/o initial candles).
    Seed,
    /// Merged into the existing series (poll tick or manual refresh).
    Refresh,
}

/// Receiver of everything a [`LiveFeedController`] produces.
///
/// Each call carries the [`Generation`] the controller was started with so the receiver can
/// discard deliveries from a superseded feed.
pub trait FeedSink: Send + Sync + 'static {
    fn on_candle(&self, generation: Generation, candle: Candle);

    fn on_history(&self, generation: Generation, kind: HistoryKind, candles: Vec<Candle>);

    fn on_state(&self, generation: Generation, state: ConnectionState);
}

/// Data sources used by a [`LiveFeedController`].
#[derive(Clone)]
pub struct FeedSources {
    pub history: Arc<dyn HistoricalSource>,
    pub live: Arc<dyn LiveSource>,
}

impl std::fmt::Debug for FeedSources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedSources").finish_non_exhaustive()
    }
}
