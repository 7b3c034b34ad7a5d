use std::time::Duration;
use tokio::time::Instant;

/// Coalesces refetches that arrive within `min_interval` of the previous one.
#[derive(Debug, Clone)]
pub struct RefreshLimiter {
    min_interval: Duration,
    last: Option<Instant>,
}

impl RefreshLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: None,
        }
    }

    /// Returns true and records the attempt if a refetch is allowed now.
    pub fn try_acquire(&mut self) -> bool {
        let now = Instant::now();
        match self.last {
            Some(last) if now.duration_since(last) < self.min_interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }

    /// Record a refetch that was not requested through [`Self::try_acquire`].
    pub fn record(&mut self) {
        self.last = Some(Instant::now());
    }
}
