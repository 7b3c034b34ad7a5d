use crate::{candle::Candle, error::ChartError, timeframe::Timeframe};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Outcome of a [`CandleStore::merge`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub enum MergeResult {
    /// New latest bucket. `evicted` is true if the oldest candle was dropped to honour capacity.
    Appended { evicted: bool },
    /// Existing bucket overwritten. `out_of_order` is true if it was not the latest bucket.
    Updated { out_of_order: bool },
    /// Missing bucket inside the series back-filled in order.
    Inserted,
    /// Older than the first stored candle, series unchanged.
    Ignored,
}

impl MergeResult {
    /// Whether indicator outputs can no longer be extended from the previous result.
    pub fn requires_full_recompute(&self) -> bool {
        match self {
            MergeResult::Appended { evicted } => *evicted,
            MergeResult::Updated { out_of_order } => *out_of_order,
            MergeResult::Inserted => true,
            MergeResult::Ignored => false,
        }
    }

    pub fn is_mutation(&self) -> bool {
        !matches!(self, MergeResult::Ignored)
    }
}

/// Time-ordered, duplicate-free candle series for one (instrument, timeframe) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct CandleStore {
    timeframe: Timeframe,
    candles: Vec<Candle>,
    capacity: Option<usize>,
}

impl CandleStore {
    pub fn new(timeframe: Timeframe) -> Self {
        Self {
            timeframe,
            candles: Vec::new(),
            capacity: None,
        }
    }

    /// Store retaining at most `capacity` candles, evicting the oldest first.
    pub fn with_capacity(timeframe: Timeframe, capacity: usize) -> Self {
        Self {
            timeframe,
            candles: Vec::with_capacity(capacity.min(4096)),
            capacity: Some(capacity.max(1)),
        }
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    /// Replace the entire series.
    ///
    /// Input must be finite, OHLC consistent, strictly increasing by time, and aligned to the
    /// timeframe. The last candle may be provisional: an unaligned time is snapped to the start
    /// of its bucket, which must still follow the previous candle. On error the store is
    /// unchanged.
    pub fn seed(&mut self, mut candles: Vec<Candle>) -> Result<(), ChartError> {
        for candle in &candles {
            candle.validate()?;
        }

        if let Some(last) = candles.last_mut() {
            last.time = self.timeframe.bucket_start(last.time);
        }

        if let Some((prev, next)) = candles
            .iter()
            .tuple_windows()
            .find(|(prev, next)| next.time <= prev.time)
        {
            return Err(ChartError::InvalidInput(format!(
                "seed candles not strictly increasing: {} followed by {}",
                prev.time, next.time
            )));
        }

        if let Some(candle) = candles
            .iter()
            .find(|candle| !self.timeframe.is_aligned(candle.time))
        {
            return Err(ChartError::InvalidInput(format!(
                "candle time {} not aligned to {}",
                candle.time, self.timeframe
            )));
        }

        if let Some(capacity) = self.capacity {
            if candles.len() > capacity {
                candles.drain(..candles.len() - capacity);
            }
        }

        self.candles = candles;
        Ok(())
    }

    /// Merge one candle into the series, classifying the mutation.
    ///
    /// A candle for the latest or a newer bucket is provisional and has its time snapped to
    /// the bucket start, so every stored time stays aligned. Late candles must already be
    /// aligned.
    pub fn merge(&mut self, mut candle: Candle) -> Result<MergeResult, ChartError> {
        candle.validate()?;

        let bucket = self.timeframe.bucket_start(candle.time);
        let (Some(first), Some(last)) = (
            self.candles.first().map(|stored| stored.time),
            self.candles.last().map(|stored| stored.time),
        ) else {
            candle.time = bucket;
            self.candles.push(candle);
            return Ok(MergeResult::Appended { evicted: false });
        };

        if bucket >= last {
            candle.time = bucket;
        }

        if candle.time > last {
            self.candles.push(candle);
            let evicted = match self.capacity {
                Some(capacity) if self.candles.len() > capacity => {
                    self.candles.remove(0);
                    true
                }
                _ => false,
            };
            return Ok(MergeResult::Appended { evicted });
        }

        if candle.time == last {
            let index = self.candles.len() - 1;
            self.candles[index] = candle;
            return Ok(MergeResult::Updated {
                out_of_order: false,
            });
        }

        if candle.time < first {
            debug!(
                time = candle.time,
                first,
                "ignoring candle older than stored series"
            );
            return Ok(MergeResult::Ignored);
        }

        if !self.timeframe.is_aligned(candle.time) {
            return Err(ChartError::InvalidInput(format!(
                "late candle time {} not aligned to {}",
                candle.time, self.timeframe
            )));
        }

        match self
            .candles
            .binary_search_by_key(&candle.time, |stored| stored.time)
        {
            Ok(index) => {
                self.candles[index] = candle;
                Ok(MergeResult::Updated { out_of_order: true })
            }
            Err(index) => {
                self.candles.insert(index, candle);
                Ok(MergeResult::Inserted)
            }
        }
    }

    /// Last `n` candles in order, or fewer if the series is shorter.
    pub fn tail(&self, n: usize) -> &[Candle] {
        &self.candles[self.candles.len().saturating_sub(n)..]
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn first(&self) -> Option<&Candle> {
        self.candles.first()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    pub fn clear(&mut self) {
        self.candles.clear();
    }
}
