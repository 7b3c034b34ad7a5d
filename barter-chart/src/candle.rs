use crate::error::ChartError;
use derive_more::Constructor;
use serde::{Deserialize, Serialize};

/// OHLCV price bar for one timeframe bucket.
///
/// `time` is the bucket open time in unix seconds.
#[derive(Debug, Copy, Clone, PartialEq, Deserialize, Serialize, Constructor)]
pub struct Candle {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Check the candle is finite, non-negative in time & volume, and OHLC consistent.
    pub fn validate(&self) -> Result<(), ChartError> {
        if self.time < 0 {
            return Err(ChartError::InvalidInput(format!(
                "negative candle time: {}",
                self.time
            )));
        }

        let fields = [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
            ("volume", self.volume),
        ];
        if let Some((name, value)) = fields.iter().find(|(_, value)| !value.is_finite()) {
            return Err(ChartError::InvalidInput(format!(
                "non-finite {name} {value} at time {}",
                self.time
            )));
        }

        if self.volume < 0.0 {
            return Err(ChartError::InvalidInput(format!(
                "negative volume {} at time {}",
                self.volume, self.time
            )));
        }

        if self.low > self.open.min(self.close) || self.high < self.open.max(self.close) {
            return Err(ChartError::InvalidInput(format!(
                "inconsistent OHLC at time {}: open {} high {} low {} close {}",
                self.time, self.open, self.high, self.low, self.close
            )));
        }

        Ok(())
    }

    pub fn direction(&self) -> CandleDirection {
        if self.close >= self.open {
            CandleDirection::Up
        } else {
            CandleDirection::Down
        }
    }

    pub fn volume_bar(&self) -> VolumeBar {
        VolumeBar {
            time: self.time,
            value: self.volume,
            direction: self.direction(),
        }
    }
}

/// Whether a candle closed at or above its open.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CandleDirection {
    Up,
    Down,
}

/// Volume histogram bar, coloured by the direction of its candle.
#[derive(Debug, Copy, Clone, PartialEq, Deserialize, Serialize)]
pub struct VolumeBar {
    pub time: i64,
    pub value: f64,
    pub direction: CandleDirection,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candle_validate() {
        struct TestCase {
            input: Candle,
            expected_ok: bool,
        }

        let tests = vec![
            TestCase {
                // TC0: valid bullish candle
                input: Candle::new(60, 10.0, 12.0, 9.0, 11.0, 5.0),
                expected_ok: true,
            },
            TestCase {
                // TC1: valid flat candle w/ zero volume
                input: Candle::new(0, 10.0, 10.0, 10.0, 10.0, 0.0),
                expected_ok: true,
            },
            TestCase {
                // TC2: high below close
                input: Candle::new(60, 10.0, 10.5, 9.0, 11.0, 5.0),
                expected_ok: false,
            },
            TestCase {
                // TC3: low above open
                input: Candle::new(60, 10.0, 12.0, 10.5, 11.0, 5.0),
                expected_ok: false,
            },
            TestCase {
                // TC4: NaN close
                input: Candle::new(60, 10.0, 12.0, 9.0, f64::NAN, 5.0),
                expected_ok: false,
            },
            TestCase {
                // TC5: infinite volume
                input: Candle::new(60, 10.0, 12.0, 9.0, 11.0, f64::INFINITY),
                expected_ok: false,
            },
            TestCase {
                // TC6: negative time
                input: Candle::new(-60, 10.0, 12.0, 9.0, 11.0, 5.0),
                expected_ok: false,
            },
            TestCase {
                // TC7: negative volume
                input: Candle::new(60, 10.0, 12.0, 9.0, 11.0, -1.0),
                expected_ok: false,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = test.input.validate();
            assert_eq!(actual.is_ok(), test.expected_ok, "TC{} failed: {:?}", index, actual);
        }
    }

    #[test]
    fn test_volume_bar_direction() {
        let up = Candle::new(60, 10.0, 12.0, 9.0, 10.0, 3.0).volume_bar();
        assert_eq!(up.direction, CandleDirection::Up);
        assert_eq!(up.value, 3.0);

        let down = Candle::new(120, 10.0, 12.0, 9.0, 9.5, 4.0).volume_bar();
        assert_eq!(down.direction, CandleDirection::Down);
        assert_eq!(down.time, 120);
    }
}
