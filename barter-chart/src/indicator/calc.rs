//! Indicator formulas over candle closes.
//!
//! Every value is computed from the same window in the same order whether the caller is doing
//! a full pass or extending a previous result, so both paths produce bit-identical output.

use super::{BandSeries, IndicatorPoint};
use crate::candle::Candle;

/// Mean of `close` over the `period` candles ending at `index`.
///
/// Caller guarantees `index + 1 >= period` and `period > 0`.
pub fn sma_at(candles: &[Candle], index: usize, period: usize) -> f64 {
    let window = &candles[index + 1 - period..=index];
    window.iter().map(|candle| candle.close).sum::<f64>() / period as f64
}

/// Bollinger Bands (upper, middle, lower) at `index` using population standard deviation.
pub fn bollinger_at(candles: &[Candle], index: usize, period: usize, k: f64) -> (f64, f64, f64) {
    let middle = sma_at(candles, index, period);
    let window = &candles[index + 1 - period..=index];
    let variance = window
        .iter()
        .map(|candle| (candle.close - middle).powi(2))
        .sum::<f64>()
        / period as f64;
    let deviation = variance.sqrt();

    (middle + k * deviation, middle, middle - k * deviation)
}

/// EMA smoothing factor `2 / (period + 1)`.
pub fn ema_multiplier(period: usize) -> f64 {
    2.0 / (period as f64 + 1.0)
}

pub fn ema_step(previous: f64, close: f64, multiplier: f64) -> f64 {
    (close - previous) * multiplier + previous
}

/// Simple moving average, one point per index `>= period - 1`.
pub fn sma(candles: &[Candle], period: usize) -> Vec<IndicatorPoint> {
    if period == 0 || candles.len() < period {
        return Vec::new();
    }

    (period - 1..candles.len())
        .map(|index| IndicatorPoint {
            time: candles[index].time,
            value: sma_at(candles, index, period),
        })
        .collect()
}

/// Exponential moving average seeded with the SMA of the first `period` candles.
pub fn ema(candles: &[Candle], period: usize) -> Vec<IndicatorPoint> {
    if period == 0 || candles.len() < period {
        return Vec::new();
    }

    let multiplier = ema_multiplier(period);
    let mut points = Vec::with_capacity(candles.len() + 1 - period);
    let mut value = sma_at(candles, period - 1, period);
    points.push(IndicatorPoint {
        time: candles[period - 1].time,
        value,
    });

    for candle in &candles[period..] {
        value = ema_step(value, candle.close, multiplier);
        points.push(IndicatorPoint {
            time: candle.time,
            value,
        });
    }

    points
}

pub fn bollinger_bands(candles: &[Candle], period: usize, k: f64) -> BandSeries {
    let mut bands = BandSeries::default();
    if period == 0 || candles.len() < period {
        return bands;
    }

    for index in period - 1..candles.len() {
        push_bands(&mut bands, candles, index, period, k);
    }

    bands
}

pub(crate) fn push_bands(
    bands: &mut BandSeries,
    candles: &[Candle],
    index: usize,
    period: usize,
    k: f64,
) {
    let time = candles[index].time;
    let (upper, middle, lower) = bollinger_at(candles, index, period, k);
    bands.upper.push(IndicatorPoint { time, value: upper });
    bands.middle.push(IndicatorPoint {
        time,
        value: middle,
    });
    bands.lower.push(IndicatorPoint { time, value: lower });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn closes(closes: &[f64]) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(index, close)| {
                Candle::new(index as i64 * 60, *close, *close, *close, *close, 1.0)
            })
            .collect()
    }

    fn values(points: &[IndicatorPoint]) -> Vec<f64> {
        points.iter().map(|point| point.value).collect()
    }

    #[test]
    fn test_sma() {
        let candles = closes(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let actual = sma(&candles, 3);
        assert_eq!(values(&actual), vec![2.0, 3.0, 4.0]);
        assert_eq!(
            actual.iter().map(|point| point.time).collect::<Vec<_>>(),
            vec![120, 180, 240]
        );
    }

    #[test]
    fn test_ema() {
        struct TestCase {
            input: Vec<f64>,
            period: usize,
            expected: Vec<f64>,
        }

        let tests = vec![
            TestCase {
                // TC0: seed is SMA(2) of [2, 4], multiplier 2/3
                input: vec![2.0, 4.0, 6.0, 8.0, 12.0],
                period: 2,
                expected: vec![3.0, 5.0, 7.0, 31.0 / 3.0],
            },
            TestCase {
                // TC1: period 1 tracks closes exactly
                input: vec![5.0, 7.0, 9.0],
                period: 1,
                expected: vec![5.0, 7.0, 9.0],
            },
            TestCase {
                // TC2: series shorter than period
                input: vec![1.0, 2.0],
                period: 3,
                expected: vec![],
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = values(&ema(&closes(&test.input), test.period));
            assert_eq!(actual.len(), test.expected.len(), "TC{} length", index);
            for (actual, expected) in actual.iter().zip(&test.expected) {
                assert!(
                    (actual - expected).abs() < 1e-12,
                    "TC{} failed: {} != {}",
                    index,
                    actual,
                    expected
                );
            }
        }
    }

    #[test]
    fn test_bollinger_bands_population_variance() {
        let bands = bollinger_bands(&closes(&[2.0, 4.0]), 2, 2.0);
        assert_eq!(values(&bands.middle), vec![3.0]);
        assert_eq!(values(&bands.upper), vec![5.0]);
        assert_eq!(values(&bands.lower), vec![1.0]);
    }

    #[test]
    fn test_short_series_yields_empty_output() {
        let candles = closes(&[1.0, 2.0]);
        assert!(sma(&candles, 3).is_empty());
        assert!(bollinger_bands(&candles, 3, 2.0).middle.is_empty());
    }
}
