use super::{
    BandSeries, IndicatorOutputs, IndicatorPoint, IndicatorSeries, IndicatorSpec,
    calc::{self, ema_multiplier, ema_step, push_bands, sma_at},
};
use crate::candle::Candle;

/// Compute every indicator from scratch.
pub fn compute_full(candles: &[Candle], specs: &[IndicatorSpec]) -> IndicatorOutputs {
    specs
        .iter()
        .map(|spec| (*spec, compute_spec(candles, spec)))
        .collect()
}

pub fn compute_spec(candles: &[Candle], spec: &IndicatorSpec) -> IndicatorSeries {
    match spec {
        IndicatorSpec::Sma { period } => IndicatorSeries::Line {
            points: calc::sma(candles, *period),
        },
        IndicatorSpec::Ema { period } => IndicatorSeries::Line {
            points: calc::ema(candles, *period),
        },
        IndicatorSpec::BollingerBands { period, multiplier } => IndicatorSeries::Bands(
            calc::bollinger_bands(candles, *period, multiplier.value()),
        ),
    }
}

/// Extend `previous` to cover `candles`, recomputing only the trailing points whose window
/// touches the newest candles.
///
/// Valid when only the latest candle was refined and/or new candles were appended since
/// `previous` was computed. Any spec whose previous output cannot be lined up with `candles`
/// is recomputed in full, so the result always equals [`compute_full`].
pub fn extend_incremental(
    mut previous: IndicatorOutputs,
    candles: &[Candle],
    specs: &[IndicatorSpec],
) -> IndicatorOutputs {
    specs
        .iter()
        .map(|spec| {
            let series = match previous.swap_remove(spec) {
                Some(series) => extend_spec(series, candles, spec),
                None => compute_spec(candles, spec),
            };
            (*spec, series)
        })
        .collect()
}

fn extend_spec(
    mut series: IndicatorSeries,
    candles: &[Candle],
    spec: &IndicatorSpec,
) -> IndicatorSeries {
    let period = spec.period();

    // Candle index of the previous last point, which may have been provisional
    let start = match series.last_time() {
        Some(last_time) => {
            let start = period - 1 + series.len() - 1;
            match candles.get(start) {
                Some(candle) if candle.time == last_time => start,
                _ => return compute_spec(candles, spec),
            }
        }
        None => return compute_spec(candles, spec),
    };

    series.truncate(series.len() - 1);

    match (spec, &mut series) {
        (IndicatorSpec::Sma { .. }, IndicatorSeries::Line { points }) => {
            points.extend((start..candles.len()).map(|index| IndicatorPoint {
                time: candles[index].time,
                value: sma_at(candles, index, period),
            }));
        }
        (IndicatorSpec::Ema { .. }, IndicatorSeries::Line { points }) => {
            let multiplier = ema_multiplier(period);
            let mut value = match points.last() {
                Some(point) => point.value,
                None => sma_at(candles, period - 1, period),
            };
            for index in start..candles.len() {
                if index >= period {
                    value = ema_step(value, candles[index].close, multiplier);
                }
                points.push(IndicatorPoint {
                    time: candles[index].time,
                    value,
                });
            }
        }
        (IndicatorSpec::BollingerBands { multiplier, .. }, IndicatorSeries::Bands(bands)) => {
            extend_bands(bands, candles, start, period, multiplier.value());
        }
        _ => return compute_spec(candles, spec),
    }

    series
}

fn extend_bands(bands: &mut BandSeries, candles: &[Candle], start: usize, period: usize, k: f64) {
    for index in start..candles.len() {
        push_bands(bands, candles, index, period, k);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicator::StdDevMultiplier;

    fn candle(index: usize, close: f64) -> Candle {
        Candle::new(index as i64 * 60, close, close + 0.5, close - 0.5, close, 1.0)
    }

    fn specs(periods: &[usize]) -> Vec<IndicatorSpec> {
        periods
            .iter()
            .flat_map(|period| {
                [
                    IndicatorSpec::Sma { period: *period },
                    IndicatorSpec::Ema { period: *period },
                    IndicatorSpec::BollingerBands {
                        period: *period,
                        multiplier: StdDevMultiplier::default(),
                    },
                ]
            })
            .collect()
    }

    fn close_at(index: usize) -> f64 {
        100.0 + (index as f64 * 0.37).sin() * 5.0 + index as f64 * 0.11
    }

    #[test]
    fn test_compute_full_sma_alignment() {
        let candles = (0..5).map(|i| candle(i, i as f64 + 1.0)).collect::<Vec<_>>();
        let spec = IndicatorSpec::Sma { period: 3 };
        let outputs = compute_full(&candles, &[spec]);

        let IndicatorSeries::Line { points } = &outputs[&spec] else {
            panic!("expected line series");
        };
        assert_eq!(
            points.iter().map(|p| p.value).collect::<Vec<_>>(),
            vec![2.0, 3.0, 4.0]
        );
        assert_eq!(
            points.iter().map(|p| p.time).collect::<Vec<_>>(),
            vec![candles[2].time, candles[3].time, candles[4].time]
        );
    }

    #[test]
    fn test_series_lengths() {
        let candles = (0..30).map(|i| candle(i, close_at(i))).collect::<Vec<_>>();
        let outputs = compute_full(&candles, &specs(&[1, 5, 30, 31]));

        for (spec, series) in &outputs {
            let expected = (candles.len() + 1).saturating_sub(spec.period());
            assert_eq!(series.len(), expected, "{spec}");
            if let IndicatorSeries::Bands(bands) = series {
                assert_eq!(bands.upper.len(), bands.middle.len());
                assert_eq!(bands.lower.len(), bands.middle.len());
            }
        }
    }

    #[test]
    fn test_incremental_matches_full_when_appending() {
        // Period 50 exceeds the series length for most of the run
        let specs = specs(&[3, 20, 50]);
        let mut candles = Vec::new();
        let mut outputs = compute_full(&candles, &specs);

        for index in 0..60 {
            // Provisional tick, then the refined value for the same bucket
            candles.push(candle(index, close_at(index) - 0.25));
            outputs = extend_incremental(outputs, &candles, &specs);
            assert_eq!(outputs, compute_full(&candles, &specs), "append {index}");

            let last = candles.len() - 1;
            candles[last] = candle(index, close_at(index));
            outputs = extend_incremental(outputs, &candles, &specs);
            assert_eq!(outputs, compute_full(&candles, &specs), "update {index}");
        }
    }

    #[test]
    fn test_incremental_falls_back_when_misaligned() {
        let specs = specs(&[4]);
        let candles = (0..10).map(|i| candle(i, close_at(i))).collect::<Vec<_>>();
        let previous = compute_full(&candles, &specs);

        // Oldest candle evicted, every index shifted
        let shifted = (1..11).map(|i| candle(i, close_at(i))).collect::<Vec<_>>();
        assert_eq!(
            extend_incremental(previous, &shifted, &specs),
            compute_full(&shifted, &specs)
        );
    }

    #[test]
    fn test_incremental_adds_new_specs() {
        let candles = (0..10).map(|i| candle(i, close_at(i))).collect::<Vec<_>>();
        let previous = compute_full(&candles, &specs(&[3]));
        let next = specs(&[3, 5]);

        let actual = extend_incremental(previous, &candles, &next);
        assert_eq!(actual, compute_full(&candles, &next));
        assert_eq!(actual.keys().copied().collect::<Vec<_>>(), next);
    }
}
