use crate::error::ChartError;
use fnv::FnvBuildHasher;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::{
    fmt::Display,
    hash::{Hash, Hasher},
    str::FromStr,
};

/// Indicator math over candle closes.
pub mod calc;

/// Full & incremental indicator recomputation.
pub mod engine;

/// Indicator outputs keyed by spec, in activation order.
pub type IndicatorOutputs = IndexMap<IndicatorSpec, IndicatorSeries, FnvBuildHasher>;

/// Technical indicator configuration.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IndicatorSpec {
    Sma {
        period: usize,
    },
    Ema {
        period: usize,
    },
    BollingerBands {
        period: usize,
        multiplier: StdDevMultiplier,
    },
}

impl IndicatorSpec {
    pub fn period(&self) -> usize {
        match self {
            IndicatorSpec::Sma { period }
            | IndicatorSpec::Ema { period }
            | IndicatorSpec::BollingerBands { period, .. } => *period,
        }
    }

    pub fn validate(&self) -> Result<(), ChartError> {
        if self.period() == 0 {
            return Err(ChartError::InvalidIndicator(format!(
                "{self}: period must be greater than zero"
            )));
        }
        Ok(())
    }
}

/// Validate every spec, failing on the first invalid one.
pub fn validate_specs(specs: &[IndicatorSpec]) -> Result<(), ChartError> {
    specs.iter().try_for_each(IndicatorSpec::validate)
}

impl Display for IndicatorSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndicatorSpec::Sma { period } => write!(f, "SMA {period}"),
            IndicatorSpec::Ema { period } => write!(f, "EMA {period}"),
            IndicatorSpec::BollingerBands { period, multiplier } => {
                write!(f, "BB {period} {multiplier}")
            }
        }
    }
}

/// Parses `sma:20`, `ema:9` and `bb:20:2` (case insensitive).
impl FromStr for IndicatorSpec {
    type Err = ChartError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ChartError::InvalidIndicator(format!("cannot parse indicator: {s}"));

        let lower = s.trim().to_lowercase();
        let mut parts = lower.split(':');
        let kind = parts.next().ok_or_else(invalid)?;
        let period = parts
            .next()
            .ok_or_else(invalid)?
            .parse::<usize>()
            .map_err(|_| invalid())?;

        let spec = match (kind, parts.next()) {
            ("sma", None) => IndicatorSpec::Sma { period },
            ("ema", None) => IndicatorSpec::Ema { period },
            ("bb", multiplier) => {
                let multiplier = match multiplier {
                    Some(multiplier) => multiplier.parse::<f64>().map_err(|_| invalid())?,
                    None => StdDevMultiplier::DEFAULT,
                };
                IndicatorSpec::BollingerBands {
                    period,
                    multiplier: StdDevMultiplier::try_from(multiplier)?,
                }
            }
            _ => return Err(invalid()),
        };

        if parts.next().is_some() {
            return Err(invalid());
        }

        spec.validate()?;
        Ok(spec)
    }
}

/// Bollinger Bands standard deviation multiplier `k`: finite and non-negative.
#[derive(Debug, Copy, Clone, PartialEq, Deserialize, Serialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct StdDevMultiplier(f64);

impl StdDevMultiplier {
    pub const DEFAULT: f64 = 2.0;

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl Default for StdDevMultiplier {
    fn default() -> Self {
        Self(Self::DEFAULT)
    }
}

impl TryFrom<f64> for StdDevMultiplier {
    type Error = ChartError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        if !value.is_finite() || value < 0.0 {
            return Err(ChartError::InvalidIndicator(format!(
                "standard deviation multiplier must be finite and >= 0, got {value}"
            )));
        }
        // -0.0 == 0.0, keep Hash consistent with Eq
        Ok(Self(if value == 0.0 { 0.0 } else { value }))
    }
}

impl From<StdDevMultiplier> for f64 {
    fn from(value: StdDevMultiplier) -> Self {
        value.0
    }
}

impl Eq for StdDevMultiplier {}

impl Hash for StdDevMultiplier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state)
    }
}

impl Display for StdDevMultiplier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Single indicator value aligned to a candle time.
#[derive(Debug, Copy, Clone, PartialEq, Deserialize, Serialize)]
pub struct IndicatorPoint {
    pub time: i64,
    pub value: f64,
}

/// Three parallel Bollinger Bands sequences of identical length & time alignment.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct BandSeries {
    pub upper: Vec<IndicatorPoint>,
    pub middle: Vec<IndicatorPoint>,
    pub lower: Vec<IndicatorPoint>,
}

/// Output of one indicator, aligned to a suffix of the candle series.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IndicatorSeries {
    Line { points: Vec<IndicatorPoint> },
    Bands(BandSeries),
}

impl IndicatorSeries {
    pub fn len(&self) -> usize {
        match self {
            IndicatorSeries::Line { points } => points.len(),
            IndicatorSeries::Bands(bands) => bands.middle.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn last_time(&self) -> Option<i64> {
        match self {
            IndicatorSeries::Line { points } => points.last(),
            IndicatorSeries::Bands(bands) => bands.middle.last(),
        }
        .map(|point| point.time)
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        match self {
            IndicatorSeries::Line { points } => points.truncate(len),
            IndicatorSeries::Bands(bands) => {
                bands.upper.truncate(len);
                bands.middle.truncate(len);
                bands.lower.truncate(len);
            }
        }
    }
}
