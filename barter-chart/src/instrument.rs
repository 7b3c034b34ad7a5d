use crate::error::{ChartError, FetchError};
use async_trait::async_trait;
use derive_more::Display;
use fnv::FnvHashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Upper-cased instrument identifier, eg/ "BTCUSD".
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Display, Deserialize, Serialize)]
pub struct Instrument(SmolStr);

impl Instrument {
    pub fn new<S: AsRef<str>>(symbol: S) -> Self {
        Self(SmolStr::new(symbol.as_ref().trim().to_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for Instrument {
    fn from(symbol: &str) -> Self {
        Self::new(symbol)
    }
}

impl From<String> for Instrument {
    fn from(symbol: String) -> Self {
        Self::new(symbol)
    }
}

/// Instrument metadata entry.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct InstrumentInfo {
    pub instrument: Instrument,
    pub enabled: bool,
}

/// Source of valid instrument identifiers and their enabled status.
#[async_trait]
pub trait InstrumentDirectory: Send + Sync {
    async fn instruments(&self) -> Result<Vec<InstrumentInfo>, FetchError>;

    /// Fails with [`ChartError::UnknownInstrument`] if the instrument is missing or disabled.
    async fn validate(&self, instrument: &Instrument) -> Result<(), ChartError> {
        let instruments = self.instruments().await?;
        match instruments
            .iter()
            .find(|info| &info.instrument == instrument)
        {
            Some(info) if info.enabled => Ok(()),
            _ => Err(ChartError::UnknownInstrument(instrument.clone())),
        }
    }
}

/// In-memory [`InstrumentDirectory`] that can be toggled at runtime.
#[derive(Debug, Default)]
pub struct StaticInstrumentDirectory {
    instruments: RwLock<FnvHashMap<Instrument, bool>>,
}

impl StaticInstrumentDirectory {
    pub fn new<Iter, S>(instruments: Iter) -> Self
    where
        Iter: IntoIterator<Item = (S, bool)>,
        S: AsRef<str>,
    {
        Self {
            instruments: RwLock::new(
                instruments
                    .into_iter()
                    .map(|(symbol, enabled)| (Instrument::new(symbol), enabled))
                    .collect(),
            ),
        }
    }

    pub fn insert(&self, instrument: Instrument, enabled: bool) {
        self.instruments.write().insert(instrument, enabled);
    }

    /// Returns false if the instrument is unknown.
    pub fn set_enabled(&self, instrument: &Instrument, enabled: bool) -> bool {
        match self.instruments.write().get_mut(instrument) {
            Some(current) => {
                *current = enabled;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl InstrumentDirectory for StaticInstrumentDirectory {
    async fn instruments(&self) -> Result<Vec<InstrumentInfo>, FetchError> {
        let mut instruments = self
            .instruments
            .read()
            .iter()
            .map(|(instrument, enabled)| InstrumentInfo {
                instrument: instrument.clone(),
                enabled: *enabled,
            })
            .collect::<Vec<_>>();
        instruments.sort_by(|a, b| a.instrument.cmp(&b.instrument));
        Ok(instruments)
    }
}
