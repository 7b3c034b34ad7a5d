use super::{
    BASE_URL_BINANCE_REST, MAX_KLINES_PER_REQUEST, binance_symbol,
    kline::{BinanceRestKline, candles_from_rest_klines},
};
use crate::{
    candle::Candle, error::FetchError, feed::HistoricalSource, instrument::Instrument,
    timeframe::Timeframe,
};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Historical klines from `GET /api/v3/klines`.
#[derive(Debug, Clone)]
pub struct BinanceRest {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl Default for BinanceRest {
    fn default() -> Self {
        Self::new(BASE_URL_BINANCE_REST)
    }
}

impl BinanceRest {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl HistoricalSource for BinanceRest {
    async fn fetch(
        &self,
        instrument: &Instrument,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, FetchError> {
        let symbol = binance_symbol(instrument.as_str());
        let limit = limit.clamp(1, MAX_KLINES_PER_REQUEST);
        let url = format!("{}/api/v3/klines", self.base_url.trim_end_matches('/'));
        let limit_param = limit.to_string();

        debug!(%symbol, %timeframe, limit, "fetching Binance klines");

        let response = self
            .client
            .get(&url)
            .query(&[
                ("symbol", symbol.as_str()),
                ("interval", timeframe.as_str()),
                ("limit", limit_param.as_str()),
            ])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|error| {
                if error.is_timeout() {
                    FetchError::Timeout(self.timeout)
                } else {
                    FetchError::from(error)
                }
            })?;

        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        let klines: Vec<BinanceRestKline> = response
            .json()
            .await
            .map_err(|error| FetchError::Decode(error.to_string()))?;

        candles_from_rest_klines(klines)
    }
}
