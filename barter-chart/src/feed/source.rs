use crate::{
    candle::Candle,
    error::{ChartError, FetchError, TransportError},
    instrument::Instrument,
    timeframe::Timeframe,
};
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Raw provider messages from a live subscription. The stream ending is the close signal.
pub type LiveStream = BoxStream<'static, Result<String, TransportError>>;

/// Fetches historical candles in ascending time order.
#[async_trait]
pub trait HistoricalSource: Send + Sync {
    async fn fetch(
        &self,
        instrument: &Instrument,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, FetchError>;
}

/// Opens live subscriptions and normalises their messages into [`Candle`]s.
#[async_trait]
pub trait LiveSource: Send + Sync {
    async fn subscribe(
        &self,
        instrument: &Instrument,
        timeframe: Timeframe,
    ) -> Result<LiveStream, TransportError>;

    /// Parse one raw message. `Ok(None)` for messages that carry no candle (eg/ subscription
    /// acks). The default expects a JSON encoded [`Candle`].
    fn normalise(&self, message: &str) -> Result<Option<Candle>, ChartError> {
        serde_json::from_str::<Candle>(message)
            .map(Some)
            .map_err(|error| ChartError::InvalidInput(format!("malformed candle message: {error}")))
    }
}
