use super::{BASE_URL_BINANCE_WS, binance_symbol, kline::normalise_kline_message};
use crate::{
    candle::Candle,
    error::{ChartError, TransportError},
    feed::{LiveSource, LiveStream},
    instrument::Instrument,
    timeframe::Timeframe,
};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::time::{Instant, interval_at};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info};
use url::Url;

/// Live klines from `<base>/<symbol>@kline_<interval>`.
#[derive(Debug, Clone)]
pub struct BinanceLive {
    base_url: String,
    ping_interval: Duration,
}

impl Default for BinanceLive {
    fn default() -> Self {
        Self::new(BASE_URL_BINANCE_WS)
    }
}

impl BinanceLive {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ping_interval: Duration::from_secs(30),
        }
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn ping_interval(&self) -> Duration {
        self.ping_interval
    }

    /// Stream url for an (instrument, timeframe) pair.
    pub fn url(&self, instrument: &Instrument, timeframe: Timeframe) -> Result<Url, TransportError> {
        let url = format!(
            "{}/{}@kline_{}",
            self.base_url.trim_end_matches('/'),
            binance_symbol(instrument.as_str()).to_lowercase(),
            timeframe.as_str()
        );
        Url::parse(&url).map_err(|error| TransportError::Connect(format!("{url}: {error}")))
    }
}

#[async_trait]
impl LiveSource for BinanceLive {
    async fn subscribe(
        &self,
        instrument: &Instrument,
        timeframe: Timeframe,
    ) -> Result<LiveStream, TransportError> {
        let url = self.url(instrument, timeframe)?;

        let (websocket, _) = connect_async(url.as_str())
            .await
            .map_err(|error| TransportError::Connect(error.to_string()))?;
        info!(%url, "connected to Binance kline stream");

        // Pings keep the connection alive, incoming pings are answered by tungstenite
        let ping = interval_at(Instant::now() + self.ping_interval, self.ping_interval);

        let stream = futures::stream::unfold(
            (websocket, ping),
            |(mut websocket, mut ping)| async move {
                loop {
                    tokio::select! {
                        _ = ping.tick() => {
                            if let Err(error) = websocket.send(Message::Ping(vec![].into())).await {
                                debug!(?error, "failed to send ping, connection likely dead");
                                return Some((Err(TransportError::from(error)), (websocket, ping)));
                            }
                        }
                        message = websocket.next() => match message {
                            Some(Ok(Message::Text(text))) => {
                                return Some((Ok(text.as_str().to_owned()), (websocket, ping)));
                            }
                            Some(Ok(Message::Close(frame))) => {
                                info!(?frame, "Binance closed kline stream");
                                return None;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(error)) => {
                                return Some((Err(TransportError::from(error)), (websocket, ping)));
                            }
                            None => return None,
                        },
                    }
                }
            },
        );

        Ok(stream.boxed())
    }

    fn normalise(&self, message: &str) -> Result<Option<Candle>, ChartError> {
        normalise_kline_message(message)
    }
}
