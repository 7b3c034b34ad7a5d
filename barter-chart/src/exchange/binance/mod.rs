use self::{live::BinanceLive, rest::BinanceRest};
use crate::{feed::FeedConfig, instrument::InstrumentDirectory, session::ChartSources};
use std::sync::Arc;

/// Kline payloads from the REST & WebSocket APIs.
pub mod kline;

/// Live kline stream.
pub mod live;

/// Historical klines.
pub mod rest;

/// Binance spot REST base url.
pub const BASE_URL_BINANCE_REST: &str = "https://api.binance.com";

/// Binance spot WebSocket base url.
pub const BASE_URL_BINANCE_WS: &str = "wss://stream.binance.com:9443/ws";

/// Maximum number of klines returned by a single REST request.
pub const MAX_KLINES_PER_REQUEST: usize = 1_000;

/// Map a dashboard symbol to a Binance spot symbol, eg/ "BTCUSD" -> "BTCUSDT".
pub fn binance_symbol(symbol: &str) -> String {
    let symbol = symbol.trim().to_uppercase();
    if symbol.ends_with("USD") {
        format!("{symbol}T")
    } else {
        symbol
    }
}

/// [`ChartSources`] backed by Binance spot market data.
///
/// The live connection sends keep-alive pings every `feed.ping_interval`.
pub fn binance_sources(
    instruments: Arc<dyn InstrumentDirectory>,
    feed: &FeedConfig,
) -> ChartSources {
    ChartSources {
        history: Arc::new(BinanceRest::default()),
        live: Arc::new(binance_live(feed)),
        instruments,
    }
}

fn binance_live(feed: &FeedConfig) -> BinanceLive {
    BinanceLive::default().with_ping_interval(feed.ping_interval)
}
