//! # Barter-Chart
//! Live candle series & technical indicator engine.
//!
//! A [`ChartSession`](session::ChartSession) seeds a [`CandleStore`](store::CandleStore) from
//! historical candles, keeps it up to date from a self-healing
//! [`LiveFeedController`](feed::LiveFeedController), and recomputes SMA, EMA & Bollinger Bands
//! incrementally on every tick. Each change is published as a
//! [`ChartUpdate`](session::ChartUpdate) for a renderer to redraw from.
//!
//! ## Feed
//! The feed is an explicit state machine over [`ConnectionState`](feed::ConnectionState):
//! * Streams candles from a [`LiveSource`](feed::LiveSource) while `Live`.
//! * Reconnects with exponential backoff after failures.
//! * Falls back to polling a [`HistoricalSource`](feed::HistoricalSource) once retries are
//!   exhausted, periodically probing the live connection to upgrade back.
//!
//! Every delivery is tagged with a session [`Generation`](feed::Generation), so nothing from a
//! closed or switched-away session ever reaches the current candle series.
//!
//! ## Examples
//! See `barter-chart/examples/live_chart.rs` for a Binance backed session.

/// All [`Error`](std::error::Error)s generated in Barter-Chart.
pub mod error;

/// OHLCV [`Candle`](candle::Candle) & volume bars.
pub mod candle;

/// Candle bucket durations.
pub mod timeframe;

/// Instrument identifiers & metadata directory.
pub mod instrument;

/// Ordered, duplicate-free candle series with classified merges.
pub mod store;

/// SMA, EMA & Bollinger Bands over a candle series.
pub mod indicator;

/// Live data connection state machine, reconnect & polling fallback.
pub mod feed;

/// Stream adaptors for live market data.
pub mod streams;

/// Exchange specific historical & live sources.
pub mod exchange;

/// Composition of store, indicators & feed for one chart selection.
pub mod session;

pub use candle::Candle;
pub use error::ChartError;
pub use feed::{ConnectionState, Generation};
pub use indicator::IndicatorSpec;
pub use instrument::Instrument;
pub use session::{ChartSession, ChartSources, ChartUpdate, SessionConfig};
pub use store::{CandleStore, MergeResult};
pub use timeframe::Timeframe;

