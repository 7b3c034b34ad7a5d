use crate::{
    candle::{Candle, VolumeBar},
    error::ChartError,
    feed::{
        ConnectionState, FeedConfig, FeedSink, FeedSources, Generation, HistoricalSource,
        HistoryKind, LiveFeedController, LiveSource,
    },
    indicator::{
        IndicatorOutputs, IndicatorSpec,
        engine::{compute_full, extend_incremental},
        validate_specs,
    },
    instrument::{Instrument, InstrumentDirectory},
    store::{CandleStore, MergeResult},
    timeframe::Timeframe,
};
use chrono::{DateTime, Utc};
use itertools::Itertools;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, warn};

/// [`ChartSession`] configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub feed: FeedConfig,
    /// Number of most recent candles published with every update
    pub tail_len: usize,
    /// Maximum candles retained by the store, oldest evicted first
    pub store_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            feed: FeedConfig::default(),
            tail_len: 500,
            store_capacity: 1_000,
        }
    }
}

impl SessionConfig {
    pub fn with_feed(mut self, feed: FeedConfig) -> Self {
        self.feed = feed;
        self
    }

    pub fn with_tail_len(mut self, tail_len: usize) -> Self {
        self.tail_len = tail_len;
        self
    }

    pub fn with_store_capacity(mut self, capacity: usize) -> Self {
        self.store_capacity = capacity;
        self
    }
}

/// External collaborators of a [`ChartSession`].
#[derive(Clone)]
pub struct ChartSources {
    pub history: Arc<dyn HistoricalSource>,
    pub live: Arc<dyn LiveSource>,
    pub instruments: Arc<dyn InstrumentDirectory>,
}

impl ChartSources {
    fn feed(&self) -> FeedSources {
        FeedSources {
            history: Arc::clone(&self.history),
            live: Arc::clone(&self.live),
        }
    }
}

impl std::fmt::Debug for ChartSources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChartSources").finish_non_exhaustive()
    }
}

/// Latest close relative to the first open of the stored series.
#[derive(Debug, Copy, Clone, PartialEq, Deserialize, Serialize)]
pub struct PriceChange {
    pub value: f64,
    pub percentage: f64,
}

impl PriceChange {
    /// `None` if the series is empty or starts at a zero open.
    pub fn from_candles(candles: &[Candle]) -> Option<Self> {
        let (first, last) = (candles.first()?, candles.last()?);
        if first.open == 0.0 {
            return None;
        }
        let value = last.close - first.open;
        Some(Self {
            value,
            percentage: value / first.open * 100.0,
        })
    }
}

/// Everything a renderer needs to redraw, published after every recompute.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartUpdate {
    /// Monotonic per session, including across switches.
    pub sequence: u64,
    pub generation: Generation,
    pub instrument: Instrument,
    pub timeframe: Timeframe,
    pub candles: Vec<Candle>,
    pub volume: Vec<VolumeBar>,
    /// Shared with the session until the next recompute.
    pub indicators: Arc<IndicatorOutputs>,
    pub connection: ConnectionState,
    pub last_price: Option<f64>,
    pub price_change: Option<PriceChange>,
    pub time_updated: DateTime<Utc>,
}

struct SessionState {
    generation: Generation,
    instrument: Instrument,
    timeframe: Timeframe,
    store: CandleStore,
    specs: Vec<IndicatorSpec>,
    outputs: Arc<IndicatorOutputs>,
    connection: ConnectionState,
    sequence: u64,
    closed: bool,
}

impl SessionState {
    fn recompute(&mut self, full: bool) {
        self.outputs = Arc::new(if full {
            compute_full(self.store.candles(), &self.specs)
        } else {
            // Copies the map while the last published update still shares it
            let previous = Arc::unwrap_or_clone(std::mem::take(&mut self.outputs));
            extend_incremental(previous, self.store.candles(), &self.specs)
        });
    }

    fn update(&mut self, tail_len: usize) -> ChartUpdate {
        self.sequence += 1;
        let candles = self.store.tail(tail_len).to_vec();
        ChartUpdate {
            sequence: self.sequence,
            generation: self.generation,
            instrument: self.instrument.clone(),
            timeframe: self.timeframe,
            volume: candles.iter().map(Candle::volume_bar).collect(),
            candles,
            indicators: Arc::clone(&self.outputs),
            connection: self.connection,
            last_price: self.store.last().map(|candle| candle.close),
            price_change: PriceChange::from_candles(self.store.candles()),
            time_updated: Utc::now(),
        }
    }
}

/// Serialized update path shared by the session and its feed.
struct SessionShared {
    state: Mutex<SessionState>,
    updates: watch::Sender<Arc<ChartUpdate>>,
    tail_len: usize,
}

impl SessionShared {
    fn new(mut state: SessionState, tail_len: usize) -> Self {
        let (updates, _) = watch::channel(Arc::new(state.update(tail_len)));
        Self {
            state: Mutex::new(state),
            updates,
            tail_len,
        }
    }

    fn publish(&self, state: &mut SessionState) {
        self.updates.send_replace(Arc::new(state.update(self.tail_len)));
    }

    fn accepts(&self, state: &SessionState, generation: Generation) -> bool {
        if state.closed || state.generation != generation {
            debug!(
                %generation,
                current = %state.generation,
                closed = state.closed,
                "discarding stale feed delivery"
            );
            return false;
        }
        true
    }
}

impl FeedSink for SessionShared {
    fn on_candle(&self, generation: Generation, candle: Candle) {
        let mut state = self.state.lock();
        if !self.accepts(&state, generation) {
            return;
        }

        match state.store.merge(candle) {
            Ok(MergeResult::Ignored) => {}
            Ok(result) => {
                state.recompute(result.requires_full_recompute());
                self.publish(&mut state);
            }
            Err(error) => {
                warn!(instrument = %state.instrument, ?error, "rejected live candle");
            }
        }
    }

    fn on_history(&self, generation: Generation, kind: HistoryKind, candles: Vec<Candle>) {
        let mut state = self.state.lock();
        if !self.accepts(&state, generation) {
            return;
        }

        match kind {
            HistoryKind::Seed => {
                if let Err(error) = state.store.seed(candles) {
                    warn!(instrument = %state.instrument, ?error, "rejected history seed");
                    return;
                }
                info!(
                    instrument = %state.instrument,
                    timeframe = %state.timeframe,
                    candles = state.store.len(),
                    "seeded candle store"
                );
                state.recompute(true);
            }
            HistoryKind::Refresh => {
                let (mut mutated, mut full) = (false, false);
                for candle in candles {
                    match state.store.merge(candle) {
                        Ok(result) => {
                            mutated |= result.is_mutation();
                            full |= result.requires_full_recompute();
                        }
                        Err(error) => {
                            warn!(instrument = %state.instrument, ?error, "rejected refreshed candle");
                        }
                    }
                }
                if !mutated {
                    return;
                }
                state.recompute(full);
            }
        }

        self.publish(&mut state);
    }

    fn on_state(&self, generation: Generation, connection: ConnectionState) {
        let mut state = self.state.lock();
        if !self.accepts(&state, generation) || state.connection == connection {
            return;
        }
        state.connection = connection;
        self.publish(&mut state);
    }
}

/// Owns the candle series, indicator outputs and live feed for one active
/// (instrument, timeframe) selection, publishing a [`ChartUpdate`] after every change.
pub struct ChartSession {
    config: SessionConfig,
    sources: ChartSources,
    shared: Arc<SessionShared>,
    // Locked before `shared.state` whenever both are needed
    controller: Mutex<Option<LiveFeedController>>,
}

impl std::fmt::Debug for ChartSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("ChartSession")
            .field("instrument", &state.instrument)
            .field("timeframe", &state.timeframe)
            .field("generation", &state.generation)
            .field("candles", &state.store.len())
            .field("connection", &state.connection)
            .field("closed", &state.closed)
            .finish()
    }
}

impl ChartSession {
    /// Seed the store, compute initial indicators and start the live feed.
    ///
    /// With no `initial` candles the feed bootstraps the series from the historical source.
    /// Fails if the instrument is unknown or disabled, if any spec is invalid, or if
    /// `initial` is malformed. Must be called from within a Tokio runtime.
    pub async fn open(
        sources: ChartSources,
        config: SessionConfig,
        instrument: Instrument,
        timeframe: Timeframe,
        initial: Vec<Candle>,
        specs: Vec<IndicatorSpec>,
    ) -> Result<Self, ChartError> {
        sources.instruments.validate(&instrument).await?;
        validate_specs(&specs)?;

        let mut store = CandleStore::with_capacity(timeframe, config.store_capacity);
        let bootstrap = initial.is_empty();
        store.seed(initial)?;

        let specs = specs.into_iter().unique().collect::<Vec<_>>();
        let outputs = Arc::new(compute_full(store.candles(), &specs));
        let generation = Generation::default().next();

        info!(
            %instrument,
            %timeframe,
            candles = store.len(),
            indicators = specs.len(),
            "opening ChartSession"
        );

        let shared = Arc::new(SessionShared::new(
            SessionState {
                generation,
                instrument: instrument.clone(),
                timeframe,
                store,
                specs,
                outputs,
                connection: ConnectionState::Disconnected,
                sequence: 0,
                closed: false,
            },
            config.tail_len,
        ));

        let mut controller = LiveFeedController::new(
            instrument,
            timeframe,
            config.feed.clone(),
            sources.feed(),
            Arc::clone(&shared) as Arc<dyn FeedSink>,
        );
        controller.start(generation, bootstrap);

        Ok(Self {
            config,
            sources,
            shared,
            controller: Mutex::new(Some(controller)),
        })
    }

    /// Receiver of the latest [`ChartUpdate`].
    pub fn subscribe(&self) -> watch::Receiver<Arc<ChartUpdate>> {
        self.shared.updates.subscribe()
    }

    /// Stream of [`ChartUpdate`]s, starting with the current one.
    pub fn updates(&self) -> WatchStream<Arc<ChartUpdate>> {
        WatchStream::new(self.subscribe())
    }

    pub fn snapshot(&self) -> Arc<ChartUpdate> {
        Arc::clone(&self.shared.updates.borrow())
    }

    /// Full stored series, not limited to the published tail.
    pub fn candles(&self) -> Vec<Candle> {
        self.shared.state.lock().store.candles().to_vec()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.state.lock().connection
    }

    pub fn instrument(&self) -> Instrument {
        self.shared.state.lock().instrument.clone()
    }

    pub fn timeframe(&self) -> Timeframe {
        self.shared.state.lock().timeframe
    }

    pub fn specs(&self) -> Vec<IndicatorSpec> {
        self.shared.state.lock().specs.clone()
    }

    pub fn generation(&self) -> Generation {
        self.shared.state.lock().generation
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Replace the active indicators and recompute them in full.
    pub fn update_specs(&self, specs: Vec<IndicatorSpec>) -> Result<(), ChartError> {
        validate_specs(&specs)?;

        let mut state = self.shared.state.lock();
        if state.closed {
            return Err(ChartError::SessionClosed);
        }

        state.specs = specs.into_iter().unique().collect();
        state.recompute(true);
        info!(
            instrument = %state.instrument,
            indicators = %state.specs.iter().join(", "),
            "updated indicators"
        );
        self.shared.publish(&mut state);
        Ok(())
    }

    /// Discard the current series and feed, starting fresh ones for `timeframe`.
    pub fn switch_timeframe(&self, timeframe: Timeframe) -> Result<(), ChartError> {
        let instrument = self.instrument();
        self.reopen(instrument, timeframe)
    }

    /// Discard the current series and feed, starting fresh ones for `instrument`.
    pub async fn switch_instrument(&self, instrument: Instrument) -> Result<(), ChartError> {
        if self.is_closed() {
            return Err(ChartError::SessionClosed);
        }
        self.sources.instruments.validate(&instrument).await?;

        let timeframe = self.timeframe();
        self.reopen(instrument, timeframe)
    }

    /// Ask the feed for an immediate history refetch, returning false if it was not queued.
    pub fn refresh(&self) -> Result<bool, ChartError> {
        let controller = self.controller.lock();
        if self.is_closed() {
            return Err(ChartError::SessionClosed);
        }
        Ok(controller
            .as_ref()
            .is_some_and(LiveFeedController::refresh))
    }

    /// Stop the feed and release the session. Idempotent.
    pub fn close(&self) {
        let mut controller = self.controller.lock();
        {
            let mut state = self.shared.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.connection = ConnectionState::Disconnected;
            info!(
                instrument = %state.instrument,
                timeframe = %state.timeframe,
                "closing ChartSession"
            );
            self.shared.publish(&mut state);
        }

        if let Some(mut controller) = controller.take() {
            controller.stop();
        }
    }

    fn reopen(&self, instrument: Instrument, timeframe: Timeframe) -> Result<(), ChartError> {
        let mut controller = self.controller.lock();

        let generation = {
            let mut state = self.shared.state.lock();
            if state.closed {
                return Err(ChartError::SessionClosed);
            }

            state.generation = state.generation.next();
            info!(
                from_instrument = %state.instrument,
                from_timeframe = %state.timeframe,
                to_instrument = %instrument,
                to_timeframe = %timeframe,
                generation = %state.generation,
                "switching ChartSession"
            );

            state.instrument = instrument.clone();
            state.timeframe = timeframe;
            state.store = CandleStore::with_capacity(timeframe, self.config.store_capacity);
            state.recompute(true);
            state.connection = ConnectionState::Disconnected;
            self.shared.publish(&mut state);
            state.generation
        };

        // State lock released: stopping delivers to the sink, which locks it
        if let Some(mut previous) = controller.take() {
            previous.stop();
        }

        let mut next = LiveFeedController::new(
            instrument,
            timeframe,
            self.config.feed.clone(),
            self.sources.feed(),
            Arc::clone(&self.shared) as Arc<dyn FeedSink>,
        );
        next.start(generation, true);
        *controller = Some(next);

        Ok(())
    }
}

impl Drop for ChartSession {
    fn drop(&mut self) {
        self.close();
    }
}
