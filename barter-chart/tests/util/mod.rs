#![allow(dead_code)]

use async_trait::async_trait;
use barter_chart::{
    Candle, ChartSources, ChartUpdate, ConnectionState, Generation, Instrument, Timeframe,
    error::{FetchError, TransportError},
    feed::{FeedSink, HistoricalSource, HistoryKind, LiveSource, LiveStream},
    instrument::StaticInstrumentDirectory,
};
use futures::StreamExt;
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::sync::{Notify, mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Deterministic aligned candles starting at bucket `start_bucket`.
pub fn candles(timeframe: Timeframe, start_bucket: i64, count: usize, base: f64) -> Vec<Candle> {
    (0..count)
        .map(|index| candle(timeframe, start_bucket + index as i64, base + wave(index)))
        .collect()
}

pub fn candle(timeframe: Timeframe, bucket: i64, close: f64) -> Candle {
    Candle::new(
        bucket * timeframe.seconds(),
        close - 0.5,
        close + 1.0,
        close - 1.0,
        close,
        10.0 + close.abs() / 100.0,
    )
}

fn wave(index: usize) -> f64 {
    (index as f64 * 0.7).sin() * 3.0 + index as f64 * 0.05
}

/// In-memory historical source with per-(instrument, timeframe) data & gates.
#[derive(Debug, Default)]
pub struct ScriptedHistory {
    data: Mutex<HashMap<(Instrument, Timeframe), Vec<Candle>>>,
    gates: Mutex<HashMap<(Instrument, Timeframe), Arc<Notify>>>,
    fail: AtomicBool,
    calls: AtomicUsize,
}

impl ScriptedHistory {
    pub fn set(&self, instrument: &str, timeframe: Timeframe, candles: Vec<Candle>) {
        self.data
            .lock()
            .insert((Instrument::from(instrument), timeframe), candles);
    }

    /// Block fetches for the pair until the returned [`Notify`] is notified.
    pub fn gate(&self, instrument: &str, timeframe: Timeframe) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.gates
            .lock()
            .insert((Instrument::from(instrument), timeframe), Arc::clone(&notify));
        notify
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HistoricalSource for ScriptedHistory {
    async fn fetch(
        &self,
        instrument: &Instrument,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(FetchError::Status(503));
        }

        let key = (instrument.clone(), timeframe);
        let gate = self.gates.lock().get(&key).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let candles = self.data.lock().get(&key).cloned().unwrap_or_default();
        let skip = candles.len().saturating_sub(limit);
        Ok(candles.into_iter().skip(skip).collect())
    }
}

/// In-memory live source emitting JSON encoded candles.
#[derive(Debug, Default)]
pub struct ScriptedLive {
    available: AtomicBool,
    hang: AtomicBool,
    connections: AtomicUsize,
    senders: Mutex<Vec<mpsc::UnboundedSender<Result<String, TransportError>>>>,
}

impl ScriptedLive {
    pub fn available() -> Self {
        let live = Self::default();
        live.set_available(true);
        live
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Subscribe attempts never complete.
    pub fn set_hang(&self, hang: bool) {
        self.hang.store(hang, Ordering::SeqCst);
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Send a raw message on the most recent connection.
    pub fn send_raw(&self, message: &str) -> bool {
        self.senders
            .lock()
            .last()
            .is_some_and(|tx| tx.send(Ok(message.to_string())).is_ok())
    }

    pub fn send(&self, candle: Candle) -> bool {
        match serde_json::to_string(&candle) {
            Ok(message) => self.send_raw(&message),
            Err(_) => false,
        }
    }

    pub fn send_error(&self, error: TransportError) -> bool {
        self.senders
            .lock()
            .last()
            .is_some_and(|tx| tx.send(Err(error)).is_ok())
    }

    /// End every open stream.
    pub fn disconnect(&self) {
        self.senders.lock().clear();
    }
}

#[async_trait]
impl LiveSource for ScriptedLive {
    async fn subscribe(
        &self,
        _: &Instrument,
        _: Timeframe,
    ) -> Result<LiveStream, TransportError> {
        self.connections.fetch_add(1, Ordering::SeqCst);
        if self.hang.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(TransportError::Connect("scripted unavailable".to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.lock().push(tx);
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}

/// Everything a [`FeedSink`] received.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    Candle(Generation, Candle),
    History(Generation, HistoryKind, Vec<Candle>),
    State(Generation, ConnectionState),
}

#[derive(Debug)]
pub struct RecordingSink {
    tx: mpsc::UnboundedSender<SinkEvent>,
}

impl RecordingSink {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<SinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl FeedSink for RecordingSink {
    fn on_candle(&self, generation: Generation, candle: Candle) {
        let _ = self.tx.send(SinkEvent::Candle(generation, candle));
    }

    fn on_history(&self, generation: Generation, kind: HistoryKind, candles: Vec<Candle>) {
        let _ = self.tx.send(SinkEvent::History(generation, kind, candles));
    }

    fn on_state(&self, generation: Generation, state: ConnectionState) {
        let _ = self.tx.send(SinkEvent::State(generation, state));
    }
}

pub const WAIT: Duration = Duration::from_secs(3_600);

pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<SinkEvent>) -> SinkEvent {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for sink event")
        .expect("sink dropped")
}

/// Next state change, skipping candle & history events.
pub async fn next_state(rx: &mut mpsc::UnboundedReceiver<SinkEvent>) -> ConnectionState {
    loop {
        if let SinkEvent::State(_, state) = next_event(rx).await {
            return state;
        }
    }
}

/// Wait until the latest update satisfies `predicate`.
pub async fn wait_for_update<F>(
    rx: &mut watch::Receiver<Arc<ChartUpdate>>,
    predicate: F,
) -> Arc<ChartUpdate>
where
    F: Fn(&ChartUpdate) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            let update = Arc::clone(&rx.borrow_and_update());
            if predicate(&update) {
                return update;
            }
            rx.changed().await.expect("session dropped");
        }
    })
    .await
    .expect("timed out waiting for chart update")
}

/// Scripted sources plus a directory enabling BTCUSD & ETHUSD and disabling DOGEUSD.
pub fn sources(history: &Arc<ScriptedHistory>, live: &Arc<ScriptedLive>) -> ChartSources {
    ChartSources {
        history: Arc::clone(history) as Arc<dyn HistoricalSource>,
        live: Arc::clone(live) as Arc<dyn LiveSource>,
        instruments: Arc::new(StaticInstrumentDirectory::new([
            ("BTCUSD", true),
            ("ETHUSD", true),
            ("DOGEUSD", false),
        ])),
    }
}
