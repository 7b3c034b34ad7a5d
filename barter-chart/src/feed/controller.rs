use super::{
    ConnectionState, FeedConfig, FeedSink, FeedSources, Generation, HistoryKind, LiveStream,
    machine::{FeedInput, FeedStateMachine},
    refresh::RefreshLimiter,
};
use crate::{
    error::{FetchError, TransportError},
    instrument::Instrument,
    streams::timeout::TimeoutStream,
    timeframe::Timeframe,
};
use futures::StreamExt;
use parking_lot::Mutex;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval, interval_at},
};
use tracing::{debug, info, warn};

/// Best-effort live data for one (instrument, timeframe) pair.
///
/// Pushes every candle, history batch and [`ConnectionState`] change into a [`FeedSink`],
/// tagged with the [`Generation`] passed to [`Self::start`]. At most one worker task (and so
/// one connection and one poll timer) exists per controller.
pub struct LiveFeedController {
    instrument: Instrument,
    timeframe: Timeframe,
    config: FeedConfig,
    sources: FeedSources,
    sink: Arc<dyn FeedSink>,
    shared: Arc<FeedShared>,
    task: Option<FeedTask>,
}

/// State shared between the controller and its worker.
///
/// `active` is locked for the duration of every delivery, so once [`LiveFeedController::stop`]
/// has cleared it no further delivery can reach the sink.
struct FeedShared {
    active: Mutex<Option<Generation>>,
    state_tx: watch::Sender<ConnectionState>,
}

struct FeedTask {
    handle: JoinHandle<()>,
    command_tx: mpsc::UnboundedSender<FeedCommand>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum FeedCommand {
    Refresh,
}

impl std::fmt::Debug for LiveFeedController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveFeedController")
            .field("instrument", &self.instrument)
            .field("timeframe", &self.timeframe)
            .field("state", &self.state())
            .field("generation", &self.generation())
            .finish()
    }
}

impl LiveFeedController {
    pub fn new(
        instrument: Instrument,
        timeframe: Timeframe,
        config: FeedConfig,
        sources: FeedSources,
        sink: Arc<dyn FeedSink>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            instrument,
            timeframe,
            config,
            sources,
            sink,
            shared: Arc::new(FeedShared {
                active: Mutex::new(None),
                state_tx,
            }),
            task: None,
        }
    }

    pub fn instrument(&self) -> &Instrument {
        &self.instrument
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    /// Start (or restart) the feed, tearing down any previous connection and timers first.
    ///
    /// With `bootstrap` the worker fetches `history_limit` candles as [`HistoryKind::Seed`]
    /// before subscribing. Must be called from within a Tokio runtime.
    pub fn start(&mut self, generation: Generation, bootstrap: bool) {
        self.stop();

        let mut machine = FeedStateMachine::new(self.config.max_retries);
        machine.apply(FeedInput::Start);

        {
            let mut active = self.shared.active.lock();
            *active = Some(generation);
            self.shared.state_tx.send_replace(machine.state());
            self.sink.on_state(generation, machine.state());
        }

        info!(
            instrument = %self.instrument,
            timeframe = %self.timeframe,
            %generation,
            bootstrap,
            "LiveFeedController starting"
        );

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let worker = FeedWorker {
            generation,
            instrument: self.instrument.clone(),
            timeframe: self.timeframe,
            refresh: RefreshLimiter::new(self.config.min_refresh_interval),
            config: self.config.clone(),
            sources: self.sources.clone(),
            sink: Arc::clone(&self.sink),
            shared: Arc::clone(&self.shared),
            machine,
            needs_seed: bootstrap,
            commands: command_rx,
        };

        self.task = Some(FeedTask {
            handle: tokio::spawn(worker.run()),
            command_tx,
        });
    }

    /// Stop the feed from any state, releasing the connection and timers.
    ///
    /// On return the state is [`ConnectionState::Disconnected`] and no in-flight operation of
    /// the stopped generation can reach the sink.
    pub fn stop(&mut self) {
        let stopped = {
            let mut active = self.shared.active.lock();
            self.shared
                .state_tx
                .send_replace(ConnectionState::Disconnected);
            active.take()
        };

        if let Some(task) = self.task.take() {
            task.handle.abort();
        }

        if let Some(generation) = stopped {
            info!(
                instrument = %self.instrument,
                timeframe = %self.timeframe,
                %generation,
                "LiveFeedController stopped"
            );
            self.sink
                .on_state(generation, ConnectionState::Disconnected);
        }
    }

    /// Request an immediate historical refetch. Requests within `min_refresh_interval` of the
    /// previous fetch are coalesced. Returns false if the feed is not running.
    pub fn refresh(&self) -> bool {
        self.task
            .as_ref()
            .is_some_and(|task| task.command_tx.send(FeedCommand::Refresh).is_ok())
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Generation of the running feed, if any.
    pub fn generation(&self) -> Option<Generation> {
        *self.shared.active.lock()
    }
}

impl Drop for LiveFeedController {
    fn drop(&mut self) {
        self.stop();
    }
}

struct FeedWorker {
    generation: Generation,
    instrument: Instrument,
    timeframe: Timeframe,
    config: FeedConfig,
    sources: FeedSources,
    sink: Arc<dyn FeedSink>,
    shared: Arc<FeedShared>,
    machine: FeedStateMachine,
    refresh: RefreshLimiter,
    needs_seed: bool,
    commands: mpsc::UnboundedReceiver<FeedCommand>,
}

impl FeedWorker {
    async fn run(mut self) {
        loop {
            match self.machine.state() {
                ConnectionState::Connecting => self.connect().await,
                ConnectionState::Error => self.backoff().await,
                ConnectionState::Polling => self.poll().await,
                ConnectionState::Live | ConnectionState::Disconnected => {
                    debug!(generation = %self.generation, "FeedWorker exiting");
                    return;
                }
            }
        }
    }

    async fn connect(&mut self) {
        if self.needs_seed {
            if let Err(error) = self.fetch(HistoryKind::Seed).await {
                warn!(
                    instrument = %self.instrument,
                    timeframe = %self.timeframe,
                    ?error,
                    "bootstrap history fetch failed"
                );
                self.transition(FeedInput::Failed);
                return;
            }
        }

        match self.open().await {
            Ok(stream) => {
                self.transition(FeedInput::Opened);
                self.stream_live(stream).await;
                self.transition(FeedInput::Disconnected);
            }
            Err(error) => {
                warn!(
                    instrument = %self.instrument,
                    timeframe = %self.timeframe,
                    ?error,
                    retries = self.machine.retries(),
                    "live connection failed"
                );
                self.transition(FeedInput::Failed);
            }
        }
    }

    async fn backoff(&mut self) {
        if !self.machine.exhausted() {
            let delay = self.config.backoff.delay(self.machine.retries());
            info!(
                instrument = %self.instrument,
                attempt = self.machine.retries(),
                delay_ms = delay.as_millis() as u64,
                "reconnecting after backoff"
            );
            self.idle(delay).await;
        } else {
            warn!(
                instrument = %self.instrument,
                retries = self.machine.retries(),
                poll_interval_secs = self.config.poll_interval.as_secs(),
                "reconnect attempts exhausted, falling back to polling"
            );
        }
        self.transition(FeedInput::BackoffElapsed);
    }

    /// Refetch history every `poll_interval` (first tick immediately) and probe the live
    /// connection every `upgrade_interval` until it opens.
    async fn poll(&mut self) {
        let mut poll = interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut upgrade = interval_at(
            Instant::now() + self.config.upgrade_interval,
            self.config.upgrade_interval,
        );
        upgrade.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = poll.tick() => {
                    if let Err(error) = self.fetch(self.history_kind()).await {
                        warn!(instrument = %self.instrument, ?error, "poll history fetch failed");
                    }
                }
                _ = upgrade.tick() => {
                    match self.open().await {
                        Ok(stream) => {
                            info!(instrument = %self.instrument, "upgraded from polling to live");
                            self.transition(FeedInput::Opened);
                            self.stream_live(stream).await;
                            self.transition(FeedInput::Disconnected);
                            return;
                        }
                        Err(error) => {
                            debug!(instrument = %self.instrument, ?error, "upgrade attempt failed");
                            self.transition(FeedInput::Failed);
                        }
                    }
                }
                Some(command) = self.commands.recv() => self.handle_command(command).await,
            }
        }
    }

    async fn open(&self) -> Result<LiveStream, TransportError> {
        let timeout = self.config.connect_timeout;
        match tokio::time::timeout(
            timeout,
            self.sources.live.subscribe(&self.instrument, self.timeframe),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(TransportError::ConnectTimeout(timeout)),
        }
    }

    /// Drive an open live stream until it closes or fails terminally.
    async fn stream_live(&mut self, stream: LiveStream) {
        let mut stream = TimeoutStream::new(stream, self.config.read_timeout);

        loop {
            tokio::select! {
                message = stream.next() => match message {
                    Some(Ok(message)) => self.handle_message(&message),
                    Some(Err(error)) if error.is_terminal() => {
                        warn!(instrument = %self.instrument, ?error, "live connection lost");
                        return;
                    }
                    Some(Err(error)) => {
                        warn!(instrument = %self.instrument, ?error, "non-terminal live stream error");
                    }
                    None => {
                        info!(instrument = %self.instrument, "live stream closed");
                        return;
                    }
                },
                Some(command) = self.commands.recv() => self.handle_command(command).await,
            }
        }
    }

    fn handle_message(&self, message: &str) {
        match self.sources.live.normalise(message) {
            Ok(Some(candle)) => {
                let generation = self.generation;
                self.deliver(|sink| sink.on_candle(generation, candle));
            }
            Ok(None) => {}
            Err(error) => {
                warn!(instrument = %self.instrument, ?error, "dropping malformed live message");
            }
        }
    }

    async fn handle_command(&mut self, command: FeedCommand) {
        match command {
            FeedCommand::Refresh => {
                if !self.refresh.try_acquire() {
                    debug!(instrument = %self.instrument, "coalescing rate-limited refresh");
                    return;
                }
                if let Err(error) = self.fetch(self.history_kind()).await {
                    warn!(instrument = %self.instrument, ?error, "manual refresh failed");
                }
            }
        }
    }

    /// Seed until a bootstrap batch has been delivered, then refresh.
    fn history_kind(&self) -> HistoryKind {
        if self.needs_seed {
            HistoryKind::Seed
        } else {
            HistoryKind::Refresh
        }
    }

    /// Sleep for `duration` while still serving commands.
    async fn idle(&mut self, duration: Duration) {
        let sleep = tokio::time::sleep(duration);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return,
                Some(command) = self.commands.recv() => self.handle_command(command).await,
            }
        }
    }

    async fn fetch(&mut self, kind: HistoryKind) -> Result<(), FetchError> {
        self.refresh.record();

        let timeout = self.config.fetch_timeout;
        let candles = tokio::time::timeout(
            timeout,
            self.sources
                .history
                .fetch(&self.instrument, self.timeframe, self.config.history_limit),
        )
        .await
        .map_err(|_| FetchError::Timeout(timeout))??;

        debug!(
            instrument = %self.instrument,
            timeframe = %self.timeframe,
            ?kind,
            candles = candles.len(),
            "history fetched"
        );

        let generation = self.generation;
        let delivered = self.deliver(|sink| sink.on_history(generation, kind, candles));
        if delivered && kind == HistoryKind::Seed {
            self.needs_seed = false;
        }
        Ok(())
    }

    fn transition(&mut self, input: FeedInput) {
        if let Some(state) = self.machine.apply(input) {
            info!(
                instrument = %self.instrument,
                timeframe = %self.timeframe,
                generation = %self.generation,
                %state,
                "feed state changed"
            );
            let generation = self.generation;
            let state_tx = &self.shared.state_tx;
            self.deliver(|sink| {
                state_tx.send_replace(state);
                sink.on_state(generation, state);
            });
        }
    }

    /// Run `deliver` against the sink only if this worker's generation is still active.
    fn deliver(&self, deliver: impl FnOnce(&dyn FeedSink)) -> bool {
        let active = self.shared.active.lock();
        if *active != Some(self.generation) {
            debug!(
                generation = %self.generation,
                active = ?*active,
                "discarding delivery from superseded feed"
            );
            return false;
        }
        deliver(self.sink.as_ref());
        true
    }
}
