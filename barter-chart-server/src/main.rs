use barter_chart::{
    Candle, ChartSession, ChartUpdate, ConnectionState, IndicatorSpec, Instrument, SessionConfig,
    Timeframe,
    candle::VolumeBar,
    error::ChartError,
    exchange::binance::binance_sources,
    feed::FeedConfig,
    indicator::IndicatorSeries,
    instrument::StaticInstrumentDirectory,
    session::PriceChange,
};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, str::FromStr, sync::Arc, time::Duration};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{broadcast, mpsc},
};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Chart update wrapper for JSON serialization
#[derive(Debug, Clone, Serialize)]
struct ChartUpdateMessage {
    sequence: u64,
    generation: u64,
    instrument: String,
    timeframe: Timeframe,
    connection: ConnectionState,
    candles: Vec<Candle>,
    volume: Vec<VolumeBar>,
    indicators: Vec<IndicatorMessage>,
    last_price: Option<f64>,
    price_change: Option<PriceChange>,
    time_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
struct IndicatorMessage {
    spec: IndicatorSpec,
    label: String,
    series: IndicatorSeries,
}

impl From<&ChartUpdate> for ChartUpdateMessage {
    fn from(update: &ChartUpdate) -> Self {
        Self {
            sequence: update.sequence,
            generation: update.generation.0,
            instrument: update.instrument.to_string(),
            timeframe: update.timeframe,
            connection: update.connection,
            candles: update.candles.clone(),
            volume: update.volume.clone(),
            indicators: update
                .indicators
                .iter()
                .map(|(spec, series)| IndicatorMessage {
                    spec: *spec,
                    label: spec.to_string(),
                    series: series.clone(),
                })
                .collect(),
            last_price: update.last_price,
            price_change: update.price_change,
            time_updated: update.time_updated,
        }
    }
}

/// Messages sent to a connected client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    Welcome {
        message: String,
        timestamp: DateTime<Utc>,
    },
    Update(ChartUpdateMessage),
    Error {
        message: String,
    },
}

/// Commands a client may send to change the shared chart selection
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
enum ClientCommand {
    Timeframe(Timeframe),
    Instrument(String),
    Indicators(String),
    Refresh,
}

#[tokio::main]
async fn main() {
    // Initialize logging
    init_logging();

    info!("Starting barter-chart WebSocket server");

    // Configurable buffer size via CHART_BUFFER_SIZE env var (default: 1,024)
    let buffer_size = env_or("CHART_BUFFER_SIZE", 1_024_usize);
    info!("WebSocket broadcast buffer size: {}", buffer_size);
    let (tx, _rx) = broadcast::channel::<ChartUpdateMessage>(buffer_size);
    let tx = Arc::new(tx);

    let session = match open_session().await {
        Ok(session) => Arc::new(session),
        Err(error) => {
            error!(%error, "failed to open ChartSession");
            return;
        }
    };

    // Configurable via CHART_ADDR env var (default: 0.0.0.0:9002)
    let server_addr = env_or("CHART_ADDR", SocketAddr::from(([0, 0, 0, 0], 9002)));
    tokio::spawn(start_websocket_server(
        server_addr,
        Arc::clone(&tx),
        Arc::clone(&session),
    ));
    info!("WebSocket server listening on ws://{}", server_addr);

    // Forward every chart update to all connected clients
    let mut updates = session.updates();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            update = updates.next() => match update {
                Some(update) => {
                    let message = ChartUpdateMessage::from(update.as_ref());
                    debug!(
                        sequence = message.sequence,
                        receivers = tx.receiver_count(),
                        "broadcasting chart update"
                    );
                    // No receivers is not an error
                    let _ = tx.send(message);
                }
                None => break,
            },
            _ = &mut shutdown => {
                info!("Received Ctrl-C, shutting down");
                break;
            }
        }
    }

    session.close();
}

/// Open the served [`ChartSession`] from `CHART_*` env vars.
async fn open_session() -> Result<ChartSession, ChartError> {
    let instruments = std::env::var("CHART_INSTRUMENTS")
        .unwrap_or_else(|_| "BTCUSD,ETHUSD,SOLUSD".to_string());
    let directory = StaticInstrumentDirectory::new(
        instruments
            .split(',')
            .map(str::trim)
            .filter(|symbol| !symbol.is_empty())
            .map(|symbol| (symbol, true)),
    );

    let instrument = Instrument::new(
        std::env::var("CHART_INSTRUMENT").unwrap_or_else(|_| "BTCUSD".to_string()),
    );
    let timeframe = env_or("CHART_TIMEFRAME", Timeframe::M1);
    let specs = parse_specs(
        std::env::var("CHART_INDICATORS")
            .unwrap_or_else(|_| "sma:20,ema:9,bb:20:2".to_string())
            .split(','),
    )?;

    let poll_interval = Duration::from_secs(env_or("CHART_POLL_SECS", 30_u64));
    let ping_interval = Duration::from_secs(env_or("CHART_PING_SECS", 30_u64));
    let config = SessionConfig::default().with_feed(
        FeedConfig::default()
            .with_poll_interval(poll_interval)
            .with_ping_interval(ping_interval),
    );

    info!(
        %instrument,
        %timeframe,
        indicators = specs.len(),
        "opening ChartSession"
    );

    ChartSession::open(
        binance_sources(Arc::new(directory), &config.feed),
        config,
        instrument,
        timeframe,
        vec![],
        specs,
    )
    .await
}

fn parse_specs<'a, Iter>(specs: Iter) -> Result<Vec<IndicatorSpec>, ChartError>
where
    Iter: IntoIterator<Item = &'a str>,
{
    specs
        .into_iter()
        .map(str::trim)
        .filter(|spec| !spec.is_empty())
        .map(IndicatorSpec::from_str)
        .collect()
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

/// Start WebSocket server that broadcasts chart updates to connected clients
async fn start_websocket_server(
    addr: SocketAddr,
    tx: Arc<broadcast::Sender<ChartUpdateMessage>>,
    session: Arc<ChartSession>,
) {
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(error) => {
            error!(%addr, %error, "failed to bind WebSocket server");
            return;
        }
    };

    info!("WebSocket server bound to {}", addr);

    while let Ok((stream, peer_addr)) = listener.accept().await {
        info!("New WebSocket connection from {}", peer_addr);
        tokio::spawn(handle_client(
            stream,
            peer_addr,
            Arc::clone(&tx),
            Arc::clone(&session),
        ));
    }
}

/// Handle individual WebSocket client connection
async fn handle_client(
    stream: TcpStream,
    peer_addr: SocketAddr,
    tx: Arc<broadcast::Sender<ChartUpdateMessage>>,
    session: Arc<ChartSession>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("WebSocket handshake failed for {}: {}", peer_addr, e);
            return;
        }
    };

    info!("WebSocket handshake completed for {}", peer_addr);

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let mut rx = tx.subscribe();
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<ServerMessage>();

    // Welcome followed by the current chart so the client can draw immediately
    let _ = reply_tx.send(ServerMessage::Welcome {
        message: "Connected to barter-chart feed".to_string(),
        timestamp: Utc::now(),
    });
    let _ = reply_tx.send(ServerMessage::Update(ChartUpdateMessage::from(
        session.snapshot().as_ref(),
    )));

    // Spawn task to send chart updates & command replies to this client
    let mut send_task = tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                reply = reply_rx.recv() => match reply {
                    Some(reply) => reply,
                    None => break,
                },
                update = rx.recv() => match update {
                    Ok(update) => ServerMessage::Update(update),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Only the latest update matters to a renderer
                        warn!("Client {} lagged, skipped {} updates", peer_addr, skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Broadcast channel closed for {}", peer_addr);
                        break;
                    }
                },
            };

            if let Ok(json) = serde_json::to_string(&message) {
                if ws_sender.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
        }
    });

    // Handle incoming commands from client
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Close(_)) => break,
                Ok(Message::Text(text)) => {
                    debug!("Received text from {}: {}", peer_addr, text);
                    if let Err(error) = handle_command(&session, text.as_str()).await {
                        warn!("Command from {} failed: {}", peer_addr, error);
                        let _ = reply_tx.send(ServerMessage::Error {
                            message: error.to_string(),
                        });
                    }
                }
                Err(e) => {
                    error!("WebSocket error for {}: {}", peer_addr, e);
                    break;
                }
                _ => {}
            }
        }
    });

    // Wait for either task to complete
    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
            info!("Send task completed for {}", peer_addr);
        }
        _ = &mut recv_task => {
            send_task.abort();
            info!("Receive task completed for {}", peer_addr);
        }
    }

    info!("WebSocket connection closed for {}", peer_addr);
}

/// Apply a [`ClientCommand`] to the shared session.
async fn handle_command(session: &ChartSession, text: &str) -> Result<(), ChartError> {
    let command = serde_json::from_str::<ClientCommand>(text)
        .map_err(|error| ChartError::InvalidInput(format!("invalid command: {error}")))?;

    match command {
        ClientCommand::Timeframe(timeframe) => session.switch_timeframe(timeframe),
        ClientCommand::Instrument(instrument) => {
            session.switch_instrument(Instrument::new(instrument)).await
        }
        ClientCommand::Indicators(indicators) => {
            session.update_specs(parse_specs(indicators.split(','))?)
        }
        ClientCommand::Refresh => {
            if !session.refresh()? {
                debug!("refresh not queued");
            }
            Ok(())
        }
    }
}

/// Initialize logging
fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_client_command() {
        struct TestCase {
            input: &'static str,
            expected: Option<ClientCommand>,
        }

        let tests = vec![
            TestCase {
                // TC0: timeframe switch
                input: r#"{"type":"timeframe","value":"5m"}"#,
                expected: Some(ClientCommand::Timeframe(Timeframe::M5)),
            },
            TestCase {
                // TC1: instrument switch
                input: r#"{"type":"instrument","value":"ethusd"}"#,
                expected: Some(ClientCommand::Instrument("ethusd".to_string())),
            },
            TestCase {
                // TC2: indicator set
                input: r#"{"type":"indicators","value":"sma:50,bb:20:2"}"#,
                expected: Some(ClientCommand::Indicators("sma:50,bb:20:2".to_string())),
            },
            TestCase {
                // TC3: refresh
                input: r#"{"type":"refresh"}"#,
                expected: Some(ClientCommand::Refresh),
            },
            TestCase {
                // TC4: unknown timeframe
                input: r#"{"type":"timeframe","value":"3m"}"#,
                expected: None,
            },
            TestCase {
                // TC5: unknown command
                input: r#"{"type":"zoom"}"#,
                expected: None,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = serde_json::from_str::<ClientCommand>(test.input).ok();
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_parse_specs() {
        assert_eq!(
            parse_specs(["sma:20", " ema:9 ", ""]).unwrap(),
            vec![
                IndicatorSpec::Sma { period: 20 },
                IndicatorSpec::Ema { period: 9 }
            ]
        );
        assert!(parse_specs(["sma:0"]).is_err());
        assert!(parse_specs(["rsi:14"]).is_err());
    }
}
