use barter_chart::{
    ChartSession, IndicatorSpec, Instrument, SessionConfig, Timeframe,
    exchange::binance::binance_sources,
    indicator::IndicatorSeries,
    instrument::StaticInstrumentDirectory,
};
use futures::StreamExt;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() {
    // Initialise INFO Tracing log subscriber
    init_logging();

    let instruments = Arc::new(StaticInstrumentDirectory::new([
        ("BTCUSD", true),
        ("ETHUSD", true),
    ]));

    let specs = ["sma:20", "ema:9", "bb:20:2"]
        .into_iter()
        .filter_map(|spec| spec.parse::<IndicatorSpec>().ok())
        .collect::<Vec<_>>();

    let config = SessionConfig::default().with_tail_len(100);

    // Empty initial series: the feed bootstraps it from Binance klines
    let session = match ChartSession::open(
        binance_sources(instruments, &config.feed),
        config,
        Instrument::from("BTCUSD"),
        Timeframe::M1,
        vec![],
        specs,
    )
    .await
    {
        Ok(session) => session,
        Err(error) => {
            eprintln!("Failed to open ChartSession: {error}");
            return;
        }
    };

    let mut updates = session.updates().take(20);
    while let Some(update) = updates.next().await {
        let Some(last) = update.candles.last() else {
            info!(connection = %update.connection, "waiting for candles");
            continue;
        };

        let indicators = update
            .indicators
            .iter()
            .filter_map(|(spec, series)| match series {
                IndicatorSeries::Line { points } => points
                    .last()
                    .map(|point| format!("{spec}={:.2}", point.value)),
                IndicatorSeries::Bands(bands) => bands
                    .middle
                    .last()
                    .zip(bands.upper.last())
                    .zip(bands.lower.last())
                    .map(|((middle, upper), lower)| {
                        format!(
                            "{spec}={:.2}/{:.2}/{:.2}",
                            upper.value, middle.value, lower.value
                        )
                    }),
            })
            .collect::<Vec<_>>()
            .join(" ");

        println!(
            "#{} {} {} [{}] close={:.2} change={} {}",
            update.sequence,
            update.instrument,
            update.timeframe,
            update.connection,
            last.close,
            update
                .price_change
                .map(|change| format!("{:+.2}%", change.percentage))
                .unwrap_or_else(|| "-".to_string()),
            indicators,
        );
    }

    session.close();
}

fn init_logging() {
    tracing_subscriber::fmt()
        // Filter messages based on the INFO
        .with_env_filter(
            tracing_subscriber::filter::EnvFilter::builder()
                .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        // Disable colours on release builds
        .with_ansi(cfg!(debug_assertions))
        // Compact formatting interleaves well with the printed updates
        .compact()
        // Install this Tracing subscriber as global default
        .init()
}
