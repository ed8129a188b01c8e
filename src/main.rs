use anyhow::Context;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use trailbot::api::{DeltaClient, ExchangeGateway, FirebaseClient};
use trailbot::config::{LoggingSettings, Settings, SinkKind};
use trailbot::execution::{
    run_price_stream, OrderController, PriceFeed, SignalDispatcher, TradeManager, TrailingMonitor,
};
use trailbot::models::SignalEvent;
use trailbot::persistence::{NullSink, OrderSink, RedisOrderStore};

#[derive(Parser, Debug)]
#[command(name = "trailbot")]
#[command(about = "Signal-driven futures trader with tiered profit trailing", long_about = None)]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config/default.toml")]
    config: PathBuf,

    /// Account whose signal key to follow (overrides the config file)
    #[arg(short, long)]
    account: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut settings = Settings::load(Some(&args.config))
        .with_context(|| format!("loading settings from {}", args.config.display()))?;
    if let Some(account) = args.account {
        settings.signals.account = account;
    }

    let _log_guard = setup_logging(&settings.logging);

    tracing::info!("🚀 Trailbot starting");
    tracing::info!("  Account: {}", settings.signals.account);
    tracing::info!("  Symbol: {} (product {})", settings.trading.symbol, settings.trading.product_id);
    tracing::info!("  Trailing tiers: {}", settings.trailing.rules.levels.len());

    // Exchange connectivity is checked up front; failures abort startup
    let gateway: Arc<dyn ExchangeGateway> =
        Arc::new(DeltaClient::new(&settings.exchange).context("building exchange client")?);

    let markets = gateway.load_markets(false).await.context("loading markets")?;
    tracing::info!("Loaded {} markets", markets.len());

    let balances = gateway.fetch_balance().await.context("fetching balance")?;
    for balance in &balances {
        tracing::info!(
            "  Balance {}: {} (available {})",
            balance.asset,
            balance.balance,
            balance.available
        );
    }

    let positions = gateway.fetch_positions().await.context("fetching positions")?;
    tracing::info!("Open positions at startup: {}", positions.len());

    match gateway.fetch_ticker(&settings.trading.symbol).await {
        Ok(price) => tracing::info!("Last traded {}: {}", settings.trading.symbol, price),
        Err(e) => tracing::warn!("Could not fetch {} ticker: {}", settings.trading.symbol, e),
    }

    let firebase =
        FirebaseClient::new(&settings.signals).context("building realtime database client")?;
    let sink = build_sink(&settings, &firebase).await;

    let signal_key = settings.signal_key();
    match firebase.get_signal(&signal_key).await {
        Ok(value) => tracing::info!("Current signal at /{}: {}", signal_key, value),
        Err(e) => tracing::warn!("Could not read /{}: {}", signal_key, e),
    }

    let price_feed = PriceFeed::new();
    let trades = TradeManager::new(gateway.clone(), sink, settings.signals.account.clone());

    tracing::info!("\n🔄 Spawning tasks...");

    let price_task = {
        let url = settings.price_feed.url.clone();
        let feed = price_feed.clone();
        let delay = Duration::from_secs(settings.price_feed.reconnect_delay_secs.max(1));
        tokio::spawn(async move {
            run_price_stream(url, feed, delay).await;
        })
    };

    let monitor_task = {
        let monitor = TrailingMonitor::new(
            gateway.clone(),
            trades.clone(),
            price_feed.clone(),
            settings.trailing.clone(),
            settings.trading.clone(),
        );
        tokio::spawn(monitor.run())
    };

    let (tx, mut rx) = mpsc::channel::<SignalEvent>(32);

    let signal_task = {
        let firebase = firebase.clone();
        let key = signal_key.clone();
        tokio::spawn(async move {
            firebase.stream_signal(&key, tx).await;
        })
    };

    let dispatch_task = {
        let controller = OrderController::new(
            gateway.clone(),
            trades,
            price_feed.clone(),
            settings.trading.clone(),
        );
        let mut dispatcher = SignalDispatcher::new(controller);
        tokio::spawn(async move {
            // Events are handled one at a time, in arrival order
            while let Some(event) = rx.recv().await {
                dispatcher.handle_event(&event).await;
            }
        })
    };

    tracing::info!("✅ All tasks spawned");
    tracing::info!("  📈 Price stream: {}", settings.price_feed.url);
    tracing::info!("  🛡️  Trailing monitor: every {}s", settings.trailing.check_interval_secs);
    tracing::info!("  📡 Signal listener: /{}", signal_key);
    tracing::info!("\nPress Ctrl+C to stop...\n");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("\n⚠️  Received Ctrl+C, shutting down...");
        }
        result = price_task => {
            tracing::error!("Price stream exited: {:?}", result);
        }
        result = monitor_task => {
            tracing::error!("Trailing monitor exited: {:?}", result);
        }
        result = signal_task => {
            tracing::error!("Signal listener exited: {:?}", result);
        }
        result = dispatch_task => {
            tracing::error!("Signal dispatcher exited: {:?}", result);
        }
    }

    tracing::info!("👋 Trailbot stopped");
    Ok(())
}

// ============================================================================
// Initialization Functions
// ============================================================================

/// Console logging at the configured level, plus a debug-level file log
/// when `logging.file` is set. The returned guard flushes the file writer.
fn setup_logging(settings: &LoggingSettings) -> Option<WorkerGuard> {
    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("trailbot={}", settings.level)));
    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_filter(console_filter);

    let (file_layer, guard) = match settings.file.as_deref().and_then(open_log_file) {
        Some((dir, name)) => {
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(EnvFilter::new("trailbot=debug"));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .init();

    guard
}

/// Split the log path and make sure it is writable; the appender panics
/// on a file it cannot create
fn open_log_file(path: &str) -> Option<(PathBuf, PathBuf)> {
    let path = Path::new(path);
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let name = PathBuf::from(path.file_name()?);

    if let Err(e) = std::fs::create_dir_all(&dir)
        .and_then(|_| std::fs::OpenOptions::new().create(true).append(true).open(dir.join(&name)))
    {
        eprintln!(
            "Warning: Could not open log file {} ({}), file logging disabled",
            path.display(),
            e
        );
        return None;
    }

    Some((dir, name))
}

async fn build_sink(settings: &Settings, firebase: &FirebaseClient) -> Arc<dyn OrderSink> {
    match settings.persistence.sink {
        SinkKind::Firebase => {
            tracing::info!("Order records go to the realtime database");
            Arc::new(firebase.clone())
        }
        SinkKind::Redis => match RedisOrderStore::new(&settings.persistence.redis_url).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                tracing::warn!(
                    "Failed to connect to Redis ({}), continuing without order persistence",
                    e
                );
                Arc::new(NullSink)
            }
        },
        SinkKind::None => {
            tracing::info!("Order persistence disabled");
            Arc::new(NullSink)
        }
    }
}
