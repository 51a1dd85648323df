//! ThresholdTrader - Main Entry Point
//!
//! An unattended agent that buys Binance spot or futures instruments when
//! their price falls a configured fraction below the daily, weekly or
//! monthly reference open.

use anyhow::{bail, Result};
use clap::Parser;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use threshold_trader::common::channels::{create_event_channel, spawn_dispatcher};
use threshold_trader::common::traits::{Notifier, SharedClock, SharedExchange};
use threshold_trader::config::load_config;
use threshold_trader::config::types::SymbolEntry;
use threshold_trader::strategy::FeeSchedule;
use threshold_trader::{
    BinanceClient, CommandHandler, CommandListener, Engine, LogNotifier, PaperExchange,
    SystemClock, TelegramClient, TelegramNotifier,
};

/// CLI arguments for the application
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error); overrides settings.log_level
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Trade against the in-process paper exchange with live prices
    #[arg(long)]
    paper: bool,

    /// Starting quote balance of the paper exchange
    #[arg(long)]
    paper_balance: Option<Decimal>,

    /// Use the exchange testnet
    #[arg(long)]
    testnet: bool,

    /// Comma-separated list of symbols, replacing the configured list
    #[arg(long, value_delimiter = ',')]
    symbols: Option<Vec<String>>,
}

fn init_tracing(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();

    let mut config = load_config(Some(&args.config))?;

    // Command line overrides
    if args.paper {
        config.engine.dry_run = true;
    }
    if let Some(balance) = args.paper_balance {
        config.engine.paper_balance = balance;
    }
    if args.testnet {
        config.exchange.testnet = true;
    }
    if let Some(symbols) = args.symbols {
        config.trading.symbols = symbols
            .into_iter()
            .map(|s| SymbolEntry::Name(s.trim().to_uppercase()))
            .collect();
    }
    config.validate()?;

    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.settings.log_level.clone());
    init_tracing(&level, args.json_logs)?;

    info!("Starting ThresholdTrader");
    info!("Configuration file: {}", args.config);

    let mode = config.exchange.mode;
    let binance = Arc::new(BinanceClient::new(&config.exchange)?);
    let exchange: SharedExchange = if config.engine.dry_run {
        info!(balance = %config.engine.paper_balance, "Paper trading with live prices");
        Arc::new(
            PaperExchange::new(
                config.exchange.quote_asset.clone(),
                config.engine.paper_balance,
                FeeSchedule::for_mode(mode).taker_rate,
            )
            .with_price_source(binance),
        )
    } else {
        if config.exchange.api_key.is_none() || config.exchange.api_secret.is_none() {
            bail!("live trading requires BINANCE_API_KEY and BINANCE_API_SECRET");
        }
        binance
    };

    let clock: SharedClock = Arc::new(SystemClock);
    let (events, event_rx) = create_event_channel();

    let mut notifiers: Vec<Arc<dyn Notifier>> = vec![Arc::new(LogNotifier)];
    let telegram = match config.telegram.as_ref().filter(|t| t.enabled) {
        Some(telegram_config) => {
            let client = TelegramClient::new(telegram_config)?;
            notifiers.push(Arc::new(TelegramNotifier::new(client.clone())));
            Some(client)
        }
        None => {
            info!("Telegram disabled");
            None
        }
    };
    let dispatcher = spawn_dispatcher(event_rx, notifiers);

    let mut engine = Engine::new(config, exchange, clock.clone(), events);
    if let Err(e) = engine.startup().await {
        // Flush the failure and any disabled-symbol events before exiting
        drop(engine);
        let _ = dispatcher.await;
        return Err(e.into());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let listener = telegram.map(|client| {
        let handler = CommandHandler::new(
            engine.portfolio(),
            engine.orders(),
            engine.monitors(),
            clock.clone(),
        );
        tokio::spawn(CommandListener::new(client, handler).run(shutdown_rx.clone()))
    });

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received shutdown signal, cleaning up..."),
            Err(e) => warn!("Failed to listen for shutdown signal: {}", e),
        }
        let _ = shutdown_tx.send(true);
    });

    engine.run(shutdown_rx).await?;

    if let Some(listener) = listener {
        let _ = listener.await;
    }
    // Dropping the engine closes the event channel and lets the dispatcher drain
    drop(engine);
    let _ = dispatcher.await;

    info!("Shutdown complete");
    Ok(())
}
