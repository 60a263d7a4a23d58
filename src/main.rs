mod broker;
mod config;
mod data;
mod database;
mod engine;
mod execution;
mod indicators;
mod monitoring;
mod notifications;
mod ranking;
mod risk;
mod strategies;
mod types;
mod ui;
mod universe;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use broker::bridge::Mt5BridgeConnector;
use broker::BrokerConnector;
use config::load_config;
use data::DataPipeline;
use database::Database;
use engine::{BotEngine, EngineCommand};
use ranking::Ranker;

#[derive(Parser)]
#[command(name = "cfd-paper-bot")]
#[command(version = "0.1.0")]
#[command(about = "Paper-trading bot for CFD markets over a MetaTrader 5 bridge", long_about = None)]
struct Cli {
    /// Configuration file path (YAML)
    #[arg(long)]
    config: PathBuf,

    /// Run headless (no status output)
    #[arg(long)]
    no_ui: bool,

    /// Log level directive (trace|debug|info|warn|error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the trading loop (default)
    Run,
    /// Check broker connectivity, symbols and ranking, then exit
    Doctor {
        /// Bars to fetch for the candle sanity check
        #[arg(long, default_value_t = 300)]
        bars: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_new(&cli.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_bot(&cli.config, cli.no_ui).await,
        Commands::Doctor { bars } => run_doctor(&cli.config, bars).await,
    }
}

async fn run_bot(config_path: &PathBuf, no_ui: bool) -> Result<()> {
    // Bootstrap config to find the store, then merge the latest persisted
    // settings snapshot and reload.
    let base_config = load_config(config_path, None).context("loading config")?;
    let db = Arc::new(
        Database::connect(&base_config.persistence.db_path)
            .await
            .context("opening store")?,
    );
    let latest_snapshot = db.latest_settings_snapshot().await?;
    let config = load_config(config_path, latest_snapshot.as_deref())
        .context("loading config with settings snapshot")?;

    let db = if config.persistence.db_path != base_config.persistence.db_path {
        Arc::new(Database::connect(&config.persistence.db_path).await?)
    } else {
        db
    };

    info!(
        timeframe = %config.runtime.timeframe,
        trading_enabled = config.execution.trading_enabled,
        "cfd-paper-bot starting"
    );

    let ui_enabled = config.ui.enabled && !no_ui;
    let refresh_hz = config.ui.refresh_hz;
    let (engine, handle) = BotEngine::new(config, Arc::clone(&db));

    let engine_task = tokio::spawn(engine.run());
    let ui_task = if ui_enabled {
        Some(tokio::spawn(ui::run_status_loop(handle.snapshot(), refresh_hz)))
    } else {
        None
    };

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    handle.send(EngineCommand::Quit);
    engine_task.await?;
    if let Some(task) = ui_task {
        task.abort();
    }

    info!("stopped");
    Ok(())
}

/// Connectivity and data sanity check. Exit code 2 flags missing env vars or
/// an empty symbol universe so supervisors can distinguish setup problems
/// from crashes.
async fn run_doctor(config_path: &PathBuf, bars: usize) -> Result<()> {
    let missing: Vec<&str> = ["MT5_LOGIN", "MT5_PASSWORD", "MT5_SERVER"]
        .into_iter()
        .filter(|key| std::env::var(key).map(|v| v.is_empty()).unwrap_or(true))
        .collect();
    if !missing.is_empty() {
        println!("[FAIL] Missing env vars: {}", missing.join(", "));
        std::process::exit(2);
    }
    println!("[OK] Env vars present");

    let config = load_config(config_path, None).context("loading config")?;
    let _db = Database::connect(&config.persistence.db_path).await?;

    let connector: Arc<dyn BrokerConnector> = Arc::new(Mt5BridgeConnector::from_env().await?);

    match connector.account_info().await? {
        Some(account) => println!(
            "[OK] Account: login={:?} server={:?} mode={} equity={:?}",
            account.login, account.server, account.trade_mode, account.equity
        ),
        None => println!("[WARN] account_info unavailable"),
    }

    let symbols = connector.discover_symbols().await?;
    if symbols.is_empty() {
        println!("[FAIL] No symbols available");
        std::process::exit(2);
    }
    println!("[OK] Discovered symbols: {}", symbols.len());
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for s in &symbols {
        *counts.entry(s.asset_class.as_str()).or_insert(0) += 1;
    }
    let mut counts: Vec<(&str, usize)> = counts.into_iter().collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    for (class, count) in counts {
        println!("  - {}: {}", class, count);
    }

    let candidate = config
        .universe
        .preferred_symbols
        .first()
        .cloned()
        .unwrap_or_else(|| symbols[0].name.clone());
    let candles = connector
        .get_candles(&candidate, config.runtime.timeframe, bars)
        .await?;
    if candles.is_empty() {
        println!("[FAIL] Candle fetch empty for {}", candidate);
        std::process::exit(2);
    }
    println!(
        "[OK] Candle fetch for {}: {} bars, last open {}",
        candidate,
        candles.len(),
        candles.last().map(|c| c.time_utc.to_rfc3339()).unwrap_or_default()
    );

    let pipeline = DataPipeline::new(
        Arc::clone(&connector),
        config.runtime.timeframe,
        config.runtime.warmup_bars,
    );
    let ranker = Ranker::new(
        Arc::clone(&connector),
        pipeline,
        config.ranking.clone(),
        config.runtime.timeframe,
    );
    let universe: Vec<String> = symbols
        .iter()
        .take(config.universe.discovery_limits.max_symbols_total)
        .map(|s| s.name.clone())
        .collect();
    let meta = symbols
        .iter()
        .map(|s| (s.name.clone(), s.clone()))
        .collect();
    let out = ranker.rank(&universe, &meta).await;
    println!("[OK] Ranking pass");
    for (i, r) in out.selected.iter().take(config.ranking.top_n).enumerate() {
        println!(
            "  {}. {} score={:.3} reasons={}",
            i + 1,
            r.symbol,
            r.score,
            r.reasons.join("; ")
        );
    }

    connector.shutdown().await;
    Ok(())
}
