//! Composition root and CLI driver for the quote collector.

use clap::Parser;
use quote_collector::prelude::*;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "quote-collector")]
#[command(about = "Cost-optimized financial quote collector", long_about = None)]
struct Cli {
    /// Symbols to track, e.g. AAPL MSFT EURUSD
    symbols: Vec<String>,

    /// Asset class shared by all positional symbols
    #[arg(long, value_enum, default_value = "stocks")]
    asset_class: AssetClass,

    /// Collection cadence in minutes
    #[arg(long)]
    interval: Option<u64>,

    /// Run one collection pass and exit instead of scheduling
    #[arg(long)]
    once: bool,

    /// Print cost tracker and cache statistics, then exit
    #[arg(long)]
    status: bool,

    /// Override TOTAL_BUDGET for this run
    #[arg(long)]
    budget: Option<f64>,

    /// Bypass the cache for this run
    #[arg(long)]
    force_fresh: bool,

    /// Override LOG_LEVEL
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(1);
        }
    };

    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    if let Some(budget) = cli.budget {
        config.total_budget = budget;
    }
    if let Some(interval_minutes) = cli.interval {
        config.update_interval_seconds = interval_minutes * 60;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level.to_lowercase())),
        )
        .init();

    let paid_enabled = config.bright_data_token.is_some();
    if let Err(e) = config.validate(paid_enabled) {
        error!("{e}");
        return ExitCode::from(1);
    }

    match run(cli, config).await {
        Ok(code) => code,
        Err(e) => {
            error!("operational error: {e}");
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli, config: Config) -> quote_collector::error::Result<ExitCode> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let cost_tracker = Arc::new(
        CostTracker::load(
            config.cost_tracking_path(),
            config.total_budget,
            config.cost_per_request,
            clock.clone(),
        )
        .await?,
    );

    if cli.status {
        print_status(&cost_tracker).await;
        return Ok(ExitCode::SUCCESS);
    }

    let cache = Arc::new(Cache::open(config.cache_path(), config.cache_ttl_seconds).await?);

    let free_adapter = Box::new(FreeAdapter::new("https://free-quotes.example.internal"));
    let paid_adapter: Box<dyn BackendAdapter> = Box::new(PaidAdapter::new(
        "https://paid-quotes.example.internal",
        config.bright_data_token.clone().unwrap_or_default(),
    ));

    let source = Arc::new(HybridSource::new(
        cache.clone(),
        cost_tracker.clone(),
        free_adapter,
        paid_adapter,
        clock.clone(),
        Duration::from_secs(config.request_timeout_seconds),
    ));

    if cli.once {
        let quotes = source
            .get_quotes(&cli.symbols, cli.asset_class, cli.force_fresh)
            .await;

        let collected = quotes.values().filter(|q| q.is_some()).count();
        for (symbol, quote) in &quotes {
            match quote {
                Some(q) => info!(symbol, price = q.price, source = %q.source, "collected"),
                None => warn!(symbol, "unavailable"),
            }
        }

        println!("collected {collected}/{} quotes", quotes.len());
        if collected == 0 && !quotes.is_empty() {
            return Ok(ExitCode::from(2));
        }
        return Ok(ExitCode::SUCCESS);
    }

    let sinks: Vec<Arc<dyn QuoteSink>> = vec![
        Arc::new(CsvSink::new(config.data_dir.join("quotes.csv"))),
        Arc::new(JsonlSink::new(config.data_dir.join("quotes.jsonl"))),
    ];

    let tracked = cli
        .symbols
        .iter()
        .map(|s| TrackedSymbol {
            symbol: s.clone(),
            asset_class: cli.asset_class,
        })
        .collect();

    let scheduler = Scheduler::new(
        source,
        cost_tracker,
        cache,
        sinks,
        Duration::from_secs(config.update_interval_seconds),
        tracked,
    );

    scheduler.start().await;
    info!("scheduler running; press Ctrl+C to stop");

    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("shutdown signal received");
            scheduler.stop(true).await;
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            error!("failed to listen for shutdown signal: {e}");
            scheduler.stop(false).await;
            Ok(ExitCode::from(130))
        }
    }
}

async fn print_status(cost_tracker: &CostTracker) {
    let stats = cost_tracker.statistics().await;
    println!("total requests:    {}", stats.total_requests);
    println!("successful:        {}", stats.successful_requests);
    println!("failed:            {}", stats.failed_requests);
    println!("total cost:        ${:.4}", stats.total_cost);
    println!("budget:            ${:.2}", stats.budget);
    println!("usage ratio:       {:.1}%", stats.usage_ratio * 100.0);
    println!("alert level:       {:?}", stats.alert_level);
    println!("daily average:     ${:.4}", stats.daily_average_cost);
    match stats.days_until_exhaustion {
        Some(days) => println!("days until exhaustion: {days:.1}"),
        None => println!("days until exhaustion: n/a (no spend yet)"),
    }
}
