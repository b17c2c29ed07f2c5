//! Periodic driver: runs collection, daily budget reset, and hourly cache
//! sweep as three independent jobs sharing one `HybridSource`.

use crate::cost_tracker::CostTracker;
use crate::domain::{AssetClass, Quote};
use crate::hybrid_source::HybridSource;
use crate::sinks::QuoteSink;
use chrono::{Local, Timelike};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// A symbol tracked by the scheduler, paired with its asset class.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackedSymbol {
    pub symbol: String,
    pub asset_class: AssetClass,
}

struct Jobs {
    symbols: RwLock<HashSet<TrackedSymbol>>,
    collection_in_flight: AtomicBool,
}

/// Drives the three scheduled jobs: collection (every `interval`), daily
/// budget reset (local midnight), and hourly cache sweep.
pub struct Scheduler {
    source: Arc<HybridSource>,
    cost_tracker: Arc<CostTracker>,
    cache: Arc<crate::cache::Cache>,
    sinks: Vec<Arc<dyn QuoteSink>>,
    interval: Duration,
    jobs: Arc<Jobs>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    shutdown: Arc<AtomicBool>,
    shutdown_notify: Arc<Notify>,
}

impl Scheduler {
    pub fn new(
        source: Arc<HybridSource>,
        cost_tracker: Arc<CostTracker>,
        cache: Arc<crate::cache::Cache>,
        sinks: Vec<Arc<dyn QuoteSink>>,
        interval: Duration,
        initial_symbols: Vec<TrackedSymbol>,
    ) -> Self {
        Self {
            source,
            cost_tracker,
            cache,
            sinks,
            interval,
            jobs: Arc::new(Jobs {
                symbols: RwLock::new(initial_symbols.into_iter().collect()),
                collection_in_flight: AtomicBool::new(false),
            }),
            handles: Mutex::new(Vec::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
            shutdown_notify: Arc::new(Notify::new()),
        }
    }

    pub async fn add_symbol(&self, symbol: impl Into<String>, asset_class: AssetClass) {
        let mut symbols = self.jobs.symbols.write().await;
        symbols.insert(TrackedSymbol {
            symbol: symbol.into(),
            asset_class,
        });
    }

    pub async fn remove_symbol(&self, symbol: &str) {
        let mut symbols = self.jobs.symbols.write().await;
        symbols.retain(|t| t.symbol != symbol);
    }

    /// Install the three jobs and begin scheduling. Each job runs as its own
    /// background task; none runs concurrently with itself.
    pub async fn start(&self) {
        let mut handles = self.handles.lock().await;

        handles.push(tokio::spawn(Self::collection_loop(
            self.source.clone(),
            self.jobs.clone(),
            self.sinks.clone(),
            self.interval,
            self.shutdown.clone(),
            self.shutdown_notify.clone(),
        )));

        handles.push(tokio::spawn(Self::midnight_reset_loop(
            self.cost_tracker.clone(),
            self.shutdown.clone(),
            self.shutdown_notify.clone(),
        )));

        handles.push(tokio::spawn(Self::sweep_loop(
            self.cache.clone(),
            self.shutdown.clone(),
            self.shutdown_notify.clone(),
        )));

        info!(interval_secs = self.interval.as_secs(), "scheduler started");
    }

    /// Cancel scheduling. Jobs wake immediately (they wait on a `Notify`
    /// alongside their own ticker/sleep) rather than on their next tick. If
    /// `wait`, blocks until any in-flight collection concludes (bounded by a
    /// 30s graceful-shutdown timeout); otherwise the handles are aborted.
    pub async fn stop(&self, wait: bool) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.shutdown_notify.notify_waiters();

        let mut handles = self.handles.lock().await;
        if wait {
            for handle in handles.drain(..) {
                let _ = tokio::time::timeout(Duration::from_secs(30), handle).await;
            }
        } else {
            for handle in handles.drain(..) {
                handle.abort();
            }
        }

        info!("scheduler stopped");
    }

    /// Trigger an immediate one-shot collection outside the cadence.
    pub async fn force_collection(&self) -> Vec<(String, Option<Quote>)> {
        Self::run_collection(&self.source, &self.jobs, &self.sinks).await
    }

    async fn collection_loop(
        source: Arc<HybridSource>,
        jobs: Arc<Jobs>,
        sinks: Vec<Arc<dyn QuoteSink>>,
        interval: Duration,
        shutdown: Arc<AtomicBool>,
        shutdown_notify: Arc<Notify>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            if shutdown.load(Ordering::SeqCst) {
                return;
            }
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown_notify.notified() => {}
            }
            if shutdown.load(Ordering::SeqCst) {
                return;
            }

            // Coalesce, don't queue: if the previous collection is still
            // running, skip this tick entirely.
            if jobs
                .collection_in_flight
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                warn!("collection tick skipped: previous run still in flight");
                continue;
            }

            Self::run_collection(&source, &jobs, &sinks).await;
            jobs.collection_in_flight.store(false, Ordering::SeqCst);
        }
    }

    async fn run_collection(
        source: &Arc<HybridSource>,
        jobs: &Arc<Jobs>,
        sinks: &[Arc<dyn QuoteSink>],
    ) -> Vec<(String, Option<Quote>)> {
        // Snapshot the tracked set once; mutations during this tick do not
        // affect the in-flight run.
        let snapshot: Vec<TrackedSymbol> = jobs.symbols.read().await.iter().cloned().collect();

        let mut by_class: std::collections::HashMap<AssetClass, Vec<String>> =
            std::collections::HashMap::new();
        for t in &snapshot {
            by_class.entry(t.asset_class).or_default().push(t.symbol.clone());
        }

        let mut results = Vec::with_capacity(snapshot.len());
        for (class, symbols) in by_class {
            let quotes = source.get_quotes(&symbols, class, false).await;
            for (symbol, quote) in quotes {
                if let Some(ref q) = quote {
                    for sink in sinks {
                        if let Err(e) = sink.write(q).await {
                            warn!(symbol, error = %e, "sink write failed");
                        }
                    }
                }
                results.push((symbol, quote));
            }
        }

        let collected = results.iter().filter(|(_, q)| q.is_some()).count();
        info!(
            total = results.len(),
            collected, "collection tick complete"
        );
        results
    }

    async fn midnight_reset_loop(
        cost_tracker: Arc<CostTracker>,
        shutdown: Arc<AtomicBool>,
        shutdown_notify: Arc<Notify>,
    ) {
        loop {
            if shutdown.load(Ordering::SeqCst) {
                return;
            }
            let sleep_for = seconds_until_next_local_midnight();
            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = shutdown_notify.notified() => {}
            }
            if shutdown.load(Ordering::SeqCst) {
                return;
            }

            if let Err(e) = cost_tracker.reset(true).await {
                error!(error = %e, "daily budget reset failed");
            } else {
                info!("daily budget reset complete");
            }
        }
    }

    async fn sweep_loop(
        cache: Arc<crate::cache::Cache>,
        shutdown: Arc<AtomicBool>,
        shutdown_notify: Arc<Notify>,
    ) {
        let mut ticker = tokio::time::interval(Duration::from_secs(3600));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            if shutdown.load(Ordering::SeqCst) {
                return;
            }
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown_notify.notified() => {}
            }
            if shutdown.load(Ordering::SeqCst) {
                return;
            }

            match cache.clear_expired(chrono::Utc::now()).await {
                Ok(n) => info!(removed = n, "cache sweep complete"),
                Err(e) => warn!(error = %e, "cache sweep failed"),
            }
        }
    }
}

/// Seconds until the next local midnight (00:00). Always positive; returns a
/// full 24h if called exactly at midnight.
fn seconds_until_next_local_midnight() -> Duration {
    let now = Local::now();
    let seconds_since_midnight =
        now.hour() as i64 * 3600 + now.minute() as i64 * 60 + now.second() as i64;
    let remaining = 86_400 - seconds_since_midnight;
    Duration::from_secs(if remaining <= 0 { 86_400 } else { remaining as u64 })
}
