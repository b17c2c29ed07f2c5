//! Composes the cache, cost tracker, and per-backend circuit breakers into
//! the priority cascade: cache -> free -> paid.

use crate::backends::{free_native_symbol, paid_native_symbol, BackendAdapter};
use crate::cache::Cache;
use crate::circuit_breaker::{BreakerConfig, CircuitBreaker};
use crate::clock::Clock;
use crate::cost_tracker::CostTracker;
use crate::domain::{AssetClass, BackendTag, Quote};
use crate::error::CollectorError;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const DEFAULT_BATCH_CONCURRENCY: usize = 5;

/// Why `get_quote` returned no quote for a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Unavailable {
    BudgetExhausted,
    AllSourcesExhausted,
}

#[derive(Debug, Default)]
struct BackendCounters {
    attempts: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
}

impl BackendCounters {
    fn snapshot(&self) -> BackendStats {
        BackendStats {
            attempts: self.attempts.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BackendStats {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Statistics {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub free: BackendStats,
    pub paid: BackendStats,
    pub cost_to_date: f64,
}

/// Composes Cache + CostTracker + CircuitBreaker(s) + adapters into the
/// priority cascade described in the module docs.
pub struct HybridSource {
    cache: Arc<Cache>,
    cost_tracker: Arc<CostTracker>,
    free_breaker: CircuitBreaker,
    paid_breaker: CircuitBreaker,
    free_adapter: Box<dyn BackendAdapter>,
    paid_adapter: Box<dyn BackendAdapter>,
    clock: Arc<dyn Clock>,
    request_timeout: Duration,
    batch_concurrency: usize,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    free_counters: BackendCounters,
    paid_counters: BackendCounters,
}

impl HybridSource {
    pub fn new(
        cache: Arc<Cache>,
        cost_tracker: Arc<CostTracker>,
        free_adapter: Box<dyn BackendAdapter>,
        paid_adapter: Box<dyn BackendAdapter>,
        clock: Arc<dyn Clock>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            cache,
            cost_tracker,
            free_breaker: CircuitBreaker::new(
                "free",
                BreakerConfig::free_defaults(),
                clock.clone(),
            ),
            paid_breaker: CircuitBreaker::new(
                "paid",
                BreakerConfig::paid_defaults(),
                clock.clone(),
            ),
            free_adapter,
            paid_adapter,
            clock,
            request_timeout,
            batch_concurrency: DEFAULT_BATCH_CONCURRENCY,
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            free_counters: BackendCounters::default(),
            paid_counters: BackendCounters::default(),
        }
    }

    pub fn with_batch_concurrency(mut self, n: usize) -> Self {
        self.batch_concurrency = n.max(1);
        self
    }

    /// Fetch a single quote via the priority cascade: cache, then free, then
    /// paid. `Err(BudgetExhausted)` signals the paid path was skipped purely
    /// because of the budget, so callers may want to treat it distinctly
    /// (e.g. to stop attempting the paid path for the rest of a batch
    /// without a cascade of log lines); `Err(AllSourcesExhausted)` signals
    /// every source that was actually tried (free and/or paid) came back
    /// unavailable or failing.
    pub async fn get_quote(
        &self,
        symbol: &str,
        asset_class: AssetClass,
        force_fresh: bool,
    ) -> Result<Option<Quote>, Unavailable> {
        let now = self.clock.now();

        if !force_fresh {
            match self.cache.get(asset_class, symbol, now).await {
                Some(quote) => {
                    self.cache_hits.fetch_add(1, Ordering::Relaxed);
                    debug!(symbol, %asset_class, "cache hit");
                    return Ok(Some(quote.with_source(BackendTag::Cache)));
                }
                None => {
                    self.cache_misses.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        if let Some(quote) = self.try_free(symbol, asset_class).await {
            self.cache.set(asset_class, symbol, &quote, now).await;
            return Ok(Some(quote));
        }

        if self.paid_breaker.is_available().await {
            let (can_request, reason) = self.cost_tracker.can_make_request().await;
            if !can_request {
                info!(
                    symbol,
                    reason = reason.unwrap_or("budget exhausted"),
                    "paid backend skipped: budget exhausted"
                );
                return Err(Unavailable::BudgetExhausted);
            }

            if let Some(quote) = self.try_paid(symbol, asset_class).await {
                self.cache.set(asset_class, symbol, &quote, now).await;
                return Ok(Some(quote));
            }
        }

        Err(Unavailable::AllSourcesExhausted)
    }

    async fn try_free(&self, symbol: &str, asset_class: AssetClass) -> Option<Quote> {
        if !self.free_breaker.is_available().await {
            return None;
        }
        let native = free_native_symbol(asset_class, symbol)?;

        self.free_counters.attempts.fetch_add(1, Ordering::Relaxed);
        let adapter = &self.free_adapter;
        let timeout = self.request_timeout;
        let outcome = self
            .free_breaker
            .call(|| adapter.fetch_quote(&native, asset_class, timeout))
            .await;

        match outcome {
            Ok(mut quote) => {
                self.free_counters.successes.fetch_add(1, Ordering::Relaxed);
                quote.symbol = symbol.to_string();
                Some(quote)
            }
            Err(CollectorError::CircuitOpen { .. }) => {
                debug!(symbol, "free breaker open mid-cascade");
                None
            }
            Err(e) => {
                self.free_counters.failures.fetch_add(1, Ordering::Relaxed);
                warn!(symbol, error = %e, "free backend failed");
                None
            }
        }
    }

    async fn try_paid(&self, symbol: &str, asset_class: AssetClass) -> Option<Quote> {
        let native = paid_native_symbol(asset_class, symbol);

        self.paid_counters.attempts.fetch_add(1, Ordering::Relaxed);
        let adapter = &self.paid_adapter;
        let timeout = self.request_timeout;
        let outcome = self
            .paid_breaker
            .call(|| adapter.fetch_quote(&native, asset_class, timeout))
            .await;

        // Charge on any definite remote outcome, never on a pre-dispatch
        // rejection (CircuitOpen) or a call the breaker itself refused.
        let reached_remote = match &outcome {
            Ok(_) => true,
            Err(CollectorError::Adapter(adapter_err)) => adapter_err.reached_remote(),
            Err(_) => false,
        };

        if reached_remote {
            let success = outcome.is_ok();
            if let Err(e) = self
                .cost_tracker
                .record_request(asset_class, symbol, success)
                .await
            {
                warn!(symbol, error = %e, "failed to record paid request cost");
            }
        }

        match outcome {
            Ok(mut quote) => {
                self.paid_counters.successes.fetch_add(1, Ordering::Relaxed);
                quote.symbol = symbol.to_string();
                Some(quote)
            }
            Err(CollectorError::CircuitOpen { .. }) => {
                debug!(symbol, "paid breaker open mid-cascade");
                None
            }
            Err(e) => {
                self.paid_counters.failures.fetch_add(1, Ordering::Relaxed);
                warn!(symbol, error = %e, "paid backend failed");
                None
            }
        }
    }

    /// Fan out `get_quote` over many symbols with bounded concurrency
    /// (default 5). A single symbol's failure, including budget exhaustion,
    /// never cancels its siblings.
    pub async fn get_quotes(
        &self,
        symbols: &[String],
        asset_class: AssetClass,
        force_fresh: bool,
    ) -> HashMap<String, Option<Quote>> {
        let bound = self.batch_concurrency;
        stream::iter(symbols.iter().cloned())
            .map(|symbol| async move {
                let outcome = self.get_quote(&symbol, asset_class, force_fresh).await;
                (symbol, outcome.unwrap_or(None))
            })
            .buffer_unordered(bound)
            .collect::<HashMap<_, _>>()
            .await
    }

    pub async fn statistics(&self) -> Statistics {
        Statistics {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            free: self.free_counters.snapshot(),
            paid: self.paid_counters.snapshot(),
            cost_to_date: self.cost_tracker.statistics().await.total_cost,
        }
    }

    pub async fn free_breaker_statistics(&self) -> crate::circuit_breaker::Statistics {
        self.free_breaker.statistics().await
    }

    pub async fn paid_breaker_statistics(&self) -> crate::circuit_breaker::Statistics {
        self.paid_breaker.statistics().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::BackendAdapter;
    use crate::clock::FixedClock;
    use crate::domain::BackendTag;
    use crate::error::AdapterError;
    use async_trait::async_trait;
    use chrono::Utc;

    struct AlwaysFail;
    #[async_trait]
    impl BackendAdapter for AlwaysFail {
        async fn fetch_quote(
            &self,
            _native_symbol: &str,
            _asset_class: AssetClass,
            _timeout: Duration,
        ) -> Result<Quote, AdapterError> {
            Err(AdapterError::Server("down".into()))
        }
        fn name(&self) -> &'static str {
            "fail"
        }
    }

    struct FixedPrice(f64, BackendTag);
    #[async_trait]
    impl BackendAdapter for FixedPrice {
        async fn fetch_quote(
            &self,
            native_symbol: &str,
            asset_class: AssetClass,
            _timeout: Duration,
        ) -> Result<Quote, AdapterError> {
            Ok(Quote::new(
                native_symbol,
                asset_class,
                self.0,
                self.1,
                Utc::now(),
            ))
        }
        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    struct CountingFail(Arc<AtomicU64>);
    #[async_trait]
    impl BackendAdapter for CountingFail {
        async fn fetch_quote(
            &self,
            _native_symbol: &str,
            _asset_class: AssetClass,
            _timeout: Duration,
        ) -> Result<Quote, AdapterError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(AdapterError::Server("down".into()))
        }
        fn name(&self) -> &'static str {
            "counting-fail"
        }
    }

    async fn tracker(budget: f64, unit_cost: f64, clock: Arc<dyn Clock>) -> Arc<CostTracker> {
        let dir = tempfile::tempdir().unwrap();
        Arc::new(
            CostTracker::load(dir.path().join("cost.json"), budget, unit_cost, clock)
                .await
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_cache_short_circuit() {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(Utc::now()));
        let cache = Arc::new(Cache::open_in_memory(60).await.unwrap());
        let calls = Arc::new(AtomicU64::new(0));
        struct Counted(Arc<AtomicU64>);
        #[async_trait]
        impl BackendAdapter for Counted {
            async fn fetch_quote(
                &self,
                native_symbol: &str,
                asset_class: AssetClass,
                _timeout: Duration,
            ) -> Result<Quote, AdapterError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(Quote::new(
                    native_symbol,
                    asset_class,
                    100.0,
                    BackendTag::Free,
                    Utc::now(),
                ))
            }
            fn name(&self) -> &'static str {
                "counted"
            }
        }

        let source = HybridSource::new(
            cache,
            tracker(5.50, 0.0015, clock.clone()).await,
            Box::new(Counted(calls.clone())),
            Box::new(AlwaysFail),
            clock,
            Duration::from_secs(5),
        );

        let first = source
            .get_quote("AAPL", AssetClass::Stocks, false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.source, BackendTag::Free);

        let second = source
            .get_quote("AAPL", AssetClass::Stocks, false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.source, BackendTag::Cache);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_free_to_paid_fallback() {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(Utc::now()));
        let cache = Arc::new(Cache::open_in_memory(60).await.unwrap());
        let cost = tracker(5.50, 0.0015, clock.clone()).await;

        let source = HybridSource::new(
            cache,
            cost.clone(),
            Box::new(AlwaysFail),
            Box::new(FixedPrice(101.0, BackendTag::Paid)),
            clock,
            Duration::from_secs(5),
        );

        let quote = source
            .get_quote("AAPL", AssetClass::Stocks, false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(quote.source, BackendTag::Paid);
        assert_eq!(quote.price, 101.0);

        let stats = cost.statistics().await;
        assert_eq!(stats.total_requests, 1);
        assert!((stats.total_cost - 0.0015).abs() < 1e-9);

        let breaker_stats = source.free_breaker_statistics().await;
        assert_eq!(breaker_stats.failures, 1);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_mid_batch() {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(Utc::now()));
        let cache = Arc::new(Cache::open_in_memory(60).await.unwrap());
        let cost = tracker(0.003, 0.0015, clock.clone()).await;

        let source = HybridSource::new(
            cache,
            cost.clone(),
            Box::new(AlwaysFail),
            Box::new(FixedPrice(101.0, BackendTag::Paid)),
            clock,
            Duration::from_secs(5),
        )
        .with_batch_concurrency(1);

        let symbols = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        let results = source
            .get_quotes(&symbols, AssetClass::Stocks, false)
            .await;

        let available = results.values().filter(|q| q.is_some()).count();
        assert_eq!(available, 2);
        let stats = cost.statistics().await;
        assert!((stats.total_cost - 0.003).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_breaker_skip_avoids_free_call_when_open() {
        let clock_dyn: Arc<dyn Clock> = Arc::new(FixedClock::new(Utc::now()));
        let cache = Arc::new(Cache::open_in_memory(60).await.unwrap());
        let cost = tracker(5.50, 0.0015, clock_dyn.clone()).await;
        let free_calls = Arc::new(AtomicU64::new(0));

        let source = HybridSource::new(
            cache,
            cost,
            Box::new(CountingFail(free_calls.clone())),
            Box::new(FixedPrice(50.0, BackendTag::Paid)),
            clock_dyn,
            Duration::from_secs(5),
        );

        for _ in 0..5 {
            let _ = source.get_quote("AAPL", AssetClass::Stocks, false).await;
        }
        let stats = source.free_breaker_statistics().await;
        assert_eq!(stats.state, crate::circuit_breaker::State::Open);

        let before = free_calls.load(Ordering::SeqCst);
        let _ = source.get_quote("AAPL", AssetClass::Stocks, false).await;
        assert_eq!(free_calls.load(Ordering::SeqCst), before);
    }
}
