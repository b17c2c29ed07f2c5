//! # Cost Tracker
//!
//! Process-wide accountant for the paid backend. Persists total spend,
//! per-day and per-asset counters to a JSON file and enforces the monetary
//! budget that the rest of the system is built to respect.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use quote_collector::clock::SystemClock;
//! use quote_collector::cost_tracker::CostTracker;
//! use quote_collector::domain::AssetClass;
//! use std::sync::Arc;
//!
//! # async fn run() -> quote_collector::error::Result<()> {
//! let tracker = CostTracker::load("logs/cost_tracking.json", 5.50, 0.0015, Arc::new(SystemClock)).await?;
//!
//! if tracker.can_make_request().await.0 {
//!     let accounting = tracker.record_request(AssetClass::Stocks, "AAPL", true).await?;
//!     println!("usage ratio: {:.2}", accounting.usage_ratio);
//! }
//! # Ok(())
//! # }
//! ```

use crate::clock::Clock;
use crate::error::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Alert level derived from `spend / budget`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Ok,
    Warning,
    Critical,
    Danger,
}

impl AlertLevel {
    /// Compute the alert level from a usage ratio, per the fixed thresholds.
    fn from_ratio(ratio: f64) -> Self {
        if ratio >= 0.95 {
            AlertLevel::Danger
        } else if ratio >= 0.80 {
            AlertLevel::Critical
        } else if ratio >= 0.50 {
            AlertLevel::Warning
        } else {
            AlertLevel::Ok
        }
    }
}

/// Per-date request/cost counter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DateCounter {
    pub count: u64,
    pub cost: f64,
}

/// Persisted, process-wide cost tracker state. Mirrors the JSON schema in
/// the persistence layout exactly: `total_requests`, `successful_requests`,
/// `failed_requests`, `total_cost`, `requests_by_date`, `requests_by_asset`,
/// `tracking_start`, `last_updated`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostState {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub total_cost: f64,
    pub requests_by_date: HashMap<String, DateCounter>,
    pub requests_by_asset: HashMap<String, HashMap<String, u64>>,
    pub tracking_start: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl CostState {
    fn empty(now: DateTime<Utc>) -> Self {
        Self {
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            total_cost: 0.0,
            requests_by_date: HashMap::new(),
            requests_by_asset: HashMap::new(),
            tracking_start: now,
            last_updated: now,
        }
    }
}

/// Snapshot returned by `record_request`, including the derived alert level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Accounting {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub total_cost: f64,
    pub usage_ratio: f64,
    pub alert_level: AlertLevel,
}

/// Full statistics report, including daily averages and an exhaustion
/// prediction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsReport {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub total_cost: f64,
    pub budget: f64,
    pub usage_ratio: f64,
    pub alert_level: AlertLevel,
    pub tracking_start: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub daily_average_cost: f64,
    /// `None` when `daily_average_cost` is zero (prediction undefined).
    pub days_until_exhaustion: Option<f64>,
    pub requests_by_date: HashMap<String, DateCounter>,
    pub requests_by_asset: HashMap<String, HashMap<String, u64>>,
}

/// Process-wide accountant guarding the paid backend's monetary budget.
pub struct CostTracker {
    state: Mutex<CostState>,
    path: PathBuf,
    budget: f64,
    unit_cost: f64,
    clock: Arc<dyn Clock>,
}

impl CostTracker {
    /// Load state from `path`, or start empty if the file is missing or
    /// corrupt. A corrupt file is logged as a recoverable warning; the
    /// process never aborts because of it.
    pub async fn load(
        path: impl AsRef<Path>,
        budget: f64,
        unit_cost: f64,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let now = clock.now();

        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<CostState>(&bytes) {
                Ok(state) => state,
                Err(e) => {
                    warn!(
                        "cost tracker state at {} is corrupt ({}), starting empty",
                        path.display(),
                        e
                    );
                    CostState::empty(now)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => CostState::empty(now),
            Err(e) => {
                warn!(
                    "failed to read cost tracker state at {} ({}), starting empty",
                    path.display(),
                    e
                );
                CostState::empty(now)
            }
        };

        Ok(Self {
            state: Mutex::new(state),
            path,
            budget,
            unit_cost,
            clock,
        })
    }

    /// `true` iff `remaining_budget >= unit_cost`. Never blocks, never
    /// mutates state.
    pub async fn can_make_request(&self) -> (bool, Option<&'static str>) {
        let state = self.state.lock().await;
        let remaining = self.budget - state.total_cost;
        if remaining >= self.unit_cost {
            (true, None)
        } else {
            (false, Some("budget exhausted"))
        }
    }

    /// Record a paid request's outcome. Both success and failure advance
    /// spend by `unit_cost` — the paid backend charges for transport
    /// whether or not the response was usable.
    pub async fn record_request(
        &self,
        asset_class: crate::domain::AssetClass,
        symbol: &str,
        success: bool,
    ) -> Result<Accounting> {
        let mut state = self.state.lock().await;
        let now = self.clock.now();

        state.total_requests += 1;
        if success {
            state.successful_requests += 1;
        } else {
            state.failed_requests += 1;
        }
        state.total_cost += self.unit_cost;
        state.last_updated = now;

        let date_key = now.date_naive().to_string();
        let date_counter = state.requests_by_date.entry(date_key).or_default();
        date_counter.count += 1;
        date_counter.cost += self.unit_cost;

        state
            .requests_by_asset
            .entry(asset_class.as_str().to_string())
            .or_default()
            .entry(symbol.to_ascii_uppercase())
            .and_modify(|c| *c += 1)
            .or_insert(1);

        let accounting = self.accounting_locked(&state);
        self.persist_locked(&state).await?;

        Ok(accounting)
    }

    fn accounting_locked(&self, state: &CostState) -> Accounting {
        let usage_ratio = (state.total_cost / self.budget).clamp(0.0, 1.0);
        Accounting {
            total_requests: state.total_requests,
            successful_requests: state.successful_requests,
            failed_requests: state.failed_requests,
            total_cost: state.total_cost,
            usage_ratio,
            alert_level: AlertLevel::from_ratio(usage_ratio),
        }
    }

    /// Snapshot of all counters, the alert level, daily averages, and an
    /// exhaustion prediction.
    pub async fn statistics(&self) -> StatsReport {
        let state = self.state.lock().await;
        let now = self.clock.now();

        let elapsed_days = (now.date_naive() - state.tracking_start.date_naive())
            .num_days()
            .max(1) as f64;
        let daily_average_cost = state.total_cost / elapsed_days;

        let usage_ratio = (state.total_cost / self.budget).clamp(0.0, 1.0);
        let remaining_budget = (self.budget - state.total_cost).max(0.0);
        let days_until_exhaustion = if daily_average_cost > 0.0 {
            Some(remaining_budget / daily_average_cost)
        } else {
            None
        };

        StatsReport {
            total_requests: state.total_requests,
            successful_requests: state.successful_requests,
            failed_requests: state.failed_requests,
            total_cost: state.total_cost,
            budget: self.budget,
            usage_ratio,
            alert_level: AlertLevel::from_ratio(usage_ratio),
            tracking_start: state.tracking_start,
            last_updated: state.last_updated,
            daily_average_cost,
            days_until_exhaustion,
            requests_by_date: state.requests_by_date.clone(),
            requests_by_asset: state.requests_by_asset.clone(),
        }
    }

    /// Reset counters to zero and rewrite persistence. Refuses without
    /// `confirm = true`.
    pub async fn reset(&self, confirm: bool) -> Result<()> {
        if !confirm {
            return Err(crate::error::CollectorError::config(
                "CostTracker::reset requires confirm=true",
            ));
        }

        let mut state = self.state.lock().await;
        *state = CostState::empty(self.clock.now());
        self.persist_locked(&state).await?;

        info!("cost tracker reset; tracking_start advanced to now");
        Ok(())
    }

    /// Write-to-temp + rename so a crash mid-write never leaves a torn
    /// file. Persistence failures are logged; they do not roll back the
    /// in-memory update that triggered them.
    async fn persist_locked(&self, state: &CostState) -> Result<()> {
        let result: Result<()> = async {
            if let Some(parent) = self.path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            let bytes = serde_json::to_vec_pretty(state)?;
            let tmp_path = self.path.with_extension("json.tmp");
            tokio::fs::write(&tmp_path, &bytes).await?;
            tokio::fs::rename(&tmp_path, &self.path).await?;
            Ok(())
        }
        .await;

        if let Err(ref e) = result {
            warn!(
                "failed to persist cost tracker state to {}: {}",
                self.path.display(),
                e
            );
        }

        result
    }
}

/// Parse a `YYYY-MM-DD` date key back out of `requests_by_date`, used by
/// reporting code that wants to bucket by calendar date rather than the raw
/// string key.
pub fn parse_date_key(key: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(key, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::domain::AssetClass;

    async fn tracker_at(
        path: impl AsRef<Path>,
        budget: f64,
        unit_cost: f64,
    ) -> (CostTracker, FixedClock) {
        let clock = FixedClock::new(Utc::now());
        let tracker = CostTracker::load(path, budget, unit_cost, Arc::new(clock.clone()))
            .await
            .unwrap();
        (tracker, clock)
    }

    #[tokio::test]
    async fn test_can_make_request_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cost.json");
        let (tracker, _clock) = tracker_at(&path, 0.0030, 0.0015).await;

        assert!(tracker.can_make_request().await.0);
        tracker
            .record_request(AssetClass::Stocks, "A", true)
            .await
            .unwrap();
        // remaining == unit_cost: still admitted (S3: remaining_budget == unit_cost is admitted)
        assert!(tracker.can_make_request().await.0);
        tracker
            .record_request(AssetClass::Stocks, "B", true)
            .await
            .unwrap();
        // remaining == 0 now: denied
        assert!(!tracker.can_make_request().await.0);
    }

    #[tokio::test]
    async fn test_record_request_charges_unit_cost_on_success_and_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cost.json");
        let (tracker, _clock) = tracker_at(&path, 5.50, 0.0015).await;

        let before = tracker.statistics().await.total_cost;
        tracker
            .record_request(AssetClass::Stocks, "AAPL", true)
            .await
            .unwrap();
        let after_success = tracker.statistics().await.total_cost;
        assert!((after_success - before - 0.0015).abs() < 1e-9);

        tracker
            .record_request(AssetClass::Stocks, "AAPL", false)
            .await
            .unwrap();
        let after_failure = tracker.statistics().await.total_cost;
        assert!((after_failure - after_success - 0.0015).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_alert_level_thresholds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cost.json");
        let (tracker, _clock) = tracker_at(&path, 1.0, 0.5).await;

        let acc = tracker
            .record_request(AssetClass::Stocks, "A", true)
            .await
            .unwrap();
        assert_eq!(acc.usage_ratio, 0.5);
        assert_eq!(acc.alert_level, AlertLevel::Warning);

        let acc = tracker
            .record_request(AssetClass::Stocks, "A", true)
            .await
            .unwrap();
        assert_eq!(acc.usage_ratio, 1.0);
        assert_eq!(acc.alert_level, AlertLevel::Danger);
    }

    #[tokio::test]
    async fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cost.json");

        {
            let (tracker, _clock) = tracker_at(&path, 5.50, 0.0015).await;
            for i in 0..10 {
                tracker
                    .record_request(AssetClass::Stocks, "AAPL", i < 7)
                    .await
                    .unwrap();
            }
        }

        let s1 = {
            let clock = FixedClock::new(Utc::now());
            let tracker = CostTracker::load(&path, 5.50, 0.0015, Arc::new(clock))
                .await
                .unwrap();
            tracker.statistics().await
        };

        let clock = FixedClock::new(Utc::now());
        let tracker2 = CostTracker::load(&path, 5.50, 0.0015, Arc::new(clock))
            .await
            .unwrap();
        let s2 = tracker2.statistics().await;

        assert_eq!(s1.total_requests, s2.total_requests);
        assert_eq!(s1.successful_requests, s2.successful_requests);
        assert_eq!(s1.failed_requests, s2.failed_requests);
        assert!((s1.total_cost - s2.total_cost).abs() < 1e-12);
        assert_eq!(s2.total_requests, 10);
        assert_eq!(s2.successful_requests, 7);
        assert_eq!(s2.failed_requests, 3);
    }

    #[tokio::test]
    async fn test_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cost.json");
        tokio::fs::write(&path, b"not json").await.unwrap();

        let (tracker, _clock) = tracker_at(&path, 5.50, 0.0015).await;
        let stats = tracker.statistics().await;
        assert_eq!(stats.total_requests, 0);
    }

    #[tokio::test]
    async fn test_reset_requires_confirm() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cost.json");
        let (tracker, _clock) = tracker_at(&path, 5.50, 0.0015).await;

        tracker
            .record_request(AssetClass::Stocks, "A", true)
            .await
            .unwrap();
        assert!(tracker.reset(false).await.is_err());

        tracker.reset(true).await.unwrap();
        let stats = tracker.statistics().await;
        assert_eq!(stats.total_requests, 0);
        assert_eq!(stats.total_cost, 0.0);
    }

    #[tokio::test]
    async fn test_days_until_exhaustion_undefined_when_no_spend() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cost.json");
        let (tracker, _clock) = tracker_at(&path, 5.50, 0.0015).await;

        let stats = tracker.statistics().await;
        assert_eq!(stats.daily_average_cost, 0.0);
        assert!(stats.days_until_exhaustion.is_none());
    }
}
