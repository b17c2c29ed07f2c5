//! # Cache
//!
//! SQLite-backed TTL cache keyed by `(asset_class, symbol)`. Deduplicates
//! backend calls within a TTL window so the free and paid backends only
//! see traffic for symbols that have actually expired.

use crate::domain::{AssetClass, Quote};
use crate::error::Result;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, warn};

/// Cache statistics snapshot.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CacheStats {
    pub total_entries: i64,
    pub valid_entries: i64,
    pub expired_entries: i64,
    pub total_hits: i64,
    pub avg_hits_per_entry: f64,
    pub top_accessed: Vec<(String, i64)>,
    pub ttl_seconds: i64,
}

/// A single cache row, deserialized.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub quote: Quote,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub hit_count: i64,
    pub last_accessed: DateTime<Utc>,
}

/// Normalize a `(class, symbol)` pair into the cache's case-insensitive key:
/// lowercase class, uppercase symbol.
fn cache_key(asset_class: AssetClass, symbol: &str) -> String {
    format!("{}:{}", asset_class.as_str(), symbol.to_ascii_uppercase())
}

/// TTL-bounded key-value store for normalized quotes.
pub struct Cache {
    pool: SqlitePool,
    ttl_seconds: i64,
}

impl Cache {
    /// Open (creating if necessary) the SQLite-backed cache at `database_path`.
    pub async fn open(database_path: impl AsRef<std::path::Path>, ttl_seconds: i64) -> Result<Self> {
        if let Some(parent) = database_path.as_ref().parent() {
            tokio::fs::create_dir_all(parent).await.ok();
        }

        let url = format!("sqlite:{}?mode=rwc", database_path.as_ref().display());
        let pool = SqlitePool::connect(&url).await?;

        let cache = Self { pool, ttl_seconds };
        cache.initialize_schema().await?;
        Ok(cache)
    }

    /// In-memory cache, useful for tests.
    pub async fn open_in_memory(ttl_seconds: i64) -> Result<Self> {
        let pool = SqlitePool::connect("sqlite::memory:").await?;
        let cache = Self { pool, ttl_seconds };
        cache.initialize_schema().await?;
        Ok(cache)
    }

    async fn initialize_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cache_entries (
                cache_key TEXT PRIMARY KEY,
                asset_class TEXT NOT NULL,
                symbol TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                hit_count INTEGER NOT NULL DEFAULT 0,
                last_accessed TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_cache_class_symbol ON cache_entries(asset_class, symbol)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_cache_expires ON cache_entries(expires_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Look up a quote. Expired entries are deleted inline; storage or
    /// deserialization errors degrade to a miss (fail-open: the caller
    /// will refetch).
    pub async fn get(&self, asset_class: AssetClass, symbol: &str, now: DateTime<Utc>) -> Option<Quote> {
        let key = cache_key(asset_class, symbol);

        let row = match sqlx::query_as::<_, (String, String, String)>(
            "SELECT payload, expires_at, created_at FROM cache_entries WHERE cache_key = ?",
        )
        .bind(&key)
        .fetch_optional(&self.pool)
        .await
        {
            Ok(row) => row,
            Err(e) => {
                warn!("cache get failed for {}: {}", key, e);
                return None;
            }
        };

        let (payload, expires_at, _created_at) = row?;
        let expires_at = DateTime::parse_from_rfc3339(&expires_at)
            .ok()?
            .with_timezone(&Utc);

        if now >= expires_at {
            // Expired: delete inline and report a miss.
            let _ = sqlx::query("DELETE FROM cache_entries WHERE cache_key = ?")
                .bind(&key)
                .execute(&self.pool)
                .await;
            debug!("cache EXPIRED: {}", key);
            return None;
        }

        let quote: Quote = match serde_json::from_str(&payload) {
            Ok(q) => q,
            Err(e) => {
                warn!("cache entry for {} failed to deserialize ({}), evicting", key, e);
                let _ = sqlx::query("DELETE FROM cache_entries WHERE cache_key = ?")
                    .bind(&key)
                    .execute(&self.pool)
                    .await;
                return None;
            }
        };

        if let Err(e) = sqlx::query(
            "UPDATE cache_entries SET hit_count = hit_count + 1, last_accessed = ? WHERE cache_key = ?",
        )
        .bind(now.to_rfc3339())
        .bind(&key)
        .execute(&self.pool)
        .await
        {
            warn!("failed to update hit count for {}: {}", key, e);
        }

        debug!("cache HIT: {}", key);
        Some(quote)
    }

    /// Upsert a quote, resetting `hit_count` to 0 and stamping a fresh TTL
    /// window. Storage errors are non-fatal and logged; correctness is
    /// preserved because the next `get` will simply miss and the caller
    /// will refetch.
    pub async fn set(&self, asset_class: AssetClass, symbol: &str, quote: &Quote, now: DateTime<Utc>) {
        let key = cache_key(asset_class, symbol);
        let expires_at = now + chrono::Duration::seconds(self.ttl_seconds);

        let payload = match serde_json::to_string(quote) {
            Ok(p) => p,
            Err(e) => {
                warn!("failed to serialize quote for cache key {}: {}", key, e);
                return;
            }
        };

        let result = sqlx::query(
            r#"
            INSERT INTO cache_entries
                (cache_key, asset_class, symbol, payload, created_at, expires_at, hit_count, last_accessed)
            VALUES (?, ?, ?, ?, ?, ?, 0, ?)
            ON CONFLICT(cache_key) DO UPDATE SET
                payload = excluded.payload,
                created_at = excluded.created_at,
                expires_at = excluded.expires_at,
                hit_count = 0,
                last_accessed = excluded.last_accessed
            "#,
        )
        .bind(&key)
        .bind(asset_class.as_str())
        .bind(symbol.to_ascii_uppercase())
        .bind(&payload)
        .bind(now.to_rfc3339())
        .bind(expires_at.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            warn!("cache set failed for {}: {}", key, e);
        }
    }

    /// Explicit removal. Returns whether an entry was actually removed.
    pub async fn invalidate(&self, asset_class: AssetClass, symbol: &str) -> Result<bool> {
        let key = cache_key(asset_class, symbol);
        let result = sqlx::query("DELETE FROM cache_entries WHERE cache_key = ?")
            .bind(&key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete all entries with `expires_at < now`. Returns the number
    /// removed.
    pub async fn clear_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE expires_at < ?")
            .bind(now.to_rfc3339())
            .execute(&self.pool)
            .await?;

        let removed = result.rows_affected();
        if removed > 0 {
            debug!("cache sweep removed {} expired entries", removed);
        }
        Ok(removed)
    }

    /// Snapshot statistics: totals, hit counts, and the top-5 most accessed
    /// keys.
    pub async fn statistics(&self, now: DateTime<Utc>) -> Result<CacheStats> {
        let (total_entries,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM cache_entries")
            .fetch_one(&self.pool)
            .await?;

        let (valid_entries,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM cache_entries WHERE expires_at >= ?",
        )
        .bind(now.to_rfc3339())
        .fetch_one(&self.pool)
        .await?;

        let expired_entries = total_entries - valid_entries;

        let (total_hits,): (i64,) =
            sqlx::query_as("SELECT COALESCE(SUM(hit_count), 0) FROM cache_entries")
                .fetch_one(&self.pool)
                .await?;

        let avg_hits_per_entry = if total_entries > 0 {
            total_hits as f64 / total_entries as f64
        } else {
            0.0
        };

        let top_accessed: Vec<(String, i64)> = sqlx::query_as(
            "SELECT cache_key, hit_count FROM cache_entries ORDER BY hit_count DESC LIMIT 5",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(CacheStats {
            total_entries,
            valid_entries,
            expired_entries,
            total_hits,
            avg_hits_per_entry,
            top_accessed,
            ttl_seconds: self.ttl_seconds,
        })
    }

    /// Release the underlying storage handle.
    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::BackendTag;

    fn sample_quote(symbol: &str, price: f64, now: DateTime<Utc>) -> Quote {
        Quote::new(symbol, AssetClass::Stocks, price, BackendTag::Free, now)
    }

    #[tokio::test]
    async fn test_set_then_get_within_ttl() {
        let cache = Cache::open_in_memory(60).await.unwrap();
        let now = Utc::now();
        let quote = sample_quote("AAPL", 100.0, now);

        cache.set(AssetClass::Stocks, "AAPL", &quote, now).await;
        let found = cache.get(AssetClass::Stocks, "aapl", now).await;
        assert_eq!(found.unwrap().price, 100.0);
    }

    #[tokio::test]
    async fn test_get_miss_before_any_set() {
        let cache = Cache::open_in_memory(60).await.unwrap();
        let now = Utc::now();
        assert!(cache.get(AssetClass::Stocks, "AAPL", now).await.is_none());
    }

    #[tokio::test]
    async fn test_expiry_is_exact_boundary_miss() {
        let cache = Cache::open_in_memory(60).await.unwrap();
        let now = Utc::now();
        let quote = sample_quote("AAPL", 100.0, now);
        cache.set(AssetClass::Stocks, "AAPL", &quote, now).await;

        // Still valid one second before expiry.
        let almost = now + chrono::Duration::seconds(59);
        assert!(cache.get(AssetClass::Stocks, "AAPL", almost).await.is_some());

        // Exactly at expires_at is a miss.
        let at_expiry = now + chrono::Duration::seconds(60);
        assert!(cache.get(AssetClass::Stocks, "AAPL", at_expiry).await.is_none());
    }

    #[tokio::test]
    async fn test_clear_expired_idempotent() {
        let cache = Cache::open_in_memory(60).await.unwrap();
        let now = Utc::now();
        let quote = sample_quote("AAPL", 100.0, now);
        cache.set(AssetClass::Stocks, "AAPL", &quote, now).await;

        let later = now + chrono::Duration::seconds(120);
        let first = cache.clear_expired(later).await.unwrap();
        assert_eq!(first, 1);

        let second = cache.clear_expired(later).await.unwrap();
        assert_eq!(second, 0);
    }

    #[tokio::test]
    async fn test_invalidate() {
        let cache = Cache::open_in_memory(60).await.unwrap();
        let now = Utc::now();
        let quote = sample_quote("AAPL", 100.0, now);
        cache.set(AssetClass::Stocks, "AAPL", &quote, now).await;

        assert!(cache.invalidate(AssetClass::Stocks, "AAPL").await.unwrap());
        assert!(cache.get(AssetClass::Stocks, "AAPL", now).await.is_none());
        assert!(!cache.invalidate(AssetClass::Stocks, "AAPL").await.unwrap());
    }

    #[tokio::test]
    async fn test_hit_count_increments() {
        let cache = Cache::open_in_memory(60).await.unwrap();
        let now = Utc::now();
        let quote = sample_quote("AAPL", 100.0, now);
        cache.set(AssetClass::Stocks, "AAPL", &quote, now).await;

        cache.get(AssetClass::Stocks, "AAPL", now).await;
        cache.get(AssetClass::Stocks, "AAPL", now).await;

        let stats = cache.statistics(now).await.unwrap();
        assert_eq!(stats.total_hits, 2);
        assert_eq!(stats.total_entries, 1);
    }

    #[tokio::test]
    async fn test_key_normalization_case_insensitive() {
        let cache = Cache::open_in_memory(60).await.unwrap();
        let now = Utc::now();
        let quote = sample_quote("aapl", 100.0, now);
        cache.set(AssetClass::Stocks, "aapl", &quote, now).await;

        assert!(cache.get(AssetClass::Stocks, "AAPL", now).await.is_some());
    }
}
