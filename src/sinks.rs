//! Output sinks: where the scheduler's collected quotes go. Deliberately
//! hand-rolled rather than pulled from a CSV crate — the format is three
//! fixed columns plus a handful of optionals, not worth a dependency.

use crate::domain::Quote;
use crate::error::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

/// Receives successfully-collected quotes. Sinks are external collaborators;
/// the scheduler does not care about their output format.
#[async_trait]
pub trait QuoteSink: Send + Sync {
    async fn write(&self, quote: &Quote) -> Result<()>;
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn opt_num(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Appends one row per quote to a CSV file, writing the header once if the
/// file does not already exist.
pub struct CsvSink {
    path: PathBuf,
    lock: Mutex<()>,
}

const CSV_HEADER: &str = "symbol,asset_class,price,change,change_percent,volume,day_high,day_low,week52_high,week52_low,open,previous_close,currency,source,collected_at";

impl CsvSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn row(quote: &Quote) -> String {
        format!(
            "{},{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
            csv_escape(&quote.symbol),
            quote.asset_class,
            quote.price,
            opt_num(quote.change),
            opt_num(quote.change_percent),
            quote.volume.map(|v| v.to_string()).unwrap_or_default(),
            opt_num(quote.day_high),
            opt_num(quote.day_low),
            opt_num(quote.week52_high),
            opt_num(quote.week52_low),
            opt_num(quote.open),
            opt_num(quote.previous_close),
            quote.currency.as_deref().map(csv_escape).unwrap_or_default(),
            quote.source,
            quote.collected_at.to_rfc3339(),
        )
    }
}

#[async_trait]
impl QuoteSink for CsvSink {
    async fn write(&self, quote: &Quote) -> Result<()> {
        let _guard = self.lock.lock().await;
        let is_new = !tokio::fs::try_exists(&self.path).await.unwrap_or(false);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        if is_new {
            file.write_all(CSV_HEADER.as_bytes()).await?;
            file.write_all(b"\n").await?;
        }

        file.write_all(Self::row(quote).as_bytes()).await?;
        file.write_all(b"\n").await?;
        debug!(symbol = %quote.symbol, path = %self.path.display(), "csv sink wrote row");
        Ok(())
    }
}

/// Appends one JSON object per line.
pub struct JsonlSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl QuoteSink for JsonlSink {
    async fn write(&self, quote: &Quote) -> Result<()> {
        let _guard = self.lock.lock().await;
        let line = serde_json::to_string(quote)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        debug!(symbol = %quote.symbol, path = %self.path.display(), "jsonl sink wrote row");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AssetClass, BackendTag};
    use chrono::Utc;

    fn sample() -> Quote {
        let mut q = Quote::new("AAPL", AssetClass::Stocks, 100.25, BackendTag::Free, Utc::now());
        q.change = Some(1.5);
        q.currency = Some("USD".to_string());
        q
    }

    #[tokio::test]
    async fn test_csv_sink_writes_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quotes.csv");
        let sink = CsvSink::new(&path);

        sink.write(&sample()).await.unwrap();
        sink.write(&sample()).await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], CSV_HEADER);
        assert!(lines[1].starts_with("AAPL,stocks,100.25"));
    }

    #[tokio::test]
    async fn test_csv_escape_handles_commas_and_quotes() {
        assert_eq!(csv_escape("plain"), "plain");
        assert_eq!(csv_escape("a,b"), "\"a,b\"");
        assert_eq!(csv_escape("a\"b"), "\"a\"\"b\"");
    }

    #[tokio::test]
    async fn test_jsonl_sink_round_trips_one_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quotes.jsonl");
        let sink = JsonlSink::new(&path);

        sink.write(&sample()).await.unwrap();
        sink.write(&sample()).await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let parsed: Quote = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed.symbol, "AAPL");
        assert_eq!(parsed.price, 100.25);
    }
}
