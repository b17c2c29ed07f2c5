//! Canonical data model: asset classes, backend tags, and the normalized
//! `Quote` record that every backend adapter must produce.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The coarse category of a tracked instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    Stocks,
    Forex,
    Commodities,
    Index,
    Crypto,
}

impl AssetClass {
    /// Lowercase form used in cache keys, log fields, and the persistence
    /// schema's `requests_by_asset` map.
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetClass::Stocks => "stocks",
            AssetClass::Forex => "forex",
            AssetClass::Commodities => "commodities",
            AssetClass::Index => "index",
            AssetClass::Crypto => "crypto",
        }
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AssetClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stocks" => Ok(AssetClass::Stocks),
            "forex" => Ok(AssetClass::Forex),
            "commodities" => Ok(AssetClass::Commodities),
            "index" => Ok(AssetClass::Index),
            "crypto" => Ok(AssetClass::Crypto),
            other => Err(format!("unknown asset class: {other}")),
        }
    }
}

/// Which backend produced a quote (or `Cache`, for a cache hit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendTag {
    Cache,
    Free,
    Paid,
}

impl fmt::Display for BackendTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BackendTag::Cache => "cache",
            BackendTag::Free => "free",
            BackendTag::Paid => "paid",
        };
        write!(f, "{}", s)
    }
}

/// The canonical normalized quote record.
///
/// `symbol` and `asset_class` together form the identity used by the cache
/// and in logs; every other numeric field besides `price` is optional
/// because not every backend surfaces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub asset_class: AssetClass,
    pub price: f64,
    pub change: Option<f64>,
    pub change_percent: Option<f64>,
    pub volume: Option<u64>,
    pub day_high: Option<f64>,
    pub day_low: Option<f64>,
    pub week52_high: Option<f64>,
    pub week52_low: Option<f64>,
    pub open: Option<f64>,
    pub previous_close: Option<f64>,
    pub currency: Option<String>,
    pub source: BackendTag,
    pub collected_at: chrono::DateTime<chrono::Utc>,
}

impl Quote {
    /// Construct a minimal quote, leaving all optional fields unset.
    pub fn new(
        symbol: impl Into<String>,
        asset_class: AssetClass,
        price: f64,
        source: BackendTag,
        collected_at: chrono::DateTime<chrono::Utc>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            asset_class,
            price,
            change: None,
            change_percent: None,
            volume: None,
            day_high: None,
            day_low: None,
            week52_high: None,
            week52_low: None,
            open: None,
            previous_close: None,
            currency: None,
            source,
            collected_at,
        }
    }

    /// Return a copy tagged with a different source, used when a cache hit
    /// returns a payload that was originally written by `free` or `paid`.
    pub fn with_source(&self, source: BackendTag) -> Self {
        let mut q = self.clone();
        q.source = source;
        q
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_class_round_trip() {
        for class in [
            AssetClass::Stocks,
            AssetClass::Forex,
            AssetClass::Commodities,
            AssetClass::Index,
            AssetClass::Crypto,
        ] {
            let s = class.as_str();
            assert_eq!(AssetClass::from_str(s).unwrap(), class);
            assert_eq!(AssetClass::from_str(&s.to_uppercase()).unwrap(), class);
        }
    }

    #[test]
    fn test_backend_tag_display() {
        assert_eq!(BackendTag::Cache.to_string(), "cache");
        assert_eq!(BackendTag::Free.to_string(), "free");
        assert_eq!(BackendTag::Paid.to_string(), "paid");
    }
}
