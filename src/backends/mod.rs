//! Backend adapters: the uniform interface HybridSource consumes, plus the
//! per-asset-class symbol conversion tables each adapter needs before it can
//! call out.
//!
//! Adapters are responsible for HTTP, parsing, and normalization. They must
//! never touch the cache, the cost tracker, or a circuit breaker — those
//! concerns belong to HybridSource.

pub mod free;
pub mod paid;

use crate::domain::{AssetClass, Quote};
use crate::error::AdapterError;
use async_trait::async_trait;
use std::time::Duration;

/// A single quote provider. `fetch_quote` takes the *native* symbol already
/// converted for this backend (see [`free_native_symbol`] /
/// [`paid_native_symbol`]) and a per-call deadline.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    async fn fetch_quote(
        &self,
        native_symbol: &str,
        asset_class: AssetClass,
        timeout: Duration,
    ) -> Result<Quote, AdapterError>;

    /// Name used in logs and statistics, e.g. `"free"` / `"paid"`.
    fn name(&self) -> &'static str;
}

/// Convert a canonical symbol to the free backend's native form.
///
/// Returns `None` for asset classes the free backend does not cover (index,
/// per the conversion table) — callers must skip the free path entirely
/// rather than pass through the canonical symbol unconverted.
pub fn free_native_symbol(asset_class: AssetClass, symbol: &str) -> Option<String> {
    let symbol = symbol.to_ascii_uppercase();
    match asset_class {
        AssetClass::Stocks => Some(symbol),
        AssetClass::Forex => Some(format!("{symbol}=X")),
        AssetClass::Commodities => Some(format!("{symbol}=F")),
        AssetClass::Index => None,
        AssetClass::Crypto => Some(to_crypto_dash_pair(&symbol)),
    }
}

/// Convert a canonical symbol to the paid backend's native form. The paid
/// backend covers every asset class.
pub fn paid_native_symbol(asset_class: AssetClass, symbol: &str) -> String {
    let symbol = symbol.to_ascii_uppercase();
    match asset_class {
        AssetClass::Stocks => format!("{symbol}:US"),
        AssetClass::Forex => format!("{symbol}:CUR"),
        AssetClass::Commodities => format!("{symbol}1:COM"),
        AssetClass::Index => format!("{symbol}:IND"),
        AssetClass::Crypto => {
            let (base, quote) = split_crypto_pair(&symbol);
            format!("X{}{}:CUR", iso_crypto_base(base), quote)
        }
    }
}

/// `BTCUSD` -> `BTC-USD`. Assumes a 3-letter quote currency suffix, which
/// holds for every crypto symbol in the tracked universe (`USD`, `EUR`,
/// ...).
fn to_crypto_dash_pair(symbol: &str) -> String {
    let (base, quote) = split_crypto_pair(symbol);
    if quote.is_empty() {
        base.to_string()
    } else {
        format!("{base}-{quote}")
    }
}

/// Splits `BTCUSD` into (`BTC`, `USD`), assuming a 3-letter quote currency
/// suffix. Returns `(symbol, "")` if the symbol is too short to split.
fn split_crypto_pair(symbol: &str) -> (&str, &str) {
    if symbol.len() > 3 {
        symbol.split_at(symbol.len() - 3)
    } else {
        (symbol, "")
    }
}

/// Maps a crypto base currency to the ISO 4217-style code the paid backend
/// expects (`BTC` -> `XBT`, as used by Kraken/Bitstamp-style feeds). Bases
/// with no such alias pass through unchanged.
fn iso_crypto_base(base: &str) -> String {
    match base {
        "BTC" => "XBT".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_native_symbol_table() {
        assert_eq!(
            free_native_symbol(AssetClass::Stocks, "aapl"),
            Some("AAPL".to_string())
        );
        assert_eq!(
            free_native_symbol(AssetClass::Forex, "eurusd"),
            Some("EURUSD=X".to_string())
        );
        assert_eq!(
            free_native_symbol(AssetClass::Commodities, "gc"),
            Some("GC=F".to_string())
        );
        assert_eq!(free_native_symbol(AssetClass::Index, "sensex"), None);
        assert_eq!(
            free_native_symbol(AssetClass::Crypto, "btcusd"),
            Some("BTC-USD".to_string())
        );
    }

    #[test]
    fn test_paid_native_symbol_table() {
        assert_eq!(paid_native_symbol(AssetClass::Stocks, "aapl"), "AAPL:US");
        assert_eq!(
            paid_native_symbol(AssetClass::Forex, "eurusd"),
            "EURUSD:CUR"
        );
        assert_eq!(
            paid_native_symbol(AssetClass::Commodities, "gc"),
            "GC1:COM"
        );
        assert_eq!(paid_native_symbol(AssetClass::Index, "sensex"), "SENSEX:IND");
        assert_eq!(
            paid_native_symbol(AssetClass::Crypto, "btcusd"),
            "XBTUSD:CUR"
        );
    }
}
