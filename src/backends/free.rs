//! The free backend: a non-monetary-cost quote source. Out of scope per the
//! component boundary are the concrete HTTP library and HTML/JSON parsing
//! details it would use in production; this adapter implements the uniform
//! [`BackendAdapter`] contract against a minimal JSON quote endpoint so the
//! rest of the system has a real, runnable implementation to drive.

use super::BackendAdapter;
use crate::domain::{AssetClass, BackendTag, Quote};
use crate::error::AdapterError;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct FreeQuotePayload {
    price: f64,
    change: Option<f64>,
    change_percent: Option<f64>,
    volume: Option<u64>,
    day_high: Option<f64>,
    day_low: Option<f64>,
    open: Option<f64>,
    previous_close: Option<f64>,
    currency: Option<String>,
}

/// Thin client over the free backend's quote endpoint.
pub struct FreeAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl FreeAdapter {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl BackendAdapter for FreeAdapter {
    async fn fetch_quote(
        &self,
        native_symbol: &str,
        asset_class: AssetClass,
        timeout: Duration,
    ) -> Result<Quote, AdapterError> {
        debug!("free: fetching {}", native_symbol);

        let url = format!("{}/quote/{}", self.base_url, native_symbol);
        let response = tokio::time::timeout(timeout, self.client.get(&url).send())
            .await
            .map_err(|_| AdapterError::Transport("free backend request timed out".into()))?
            .map_err(|e| AdapterError::Transport(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(AdapterError::RateLimited(format!(
                "free backend rate limited: {status}"
            )));
        }
        if status.is_server_error() {
            return Err(AdapterError::Server(format!(
                "free backend returned {status}"
            )));
        }
        if !status.is_success() {
            return Err(AdapterError::Server(format!(
                "free backend returned {status}"
            )));
        }

        let payload: FreeQuotePayload = response
            .json()
            .await
            .map_err(|e| AdapterError::Parse(e.to_string()))?;

        let mut quote = Quote::new(
            native_symbol,
            asset_class,
            payload.price,
            BackendTag::Free,
            Utc::now(),
        );
        quote.change = payload.change;
        quote.change_percent = payload.change_percent;
        quote.volume = payload.volume;
        quote.day_high = payload.day_high;
        quote.day_low = payload.day_low;
        quote.open = payload.open;
        quote.previous_close = payload.previous_close;
        quote.currency = payload.currency;

        Ok(quote)
    }

    fn name(&self) -> &'static str {
        "free"
    }
}
