//! The paid backend: a Bearer-authenticated scraping service, billed per
//! logical call regardless of how many transport retries it took. Wire
//! protocol and HTML extraction are out of scope for this crate's core; this
//! adapter implements the uniform [`BackendAdapter`] contract against a JSON
//! quote endpoint that stands in for it.

use super::BackendAdapter;
use crate::domain::{AssetClass, BackendTag, Quote};
use crate::error::AdapterError;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, warn};

/// Maximum transport-level retries within a single logical `fetch_quote`
/// call. Retries do not generate additional `RecordRequest` calls upstream —
/// the tracker is charged once per logical call.
const MAX_RETRIES: usize = 3;
const INITIAL_RETRY_DELAY_MS: u64 = 500;

#[derive(Debug, Deserialize)]
struct PaidQuotePayload {
    price: f64,
    change: Option<f64>,
    change_percent: Option<f64>,
    volume: Option<u64>,
    day_high: Option<f64>,
    day_low: Option<f64>,
    week52_high: Option<f64>,
    week52_low: Option<f64>,
    open: Option<f64>,
    previous_close: Option<f64>,
    currency: Option<String>,
}

pub struct PaidAdapter {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl PaidAdapter {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            token: token.into(),
        }
    }

    async fn call_once(
        &self,
        native_symbol: &str,
        timeout: Duration,
    ) -> Result<PaidQuotePayload, AdapterError> {
        let url = format!("{}/v1/quote", self.base_url);

        let response = tokio::time::timeout(
            timeout,
            self.client
                .post(&url)
                .bearer_auth(&self.token)
                .json(&serde_json::json!({ "symbol": native_symbol }))
                .send(),
        )
        .await
        .map_err(|_| AdapterError::Transport("paid backend request timed out".into()))?
        .map_err(|e| AdapterError::Transport(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(AdapterError::Auth(format!(
                "paid backend rejected credentials: {status}"
            )));
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(AdapterError::RateLimited(format!(
                "paid backend rate limited: {status}"
            )));
        }
        if status.is_server_error() {
            return Err(AdapterError::Server(format!(
                "paid backend returned {status}"
            )));
        }
        if !status.is_success() {
            return Err(AdapterError::Server(format!(
                "paid backend returned {status}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AdapterError::Parse(e.to_string()))
    }
}

#[async_trait]
impl BackendAdapter for PaidAdapter {
    async fn fetch_quote(
        &self,
        native_symbol: &str,
        asset_class: AssetClass,
        timeout: Duration,
    ) -> Result<Quote, AdapterError> {
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let delay =
                    Duration::from_millis(INITIAL_RETRY_DELAY_MS * 2u64.pow(attempt as u32 - 1));
                info!(
                    "paid: retrying {} (attempt {}/{}) after {:?}",
                    native_symbol,
                    attempt + 1,
                    MAX_RETRIES,
                    delay
                );
                tokio::time::sleep(delay).await;
            }

            match self.call_once(native_symbol, timeout).await {
                Ok(payload) => {
                    let mut quote = Quote::new(
                        native_symbol,
                        asset_class,
                        payload.price,
                        BackendTag::Paid,
                        Utc::now(),
                    );
                    quote.change = payload.change;
                    quote.change_percent = payload.change_percent;
                    quote.volume = payload.volume;
                    quote.day_high = payload.day_high;
                    quote.day_low = payload.day_low;
                    quote.week52_high = payload.week52_high;
                    quote.week52_low = payload.week52_low;
                    quote.open = payload.open;
                    quote.previous_close = payload.previous_close;
                    quote.currency = payload.currency;
                    return Ok(quote);
                }
                Err(AdapterError::Auth(msg)) => {
                    // Not retried: credentials are not going to start
                    // working on the next attempt.
                    warn!("paid: auth error for {}: {}", native_symbol, msg);
                    return Err(AdapterError::Auth(msg));
                }
                Err(e @ (AdapterError::RateLimited(_) | AdapterError::Server(_))) => {
                    warn!(
                        "paid: transient error for {} (attempt {}): {}",
                        native_symbol,
                        attempt + 1,
                        e
                    );
                    last_error = Some(e);
                }
                Err(e) => {
                    // Transport/Parse: not worth blind retries beyond the
                    // loop's own bound, but still eligible structurally.
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            AdapterError::Server(format!(
                "paid backend failed after {MAX_RETRIES} attempts with no recorded error"
            ))
        }))
    }

    fn name(&self) -> &'static str {
        "paid"
    }
}
