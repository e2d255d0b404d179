//! HTTP client for the indicator sidecar that publishes per-candle event vectors.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use chrono::{DateTime, Utc};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

use crate::models::CandleEvents;

use super::types::WindowResponse;
use super::{validate_window, IndicatorProvider};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RETRY_ELAPSED: Duration = Duration::from_secs(60);

/// Polls the sidecar until a newly closed candle shows up.
pub struct IndicatorClient {
    client: Client,
    base_url: String,
    symbol: String,
    interval: String,
    limit: usize,
    poll_interval: Duration,
    last_candle: Option<DateTime<Utc>>,
}

impl IndicatorClient {
    pub fn with_base_url(
        base_url: String,
        symbol: String,
        interval: String,
        limit: usize,
        poll_interval: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            symbol,
            interval,
            limit,
            poll_interval,
            last_candle: None,
        })
    }

    pub fn window_url(&self) -> String {
        format!(
            "{}/v1/window?symbol={}&interval={}&limit={}",
            self.base_url, self.symbol, self.interval, self.limit
        )
    }

    /// Fetch the current trailing window. Server errors and transport failures
    /// are retried with exponential backoff; client errors are not.
    pub async fn fetch_window(&self) -> Result<Vec<CandleEvents>> {
        let url = self.window_url();
        debug!(url = %url, "Fetching indicator window");

        let policy = ExponentialBackoffBuilder::new()
            .with_max_elapsed_time(Some(MAX_RETRY_ELAPSED))
            .build();

        let client = &self.client;
        let url = url.as_str();
        let response: WindowResponse = backoff::future::retry(policy, || async move {
            let response = client.get(url).send().await.map_err(|e| {
                warn!(error = %e, "Indicator request failed, retrying");
                backoff::Error::transient(anyhow!(e).context("Failed to fetch indicator window"))
            })?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let err = anyhow!("Indicator window request failed: {} - {}", status, body);
                return if status.is_client_error() {
                    Err(backoff::Error::permanent(err))
                } else {
                    warn!(status = %status, "Indicator service error, retrying");
                    Err(backoff::Error::transient(err))
                };
            }

            response
                .json::<WindowResponse>()
                .await
                .map_err(|e| backoff::Error::permanent(anyhow!(e).context("Failed to parse indicator window")))
        })
        .await?;

        Ok(response.candles)
    }
}

#[async_trait]
impl IndicatorProvider for IndicatorClient {
    async fn next_window(&mut self) -> Result<Option<Vec<CandleEvents>>> {
        loop {
            let window = self.fetch_window().await?;
            validate_window(&window)?;

            let newest = window.last().map(|c| c.candle.time);
            if newest > self.last_candle {
                self.last_candle = newest;
                return Ok(Some(window));
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
