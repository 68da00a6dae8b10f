use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use async_trait::async_trait;
use common::models::Granularity;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::remote::{CandleRows, SpotPriceResponse, aggregate};
use crate::traits::{Candle, CandleSource, PriceOracle};

/// The exchange serves at most this many bars per request.
const MAX_CANDLES_PER_REQUEST: usize = 300;

/// Coinbase public endpoints: retail spot prices and exchange candles. No credentials needed.
#[derive(Clone)]
pub struct CoinbaseClient {
    client: Client,
    api_url: String,
    exchange_url: String,
    semaphore: Arc<Semaphore>,
    max_retries: u32,
}

impl CoinbaseClient {
    pub fn new(api_url: &str, exchange_url: &str) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent("virtual_trader/0.1.0")
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            exchange_url: exchange_url.trim_end_matches('/').to_string(),
            semaphore: Arc::new(Semaphore::new(5)),
            max_retries: 3,
        })
    }

    /// Source bar size served natively and how many of them make one requested bar.
    fn native(granularity: Granularity) -> (Granularity, usize) {
        match granularity {
            Granularity::FourHour => (Granularity::OneHour, 4),
            Granularity::OneWeek => (Granularity::OneDay, 7),
            other => (other, 1),
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> anyhow::Result<T> {
        let mut retry_count = 0;

        loop {
            let permit = self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .context("Failed to acquire semaphore permit")?;
            let result = self.make_request::<T>(url, query).await;
            drop(permit);

            match result {
                Ok(body) => return Ok(body),
                Err(e) if Self::is_rate_limit_error(&e) => {
                    retry_count += 1;
                    if retry_count > self.max_retries {
                        bail!("Max retries exceeded for rate limit on {}", url);
                    }
                    let backoff_seconds = 2_u64.pow(retry_count);
                    warn!(
                        "Rate limited on {}, backing off for {} seconds (attempt {}/{})",
                        url, backoff_seconds, retry_count, self.max_retries
                    );
                    sleep(Duration::from_secs(backoff_seconds)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn make_request<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> anyhow::Result<T> {
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        if status == 429 {
            bail!("HTTP 429: Too Many Requests");
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("HTTP {} from {}: {}", status, url, body);
        }

        response
            .json::<T>()
            .await
            .context("Failed to parse JSON response")
    }

    fn is_rate_limit_error(error: &anyhow::Error) -> bool {
        error.to_string().contains("429")
    }
}

#[async_trait]
impl PriceOracle for CoinbaseClient {
    async fn spot_price(&self, symbol: &str) -> anyhow::Result<Decimal> {
        let url = format!("{}/v2/prices/{}/spot", self.api_url, symbol);
        let body: SpotPriceResponse = self
            .get_json(&url, &[])
            .await
            .with_context(|| format!("Spot price for {}", symbol))?;
        let price = body.price()?;
        debug!("Spot {} = {}", symbol, price);
        Ok(price)
    }
}

#[async_trait]
impl CandleSource for CoinbaseClient {
    async fn candles(
        &self,
        product: &str,
        granularity: Granularity,
        limit: usize,
    ) -> anyhow::Result<Vec<Candle>> {
        let (source, per_bucket) = Self::native(granularity);
        if limit * per_bucket > MAX_CANDLES_PER_REQUEST {
            debug!(
                "{} {:?}: asked for {} bars, one request covers {}",
                product,
                granularity,
                limit,
                MAX_CANDLES_PER_REQUEST / per_bucket
            );
        }
        let url = format!("{}/products/{}/candles", self.exchange_url, product);
        let rows: CandleRows = self
            .get_json(&url, &[("granularity", source.seconds().to_string())])
            .await
            .with_context(|| format!("Candles for {} at {:?}", product, granularity))?;

        let mut candles = rows.into_candles();
        if per_bucket > 1 {
            candles = aggregate(&candles, granularity.seconds() as i64, per_bucket);
        }
        if candles.len() > limit {
            candles.drain(..candles.len() - limit);
        }
        debug!("Fetched {} {:?} candles for {}", candles.len(), granularity, product);
        Ok(candles)
    }
}
