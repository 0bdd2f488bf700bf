//! Remote sources of the latest exchange rates.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::cache::Snapshot;
use crate::error::{CurrencyError, CurrencyResult};

#[async_trait]
pub trait RateProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Fetches a full snapshot. Any failure, including an empty response,
    /// is reported as [`CurrencyError::UpstreamUnavailable`].
    async fn fetch_latest_rates(&self) -> CurrencyResult<Snapshot>;
}

pub(crate) fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .context("Can't build HTTP client")
}

pub(crate) async fn load_text(client: &Client, url: &str) -> Result<String> {
    let resp = client.get(url).send().await?;
    if !resp.status().is_success() {
        anyhow::bail!("Can't download rates: {}", resp.status());
    }

    let text = resp.text().await?;

    Ok(text)
}

pub(crate) fn upstream(provider: &str, err: anyhow::Error) -> CurrencyError {
    CurrencyError::UpstreamUnavailable(format!("{provider}: {err:#}"))
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: Option<i64>,
    info: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LatestRatesResponse {
    #[serde(default = "default_success")]
    success: bool,
    #[serde(default)]
    rates: BTreeMap<String, Decimal>,
    error: Option<ApiError>,
}

fn default_success() -> bool {
    true
}

/// Client for the exchangeratesapi.io `latest` endpoint.
pub struct ExchangeRatesApiClient {
    client: Client,
    url: String,
    access_key: String,
}

impl ExchangeRatesApiClient {
    pub fn new(url: &str, access_key: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            url: url.to_string(),
            access_key: access_key.to_string(),
        })
    }

    async fn fetch(&self) -> Result<Snapshot> {
        let url = Url::parse_with_params(&self.url, [("access_key", &self.access_key)])
            .with_context(|| format!("Invalid rates URL: {}", self.url))?;
        let text = load_text(&self.client, url.as_str()).await?;
        let response: LatestRatesResponse =
            serde_json::from_str(&text).context("Malformed rates response")?;

        if !response.success {
            let (code, info) = response
                .error
                .map(|e| (e.code.unwrap_or_default(), e.info.unwrap_or_default()))
                .unwrap_or_default();
            anyhow::bail!("API error {}: {}", code, info);
        }
        if response.rates.is_empty() {
            anyhow::bail!("Response contains no rates");
        }

        Ok(response.rates)
    }
}

#[async_trait]
impl RateProvider for ExchangeRatesApiClient {
    fn name(&self) -> &str {
        "exchangerates"
    }

    async fn fetch_latest_rates(&self) -> CurrencyResult<Snapshot> {
        self.fetch().await.map_err(|err| upstream(self.name(), err))
    }
}
