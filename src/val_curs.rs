//! Central Bank of Russia daily rates feed (`XML_daily.asp`).

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde::Serialize;

use crate::cache::Snapshot;
use crate::error::CurrencyResult;
use crate::provider::{RateProvider, http_client, load_text, upstream};

#[derive(Debug, Deserialize, Serialize, PartialEq)]
pub struct Valute {
    #[serde(rename = "CharCode")]
    pub char_code: String,
    #[serde(rename = "VunitRate")]
    pub vunit_rate: String,
}

#[derive(Debug, Deserialize, Serialize, PartialEq)]
pub struct ValCurs {
    #[serde(rename = "Valute", default)]
    pub valute: Vec<Valute>,
}

impl ValCurs {
    pub fn to_snapshot(&self) -> Result<Snapshot> {
        let mut map = Snapshot::new();

        for valute in &self.valute {
            let normalized_string = normalize_decimal_string(&valute.vunit_rate);
            let value = Decimal::from_str(&normalized_string)
                .with_context(|| format!("Invalid rate for {}", valute.char_code))?;
            map.insert(valute.char_code.clone(), value);
        }

        Ok(map)
    }
}

fn normalize_decimal_string(s: &str) -> String {
    s.trim().replace(',', ".")
}

pub struct CbrClient {
    client: Client,
    url: String,
}

impl CbrClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            url: url.to_string(),
        })
    }

    fn get_url(&self, date: NaiveDate) -> String {
        format!("{}?date_req={}", self.url, date.format("%d/%m/%Y"))
    }

    async fn fetch(&self, date: NaiveDate) -> Result<Snapshot> {
        let text = load_text(&self.client, &self.get_url(date)).await?;
        let val_curs: ValCurs = quick_xml::de::from_str(&text).context("Malformed XML")?;
        let rates = val_curs.to_snapshot()?;
        if rates.is_empty() {
            anyhow::bail!("No rates published for {}", date);
        }

        Ok(rates)
    }
}

#[async_trait]
impl RateProvider for CbrClient {
    fn name(&self) -> &str {
        "cbr"
    }

    async fn fetch_latest_rates(&self) -> CurrencyResult<Snapshot> {
        let today = Utc::now().date_naive();
        self.fetch(today).await.map_err(|err| upstream(self.name(), err))
    }
}
