use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};

use crate::service::SYSTEM_USERNAME;

const DEFAULT_EXCHANGE_RATES_API_URL: &str = "http://api.exchangeratesapi.io/v1/latest";
const DEFAULT_CBR_API_URL: &str = "https://cbr.ru/scripts/XML_daily.asp";
const DEFAULT_CRON: &str = "0 0 * * * *";

#[derive(Debug, Clone, PartialEq)]
pub enum ProviderConfig {
    ExchangeRates { url: String, access_key: String },
    Cbr { url: String },
}

/// Process-wide settings, read once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub bind_address: String,
    pub provider: ProviderConfig,
    pub provider_timeout: Duration,
    pub refresh_cron: String,
    pub system_username: String,
}

impl Config {
    /// Reads the process environment, after loading `.env` if present.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let required = |key: &str| {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| anyhow!("{key} must be set"))
        };

        let provider = match var("RATES_PROVIDER", "exchangerates").as_str() {
            "exchangerates" => ProviderConfig::ExchangeRates {
                url: var("EXCHANGE_RATES_API_URL", DEFAULT_EXCHANGE_RATES_API_URL),
                access_key: required("EXCHANGE_RATES_API_KEY")?,
            },
            "cbr" => ProviderConfig::Cbr {
                url: var("CBR_API_URL", DEFAULT_CBR_API_URL),
            },
            other => anyhow::bail!("Unknown RATES_PROVIDER: {other}"),
        };

        let refresh_cron = var("CURRENCY_UPDATE_CRON", DEFAULT_CRON);
        cron::Schedule::from_str(&refresh_cron)
            .with_context(|| format!("Invalid CURRENCY_UPDATE_CRON: {refresh_cron}"))?;

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            database_max_connections: parse(&lookup, "DATABASE_MAX_CONNECTIONS", 5)?,
            bind_address: var("HTTP_BIND_ADDRESS", "127.0.0.1:8080"),
            provider,
            provider_timeout: Duration::from_secs(parse(&lookup, "PROVIDER_TIMEOUT_SECS", 10)?),
            refresh_cron,
            system_username: var("SYSTEM_USERNAME", SYSTEM_USERNAME),
        })
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(value) => value
            .parse()
            .with_context(|| format!("Invalid {key}: {value}")),
        None => Ok(default),
    }
}
