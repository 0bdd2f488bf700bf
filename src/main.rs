use std::sync::Arc;

use actix_web::{App, HttpServer, middleware::Logger};
use anyhow::{Context, Result};
use log::info;
use tokio::sync::broadcast;
use valut::config::{Config, ProviderConfig};
use valut::provider::{ExchangeRatesApiClient, RateProvider};
use valut::scheduler::RefreshScheduler;
use valut::store::PgStore;
use valut::val_curs::CbrClient;
use valut::{CurrencyService, api};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let store = Arc::new(
        PgStore::connect(&config.database_url, config.database_max_connections)
            .await
            .context("Can't connect to the database")?,
    );
    store.migrate().await.context("Can't apply migrations")?;

    let provider = build_provider(&config)?;
    let service = Arc::new(
        CurrencyService::new(provider, store.clone(), store)
            .with_system_username(&config.system_username),
    );
    service
        .verify_system_user()
        .await
        .context("Refresh can't be scheduled")?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let scheduler = RefreshScheduler::new(&config.refresh_cron, service.clone())?.spawn(shutdown_rx);

    info!("Listening on {}", config.bind_address);
    let data = api::app_data(service);
    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(data.clone())
            .configure(api::configure)
    })
    .bind(&config.bind_address)
    .with_context(|| format!("Can't bind {}", config.bind_address))?
    .run()
    .await?;

    shutdown_tx.send(()).ok();
    scheduler.await?;

    Ok(())
}

fn build_provider(config: &Config) -> Result<Arc<dyn RateProvider>> {
    let provider: Arc<dyn RateProvider> = match &config.provider {
        ProviderConfig::ExchangeRates { url, access_key } => Arc::new(ExchangeRatesApiClient::new(
            url,
            access_key,
            config.provider_timeout,
        )?),
        ProviderConfig::Cbr { url } => Arc::new(CbrClient::new(url, config.provider_timeout)?),
    };

    Ok(provider)
}
