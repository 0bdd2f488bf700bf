//! Cron-driven background refresh of exchange rates.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use cron::Schedule;
use log::{error, info, warn};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::service::CurrencyService;

pub struct RefreshScheduler {
    schedule: Schedule,
    service: Arc<CurrencyService>,
}

impl RefreshScheduler {
    /// `cron_expr` uses the six-field form with seconds, e.g. `0 0 * * * *`.
    pub fn new(cron_expr: &str, service: Arc<CurrencyService>) -> Result<Self> {
        let schedule = Schedule::from_str(cron_expr)
            .with_context(|| format!("Invalid cron expression: {cron_expr}"))?;

        Ok(Self { schedule, service })
    }

    pub fn next_run_from(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&from).next()
    }

    pub fn spawn(self, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Runs one refresh per tick until a shutdown signal arrives. A failed
    /// cycle is logged and retried on the next tick only.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!("Exchange rate scheduler started");

        loop {
            let now = Utc::now();
            let Some(next) = self.next_run_from(now) else {
                warn!("Cron schedule has no upcoming runs, scheduler stopped");
                return;
            };
            let delay = (next - now).to_std().unwrap_or(Duration::ZERO);

            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Exchange rate scheduler stopped");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            if let Err(err) = self.service.refresh_rates().await {
                error!("Exchange rate refresh failed: {}", err);
            }
        }
    }
}
