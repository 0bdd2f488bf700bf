//! Exchange rate orchestration: scheduled refresh, reads, and manual additions.

use std::sync::Arc;

use chrono::Utc;
use log::{debug, info, warn};
use rust_decimal::Decimal;

use crate::cache::{RateCache, Snapshot};
use crate::error::{CurrencyError, CurrencyResult};
use crate::exchange_rate::{ExchangeRate, User, UserId};
use crate::provider::RateProvider;
use crate::store::{RateStore, UserStore};

pub const SYSTEM_USERNAME: &str = "SYSTEM";

pub struct CurrencyService {
    provider: Arc<dyn RateProvider>,
    rates: Arc<dyn RateStore>,
    users: Arc<dyn UserStore>,
    cache: RateCache,
    system_username: String,
}

impl CurrencyService {
    pub fn new(
        provider: Arc<dyn RateProvider>,
        rates: Arc<dyn RateStore>,
        users: Arc<dyn UserStore>,
    ) -> Self {
        Self {
            provider,
            rates,
            users,
            cache: RateCache::new(),
            system_username: SYSTEM_USERNAME.to_string(),
        }
    }

    /// Attributes scheduled refreshes to a different user than [`SYSTEM_USERNAME`].
    pub fn with_system_username(mut self, username: &str) -> Self {
        self.system_username = username.to_string();
        self
    }

    /// Pulls a snapshot from the provider, upserts it in one batch and then
    /// publishes it to the cache. Nothing is cached unless the batch commits.
    pub async fn refresh_rates(&self) -> CurrencyResult<()> {
        info!("Updating exchange rates from {}...", self.provider.name());

        let rates = self.provider.fetch_latest_rates().await?;
        let system_user = self.system_user().await?;

        let records = self.prepare_records(&rates, system_user.id).await?;
        self.rates.save_all(&records).await?;

        self.cache.put_all(&rates);

        info!("Exchange rates updated: {} currencies", rates.len());
        Ok(())
    }

    /// Fails when the user that scheduled refreshes are attributed to is missing.
    pub async fn verify_system_user(&self) -> CurrencyResult<()> {
        let user = self.system_user().await?;
        debug!("Scheduled refreshes run as {} (id {})", user.username, user.id);
        Ok(())
    }

    async fn system_user(&self) -> CurrencyResult<User> {
        self.users
            .find_by_username(&self.system_username)
            .await?
            .ok_or_else(|| CurrencyError::SystemIdentityMissing(self.system_username.clone()))
    }

    async fn prepare_records(
        &self,
        rates: &Snapshot,
        user_id: UserId,
    ) -> CurrencyResult<Vec<ExchangeRate>> {
        let now = Utc::now();
        let mut records = Vec::with_capacity(rates.len());

        for (code, rate) in rates {
            let record = match self.rates.find_by_code(code).await? {
                Some(mut existing) => {
                    existing.apply_refresh(*rate, user_id, now);
                    existing
                }
                None => ExchangeRate::new(code, *rate, user_id, now),
            };
            records.push(record);
        }

        Ok(records)
    }

    /// Returns a copy of every known rate, loading the cache from the store
    /// when it is empty.
    ///
    /// Concurrent callers may all observe the empty cache and load it; each
    /// load writes the same values.
    pub async fn get_exchange_rates(&self) -> CurrencyResult<Snapshot> {
        if self.cache.is_empty() {
            let stored: Snapshot = self
                .rates
                .find_all()
                .await?
                .into_iter()
                .map(|record| (record.currency_code, record.rate))
                .collect();
            debug!("Loading {} exchange rates into the cache", stored.len());
            self.cache.put_all(&stored);
        }

        Ok(self.cache.get_all())
    }

    pub async fn get_exchange_rate(&self, code: &str) -> CurrencyResult<Decimal> {
        self.get_exchange_rates()
            .await?
            .get(code)
            .copied()
            .ok_or_else(|| CurrencyError::NotFound(code.to_string()))
    }

    /// Stores a rate for a currency that has no record yet.
    ///
    /// Existence is checked against the store only. Two racing calls for the
    /// same new code are settled by the store's unique constraint.
    pub async fn add_currency(&self, code: &str, rate: Decimal, user_id: UserId) -> CurrencyResult<()> {
        if self.rates.find_by_code(code).await?.is_some() {
            warn!("Currency already exists: {}", code);
            return Err(CurrencyError::AlreadyExists(code.to_string()));
        }

        let record = ExchangeRate::new(code, rate, user_id, Utc::now());
        self.rates.save(&record).await.inspect_err(|err| {
            warn!("Failed to add currency {}: {}", code, err);
        })?;

        self.cache.put(code, rate);
        debug!("Added currency {} = {} by user {}", code, rate, user_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::store::{MemoryStore, StoreResult};
    use async_trait::async_trait;
    use chrono::Duration;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TEST_USER_ID: UserId = 1;

    struct StaticProvider {
        rates: Option<Snapshot>,
        calls: AtomicUsize,
    }

    impl StaticProvider {
        fn returning(rates: &[(&str, Decimal)]) -> Self {
            Self {
                rates: Some(
                    rates
                        .iter()
                        .map(|(code, rate)| (code.to_string(), *rate))
                        .collect(),
                ),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                rates: None,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl RateProvider for StaticProvider {
        fn name(&self) -> &str {
            "static"
        }

        async fn fetch_latest_rates(&self) -> CurrencyResult<Snapshot> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.rates
                .clone()
                .ok_or_else(|| CurrencyError::UpstreamUnavailable("connection refused".into()))
        }
    }

    /// Store whose batch writes always fail.
    struct BrokenBatchStore(MemoryStore);

    #[async_trait]
    impl RateStore for BrokenBatchStore {
        async fn find_by_code(&self, code: &str) -> StoreResult<Option<ExchangeRate>> {
            self.0.find_by_code(code).await
        }

        async fn find_all(&self) -> StoreResult<Vec<ExchangeRate>> {
            self.0.find_all().await
        }

        async fn save(&self, record: &ExchangeRate) -> StoreResult<ExchangeRate> {
            RateStore::save(&self.0, record).await
        }

        async fn save_all(&self, _records: &[ExchangeRate]) -> StoreResult<Vec<ExchangeRate>> {
            Err(StoreError::Database(sqlx::Error::PoolTimedOut))
        }

        async fn delete_all(&self) -> StoreResult<()> {
            self.0.delete_all().await
        }
    }

    async fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        UserStore::save(store.as_ref(), SYSTEM_USERNAME, "SYSTEM")
            .await
            .unwrap();
        UserStore::save(store.as_ref(), "TEST_USER_NAME", "TEST_USER_ROLE")
            .await
            .unwrap();
        store
    }

    async fn store_with_usd_and_eur() -> Arc<MemoryStore> {
        let store = seeded_store().await;
        let now = Utc::now();
        for (code, rate) in [("USD", dec!(1.112088)), ("EUR", dec!(0.947892))] {
            RateStore::save(store.as_ref(), &ExchangeRate::new(code, rate, TEST_USER_ID, now))
                .await
                .unwrap();
        }
        store
    }

    fn service(provider: StaticProvider, store: Arc<MemoryStore>) -> CurrencyService {
        CurrencyService::new(Arc::new(provider), store.clone(), store)
    }

    #[tokio::test]
    async fn lazy_load_returns_stored_rates() {
        let store = store_with_usd_and_eur().await;
        let service = service(StaticProvider::returning(&[]), store);

        let rates = service.get_exchange_rates().await.unwrap();

        assert_eq!(rates.len(), 2);
        assert_eq!(rates["USD"], dec!(1.112088));
        assert_eq!(rates["EUR"], dec!(0.947892));
        assert!(!service.cache.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_lazy_loads_converge() {
        let service = Arc::new(service(
            StaticProvider::returning(&[]),
            store_with_usd_and_eur().await,
        ));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let service = Arc::clone(&service);
                tokio::spawn(async move { service.get_exchange_rates().await })
            })
            .collect();

        for handle in handles {
            let rates = handle.await.unwrap().unwrap();
            assert_eq!(rates.len(), 2);
            assert_eq!(rates["EUR"], dec!(0.947892));
        }
        assert_eq!(service.cache.len(), 2);
    }

    #[tokio::test]
    async fn empty_store_yields_empty_mapping() {
        let service = service(StaticProvider::returning(&[]), seeded_store().await);

        assert!(service.get_exchange_rates().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cached_rates_are_not_reloaded() {
        let store = store_with_usd_and_eur().await;
        let service = service(StaticProvider::returning(&[]), store.clone());
        service.get_exchange_rates().await.unwrap();

        store.delete_all().await.unwrap();

        assert_eq!(service.get_exchange_rates().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unknown_code_is_not_found() {
        let service = service(StaticProvider::returning(&[]), store_with_usd_and_eur().await);

        let err = service.get_exchange_rate("JPY").await.unwrap_err();

        assert!(matches!(err, CurrencyError::NotFound(code) if code == "JPY"));
        assert_eq!(service.get_exchange_rate("USD").await.unwrap(), dec!(1.112088));
    }

    #[tokio::test]
    async fn refresh_inserts_new_rates_as_system_user() {
        let store = seeded_store().await;
        let service = service(
            StaticProvider::returning(&[("USD", dec!(1.112088)), ("GBP", dec!(0.83))]),
            store.clone(),
        );

        service.refresh_rates().await.unwrap();

        let gbp = store.find_by_code("GBP").await.unwrap().unwrap();
        assert_eq!(gbp.rate, dec!(0.83));
        assert_eq!(gbp.created_by_user_id, 0);
        assert_eq!(gbp.updated_by_user_id, 0);
        assert_eq!(gbp.created_at, gbp.updated_at);

        let rates = service.get_exchange_rates().await.unwrap();
        assert_eq!(rates["USD"], dec!(1.112088));
        assert_eq!(rates["GBP"], dec!(0.83));
    }

    #[tokio::test]
    async fn refresh_updates_existing_row_and_keeps_creation_metadata() {
        let store = seeded_store().await;
        let created = Utc::now() - Duration::hours(1);
        RateStore::save(
            store.as_ref(),
            &ExchangeRate::new("USD", dec!(1.112088), TEST_USER_ID, created),
        )
        .await
        .unwrap();
        let service = service(StaticProvider::returning(&[("USD", dec!(1.5))]), store.clone());

        service.refresh_rates().await.unwrap();

        let usd = store.find_by_code("USD").await.unwrap().unwrap();
        assert_eq!(usd.rate, dec!(1.5));
        assert!(usd.updated_at > created);
        assert_eq!(usd.updated_by_user_id, 0);
        assert_eq!(usd.created_at, created);
        assert_eq!(usd.created_by_user_id, TEST_USER_ID);
        assert_eq!(service.cache.get("USD"), Some(dec!(1.5)));
    }

    #[tokio::test]
    async fn provider_failure_mutates_nothing() {
        let store = store_with_usd_and_eur().await;
        let service = service(StaticProvider::failing(), store.clone());

        let err = service.refresh_rates().await.unwrap_err();

        assert!(matches!(err, CurrencyError::UpstreamUnavailable(_)));
        assert!(service.cache.is_empty());
        let usd = store.find_by_code("USD").await.unwrap().unwrap();
        assert_eq!(usd.rate, dec!(1.112088));
    }

    #[tokio::test]
    async fn missing_system_user_aborts_refresh() {
        let store = Arc::new(MemoryStore::new());
        let service = service(StaticProvider::returning(&[("USD", dec!(1.5))]), store.clone());

        let err = service.refresh_rates().await.unwrap_err();

        assert!(matches!(err, CurrencyError::SystemIdentityMissing(name) if name == "SYSTEM"));
        assert!(store.find_all().await.unwrap().is_empty());
        assert!(service.cache.is_empty());
    }

    #[tokio::test]
    async fn custom_system_username_is_resolved() {
        let store = Arc::new(MemoryStore::new());
        let bot = UserStore::save(store.as_ref(), "rates-bot", "SYSTEM").await.unwrap();
        let service = service(StaticProvider::returning(&[("USD", dec!(1.5))]), store.clone())
            .with_system_username("rates-bot");

        service.refresh_rates().await.unwrap();

        let usd = store.find_by_code("USD").await.unwrap().unwrap();
        assert_eq!(usd.updated_by_user_id, bot.id);
    }

    #[tokio::test]
    async fn failed_batch_leaves_cache_untouched() {
        let store = Arc::new(BrokenBatchStore(MemoryStore::new()));
        let users: Arc<dyn UserStore> = Arc::new(MemoryStore::new());
        UserStore::save(users.as_ref(), SYSTEM_USERNAME, "SYSTEM").await.unwrap();
        let service = CurrencyService::new(
            Arc::new(StaticProvider::returning(&[("USD", dec!(1.5))])),
            store,
            users,
        );

        let err = service.refresh_rates().await.unwrap_err();

        assert!(matches!(err, CurrencyError::Store(_)));
        assert!(service.cache.is_empty());
    }

    #[tokio::test]
    async fn refresh_calls_provider_once_per_cycle() {
        let provider = Arc::new(StaticProvider::returning(&[("USD", dec!(1.5))]));
        let store = seeded_store().await;
        let service = CurrencyService::new(provider.clone(), store.clone(), store);

        service.refresh_rates().await.unwrap();
        service.refresh_rates().await.unwrap();

        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn add_currency_persists_and_caches() {
        let store = seeded_store().await;
        let service = service(StaticProvider::returning(&[]), store.clone());

        service
            .add_currency("NEW", dec!(0.123456), TEST_USER_ID)
            .await
            .unwrap();

        let stored = store.find_by_code("NEW").await.unwrap().unwrap();
        assert_eq!(stored.created_by_user_id, TEST_USER_ID);
        assert_eq!(stored.updated_by_user_id, TEST_USER_ID);
        assert_eq!(stored.created_at, stored.updated_at);
        assert_eq!(service.get_exchange_rate("NEW").await.unwrap(), dec!(0.123456));
    }

    #[tokio::test]
    async fn second_add_of_same_code_is_rejected() {
        let service = service(StaticProvider::returning(&[]), seeded_store().await);

        service.add_currency("NEW", dec!(1.1), TEST_USER_ID).await.unwrap();
        let err = service
            .add_currency("NEW", dec!(9.9), TEST_USER_ID)
            .await
            .unwrap_err();

        assert!(matches!(err, CurrencyError::AlreadyExists(code) if code == "NEW"));
        assert_eq!(service.get_exchange_rate("NEW").await.unwrap(), dec!(1.1));
    }

    #[tokio::test]
    async fn add_of_stored_but_uncached_code_is_rejected() {
        let service = service(StaticProvider::returning(&[]), store_with_usd_and_eur().await);

        let err = service
            .add_currency("USD", dec!(2), TEST_USER_ID)
            .await
            .unwrap_err();

        assert!(matches!(err, CurrencyError::AlreadyExists(_)));
        assert!(service.cache.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_adds_of_same_code_succeed_once() {
        let service = Arc::new(service(StaticProvider::returning(&[]), seeded_store().await));

        let handles: Vec<_> = [(dec!(1.1), 1), (dec!(2.2), 2)]
            .into_iter()
            .map(|(rate, user)| {
                let service = Arc::clone(&service);
                tokio::spawn(async move { service.add_currency("NEW", rate, user).await })
            })
            .collect();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(
            results
                .iter()
                .any(|r| matches!(r, Err(CurrencyError::AlreadyExists(_))))
        );
        let rate = service.get_exchange_rate("NEW").await.unwrap();
        assert!(rate == dec!(1.1) || rate == dec!(2.2));
    }
}
