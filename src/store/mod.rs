//! Durable storage of exchange rates and users.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::exchange_rate::{ExchangeRate, User};

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait RateStore: Send + Sync {
    async fn find_by_code(&self, code: &str) -> StoreResult<Option<ExchangeRate>>;

    async fn find_all(&self) -> StoreResult<Vec<ExchangeRate>>;

    /// Inserts a new row. A code that is already stored fails with
    /// [`StoreError::Duplicate`].
    async fn save(&self, record: &ExchangeRate) -> StoreResult<ExchangeRate>;

    /// Upserts every record by currency code in one atomic batch.
    async fn save_all(&self, records: &[ExchangeRate]) -> StoreResult<Vec<ExchangeRate>>;

    async fn delete_all(&self) -> StoreResult<()>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_username(&self, username: &str) -> StoreResult<Option<User>>;

    async fn save(&self, username: &str, role: &str) -> StoreResult<User>;
}
