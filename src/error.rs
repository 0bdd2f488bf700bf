use thiserror::Error;

/// Failures surfaced by the durable store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The unique constraint on the currency code rejected a write.
    #[error("Duplicate currency code: {0}")]
    Duplicate(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum CurrencyError {
    #[error("Exchange rate provider unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("System user not found in the database: {0}")]
    SystemIdentityMissing(String),

    #[error("Currency already exists: {0}")]
    AlreadyExists(String),

    #[error("Currency not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for CurrencyError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate(code) => CurrencyError::AlreadyExists(code),
            other => CurrencyError::Store(other),
        }
    }
}

pub type CurrencyResult<T> = Result<T, CurrencyError>;
