pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod exchange_rate;
pub mod provider;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod val_curs;

pub use cache::{RateCache, Snapshot};
pub use error::{CurrencyError, CurrencyResult, StoreError};
pub use service::CurrencyService;
