use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{RateStore, StoreResult, UserStore};
use crate::error::StoreError;
use crate::exchange_rate::{ExchangeRate, User, UserId};

#[derive(Debug, Default)]
struct Tables {
    rates: HashMap<String, ExchangeRate>,
    users: Vec<User>,
    next_user_id: UserId,
}

/// Process-local store with the same uniqueness rules as the database.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateStore for MemoryStore {
    async fn find_by_code(&self, code: &str) -> StoreResult<Option<ExchangeRate>> {
        Ok(self.tables.lock().rates.get(code).cloned())
    }

    async fn find_all(&self) -> StoreResult<Vec<ExchangeRate>> {
        Ok(self.tables.lock().rates.values().cloned().collect())
    }

    async fn save(&self, record: &ExchangeRate) -> StoreResult<ExchangeRate> {
        let mut tables = self.tables.lock();
        if tables.rates.contains_key(&record.currency_code) {
            return Err(StoreError::Duplicate(record.currency_code.clone()));
        }
        tables
            .rates
            .insert(record.currency_code.clone(), record.clone());
        Ok(record.clone())
    }

    async fn save_all(&self, records: &[ExchangeRate]) -> StoreResult<Vec<ExchangeRate>> {
        let mut tables = self.tables.lock();
        let mut saved = Vec::with_capacity(records.len());
        for record in records {
            let row = match tables.rates.get(&record.currency_code) {
                Some(existing) => ExchangeRate {
                    rate: record.rate,
                    updated_at: record.updated_at,
                    updated_by_user_id: record.updated_by_user_id,
                    ..existing.clone()
                },
                None => record.clone(),
            };
            tables.rates.insert(row.currency_code.clone(), row.clone());
            saved.push(row);
        }
        Ok(saved)
    }

    async fn delete_all(&self) -> StoreResult<()> {
        self.tables.lock().rates.clear();
        Ok(())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        Ok(self
            .tables
            .lock()
            .users
            .iter()
            .find(|user| user.username == username)
            .cloned())
    }

    async fn save(&self, username: &str, role: &str) -> StoreResult<User> {
        let mut tables = self.tables.lock();
        if tables.users.iter().any(|user| user.username == username) {
            return Err(StoreError::Duplicate(username.to_string()));
        }
        let user = User {
            id: tables.next_user_id,
            username: username.to_string(),
            role: role.to_string(),
        };
        tables.next_user_id += 1;
        tables.users.push(user.clone());
        Ok(user)
    }
}
