use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

pub type UserId = i64;

/// Durable exchange rate row, one per currency code.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct ExchangeRate {
    pub id: Uuid,
    pub currency_code: String,
    pub rate: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by_user_id: UserId,
    pub updated_by_user_id: UserId,
}

impl ExchangeRate {
    pub fn new(currency_code: &str, rate: Decimal, user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            currency_code: currency_code.to_string(),
            rate,
            created_at: now,
            updated_at: now,
            created_by_user_id: user_id,
            updated_by_user_id: user_id,
        }
    }

    /// Overwrites the rate and the "updated" audit columns. Creation metadata is kept.
    pub fn apply_refresh(&mut self, rate: Decimal, user_id: UserId, now: DateTime<Utc>) {
        self.rate = rate;
        self.updated_at = now;
        self.updated_by_user_id = user_id;
    }
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub role: String,
}
