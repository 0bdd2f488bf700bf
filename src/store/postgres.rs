use async_trait::async_trait;
use log::debug;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};

use super::{RateStore, StoreResult, UserStore};
use crate::error::StoreError;
use crate::exchange_rate::{ExchangeRate, User};

const RATE_COLUMNS: &str = "id, currency_code, rate, created_at, updated_at, \
                            created_by_user_id, updated_by_user_id";

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Applies the embedded schema migrations.
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

fn map_insert_error(err: sqlx::Error, key: &str) -> StoreError {
    match err {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => {
            StoreError::Duplicate(key.to_string())
        }
        other => StoreError::Database(other),
    }
}

#[async_trait]
impl RateStore for PgStore {
    async fn find_by_code(&self, code: &str) -> StoreResult<Option<ExchangeRate>> {
        let row = sqlx::query_as::<_, ExchangeRate>(&format!(
            "SELECT {RATE_COLUMNS} FROM exchange_rate WHERE currency_code = $1"
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn find_all(&self) -> StoreResult<Vec<ExchangeRate>> {
        let rows = sqlx::query_as::<_, ExchangeRate>(&format!(
            "SELECT {RATE_COLUMNS} FROM exchange_rate ORDER BY currency_code"
        ))
        .fetch_all(&self.pool)
        .await?;

        debug!("Loaded {} exchange rates from the database", rows.len());
        Ok(rows)
    }

    async fn save(&self, record: &ExchangeRate) -> StoreResult<ExchangeRate> {
        sqlx::query_as::<_, ExchangeRate>(&format!(
            "INSERT INTO exchange_rate ({RATE_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {RATE_COLUMNS}"
        ))
        .bind(record.id)
        .bind(&record.currency_code)
        .bind(record.rate)
        .bind(record.created_at)
        .bind(record.updated_at)
        .bind(record.created_by_user_id)
        .bind(record.updated_by_user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| map_insert_error(err, &record.currency_code))
    }

    async fn save_all(&self, records: &[ExchangeRate]) -> StoreResult<Vec<ExchangeRate>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await?;

        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("INSERT INTO exchange_rate ({RATE_COLUMNS}) "));
        builder.push_values(records, |mut row, record| {
            row.push_bind(record.id)
                .push_bind(&record.currency_code)
                .push_bind(record.rate)
                .push_bind(record.created_at)
                .push_bind(record.updated_at)
                .push_bind(record.created_by_user_id)
                .push_bind(record.updated_by_user_id);
        });
        builder.push(format!(
            " ON CONFLICT (currency_code) DO UPDATE SET \
             rate = EXCLUDED.rate, \
             updated_at = EXCLUDED.updated_at, \
             updated_by_user_id = EXCLUDED.updated_by_user_id \
             RETURNING {RATE_COLUMNS}"
        ));

        let saved = builder
            .build_query_as::<ExchangeRate>()
            .fetch_all(&mut *tx)
            .await?;
        tx.commit().await?;

        debug!("Upserted {} exchange rates", saved.len());
        Ok(saved)
    }

    async fn delete_all(&self) -> StoreResult<()> {
        sqlx::query("DELETE FROM exchange_rate")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn find_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, role FROM users WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn save(&self, username: &str, role: &str) -> StoreResult<User> {
        sqlx::query_as::<_, User>(
            "INSERT INTO users (username, role) VALUES ($1, $2) RETURNING id, username, role",
        )
        .bind(username)
        .bind(role)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| map_insert_error(err, username))
    }
}
