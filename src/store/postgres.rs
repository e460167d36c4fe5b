use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::info;

use super::{Store, StoreResult};

/// Persistent store backed by a single PostgreSQL table
/// `(key, value, updated_at, seen_at)`.
///
/// Callers share one pool process-wide; see [`create_pool`].
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

pub async fn create_pool(postgres_url: &str) -> StoreResult<PgPool> {
    info!("Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(300))
        .max_lifetime(Duration::from_secs(1800))
        .connect(postgres_url)
        .await?;

    info!("Database connection pool created");
    Ok(pool)
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn set(&self, key: &str, value: Value) -> StoreResult<()> {
        // The upsert touches updated_at but leaves an existing row's seen_at
        // alone, keeping the record out of unseen queries once acknowledged.
        sqlx::query(
            "INSERT INTO store (key, value, updated_at) VALUES ($1, $2, now())
             ON CONFLICT (key)
             DO UPDATE SET value = $2, updated_at = now()",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        let value: Option<Value> = sqlx::query_scalar("SELECT value FROM store WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(value)
    }

    async fn find_by_prefix(
        &self,
        prefix: &str,
        since: i64,
        unseen_only: bool,
    ) -> StoreResult<Vec<Value>> {
        let seen_filter = if unseen_only {
            " AND seen_at IS NULL"
        } else {
            ""
        };
        let query = format!(
            "SELECT value FROM store
             WHERE key LIKE $1 || '%' AND updated_at > to_timestamp($2){seen_filter}
             ORDER BY updated_at DESC",
        );

        let values: Vec<Value> = sqlx::query_scalar(&query)
            .bind(prefix)
            .bind(since)
            .fetch_all(&self.pool)
            .await?;

        Ok(values)
    }

    async fn mark_seen(&self, key: &str) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE store SET seen_at = now(), updated_at = now()
             WHERE key = $1 AND seen_at IS NULL",
        )
        .bind(key)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM store WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
