pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Key→JSON-document persistence with timestamped writes and a one-way
/// "seen" flag.
///
/// Absent keys are a normal return (`Ok(None)` / `Ok(false)`), never an
/// error. The memory and Postgres implementations are interchangeable;
/// callers hold an `Arc<dyn Store>`.
#[async_trait]
pub trait Store: Send + Sync {
    /// Upsert `value` under `key`, setting `updated_at` to now. An existing
    /// record's `seen_at` survives the update.
    async fn set(&self, key: &str, value: Value) -> StoreResult<()>;

    /// Load the document stored under `key`.
    async fn get(&self, key: &str) -> StoreResult<Option<Value>>;

    /// All documents whose key starts with `prefix` and whose `updated_at`
    /// is strictly greater than `since` (epoch seconds), newest first.
    /// With `unseen_only`, records that have been marked seen are excluded.
    async fn find_by_prefix(
        &self,
        prefix: &str,
        since: i64,
        unseen_only: bool,
    ) -> StoreResult<Vec<Value>>;

    /// Set `seen_at` (and touch `updated_at`) the first time; returns
    /// whether the record was updated. Already-seen and absent keys return
    /// `Ok(false)`.
    async fn mark_seen(&self, key: &str) -> StoreResult<bool>;

    /// Delete `key` if present.
    async fn remove(&self, key: &str) -> StoreResult<()>;
}
