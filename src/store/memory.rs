use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{Store, StoreResult};

struct StoredRecord {
    value: Value,
    updated_at: i64,
    seen_at: Option<i64>,
}

/// In-memory store backed by a single locked map. Used in development and
/// in tests; shares its contract with [`super::PostgresStore`].
#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<RwLock<HashMap<String, StoredRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn set(&self, key: &str, value: Value) -> StoreResult<()> {
        let mut records = self.records.write().await;
        let seen_at = records.get(key).and_then(|r| r.seen_at);
        records.insert(
            key.to_owned(),
            StoredRecord {
                value,
                updated_at: Utc::now().timestamp(),
                seen_at,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        let records = self.records.read().await;
        Ok(records.get(key).map(|r| r.value.clone()))
    }

    async fn find_by_prefix(
        &self,
        prefix: &str,
        since: i64,
        unseen_only: bool,
    ) -> StoreResult<Vec<Value>> {
        let records = self.records.read().await;
        let mut matches: Vec<&StoredRecord> = records
            .iter()
            .filter(|(key, r)| {
                key.starts_with(prefix)
                    && r.updated_at > since
                    && (!unseen_only || r.seen_at.is_none())
            })
            .map(|(_, r)| r)
            .collect();
        matches.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(matches.into_iter().map(|r| r.value.clone()).collect())
    }

    async fn mark_seen(&self, key: &str) -> StoreResult<bool> {
        let mut records = self.records.write().await;
        match records.get_mut(key) {
            Some(record) if record.seen_at.is_none() => {
                let now = Utc::now().timestamp();
                record.seen_at = Some(now);
                record.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        self.records.write().await.remove(key);
        Ok(())
    }
}
