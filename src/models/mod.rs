use std::collections::HashMap;

use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use rand::RngCore;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::store::{Store, StoreResult};

pub const SESSION_ID_LENGTH: usize = 32;
pub const SESSION_KEY_LENGTH: usize = 64;
pub const EVENT_ID_LENGTH: usize = 8;

pub const MAX_EVENT_NAME_LENGTH: usize = 100;
pub const MAX_WEBHOOK_ID_LENGTH: usize = 100;
pub const MAX_WEBHOOK_URL_LENGTH: usize = 200;
pub const MAX_METADATA_ENTRIES: usize = 50;
pub const MAX_METADATA_KEY_LENGTH: usize = 100;
pub const MAX_METADATA_VALUE_LENGTH: usize = 1024;

static HEX_STRING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new("^[a-f0-9]*$").expect("hex regex must compile"));

// ============================================================================
// Session
// ============================================================================

/// Paired-party context, created by a host and joined by guests. The store
/// record at `session:<id>` is the sole authority on session existence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub linked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    // Omitted from the serialized form when empty, including after the last
    // entry is deleted by a config patch.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl Session {
    pub fn new(id: impl Into<String>, key: impl Into<String>) -> Self {
        Session {
            id: id.into(),
            key: key.into(),
            ..Default::default()
        }
    }

    pub fn store_key(&self) -> String {
        session_store_key(&self.id)
    }

    pub async fn load(store: &dyn Store, id: &str) -> StoreResult<Option<Session>> {
        let Some(value) = store.get(&session_store_key(id)).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_value(value)?))
    }

    pub async fn save(&self, store: &dyn Store) -> StoreResult<()> {
        store
            .set(&self.store_key(), serde_json::to_value(self)?)
            .await
    }
}

pub fn session_store_key(session_id: &str) -> String {
    format!("session:{session_id}")
}

// ============================================================================
// Event
// ============================================================================

/// Opaque message published by one side of a session for delivery to the
/// other. Persisted so disconnected peers can replay over HTTP.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    pub id: String,
    pub event: String,
    pub data: String,
}

impl Event {
    pub async fn load(
        store: &dyn Store,
        session_id: &str,
        event_id: &str,
    ) -> StoreResult<Option<Event>> {
        let Some(value) = store.get(&event_store_key(session_id, event_id)).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_value(value)?))
    }

    pub async fn save(&self, store: &dyn Store, session_id: &str) -> StoreResult<()> {
        store
            .set(
                &event_store_key(session_id, &self.id),
                serde_json::to_value(self)?,
            )
            .await
    }

    /// All events of a session updated after `since`, newest first.
    pub async fn load_all_for_session(
        store: &dyn Store,
        session_id: &str,
        since: i64,
        unseen_only: bool,
    ) -> StoreResult<Vec<Event>> {
        let values = store
            .find_by_prefix(&session_event_prefix(session_id), since, unseen_only)
            .await?;
        values
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(Into::into))
            .collect()
    }

    pub async fn mark_seen(
        store: &dyn Store,
        session_id: &str,
        event_id: &str,
    ) -> StoreResult<bool> {
        store.mark_seen(&event_store_key(session_id, event_id)).await
    }
}

pub fn event_store_key(session_id: &str, event_id: &str) -> String {
    format!("session:{session_id}:event:{event_id}")
}

pub fn session_event_prefix(session_id: &str) -> String {
    format!("session:{session_id}:event:")
}

/// Generate an 8-lowercase-hex event id from the OS entropy source.
pub fn random_event_id() -> String {
    let mut bytes = [0u8; EVENT_ID_LENGTH / 2];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

// ============================================================================
// Validation
// ============================================================================

pub fn is_hex_string(s: &str) -> bool {
    HEX_STRING_RE.is_match(s)
}

pub fn is_valid_session_id(id: &str) -> bool {
    id.len() == SESSION_ID_LENGTH && is_hex_string(id)
}

pub fn is_valid_session_key(key: &str) -> bool {
    key.len() == SESSION_KEY_LENGTH && is_hex_string(key)
}

/// Check a session-config patch against the field limits; returns the
/// specific violation so it can be sent back verbatim in a Fail message.
/// A `None` metadata value signals deletion of that key.
pub fn validate_session_config(
    webhook_id: Option<&str>,
    webhook_url: Option<&str>,
    metadata: &HashMap<String, Option<String>>,
) -> Result<(), String> {
    if let Some(id) = webhook_id {
        if id.len() > MAX_WEBHOOK_ID_LENGTH {
            return Err("webhook id too long".to_string());
        }
    }
    if let Some(url) = webhook_url {
        if url.len() > MAX_WEBHOOK_URL_LENGTH {
            return Err("webhook url too long".to_string());
        }
    }
    if metadata.len() > MAX_METADATA_ENTRIES {
        return Err("too many metadata entries".to_string());
    }
    for (key, value) in metadata {
        if key.is_empty() || key.len() > MAX_METADATA_KEY_LENGTH {
            return Err(format!("invalid metadata key: {key}"));
        }
        if let Some(value) = value {
            if value.len() > MAX_METADATA_VALUE_LENGTH {
                return Err(format!("metadata value too long for key: {key}"));
            }
        }
    }
    Ok(())
}

/// Merge a config patch into the session. A present `webhookId` or
/// `webhookUrl` overwrites (empty string clears); metadata entries merge
/// one by one, deleting on `None`.
pub fn apply_session_config_patch(
    session: &mut Session,
    webhook_id: Option<String>,
    webhook_url: Option<String>,
    metadata: HashMap<String, Option<String>>,
) {
    if let Some(id) = webhook_id {
        session.webhook_id = if id.is_empty() { None } else { Some(id) };
    }
    if let Some(url) = webhook_url {
        session.webhook_url = if url.is_empty() { None } else { Some(url) };
    }
    for (key, value) in metadata {
        match value {
            Some(value) => {
                session.metadata.insert(key, value);
            }
            None => {
                session.metadata.remove(&key);
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
