use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Client→server messages. The JSON `type` field selects the variant;
/// the `id` is a client-assigned request identifier echoed in responses.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    HostSession {
        id: i64,
        session_id: String,
        session_key: String,
    },
    #[serde(rename_all = "camelCase")]
    JoinSession {
        id: i64,
        session_id: String,
        session_key: String,
    },
    #[serde(rename_all = "camelCase")]
    IsLinked { id: i64, session_id: String },
    #[serde(rename_all = "camelCase")]
    SetSessionConfig {
        id: i64,
        session_id: String,
        webhook_id: Option<String>,
        webhook_url: Option<String>,
        /// Entry-by-entry patch; a null value deletes the key.
        #[serde(default)]
        metadata: HashMap<String, Option<String>>,
    },
    #[serde(rename_all = "camelCase")]
    GetSessionConfig { id: i64, session_id: String },
    #[serde(rename_all = "camelCase")]
    PublishEvent {
        id: i64,
        session_id: String,
        event: String,
        data: String,
        #[serde(default)]
        call_webhook: bool,
    },
}

pub const CLIENT_MESSAGE_TYPES: &[&str] = &[
    "HostSession",
    "JoinSession",
    "IsLinked",
    "SetSessionConfig",
    "GetSessionConfig",
    "PublishEvent",
];

/// Server→client messages. Everything in the mailbox of a connection is one
/// of these; the `Heartbeat` variant is written as the single-byte frame
/// `h` and never serialized as JSON.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "OK", rename_all = "camelCase")]
    Ok { id: i64, session_id: String },
    #[serde(rename_all = "camelCase")]
    Fail {
        #[serde(skip_serializing_if = "id_is_unset")]
        id: i64,
        #[serde(skip_serializing_if = "String::is_empty")]
        session_id: String,
        error: String,
    },
    #[serde(rename = "IsLinkedOK", rename_all = "camelCase")]
    IsLinkedOk {
        id: i64,
        session_id: String,
        linked: bool,
        online_guests: usize,
    },
    #[serde(rename_all = "camelCase")]
    Linked {
        session_id: String,
        online_guests: usize,
    },
    #[serde(rename = "GetSessionConfigOK", rename_all = "camelCase")]
    GetSessionConfigOk {
        id: i64,
        session_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        webhook_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        webhook_url: Option<String>,
        metadata: HashMap<String, String>,
    },
    #[serde(rename_all = "camelCase")]
    SessionConfigUpdated {
        session_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        webhook_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        webhook_url: Option<String>,
        metadata: HashMap<String, String>,
    },
    #[serde(rename = "PublishEventOK", rename_all = "camelCase")]
    PublishEventOk {
        id: i64,
        session_id: String,
        event_id: String,
    },
    #[serde(rename_all = "camelCase")]
    Event {
        session_id: String,
        event_id: String,
        event: String,
        data: String,
    },
    #[serde(skip)]
    Heartbeat,
}

impl ServerMessage {
    pub fn ok(id: i64, session_id: impl Into<String>) -> Self {
        ServerMessage::Ok {
            id,
            session_id: session_id.into(),
        }
    }

    pub fn fail(id: i64, session_id: impl Into<String>, error: impl Into<String>) -> Self {
        ServerMessage::Fail {
            id,
            session_id: session_id.into(),
            error: error.into(),
        }
    }
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn id_is_unset(id: &i64) -> bool {
    *id == 0
}
