use std::collections::{HashMap, HashSet};

use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

use super::messages::{ClientMessage, ServerMessage, CLIENT_MESSAGE_TYPES};
use crate::models::{
    self, Event, Session, MAX_EVENT_NAME_LENGTH,
};
use crate::pubsub::Subscriber;
use crate::state::AppState;
use crate::store::StoreError;

const ERR_INCORRECT_KEY: &str = "incorrect session key";
const ERR_INTERNAL: &str = "internal error";

/// How many fresh ids to try before treating a collision as a server error.
const EVENT_ID_ATTEMPTS: usize = 3;

#[derive(Error, Debug)]
pub enum HandlerError {
    /// The frame was not parseable JSON; the connection must be closed
    /// because no response can be correlated without an id.
    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] serde_json::Error),

    /// Request ids are positive integers assigned by the client.
    #[error("invalid request id")]
    InvalidRequestId,
}

/// Topic delivering to the host of a session.
pub fn host_topic(session_id: &str) -> String {
    format!("h.{session_id}")
}

/// Topic delivering to the guests of a session.
pub fn guest_topic(session_id: &str) -> String {
    format!("g.{session_id}")
}

/// Per-connection protocol state machine and router.
///
/// Exactly one read loop drives each handler, so the connection-local state
/// (`authed_sessions`, `is_host`) needs no synchronization. Cross-peer
/// traffic flows through the shared [`crate::pubsub::PubSub`]; everything
/// destined for this connection's socket goes into the mailbox drained by
/// the supervisor's writer task.
pub struct MessageHandler {
    authed_sessions: HashSet<String>,
    is_host: bool,
    send: mpsc::UnboundedSender<ServerMessage>,
    subscriber: Subscriber<ServerMessage>,
    state: AppState,
}

impl MessageHandler {
    pub fn new(state: AppState, send: mpsc::UnboundedSender<ServerMessage>) -> Self {
        MessageHandler {
            authed_sessions: HashSet::new(),
            is_host: false,
            subscriber: Subscriber::new(send.clone()),
            send,
            state,
        }
    }

    /// Handle one inbound text frame. `Err` means the connection is beyond
    /// recovery and the caller should break the read loop.
    pub async fn handle_frame(&mut self, payload: &str) -> Result<(), HandlerError> {
        if payload == "h" {
            self.send(ServerMessage::Heartbeat);
            return Ok(());
        }

        let value: Value = serde_json::from_str(payload)?;
        let msg_type = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();

        if !CLIENT_MESSAGE_TYPES.contains(&msg_type.as_str()) {
            self.send(ServerMessage::fail(
                0,
                "",
                format!("unsupported message type: {msg_type}"),
            ));
            return Ok(());
        }

        if value.get("id").and_then(Value::as_i64).unwrap_or(0) <= 0 {
            return Err(HandlerError::InvalidRequestId);
        }

        let msg: ClientMessage = serde_json::from_value(value)?;
        self.handle_message(msg).await;
        Ok(())
    }

    async fn handle_message(&mut self, msg: ClientMessage) {
        let response = match msg {
            ClientMessage::HostSession {
                id,
                session_id,
                session_key,
            } => self.handle_host_session(id, session_id, session_key).await,
            ClientMessage::JoinSession {
                id,
                session_id,
                session_key,
            } => self.handle_join_session(id, session_id, session_key).await,
            ClientMessage::IsLinked { id, session_id } => {
                self.handle_is_linked(id, session_id).await
            }
            ClientMessage::SetSessionConfig {
                id,
                session_id,
                webhook_id,
                webhook_url,
                metadata,
            } => {
                self.handle_set_session_config(id, session_id, webhook_id, webhook_url, metadata)
                    .await
            }
            ClientMessage::GetSessionConfig { id, session_id } => {
                self.handle_get_session_config(id, session_id).await
            }
            ClientMessage::PublishEvent {
                id,
                session_id,
                event,
                data,
                call_webhook,
            } => {
                self.handle_publish_event(id, session_id, event, data, call_webhook)
                    .await
            }
        };
        self.send(response);
    }

    /// Drop all pub/sub subscriptions. Called by the supervisor when the
    /// connection closes; session and event records persist.
    pub async fn cleanup(&self) {
        self.state.pubsub.unsubscribe_all(&self.subscriber).await;
    }

    fn send(&self, msg: ServerMessage) {
        // The writer task may already be gone during shutdown.
        let _ = self.send.send(msg);
    }

    // ------------------------------------------------------------------------
    // HostSession
    // ------------------------------------------------------------------------

    async fn handle_host_session(
        &mut self,
        id: i64,
        session_id: String,
        session_key: String,
    ) -> ServerMessage {
        if self.is_host {
            return ServerMessage::fail(id, session_id, "connection is already hosting a session");
        }
        // A connection that has joined a session is pinned to the guest
        // role; it may not host.
        if !self.authed_sessions.is_empty() {
            return ServerMessage::fail(id, session_id, "guests can not host sessions");
        }
        if !models::is_valid_session_id(&session_id) {
            return ServerMessage::fail(id, session_id, "invalid session id");
        }
        if !models::is_valid_session_key(&session_key) {
            return ServerMessage::fail(id, session_id, "invalid session key");
        }

        let session = match Session::load(self.state.store.as_ref(), &session_id).await {
            Ok(session) => session,
            Err(e) => return self.internal_error(id, session_id, e),
        };

        let session = match session {
            Some(existing) => {
                if existing.key != session_key {
                    return ServerMessage::fail(id, session_id, ERR_INCORRECT_KEY);
                }
                existing
            }
            None => Session::new(session_id.clone(), session_key),
        };

        if let Err(e) = session.save(self.state.store.as_ref()).await {
            return self.internal_error(id, session_id, e);
        }

        self.is_host = true;
        self.authed_sessions.insert(session_id.clone());
        self.state
            .pubsub
            .subscribe(&host_topic(&session_id), &self.subscriber)
            .await;

        ServerMessage::ok(id, session_id)
    }

    // ------------------------------------------------------------------------
    // JoinSession
    // ------------------------------------------------------------------------

    async fn handle_join_session(
        &mut self,
        id: i64,
        session_id: String,
        session_key: String,
    ) -> ServerMessage {
        if self.is_host {
            return ServerMessage::fail(id, session_id, "only guests can join sessions");
        }
        if !models::is_valid_session_id(&session_id) {
            return ServerMessage::fail(id, session_id, "invalid session id");
        }
        if !models::is_valid_session_key(&session_key) {
            return ServerMessage::fail(id, session_id, "invalid session key");
        }

        let session = match Session::load(self.state.store.as_ref(), &session_id).await {
            Ok(session) => session,
            Err(e) => return self.internal_error(id, session_id, e),
        };
        let Some(mut session) = session else {
            let error = format!("no such session: {session_id}");
            return ServerMessage::fail(id, session_id, error);
        };
        if session.key != session_key {
            return ServerMessage::fail(id, session_id, ERR_INCORRECT_KEY);
        }

        session.linked = true;
        if let Err(e) = session.save(self.state.store.as_ref()).await {
            return self.internal_error(id, session_id, e);
        }

        self.authed_sessions.insert(session_id.clone());
        let guest_topic = guest_topic(&session_id);
        self.state
            .pubsub
            .subscribe(&guest_topic, &self.subscriber)
            .await;

        let online_guests = self.state.pubsub.len(&guest_topic).await;
        self.state
            .pubsub
            .publish(
                &host_topic(&session_id),
                ServerMessage::Linked {
                    session_id: session_id.clone(),
                    online_guests,
                },
            )
            .await;

        ServerMessage::ok(id, session_id)
    }

    // ------------------------------------------------------------------------
    // IsLinked
    // ------------------------------------------------------------------------

    async fn handle_is_linked(&mut self, id: i64, session_id: String) -> ServerMessage {
        if !self.is_host {
            return ServerMessage::fail(id, session_id, "only hosts can check linked status");
        }
        if let Some(fail) = self.require_authed(id, &session_id) {
            return fail;
        }

        let session = match Session::load(self.state.store.as_ref(), &session_id).await {
            Ok(Some(session)) => session,
            Ok(None) => {
                let error = format!("no such session: {session_id}");
                return ServerMessage::fail(id, session_id, error);
            }
            Err(e) => return self.internal_error(id, session_id, e),
        };

        let online_guests = self.state.pubsub.len(&guest_topic(&session_id)).await;
        ServerMessage::IsLinkedOk {
            id,
            session_id,
            linked: session.linked,
            online_guests,
        }
    }

    // ------------------------------------------------------------------------
    // SetSessionConfig
    // ------------------------------------------------------------------------

    async fn handle_set_session_config(
        &mut self,
        id: i64,
        session_id: String,
        webhook_id: Option<String>,
        webhook_url: Option<String>,
        metadata: HashMap<String, Option<String>>,
    ) -> ServerMessage {
        if self.is_host {
            return ServerMessage::fail(id, session_id, "only guests can set session config");
        }
        if let Some(fail) = self.require_authed(id, &session_id) {
            return fail;
        }
        if let Err(reason) =
            models::validate_session_config(webhook_id.as_deref(), webhook_url.as_deref(), &metadata)
        {
            return ServerMessage::fail(id, session_id, reason);
        }

        let mut session = match Session::load(self.state.store.as_ref(), &session_id).await {
            Ok(Some(session)) => session,
            Ok(None) => {
                let error = format!("no such session: {session_id}");
                return ServerMessage::fail(id, session_id, error);
            }
            Err(e) => return self.internal_error(id, session_id, e),
        };

        models::apply_session_config_patch(&mut session, webhook_id, webhook_url, metadata);
        if let Err(e) = session.save(self.state.store.as_ref()).await {
            return self.internal_error(id, session_id, e);
        }

        // Both sides observe the full merged view, not the patch.
        let update = ServerMessage::SessionConfigUpdated {
            session_id: session_id.clone(),
            webhook_id: session.webhook_id.clone(),
            webhook_url: session.webhook_url.clone(),
            metadata: session.metadata.clone(),
        };
        self.state
            .pubsub
            .publish(&host_topic(&session_id), update.clone())
            .await;
        self.state
            .pubsub
            .publish(&guest_topic(&session_id), update)
            .await;

        ServerMessage::ok(id, session_id)
    }

    // ------------------------------------------------------------------------
    // GetSessionConfig
    // ------------------------------------------------------------------------

    async fn handle_get_session_config(&mut self, id: i64, session_id: String) -> ServerMessage {
        if let Some(fail) = self.require_authed(id, &session_id) {
            return fail;
        }

        let session = match Session::load(self.state.store.as_ref(), &session_id).await {
            Ok(Some(session)) => session,
            Ok(None) => {
                let error = format!("no such session: {session_id}");
                return ServerMessage::fail(id, session_id, error);
            }
            Err(e) => return self.internal_error(id, session_id, e),
        };

        ServerMessage::GetSessionConfigOk {
            id,
            session_id,
            webhook_id: session.webhook_id,
            webhook_url: session.webhook_url,
            metadata: session.metadata,
        }
    }

    // ------------------------------------------------------------------------
    // PublishEvent
    // ------------------------------------------------------------------------

    async fn handle_publish_event(
        &mut self,
        id: i64,
        session_id: String,
        event: String,
        data: String,
        call_webhook: bool,
    ) -> ServerMessage {
        if event.is_empty() || event.len() > MAX_EVENT_NAME_LENGTH {
            return ServerMessage::fail(id, session_id, "invalid event name");
        }
        if let Some(fail) = self.require_authed(id, &session_id) {
            return fail;
        }

        let event_id = match self.unused_event_id(&session_id).await {
            Ok(Some(event_id)) => event_id,
            Ok(None) => {
                tracing::error!(
                    session_id = %session_id,
                    "event id collision persisted across retries"
                );
                return ServerMessage::fail(id, session_id, ERR_INTERNAL);
            }
            Err(e) => return self.internal_error(id, session_id, e),
        };

        let event_record = Event {
            id: event_id,
            event,
            data,
        };
        if let Err(e) = event_record
            .save(self.state.store.as_ref(), &session_id)
            .await
        {
            return self.internal_error(id, session_id, e);
        }

        // Events flow to the counter-role: host publishes to guests and
        // vice versa.
        let topic = if self.is_host {
            guest_topic(&session_id)
        } else {
            host_topic(&session_id)
        };
        self.state
            .pubsub
            .publish(
                &topic,
                ServerMessage::Event {
                    session_id: session_id.clone(),
                    event_id: event_record.id.clone(),
                    event: event_record.event.clone(),
                    data: event_record.data.clone(),
                },
            )
            .await;

        if self.is_host && call_webhook {
            self.maybe_call_webhook(&session_id, &event_record.id).await;
        }

        ServerMessage::PublishEventOk {
            id,
            session_id,
            event_id: event_record.id,
        }
    }

    /// Generate an event id that is not already stored for this session.
    /// Event ids must be unique within a session; an occupied key is never
    /// overwritten. `Ok(None)` means every attempt collided.
    async fn unused_event_id(&self, session_id: &str) -> Result<Option<String>, StoreError> {
        for _ in 0..EVENT_ID_ATTEMPTS {
            let event_id = models::random_event_id();
            let key = models::event_store_key(session_id, &event_id);
            if self.state.store.get(&key).await?.is_none() {
                return Ok(Some(event_id));
            }
        }
        Ok(None)
    }

    /// Fire the outbound webhook in the background when the session has one
    /// configured. Failures never affect the publish path.
    async fn maybe_call_webhook(&self, session_id: &str, event_id: &str) {
        let Some(webhook) = self.state.webhook.clone() else {
            return;
        };
        let session = match Session::load(self.state.store.as_ref(), session_id).await {
            Ok(Some(session)) => session,
            Ok(None) => return,
            Err(e) => {
                tracing::error!(session_id = %session_id, error = %e, "failed to load session for webhook call");
                return;
            }
        };
        let (Some(webhook_id), Some(webhook_url)) = (session.webhook_id, session.webhook_url)
        else {
            return;
        };

        let session_id = session_id.to_owned();
        let event_id = event_id.to_owned();
        tokio::spawn(async move {
            if let Err(e) = webhook
                .call(&event_id, &session_id, &webhook_id, &webhook_url)
                .await
            {
                tracing::warn!(
                    session_id = %session_id,
                    event_id = %event_id,
                    error = %e,
                    "webhook call failed"
                );
            }
        });
    }

    // ------------------------------------------------------------------------
    // Shared checks
    // ------------------------------------------------------------------------

    fn require_authed(&self, id: i64, session_id: &str) -> Option<ServerMessage> {
        if self.authed_sessions.contains(session_id) {
            return None;
        }
        Some(ServerMessage::fail(
            id,
            session_id,
            format!("not authenticated to session: {session_id}"),
        ))
    }

    fn internal_error(&self, id: i64, session_id: String, error: StoreError) -> ServerMessage {
        tracing::error!(session_id = %session_id, error = %error, "store operation failed");
        ServerMessage::fail(id, session_id, ERR_INTERNAL)
    }
}
