// Each integration test file is a separate binary; helpers not used in every
// binary would otherwise trigger dead_code warnings from clippy.
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::sync::mpsc;
use tokio::time::timeout;

use walletlinkd::{
    handlers,
    pubsub::PubSub,
    rpc::{self, MessageHandler, ServerMessage},
    state::AppState,
    store::MemoryStore,
    webhook::Caller,
};

pub const SESSION_ID: &str = "c9db0147e942b2675045e3f61b247692";
pub const SESSION_KEY: &str =
    "29115acb7e001f1092e97552471c1116b3d2b679a7b36a73e7bcdb35fa51a34a";
/// SESSION_KEY with the last hex digit changed.
pub const WRONG_KEY: &str =
    "29115acb7e001f1092e97552471c1116b3d2b679a7b36a73e7bcdb35fa51a34b";

/// Fresh application state over an in-memory store; tests are hermetic.
pub fn test_state() -> AppState {
    test_state_with_webhook(None)
}

pub fn test_state_with_webhook(webhook: Option<Arc<dyn Caller>>) -> AppState {
    AppState {
        store: Arc::new(MemoryStore::new()),
        pubsub: PubSub::new(),
        webhook,
        server_url: Some(Arc::from("https://relay.example.com")),
        allowed_origins: Arc::new(HashSet::new()),
        read_timeout: Duration::from_secs(30),
        write_timeout: Duration::from_secs(30),
    }
}

/// Build the application router wired to the given state.
pub fn create_test_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/rpc", get(rpc::rpc_handler))
        .route("/events", get(handlers::events::get_events))
        .route("/events/:id", get(handlers::events::get_event))
        .route("/events/:id/seen", post(handlers::events::mark_event_seen))
        .with_state(state)
}

/// A relay connection driven directly through its message handler, with the
/// mailbox receiver standing in for the socket's writer task.
pub struct TestConnection {
    pub handler: MessageHandler,
    pub rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl TestConnection {
    pub fn connect(state: &AppState) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        TestConnection {
            handler: MessageHandler::new(state.clone(), tx),
            rx,
        }
    }

    /// Feed one frame to the handler, as the read loop would.
    pub async fn send(&mut self, frame: &str) {
        self.handler
            .handle_frame(frame)
            .await
            .expect("frame should not be fatal");
    }

    pub async fn send_json(&mut self, msg: serde_json::Value) {
        self.send(&msg.to_string()).await;
    }

    /// Next message from the mailbox; panics after a second of silence.
    pub async fn recv(&mut self) -> ServerMessage {
        timeout(Duration::from_secs(1), self.rx.recv())
            .await
            .expect("timed out waiting for a server message")
            .expect("mailbox closed")
    }

    /// Next message, serialized to its wire JSON for literal assertions.
    pub async fn recv_json(&mut self) -> serde_json::Value {
        serde_json::to_value(self.recv().await).expect("message should serialize")
    }

    pub fn try_recv(&mut self) -> Option<ServerMessage> {
        self.rx.try_recv().ok()
    }
}

/// Connect and host `SESSION_ID`; asserts the OK response.
pub async fn host_session(state: &AppState) -> TestConnection {
    let mut host = TestConnection::connect(state);
    host.send_json(serde_json::json!({
        "type": "HostSession",
        "id": 1,
        "sessionId": SESSION_ID,
        "sessionKey": SESSION_KEY,
    }))
    .await;
    assert_eq!(
        host.recv().await,
        ServerMessage::ok(1, SESSION_ID),
        "HostSession should succeed"
    );
    host
}

/// Connect and join `SESSION_ID` as a guest; asserts the OK response.
pub async fn join_session(state: &AppState) -> TestConnection {
    let mut guest = TestConnection::connect(state);
    guest
        .send_json(serde_json::json!({
            "type": "JoinSession",
            "id": 1,
            "sessionId": SESSION_ID,
            "sessionKey": SESSION_KEY,
        }))
        .await;
    assert_eq!(
        guest.recv().await,
        ServerMessage::ok(1, SESSION_ID),
        "JoinSession should succeed"
    );
    guest
}
