mod common;

use std::collections::HashSet;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::{client::IntoClientRequest, Message};

use common::{SESSION_ID, SESSION_KEY};
use walletlinkd::state::AppState;

/// Serve the app on an ephemeral port; returns `host:port`.
async fn spawn_app(state: AppState) -> String {
    let app = common::create_test_app(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr.to_string()
}

#[tokio::test]
async fn heartbeat_is_echoed_as_a_single_byte_frame() {
    let addr = spawn_app(common::test_state()).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/rpc"))
        .await
        .unwrap();

    ws.send(Message::Text("h".to_owned())).await.unwrap();

    let reply = ws.next().await.unwrap().unwrap();
    assert_eq!(reply, Message::Text("h".to_owned()));
}

#[tokio::test]
async fn session_bootstrap_over_a_real_socket() {
    let addr = spawn_app(common::test_state()).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/rpc"))
        .await
        .unwrap();

    ws.send(Message::Text(
        json!({
            "type": "HostSession",
            "id": 1,
            "sessionId": SESSION_ID,
            "sessionKey": SESSION_KEY,
        })
        .to_string(),
    ))
    .await
    .unwrap();

    let reply = ws.next().await.unwrap().unwrap();
    let Message::Text(text) = reply else {
        panic!("expected a text frame, got {reply:?}");
    };
    let body: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(body, json!({"type": "OK", "id": 1, "sessionId": SESSION_ID}));
}

#[tokio::test]
async fn origin_allowlist_gates_the_handshake() {
    let mut state = common::test_state();
    state.allowed_origins = Arc::new(HashSet::from(["https://app.example.com".to_owned()]));
    let addr = spawn_app(state).await;

    // Listed origin upgrades fine.
    let mut request = format!("ws://{addr}/rpc").into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Origin", "https://app.example.com".parse().unwrap());
    let (mut ws, _) = tokio_tungstenite::connect_async(request).await.unwrap();
    ws.send(Message::Text("h".to_owned())).await.unwrap();
    assert_eq!(
        ws.next().await.unwrap().unwrap(),
        Message::Text("h".to_owned())
    );

    // Unlisted origin is refused before the upgrade.
    let mut request = format!("ws://{addr}/rpc").into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Origin", "https://evil.example".parse().unwrap());
    let result = tokio_tungstenite::connect_async(request).await;
    assert!(result.is_err(), "handshake should be refused");
}
