use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::pubsub::PubSub;
use crate::rpc::messages::ServerMessage;
use crate::store::Store;
use crate::webhook::Caller;

/// Shared application state passed to all handlers and extractors.
///
/// `PubSub` is cheaply cloneable (it wraps an `Arc` internally), so cloning
/// `AppState` for each request is inexpensive.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub pubsub: PubSub<ServerMessage>,
    /// Outbound notifier; `None` when no public server URL is configured.
    pub webhook: Option<Arc<dyn Caller>>,
    /// Public URL of this relay, used by the HTTPS-redirect middleware.
    pub server_url: Option<Arc<str>>,
    /// Origins allowed to open WebSocket connections. Empty set allows all.
    pub allowed_origins: Arc<HashSet<String>>,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}
