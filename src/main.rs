use axum::{
    http::{header, HeaderValue},
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use std::sync::Arc;

use walletlinkd::config::Config;
use walletlinkd::handlers;
use walletlinkd::pubsub::PubSub;
use walletlinkd::rpc;
use walletlinkd::state::AppState;
use walletlinkd::store::{postgres, MemoryStore, PostgresStore, Store};
use walletlinkd::webhook::{Caller, Webhook};

#[tokio::main]
async fn main() {
    // Initialize tracing — JSON in production, human-readable in dev.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "walletlinkd=info,tower_http=info,sqlx=warn"
            .parse()
            .unwrap()
    });

    let config = Config::from_env().expect("Failed to load configuration");

    if config.is_production() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("walletlinkd {} starting...", env!("CARGO_PKG_VERSION"));

    let store: Arc<dyn Store> = match &config.postgres_url {
        Some(url) => {
            let pool = postgres::create_pool(url)
                .await
                .expect("Failed to create database pool");

            // Auto-run pending migrations on startup.
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .expect("Failed to run database migrations");
            info!("Database migrations applied");

            Arc::new(PostgresStore::new(pool))
        }
        None => {
            tracing::warn!("POSTGRES_URL not set; using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    // Outbound webhook calls carry the public server URL; without one
    // configured there is nothing meaningful to send.
    let webhook = config
        .server_url
        .as_ref()
        .map(|url| -> Arc<dyn Caller> { Arc::new(Webhook::new(url.clone())) });

    let app_state = AppState {
        store,
        pubsub: PubSub::new(),
        webhook,
        server_url: config.server_url.as_deref().map(Arc::from),
        allowed_origins: Arc::new(config.allowed_origins.clone()),
        read_timeout: config.read_timeout,
        write_timeout: config.write_timeout,
    };

    let mut app = Router::new()
        .route("/health", get(handlers::health_check))
        // WebSocket relay
        .route("/rpc", get(rpc::rpc_handler))
        // Event replay over HTTP (Basic auth: sessionId / sessionKey)
        .route("/events", get(handlers::events::get_events))
        .route("/events/:id", get(handlers::events::get_event))
        .route("/events/:id/seen", post(handlers::events::mark_event_seen));

    if let Some(web_root) = &config.web_root {
        app = app.fallback_service(ServeDir::new(web_root));
        info!("Serving static assets from {}", web_root.display());
    }

    let mut app = app
        // ── Security response headers ──────────────────────────────────────
        .layer(SetResponseHeaderLayer::if_not_present(
            header::HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::HeaderName::from_static("x-frame-options"),
            HeaderValue::from_static("DENY"),
        ))
        .layer(TraceLayer::new_for_http());

    if config.force_ssl {
        app = app.layer(middleware::from_fn_with_state(
            app_state.clone(),
            walletlinkd::middleware::require_https,
        ));
        info!("HTTPS redirect enabled");
    }

    let app = app.with_state(app_state);

    let addr = config.server_addr();
    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .await
        .expect("Server failed to start");
}
