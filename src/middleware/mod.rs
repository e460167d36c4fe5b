use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, Method, StatusCode, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::state::AppState;

/// Redirect plain-HTTP GETs to the canonical HTTPS server URL and refuse
/// everything else arriving over plain HTTP. Layered only when FORCE_SSL is
/// enabled; transport security itself terminates at the upstream proxy,
/// which reports the original scheme via X-Forwarded-Proto.
pub async fn require_https(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if is_https(&req) {
        return next.run(req).await;
    }

    // FORCE_SSL without SERVER_URL is rejected at startup.
    let Some(server_url) = state.server_url.clone() else {
        return next.run(req).await;
    };

    if req.method() != Method::GET {
        return StatusCode::FORBIDDEN.into_response();
    }

    let location = redirect_location(&server_url, req.uri());
    match HeaderValue::from_str(&location) {
        Ok(value) => {
            let mut response = StatusCode::MOVED_PERMANENTLY.into_response();
            response.headers_mut().insert(header::LOCATION, value);
            response
        }
        Err(e) => {
            tracing::error!(error = ?e, "failed to build redirect location");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn is_https(req: &Request) -> bool {
    if req.uri().scheme_str() == Some("https") {
        return true;
    }
    req.headers()
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("https"))
        .unwrap_or(false)
}

fn redirect_location(server_url: &str, uri: &Uri) -> String {
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    format!("{}{}", server_url.trim_end_matches('/'), path_and_query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::{body::Body, http::Request as HttpRequest, middleware, routing::get, Router};
    use tower::ServiceExt;

    use crate::pubsub::PubSub;
    use crate::state::AppState;
    use crate::store::MemoryStore;

    fn test_state() -> AppState {
        AppState {
            store: Arc::new(MemoryStore::new()),
            pubsub: PubSub::new(),
            webhook: None,
            server_url: Some(Arc::from("https://relay.example.com")),
            allowed_origins: Arc::new(HashSet::new()),
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(30),
        }
    }

    fn test_app() -> Router {
        let state = test_state();
        Router::new()
            .route("/hello", get(|| async { "hello" }))
            .layer(middleware::from_fn_with_state(state.clone(), require_https))
            .with_state(state)
    }

    #[tokio::test]
    async fn plain_http_get_redirects_to_canonical_url() {
        let response = test_app()
            .oneshot(
                HttpRequest::builder()
                    .uri("/hello?x=1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "https://relay.example.com/hello?x=1"
        );
    }

    #[tokio::test]
    async fn forwarded_https_passes_through() {
        let response = test_app()
            .oneshot(
                HttpRequest::builder()
                    .uri("/hello")
                    .header("x-forwarded-proto", "https")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn plain_http_post_is_refused() {
        let response = test_app()
            .oneshot(
                HttpRequest::builder()
                    .method(Method::POST)
                    .uri("/hello")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
