use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{
    auth::AuthedSession,
    error::{AppError, AppResult},
    models::Event,
    state::AppState,
};

// ── GET /events ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct GetEventsParams {
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub unseen: bool,
}

#[derive(Debug, Serialize)]
pub struct GetEventsResponse {
    pub timestamp: i64,
    pub events: Vec<Event>,
}

/// List a session's events updated after `timestamp`, newest first. The
/// returned `timestamp` is the high-water mark for the client's next poll.
pub async fn get_events(
    State(state): State<AppState>,
    AuthedSession(session): AuthedSession,
    Query(params): Query<GetEventsParams>,
) -> AppResult<Json<GetEventsResponse>> {
    let events = Event::load_all_for_session(
        state.store.as_ref(),
        &session.id,
        params.timestamp,
        params.unseen,
    )
    .await?;

    Ok(Json(GetEventsResponse {
        timestamp: Utc::now().timestamp(),
        events,
    }))
}

// ── GET /events/:id ─────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct GetEventResponse {
    pub event: Event,
}

pub async fn get_event(
    State(state): State<AppState>,
    AuthedSession(session): AuthedSession,
    Path(event_id): Path<String>,
) -> AppResult<Json<GetEventResponse>> {
    let event = Event::load(state.store.as_ref(), &session.id, &event_id)
        .await?
        .ok_or_else(|| AppError::NotFound("event not found".into()))?;

    Ok(Json(GetEventResponse { event }))
}

// ── POST /events/:id/seen ───────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct MarkEventSeenResponse {
    pub success: bool,
}

/// Acknowledge an event. Succeeds whether or not the event exists, matching
/// the store's idempotent mark-seen semantics.
pub async fn mark_event_seen(
    State(state): State<AppState>,
    AuthedSession(session): AuthedSession,
    Path(event_id): Path<String>,
) -> AppResult<Json<MarkEventSeenResponse>> {
    Event::mark_seen(state.store.as_ref(), &session.id, &event_id).await?;

    Ok(Json(MarkEventSeenResponse { success: true }))
}
