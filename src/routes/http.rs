//! HTTP endpoint handlers. These are thin wrappers that forward to the
//! engine; each handler is instrumented and logs parameters and basic result
//! info. Per the engine's error design, none of them can fail: every outcome
//! is a 200 with a best-effort body.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::domain::Identity;
use crate::protocol::*;
use crate::state::AppState;

#[instrument(level = "info")]
pub async fn http_health() -> impl IntoResponse {
    Json(HealthOut { ok: true })
}

#[instrument(level = "info", skip(state))]
pub async fn http_list_exercises(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut out: Vec<ExerciseOut> = state
        .coordinator
        .exercises()
        .map(|e| ExerciseOut {
            id: e.id.clone(),
            title: e.title.clone(),
            scenario: e.scenario.clone(),
            max_points: e.max_points,
            rubric: e.rubric.clone(),
            previous_difficulty: state.ledger.previous_difficulty(&e.id, e.max_points),
        })
        .collect();
    out.sort_by(|a, b| a.id.cmp(&b.id));
    Json(out)
}

#[instrument(level = "info", skip(state, body), fields(exercise = %body.exercise_id, text_len = body.text.len()))]
pub async fn http_submit(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SubmitIn>,
) -> impl IntoResponse {
    let id = state.coordinator.submit(&body.exercise_id, &body.text).await;
    info!(target: "engine", accepted = id.is_some(), "HTTP submit handled");
    Json(SubmitOut {
        accepted: id.is_some(),
        id,
    })
}

#[instrument(level = "info", skip(state), fields(%id))]
pub async fn http_submission_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let record = state
        .coordinator
        .records()
        .await
        .into_iter()
        .find(|r| r.id == id);
    match record {
        Some(r) => Json(StatusOut::from(&r)).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[instrument(level = "info", skip(state))]
pub async fn http_session_history(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let out: Vec<StatusOut> = state
        .coordinator
        .records()
        .await
        .iter()
        .map(StatusOut::from)
        .collect();
    Json(out)
}

#[instrument(level = "info", skip(state))]
pub async fn http_feed(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(FeedOut {
        entries: state.feed.current().await,
        derived_streak: state.feed.derived_streak().await,
    })
}

/// Kick off a refresh and return the (possibly still stale) cache. The
/// single-flight guard means hammering this endpoint costs one query.
#[instrument(level = "info", skip(state))]
pub async fn http_feed_refresh(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.feed.refresh().await;
    Json(FeedOut {
        entries: state.feed.current().await,
        derived_streak: state.feed.derived_streak().await,
    })
}

#[instrument(level = "info", skip(state))]
pub async fn http_progress(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snap = state.ledger.snapshot();
    Json(ProgressOut {
        rating: snap.rating,
        current_streak: snap.streak.current,
        longest_streak: snap.streak.longest,
        freezes_available: snap.streak.freezes_available,
        completed_exercises: snap.completed_exercises(),
    })
}

#[instrument(level = "info", skip(state, body), fields(count = body.count))]
pub async fn http_add_freeze(
    State(state): State<Arc<AppState>>,
    Json(body): Json<FreezeIn>,
) -> impl IntoResponse {
    state.ledger.add_freeze(body.count);
    let snap = state.ledger.snapshot();
    Json(ProgressOut {
        rating: snap.rating,
        current_streak: snap.streak.current,
        longest_streak: snap.streak.longest,
        freezes_available: snap.streak.freezes_available,
        completed_exercises: snap.completed_exercises(),
    })
}

#[instrument(level = "info", skip(state, body), fields(user = %body.user_id))]
pub async fn http_set_identity(
    State(state): State<Arc<AppState>>,
    Json(body): Json<IdentityIn>,
) -> impl IntoResponse {
    state
        .set_identity(Identity {
            user_id: Some(body.user_id),
            email: body.email,
            display_name: body.display_name.unwrap_or_else(|| "Anonymous User".into()),
        })
        .await;
    StatusCode::NO_CONTENT
}

#[instrument(level = "info", skip(state))]
pub async fn http_logout(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.logout().await;
    StatusCode::NO_CONTENT
}
