use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde_json::json;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{models::SubjectId, AppState};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route(
            "/v1/subject-relations/{subject_id}",
            get(get_subject_relations),
        )
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "ok": true,
        "timestamp": Utc::now(),
        "index": state.relations.status(),
    }))
}

/// Absent subjects answer 200 with empty lists; absence is a valid result.
pub async fn get_subject_relations(
    State(state): State<AppState>,
    Path(subject_id): Path<SubjectId>,
) -> impl IntoResponse {
    Json(state.relations.relations(subject_id))
}
