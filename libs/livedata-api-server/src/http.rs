use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;

use super::AppState;

// ═══════════════════════════════════════════════════════════════
//  REST: GET /api/topics
// ═══════════════════════════════════════════════════════════════

pub(crate) async fn handle_list_topics(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(state.broker.topics()).into_response()
}

// ═══════════════════════════════════════════════════════════════
//  REST: GET /api/topics/{name}
// ═══════════════════════════════════════════════════════════════

pub(crate) async fn handle_topic(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.broker.topic(&name) {
        Some(topic) => axum::Json(topic).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            format!("error: topic '{name}' not found"),
        )
            .into_response(),
    }
}
