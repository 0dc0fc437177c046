use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use tracing::debug;

use super::status_for;
use crate::evaluation::EvaluationRequest;
use crate::state::AppState;

/// Evaluate one flag for the supplied context
pub async fn evaluate(
    State(state): State<AppState>,
    payload: Result<Json<EvaluationRequest>, JsonRejection>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let Json(request) = payload.map_err(|e| {
        debug!(error = %e, "rejecting malformed evaluation request");
        (StatusCode::BAD_REQUEST, e.body_text())
    })?;

    let decision = state
        .orchestrator
        .evaluate(request)
        .await
        .map_err(|e| (status_for(&e), e.to_string()))?;

    Ok(Json(decision))
}
