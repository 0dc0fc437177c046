pub mod routes;

use axum::http::StatusCode;

use crate::errors::EvaluationError;

// Only caller input problems leave the service as a non-2xx status
pub fn status_for(error: &EvaluationError) -> StatusCode {
    match error {
        EvaluationError::InvalidRequest(_) | EvaluationError::InvalidContext(_) => {
            StatusCode::BAD_REQUEST
        }
    }
}
