use crate::domain::error::PipelineError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// Newtype so `PipelineError` can be returned from axum handlers.
pub struct ApiError(pub PipelineError);

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        Self(err)
    }
}

impl ApiError {
    /// 4xx tells the provider not to retry the same delivery, 5xx asks it to.
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            err if err.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
            PipelineError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
            PipelineError::IntegrityFailure(_) => StatusCode::UNAUTHORIZED,
            PipelineError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (error_code, message) = match &self.0 {
            PipelineError::MalformedPayload(msg) => ("malformed_payload", msg.clone()),
            PipelineError::IntegrityFailure(_) => {
                ("integrity_failure", "webhook authentication failed".to_string())
            }
            PipelineError::Validation(msg) => ("validation_error", msg.clone()),
            err if err.is_transient() => {
                tracing::error!("transient failure, provider should retry: {err}");
                ("temporarily_unavailable", "try again later".to_string())
            }
            err => {
                tracing::error!("internal error: {err}");
                ("internal_error", "internal error".to_string())
            }
        };

        let body = serde_json::json!({
            "error_code": error_code,
            "message": message,
        });

        (status, Json(body)).into_response()
    }
}
