//! Mapping of core errors onto HTTP responses.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use ragline_core::RagError;

use crate::protocol::ErrorBody;

/// An error returned by a handler.
#[derive(Debug)]
pub struct ApiError(pub RagError);

impl From<RagError> for ApiError {
    fn from(error: RagError) -> Self {
        Self(error)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(RagError::Validation(rejection.body_text()))
    }
}

fn error_kind(error: &RagError) -> &'static str {
    match error {
        RagError::Validation(_) => "invalid_request",
        RagError::Provider { .. } => "provider_unavailable",
        RagError::Timeout { .. } => "timeout",
        RagError::Batch { .. } => "ingest_failed",
        RagError::RateLimited { .. } => "rate_limited",
        RagError::NotFound(_) => "not_found",
        RagError::VectorStore { .. } => "vector_store_error",
        RagError::Config(_) => "configuration_error",
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody { error: error_kind(&self.0).to_string(), detail: self.0.to_string() };
        let mut response = (status, Json(body)).into_response();

        if let Some(retry_after) = self.0.retry_after() {
            let secs = retry_after.as_secs_f64().ceil().max(1.0) as u64;
            response.headers_mut().insert(RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}
