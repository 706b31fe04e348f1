// src/errors.rs
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Service failure: {0}")]
    ServiceFailure(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Invalid image data: {0}")]
    InvalidImageData(String),

    #[error("Cancelled during {0}")]
    Cancelled(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl PipelineError {
    /// Rejections abort the run before any adapter is called.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            PipelineError::InvalidInput(_) | PipelineError::InvalidArgument(_)
        )
    }
}

/// Error channel of the external capabilities. Kept apart from
/// [`PipelineError`] so adapters can tell a missing model from other failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CapabilityError {
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("{0}")]
    Failed(String),
}

impl ResponseError for PipelineError {
    fn error_response(&self) -> HttpResponse {
        match self {
            PipelineError::InvalidInput(_) | PipelineError::InvalidArgument(_) => {
                HttpResponse::BadRequest().json(serde_json::json!({
                    "error": "Invalid request",
                    "message": self.to_string()
                }))
            }
            PipelineError::InvalidImageData(_) => {
                HttpResponse::BadRequest().json(serde_json::json!({
                    "error": "Image processing error",
                    "message": self.to_string()
                }))
            }
            PipelineError::ServiceFailure(_) | PipelineError::ServiceUnavailable(_) => {
                HttpResponse::ServiceUnavailable().json(serde_json::json!({
                    "error": "AI service error",
                    "message": self.to_string()
                }))
            }
            PipelineError::Cancelled(_) => {
                HttpResponse::ServiceUnavailable().json(serde_json::json!({
                    "error": "Request cancelled",
                    "message": self.to_string()
                }))
            }
            PipelineError::Unexpected(_) => {
                HttpResponse::InternalServerError().json(serde_json::json!({
                    "error": "Internal error",
                    "message": self.to_string()
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;

    #[test]
    fn rejections_map_to_bad_request() {
        let err = PipelineError::InvalidInput("empty image".to_string());
        assert!(err.is_rejection());
        assert_eq!(err.error_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn service_errors_map_to_unavailable() {
        let err = PipelineError::ServiceFailure("timeout".to_string());
        assert!(!err.is_rejection());
        assert_eq!(err.error_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
