use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

use crate::model::ModelError;

/// Request-level failures, mapped to HTTP status codes at the boundary.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("model inference failed: {0}")]
    Inference(String),
    #[error("image encoding failed: {0}")]
    Encoding(String),
}

impl From<ModelError> for ServiceError {
    fn from(err: ModelError) -> Self {
        ServiceError::Inference(err.to_string())
    }
}

impl ResponseError for ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        match self {
            ServiceError::InvalidInput(detail) => {
                HttpResponse::BadRequest().json(json!({ "detail": detail }))
            }
            other => {
                // The caller only ever sees the generic message.
                log::error!("request failed: {}", other);
                HttpResponse::InternalServerError()
                    .json(json!({ "detail": "An unexpected error occurred." }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_input_maps_to_400_with_detail() {
        let err = ServiceError::InvalidInput("could not decode image".into());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn internal_errors_map_to_500() {
        let err = ServiceError::Inference("tensor shape mismatch".into());
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        let err = ServiceError::Encoding("png writer failed".into());
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
