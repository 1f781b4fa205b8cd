use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use furikae_core::{CoreError, ErrorKind};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("{0}")]
    BadRequest(String),
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Core(err) => {
                let status = match err.kind() {
                    ErrorKind::Validation => match err {
                        CoreError::NotFound { .. } => StatusCode::NOT_FOUND,
                        _ => StatusCode::BAD_REQUEST,
                    },
                    ErrorKind::StateConflict => StatusCode::CONFLICT,
                    ErrorKind::Transient => StatusCode::SERVICE_UNAVAILABLE,
                    ErrorKind::Fatal => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.code())
            }
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "validation_failed"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let error_message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("Internal Server Error: {}", self);
            "Internal Server Error".to_string()
        } else {
            if status == StatusCode::SERVICE_UNAVAILABLE {
                tracing::warn!("Service unavailable: {}", self);
            }
            self.to_string()
        };

        let body = Json(json!({
            "error": error_message,
            "code": code,
        }));

        (status, body).into_response()
    }
}
