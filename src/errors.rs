use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{message}")]
    RateLimited { message: String, wait_seconds: i64 },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Reports a unique-constraint violation as a conflict with `message`;
    /// anything else stays an internal error.
    pub fn conflict_on_unique(err: anyhow::Error, message: &str) -> Self {
        let unique = err
            .downcast_ref::<rusqlite::Error>()
            .and_then(|e| e.sqlite_error())
            .map(|e| {
                e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
            })
            .unwrap_or(false);

        if unique {
            AppError::Conflict(message.to_string())
        } else {
            AppError::Internal(err)
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        let body = match &self {
            AppError::Database(e) => {
                tracing::error!(error = %e, "database failure");
                serde_json::json!({ "error": "internal server error" })
            }
            AppError::Internal(e) => {
                tracing::error!(error = ?e, "internal failure");
                serde_json::json!({ "error": "internal server error" })
            }
            AppError::RateLimited {
                message,
                wait_seconds,
            } => serde_json::json!({
                "error": message,
                "details": { "waitTime": wait_seconds },
            }),
            _ => serde_json::json!({ "error": self.to_string() }),
        };

        (status, axum::Json(body)).into_response()
    }
}
