use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Application-level error type. Every variant renders as the
/// `{success: false, message}` JSON shape the form endpoints return.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("You must be logged in")]
    Unauthorized,

    #[error("You do not have permission to perform this action")]
    Forbidden,

    #[error("An error occurred while processing the request")]
    Database(#[from] sqlx::Error),

    #[error("An error occurred while processing the request")]
    Hash(#[from] bcrypt::BcryptError),

    #[error("An error occurred while processing the request")]
    Token(#[from] jsonwebtoken::errors::Error),
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidCredentials | AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::Database(_) | AppError::Hash(_) | AppError::Token(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        // Internal detail goes to the log, never to the client.
        match self {
            AppError::Database(e) => log::error!("Database error: {e}"),
            AppError::Hash(e) => log::error!("Password hashing error: {e}"),
            AppError::Token(e) => log::error!("Session token error: {e}"),
            _ => {}
        }
        HttpResponse::build(self.status_code()).json(json!({
            "success": false,
            "message": self.to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_bad_request() {
        let err = AppError::Validation("Invalid input data".into());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "Invalid input data");
    }

    #[test]
    fn database_errors_hide_detail() {
        let err = AppError::Database(sqlx::Error::RowNotFound);
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.to_string().contains("row"));
    }
}
