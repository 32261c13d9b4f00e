use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

// Import Axum types for HTTP response conversion
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::engine::EngineError;

/// Structured validation errors with field-level error mapping
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValidationErrors {
    Single { field: String, message: String },
    Multiple { fields: HashMap<String, String> },
}

/// The custom error type for the application.
#[derive(Debug, Error)]
pub enum Error {
    /// An error originating from the sqlx library.
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// A validation error with field-level details.
    #[error("Validation error: {0:?}")]
    Validation(ValidationErrors),

    /// A not found error (resource does not exist).
    #[error("Not found: {0}")]
    NotFound(String),

    /// A forbidden error (user lacks permission).
    #[error("Access forbidden: {0}")]
    Forbidden(String),

    /// The execution engine failed to start, run, or report a chat execution.
    #[error("Operational error: {0}")]
    Operational(String),

    /// An internal server error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// A JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

/// A type alias for `Result<T, Error>` to simplify function signatures.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Shorthand for a single-field validation error.
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        Error::Validation(ValidationErrors::Single {
            field: field.to_string(),
            message: message.into(),
        })
    }
}

impl From<EngineError> for Error {
    fn from(err: EngineError) -> Self {
        Error::Operational(err.to_string())
    }
}

/// Convert custom Error to HTTP response
///
/// This implementation maps each error variant to an appropriate HTTP status code
/// and returns a JSON response with an error message and error code.
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let body = match &self {
            Error::Validation(errors) => match errors {
                ValidationErrors::Single { field, message } => {
                    serde_json::json!({
                        "error": "Validation failed",
                        "code": "VALIDATION_ERROR",
                        "fields": {
                            field: message
                        }
                    })
                }
                ValidationErrors::Multiple { fields } => {
                    serde_json::json!({
                        "error": "Validation failed",
                        "code": "VALIDATION_ERROR",
                        "fields": fields
                    })
                }
            },
            Error::NotFound(msg) => {
                serde_json::json!({
                    "error": msg,
                    "code": "NOT_FOUND"
                })
            }
            Error::Forbidden(msg) => {
                serde_json::json!({
                    "error": msg,
                    "code": "FORBIDDEN"
                })
            }
            Error::Operational(msg) => {
                serde_json::json!({
                    "error": msg,
                    "code": "OPERATIONAL_ERROR"
                })
            }
            Error::Sqlx(_) => {
                serde_json::json!({
                    "error": "Database error",
                    "code": "INTERNAL_ERROR"
                })
            }
            Error::Internal(msg) => {
                serde_json::json!({
                    "error": msg,
                    "code": "INTERNAL_ERROR"
                })
            }
            Error::Json(_) => {
                serde_json::json!({
                    "error": "Serialization error",
                    "code": "INTERNAL_ERROR"
                })
            }
            Error::Config(_) => {
                serde_json::json!({
                    "error": "Configuration error",
                    "code": "CONFIG_ERROR"
                })
            }
        };

        let status = match self {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::Operational(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Sqlx(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(body)).into_response()
    }
}
