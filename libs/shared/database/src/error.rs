use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

use shared_models::error::AppError;

/// Postgres unique_violation, surfaced by PostgREST in the `code` field.
const UNIQUE_VIOLATION: &str = "23505";
/// Postgres foreign_key_violation.
const FOREIGN_KEY_VIOLATION: &str = "23503";

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Authentication error: {0}")]
    Unauthorized(String),

    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid header value: {0}")]
    Header(String),
}

impl DbError {
    /// Classify an unsuccessful PostgREST or GoTrue response.
    pub fn from_response(status: StatusCode, body: &str) -> Self {
        let parsed: Option<Value> = serde_json::from_str(body).ok();
        let message = parsed
            .as_ref()
            .and_then(error_message)
            .unwrap_or_else(|| body.to_string());
        let pg_code = parsed
            .as_ref()
            .and_then(|v| v.get("code"))
            .and_then(|c| c.as_str())
            .unwrap_or_default()
            .to_string();
        let gotrue_code = parsed
            .as_ref()
            .and_then(|v| v.get("error_code"))
            .and_then(|c| c.as_str())
            .unwrap_or_default()
            .to_string();

        if pg_code == UNIQUE_VIOLATION
            || gotrue_code == "user_already_exists"
            || gotrue_code == "email_exists"
            || (status == StatusCode::CONFLICT && pg_code != FOREIGN_KEY_VIOLATION)
        {
            return DbError::Conflict(message);
        }
        if pg_code == FOREIGN_KEY_VIOLATION {
            return DbError::InvalidReference(message);
        }

        match status {
            StatusCode::NOT_FOUND => DbError::NotFound(message),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => DbError::Unauthorized(message),
            _ => DbError::Api {
                status: status.as_u16(),
                message,
            },
        }
    }
}

fn error_message(value: &Value) -> Option<String> {
    ["message", "msg", "error_description", "error"]
        .iter()
        .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
        .map(str::to_string)
}

impl From<DbError> for AppError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(msg) => AppError::NotFound(msg),
            DbError::Conflict(msg) => AppError::Conflict(msg),
            DbError::Unauthorized(msg) => AppError::Auth(msg),
            DbError::InvalidReference(msg) => AppError::ValidationError(msg),
            DbError::Api { status, message } if status >= 500 => {
                AppError::ExternalService(format!("database unavailable ({}): {}", status, message))
            }
            DbError::Api { message, .. } => AppError::Database(message),
            DbError::Transport(e) => AppError::ExternalService(e.to_string()),
            DbError::Decode(e) => AppError::Internal(format!("unexpected database payload: {}", e)),
            DbError::Header(msg) => AppError::Internal(msg),
        }
    }
}
