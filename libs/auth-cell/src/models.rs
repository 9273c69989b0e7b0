use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use shared_database::DbError;
use shared_models::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub user_id: String,
    pub email: String,
    /// True when the auth server holds the account until the email is confirmed.
    pub confirmation_required: bool,
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
    pub token_type: Option<String>,
    pub user: Value,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("An account with email {0} already exists")]
    EmailAlreadyRegistered(String),

    #[error("Invalid login credentials")]
    InvalidCredentials,

    #[error("{0}")]
    Validation(String),

    #[error("Unexpected auth server response: {0}")]
    UnexpectedResponse(String),

    #[error(transparent)]
    Database(#[from] DbError),
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::EmailAlreadyRegistered(_) => AppError::Conflict(err.to_string()),
            AuthError::InvalidCredentials => AppError::Auth(err.to_string()),
            AuthError::Validation(msg) => AppError::ValidationError(msg),
            AuthError::UnexpectedResponse(msg) => AppError::ExternalService(msg),
            AuthError::Database(db) => db.into(),
        }
    }
}
