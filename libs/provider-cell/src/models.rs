use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use shared_database::DbError;
use shared_models::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub license_number: String,
    pub licensed_states: Vec<String>,
    pub specialty: String,
    pub bio: Option<String>,
    pub accepting_consultations: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Provider {
    pub fn display_name(&self) -> String {
        format!("Dr. {} {}", self.first_name, self.last_name)
    }

    pub fn is_licensed_in(&self, state: &str) -> bool {
        self.licensed_states.iter().any(|s| s.eq_ignore_ascii_case(state))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateProviderRequest {
    /// Auth user id the provider signs in with.
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub license_number: String,
    pub licensed_states: Vec<String>,
    pub specialty: String,
    pub bio: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateProviderRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub license_number: Option<String>,
    pub licensed_states: Option<Vec<String>>,
    pub specialty: Option<String>,
    pub bio: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityUpdate {
    pub accepting_consultations: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderListQuery {
    pub specialty: Option<String>,
    pub state: Option<String>,
    pub accepting: Option<bool>,
}

/// A provider together with how many consultations they currently hold open.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderLoad {
    pub provider: Provider,
    pub open_consultations: usize,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider not found")]
    NotFound,

    #[error("Provider with email {0} already exists")]
    EmailAlreadyExists(String),

    #[error("No provider licensed in {state} is accepting consultations")]
    NoneAvailable { state: String },

    #[error("No fields to update")]
    EmptyUpdate,

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Database(DbError),
}

impl From<DbError> for ProviderError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(_) => ProviderError::NotFound,
            other => ProviderError::Database(other),
        }
    }
}

impl From<ProviderError> for AppError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NotFound => AppError::NotFound(err.to_string()),
            ProviderError::EmailAlreadyExists(_) => AppError::Conflict(err.to_string()),
            ProviderError::NoneAvailable { .. } => AppError::Conflict(err.to_string()),
            ProviderError::EmptyUpdate => AppError::BadRequest(err.to_string()),
            ProviderError::Validation(msg) => AppError::ValidationError(msg),
            ProviderError::Database(db) => db.into(),
        }
    }
}
