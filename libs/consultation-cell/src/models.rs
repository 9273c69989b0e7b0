use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use shared_database::DbError;
use shared_models::error::AppError;
use provider_cell::ProviderError;

// ==============================================================================
// CONSULTATIONS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Consultation {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub provider_id: Option<Uuid>,
    pub condition: String,
    pub symptoms: String,
    #[serde(default)]
    pub intake_answers: Value,
    pub patient_state: String,
    pub status: ConsultationStatus,
    pub provider_notes: Option<String>,
    pub diagnosis: Option<String>,
    pub recommended_protocol_id: Option<Uuid>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Consultation {
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.patient_id.to_string() == user_id
    }

    pub fn is_assigned_to(&self, user_id: &str) -> bool {
        self.provider_id.is_some_and(|p| p.to_string() == user_id)
    }

    pub fn is_participant(&self, user_id: &str) -> bool {
        self.is_owned_by(user_id) || self.is_assigned_to(user_id)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConsultationStatus {
    Pending,
    Assigned,
    InReview,
    Completed,
    Cancelled,
    Rejected,
}

impl ConsultationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsultationStatus::Pending => "pending",
            ConsultationStatus::Assigned => "assigned",
            ConsultationStatus::InReview => "in_review",
            ConsultationStatus::Completed => "completed",
            ConsultationStatus::Cancelled => "cancelled",
            ConsultationStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConsultationStatus::Completed | ConsultationStatus::Cancelled | ConsultationStatus::Rejected
        )
    }

    /// Closed without treatment; the thread is locked.
    pub fn accepts_messages(&self) -> bool {
        !matches!(self, ConsultationStatus::Cancelled | ConsultationStatus::Rejected)
    }
}

impl fmt::Display for ConsultationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateConsultationRequest {
    pub condition: String,
    pub symptoms: String,
    pub intake_answers: Option<Value>,
    pub patient_state: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConsultationListQuery {
    pub status: Option<ConsultationStatus>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssignConsultationRequest {
    pub provider_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: ConsultationStatus,
    pub provider_notes: Option<String>,
    pub diagnosis: Option<String>,
    pub recommended_protocol_id: Option<Uuid>,
}

// ==============================================================================
// MESSAGES
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsultationMessage {
    pub id: Uuid,
    pub consultation_id: Uuid,
    pub sender_id: Uuid,
    pub sender_role: String,
    pub body: String,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub body: String,
}

// ==============================================================================
// AI ASSIST
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssistSource {
    Ai,
    Template,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistDraft {
    pub consultation_id: Uuid,
    pub draft: String,
    pub source: AssistSource,
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Debug, Error)]
pub enum ConsultationError {
    #[error("Consultation not found")]
    NotFound,

    #[error("Cannot move consultation from {from} to {to}")]
    InvalidStatusTransition {
        from: ConsultationStatus,
        to: ConsultationStatus,
    },

    #[error("Consultation was modified by someone else; reload and retry")]
    ConcurrentModification,

    #[error("{0}")]
    Forbidden(String),

    #[error("Messages are closed for a {0} consultation")]
    MessagingClosed(ConsultationStatus),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Database(DbError),
}

impl From<DbError> for ConsultationError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(_) => ConsultationError::NotFound,
            other => ConsultationError::Database(other),
        }
    }
}

impl From<ConsultationError> for AppError {
    fn from(err: ConsultationError) -> Self {
        match err {
            ConsultationError::NotFound => AppError::NotFound(err.to_string()),
            ConsultationError::InvalidStatusTransition { .. }
            | ConsultationError::ConcurrentModification
            | ConsultationError::MessagingClosed(_) => AppError::Conflict(err.to_string()),
            ConsultationError::Forbidden(msg) => AppError::Forbidden(msg),
            ConsultationError::Validation(msg) => AppError::ValidationError(msg),
            ConsultationError::Provider(e) => e.into(),
            ConsultationError::Database(db) => db.into(),
        }
    }
}
