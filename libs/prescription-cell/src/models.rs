use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use consultation_cell::ConsultationError;
use shared_database::DbError;
use shared_models::error::AppError;

/// Days between refill check-ins.
pub const CHECK_IN_INTERVAL_DAYS: i64 = 30;

// ==============================================================================
// PRESCRIPTIONS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prescription {
    pub id: Uuid,
    pub consultation_id: Uuid,
    pub patient_id: Uuid,
    pub provider_id: Uuid,
    pub medication_name: String,
    pub dosage: String,
    pub instructions: Option<String>,
    pub quantity: i32,
    pub refills_authorized: i32,
    pub refills_used: i32,
    pub status: PrescriptionStatus,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Prescription {
    pub fn refills_remaining(&self) -> i32 {
        (self.refills_authorized - self.refills_used).max(0)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Active, unexpired and with at least one refill left.
    pub fn can_refill_at(&self, now: DateTime<Utc>) -> bool {
        self.status == PrescriptionStatus::Active
            && !self.is_expired_at(now)
            && self.refills_remaining() > 0
    }

    pub fn is_prescribed_by(&self, user_id: &str) -> bool {
        self.provider_id.to_string() == user_id
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.patient_id.to_string() == user_id
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PrescriptionStatus {
    Active,
    Paused,
    Cancelled,
    Completed,
    Expired,
}

impl PrescriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrescriptionStatus::Active => "active",
            PrescriptionStatus::Paused => "paused",
            PrescriptionStatus::Cancelled => "cancelled",
            PrescriptionStatus::Completed => "completed",
            PrescriptionStatus::Expired => "expired",
        }
    }

    pub fn valid_transitions(&self) -> &'static [PrescriptionStatus] {
        use PrescriptionStatus::*;
        match self {
            Active => &[Paused, Cancelled, Completed, Expired],
            Paused => &[Active, Cancelled],
            Cancelled | Completed | Expired => &[],
        }
    }

    pub fn can_transition_to(&self, next: PrescriptionStatus) -> bool {
        self.valid_transitions().contains(&next)
    }
}

impl fmt::Display for PrescriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuePrescriptionRequest {
    pub consultation_id: Uuid,
    pub medication_name: String,
    pub dosage: String,
    pub instructions: Option<String>,
    pub quantity: i32,
    pub refills_authorized: i32,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PrescriptionListQuery {
    pub patient_id: Option<Uuid>,
    pub status: Option<PrescriptionStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrescriptionStatusUpdate {
    pub status: PrescriptionStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrescriptionDetail {
    #[serde(flatten)]
    pub prescription: Prescription,
    pub refills_remaining: i32,
    pub last_check_in_at: Option<DateTime<Utc>>,
    pub next_check_in_due: DateTime<Utc>,
}

/// The next check-in falls one interval after the last one, or after issue if none yet.
pub fn next_check_in_due(last: DateTime<Utc>, interval_days: i64) -> DateTime<Utc> {
    last + Duration::days(interval_days)
}

// ==============================================================================
// REFILL CHECK-INS
// ==============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckInAnswers {
    pub taking_as_prescribed: bool,
    #[serde(default)]
    pub side_effects: Option<String>,
    #[serde(default)]
    pub side_effect_severity: u8,
    #[serde(default)]
    pub new_medications: Vec<String>,
    #[serde(default)]
    pub new_conditions: Vec<String>,
    #[serde(default)]
    pub pregnant_or_planning: bool,
    pub effectiveness: u8,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckInStatus {
    AutoApproved,
    PendingReview,
    Approved,
    Denied,
}

impl CheckInStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckInStatus::AutoApproved => "auto_approved",
            CheckInStatus::PendingReview => "pending_review",
            CheckInStatus::Approved => "approved",
            CheckInStatus::Denied => "denied",
        }
    }

    pub fn consumes_refill(&self) -> bool {
        matches!(self, CheckInStatus::AutoApproved | CheckInStatus::Approved)
    }
}

impl fmt::Display for CheckInStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefillCheckIn {
    pub id: Uuid,
    pub prescription_id: Uuid,
    pub patient_id: Uuid,
    pub answers: Value,
    pub needs_provider_review: bool,
    #[serde(default)]
    pub flagged_reasons: Vec<String>,
    pub status: CheckInStatus,
    pub reviewed_by: Option<Uuid>,
    pub review_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewCheckInRequest {
    pub approve: bool,
    pub notes: Option<String>,
}

/// Outcome of running the escalation rules over a set of answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefillDecision {
    pub reasons: Vec<String>,
}

impl RefillDecision {
    pub fn needs_review(&self) -> bool {
        !self.reasons.is_empty()
    }

    pub fn status(&self) -> CheckInStatus {
        if self.needs_review() {
            CheckInStatus::PendingReview
        } else {
            CheckInStatus::AutoApproved
        }
    }
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Debug, Error)]
pub enum PrescriptionError {
    #[error("Prescription not found")]
    NotFound,

    #[error("Check-in not found")]
    CheckInNotFound,

    #[error("Cannot move prescription from {from} to {to}")]
    InvalidStatusTransition {
        from: PrescriptionStatus,
        to: PrescriptionStatus,
    },

    #[error("Consultation is {0}; prescriptions need an assigned, in-review or completed consultation")]
    ConsultationNotReady(String),

    #[error("no refills remaining")]
    NoRefillsRemaining,

    #[error("Check-in has already been reviewed")]
    AlreadyReviewed,

    #[error("Prescription was modified by someone else; reload and retry")]
    ConcurrentModification,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Consultation(#[from] ConsultationError),

    #[error(transparent)]
    Database(DbError),
}

impl From<DbError> for PrescriptionError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(_) => PrescriptionError::NotFound,
            other => PrescriptionError::Database(other),
        }
    }
}

impl From<PrescriptionError> for AppError {
    fn from(err: PrescriptionError) -> Self {
        match err {
            PrescriptionError::NotFound | PrescriptionError::CheckInNotFound => {
                AppError::NotFound(err.to_string())
            }
            PrescriptionError::InvalidStatusTransition { .. }
            | PrescriptionError::ConsultationNotReady(_)
            | PrescriptionError::NoRefillsRemaining
            | PrescriptionError::AlreadyReviewed
            | PrescriptionError::ConcurrentModification => AppError::Conflict(err.to_string()),
            PrescriptionError::Forbidden(msg) => AppError::Forbidden(msg),
            PrescriptionError::Validation(msg) => AppError::ValidationError(msg),
            PrescriptionError::Consultation(e) => e.into(),
            PrescriptionError::Database(db) => db.into(),
        }
    }
}
