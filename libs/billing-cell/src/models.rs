use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use patient_cell::PatientError;
use shared_database::DbError;
use shared_models::error::AppError;

// ==============================================================================
// TREATMENT PROTOCOLS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BillingInterval {
    Monthly,
    Quarterly,
    Annually,
}

impl BillingInterval {
    pub fn period_days(&self) -> i64 {
        match self {
            BillingInterval::Monthly => 30,
            BillingInterval::Quarterly => 90,
            BillingInterval::Annually => 365,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreatmentProtocol {
    pub id: Uuid,
    pub name: String,
    pub condition: String,
    pub description: Option<String>,
    pub medication_name: Option<String>,
    pub default_dosage: Option<String>,
    pub price_cents: i64,
    pub billing_interval: BillingInterval,
    pub stripe_price_id: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateProtocolRequest {
    pub name: String,
    pub condition: String,
    pub description: Option<String>,
    pub medication_name: Option<String>,
    pub default_dosage: Option<String>,
    pub price_cents: i64,
    pub billing_interval: BillingInterval,
    pub stripe_price_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateProtocolRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub medication_name: Option<String>,
    pub default_dosage: Option<String>,
    pub price_cents: Option<i64>,
    pub billing_interval: Option<BillingInterval>,
    pub stripe_price_id: Option<String>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProtocolListQuery {
    pub condition: Option<String>,
}

// ==============================================================================
// SUBSCRIPTIONS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Paused,
    PastDue,
    Cancelled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Paused => "paused",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Cancelled => "cancelled",
        }
    }

    pub fn valid_transitions(&self) -> &'static [SubscriptionStatus] {
        use SubscriptionStatus::*;
        match self {
            Active => &[Paused, PastDue, Cancelled],
            Paused => &[Active, Cancelled],
            PastDue => &[Active, Cancelled],
            Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, next: SubscriptionStatus) -> bool {
        self.valid_transitions().contains(&next)
    }

    /// Maps a Stripe subscription status onto ours.
    pub fn from_stripe(status: &str) -> Self {
        match status {
            "active" | "trialing" => SubscriptionStatus::Active,
            "paused" => SubscriptionStatus::Paused,
            "canceled" | "incomplete_expired" => SubscriptionStatus::Cancelled,
            _ => SubscriptionStatus::PastDue,
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub protocol_id: Uuid,
    pub stripe_subscription_id: Option<String>,
    pub status: SubscriptionStatus,
    pub billing_interval: BillingInterval,
    pub price_cents: i64,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSubscriptionRequest {
    pub protocol_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionAction {
    Pause,
    Resume,
    Cancel,
}

impl SubscriptionAction {
    pub fn target(&self) -> SubscriptionStatus {
        match self {
            SubscriptionAction::Pause => SubscriptionStatus::Paused,
            SubscriptionAction::Resume => SubscriptionStatus::Active,
            SubscriptionAction::Cancel => SubscriptionStatus::Cancelled,
        }
    }

    /// Patient-initiated moves. `past_due -> active` is left to the
    /// `invoice.paid` webhook so resuming can't skip a failed payment.
    pub fn allowed_from(&self, from: SubscriptionStatus) -> bool {
        match self {
            SubscriptionAction::Pause => from == SubscriptionStatus::Active,
            SubscriptionAction::Resume => from == SubscriptionStatus::Paused,
            SubscriptionAction::Cancel => from.can_transition_to(SubscriptionStatus::Cancelled),
        }
    }
}

// ==============================================================================
// STRIPE
// ==============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct StripeCustomer {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PaymentIntent {
    pub id: String,
    pub status: String,
    pub amount: i64,
    pub client_secret: Option<String>,
}

impl PaymentIntent {
    pub fn succeeded(&self) -> bool {
        self.status == "succeeded"
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Refund {
    pub id: String,
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeSubscription {
    pub id: String,
    pub status: String,
    pub current_period_end: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StripeErrorKind {
    Card,
    InvalidRequest,
    Authentication,
    RateLimit,
    Api,
    Transport,
}

impl StripeErrorKind {
    pub fn from_type(error_type: &str) -> Self {
        match error_type {
            "card_error" => StripeErrorKind::Card,
            "invalid_request_error" => StripeErrorKind::InvalidRequest,
            "authentication_error" => StripeErrorKind::Authentication,
            "rate_limit_error" => StripeErrorKind::RateLimit,
            _ => StripeErrorKind::Api,
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("Stripe error ({kind:?}): {message}")]
pub struct StripeError {
    pub kind: StripeErrorKind,
    pub code: Option<String>,
    pub message: String,
}

impl StripeError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            kind: StripeErrorKind::Transport,
            code: None,
            message: message.into(),
        }
    }

    pub fn is_card_error(&self) -> bool {
        self.kind == StripeErrorKind::Card
    }
}

impl From<reqwest::Error> for StripeError {
    fn from(err: reqwest::Error) -> Self {
        StripeError::transport(err.to_string())
    }
}

impl From<StripeError> for AppError {
    fn from(err: StripeError) -> Self {
        if err.is_card_error() {
            AppError::PaymentRequired(err.message)
        } else {
            AppError::ExternalService(format!("Payment provider error: {}", err.message))
        }
    }
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Protocol not found")]
    ProtocolNotFound,

    #[error("Subscription not found")]
    SubscriptionNotFound,

    #[error("Protocol is not currently offered")]
    ProtocolInactive,

    #[error("Already subscribed to this protocol")]
    AlreadySubscribed,

    #[error("Cannot move subscription from {from} to {to}")]
    InvalidStatusTransition {
        from: SubscriptionStatus,
        to: SubscriptionStatus,
    },

    #[error("Subscription was modified by someone else; reload and retry")]
    ConcurrentModification,

    #[error("Invalid webhook signature: {0}")]
    InvalidSignature(String),

    #[error("No fields to update")]
    EmptyUpdate,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Stripe(#[from] StripeError),

    #[error(transparent)]
    Patient(#[from] PatientError),

    #[error(transparent)]
    Database(#[from] DbError),
}

impl From<BillingError> for AppError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::ProtocolNotFound | BillingError::SubscriptionNotFound => {
                AppError::NotFound(err.to_string())
            }
            BillingError::ProtocolInactive
            | BillingError::AlreadySubscribed
            | BillingError::InvalidStatusTransition { .. }
            | BillingError::ConcurrentModification => AppError::Conflict(err.to_string()),
            BillingError::InvalidSignature(_) | BillingError::EmptyUpdate => {
                AppError::BadRequest(err.to_string())
            }
            BillingError::Forbidden(msg) => AppError::Forbidden(msg),
            BillingError::Validation(msg) => AppError::ValidationError(msg),
            BillingError::Stripe(e) => e.into(),
            BillingError::Patient(e) => e.into(),
            BillingError::Database(db) => db.into(),
        }
    }
}
