use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use shared_database::DbError;
use shared_models::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Admin {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAdminRequest {
    /// Auth user id; a fresh id is generated when the account is created later.
    pub id: Option<Uuid>,
    pub email: String,
    pub full_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LowStockItem {
    pub id: Uuid,
    pub sku: String,
    pub name: String,
    pub quantity_on_hand: i32,
    pub reorder_threshold: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DashboardSummary {
    pub consultations_by_status: BTreeMap<String, usize>,
    pub orders_by_status: BTreeMap<String, usize>,
    pub active_subscriptions: usize,
    pub pending_refill_reviews: usize,
    pub low_stock: Vec<LowStockItem>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("Admin with email {0} already exists")]
    EmailAlreadyExists(String),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Database(#[from] DbError),
}

impl From<AdminError> for AppError {
    fn from(err: AdminError) -> Self {
        match err {
            AdminError::EmailAlreadyExists(_) => AppError::Conflict(err.to_string()),
            AdminError::Validation(msg) => AppError::ValidationError(msg),
            AdminError::Database(db) => db.into(),
        }
    }
}
