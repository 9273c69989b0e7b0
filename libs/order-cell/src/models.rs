use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use billing_cell::StripeError;
use prescription_cell::PrescriptionError;
use shared_database::DbError;
use shared_models::error::AppError;

pub const MAX_ITEM_QUANTITY: i32 = 10;

// ==============================================================================
// INVENTORY
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryItem {
    pub id: Uuid,
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub unit_price_cents: i64,
    pub quantity_on_hand: i32,
    pub reorder_threshold: i32,
    pub requires_prescription: bool,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateInventoryRequest {
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub unit_price_cents: i64,
    pub quantity_on_hand: i32,
    pub reorder_threshold: Option<i32>,
    pub requires_prescription: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateInventoryRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub unit_price_cents: Option<i64>,
    pub reorder_threshold: Option<i32>,
    pub requires_prescription: Option<bool>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjustStockRequest {
    pub delta: i32,
}

// ==============================================================================
// PRICING
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ShippingMethod {
    #[default]
    Standard,
    Expedited,
}

impl ShippingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShippingMethod::Standard => "standard",
            ShippingMethod::Expedited => "expedited",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutItem {
    pub inventory_id: Uuid,
    pub quantity: i32,
}

/// An item with the price it will be charged at.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PricedLine {
    pub inventory_id: Uuid,
    pub name: String,
    pub quantity: i32,
    pub unit_price_cents: i64,
    pub line_total_cents: i64,
}

impl PricedLine {
    pub fn new(item: &InventoryItem, quantity: i32) -> Self {
        Self {
            inventory_id: item.id,
            name: item.name.clone(),
            quantity,
            unit_price_cents: item.unit_price_cents,
            line_total_cents: item.unit_price_cents * i64::from(quantity),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PriceBreakdown {
    pub lines: Vec<PricedLine>,
    pub promo_code: Option<String>,
    pub shipping_method: ShippingMethod,
    pub subtotal_cents: i64,
    pub discount_cents: i64,
    pub shipping_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteRequest {
    pub items: Vec<CheckoutItem>,
    pub promo_code: Option<String>,
    #[serde(default)]
    pub shipping_method: ShippingMethod,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub items: Vec<CheckoutItem>,
    pub promo_code: Option<String>,
    #[serde(default)]
    pub shipping_method: ShippingMethod,
    pub shipping_address: Value,
    pub prescription_id: Option<Uuid>,
    pub payment_method_id: Option<String>,
}

// ==============================================================================
// ORDERS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Paid,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Refunded => "refunded",
        }
    }

    pub fn valid_transitions(&self) -> &'static [OrderStatus] {
        use OrderStatus::*;
        match self {
            Pending => &[Paid, Cancelled],
            Paid => &[Processing, Cancelled, Refunded],
            Processing => &[Shipped, Cancelled],
            Shipped => &[Delivered],
            Delivered => &[Refunded],
            Cancelled | Refunded => &[],
        }
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        self.valid_transitions().contains(&next)
    }

    /// Patients may cancel before fulfilment starts.
    pub fn is_cancellable(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Paid)
    }

    pub fn is_closing(&self) -> bool {
        matches!(self, OrderStatus::Cancelled | OrderStatus::Refunded)
    }

    /// Money has been taken and must be returned when the order closes.
    pub fn has_captured_payment(&self) -> bool {
        matches!(
            self,
            OrderStatus::Paid | OrderStatus::Processing | OrderStatus::Delivered
        )
    }

    /// Stock was decremented at checkout and has not left the warehouse.
    pub fn holds_stock(&self) -> bool {
        matches!(
            self,
            OrderStatus::Pending | OrderStatus::Paid | OrderStatus::Processing
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub prescription_id: Option<Uuid>,
    pub status: OrderStatus,
    pub subtotal_cents: i64,
    pub discount_cents: i64,
    pub shipping_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
    pub promo_code: Option<String>,
    pub shipping_method: ShippingMethod,
    pub shipping_address: Value,
    pub payment_intent_id: Option<String>,
    pub tracking_number: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub inventory_id: Uuid,
    pub quantity: i32,
    pub unit_price_cents: i64,
    pub line_total_cents: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderDetail {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderItem>,
}

/// Returned from checkout; the client secret lets the browser finish an unconfirmed intent.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutReceipt {
    #[serde(flatten)]
    pub detail: OrderDetail,
    pub client_secret: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderListQuery {
    pub status: Option<OrderStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStatusUpdate {
    pub status: OrderStatus,
    pub tracking_number: Option<String>,
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("Order not found")]
    NotFound,

    #[error("Inventory item not found")]
    ItemNotFound,

    #[error("{name} is not available")]
    ItemUnavailable { name: String },

    #[error("Only {available} of {name} left in stock")]
    InsufficientStock { name: String, available: i32 },

    #[error("Unknown promo code {0}")]
    UnknownPromoCode(String),

    #[error("{0}")]
    PrescriptionRequired(String),

    #[error("Cannot move order from {from} to {to}")]
    InvalidStatusTransition { from: OrderStatus, to: OrderStatus },

    #[error("Order was modified by someone else; reload and retry")]
    ConcurrentModification,

    #[error("Inventory item with SKU {0} already exists")]
    DuplicateSku(String),

    #[error("No fields to update")]
    EmptyUpdate,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Payment(#[from] StripeError),

    #[error(transparent)]
    Prescription(#[from] PrescriptionError),

    #[error(transparent)]
    Database(DbError),
}

impl From<DbError> for OrderError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(_) => OrderError::NotFound,
            other => OrderError::Database(other),
        }
    }
}

impl From<OrderError> for AppError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::NotFound | OrderError::ItemNotFound => AppError::NotFound(err.to_string()),
            OrderError::InsufficientStock { .. }
            | OrderError::InvalidStatusTransition { .. }
            | OrderError::ConcurrentModification
            | OrderError::DuplicateSku(_) => AppError::Conflict(err.to_string()),
            OrderError::ItemUnavailable { .. }
            | OrderError::UnknownPromoCode(_)
            | OrderError::PrescriptionRequired(_) => AppError::ValidationError(err.to_string()),
            OrderError::EmptyUpdate => AppError::BadRequest(err.to_string()),
            OrderError::Forbidden(msg) => AppError::Forbidden(msg),
            OrderError::Validation(msg) => AppError::ValidationError(msg),
            OrderError::Payment(e) => e.into(),
            OrderError::Prescription(e) => e.into(),
            OrderError::Database(db) => db.into(),
        }
    }
}
