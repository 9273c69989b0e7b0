use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::{DbError, PostgrestQuery, SupabaseClient};
use shared_utils::validation::FieldErrors;

use crate::models::{CreateInventoryRequest, InventoryItem, OrderError, UpdateInventoryRequest};

const DEFAULT_REORDER_THRESHOLD: i32 = 10;
const ADJUST_ATTEMPTS: usize = 3;

pub struct InventoryService {
    supabase: SupabaseClient,
}

impl InventoryService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    /// Active catalogue, readable without a session.
    pub async fn list_active(&self) -> Result<Vec<InventoryItem>, OrderError> {
        let items = self
            .supabase
            .select(
                "inventory",
                &PostgrestQuery::new().eq("active", true).order("name", true),
                None,
            )
            .await?;
        Ok(items)
    }

    pub async fn get(&self, item_id: &str, auth_token: Option<&str>) -> Result<InventoryItem, OrderError> {
        self.supabase
            .select_one("inventory", &PostgrestQuery::new().eq("id", item_id), auth_token)
            .await
            .map_err(|e| match e {
                DbError::NotFound(_) => OrderError::ItemNotFound,
                other => other.into(),
            })
    }

    pub async fn get_many(&self, ids: &[Uuid], auth_token: &str) -> Result<Vec<InventoryItem>, OrderError> {
        let items = self
            .supabase
            .select(
                "inventory",
                &PostgrestQuery::new().in_list("id", ids),
                Some(auth_token),
            )
            .await?;
        Ok(items)
    }

    pub async fn create(&self, request: CreateInventoryRequest, auth_token: &str) -> Result<InventoryItem, OrderError> {
        validate_create(&request)?;

        let sku = request.sku.trim().to_uppercase();
        let now = Utc::now().to_rfc3339();
        let item: InventoryItem = self
            .supabase
            .insert(
                "inventory",
                json!({
                    "sku": sku,
                    "name": request.name.trim(),
                    "description": request.description,
                    "unit_price_cents": request.unit_price_cents,
                    "quantity_on_hand": request.quantity_on_hand,
                    "reorder_threshold": request.reorder_threshold.unwrap_or(DEFAULT_REORDER_THRESHOLD),
                    "requires_prescription": request.requires_prescription,
                    "active": true,
                    "created_at": now,
                    "updated_at": now,
                }),
                Some(auth_token),
            )
            .await
            .map_err(|e| match e {
                DbError::Conflict(_) => OrderError::DuplicateSku(sku.clone()),
                other => other.into(),
            })?;

        info!("Inventory item {} ({}) created", item.id, item.sku);
        Ok(item)
    }

    pub async fn update(
        &self,
        item_id: &str,
        request: UpdateInventoryRequest,
        auth_token: &str,
    ) -> Result<InventoryItem, OrderError> {
        let changes = build_update(&request)?;

        let rows: Vec<InventoryItem> = self
            .supabase
            .update(
                "inventory",
                &PostgrestQuery::new().eq("id", item_id),
                Value::Object(changes),
                Some(auth_token),
            )
            .await?;
        rows.into_iter().next().ok_or(OrderError::ItemNotFound)
    }

    /// Applies `delta` to the stock level, pinned to the quantity read so
    /// concurrent adjustments retry instead of overwriting each other.
    pub async fn adjust(&self, item_id: &str, delta: i32, auth_token: &str) -> Result<InventoryItem, OrderError> {
        for attempt in 1..=ADJUST_ATTEMPTS {
            let item = self.get(item_id, Some(auth_token)).await?;
            let quantity = item.quantity_on_hand + delta;
            if quantity < 0 {
                return Err(OrderError::InsufficientStock {
                    name: item.name,
                    available: item.quantity_on_hand,
                });
            }

            let rows: Vec<InventoryItem> = self
                .supabase
                .update(
                    "inventory",
                    &PostgrestQuery::new()
                        .eq("id", item.id)
                        .eq("quantity_on_hand", item.quantity_on_hand),
                    json!({
                        "quantity_on_hand": quantity,
                        "updated_at": Utc::now().to_rfc3339(),
                    }),
                    Some(auth_token),
                )
                .await?;

            if let Some(updated) = rows.into_iter().next() {
                debug!(
                    "Inventory {} adjusted by {} to {}",
                    updated.sku, delta, updated.quantity_on_hand
                );
                if updated.quantity_on_hand <= updated.reorder_threshold {
                    warn!(
                        "Inventory {} is at or below its reorder threshold ({} <= {})",
                        updated.sku, updated.quantity_on_hand, updated.reorder_threshold
                    );
                }
                return Ok(updated);
            }
            debug!("Stock adjustment for {} lost a race (attempt {})", item_id, attempt);
        }

        Err(OrderError::ConcurrentModification)
    }
}

fn validate_create(request: &CreateInventoryRequest) -> Result<(), OrderError> {
    let mut errors = FieldErrors::new();
    errors.require_text(&request.sku, "sku", 64);
    errors.require_text(&request.name, "name", 200);
    errors.check(request.unit_price_cents > 0, "unit_price_cents", "must be positive");
    errors.check(request.quantity_on_hand >= 0, "quantity_on_hand", "cannot be negative");
    if let Some(threshold) = request.reorder_threshold {
        errors.check(threshold >= 0, "reorder_threshold", "cannot be negative");
    }
    errors.into_message().map_err(OrderError::Validation)
}

pub fn build_update(request: &UpdateInventoryRequest) -> Result<Map<String, Value>, OrderError> {
    let mut errors = FieldErrors::new();
    let mut changes = Map::new();

    if let Some(name) = &request.name {
        errors.require_text(name, "name", 200);
        changes.insert("name".to_string(), json!(name.trim()));
    }
    if let Some(description) = &request.description {
        changes.insert("description".to_string(), json!(description));
    }
    if let Some(price) = request.unit_price_cents {
        errors.check(price > 0, "unit_price_cents", "must be positive");
        changes.insert("unit_price_cents".to_string(), json!(price));
    }
    if let Some(threshold) = request.reorder_threshold {
        errors.check(threshold >= 0, "reorder_threshold", "cannot be negative");
        changes.insert("reorder_threshold".to_string(), json!(threshold));
    }
    if let Some(requires) = request.requires_prescription {
        changes.insert("requires_prescription".to_string(), json!(requires));
    }
    if let Some(active) = request.active {
        changes.insert("active".to_string(), json!(active));
    }
    errors.into_message().map_err(OrderError::Validation)?;

    if changes.is_empty() {
        return Err(OrderError::EmptyUpdate);
    }
    changes.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));
    Ok(changes)
}
