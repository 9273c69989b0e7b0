use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use shared_config::AppConfig;
use shared_database::{DbError, PostgrestQuery, SupabaseClient};
use shared_utils::validation::FieldErrors;

use crate::models::{
    BillingError, CreateProtocolRequest, ProtocolListQuery, TreatmentProtocol, UpdateProtocolRequest,
};

pub struct ProtocolService {
    supabase: SupabaseClient,
}

impl ProtocolService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    /// Public catalogue of active protocols.
    pub async fn list_protocols(&self, query: ProtocolListQuery) -> Result<Vec<TreatmentProtocol>, BillingError> {
        let mut filter = PostgrestQuery::new().eq("active", true);
        if let Some(condition) = query.condition.as_deref() {
            filter = filter.eq("condition", condition.trim().to_lowercase());
        }
        filter = filter.order("price_cents", true);

        let protocols = self.supabase.select("treatment_protocols", &filter, None).await?;
        Ok(protocols)
    }

    pub async fn get_protocol(
        &self,
        protocol_id: &str,
        auth_token: Option<&str>,
    ) -> Result<TreatmentProtocol, BillingError> {
        self.supabase
            .select_one(
                "treatment_protocols",
                &PostgrestQuery::new().eq("id", protocol_id),
                auth_token,
            )
            .await
            .map_err(|e| match e {
                DbError::NotFound(_) => BillingError::ProtocolNotFound,
                other => other.into(),
            })
    }

    pub async fn create_protocol(
        &self,
        request: CreateProtocolRequest,
        auth_token: &str,
    ) -> Result<TreatmentProtocol, BillingError> {
        let mut errors = FieldErrors::new();
        errors.require_text(&request.name, "name", 200);
        errors.require_text(&request.condition, "condition", 100);
        errors.check(request.price_cents > 0, "price_cents", "must be greater than zero");
        errors.into_message().map_err(BillingError::Validation)?;

        debug!("Creating protocol {}", request.name);
        let now = Utc::now().to_rfc3339();
        let protocol: TreatmentProtocol = self
            .supabase
            .insert(
                "treatment_protocols",
                json!({
                    "name": request.name.trim(),
                    "condition": request.condition.trim().to_lowercase(),
                    "description": request.description,
                    "medication_name": request.medication_name,
                    "default_dosage": request.default_dosage,
                    "price_cents": request.price_cents,
                    "billing_interval": request.billing_interval,
                    "stripe_price_id": request.stripe_price_id,
                    "active": true,
                    "created_at": now,
                    "updated_at": now,
                }),
                Some(auth_token),
            )
            .await?;

        info!("Protocol {} created", protocol.id);
        Ok(protocol)
    }

    pub async fn update_protocol(
        &self,
        protocol_id: &str,
        request: UpdateProtocolRequest,
        auth_token: &str,
    ) -> Result<TreatmentProtocol, BillingError> {
        let changes = build_update(request)?;

        let rows: Vec<TreatmentProtocol> = self
            .supabase
            .update(
                "treatment_protocols",
                &PostgrestQuery::new().eq("id", protocol_id),
                Value::Object(changes),
                Some(auth_token),
            )
            .await?;

        rows.into_iter().next().ok_or(BillingError::ProtocolNotFound)
    }
}

pub fn build_update(request: UpdateProtocolRequest) -> Result<Map<String, Value>, BillingError> {
    let mut changes = Map::new();

    if let Some(name) = request.name {
        if name.trim().is_empty() {
            return Err(BillingError::Validation("name: is required".to_string()));
        }
        changes.insert("name".to_string(), json!(name.trim()));
    }
    if let Some(description) = request.description {
        changes.insert("description".to_string(), json!(description));
    }
    if let Some(medication_name) = request.medication_name {
        changes.insert("medication_name".to_string(), json!(medication_name));
    }
    if let Some(default_dosage) = request.default_dosage {
        changes.insert("default_dosage".to_string(), json!(default_dosage));
    }
    if let Some(price_cents) = request.price_cents {
        if price_cents <= 0 {
            return Err(BillingError::Validation(
                "price_cents: must be greater than zero".to_string(),
            ));
        }
        changes.insert("price_cents".to_string(), json!(price_cents));
    }
    if let Some(interval) = request.billing_interval {
        changes.insert("billing_interval".to_string(), json!(interval));
    }
    if let Some(price_id) = request.stripe_price_id {
        changes.insert("stripe_price_id".to_string(), json!(price_id));
    }
    if let Some(active) = request.active {
        changes.insert("active".to_string(), json!(active));
    }

    if changes.is_empty() {
        return Err(BillingError::EmptyUpdate);
    }
    changes.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));
    Ok(changes)
}
