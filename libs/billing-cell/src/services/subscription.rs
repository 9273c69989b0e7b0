use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use patient_cell::PatientService;
use shared_config::AppConfig;
use shared_database::{DbError, PostgrestQuery, SupabaseClient};
use shared_models::auth::User;

use crate::models::{
    BillingError, Subscription, SubscriptionAction, SubscriptionStatus, TreatmentProtocol,
};
use crate::services::protocol::ProtocolService;
use crate::services::stripe::StripeClient;

pub struct SubscriptionService {
    supabase: SupabaseClient,
    protocols: ProtocolService,
    patients: PatientService,
    stripe: StripeClient,
}

impl SubscriptionService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
            protocols: ProtocolService::new(config),
            patients: PatientService::new(config),
            stripe: StripeClient::new(config),
        }
    }

    pub async fn subscribe(
        &self,
        user: &User,
        protocol_id: &str,
        auth_token: &str,
    ) -> Result<Subscription, BillingError> {
        let protocol = self.protocols.get_protocol(protocol_id, Some(auth_token)).await?;
        if !protocol.active {
            return Err(BillingError::ProtocolInactive);
        }

        let existing: Vec<Value> = self
            .supabase
            .select(
                "subscriptions",
                &PostgrestQuery::new()
                    .select("id")
                    .eq("patient_id", &user.id)
                    .eq("protocol_id", protocol.id)
                    .neq("status", SubscriptionStatus::Cancelled),
                Some(auth_token),
            )
            .await?;
        if !existing.is_empty() {
            return Err(BillingError::AlreadySubscribed);
        }

        let customer_id = self.ensure_customer(user, auth_token).await?;
        let now = Utc::now();

        let (stripe_subscription_id, status, current_period_end) = match &protocol.stripe_price_id {
            Some(price_id) => {
                let remote = self
                    .stripe
                    .create_subscription(
                        &customer_id,
                        price_id,
                        &[("patient_id", user.id.clone()), ("protocol_id", protocol.id.to_string())],
                    )
                    .await?;
                let period_end = remote
                    .current_period_end
                    .and_then(|ts| Utc.timestamp_opt(ts, 0).single());
                (
                    Some(remote.id),
                    SubscriptionStatus::from_stripe(&remote.status),
                    period_end,
                )
            }
            None => (None, SubscriptionStatus::Active, Some(local_period_end(&protocol, now))),
        };

        let subscription: Subscription = self
            .supabase
            .insert(
                "subscriptions",
                json!({
                    "patient_id": user.id,
                    "protocol_id": protocol.id,
                    "stripe_subscription_id": stripe_subscription_id,
                    "status": status,
                    "billing_interval": protocol.billing_interval,
                    "price_cents": protocol.price_cents,
                    "current_period_end": current_period_end.map(|t| t.to_rfc3339()),
                    "created_at": now.to_rfc3339(),
                    "updated_at": now.to_rfc3339(),
                }),
                Some(auth_token),
            )
            .await?;

        info!(
            "Patient {} subscribed to protocol {} ({})",
            user.id, protocol.id, subscription.status
        );
        Ok(subscription)
    }

    /// Creates the Stripe customer on first use and remembers it on the patient.
    async fn ensure_customer(&self, user: &User, auth_token: &str) -> Result<String, BillingError> {
        let patient = self.patients.get_patient(&user.id, auth_token).await?;
        if let Some(customer_id) = patient.stripe_customer_id.as_deref().filter(|id| !id.is_empty()) {
            return Ok(customer_id.to_string());
        }

        let customer = self
            .stripe
            .create_customer(&patient.email, &patient.full_name(), &user.id)
            .await?;
        self.patients
            .set_stripe_customer_id(&patient.id, &customer.id, auth_token)
            .await?;

        debug!("Created Stripe customer {} for patient {}", customer.id, patient.id);
        Ok(customer.id)
    }

    pub async fn list_for(&self, user: &User, auth_token: &str) -> Result<Vec<Subscription>, BillingError> {
        let mut filter = PostgrestQuery::new();
        if !user.is_admin() {
            filter = filter.eq("patient_id", &user.id);
        }
        filter = filter.order("created_at", false);

        let subscriptions = self
            .supabase
            .select("subscriptions", &filter, Some(auth_token))
            .await?;
        Ok(subscriptions)
    }

    pub async fn get_for(
        &self,
        user: &User,
        subscription_id: &str,
        auth_token: &str,
    ) -> Result<Subscription, BillingError> {
        let subscription: Subscription = self
            .supabase
            .select_one(
                "subscriptions",
                &PostgrestQuery::new().eq("id", subscription_id),
                Some(auth_token),
            )
            .await
            .map_err(|e| match e {
                DbError::NotFound(_) => BillingError::SubscriptionNotFound,
                other => other.into(),
            })?;

        if !(subscription.patient_id.to_string() == user.id || user.is_admin()) {
            return Err(BillingError::Forbidden(
                "Not authorized to access this subscription".to_string(),
            ));
        }
        Ok(subscription)
    }

    pub async fn apply_action(
        &self,
        user: &User,
        subscription_id: &str,
        action: SubscriptionAction,
        auth_token: &str,
    ) -> Result<Subscription, BillingError> {
        let subscription = self.get_for(user, subscription_id, auth_token).await?;
        let target = action.target();
        if !action.allowed_from(subscription.status) {
            warn!(
                "Invalid subscription transition {} -> {}",
                subscription.status, target
            );
            return Err(BillingError::InvalidStatusTransition {
                from: subscription.status,
                to: target,
            });
        }

        if let Some(remote_id) = subscription.stripe_subscription_id.as_deref() {
            match action {
                SubscriptionAction::Pause => self.stripe.pause_subscription(remote_id).await?,
                SubscriptionAction::Resume => self.stripe.resume_subscription(remote_id).await?,
                SubscriptionAction::Cancel => self.stripe.cancel_subscription(remote_id).await?,
            };
        }

        let now = Utc::now();
        let mut changes = Map::new();
        changes.insert("status".to_string(), json!(target));
        changes.insert("updated_at".to_string(), json!(now.to_rfc3339()));
        if target == SubscriptionStatus::Cancelled {
            changes.insert("cancelled_at".to_string(), json!(now.to_rfc3339()));
        }

        let rows: Vec<Subscription> = self
            .supabase
            .update(
                "subscriptions",
                &PostgrestQuery::new()
                    .eq("id", subscription.id)
                    .eq("status", subscription.status),
                Value::Object(changes),
                Some(auth_token),
            )
            .await?;
        let updated = rows
            .into_iter()
            .next()
            .ok_or(BillingError::ConcurrentModification)?;

        info!("Subscription {} is now {}", updated.id, updated.status);
        Ok(updated)
    }
}

fn local_period_end(protocol: &TreatmentProtocol, from: DateTime<Utc>) -> DateTime<Utc> {
    from + Duration::days(protocol.billing_interval.period_days())
}
