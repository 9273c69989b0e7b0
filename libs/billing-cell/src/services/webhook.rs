use chrono::{TimeZone, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::{debug, info, warn};

use shared_config::AppConfig;
use shared_database::{PostgrestQuery, SupabaseClient};

use crate::models::{BillingError, SubscriptionStatus};

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a signed webhook, in seconds.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Clone, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeEventData {
    pub object: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Number of rows the event changed.
    Applied(usize),
    Ignored,
}

pub struct WebhookService {
    supabase: SupabaseClient,
    webhook_secret: String,
    service_token: Option<String>,
}

impl WebhookService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
            webhook_secret: config.stripe_webhook_secret.clone(),
            service_token: config.service_token().map(str::to_string),
        }
    }

    /// Verifies the signature, then parses and dispatches the event.
    pub async fn receive(&self, payload: &[u8], signature_header: &str) -> Result<(StripeEvent, WebhookOutcome), BillingError> {
        if self.webhook_secret.is_empty() {
            return Err(BillingError::InvalidSignature("webhook secret is not configured".to_string()));
        }
        verify_signature(
            payload,
            signature_header,
            &self.webhook_secret,
            Utc::now().timestamp(),
        )?;

        let event: StripeEvent = serde_json::from_slice(payload)
            .map_err(|e| BillingError::Validation(format!("malformed event: {}", e)))?;
        debug!("Stripe event {} ({})", event.id, event.event_type);

        let outcome = self.dispatch(&event).await?;
        Ok((event, outcome))
    }

    async fn dispatch(&self, event: &StripeEvent) -> Result<WebhookOutcome, BillingError> {
        let object = &event.data.object;
        let now = Utc::now().to_rfc3339();

        let outcome = match event.event_type.as_str() {
            "payment_intent.succeeded" => {
                let Some(intent_id) = object["id"].as_str() else {
                    return Ok(WebhookOutcome::Ignored);
                };
                self.patch(
                    "orders",
                    PostgrestQuery::new()
                        .eq("payment_intent_id", intent_id)
                        .eq("status", "pending"),
                    json!({ "status": "paid", "updated_at": now }),
                )
                .await?
            }
            "invoice.payment_failed" => {
                let Some(remote_id) = object["subscription"].as_str() else {
                    return Ok(WebhookOutcome::Ignored);
                };
                self.patch(
                    "subscriptions",
                    PostgrestQuery::new()
                        .eq("stripe_subscription_id", remote_id)
                        .eq("status", SubscriptionStatus::Active),
                    json!({ "status": SubscriptionStatus::PastDue, "updated_at": now }),
                )
                .await?
            }
            "invoice.paid" => {
                let Some(remote_id) = object["subscription"].as_str() else {
                    return Ok(WebhookOutcome::Ignored);
                };
                let mut changes = json!({ "status": SubscriptionStatus::Active, "updated_at": now });
                if let Some(period_end) = object["period_end"]
                    .as_i64()
                    .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
                {
                    changes["current_period_end"] = json!(period_end.to_rfc3339());
                }
                self.patch(
                    "subscriptions",
                    PostgrestQuery::new()
                        .eq("stripe_subscription_id", remote_id)
                        .eq("status", SubscriptionStatus::PastDue),
                    changes,
                )
                .await?
            }
            "customer.subscription.deleted" => {
                let Some(remote_id) = object["id"].as_str() else {
                    return Ok(WebhookOutcome::Ignored);
                };
                self.patch(
                    "subscriptions",
                    PostgrestQuery::new()
                        .eq("stripe_subscription_id", remote_id)
                        .neq("status", SubscriptionStatus::Cancelled),
                    json!({
                        "status": SubscriptionStatus::Cancelled,
                        "cancelled_at": now,
                        "updated_at": now,
                    }),
                )
                .await?
            }
            other => {
                debug!("Ignoring Stripe event type {}", other);
                return Ok(WebhookOutcome::Ignored);
            }
        };

        info!("Stripe event {} applied: {:?}", event.event_type, outcome);
        Ok(outcome)
    }

    async fn patch(&self, table: &str, filter: PostgrestQuery, changes: Value) -> Result<WebhookOutcome, BillingError> {
        let rows: Vec<Value> = self
            .supabase
            .update(table, &filter, changes, self.service_token.as_deref())
            .await?;
        if rows.is_empty() {
            warn!("Webhook update on {} matched no rows", table);
        }
        Ok(WebhookOutcome::Applied(rows.len()))
    }
}

/// HMAC-SHA256 over `"{timestamp}.{payload}"`, ready to finalize or verify.
fn signed_payload(secret: &str, timestamp: i64, payload: &[u8]) -> Result<HmacSha256, BillingError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| BillingError::InvalidSignature("unusable webhook secret".to_string()))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// `hex(hmac_sha256(secret, "{timestamp}.{payload}"))`
pub fn compute_signature(secret: &str, timestamp: i64, payload: &[u8]) -> Result<String, BillingError> {
    Ok(signed_payload(secret, timestamp, payload)?
        .finalize()
        .into_bytes()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect())
}

/// Checks a `t=<ts>,v1=<hex>[,v1=<hex>]` header against the payload.
pub fn verify_signature(payload: &[u8], header: &str, secret: &str, now: i64) -> Result<(), BillingError> {
    let mut timestamp: Option<i64> = None;
    let mut candidates: Vec<&str> = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => candidates.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp
        .ok_or_else(|| BillingError::InvalidSignature("missing timestamp".to_string()))?;
    if candidates.is_empty() {
        return Err(BillingError::InvalidSignature("missing v1 signature".to_string()));
    }
    if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(BillingError::InvalidSignature("timestamp outside tolerance".to_string()));
    }

    let mac = signed_payload(secret, timestamp, payload)?;
    let matched = candidates
        .iter()
        .filter_map(|candidate| decode_hex(candidate))
        .any(|bytes| mac.clone().verify_slice(&bytes).is_ok());

    if matched {
        Ok(())
    } else {
        Err(BillingError::InvalidSignature("signature mismatch".to_string()))
    }
}

fn decode_hex(value: &str) -> Option<Vec<u8>> {
    if value.len() % 2 != 0 {
        return None;
    }
    (0..value.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(value.get(i..i + 2)?, 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const SECRET: &str = "whsec_test";
    const PAYLOAD: &[u8] = br#"{"id":"evt_1","type":"invoice.paid","data":{"object":{}}}"#;

    #[test]
    fn valid_signature_passes() {
        let now = 1_700_000_000;
        let sig = compute_signature(SECRET, now, PAYLOAD).unwrap();
        let header = format!("t={},v1={}", now, sig);
        assert!(verify_signature(PAYLOAD, &header, SECRET, now + 10).is_ok());
    }

    #[test]
    fn any_matching_v1_is_enough() {
        let now = 1_700_000_000;
        let sig = compute_signature(SECRET, now, PAYLOAD).unwrap();
        let header = format!("t={},v1={},v1={}", now, "00".repeat(32), sig);
        assert!(verify_signature(PAYLOAD, &header, SECRET, now).is_ok());
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let then = 1_700_000_000;
        let sig = compute_signature(SECRET, then, PAYLOAD).unwrap();
        let header = format!("t={},v1={}", then, sig);
        assert_matches!(
            verify_signature(PAYLOAD, &header, SECRET, then + SIGNATURE_TOLERANCE_SECS + 1),
            Err(BillingError::InvalidSignature(msg)) if msg.contains("tolerance")
        );
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let now = 1_700_000_000;
        let sig = compute_signature(SECRET, now, PAYLOAD).unwrap();
        let header = format!("t={},v1={}", now, sig);
        assert!(verify_signature(b"{}", &header, SECRET, now).is_err());
        assert!(verify_signature(PAYLOAD, &header, "whsec_other", now).is_err());
    }

    #[test]
    fn malformed_headers_are_rejected() {
        assert!(verify_signature(PAYLOAD, "", SECRET, 0).is_err());
        assert!(verify_signature(PAYLOAD, "t=abc,v1=zz", SECRET, 0).is_err());
        assert!(verify_signature(PAYLOAD, "t=0", SECRET, 0).is_err());
    }

    #[test]
    fn hex_decoding() {
        assert_eq!(decode_hex("0aff"), Some(vec![0x0a, 0xff]));
        assert_eq!(decode_hex("abc"), None);
        assert_eq!(decode_hex("zz"), None);
    }
}
