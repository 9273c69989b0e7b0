use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;

pub const TEST_JWT_SECRET: &str = "test-secret-key-for-jwt-validation-must-be-long-enough";

pub struct TestConfig {
    pub jwt_secret: String,
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub stripe_api_base: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jwt_secret: TEST_JWT_SECRET.to_string(),
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
            stripe_api_base: "http://localhost:12111/v1".to_string(),
        }
    }
}

impl TestConfig {
    /// Point both the database and Stripe at the same mock server.
    pub fn with_mock_server(uri: &str) -> Self {
        Self {
            supabase_url: uri.to_string(),
            stripe_api_base: format!("{}/v1", uri),
            ..Self::default()
        }
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
            supabase_jwt_secret: self.jwt_secret.clone(),
            stripe_secret_key: "sk_test_123".to_string(),
            stripe_webhook_secret: "whsec_test".to_string(),
            stripe_api_base: self.stripe_api_base.clone(),
            ..AppConfig::default()
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

pub struct TestUser {
    pub id: String,
    pub email: String,
    pub role: String,
}

impl Default for TestUser {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: "test@example.com".to_string(),
            role: "patient".to_string(),
        }
    }
}

impl TestUser {
    pub fn new(email: &str, role: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            role: role.to_string(),
        }
    }

    pub fn provider(email: &str) -> Self {
        Self::new(email, "provider")
    }

    pub fn patient(email: &str) -> Self {
        Self::new(email, "patient")
    }

    pub fn admin(email: &str) -> Self {
        Self::new(email, "admin")
    }

    pub fn uuid(&self) -> Uuid {
        Uuid::parse_str(&self.id).expect("test user ids are uuids")
    }

    pub fn to_user(&self) -> User {
        User {
            id: self.id.clone(),
            email: Some(self.email.clone()),
            role: Some(self.role.clone()),
            metadata: None,
            created_at: Some(Utc::now()),
        }
    }
}

pub struct JwtTestUtils;

impl JwtTestUtils {
    pub fn create_test_token(user: &TestUser, secret: &str, exp_hours: Option<i64>) -> String {
        let now = Utc::now();
        let exp = now + Duration::hours(exp_hours.unwrap_or(24));

        let payload = json!({
            "sub": user.id,
            "email": user.email,
            "role": "authenticated",
            "app_metadata": { "role": user.role },
            "iat": now.timestamp(),
            "exp": exp.timestamp()
        });

        Self::sign(&payload, secret)
    }

    /// Signs arbitrary claims with HS256.
    pub fn sign(payload: &serde_json::Value, secret: &str) -> String {
        let header = json!({
            "alg": "HS256",
            "typ": "JWT"
        });

        let header_encoded = general_purpose::URL_SAFE_NO_PAD.encode(header.to_string());
        let payload_encoded = general_purpose::URL_SAFE_NO_PAD.encode(payload.to_string());

        let signing_input = format!("{}.{}", header_encoded, payload_encoded);

        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(signing_input.as_bytes());
        let signature = mac.finalize().into_bytes();
        let signature_encoded = general_purpose::URL_SAFE_NO_PAD.encode(signature);

        format!("{}.{}", signing_input, signature_encoded)
    }

    pub fn token_for(user: &TestUser) -> String {
        Self::create_test_token(user, TEST_JWT_SECRET, Some(24))
    }

    pub fn create_expired_token(user: &TestUser, secret: &str) -> String {
        Self::create_test_token(user, secret, Some(-1))
    }

    pub fn create_token_without_expiry(user: &TestUser, secret: &str) -> String {
        let payload = json!({
            "sub": user.id,
            "email": user.email,
            "role": "authenticated",
            "app_metadata": { "role": user.role },
            "iat": Utc::now().timestamp()
        });
        Self::sign(&payload, secret)
    }

    pub fn create_invalid_signature_token(user: &TestUser) -> String {
        Self::create_test_token(user, "wrong-secret", Some(24))
    }

    pub fn create_malformed_token() -> String {
        "invalid.token.format".to_string()
    }
}

/// Canned PostgREST rows shaped like the production tables.
pub struct MockSupabaseResponses;

impl MockSupabaseResponses {
    pub fn patient_response(user_id: &str, email: &str) -> serde_json::Value {
        json!({
            "id": user_id,
            "first_name": "Jane",
            "last_name": "Doe",
            "email": email,
            "phone_number": "+15551234567",
            "date_of_birth": "1990-01-01",
            "sex": "female",
            "address_line1": "1 Main St",
            "address_line2": null,
            "city": "Sacramento",
            "state": "CA",
            "postal_code": "95814",
            "allergies": null,
            "current_medications": null,
            "medical_conditions": [],
            "stripe_customer_id": null,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn provider_response(provider_id: &str, state: &str) -> serde_json::Value {
        json!({
            "id": provider_id,
            "first_name": "Gregory",
            "last_name": "House",
            "email": format!("{}@clinic.example.com", &provider_id[..8]),
            "license_number": "MD123456",
            "licensed_states": [state],
            "specialty": "general",
            "bio": "Board certified internist",
            "accepting_consultations": true,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn consultation_response(
        consultation_id: &str,
        patient_id: &str,
        provider_id: Option<&str>,
        status: &str,
    ) -> serde_json::Value {
        json!({
            "id": consultation_id,
            "patient_id": patient_id,
            "provider_id": provider_id,
            "condition": "hair_loss",
            "symptoms": "Thinning at the crown for two years",
            "intake_answers": { "family_history": true },
            "patient_state": "CA",
            "status": status,
            "provider_notes": null,
            "diagnosis": null,
            "recommended_protocol_id": null,
            "assigned_at": null,
            "completed_at": null,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn prescription_response(
        prescription_id: &str,
        patient_id: &str,
        provider_id: &str,
        refills_authorized: i32,
        refills_used: i32,
    ) -> serde_json::Value {
        json!({
            "id": prescription_id,
            "consultation_id": Uuid::new_v4(),
            "patient_id": patient_id,
            "provider_id": provider_id,
            "medication_name": "Finasteride",
            "dosage": "1mg daily",
            "instructions": "Take with water",
            "quantity": 30,
            "refills_authorized": refills_authorized,
            "refills_used": refills_used,
            "status": "active",
            "expires_at": (Utc::now() + Duration::days(300)).to_rfc3339(),
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn inventory_response(
        item_id: &str,
        unit_price_cents: i64,
        quantity_on_hand: i32,
        requires_prescription: bool,
    ) -> serde_json::Value {
        json!({
            "id": item_id,
            "sku": format!("SKU-{}", &item_id[..8]),
            "name": "Finasteride 1mg x30",
            "description": null,
            "unit_price_cents": unit_price_cents,
            "quantity_on_hand": quantity_on_hand,
            "reorder_threshold": 5,
            "requires_prescription": requires_prescription,
            "active": true,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn protocol_response(protocol_id: &str, stripe_price_id: Option<&str>) -> serde_json::Value {
        json!({
            "id": protocol_id,
            "name": "Hair Restore",
            "condition": "hair_loss",
            "description": "Finasteride plus minoxidil",
            "medication_name": "Finasteride",
            "default_dosage": "1mg daily",
            "price_cents": 3000,
            "billing_interval": "monthly",
            "stripe_price_id": stripe_price_id,
            "active": true,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn error_response(message: &str, code: &str) -> serde_json::Value {
        json!({
            "code": code,
            "message": message
        })
    }
}
