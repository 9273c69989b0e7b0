use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error};

use shared_config::AppConfig;

use crate::models::{
    PaymentIntent, Refund, StripeCustomer, StripeError, StripeErrorKind, StripeSubscription,
};

/// Thin form-encoded client for the handful of Stripe endpoints we use.
pub struct StripeClient {
    http_client: Client,
    api_base: String,
    secret_key: String,
}

impl StripeClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            http_client: Client::new(),
            api_base: config.stripe_api_base.trim_end_matches('/').to_string(),
            secret_key: config.stripe_secret_key.clone(),
        }
    }

    async fn call<T>(&self, method: Method, path: &str, params: &[(String, String)]) -> Result<T, StripeError>
    where
        T: DeserializeOwned,
    {
        if self.secret_key.is_empty() {
            return Err(StripeError {
                kind: StripeErrorKind::Authentication,
                code: None,
                message: "Stripe secret key is not configured".to_string(),
            });
        }

        let url = format!("{}{}", self.api_base, path);
        debug!("Stripe {} {}", method, url);

        let mut request = self
            .http_client
            .request(method, &url)
            .bearer_auth(&self.secret_key);
        if !params.is_empty() {
            request = request.form(params);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            error!("Stripe error ({}): {}", status, text);
            return Err(parse_error(&text));
        }

        serde_json::from_str(&text)
            .map_err(|e| StripeError::transport(format!("unexpected Stripe response: {}", e)))
    }

    pub async fn create_customer(
        &self,
        email: &str,
        name: &str,
        patient_id: &str,
    ) -> Result<StripeCustomer, StripeError> {
        let params = vec![
            param("email", email),
            param("name", name),
            param("metadata[patient_id]", patient_id),
        ];
        self.call(Method::POST, "/customers", &params).await
    }

    /// Confirms immediately when a payment method is supplied.
    pub async fn create_payment_intent(
        &self,
        amount_cents: i64,
        customer_id: Option<&str>,
        payment_method_id: Option<&str>,
        metadata: &[(&str, String)],
    ) -> Result<PaymentIntent, StripeError> {
        let mut params = vec![
            param("amount", amount_cents.to_string()),
            param("currency", "usd"),
        ];
        if let Some(customer) = customer_id {
            params.push(param("customer", customer));
        }
        if let Some(payment_method) = payment_method_id {
            params.push(param("payment_method", payment_method));
            params.push(param("confirm", "true"));
            params.push(param("automatic_payment_methods[enabled]", "true"));
            params.push(param("automatic_payment_methods[allow_redirects]", "never"));
        }
        for (key, value) in metadata {
            params.push((format!("metadata[{}]", key), value.clone()));
        }

        self.call(Method::POST, "/payment_intents", &params).await
    }

    /// Releases an intent that never captured funds.
    pub async fn cancel_payment_intent(&self, payment_intent_id: &str) -> Result<PaymentIntent, StripeError> {
        self.call(
            Method::POST,
            &format!("/payment_intents/{}/cancel", payment_intent_id),
            &[],
        )
        .await
    }

    pub async fn create_refund(&self, payment_intent_id: &str) -> Result<Refund, StripeError> {
        self.call(
            Method::POST,
            "/refunds",
            &[param("payment_intent", payment_intent_id)],
        )
        .await
    }

    pub async fn create_subscription(
        &self,
        customer_id: &str,
        price_id: &str,
        metadata: &[(&str, String)],
    ) -> Result<StripeSubscription, StripeError> {
        let mut params = vec![
            param("customer", customer_id),
            param("items[0][price]", price_id),
        ];
        for (key, value) in metadata {
            params.push((format!("metadata[{}]", key), value.clone()));
        }
        self.call(Method::POST, "/subscriptions", &params).await
    }

    pub async fn cancel_subscription(&self, subscription_id: &str) -> Result<StripeSubscription, StripeError> {
        self.call(Method::DELETE, &format!("/subscriptions/{}", subscription_id), &[])
            .await
    }

    pub async fn pause_subscription(&self, subscription_id: &str) -> Result<StripeSubscription, StripeError> {
        self.call(
            Method::POST,
            &format!("/subscriptions/{}", subscription_id),
            &[param("pause_collection[behavior]", "void")],
        )
        .await
    }

    /// An empty `pause_collection` clears the pause.
    pub async fn resume_subscription(&self, subscription_id: &str) -> Result<StripeSubscription, StripeError> {
        self.call(
            Method::POST,
            &format!("/subscriptions/{}", subscription_id),
            &[param("pause_collection", "")],
        )
        .await
    }
}

fn param(key: &str, value: impl Into<String>) -> (String, String) {
    (key.to_string(), value.into())
}

/// Stripe wraps failures as `{"error": {"type", "code", "message"}}`.
pub fn parse_error(body: &str) -> StripeError {
    let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let error = &parsed["error"];

    match error["type"].as_str() {
        Some(error_type) => StripeError {
            kind: StripeErrorKind::from_type(error_type),
            code: error["code"].as_str().map(str::to_string),
            message: error["message"]
                .as_str()
                .unwrap_or("Stripe request failed")
                .to_string(),
        },
        None => StripeError {
            kind: StripeErrorKind::Api,
            code: None,
            message: body.chars().take(200).collect(),
        },
    }
}
