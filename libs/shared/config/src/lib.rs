use std::env;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_jwt_secret: String,
    /// Used only for writes that arrive without a user, such as Stripe webhooks.
    pub supabase_service_role_key: String,
    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,
    pub stripe_api_base: String,
    pub openai_api_key: String,
    pub openai_api_base: String,
    pub openai_model: String,
    /// Sales tax in basis points applied to the discounted subtotal.
    pub tax_rate_bps: u32,
    pub port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            supabase_url: String::new(),
            supabase_anon_key: String::new(),
            supabase_jwt_secret: String::new(),
            supabase_service_role_key: String::new(),
            stripe_secret_key: String::new(),
            stripe_webhook_secret: String::new(),
            stripe_api_base: "https://api.stripe.com/v1".to_string(),
            openai_api_key: String::new(),
            openai_api_base: "https://api.openai.com/v1".to_string(),
            openai_model: "gpt-4o-mini".to_string(),
            tax_rate_bps: 0,
            port: 3000,
        }
    }
}

fn required(name: &str) -> String {
    env::var(name).unwrap_or_else(|_| {
        warn!("{} not set, using empty value", name);
        String::new()
    })
}

fn with_default(name: &str, default: String) -> String {
    env::var(name).unwrap_or_else(|_| {
        warn!("{} not set, using default", name);
        default
    })
}

fn parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{} is not a valid value ({}), using default", name, raw);
            default
        }),
        Err(_) => default,
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let config = Self {
            supabase_url: required("SUPABASE_URL"),
            supabase_anon_key: required("SUPABASE_ANON_PUBLIC_KEY"),
            supabase_jwt_secret: required("SUPABASE_JWT_SECRET"),
            supabase_service_role_key: env::var("SUPABASE_SERVICE_ROLE_KEY").unwrap_or_default(),
            stripe_secret_key: required("STRIPE_SECRET_KEY"),
            stripe_webhook_secret: required("STRIPE_WEBHOOK_SECRET"),
            stripe_api_base: with_default("STRIPE_API_BASE", defaults.stripe_api_base),
            openai_api_key: required("OPENAI_API_KEY"),
            openai_api_base: with_default("OPENAI_API_BASE", defaults.openai_api_base),
            openai_model: with_default("OPENAI_MODEL", defaults.openai_model),
            tax_rate_bps: parsed("TAX_RATE_BPS", defaults.tax_rate_bps),
            port: parsed("API_PORT", defaults.port),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }
        if !config.is_payments_configured() {
            warn!("Stripe not configured - checkout and subscriptions will fail");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_jwt_secret.is_empty()
    }

    pub fn is_payments_configured(&self) -> bool {
        !self.stripe_secret_key.is_empty() && !self.stripe_api_base.is_empty()
    }

    /// Bearer for system writes; falls back to the anon key.
    pub fn service_token(&self) -> Option<&str> {
        if self.supabase_service_role_key.is_empty() {
            None
        } else {
            Some(&self.supabase_service_role_key)
        }
    }

    pub fn is_ai_configured(&self) -> bool {
        !self.openai_api_key.is_empty() && !self.openai_api_base.is_empty()
    }
}
