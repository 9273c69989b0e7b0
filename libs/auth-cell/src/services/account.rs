use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use shared_config::AppConfig;
use shared_database::{DbError, SupabaseClient};
use shared_utils::validation::{is_valid_email, password_issues, FieldErrors};

use crate::models::{AuthError, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};

pub struct AccountService {
    supabase: SupabaseClient,
}

impl AccountService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    fn validate_registration(request: &RegisterRequest) -> Result<(), AuthError> {
        let mut errors = FieldErrors::new();
        errors.check(is_valid_email(&request.email), "email", "must be a valid email address");
        for issue in password_issues(&request.password) {
            errors.add("password", issue);
        }
        errors.require_text(&request.first_name, "first_name", 100);
        errors.require_text(&request.last_name, "last_name", 100);

        errors.into_message().map_err(AuthError::Validation)
    }

    /// Create a patient account. Self-registration always yields the patient role;
    /// providers and admins are provisioned by an administrator.
    pub async fn register(&self, request: RegisterRequest) -> Result<RegisterResponse, AuthError> {
        Self::validate_registration(&request)?;
        let email = request.email.trim().to_lowercase();
        debug!("Registering account for {}", email);

        let body = json!({
            "email": email,
            "password": request.password,
            "data": {
                "first_name": request.first_name.trim(),
                "last_name": request.last_name.trim(),
                "role": "patient"
            }
        });

        let response: Value = self
            .supabase
            .request(Method::POST, "/auth/v1/signup", None, Some(body))
            .await
            .map_err(|e| match e {
                DbError::Conflict(_) => AuthError::EmailAlreadyRegistered(email.clone()),
                other => AuthError::Database(other),
            })?;

        // With email confirmation on, GoTrue returns the bare user; otherwise a session.
        let user = response.get("user").unwrap_or(&response);
        let user_id = user["id"]
            .as_str()
            .ok_or_else(|| AuthError::UnexpectedResponse("signup returned no user id".to_string()))?
            .to_string();

        // GoTrue hides duplicates behind an obfuscated user with no identities.
        if user["identities"].as_array().is_some_and(|ids| ids.is_empty()) {
            warn!("Signup for existing email {}", email);
            return Err(AuthError::EmailAlreadyRegistered(email));
        }

        let access_token = response["access_token"].as_str().map(str::to_string);
        info!("Registered account {}", user_id);

        Ok(RegisterResponse {
            user_id,
            email,
            confirmation_required: access_token.is_none(),
            access_token,
        })
    }

    pub async fn login(&self, request: LoginRequest) -> Result<LoginResponse, AuthError> {
        let email = request.email.trim().to_lowercase();
        debug!("Password login for {}", email);

        let body = json!({
            "email": email,
            "password": request.password,
        });

        self.supabase
            .request::<LoginResponse>(
                Method::POST,
                "/auth/v1/token?grant_type=password",
                None,
                Some(body),
            )
            .await
            .map_err(|e| match e {
                DbError::Unauthorized(_) | DbError::Api { status: 400, .. } => {
                    AuthError::InvalidCredentials
                }
                other => AuthError::Database(other),
            })
    }
}
