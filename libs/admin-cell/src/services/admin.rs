use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::{DbError, PostgrestQuery, SupabaseClient};
use shared_utils::validation::{is_valid_email, FieldErrors};

use crate::models::{Admin, AdminError, CreateAdminRequest};

pub struct AdminService {
    supabase: SupabaseClient,
}

impl AdminService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    pub async fn list_admins(&self, auth_token: &str) -> Result<Vec<Admin>, AdminError> {
        let admins = self
            .supabase
            .select("admins", &PostgrestQuery::new().order("created_at", true), Some(auth_token))
            .await?;
        Ok(admins)
    }

    pub async fn create_admin(&self, request: CreateAdminRequest, auth_token: &str) -> Result<Admin, AdminError> {
        let mut errors = FieldErrors::new();
        errors.require_text(&request.full_name, "full_name", 200);
        errors.check(is_valid_email(request.email.trim()), "email", "must be a valid email address");
        errors.into_message().map_err(AdminError::Validation)?;

        let email = request.email.trim().to_lowercase();
        debug!("Creating admin {}", email);

        let existing: Vec<Value> = self
            .supabase
            .select("admins", &PostgrestQuery::new().select("id").eq("email", &email), Some(auth_token))
            .await?;
        if !existing.is_empty() {
            return Err(AdminError::EmailAlreadyExists(email));
        }

        let admin: Admin = self
            .supabase
            .insert(
                "admins",
                json!({
                    "id": request.id.unwrap_or_else(Uuid::new_v4),
                    "email": email,
                    "full_name": request.full_name.trim(),
                    "created_at": Utc::now().to_rfc3339(),
                }),
                Some(auth_token),
            )
            .await
            .map_err(|e| match e {
                DbError::Conflict(_) => AdminError::EmailAlreadyExists(email.clone()),
                other => other.into(),
            })?;

        info!("Admin {} created", admin.id);
        Ok(admin)
    }
}
