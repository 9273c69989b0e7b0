use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use shared_config::AppConfig;
use shared_database::{DbError, PostgrestQuery, SupabaseClient};
use shared_utils::validation::{is_valid_email, is_valid_state_code, FieldErrors};

use crate::models::{
    CreateProviderRequest, Provider, ProviderError, ProviderListQuery, UpdateProviderRequest,
};

pub struct ProviderService {
    supabase: SupabaseClient,
}

impl ProviderService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    /// Public listing. Runs with the anon key only.
    pub async fn list_providers(&self, query: ProviderListQuery) -> Result<Vec<Provider>, ProviderError> {
        debug!("Listing providers with filters: {:?}", query);

        let mut filter = PostgrestQuery::new();
        if let Some(specialty) = query.specialty.as_deref() {
            filter = filter.eq("specialty", specialty.trim().to_lowercase());
        }
        if let Some(state) = query.state.as_deref() {
            filter = filter.contains("licensed_states", &state.to_uppercase());
        }
        if let Some(accepting) = query.accepting {
            filter = filter.eq("accepting_consultations", accepting);
        }
        filter = filter.order("last_name", true);

        let providers = self.supabase.select("providers", &filter, None).await?;
        Ok(providers)
    }

    pub async fn get_provider(&self, provider_id: &str, auth_token: Option<&str>) -> Result<Provider, ProviderError> {
        let provider = self
            .supabase
            .select_one("providers", &PostgrestQuery::new().eq("id", provider_id), auth_token)
            .await?;
        Ok(provider)
    }

    pub async fn create_provider(
        &self,
        request: CreateProviderRequest,
        auth_token: &str,
    ) -> Result<Provider, ProviderError> {
        validate_new_provider(&request)?;
        let email = request.email.trim().to_lowercase();
        debug!("Creating provider profile for {}", email);

        let existing: Vec<Value> = self
            .supabase
            .select(
                "providers",
                &PostgrestQuery::new().select("id").eq("email", &email),
                Some(auth_token),
            )
            .await?;
        if !existing.is_empty() {
            return Err(ProviderError::EmailAlreadyExists(email));
        }

        let now = Utc::now().to_rfc3339();
        let provider: Provider = self
            .supabase
            .insert(
                "providers",
                json!({
                    "id": request.id,
                    "first_name": request.first_name.trim(),
                    "last_name": request.last_name.trim(),
                    "email": email,
                    "license_number": request.license_number.trim(),
                    "licensed_states": normalize_states(&request.licensed_states),
                    "specialty": request.specialty.trim().to_lowercase(),
                    "bio": request.bio,
                    "accepting_consultations": true,
                    "created_at": now,
                    "updated_at": now
                }),
                Some(auth_token),
            )
            .await
            .map_err(|e| match e {
                DbError::Conflict(_) => ProviderError::EmailAlreadyExists(email.clone()),
                other => other.into(),
            })?;

        info!("Provider {} created", provider.id);
        Ok(provider)
    }

    pub async fn update_provider(
        &self,
        provider_id: &str,
        request: UpdateProviderRequest,
        auth_token: &str,
    ) -> Result<Provider, ProviderError> {
        let mut changes = build_update(request)?;
        changes.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));

        self.patch(provider_id, Value::Object(changes), auth_token).await
    }

    pub async fn set_accepting(
        &self,
        provider_id: &str,
        accepting: bool,
        auth_token: &str,
    ) -> Result<Provider, ProviderError> {
        info!("Provider {} accepting consultations: {}", provider_id, accepting);
        self.patch(
            provider_id,
            json!({
                "accepting_consultations": accepting,
                "updated_at": Utc::now().to_rfc3339()
            }),
            auth_token,
        )
        .await
    }

    async fn patch(&self, provider_id: &str, changes: Value, auth_token: &str) -> Result<Provider, ProviderError> {
        let updated: Vec<Provider> = self
            .supabase
            .update(
                "providers",
                &PostgrestQuery::new().eq("id", provider_id),
                changes,
                Some(auth_token),
            )
            .await?;

        updated.into_iter().next().ok_or(ProviderError::NotFound)
    }
}

fn normalize_states(states: &[String]) -> Vec<String> {
    let mut normalized: Vec<String> = states.iter().map(|s| s.trim().to_uppercase()).collect();
    normalized.sort();
    normalized.dedup();
    normalized
}

fn check_states(errors: &mut FieldErrors, states: &[String]) {
    if states.is_empty() {
        errors.add("licensed_states", "at least one state is required");
    }
    if let Some(bad) = states
        .iter()
        .find(|s| !is_valid_state_code(&s.trim().to_uppercase()))
    {
        errors.add("licensed_states", format!("{} is not a US state code", bad));
    }
}

pub fn validate_new_provider(request: &CreateProviderRequest) -> Result<(), ProviderError> {
    let mut errors = FieldErrors::new();
    errors.require_text(&request.first_name, "first_name", 100);
    errors.require_text(&request.last_name, "last_name", 100);
    errors.check(is_valid_email(request.email.trim()), "email", "must be a valid email address");
    errors.require_text(&request.license_number, "license_number", 50);
    errors.require_text(&request.specialty, "specialty", 100);
    check_states(&mut errors, &request.licensed_states);

    errors.into_message().map_err(ProviderError::Validation)
}

fn build_update(request: UpdateProviderRequest) -> Result<Map<String, Value>, ProviderError> {
    let mut errors = FieldErrors::new();
    let mut changes = Map::new();

    if let Some(first_name) = request.first_name {
        errors.require_text(&first_name, "first_name", 100);
        changes.insert("first_name".to_string(), json!(first_name.trim()));
    }
    if let Some(last_name) = request.last_name {
        errors.require_text(&last_name, "last_name", 100);
        changes.insert("last_name".to_string(), json!(last_name.trim()));
    }
    if let Some(license_number) = request.license_number {
        errors.require_text(&license_number, "license_number", 50);
        changes.insert("license_number".to_string(), json!(license_number.trim()));
    }
    if let Some(states) = request.licensed_states {
        check_states(&mut errors, &states);
        changes.insert("licensed_states".to_string(), json!(normalize_states(&states)));
    }
    if let Some(specialty) = request.specialty {
        errors.require_text(&specialty, "specialty", 100);
        changes.insert("specialty".to_string(), json!(specialty.trim().to_lowercase()));
    }
    if let Some(bio) = request.bio {
        changes.insert("bio".to_string(), json!(bio));
    }

    errors.into_message().map_err(ProviderError::Validation)?;
    if changes.is_empty() {
        return Err(ProviderError::EmptyUpdate);
    }
    Ok(changes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use uuid::Uuid;

    fn request(states: &[&str]) -> CreateProviderRequest {
        CreateProviderRequest {
            id: Uuid::new_v4(),
            first_name: "Gregory".to_string(),
            last_name: "House".to_string(),
            email: "house@example.com".to_string(),
            license_number: "MD-1".to_string(),
            licensed_states: states.iter().map(|s| s.to_string()).collect(),
            specialty: "General".to_string(),
            bio: None,
        }
    }

    #[test]
    fn requires_valid_states() {
        assert!(validate_new_provider(&request(&["ca", "NY"])).is_ok());
        assert_matches!(
            validate_new_provider(&request(&[])),
            Err(ProviderError::Validation(msg)) if msg.contains("licensed_states")
        );
        assert_matches!(
            validate_new_provider(&request(&["CA", "Narnia"])),
            Err(ProviderError::Validation(msg)) if msg.contains("Narnia")
        );
    }

    #[test]
    fn states_are_normalized() {
        let states = vec!["ny".to_string(), " CA".to_string(), "NY".to_string()];
        assert_eq!(normalize_states(&states), vec!["CA", "NY"]);
    }
}
