use chrono::{NaiveDate, Utc};
use serde_json::{json, Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::{PostgrestQuery, SupabaseClient};
use shared_utils::validation::{age_on, is_valid_email, is_valid_state_code, normalize_phone, FieldErrors};

use crate::models::{
    CreatePatientRequest, Patient, PatientError, PatientSearchQuery, UpdatePatientRequest,
};

const MIN_PATIENT_AGE: i32 = 18;
const MAX_PATIENT_AGE: i32 = 120;
const DEFAULT_SEARCH_LIMIT: i64 = 20;
const MAX_SEARCH_LIMIT: i64 = 100;

pub struct PatientService {
    supabase: SupabaseClient,
}

impl PatientService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    pub async fn create_patient(
        &self,
        user_id: &str,
        request: CreatePatientRequest,
        auth_token: &str,
    ) -> Result<Patient, PatientError> {
        validate_new_patient(&request, Utc::now().date_naive())?;
        let email = request.email.trim().to_lowercase();
        debug!("Creating new patient profile for: {}", email);

        let existing: Vec<Value> = self
            .supabase
            .select(
                "patients",
                &PostgrestQuery::new().select("id,email").eq("email", &email),
                Some(auth_token),
            )
            .await?;
        if !existing.is_empty() {
            return Err(PatientError::EmailAlreadyExists { email });
        }

        let own: Vec<Value> = self
            .supabase
            .select(
                "patients",
                &PostgrestQuery::new().select("id").eq("id", user_id),
                Some(auth_token),
            )
            .await?;
        if !own.is_empty() {
            return Err(PatientError::ProfileExists);
        }

        let now = Utc::now().to_rfc3339();
        let patient_data = json!({
            "id": user_id,
            "first_name": request.first_name.trim(),
            "last_name": request.last_name.trim(),
            "email": email,
            "phone_number": normalize_phone(&request.phone_number),
            "date_of_birth": request.date_of_birth.format("%Y-%m-%d").to_string(),
            "sex": request.sex,
            "address_line1": request.address_line1,
            "address_line2": request.address_line2,
            "city": request.city,
            "state": request.state,
            "postal_code": request.postal_code,
            "allergies": request.allergies,
            "current_medications": request.current_medications,
            "medical_conditions": request.medical_conditions.unwrap_or_default(),
            "created_at": now,
            "updated_at": now
        });

        let patient: Patient = self
            .supabase
            .insert("patients", patient_data, Some(auth_token))
            .await
            .map_err(|e| match e {
                shared_database::DbError::Conflict(_) => PatientError::EmailAlreadyExists {
                    email: request.email.trim().to_lowercase(),
                },
                other => other.into(),
            })?;

        info!("Patient profile created with ID: {}", patient.id);
        Ok(patient)
    }

    pub async fn get_patient(&self, patient_id: &str, auth_token: &str) -> Result<Patient, PatientError> {
        debug!("Fetching patient profile: {}", patient_id);

        let patient = self
            .supabase
            .select_one("patients", &PostgrestQuery::new().eq("id", patient_id), Some(auth_token))
            .await?;
        Ok(patient)
    }

    pub async fn update_patient(
        &self,
        patient_id: &str,
        request: UpdatePatientRequest,
        auth_token: &str,
    ) -> Result<Patient, PatientError> {
        debug!("Updating patient profile: {}", patient_id);

        let mut update_data = build_update(request)?;
        update_data.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));

        let updated: Vec<Patient> = self
            .supabase
            .update(
                "patients",
                &PostgrestQuery::new().eq("id", patient_id),
                Value::Object(update_data),
                Some(auth_token),
            )
            .await?;

        updated.into_iter().next().ok_or(PatientError::NotFound)
    }

    pub async fn search_patients(
        &self,
        query: PatientSearchQuery,
        auth_token: &str,
    ) -> Result<Vec<Patient>, PatientError> {
        let mut filter = PostgrestQuery::new();

        if let Some(name) = query.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            let pattern = format!("*{}*", name.replace(['*', ',', '(', ')'], ""));
            filter = filter.or(&[
                format!("first_name.ilike.{}", pattern),
                format!("last_name.ilike.{}", pattern),
            ]);
        }
        if let Some(email) = query.email.as_deref() {
            filter = filter.eq("email", email.trim().to_lowercase());
        }
        if let Some(state) = query.state.as_deref() {
            filter = filter.eq("state", state);
        }

        let limit = query
            .limit
            .unwrap_or(DEFAULT_SEARCH_LIMIT)
            .clamp(1, MAX_SEARCH_LIMIT);
        filter = filter
            .order("last_name", true)
            .limit(limit)
            .offset(query.offset.unwrap_or(0).max(0));

        let patients = self
            .supabase
            .select("patients", &filter, Some(auth_token))
            .await?;
        Ok(patients)
    }

    /// Record the Stripe customer created for this patient on first purchase.
    pub async fn set_stripe_customer_id(
        &self,
        patient_id: &Uuid,
        customer_id: &str,
        auth_token: &str,
    ) -> Result<(), PatientError> {
        let updated: Vec<Value> = self
            .supabase
            .update(
                "patients",
                &PostgrestQuery::new().eq("id", patient_id),
                json!({
                    "stripe_customer_id": customer_id,
                    "updated_at": Utc::now().to_rfc3339()
                }),
                Some(auth_token),
            )
            .await?;

        if updated.is_empty() {
            return Err(PatientError::NotFound);
        }
        Ok(())
    }
}

pub fn validate_new_patient(request: &CreatePatientRequest, today: NaiveDate) -> Result<(), PatientError> {
    let mut errors = FieldErrors::new();

    errors.require_text(&request.first_name, "first_name", 100);
    errors.require_text(&request.last_name, "last_name", 100);
    errors.check(is_valid_email(request.email.trim()), "email", "must be a valid email address");
    errors.check(
        normalize_phone(&request.phone_number).is_some(),
        "phone_number",
        "must contain 10 to 15 digits",
    );
    errors.check(is_valid_state_code(&request.state), "state", "must be a US state code");

    let age = age_on(request.date_of_birth, today);
    if age < MIN_PATIENT_AGE {
        errors.add("date_of_birth", format!("patient must be at least {} years old", MIN_PATIENT_AGE));
    } else if age > MAX_PATIENT_AGE {
        errors.add("date_of_birth", "is not plausible");
    }

    errors.into_message().map_err(PatientError::Validation)
}

fn build_update(request: UpdatePatientRequest) -> Result<Map<String, Value>, PatientError> {
    let mut errors = FieldErrors::new();
    let mut update_data = Map::new();

    if let Some(first_name) = request.first_name {
        errors.require_text(&first_name, "first_name", 100);
        update_data.insert("first_name".to_string(), json!(first_name.trim()));
    }
    if let Some(last_name) = request.last_name {
        errors.require_text(&last_name, "last_name", 100);
        update_data.insert("last_name".to_string(), json!(last_name.trim()));
    }
    if let Some(phone_number) = request.phone_number {
        match normalize_phone(&phone_number) {
            Some(phone) => {
                update_data.insert("phone_number".to_string(), json!(phone));
            }
            None => errors.add("phone_number", "must contain 10 to 15 digits"),
        }
    }
    if let Some(state) = request.state {
        errors.check(is_valid_state_code(&state), "state", "must be a US state code");
        update_data.insert("state".to_string(), json!(state));
    }

    let optional_text = [
        ("address_line1", request.address_line1),
        ("address_line2", request.address_line2),
        ("city", request.city),
        ("postal_code", request.postal_code),
        ("allergies", request.allergies),
        ("current_medications", request.current_medications),
    ];
    for (column, value) in optional_text {
        if let Some(value) = value {
            update_data.insert(column.to_string(), json!(value));
        }
    }
    if let Some(conditions) = request.medical_conditions {
        update_data.insert("medical_conditions".to_string(), json!(conditions));
    }

    errors.into_message().map_err(PatientError::Validation)?;

    if update_data.is_empty() {
        return Err(PatientError::EmptyUpdate);
    }
    Ok(update_data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn valid_request() -> CreatePatientRequest {
        CreatePatientRequest {
            first_name: "Jane".to_string(),
            last_name: "Doe".to_string(),
            email: "jane@example.com".to_string(),
            phone_number: "(555) 123-4567".to_string(),
            date_of_birth: NaiveDate::from_ymd_opt(1990, 1, 1).unwrap(),
            sex: Some("female".to_string()),
            address_line1: None,
            address_line2: None,
            city: None,
            state: "CA".to_string(),
            postal_code: None,
            allergies: None,
            current_medications: None,
            medical_conditions: None,
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    #[test]
    fn accepts_valid_intake() {
        assert!(validate_new_patient(&valid_request(), today()).is_ok());
    }

    #[test]
    fn rejects_minors() {
        let request = CreatePatientRequest {
            date_of_birth: NaiveDate::from_ymd_opt(2010, 1, 1).unwrap(),
            ..valid_request()
        };
        assert_matches!(
            validate_new_patient(&request, today()),
            Err(PatientError::Validation(msg)) if msg.starts_with("date_of_birth")
        );
    }

    #[test]
    fn reports_every_bad_field() {
        let request = CreatePatientRequest {
            first_name: " ".to_string(),
            email: "nope".to_string(),
            state: "XX".to_string(),
            ..valid_request()
        };
        let err = validate_new_patient(&request, today()).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("first_name"));
        assert!(message.contains("email"));
        assert!(message.contains("state"));
    }

    #[test]
    fn empty_update_is_rejected() {
        assert_matches!(
            build_update(UpdatePatientRequest::default()),
            Err(PatientError::EmptyUpdate)
        );
    }

    #[test]
    fn update_normalizes_phone() {
        let update = build_update(UpdatePatientRequest {
            phone_number: Some("555.123.4567".to_string()),
            ..UpdatePatientRequest::default()
        })
        .unwrap();
        assert_eq!(update["phone_number"], "+5551234567");
    }
}
