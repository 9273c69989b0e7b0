use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use provider_cell::{ProviderError, ProviderMatchingService, ProviderService};
use shared_config::AppConfig;
use shared_database::{PostgrestQuery, SupabaseClient};
use shared_models::auth::{Role, User};
use shared_utils::validation::{is_valid_state_code, FieldErrors};

use crate::models::{
    Consultation, ConsultationError, ConsultationListQuery, ConsultationStatus,
    CreateConsultationRequest, UpdateStatusRequest,
};
use crate::services::lifecycle::ConsultationLifecycle;

const MAX_SYMPTOMS_LEN: usize = 5000;

pub struct ConsultationService {
    supabase: SupabaseClient,
    providers: ProviderService,
    matching: ProviderMatchingService,
}

impl ConsultationService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
            providers: ProviderService::new(config),
            matching: ProviderMatchingService::new(config),
        }
    }

    pub async fn submit(
        &self,
        patient_id: &str,
        request: CreateConsultationRequest,
        auth_token: &str,
    ) -> Result<Consultation, ConsultationError> {
        validate_submission(&request)?;
        debug!("Patient {} submitting consultation for {}", patient_id, request.condition);

        let now = Utc::now().to_rfc3339();
        let consultation: Consultation = self
            .supabase
            .insert(
                "consultations",
                json!({
                    "patient_id": patient_id,
                    "condition": request.condition.trim().to_lowercase(),
                    "symptoms": request.symptoms.trim(),
                    "intake_answers": request.intake_answers.unwrap_or_else(|| json!({})),
                    "patient_state": request.patient_state.trim().to_uppercase(),
                    "status": ConsultationStatus::Pending,
                    "created_at": now,
                    "updated_at": now,
                }),
                Some(auth_token),
            )
            .await?;

        info!("Consultation {} submitted", consultation.id);
        Ok(consultation)
    }

    /// What the caller is allowed to see, newest first.
    pub async fn list_for(
        &self,
        user: &User,
        query: ConsultationListQuery,
        auth_token: &str,
    ) -> Result<Vec<Consultation>, ConsultationError> {
        let mut filter = match user.role() {
            Role::Patient => PostgrestQuery::new().eq("patient_id", &user.id),
            Role::Provider => PostgrestQuery::new().or(&[
                format!("provider_id.eq.{}", user.id),
                "and(status.eq.pending,provider_id.is.null)".to_string(),
            ]),
            Role::Admin => PostgrestQuery::new(),
        };
        if let Some(status) = query.status {
            filter = filter.eq("status", status);
        }
        filter = filter.order("created_at", false);

        let consultations = self
            .supabase
            .select("consultations", &filter, Some(auth_token))
            .await?;
        Ok(consultations)
    }

    pub async fn get(&self, consultation_id: &str, auth_token: &str) -> Result<Consultation, ConsultationError> {
        let consultation = self
            .supabase
            .select_one(
                "consultations",
                &PostgrestQuery::new().eq("id", consultation_id),
                Some(auth_token),
            )
            .await?;
        Ok(consultation)
    }

    /// Loads the consultation and checks the caller may read it.
    pub async fn get_for(
        &self,
        user: &User,
        consultation_id: &str,
        auth_token: &str,
    ) -> Result<Consultation, ConsultationError> {
        let consultation = self.get(consultation_id, auth_token).await?;
        ensure_can_view(user, &consultation)?;
        Ok(consultation)
    }

    pub async fn assign(
        &self,
        user: &User,
        consultation_id: &str,
        requested_provider: Option<Uuid>,
        auth_token: &str,
    ) -> Result<Consultation, ConsultationError> {
        let consultation = self.get(consultation_id, auth_token).await?;
        ConsultationLifecycle::validate_transition(consultation.status, ConsultationStatus::Assigned)?;

        let provider = match (user.role(), requested_provider) {
            (Role::Provider, _) => {
                let provider = self
                    .providers
                    .get_provider(&user.id, Some(auth_token))
                    .await
                    .map_err(|e| match e {
                        ProviderError::NotFound => {
                            ConsultationError::Forbidden("No provider profile for this account".to_string())
                        }
                        other => other.into(),
                    })?;
                if !provider.is_licensed_in(&consultation.patient_state) {
                    return Err(ConsultationError::Forbidden(format!(
                        "Not licensed in {}",
                        consultation.patient_state
                    )));
                }
                provider
            }
            (Role::Admin, Some(provider_id)) => {
                let provider = self
                    .providers
                    .get_provider(&provider_id.to_string(), Some(auth_token))
                    .await?;
                if !provider.is_licensed_in(&consultation.patient_state) {
                    return Err(ConsultationError::Validation(format!(
                        "{} is not licensed in {}",
                        provider.display_name(),
                        consultation.patient_state
                    )));
                }
                provider
            }
            (Role::Admin, None) => {
                self.matching
                    .best_provider_for(&consultation.patient_state, None, auth_token)
                    .await?
            }
            (Role::Patient, _) => {
                return Err(ConsultationError::Forbidden(
                    "Patients cannot assign consultations".to_string(),
                ))
            }
        };

        let mut changes = ConsultationLifecycle::transition_changes(
            consultation.status,
            ConsultationStatus::Assigned,
            Utc::now(),
        );
        changes.insert("provider_id".to_string(), json!(provider.id));

        let updated = self
            .guarded_update(&consultation, Value::Object(changes), auth_token)
            .await?;
        info!("Consultation {} assigned to provider {}", updated.id, provider.id);
        Ok(updated)
    }

    pub async fn update_status(
        &self,
        user: &User,
        consultation_id: &str,
        request: UpdateStatusRequest,
        auth_token: &str,
    ) -> Result<Consultation, ConsultationError> {
        // Assignment also writes provider_id, so it only goes through `assign`.
        if request.status == ConsultationStatus::Assigned {
            return Err(ConsultationError::Validation(
                "status: use the assign endpoint to assign a provider".to_string(),
            ));
        }

        let consultation = self.get(consultation_id, auth_token).await?;
        ConsultationLifecycle::authorize_transition(user, &consultation, request.status)?;
        ConsultationLifecycle::validate_transition(consultation.status, request.status)?;

        let mut changes =
            ConsultationLifecycle::transition_changes(consultation.status, request.status, Utc::now());

        if user.role().is_staff() {
            if let Some(notes) = request.provider_notes {
                changes.insert("provider_notes".to_string(), json!(notes));
            }
            if let Some(diagnosis) = request.diagnosis {
                changes.insert("diagnosis".to_string(), json!(diagnosis));
            }
            if let Some(protocol_id) = request.recommended_protocol_id {
                changes.insert("recommended_protocol_id".to_string(), json!(protocol_id));
            }
        }

        let updated = self
            .guarded_update(&consultation, Value::Object(changes), auth_token)
            .await?;
        info!(
            "Consultation {} moved {} -> {}",
            updated.id, consultation.status, updated.status
        );
        Ok(updated)
    }

    pub async fn cancel(
        &self,
        user: &User,
        consultation_id: &str,
        auth_token: &str,
    ) -> Result<Consultation, ConsultationError> {
        self.update_status(
            user,
            consultation_id,
            UpdateStatusRequest {
                status: ConsultationStatus::Cancelled,
                provider_notes: None,
                diagnosis: None,
                recommended_protocol_id: None,
            },
            auth_token,
        )
        .await
    }

    /// PATCH pinned to the status we read; no row back means another writer got there first.
    async fn guarded_update(
        &self,
        current: &Consultation,
        changes: Value,
        auth_token: &str,
    ) -> Result<Consultation, ConsultationError> {
        let filter = PostgrestQuery::new()
            .eq("id", current.id)
            .eq("status", current.status);

        let rows: Vec<Consultation> = self
            .supabase
            .update("consultations", &filter, changes, Some(auth_token))
            .await?;

        rows.into_iter().next().ok_or_else(|| {
            warn!("Consultation {} changed underneath us", current.id);
            ConsultationError::ConcurrentModification
        })
    }
}

pub fn ensure_can_view(user: &User, consultation: &Consultation) -> Result<(), ConsultationError> {
    let allowed = match user.role() {
        Role::Admin => true,
        Role::Patient => consultation.is_owned_by(&user.id),
        // Unclaimed requests are visible to any provider so they can pick them up.
        Role::Provider => {
            consultation.is_assigned_to(&user.id)
                || (consultation.status == ConsultationStatus::Pending && consultation.provider_id.is_none())
        }
    };

    if allowed {
        Ok(())
    } else {
        Err(ConsultationError::Forbidden(
            "Not authorized to access this consultation".to_string(),
        ))
    }
}

pub fn validate_submission(request: &CreateConsultationRequest) -> Result<(), ConsultationError> {
    let mut errors = FieldErrors::new();
    errors.require_text(&request.condition, "condition", 100);
    errors.require_text(&request.symptoms, "symptoms", MAX_SYMPTOMS_LEN);
    errors.check(
        is_valid_state_code(request.patient_state.trim()),
        "patient_state",
        "must be a valid two-letter US state code",
    );
    if let Some(answers) = &request.intake_answers {
        errors.check(answers.is_object(), "intake_answers", "must be a JSON object");
    }
    errors.into_message().map_err(ConsultationError::Validation)
}
