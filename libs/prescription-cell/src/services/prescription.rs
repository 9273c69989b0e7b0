use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use consultation_cell::{ConsultationService, ConsultationStatus};
use shared_config::AppConfig;
use shared_database::{PostgrestQuery, SupabaseClient};
use shared_models::auth::{Role, User};
use shared_utils::validation::FieldErrors;

use crate::models::{
    next_check_in_due, IssuePrescriptionRequest, Prescription, PrescriptionDetail, PrescriptionError,
    PrescriptionListQuery, PrescriptionStatus, CHECK_IN_INTERVAL_DAYS,
};

pub const MAX_REFILLS: i32 = 12;
pub const DEFAULT_VALIDITY_DAYS: i64 = 365;

#[derive(Debug, Deserialize)]
struct CheckInTimestamp {
    created_at: DateTime<Utc>,
}

pub struct PrescriptionService {
    supabase: SupabaseClient,
    consultations: ConsultationService,
}

impl PrescriptionService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
            consultations: ConsultationService::new(config),
        }
    }

    pub async fn issue(
        &self,
        user: &User,
        request: IssuePrescriptionRequest,
        auth_token: &str,
    ) -> Result<Prescription, PrescriptionError> {
        let now = Utc::now();
        validate_issue(&request, now)?;

        let consultation = self
            .consultations
            .get(&request.consultation_id.to_string(), auth_token)
            .await?;
        if !consultation.is_assigned_to(&user.id) {
            return Err(PrescriptionError::Forbidden(
                "Only the assigned provider can prescribe for this consultation".to_string(),
            ));
        }
        if !matches!(
            consultation.status,
            ConsultationStatus::Assigned | ConsultationStatus::InReview | ConsultationStatus::Completed
        ) {
            return Err(PrescriptionError::ConsultationNotReady(
                consultation.status.to_string(),
            ));
        }

        let expires_at = request
            .expires_at
            .unwrap_or_else(|| now + Duration::days(DEFAULT_VALIDITY_DAYS));
        debug!(
            "Provider {} prescribing {} for consultation {}",
            user.id, request.medication_name, consultation.id
        );

        let prescription: Prescription = self
            .supabase
            .insert(
                "prescriptions",
                json!({
                    "consultation_id": consultation.id,
                    "patient_id": consultation.patient_id,
                    "provider_id": user.id,
                    "medication_name": request.medication_name.trim(),
                    "dosage": request.dosage.trim(),
                    "instructions": request.instructions,
                    "quantity": request.quantity,
                    "refills_authorized": request.refills_authorized,
                    "refills_used": 0,
                    "status": PrescriptionStatus::Active,
                    "expires_at": expires_at.to_rfc3339(),
                    "created_at": now.to_rfc3339(),
                    "updated_at": now.to_rfc3339(),
                }),
                Some(auth_token),
            )
            .await?;

        info!("Prescription {} issued", prescription.id);
        Ok(prescription)
    }

    pub async fn list_for(
        &self,
        user: &User,
        query: PrescriptionListQuery,
        auth_token: &str,
    ) -> Result<Vec<Prescription>, PrescriptionError> {
        let mut filter = match user.role() {
            Role::Patient => PostgrestQuery::new().eq("patient_id", &user.id),
            Role::Provider => PostgrestQuery::new().eq("provider_id", &user.id),
            Role::Admin => PostgrestQuery::new(),
        };
        if user.role().is_staff() {
            if let Some(patient_id) = query.patient_id {
                filter = filter.eq("patient_id", patient_id);
            }
        }
        if let Some(status) = query.status {
            filter = filter.eq("status", status);
        }
        filter = filter.order("created_at", false);

        let prescriptions = self
            .supabase
            .select("prescriptions", &filter, Some(auth_token))
            .await?;
        Ok(prescriptions)
    }

    pub async fn get(&self, prescription_id: &str, auth_token: &str) -> Result<Prescription, PrescriptionError> {
        let prescription = self
            .supabase
            .select_one(
                "prescriptions",
                &PostgrestQuery::new().eq("id", prescription_id),
                Some(auth_token),
            )
            .await?;
        Ok(prescription)
    }

    /// Owner, prescriber or admin.
    pub async fn get_for(
        &self,
        user: &User,
        prescription_id: &str,
        auth_token: &str,
    ) -> Result<Prescription, PrescriptionError> {
        let prescription = self.get(prescription_id, auth_token).await?;
        if !(prescription.is_owned_by(&user.id) || prescription.is_prescribed_by(&user.id) || user.is_admin()) {
            return Err(PrescriptionError::Forbidden(
                "Not authorized to access this prescription".to_string(),
            ));
        }
        Ok(prescription)
    }

    pub async fn detail(
        &self,
        user: &User,
        prescription_id: &str,
        auth_token: &str,
    ) -> Result<PrescriptionDetail, PrescriptionError> {
        let prescription = self.get_for(user, prescription_id, auth_token).await?;

        let latest: Vec<CheckInTimestamp> = self
            .supabase
            .select(
                "refill_check_ins",
                &PostgrestQuery::new()
                    .select("created_at")
                    .eq("prescription_id", prescription.id)
                    .order("created_at", false)
                    .limit(1),
                Some(auth_token),
            )
            .await?;
        let last_check_in_at = latest.into_iter().next().map(|row| row.created_at);
        let anchor = last_check_in_at.unwrap_or(prescription.created_at);

        Ok(PrescriptionDetail {
            refills_remaining: prescription.refills_remaining(),
            next_check_in_due: next_check_in_due(anchor, CHECK_IN_INTERVAL_DAYS),
            last_check_in_at,
            prescription,
        })
    }

    pub async fn update_status(
        &self,
        user: &User,
        prescription_id: &str,
        status: PrescriptionStatus,
        auth_token: &str,
    ) -> Result<Prescription, PrescriptionError> {
        let prescription = self.get(prescription_id, auth_token).await?;
        if !(prescription.is_prescribed_by(&user.id) || user.is_admin()) {
            return Err(PrescriptionError::Forbidden(
                "Only the prescriber or an admin can change this prescription".to_string(),
            ));
        }
        if !prescription.status.can_transition_to(status) {
            warn!("Invalid prescription transition {} -> {}", prescription.status, status);
            return Err(PrescriptionError::InvalidStatusTransition {
                from: prescription.status,
                to: status,
            });
        }

        let updated = self
            .guarded_update(
                PostgrestQuery::new()
                    .eq("id", prescription.id)
                    .eq("status", prescription.status),
                json!({ "status": status, "updated_at": Utc::now().to_rfc3339() }),
                auth_token,
            )
            .await?;

        info!("Prescription {} moved {} -> {}", updated.id, prescription.status, updated.status);
        Ok(updated)
    }

    /// Uses one refill, pinned to the count we read so two approvals can't share it.
    pub async fn consume_refill(
        &self,
        prescription: &Prescription,
        auth_token: &str,
    ) -> Result<Prescription, PrescriptionError> {
        if !prescription.can_refill_at(Utc::now()) {
            return Err(PrescriptionError::NoRefillsRemaining);
        }

        let updated = self
            .guarded_update(
                PostgrestQuery::new()
                    .eq("id", prescription.id)
                    .eq("status", PrescriptionStatus::Active)
                    .eq("refills_used", prescription.refills_used),
                json!({
                    "refills_used": prescription.refills_used + 1,
                    "updated_at": Utc::now().to_rfc3339(),
                }),
                auth_token,
            )
            .await?;

        debug!(
            "Prescription {} refills used {}/{}",
            updated.id, updated.refills_used, updated.refills_authorized
        );
        Ok(updated)
    }

    async fn guarded_update(
        &self,
        filter: PostgrestQuery,
        changes: Value,
        auth_token: &str,
    ) -> Result<Prescription, PrescriptionError> {
        let rows: Vec<Prescription> = self
            .supabase
            .update("prescriptions", &filter, changes, Some(auth_token))
            .await?;
        rows.into_iter()
            .next()
            .ok_or(PrescriptionError::ConcurrentModification)
    }
}

pub fn validate_issue(request: &IssuePrescriptionRequest, now: DateTime<Utc>) -> Result<(), PrescriptionError> {
    let mut errors = FieldErrors::new();
    errors.require_text(&request.medication_name, "medication_name", 200);
    errors.require_text(&request.dosage, "dosage", 200);
    errors.check(request.quantity >= 1, "quantity", "must be at least 1");
    errors.check(
        (0..=MAX_REFILLS).contains(&request.refills_authorized),
        "refills_authorized",
        "must be between 0 and 12",
    );
    if let Some(expires_at) = request.expires_at {
        errors.check(expires_at > now, "expires_at", "must be in the future");
    }
    errors.into_message().map_err(PrescriptionError::Validation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use uuid::Uuid;

    fn request() -> IssuePrescriptionRequest {
        IssuePrescriptionRequest {
            consultation_id: Uuid::new_v4(),
            medication_name: "Finasteride".to_string(),
            dosage: "1mg daily".to_string(),
            instructions: None,
            quantity: 30,
            refills_authorized: 11,
            expires_at: None,
        }
    }

    #[test]
    fn valid_request_passes() {
        assert!(validate_issue(&request(), Utc::now()).is_ok());
    }

    #[test]
    fn quantity_and_refill_bounds() {
        let mut req = request();
        req.quantity = 0;
        assert_matches!(
            validate_issue(&req, Utc::now()),
            Err(PrescriptionError::Validation(msg)) if msg.contains("quantity")
        );

        let mut req = request();
        req.refills_authorized = 13;
        assert!(validate_issue(&req, Utc::now()).is_err());
        req.refills_authorized = -1;
        assert!(validate_issue(&req, Utc::now()).is_err());
        req.refills_authorized = 12;
        assert!(validate_issue(&req, Utc::now()).is_ok());
    }

    #[test]
    fn past_expiry_is_rejected() {
        let mut req = request();
        req.expires_at = Some(Utc::now() - Duration::days(1));
        assert!(validate_issue(&req, Utc::now()).is_err());
    }

    #[test]
    fn status_table() {
        use PrescriptionStatus::*;
        assert!(Active.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Active));
        assert!(!Paused.can_transition_to(Completed));
        assert!(!Cancelled.can_transition_to(Active));
        assert!(Expired.valid_transitions().is_empty());
    }

    #[test]
    fn next_check_in_is_thirty_days_out() {
        let last = Utc::now();
        assert_eq!(next_check_in_due(last, CHECK_IN_INTERVAL_DAYS) - last, Duration::days(30));
    }
}
