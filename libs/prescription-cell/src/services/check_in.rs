use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, error, info};

use shared_config::AppConfig;
use shared_database::{DbError, PostgrestQuery, SupabaseClient};
use shared_models::auth::User;

use crate::models::{
    CheckInAnswers, CheckInStatus, PrescriptionError, RefillCheckIn, ReviewCheckInRequest,
};
use crate::services::prescription::PrescriptionService;
use crate::services::rules::RefillRules;

pub struct CheckInService {
    supabase: SupabaseClient,
    prescriptions: PrescriptionService,
}

impl CheckInService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
            prescriptions: PrescriptionService::new(config),
        }
    }

    /// Runs the escalation rules; a clean check-in consumes a refill immediately.
    /// The check-in is recorded before the refill is taken and removed again if
    /// the refill cannot be consumed.
    pub async fn submit(
        &self,
        user: &User,
        prescription_id: &str,
        answers: CheckInAnswers,
        auth_token: &str,
    ) -> Result<RefillCheckIn, PrescriptionError> {
        let prescription = self.prescriptions.get(prescription_id, auth_token).await?;
        if !prescription.is_owned_by(&user.id) {
            return Err(PrescriptionError::Forbidden(
                "Only the patient can check in on this prescription".to_string(),
            ));
        }
        if !prescription.can_refill_at(Utc::now()) {
            return Err(PrescriptionError::NoRefillsRemaining);
        }
        RefillRules::validate(&answers).map_err(PrescriptionError::Validation)?;

        let decision = RefillRules::evaluate(&answers);
        let status = decision.status();
        debug!(
            "Check-in for prescription {} evaluated as {} ({:?})",
            prescription.id, status, decision.reasons
        );

        let check_in: RefillCheckIn = self
            .supabase
            .insert(
                "refill_check_ins",
                json!({
                    "prescription_id": prescription.id,
                    "patient_id": prescription.patient_id,
                    "answers": answers,
                    "needs_provider_review": decision.needs_review(),
                    "flagged_reasons": decision.reasons,
                    "status": status,
                    "created_at": Utc::now().to_rfc3339(),
                }),
                Some(auth_token),
            )
            .await?;

        if status.consumes_refill() {
            if let Err(e) = self.prescriptions.consume_refill(&prescription, auth_token).await {
                if let Err(delete_err) = self
                    .supabase
                    .delete(
                        "refill_check_ins",
                        &PostgrestQuery::new().eq("id", check_in.id),
                        Some(auth_token),
                    )
                    .await
                {
                    error!("Failed to remove check-in {} after refill failed: {}", check_in.id, delete_err);
                }
                return Err(e);
            }
        }

        info!("Check-in {} recorded as {}", check_in.id, check_in.status);
        Ok(check_in)
    }

    pub async fn list(
        &self,
        user: &User,
        prescription_id: &str,
        auth_token: &str,
    ) -> Result<Vec<RefillCheckIn>, PrescriptionError> {
        let prescription = self
            .prescriptions
            .get_for(user, prescription_id, auth_token)
            .await?;

        let check_ins = self
            .supabase
            .select(
                "refill_check_ins",
                &PostgrestQuery::new()
                    .eq("prescription_id", prescription.id)
                    .order("created_at", false),
                Some(auth_token),
            )
            .await?;
        Ok(check_ins)
    }

    pub async fn review(
        &self,
        user: &User,
        check_in_id: &str,
        request: ReviewCheckInRequest,
        auth_token: &str,
    ) -> Result<RefillCheckIn, PrescriptionError> {
        let check_in: RefillCheckIn = self
            .supabase
            .select_one(
                "refill_check_ins",
                &PostgrestQuery::new().eq("id", check_in_id),
                Some(auth_token),
            )
            .await
            .map_err(|e| match e {
                DbError::NotFound(_) => PrescriptionError::CheckInNotFound,
                other => other.into(),
            })?;
        if check_in.status != CheckInStatus::PendingReview {
            return Err(PrescriptionError::AlreadyReviewed);
        }

        let prescription = self
            .prescriptions
            .get(&check_in.prescription_id.to_string(), auth_token)
            .await?;
        if !(prescription.is_prescribed_by(&user.id) || user.is_admin()) {
            return Err(PrescriptionError::Forbidden(
                "Only the prescriber or an admin can review this check-in".to_string(),
            ));
        }

        let outcome = if request.approve {
            CheckInStatus::Approved
        } else {
            CheckInStatus::Denied
        };

        let reviewed = self
            .transition(
                &check_in,
                CheckInStatus::PendingReview,
                json!({
                    "status": outcome,
                    "reviewed_by": user.id,
                    "review_notes": request.notes,
                    "reviewed_at": Utc::now().to_rfc3339(),
                }),
                auth_token,
            )
            .await?;

        if outcome.consumes_refill() {
            if let Err(e) = self.prescriptions.consume_refill(&prescription, auth_token).await {
                error!("Refill for check-in {} failed, reopening review: {}", check_in.id, e);
                if let Err(revert_err) = self
                    .transition(
                        &check_in,
                        outcome,
                        json!({
                            "status": CheckInStatus::PendingReview,
                            "reviewed_by": null,
                            "review_notes": null,
                            "reviewed_at": null,
                        }),
                        auth_token,
                    )
                    .await
                {
                    error!("Failed to reopen check-in {}: {}", check_in.id, revert_err);
                }
                return Err(e);
            }
        }

        info!("Check-in {} reviewed by {}: {}", reviewed.id, user.id, reviewed.status);
        Ok(reviewed)
    }

    /// Status-guarded PATCH; an empty result means another reviewer got there first.
    async fn transition(
        &self,
        check_in: &RefillCheckIn,
        expected: CheckInStatus,
        changes: Value,
        auth_token: &str,
    ) -> Result<RefillCheckIn, PrescriptionError> {
        let rows: Vec<RefillCheckIn> = self
            .supabase
            .update(
                "refill_check_ins",
                &PostgrestQuery::new()
                    .eq("id", check_in.id)
                    .eq("status", expected),
                changes,
                Some(auth_token),
            )
            .await?;
        rows.into_iter()
            .next()
            .ok_or(PrescriptionError::AlreadyReviewed)
    }
}
