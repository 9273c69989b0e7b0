use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use shared_models::auth::{Role, User};

use crate::models::{Consultation, ConsultationError, ConsultationStatus};

/// Pure rules for moving a consultation through its statuses.
pub struct ConsultationLifecycle;

impl ConsultationLifecycle {
    pub fn valid_transitions(current: ConsultationStatus) -> &'static [ConsultationStatus] {
        use ConsultationStatus::*;
        match current {
            Pending => &[Assigned, Cancelled],
            Assigned => &[InReview, Completed, Rejected, Cancelled, Pending],
            InReview => &[Completed, Rejected],
            Completed | Cancelled | Rejected => &[],
        }
    }

    pub fn validate_transition(
        from: ConsultationStatus,
        to: ConsultationStatus,
    ) -> Result<(), ConsultationError> {
        debug!("Validating consultation transition {} -> {}", from, to);

        if !Self::valid_transitions(from).contains(&to) {
            warn!("Invalid consultation transition attempted: {} -> {}", from, to);
            return Err(ConsultationError::InvalidStatusTransition { from, to });
        }
        Ok(())
    }

    /// Who may request `to` on this consultation. Patients can only withdraw their
    /// own request; providers act on consultations assigned to them.
    pub fn authorize_transition(
        user: &User,
        consultation: &Consultation,
        to: ConsultationStatus,
    ) -> Result<(), ConsultationError> {
        match user.role() {
            Role::Admin => Ok(()),
            Role::Provider if consultation.is_assigned_to(&user.id) => Ok(()),
            Role::Provider => Err(ConsultationError::Forbidden(
                "Consultation is not assigned to you".to_string(),
            )),
            Role::Patient if !consultation.is_owned_by(&user.id) => Err(
                ConsultationError::Forbidden("Not your consultation".to_string()),
            ),
            Role::Patient if to == ConsultationStatus::Cancelled => Ok(()),
            Role::Patient => Err(ConsultationError::Forbidden(
                "Patients can only cancel a consultation".to_string(),
            )),
        }
    }

    /// Column changes that accompany entering `to`, including timestamps.
    pub fn transition_changes(
        from: ConsultationStatus,
        to: ConsultationStatus,
        now: DateTime<Utc>,
    ) -> Map<String, Value> {
        let stamp = now.to_rfc3339();
        let mut changes = Map::new();
        changes.insert("status".to_string(), json!(to));
        changes.insert("updated_at".to_string(), json!(stamp));

        match to {
            ConsultationStatus::Assigned => {
                changes.insert("assigned_at".to_string(), json!(stamp));
            }
            ConsultationStatus::Completed | ConsultationStatus::Rejected => {
                changes.insert("completed_at".to_string(), json!(stamp));
            }
            ConsultationStatus::Pending if from == ConsultationStatus::Assigned => {
                changes.insert("provider_id".to_string(), Value::Null);
                changes.insert("assigned_at".to_string(), Value::Null);
            }
            _ => {}
        }

        changes
    }
}
