use chrono::Utc;
use serde_json::json;
use tracing::{debug, info};

use shared_config::AppConfig;
use shared_database::{PostgrestQuery, SupabaseClient};
use shared_models::auth::User;

use crate::models::{Consultation, ConsultationError, ConsultationMessage};

pub const MAX_MESSAGE_LEN: usize = 4000;

pub struct MessagingService {
    supabase: SupabaseClient,
}

impl MessagingService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    /// Oldest first. Access to the consultation is checked by the caller.
    pub async fn list_messages(
        &self,
        consultation: &Consultation,
        auth_token: &str,
    ) -> Result<Vec<ConsultationMessage>, ConsultationError> {
        let messages = self
            .supabase
            .select(
                "consultation_messages",
                &PostgrestQuery::new()
                    .eq("consultation_id", consultation.id)
                    .order("created_at", true),
                Some(auth_token),
            )
            .await?;
        Ok(messages)
    }

    pub async fn send_message(
        &self,
        user: &User,
        consultation: &Consultation,
        body: &str,
        auth_token: &str,
    ) -> Result<ConsultationMessage, ConsultationError> {
        if !consultation.is_participant(&user.id) {
            return Err(ConsultationError::Forbidden(
                "Only the patient and assigned provider can post messages".to_string(),
            ));
        }
        if !consultation.status.accepts_messages() {
            return Err(ConsultationError::MessagingClosed(consultation.status));
        }
        let body = validate_body(body)?;

        debug!("User {} posting to consultation {}", user.id, consultation.id);
        let message: ConsultationMessage = self
            .supabase
            .insert(
                "consultation_messages",
                json!({
                    "consultation_id": consultation.id,
                    "sender_id": user.id,
                    "sender_role": user.role().to_string(),
                    "body": body,
                    "created_at": Utc::now().to_rfc3339(),
                }),
                Some(auth_token),
            )
            .await?;

        info!("Message {} posted to consultation {}", message.id, consultation.id);
        Ok(message)
    }

    /// Marks everything the other party sent as read; returns how many changed.
    pub async fn mark_read(
        &self,
        user: &User,
        consultation: &Consultation,
        auth_token: &str,
    ) -> Result<usize, ConsultationError> {
        let filter = PostgrestQuery::new()
            .eq("consultation_id", consultation.id)
            .neq("sender_id", &user.id)
            .is_null("read_at");

        let updated: Vec<ConsultationMessage> = self
            .supabase
            .update(
                "consultation_messages",
                &filter,
                json!({ "read_at": Utc::now().to_rfc3339() }),
                Some(auth_token),
            )
            .await?;

        debug!("Marked {} messages read in consultation {}", updated.len(), consultation.id);
        Ok(updated.len())
    }
}

pub fn validate_body(body: &str) -> Result<&str, ConsultationError> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err(ConsultationError::Validation("body: is required".to_string()));
    }
    if trimmed.chars().count() > MAX_MESSAGE_LEN {
        return Err(ConsultationError::Validation(format!(
            "body: must be at most {} characters",
            MAX_MESSAGE_LEN
        )));
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_bounds() {
        assert!(validate_body("   ").is_err());
        assert_eq!(validate_body("  hello ").unwrap(), "hello");
        assert!(validate_body(&"x".repeat(MAX_MESSAGE_LEN)).is_ok());
        assert!(validate_body(&"x".repeat(MAX_MESSAGE_LEN + 1)).is_err());
    }
}
