use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::{header, Client};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use shared_config::AppConfig;
use shared_database::{PostgrestQuery, SupabaseClient};

use crate::models::{AssistDraft, AssistSource, Consultation, ConsultationError};

const SYSTEM_PROMPT: &str = "You are assisting a licensed telehealth provider. Draft a concise, \
friendly reply to the patient about their consultation. Do not make a final diagnosis or \
prescribe; the provider will review and edit the draft before sending.";

/// Anything that can turn a system + user prompt into text.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String>;
}

pub struct OpenAiCompletionClient {
    http_client: Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl OpenAiCompletionClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            http_client: Client::new(),
            api_base: config.openai_api_base.trim_end_matches('/').to_string(),
            api_key: config.openai_api_key.clone(),
            model: config.openai_model.clone(),
        }
    }
}

#[async_trait]
impl CompletionClient for OpenAiCompletionClient {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        let request = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": prompt }
            ],
            "temperature": 0.4
        });

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.api_base))
            .header(header::AUTHORIZATION, format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(anyhow!("OpenAI API error ({}): {}", status, error_text));
        }

        let body: Value = response.json().await?;
        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| anyhow!("Invalid OpenAI response format"))?;
        Ok(content.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct PatientName {
    first_name: String,
}

pub struct AssistService {
    supabase: SupabaseClient,
    client: Option<Arc<dyn CompletionClient>>,
}

impl AssistService {
    /// Uses OpenAI when a key is configured, templates otherwise.
    pub fn new(config: &AppConfig) -> Self {
        let client: Option<Arc<dyn CompletionClient>> = if config.is_ai_configured() {
            Some(Arc::new(OpenAiCompletionClient::new(config)))
        } else {
            None
        };

        Self {
            supabase: SupabaseClient::new(config),
            client,
        }
    }

    pub fn with_client(config: &AppConfig, client: Arc<dyn CompletionClient>) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
            client: Some(client),
        }
    }

    pub async fn draft_reply(
        &self,
        consultation: &Consultation,
        auth_token: &str,
    ) -> Result<AssistDraft, ConsultationError> {
        let first_name = self.patient_first_name(consultation, auth_token).await;
        Ok(self.draft_for(consultation, &first_name).await)
    }

    /// Never fails: any problem with the model degrades to the condition template.
    pub async fn draft_for(&self, consultation: &Consultation, patient_first_name: &str) -> AssistDraft {
        if let Some(client) = &self.client {
            let prompt = build_prompt(consultation, patient_first_name);
            match client.complete(SYSTEM_PROMPT, &prompt).await {
                Ok(text) if !text.trim().is_empty() => {
                    debug!("AI draft produced for consultation {}", consultation.id);
                    return AssistDraft {
                        consultation_id: consultation.id,
                        draft: text.trim().to_string(),
                        source: AssistSource::Ai,
                    };
                }
                Ok(_) => warn!("Completion for consultation {} was empty", consultation.id),
                Err(e) => warn!("Completion for consultation {} failed: {}", consultation.id, e),
            }
        }

        AssistDraft {
            consultation_id: consultation.id,
            draft: render_template(consultation, patient_first_name),
            source: AssistSource::Template,
        }
    }

    async fn patient_first_name(&self, consultation: &Consultation, auth_token: &str) -> String {
        let result: Result<PatientName, _> = self
            .supabase
            .select_one(
                "patients",
                &PostgrestQuery::new()
                    .select("first_name")
                    .eq("id", consultation.patient_id),
                Some(auth_token),
            )
            .await;

        match result {
            Ok(row) => greeting_name(&row.first_name),
            Err(e) => {
                debug!("Could not load patient name for assist: {}", e);
                greeting_name("")
            }
        }
    }
}

/// Blank names still get a friendly salutation.
fn greeting_name(first_name: &str) -> String {
    match first_name.trim() {
        "" => "there".to_string(),
        name => name.to_string(),
    }
}

pub fn build_prompt(consultation: &Consultation, patient_first_name: &str) -> String {
    format!(
        "Patient first name: {}\nCondition: {}\nReported symptoms: {}\nIntake answers: {}\n\n\
         Write the provider's reply.",
        patient_first_name,
        condition_label(&consultation.condition),
        consultation.symptoms,
        consultation.intake_answers
    )
}

fn condition_label(condition: &str) -> &str {
    match condition_key(condition) {
        ConditionTemplate::ErectileDysfunction => "erectile dysfunction",
        ConditionTemplate::HairLoss => "hair loss",
        ConditionTemplate::WeightManagement => "weight management",
        ConditionTemplate::General => condition,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConditionTemplate {
    ErectileDysfunction,
    HairLoss,
    WeightManagement,
    General,
}

fn condition_key(condition: &str) -> ConditionTemplate {
    let normalized = condition.trim().to_lowercase().replace([' ', '-'], "_");
    match normalized.as_str() {
        "ed" | "erectile_dysfunction" => ConditionTemplate::ErectileDysfunction,
        "hair_loss" | "alopecia" => ConditionTemplate::HairLoss,
        "weight_management" | "weight_loss" | "obesity" => ConditionTemplate::WeightManagement,
        _ => ConditionTemplate::General,
    }
}

fn template_text(template: ConditionTemplate) -> &'static str {
    match template {
        ConditionTemplate::ErectileDysfunction => {
            "Hi {patient_first_name}, thanks for sharing the details of your {condition} consultation. \
             Based on what you described ({symptoms}), there are effective, well-tolerated treatment \
             options. Before I finalize a plan, please confirm you are not taking any nitrates and \
             let me know about any heart conditions."
        }
        ConditionTemplate::HairLoss => {
            "Hi {patient_first_name}, thank you for your {condition} consultation. From what you \
             described ({symptoms}), early treatment tends to give the best results. Most options \
             take three to six months to show visible change, so consistency matters. I'll review \
             your history and follow up with a recommended plan."
        }
        ConditionTemplate::WeightManagement => {
            "Hi {patient_first_name}, thanks for reaching out about {condition}. I've read through \
             your symptoms and goals ({symptoms}). A sustainable plan combines medication where \
             appropriate with nutrition and activity changes. I may ask a few follow-up questions \
             about your medical history before recommending a program."
        }
        ConditionTemplate::General => {
            "Hi {patient_first_name}, thank you for your consultation about {condition}. I've \
             reviewed what you shared ({symptoms}) and will follow up shortly with next steps. \
             If your symptoms get worse, please seek in-person care."
        }
    }
}

pub fn render_template(consultation: &Consultation, patient_first_name: &str) -> String {
    template_text(condition_key(&consultation.condition))
        .replace("{patient_first_name}", patient_first_name)
        .replace("{condition}", condition_label(&consultation.condition))
        .replace("{symptoms}", consultation.symptoms.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConsultationStatus;
    use chrono::Utc;
    use uuid::Uuid;

    struct FailingClient;

    #[async_trait]
    impl CompletionClient for FailingClient {
        async fn complete(&self, _system: &str, _prompt: &str) -> Result<String> {
            Err(anyhow!("upstream timeout"))
        }
    }

    struct CannedClient(&'static str);

    #[async_trait]
    impl CompletionClient for CannedClient {
        async fn complete(&self, _system: &str, prompt: &str) -> Result<String> {
            assert!(prompt.contains("Patient first name: Sam"));
            Ok(self.0.to_string())
        }
    }

    fn consultation(condition: &str) -> Consultation {
        Consultation {
            id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            provider_id: None,
            condition: condition.to_string(),
            symptoms: "thinning at the crown".to_string(),
            intake_answers: json!({ "duration_months": 6 }),
            patient_state: "CA".to_string(),
            status: ConsultationStatus::InReview,
            provider_notes: None,
            diagnosis: None,
            recommended_protocol_id: None,
            assigned_at: None,
            completed_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn templates_fill_every_placeholder() {
        for condition in ["ed", "hair_loss", "weight loss", "acne"] {
            let text = render_template(&consultation(condition), "Sam");
            assert!(text.starts_with("Hi Sam"));
            assert!(!text.contains('{'), "unfilled placeholder in {}", condition);
            assert!(text.contains("thinning at the crown"));
        }
    }

    #[test]
    fn blank_first_name_falls_back_to_there() {
        assert_eq!(greeting_name(""), "there");
        assert_eq!(greeting_name("   "), "there");
        assert_eq!(greeting_name(" Sam "), "Sam");
        assert!(render_template(&consultation("acne"), &greeting_name("")).starts_with("Hi there"));
    }

    #[test]
    fn condition_aliases_pick_the_same_template() {
        assert_eq!(condition_key("Erectile Dysfunction"), ConditionTemplate::ErectileDysfunction);
        assert_eq!(condition_key("weight-management"), ConditionTemplate::WeightManagement);
        assert_eq!(condition_key("something else"), ConditionTemplate::General);
    }

    #[tokio::test]
    async fn falls_back_to_template_when_completion_fails() {
        let service = AssistService::with_client(&AppConfig::default(), Arc::new(FailingClient));
        let draft = service.draft_for(&consultation("hair_loss"), "Sam").await;

        assert_eq!(draft.source, AssistSource::Template);
        assert!(draft.draft.contains("hair loss"));
    }

    #[tokio::test]
    async fn empty_completion_also_falls_back() {
        let service = AssistService::with_client(&AppConfig::default(), Arc::new(CannedClient("   ")));
        let draft = service.draft_for(&consultation("ed"), "Sam").await;
        assert_eq!(draft.source, AssistSource::Template);
    }

    #[tokio::test]
    async fn uses_model_output_when_available() {
        let service = AssistService::with_client(
            &AppConfig::default(),
            Arc::new(CannedClient("Hi Sam, here is a plan.")),
        );
        let draft = service.draft_for(&consultation("hair_loss"), "Sam").await;

        assert_eq!(draft.source, AssistSource::Ai);
        assert_eq!(draft.draft, "Hi Sam, here is a plan.");
    }

    #[test]
    fn unconfigured_service_has_no_client() {
        let service = AssistService::new(&AppConfig::default());
        assert!(service.client.is_none());
    }
}
