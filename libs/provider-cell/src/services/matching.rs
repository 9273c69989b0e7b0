use std::collections::HashMap;

use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::{PostgrestQuery, SupabaseClient};

use crate::models::{Provider, ProviderError, ProviderLoad};

/// Consultation statuses that count against a provider's workload.
const OPEN_STATUSES: [&str; 2] = ["assigned", "in_review"];

#[derive(Debug, Deserialize)]
struct AssignedRow {
    provider_id: Option<Uuid>,
}

pub struct ProviderMatchingService {
    supabase: SupabaseClient,
}

impl ProviderMatchingService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    /// Accepting providers licensed in `state`, with their open workload.
    pub async fn candidates(
        &self,
        state: &str,
        specialty: Option<&str>,
        auth_token: &str,
    ) -> Result<Vec<ProviderLoad>, ProviderError> {
        let state = state.to_uppercase();
        let mut filter = PostgrestQuery::new()
            .eq("accepting_consultations", true)
            .contains("licensed_states", &state);
        if let Some(specialty) = specialty {
            filter = filter.eq("specialty", specialty.to_lowercase());
        }

        let providers: Vec<Provider> = self
            .supabase
            .select("providers", &filter, Some(auth_token))
            .await?;
        if providers.is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<AssignedRow> = self
            .supabase
            .select(
                "consultations",
                &PostgrestQuery::new()
                    .select("provider_id")
                    .in_list("status", OPEN_STATUSES)
                    .in_list("provider_id", providers.iter().map(|p| p.id)),
                Some(auth_token),
            )
            .await?;

        let mut loads: HashMap<Uuid, usize> = HashMap::new();
        for provider_id in rows.into_iter().filter_map(|r| r.provider_id) {
            *loads.entry(provider_id).or_default() += 1;
        }

        Ok(providers
            .into_iter()
            .map(|provider| ProviderLoad {
                open_consultations: loads.get(&provider.id).copied().unwrap_or(0),
                provider,
            })
            .collect())
    }

    pub async fn best_provider_for(
        &self,
        state: &str,
        specialty: Option<&str>,
        auth_token: &str,
    ) -> Result<Provider, ProviderError> {
        debug!("Matching provider for state {} specialty {:?}", state, specialty);

        let candidates = self.candidates(state, specialty, auth_token).await?;
        let chosen = pick_least_loaded(candidates).ok_or_else(|| ProviderError::NoneAvailable {
            state: state.to_uppercase(),
        })?;

        info!(
            "Matched provider {} ({} open consultations)",
            chosen.provider.id, chosen.open_consultations
        );
        Ok(chosen.provider)
    }
}

/// Fewest open consultations wins; ties go to the lowest id so the choice is stable.
pub fn pick_least_loaded(candidates: Vec<ProviderLoad>) -> Option<ProviderLoad> {
    candidates
        .into_iter()
        .filter(|c| c.provider.accepting_consultations)
        .min_by(|a, b| {
            a.open_consultations
                .cmp(&b.open_consultations)
                .then_with(|| a.provider.id.cmp(&b.provider.id))
        })
}
