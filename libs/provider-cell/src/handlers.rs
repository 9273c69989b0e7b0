use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use serde::Deserialize;
use serde_json::{json, Value};

use shared_config::AppConfig;
use shared_models::auth::{Role, User};
use shared_models::error::AppError;
use shared_utils::guards::{ensure_self_or_admin, require_admin, require_role};

use crate::models::{
    AvailabilityUpdate, CreateProviderRequest, Provider, ProviderListQuery, UpdateProviderRequest,
};
use crate::services::{ProviderMatchingService, ProviderService};

#[derive(Debug, Deserialize)]
pub struct MatchQuery {
    pub state: String,
    pub specialty: Option<String>,
}

// ==============================================================================
// PUBLIC HANDLERS
// ==============================================================================

pub async fn list_providers(
    State(config): State<Arc<AppConfig>>,
    Query(query): Query<ProviderListQuery>,
) -> Result<Json<Value>, AppError> {
    let service = ProviderService::new(&config);

    let providers = service.list_providers(query).await?;

    Ok(Json(json!({
        "total": providers.len(),
        "providers": providers,
    })))
}

pub async fn get_provider(
    State(config): State<Arc<AppConfig>>,
    Path(provider_id): Path<String>,
) -> Result<Json<Provider>, AppError> {
    let service = ProviderService::new(&config);

    let provider = service.get_provider(&provider_id, None).await?;

    Ok(Json(provider))
}

// ==============================================================================
// PROTECTED HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn create_provider(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateProviderRequest>,
) -> Result<(StatusCode, Json<Provider>), AppError> {
    require_admin(&user)?;
    let service = ProviderService::new(&config);

    let provider = service.create_provider(request, auth.token()).await?;

    Ok((StatusCode::CREATED, Json(provider)))
}

#[axum::debug_handler]
pub async fn update_provider(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(provider_id): Path<String>,
    Json(request): Json<UpdateProviderRequest>,
) -> Result<Json<Provider>, AppError> {
    ensure_self_or_admin(&user, &provider_id)?;
    let service = ProviderService::new(&config);

    let provider = service
        .update_provider(&provider_id, request, auth.token())
        .await?;

    Ok(Json(provider))
}

#[axum::debug_handler]
pub async fn set_availability(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(provider_id): Path<String>,
    Json(update): Json<AvailabilityUpdate>,
) -> Result<Json<Provider>, AppError> {
    ensure_self_or_admin(&user, &provider_id)?;
    let service = ProviderService::new(&config);

    let provider = service
        .set_accepting(&provider_id, update.accepting_consultations, auth.token())
        .await?;

    Ok(Json(provider))
}

#[axum::debug_handler]
pub async fn match_candidates(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(query): Query<MatchQuery>,
) -> Result<Json<Value>, AppError> {
    require_role(&user, &[Role::Admin])?;
    let service = ProviderMatchingService::new(&config);

    let candidates = service
        .candidates(&query.state, query.specialty.as_deref(), auth.token())
        .await?;

    Ok(Json(json!({
        "state": query.state.to_uppercase(),
        "candidates": candidates,
    })))
}
