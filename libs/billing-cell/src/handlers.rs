use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Extension, Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};
use tracing::warn;

use shared_config::AppConfig;
use shared_models::auth::{Role, User};
use shared_models::error::AppError;
use shared_utils::guards::{require_admin, require_role};

use crate::models::{
    CreateProtocolRequest, CreateSubscriptionRequest, ProtocolListQuery, Subscription,
    SubscriptionAction, TreatmentProtocol, UpdateProtocolRequest,
};
use crate::services::webhook::WebhookOutcome;
use crate::services::{ProtocolService, SubscriptionService, WebhookService};

// ==============================================================================
// PROTOCOLS
// ==============================================================================

pub async fn list_protocols(
    State(config): State<Arc<AppConfig>>,
    Query(query): Query<ProtocolListQuery>,
) -> Result<Json<Value>, AppError> {
    let service = ProtocolService::new(&config);

    let protocols = service.list_protocols(query).await?;

    Ok(Json(json!({
        "total": protocols.len(),
        "protocols": protocols,
    })))
}

pub async fn get_protocol(
    State(config): State<Arc<AppConfig>>,
    Path(protocol_id): Path<String>,
) -> Result<Json<TreatmentProtocol>, AppError> {
    let service = ProtocolService::new(&config);

    let protocol = service.get_protocol(&protocol_id, None).await?;

    Ok(Json(protocol))
}

#[axum::debug_handler]
pub async fn create_protocol(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateProtocolRequest>,
) -> Result<(StatusCode, Json<TreatmentProtocol>), AppError> {
    require_admin(&user)?;
    let service = ProtocolService::new(&config);

    let protocol = service.create_protocol(request, auth.token()).await?;

    Ok((StatusCode::CREATED, Json(protocol)))
}

#[axum::debug_handler]
pub async fn update_protocol(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(protocol_id): Path<String>,
    Json(request): Json<UpdateProtocolRequest>,
) -> Result<Json<TreatmentProtocol>, AppError> {
    require_admin(&user)?;
    let service = ProtocolService::new(&config);

    let protocol = service
        .update_protocol(&protocol_id, request, auth.token())
        .await?;

    Ok(Json(protocol))
}

// ==============================================================================
// SUBSCRIPTIONS
// ==============================================================================

#[axum::debug_handler]
pub async fn create_subscription(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateSubscriptionRequest>,
) -> Result<(StatusCode, Json<Subscription>), AppError> {
    require_role(&user, &[Role::Patient])?;
    let service = SubscriptionService::new(&config);

    let subscription = service
        .subscribe(&user, &request.protocol_id.to_string(), auth.token())
        .await?;

    Ok((StatusCode::CREATED, Json(subscription)))
}

#[axum::debug_handler]
pub async fn list_subscriptions(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Vec<Subscription>>, AppError> {
    let service = SubscriptionService::new(&config);

    let subscriptions = service.list_for(&user, auth.token()).await?;

    Ok(Json(subscriptions))
}

#[axum::debug_handler]
pub async fn get_subscription(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(subscription_id): Path<String>,
) -> Result<Json<Subscription>, AppError> {
    let service = SubscriptionService::new(&config);

    let subscription = service.get_for(&user, &subscription_id, auth.token()).await?;

    Ok(Json(subscription))
}

async fn run_action(
    config: &AppConfig,
    user: &User,
    subscription_id: &str,
    action: SubscriptionAction,
    token: &str,
) -> Result<Json<Subscription>, AppError> {
    let service = SubscriptionService::new(config);
    let subscription = service
        .apply_action(user, subscription_id, action, token)
        .await?;
    Ok(Json(subscription))
}

#[axum::debug_handler]
pub async fn pause_subscription(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(subscription_id): Path<String>,
) -> Result<Json<Subscription>, AppError> {
    run_action(&config, &user, &subscription_id, SubscriptionAction::Pause, auth.token()).await
}

#[axum::debug_handler]
pub async fn resume_subscription(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(subscription_id): Path<String>,
) -> Result<Json<Subscription>, AppError> {
    run_action(&config, &user, &subscription_id, SubscriptionAction::Resume, auth.token()).await
}

#[axum::debug_handler]
pub async fn cancel_subscription(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(subscription_id): Path<String>,
) -> Result<Json<Subscription>, AppError> {
    run_action(&config, &user, &subscription_id, SubscriptionAction::Cancel, auth.token()).await
}

// ==============================================================================
// WEBHOOK
// ==============================================================================

pub async fn stripe_webhook(
    State(config): State<Arc<AppConfig>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let signature = headers
        .get("Stripe-Signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::BadRequest("Missing Stripe-Signature header".to_string()))?;

    let service = WebhookService::new(&config);
    let (event, outcome) = service.receive(&body, signature).await.map_err(|e| {
        warn!("Rejected Stripe webhook: {}", e);
        AppError::from(e)
    })?;

    Ok(Json(json!({
        "received": true,
        "event": event.event_type,
        "handled": outcome != WebhookOutcome::Ignored,
    })))
}
