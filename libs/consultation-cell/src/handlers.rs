use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};

use shared_config::AppConfig;
use shared_models::auth::{Role, User};
use shared_models::error::AppError;
use shared_utils::guards::require_role;

use crate::models::{
    AssignConsultationRequest, AssistDraft, Consultation, ConsultationError, ConsultationListQuery,
    ConsultationMessage, CreateConsultationRequest, SendMessageRequest, UpdateStatusRequest,
};
use crate::services::{AssistService, ConsultationService, MessagingService};

// ==============================================================================
// CONSULTATIONS
// ==============================================================================

#[axum::debug_handler]
pub async fn submit_consultation(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateConsultationRequest>,
) -> Result<(StatusCode, Json<Consultation>), AppError> {
    require_role(&user, &[Role::Patient])?;
    let service = ConsultationService::new(&config);

    let consultation = service.submit(&user.id, request, auth.token()).await?;

    Ok((StatusCode::CREATED, Json(consultation)))
}

#[axum::debug_handler]
pub async fn list_consultations(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(query): Query<ConsultationListQuery>,
) -> Result<Json<Value>, AppError> {
    let service = ConsultationService::new(&config);

    let consultations = service.list_for(&user, query, auth.token()).await?;

    Ok(Json(json!({
        "total": consultations.len(),
        "consultations": consultations,
    })))
}

#[axum::debug_handler]
pub async fn get_consultation(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(consultation_id): Path<String>,
) -> Result<Json<Consultation>, AppError> {
    let service = ConsultationService::new(&config);

    let consultation = service.get_for(&user, &consultation_id, auth.token()).await?;

    Ok(Json(consultation))
}

#[axum::debug_handler]
pub async fn assign_consultation(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(consultation_id): Path<String>,
    Json(request): Json<AssignConsultationRequest>,
) -> Result<Json<Consultation>, AppError> {
    require_role(&user, &[Role::Provider, Role::Admin])?;
    let service = ConsultationService::new(&config);

    let consultation = service
        .assign(&user, &consultation_id, request.provider_id, auth.token())
        .await?;

    Ok(Json(consultation))
}

#[axum::debug_handler]
pub async fn update_status(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(consultation_id): Path<String>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<Consultation>, AppError> {
    let service = ConsultationService::new(&config);

    let consultation = service
        .update_status(&user, &consultation_id, request, auth.token())
        .await?;

    Ok(Json(consultation))
}

#[axum::debug_handler]
pub async fn cancel_consultation(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(consultation_id): Path<String>,
) -> Result<Json<Consultation>, AppError> {
    require_role(&user, &[Role::Patient])?;
    let service = ConsultationService::new(&config);

    let consultation = service.cancel(&user, &consultation_id, auth.token()).await?;

    Ok(Json(consultation))
}

// ==============================================================================
// MESSAGES
// ==============================================================================

#[axum::debug_handler]
pub async fn list_messages(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(consultation_id): Path<String>,
) -> Result<Json<Vec<ConsultationMessage>>, AppError> {
    let consultations = ConsultationService::new(&config);
    let messaging = MessagingService::new(&config);

    let consultation = consultations.get(&consultation_id, auth.token()).await?;
    if !(consultation.is_participant(&user.id) || user.is_admin()) {
        return Err(ConsultationError::Forbidden(
            "Not authorized to read these messages".to_string(),
        )
        .into());
    }

    let messages = messaging.list_messages(&consultation, auth.token()).await?;

    Ok(Json(messages))
}

#[axum::debug_handler]
pub async fn send_message(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(consultation_id): Path<String>,
    Json(request): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<ConsultationMessage>), AppError> {
    let consultations = ConsultationService::new(&config);
    let messaging = MessagingService::new(&config);

    let consultation = consultations.get(&consultation_id, auth.token()).await?;
    let message = messaging
        .send_message(&user, &consultation, &request.body, auth.token())
        .await?;

    Ok((StatusCode::CREATED, Json(message)))
}

#[axum::debug_handler]
pub async fn mark_messages_read(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(consultation_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let consultations = ConsultationService::new(&config);
    let messaging = MessagingService::new(&config);

    let consultation = consultations.get(&consultation_id, auth.token()).await?;
    if !consultation.is_participant(&user.id) {
        return Err(ConsultationError::Forbidden("Not a participant".to_string()).into());
    }

    let marked = messaging.mark_read(&user, &consultation, auth.token()).await?;

    Ok(Json(json!({ "marked_read": marked })))
}

// ==============================================================================
// AI ASSIST
// ==============================================================================

#[axum::debug_handler]
pub async fn assist_reply(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(consultation_id): Path<String>,
) -> Result<Json<AssistDraft>, AppError> {
    require_role(&user, &[Role::Provider, Role::Admin])?;
    let consultations = ConsultationService::new(&config);
    let assist = AssistService::new(&config);

    let consultation = consultations.get(&consultation_id, auth.token()).await?;
    if !(consultation.is_assigned_to(&user.id) || user.is_admin()) {
        return Err(ConsultationError::Forbidden(
            "Only the assigned provider can request a draft".to_string(),
        )
        .into());
    }

    let draft = assist.draft_reply(&consultation, auth.token()).await?;

    Ok(Json(draft))
}
