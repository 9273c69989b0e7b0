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
    CheckInAnswers, IssuePrescriptionRequest, Prescription, PrescriptionDetail, PrescriptionListQuery,
    PrescriptionStatusUpdate, RefillCheckIn, ReviewCheckInRequest,
};
use crate::services::{CheckInService, PrescriptionService};

// ==============================================================================
// PRESCRIPTIONS
// ==============================================================================

#[axum::debug_handler]
pub async fn issue_prescription(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<IssuePrescriptionRequest>,
) -> Result<(StatusCode, Json<Prescription>), AppError> {
    require_role(&user, &[Role::Provider])?;
    let service = PrescriptionService::new(&config);

    let prescription = service.issue(&user, request, auth.token()).await?;

    Ok((StatusCode::CREATED, Json(prescription)))
}

#[axum::debug_handler]
pub async fn list_prescriptions(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(query): Query<PrescriptionListQuery>,
) -> Result<Json<Value>, AppError> {
    let service = PrescriptionService::new(&config);

    let prescriptions = service.list_for(&user, query, auth.token()).await?;

    Ok(Json(json!({
        "total": prescriptions.len(),
        "prescriptions": prescriptions,
    })))
}

#[axum::debug_handler]
pub async fn get_prescription(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(prescription_id): Path<String>,
) -> Result<Json<PrescriptionDetail>, AppError> {
    let service = PrescriptionService::new(&config);

    let detail = service.detail(&user, &prescription_id, auth.token()).await?;

    Ok(Json(detail))
}

#[axum::debug_handler]
pub async fn update_prescription_status(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(prescription_id): Path<String>,
    Json(update): Json<PrescriptionStatusUpdate>,
) -> Result<Json<Prescription>, AppError> {
    require_role(&user, &[Role::Provider, Role::Admin])?;
    let service = PrescriptionService::new(&config);

    let prescription = service
        .update_status(&user, &prescription_id, update.status, auth.token())
        .await?;

    Ok(Json(prescription))
}

// ==============================================================================
// REFILL CHECK-INS
// ==============================================================================

#[axum::debug_handler]
pub async fn submit_check_in(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(prescription_id): Path<String>,
    Json(answers): Json<CheckInAnswers>,
) -> Result<(StatusCode, Json<RefillCheckIn>), AppError> {
    require_role(&user, &[Role::Patient])?;
    let service = CheckInService::new(&config);

    let check_in = service
        .submit(&user, &prescription_id, answers, auth.token())
        .await?;

    Ok((StatusCode::CREATED, Json(check_in)))
}

#[axum::debug_handler]
pub async fn list_check_ins(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(prescription_id): Path<String>,
) -> Result<Json<Vec<RefillCheckIn>>, AppError> {
    let service = CheckInService::new(&config);

    let check_ins = service.list(&user, &prescription_id, auth.token()).await?;

    Ok(Json(check_ins))
}

#[axum::debug_handler]
pub async fn review_check_in(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(check_in_id): Path<String>,
    Json(request): Json<ReviewCheckInRequest>,
) -> Result<Json<RefillCheckIn>, AppError> {
    require_role(&user, &[Role::Provider, Role::Admin])?;
    let service = CheckInService::new(&config);

    let check_in = service
        .review(&user, &check_in_id, request, auth.token())
        .await?;

    Ok(Json(check_in))
}
