use std::sync::Arc;

use axum::{
    extract::{Extension, State},
    http::StatusCode,
    Json,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;
use shared_utils::guards::require_admin;

use crate::models::{Admin, CreateAdminRequest, DashboardSummary};
use crate::services::{AdminService, DashboardService};

#[axum::debug_handler]
pub async fn list_admins(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Vec<Admin>>, AppError> {
    require_admin(&user)?;
    let service = AdminService::new(&config);

    let admins = service.list_admins(auth.token()).await?;

    Ok(Json(admins))
}

#[axum::debug_handler]
pub async fn create_admin(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateAdminRequest>,
) -> Result<(StatusCode, Json<Admin>), AppError> {
    require_admin(&user)?;
    let service = AdminService::new(&config);

    let admin = service.create_admin(request, auth.token()).await?;

    Ok((StatusCode::CREATED, Json(admin)))
}

#[axum::debug_handler]
pub async fn dashboard(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<DashboardSummary>, AppError> {
    require_admin(&user)?;
    let service = DashboardService::new(&config);

    let summary = service.summary(auth.token()).await?;

    Ok(Json(summary))
}
