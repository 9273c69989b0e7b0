use std::sync::Arc;

use axum::{
    extract::{Extension, Json, State},
    http::{HeaderMap, StatusCode},
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};
use tracing::debug;

use shared_config::AppConfig;
use shared_database::{PostgrestQuery, SupabaseClient};
use shared_models::auth::{TokenResponse, User};
use shared_models::error::AppError;
use shared_utils::extractor::extract_bearer_token;
use shared_utils::jwt;

use crate::models::{LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};
use crate::services::AccountService;

pub async fn register(
    State(config): State<Arc<AppConfig>>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), AppError> {
    let service = AccountService::new(&config);
    let account = service.register(request).await?;

    Ok((StatusCode::CREATED, Json(account)))
}

pub async fn login(
    State(config): State<Arc<AppConfig>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let service = AccountService::new(&config);
    let session = service.login(request).await?;

    Ok(Json(session))
}

pub async fn validate_token(
    State(config): State<Arc<AppConfig>>,
    headers: HeaderMap,
) -> Result<Json<TokenResponse>, AppError> {
    debug!("Validating token");

    let token = extract_bearer_token(&headers)?;
    let user = jwt::validate_token(&token, &config.supabase_jwt_secret).map_err(AppError::Auth)?;

    let role = Some(user.role().to_string());
    Ok(Json(TokenResponse {
        valid: true,
        user_id: user.id,
        email: user.email,
        role,
    }))
}

pub async fn verify_token(
    State(config): State<Arc<AppConfig>>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    debug!("Verifying token");

    // A missing or malformed header is just another invalid token here.
    let valid = match extract_bearer_token(&headers) {
        Ok(token) => jwt::validate_token(&token, &config.supabase_jwt_secret).is_ok(),
        Err(_) => false,
    };

    Ok(Json(json!({ "valid": valid })))
}

pub async fn get_profile(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    debug!("Getting profile for user: {}", user.id);

    let client = SupabaseClient::new(&config);

    let auth_profile = client.get_user_profile(auth.token()).await?;

    let patients: Vec<Value> = client
        .select(
            "patients",
            &PostgrestQuery::new().eq("id", &user.id),
            Some(auth.token()),
        )
        .await?;

    Ok(Json(json!({
        "user_id": user.id,
        "role": user.role(),
        "auth_profile": auth_profile,
        "patient": patients.into_iter().next(),
    })))
}
