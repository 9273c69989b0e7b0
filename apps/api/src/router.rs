use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};

use admin_cell::router::admin_routes;
use auth_cell::router::auth_routes;
use billing_cell::router::billing_routes;
use consultation_cell::router::consultation_routes;
use order_cell::router::{inventory_routes, order_routes};
use patient_cell::router::patient_routes;
use prescription_cell::router::prescription_routes;
use provider_cell::router::provider_routes;
use shared_config::AppConfig;

pub fn create_router(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/", get(|| async { "Telehealth API is running!" }))
        .route("/health", get(health).with_state(state.clone()))
        .nest("/auth", auth_routes(state.clone()))
        .nest("/patients", patient_routes(state.clone()))
        .nest("/providers", provider_routes(state.clone()))
        .nest("/admin", admin_routes(state.clone()))
        .nest("/consultations", consultation_routes(state.clone()))
        .nest("/prescriptions", prescription_routes(state.clone()))
        .nest("/orders", order_routes(state.clone()))
        .nest("/inventory", inventory_routes(state.clone()))
        .nest("/billing", billing_routes(state))
}

async fn health(State(config): State<Arc<AppConfig>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "database_configured": config.is_configured(),
        "payments_configured": config.is_payments_configured(),
        "ai_configured": config.is_ai_configured(),
    }))
}
