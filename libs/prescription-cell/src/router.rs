use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn prescription_routes(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route(
            "/",
            post(handlers::issue_prescription).get(handlers::list_prescriptions),
        )
        .route("/check-ins/{check_in_id}/review", post(handlers::review_check_in))
        .route("/{prescription_id}", get(handlers::get_prescription))
        .route("/{prescription_id}/status", patch(handlers::update_prescription_status))
        .route(
            "/{prescription_id}/check-ins",
            get(handlers::list_check_ins).post(handlers::submit_check_in),
        )
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state)
}
