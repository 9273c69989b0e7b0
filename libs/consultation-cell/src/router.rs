use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn consultation_routes(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route(
            "/",
            post(handlers::submit_consultation).get(handlers::list_consultations),
        )
        .route("/{consultation_id}", get(handlers::get_consultation))
        .route("/{consultation_id}/assign", post(handlers::assign_consultation))
        .route("/{consultation_id}/status", patch(handlers::update_status))
        .route("/{consultation_id}/cancel", post(handlers::cancel_consultation))
        .route(
            "/{consultation_id}/messages",
            get(handlers::list_messages).post(handlers::send_message),
        )
        .route("/{consultation_id}/messages/read", post(handlers::mark_messages_read))
        .route("/{consultation_id}/assist", post(handlers::assist_reply))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state)
}
