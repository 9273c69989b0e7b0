use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn billing_routes(state: Arc<AppConfig>) -> Router {
    let public_routes = Router::new()
        .route("/protocols", get(handlers::list_protocols))
        .route("/protocols/{protocol_id}", get(handlers::get_protocol))
        .route("/webhook", post(handlers::stripe_webhook));

    let protected_routes = Router::new()
        .route("/protocols", post(handlers::create_protocol))
        .route("/protocols/{protocol_id}", put(handlers::update_protocol))
        .route(
            "/subscriptions",
            get(handlers::list_subscriptions).post(handlers::create_subscription),
        )
        .route("/subscriptions/{subscription_id}", get(handlers::get_subscription))
        .route("/subscriptions/{subscription_id}/pause", post(handlers::pause_subscription))
        .route("/subscriptions/{subscription_id}/resume", post(handlers::resume_subscription))
        .route("/subscriptions/{subscription_id}/cancel", post(handlers::cancel_subscription))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}
