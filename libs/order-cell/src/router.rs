use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, patch, post, put},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn order_routes(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/", get(handlers::list_orders))
        .route("/quote", post(handlers::quote_order))
        .route("/checkout", post(handlers::checkout))
        .route("/{order_id}", get(handlers::get_order))
        .route("/{order_id}/status", patch(handlers::update_order_status))
        .route("/{order_id}/cancel", post(handlers::cancel_order))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state)
}

pub fn inventory_routes(state: Arc<AppConfig>) -> Router {
    let public_routes = Router::new()
        .route("/", get(handlers::list_inventory))
        .route("/{item_id}", get(handlers::get_inventory_item));

    let protected_routes = Router::new()
        .route("/", post(handlers::create_inventory_item))
        .route("/{item_id}", put(handlers::update_inventory_item))
        .route("/{item_id}/adjust", post(handlers::adjust_inventory))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}
