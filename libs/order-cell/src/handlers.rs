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
use shared_utils::guards::{require_admin, require_role};

use crate::models::{
    AdjustStockRequest, CheckoutReceipt, CheckoutRequest, CreateInventoryRequest, InventoryItem, Order,
    OrderDetail, OrderListQuery, OrderStatusUpdate, PriceBreakdown, QuoteRequest, UpdateInventoryRequest,
};
use crate::services::{InventoryService, OrderService};

// ==============================================================================
// INVENTORY
// ==============================================================================

pub async fn list_inventory(State(config): State<Arc<AppConfig>>) -> Result<Json<Value>, AppError> {
    let service = InventoryService::new(&config);

    let items = service.list_active().await?;

    Ok(Json(json!({
        "total": items.len(),
        "items": items,
    })))
}

pub async fn get_inventory_item(
    State(config): State<Arc<AppConfig>>,
    Path(item_id): Path<String>,
) -> Result<Json<InventoryItem>, AppError> {
    let service = InventoryService::new(&config);

    let item = service.get(&item_id, None).await?;

    Ok(Json(item))
}

#[axum::debug_handler]
pub async fn create_inventory_item(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateInventoryRequest>,
) -> Result<(StatusCode, Json<InventoryItem>), AppError> {
    require_admin(&user)?;
    let service = InventoryService::new(&config);

    let item = service.create(request, auth.token()).await?;

    Ok((StatusCode::CREATED, Json(item)))
}

#[axum::debug_handler]
pub async fn update_inventory_item(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(item_id): Path<String>,
    Json(request): Json<UpdateInventoryRequest>,
) -> Result<Json<InventoryItem>, AppError> {
    require_admin(&user)?;
    let service = InventoryService::new(&config);

    let item = service.update(&item_id, request, auth.token()).await?;

    Ok(Json(item))
}

#[axum::debug_handler]
pub async fn adjust_inventory(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(item_id): Path<String>,
    Json(request): Json<AdjustStockRequest>,
) -> Result<Json<InventoryItem>, AppError> {
    require_admin(&user)?;
    let service = InventoryService::new(&config);

    let item = service.adjust(&item_id, request.delta, auth.token()).await?;

    Ok(Json(item))
}

// ==============================================================================
// ORDERS
// ==============================================================================

#[axum::debug_handler]
pub async fn quote_order(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(request): Json<QuoteRequest>,
) -> Result<Json<PriceBreakdown>, AppError> {
    let service = OrderService::new(&config);

    let quote = service.quote(request, auth.token()).await?;

    Ok(Json(quote))
}

#[axum::debug_handler]
pub async fn checkout(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<CheckoutReceipt>), AppError> {
    require_role(&user, &[Role::Patient])?;
    let service = OrderService::new(&config);

    let receipt = service.checkout(&user, request, auth.token()).await?;

    Ok((StatusCode::CREATED, Json(receipt)))
}

#[axum::debug_handler]
pub async fn list_orders(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(query): Query<OrderListQuery>,
) -> Result<Json<Value>, AppError> {
    let service = OrderService::new(&config);

    let orders = service.list_for(&user, query, auth.token()).await?;

    Ok(Json(json!({
        "total": orders.len(),
        "orders": orders,
    })))
}

#[axum::debug_handler]
pub async fn get_order(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(order_id): Path<String>,
) -> Result<Json<OrderDetail>, AppError> {
    let service = OrderService::new(&config);

    let detail = service.detail_for(&user, &order_id, auth.token()).await?;

    Ok(Json(detail))
}

#[axum::debug_handler]
pub async fn update_order_status(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(order_id): Path<String>,
    Json(update): Json<OrderStatusUpdate>,
) -> Result<Json<Order>, AppError> {
    require_admin(&user)?;
    let service = OrderService::new(&config);

    let order = service.update_status(&order_id, update, auth.token()).await?;

    Ok(Json(order))
}

#[axum::debug_handler]
pub async fn cancel_order(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(order_id): Path<String>,
) -> Result<Json<Order>, AppError> {
    let service = OrderService::new(&config);

    let order = service.cancel(&user, &order_id, auth.token()).await?;

    Ok(Json(order))
}
