use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use order_cell::router::{inventory_routes, order_routes};
use shared_utils::test_utils::{JwtTestUtils, MockSupabaseResponses, TestConfig, TestUser};

fn create_order_app(server: &MockServer) -> Router {
    order_routes(Arc::new(
        TestConfig::with_mock_server(&server.uri()).to_app_config(),
    ))
}

fn create_inventory_app(server: &MockServer) -> Router {
    inventory_routes(Arc::new(
        TestConfig::with_mock_server(&server.uri()).to_app_config(),
    ))
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn authed(method: &str, uri: &str, user: &TestUser, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("Authorization", format!("Bearer {}", JwtTestUtils::token_for(user)));
    match body {
        Some(json) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

fn order_row(id: &str, patient_id: &str, status: &str, payment_intent_id: Option<&str>) -> Value {
    json!({
        "id": id,
        "patient_id": patient_id,
        "prescription_id": null,
        "status": status,
        "subtotal_cents": 5000,
        "discount_cents": 0,
        "shipping_cents": 599,
        "tax_cents": 0,
        "total_cents": 5599,
        "promo_code": null,
        "shipping_method": "standard",
        "shipping_address": { "line1": "1 Main St", "city": "Sacramento", "state": "CA" },
        "payment_intent_id": payment_intent_id,
        "tracking_number": null,
        "created_at": "2024-01-01T00:00:00Z",
        "updated_at": "2024-01-01T00:00:00Z"
    })
}

fn order_item_row(order_id: &str, inventory_id: &str, quantity: i32) -> Value {
    json!({
        "id": Uuid::new_v4(),
        "order_id": order_id,
        "inventory_id": inventory_id,
        "quantity": quantity,
        "unit_price_cents": 2500,
        "line_total_cents": 2500 * quantity
    })
}

fn checkout_body(item_id: &str, quantity: i32, prescription_id: Option<&str>) -> Value {
    json!({
        "items": [{ "inventory_id": item_id, "quantity": quantity }],
        "shipping_method": "standard",
        "shipping_address": { "line1": "1 Main St", "city": "Sacramento", "state": "CA" },
        "prescription_id": prescription_id,
        "payment_method_id": "pm_card_visa"
    })
}

async fn mount_inventory(server: &MockServer, item: Value) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/inventory"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([item])))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_inventory_list_is_public() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/inventory"))
        .and(query_param("active", "eq.true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::inventory_response(&Uuid::new_v4().to_string(), 2500, 40, false),
            MockSupabaseResponses::inventory_response(&Uuid::new_v4().to_string(), 4000, 3, true)
        ])))
        .mount(&mock_server)
        .await;

    let app = create_inventory_app(&mock_server);
    let request = Request::builder()
        .method("GET")
        .uri("/")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json_response = body_json(response).await;
    assert_eq!(json_response["total"], 2);
}

#[tokio::test]
async fn test_adjust_cannot_go_negative() {
    let mock_server = MockServer::start().await;
    let admin = TestUser::admin("admin@example.com");
    let item_id = Uuid::new_v4().to_string();

    mount_inventory(&mock_server, MockSupabaseResponses::inventory_response(&item_id, 2500, 3, false)).await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/inventory"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&mock_server)
        .await;

    let app = create_inventory_app(&mock_server);
    let request = authed(
        "POST",
        &format!("/{}/adjust", item_id),
        &admin,
        Some(json!({ "delta": -5 })),
    );

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_patient_cannot_create_inventory() {
    let mock_server = MockServer::start().await;
    let patient = TestUser::patient("patient@example.com");

    let app = create_inventory_app(&mock_server);
    let request = authed(
        "POST",
        "/",
        &patient,
        Some(json!({
            "sku": "MINOX-5",
            "name": "Minoxidil 5%",
            "unit_price_cents": 1500,
            "quantity_on_hand": 100,
            "requires_prescription": false
        })),
    );

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_quote_applies_promo_and_shipping() {
    let mock_server = MockServer::start().await;
    let patient = TestUser::patient("patient@example.com");
    let item_id = Uuid::new_v4().to_string();

    mount_inventory(&mock_server, MockSupabaseResponses::inventory_response(&item_id, 8000, 20, false)).await;

    let app = create_order_app(&mock_server);
    let request = authed(
        "POST",
        "/quote",
        &patient,
        Some(json!({
            "items": [{ "inventory_id": item_id, "quantity": 1 }],
            "promo_code": "welcome10"
        })),
    );

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let quote = body_json(response).await;
    assert_eq!(quote["subtotal_cents"], 8000);
    assert_eq!(quote["discount_cents"], 800);
    assert_eq!(quote["shipping_cents"], 599);
    assert_eq!(quote["tax_cents"], 0);
    assert_eq!(quote["total_cents"], 7799);
    assert_eq!(quote["promo_code"], "WELCOME10");
}

#[tokio::test]
async fn test_quote_rejects_unknown_promo() {
    let mock_server = MockServer::start().await;
    let patient = TestUser::patient("patient@example.com");
    let item_id = Uuid::new_v4().to_string();

    mount_inventory(&mock_server, MockSupabaseResponses::inventory_response(&item_id, 2500, 20, false)).await;

    let app = create_order_app(&mock_server);
    let request = authed(
        "POST",
        "/quote",
        &patient,
        Some(json!({
            "items": [{ "inventory_id": item_id, "quantity": 1 }],
            "promo_code": "BOGUS"
        })),
    );

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_checkout_charges_and_records_paid_order() {
    let mock_server = MockServer::start().await;
    let patient = TestUser::patient("patient@example.com");
    let item_id = Uuid::new_v4().to_string();
    let order_id = Uuid::new_v4().to_string();

    mount_inventory(&mock_server, MockSupabaseResponses::inventory_response(&item_id, 2500, 20, false)).await;

    Mock::given(method("POST"))
        .and(path("/v1/payment_intents"))
        .and(body_string_contains("amount=5599"))
        .and(body_string_contains("confirm=true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "pi_123",
            "object": "payment_intent",
            "status": "succeeded",
            "amount": 5599,
            "client_secret": "pi_123_secret_abc"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/orders"))
        .and(body_string_contains("pi_123"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            order_row(&order_id, &patient.id, "paid", Some("pi_123"))
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/order_items"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            order_item_row(&order_id, &item_id, 2)
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/inventory"))
        .and(query_param("quantity_on_hand", "eq.20"))
        .and(body_string_contains("\"quantity_on_hand\":18"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::inventory_response(&item_id, 2500, 18, false)
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let app = create_order_app(&mock_server);
    let request = authed("POST", "/checkout", &patient, Some(checkout_body(&item_id, 2, None)));

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let receipt = body_json(response).await;
    assert_eq!(receipt["status"], "paid");
    assert_eq!(receipt["total_cents"], 5599);
    assert_eq!(receipt["client_secret"], "pi_123_secret_abc");
    assert_eq!(receipt["items"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_checkout_card_decline_is_payment_required() {
    let mock_server = MockServer::start().await;
    let patient = TestUser::patient("patient@example.com");
    let item_id = Uuid::new_v4().to_string();

    mount_inventory(&mock_server, MockSupabaseResponses::inventory_response(&item_id, 2500, 20, false)).await;

    Mock::given(method("POST"))
        .and(path("/v1/payment_intents"))
        .respond_with(ResponseTemplate::new(402).set_body_json(json!({
            "error": {
                "type": "card_error",
                "code": "card_declined",
                "message": "Your card was declined."
            }
        })))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/orders"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(0)
        .mount(&mock_server)
        .await;

    let app = create_order_app(&mock_server);
    let request = authed("POST", "/checkout", &patient, Some(checkout_body(&item_id, 1, None)));

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);

    let json_response = body_json(response).await;
    assert_eq!(json_response["error"], "Your card was declined.");
}

#[tokio::test]
async fn test_checkout_rejects_short_stock() {
    let mock_server = MockServer::start().await;
    let patient = TestUser::patient("patient@example.com");
    let item_id = Uuid::new_v4().to_string();

    mount_inventory(&mock_server, MockSupabaseResponses::inventory_response(&item_id, 2500, 1, false)).await;

    let app = create_order_app(&mock_server);
    let request = authed("POST", "/checkout", &patient, Some(checkout_body(&item_id, 3, None)));

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_prescription_item_needs_prescription() {
    let mock_server = MockServer::start().await;
    let patient = TestUser::patient("patient@example.com");
    let item_id = Uuid::new_v4().to_string();

    mount_inventory(&mock_server, MockSupabaseResponses::inventory_response(&item_id, 2500, 20, true)).await;

    let app = create_order_app(&mock_server);
    let request = authed("POST", "/checkout", &patient, Some(checkout_body(&item_id, 1, None)));

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_prescription_must_belong_to_caller() {
    let mock_server = MockServer::start().await;
    let patient = TestUser::patient("patient@example.com");
    let item_id = Uuid::new_v4().to_string();
    let prescription_id = Uuid::new_v4().to_string();
    let someone_else = Uuid::new_v4().to_string();
    let provider_id = Uuid::new_v4().to_string();

    mount_inventory(&mock_server, MockSupabaseResponses::inventory_response(&item_id, 2500, 20, true)).await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/prescriptions"))
        .and(query_param("id", format!("eq.{}", prescription_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::prescription_response(&prescription_id, &someone_else, &provider_id, 3, 0)
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/payment_intents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(0)
        .mount(&mock_server)
        .await;

    let app = create_order_app(&mock_server);
    let request = authed(
        "POST",
        "/checkout",
        &patient,
        Some(checkout_body(&item_id, 1, Some(&prescription_id))),
    );

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_shipping_requires_tracking_number() {
    let mock_server = MockServer::start().await;
    let admin = TestUser::admin("admin@example.com");
    let order_id = Uuid::new_v4().to_string();
    let patient_id = Uuid::new_v4().to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/orders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            order_row(&order_id, &patient_id, "processing", Some("pi_123"))
        ])))
        .mount(&mock_server)
        .await;

    let app = create_order_app(&mock_server);
    let request = authed(
        "PATCH",
        &format!("/{}/status", order_id),
        &admin,
        Some(json!({ "status": "shipped" })),
    );

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_invalid_order_transition_conflicts() {
    let mock_server = MockServer::start().await;
    let admin = TestUser::admin("admin@example.com");
    let order_id = Uuid::new_v4().to_string();
    let patient_id = Uuid::new_v4().to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/orders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            order_row(&order_id, &patient_id, "pending", None)
        ])))
        .mount(&mock_server)
        .await;

    let app = create_order_app(&mock_server);
    let request = authed(
        "PATCH",
        &format!("/{}/status", order_id),
        &admin,
        Some(json!({ "status": "shipped", "tracking_number": "1Z999" })),
    );

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_cancelling_paid_order_refunds_and_restocks() {
    let mock_server = MockServer::start().await;
    let patient = TestUser::patient("patient@example.com");
    let order_id = Uuid::new_v4().to_string();
    let item_id = Uuid::new_v4().to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/orders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            order_row(&order_id, &patient.id, "paid", Some("pi_123"))
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/refunds"))
        .and(body_string_contains("payment_intent=pi_123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "re_123",
            "status": "succeeded"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/orders"))
        .and(query_param("status", "eq.paid"))
        .and(body_string_contains("refunded"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            order_row(&order_id, &patient.id, "refunded", Some("pi_123"))
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/order_items"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            order_item_row(&order_id, &item_id, 2)
        ])))
        .mount(&mock_server)
        .await;

    mount_inventory(&mock_server, MockSupabaseResponses::inventory_response(&item_id, 2500, 18, false)).await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/inventory"))
        .and(body_string_contains("\"quantity_on_hand\":20"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::inventory_response(&item_id, 2500, 20, false)
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let app = create_order_app(&mock_server);
    let request = authed("POST", &format!("/{}/cancel", order_id), &patient, None);

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let order = body_json(response).await;
    assert_eq!(order["status"], "refunded");
}

#[tokio::test]
async fn test_patient_cannot_view_other_order() {
    let mock_server = MockServer::start().await;
    let patient = TestUser::patient("patient@example.com");
    let order_id = Uuid::new_v4().to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/orders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            order_row(&order_id, &Uuid::new_v4().to_string(), "paid", Some("pi_123"))
        ])))
        .mount(&mock_server)
        .await;

    let app = create_order_app(&mock_server);
    let request = authed("GET", &format!("/{}", order_id), &patient, None);

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_admin_cancelling_paid_order_refunds_and_restocks() {
    let mock_server = MockServer::start().await;
    let admin = TestUser::admin("admin@example.com");
    let patient_id = Uuid::new_v4().to_string();
    let order_id = Uuid::new_v4().to_string();
    let item_id = Uuid::new_v4().to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/orders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            order_row(&order_id, &patient_id, "paid", Some("pi_123"))
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/orders"))
        .and(query_param("status", "eq.paid"))
        .and(body_string_contains("refunded"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            order_row(&order_id, &patient_id, "refunded", Some("pi_123"))
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/refunds"))
        .and(body_string_contains("payment_intent=pi_123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "re_123",
            "status": "succeeded"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/order_items"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            order_item_row(&order_id, &item_id, 2)
        ])))
        .mount(&mock_server)
        .await;

    mount_inventory(&mock_server, MockSupabaseResponses::inventory_response(&item_id, 2500, 18, false)).await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/inventory"))
        .and(body_string_contains("\"quantity_on_hand\":20"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::inventory_response(&item_id, 2500, 20, false)
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let app = create_order_app(&mock_server);
    let request = authed(
        "PATCH",
        &format!("/{}/status", order_id),
        &admin,
        Some(json!({ "status": "cancelled" })),
    );

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let order = body_json(response).await;
    assert_eq!(order["status"], "refunded");
}

#[tokio::test]
async fn test_delivered_refund_does_not_restock() {
    let mock_server = MockServer::start().await;
    let admin = TestUser::admin("admin@example.com");
    let patient_id = Uuid::new_v4().to_string();
    let order_id = Uuid::new_v4().to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/orders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            order_row(&order_id, &patient_id, "delivered", Some("pi_123"))
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/orders"))
        .and(query_param("status", "eq.delivered"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            order_row(&order_id, &patient_id, "refunded", Some("pi_123"))
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/refunds"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "re_123",
            "status": "succeeded"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/inventory"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&mock_server)
        .await;

    let app = create_order_app(&mock_server);
    let request = authed(
        "PATCH",
        &format!("/{}/status", order_id),
        &admin,
        Some(json!({ "status": "refunded" })),
    );

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "refunded");
}

#[tokio::test]
async fn test_cancel_lost_race_does_not_refund() {
    let mock_server = MockServer::start().await;
    let patient = TestUser::patient("patient@example.com");
    let order_id = Uuid::new_v4().to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/orders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            order_row(&order_id, &patient.id, "paid", Some("pi_123"))
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/orders"))
        .and(query_param("status", "eq.paid"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/refunds"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "re_123",
            "status": "succeeded"
        })))
        .expect(0)
        .mount(&mock_server)
        .await;

    let app = create_order_app(&mock_server);
    let request = authed("POST", &format!("/{}/cancel", order_id), &patient, None);

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_failed_refund_restores_order_status() {
    let mock_server = MockServer::start().await;
    let patient = TestUser::patient("patient@example.com");
    let order_id = Uuid::new_v4().to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/orders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            order_row(&order_id, &patient.id, "paid", Some("pi_123"))
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/orders"))
        .and(query_param("status", "eq.paid"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            order_row(&order_id, &patient.id, "refunded", Some("pi_123"))
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/refunds"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "error": { "type": "api_error", "message": "Stripe is down" }
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/orders"))
        .and(query_param("status", "eq.refunded"))
        .and(body_string_contains("\"status\":\"paid\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            order_row(&order_id, &patient.id, "paid", Some("pi_123"))
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/order_items"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&mock_server)
        .await;

    let app = create_order_app(&mock_server);
    let request = authed("POST", &format!("/{}/cancel", order_id), &patient, None);

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_checkout_refunds_charge_when_order_cannot_be_saved() {
    let mock_server = MockServer::start().await;
    let patient = TestUser::patient("patient@example.com");
    let item_id = Uuid::new_v4().to_string();

    mount_inventory(&mock_server, MockSupabaseResponses::inventory_response(&item_id, 2500, 20, false)).await;

    Mock::given(method("POST"))
        .and(path("/v1/payment_intents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "pi_123",
            "object": "payment_intent",
            "status": "succeeded",
            "amount": 5599,
            "client_secret": "pi_123_secret_abc"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/orders"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "code": "XX000",
            "message": "connection reset"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/refunds"))
        .and(body_string_contains("payment_intent=pi_123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "re_123",
            "status": "succeeded"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/inventory"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&mock_server)
        .await;

    let app = create_order_app(&mock_server);
    let request = authed("POST", "/checkout", &patient, Some(checkout_body(&item_id, 2, None)));

    let response = app.oneshot(request).await.unwrap();
    assert!(response.status().is_server_error());
}

#[tokio::test]
async fn test_checkout_releases_pending_intent_when_items_fail() {
    let mock_server = MockServer::start().await;
    let patient = TestUser::patient("patient@example.com");
    let item_id = Uuid::new_v4().to_string();
    let order_id = Uuid::new_v4().to_string();

    mount_inventory(&mock_server, MockSupabaseResponses::inventory_response(&item_id, 2500, 20, false)).await;

    Mock::given(method("POST"))
        .and(path("/v1/payment_intents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "pi_456",
            "object": "payment_intent",
            "status": "requires_action",
            "amount": 5599,
            "client_secret": "pi_456_secret_abc"
        })))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/orders"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            order_row(&order_id, &patient.id, "pending", Some("pi_456"))
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/order_items"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "code": "XX000",
            "message": "connection reset"
        })))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/payment_intents/pi_456/cancel"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "pi_456",
            "object": "payment_intent",
            "status": "canceled",
            "amount": 5599
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/rest/v1/orders"))
        .and(query_param("id", format!("eq.{}", order_id)))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;

    let app = create_order_app(&mock_server);
    let request = authed("POST", "/checkout", &patient, Some(checkout_body(&item_id, 2, None)));

    let response = app.oneshot(request).await.unwrap();
    assert!(response.status().is_server_error());
}
