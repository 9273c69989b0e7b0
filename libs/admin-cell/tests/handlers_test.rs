use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use admin_cell::router::admin_routes;
use shared_utils::test_utils::{JwtTestUtils, TestConfig, TestUser};

fn create_test_app(server: &MockServer) -> Router {
    admin_routes(Arc::new(
        TestConfig::with_mock_server(&server.uri()).to_app_config(),
    ))
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

async fn mount_rows(server: &MockServer, table: &str, rows: Value) {
    Mock::given(method("GET"))
        .and(path(format!("/rest/v1/{}", table)))
        .respond_with(ResponseTemplate::new(200).set_body_json(rows))
        .mount(server)
        .await;
}

async fn mount_count(server: &MockServer, table: &str, status: &str, total: usize) {
    Mock::given(method("HEAD"))
        .and(path(format!("/rest/v1/{}", table)))
        .and(query_param("status", format!("eq.{}", status)))
        .and(header("Prefer", "count=exact"))
        .respond_with(ResponseTemplate::new(200).insert_header("Content-Range", format!("*/{}", total)))
        .mount(server)
        .await;
}

async fn mount_zero_counts(server: &MockServer) {
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(200).insert_header("Content-Range", "*/0"))
        .with_priority(10)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_patient_cannot_open_dashboard() {
    let mock_server = MockServer::start().await;
    let patient = TestUser::patient("patient@example.com");

    let app = create_test_app(&mock_server);
    let request = Request::builder()
        .method("GET")
        .uri("/dashboard")
        .header("Authorization", format!("Bearer {}", JwtTestUtils::token_for(&patient)))
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_dashboard_summarizes_operations() {
    let mock_server = MockServer::start().await;
    let admin = TestUser::admin("admin@example.com");

    mount_count(&mock_server, "consultations", "pending", 2).await;
    mount_count(&mock_server, "consultations", "completed", 1).await;
    mount_count(&mock_server, "orders", "paid", 1500).await;
    mount_count(&mock_server, "subscriptions", "active", 2).await;
    mount_count(&mock_server, "refill_check_ins", "pending_review", 1).await;
    mount_zero_counts(&mock_server).await;
    mount_rows(
        &mock_server,
        "inventory",
        json!([
            { "id": Uuid::new_v4(), "sku": "FIN-1MG-30", "name": "Finasteride 1mg", "quantity_on_hand": 3, "reorder_threshold": 10 },
            { "id": Uuid::new_v4(), "sku": "MIN-5-60", "name": "Minoxidil 5%", "quantity_on_hand": 80, "reorder_threshold": 10 }
        ]),
    )
    .await;

    let app = create_test_app(&mock_server);
    let request = Request::builder()
        .method("GET")
        .uri("/dashboard")
        .header("Authorization", format!("Bearer {}", JwtTestUtils::token_for(&admin)))
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json_response = body_json(response).await;
    assert_eq!(json_response["consultations_by_status"]["pending"], 2);
    assert_eq!(json_response["consultations_by_status"]["completed"], 1);
    assert!(json_response["consultations_by_status"].get("assigned").is_none());
    assert_eq!(json_response["orders_by_status"]["paid"], 1500);
    assert_eq!(json_response["active_subscriptions"], 2);
    assert_eq!(json_response["pending_refill_reviews"], 1);
    assert_eq!(json_response["low_stock"].as_array().unwrap().len(), 1);
    assert_eq!(json_response["low_stock"][0]["sku"], "FIN-1MG-30");
}

#[tokio::test]
async fn test_duplicate_admin_email_is_conflict() {
    let mock_server = MockServer::start().await;
    let admin = TestUser::admin("admin@example.com");

    Mock::given(method("GET"))
        .and(path("/rest/v1/admins"))
        .and(query_param("email", "eq.ops@example.com"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": Uuid::new_v4() }])))
        .mount(&mock_server)
        .await;

    let app = create_test_app(&mock_server);
    let request = Request::builder()
        .method("POST")
        .uri("/admins")
        .header("Authorization", format!("Bearer {}", JwtTestUtils::token_for(&admin)))
        .header("Content-Type", "application/json")
        .body(Body::from(
            json!({ "email": "Ops@Example.com", "full_name": "Ops Team" }).to_string(),
        ))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_admin_creates_admin() {
    let mock_server = MockServer::start().await;
    let admin = TestUser::admin("admin@example.com");
    let new_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/admins"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/admins"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([{
            "id": new_id,
            "email": "ops@example.com",
            "full_name": "Ops Team",
            "created_at": "2024-01-01T00:00:00Z"
        }])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let app = create_test_app(&mock_server);
    let request = Request::builder()
        .method("POST")
        .uri("/admins")
        .header("Authorization", format!("Bearer {}", JwtTestUtils::token_for(&admin)))
        .header("Content-Type", "application/json")
        .body(Body::from(
            json!({ "id": new_id, "email": "ops@example.com", "full_name": "Ops Team" }).to_string(),
        ))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let json_response = body_json(response).await;
    assert_eq!(json_response["email"], "ops@example.com");
}
