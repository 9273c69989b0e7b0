use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use provider_cell::router::provider_routes;
use shared_utils::test_utils::{JwtTestUtils, MockSupabaseResponses, TestConfig, TestUser};

fn create_test_app(server: &MockServer) -> Router {
    provider_routes(Arc::new(
        TestConfig::with_mock_server(&server.uri()).to_app_config(),
    ))
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn create_body(id: &str, email: &str) -> Value {
    json!({
        "id": id,
        "first_name": "Gregory",
        "last_name": "House",
        "email": email,
        "license_number": "MD123456",
        "licensed_states": ["ca", "NY"],
        "specialty": "General"
    })
}

#[tokio::test]
async fn test_list_providers_public() {
    let mock_server = MockServer::start().await;
    let a = Uuid::new_v4().to_string();
    let b = Uuid::new_v4().to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/providers"))
        .and(query_param("licensed_states", "cs.{CA}"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::provider_response(&a, "CA"),
            MockSupabaseResponses::provider_response(&b, "CA"),
        ])))
        .mount(&mock_server)
        .await;

    let app = create_test_app(&mock_server);
    let request = Request::builder()
        .method("GET")
        .uri("/?state=ca")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json_response = body_json(response).await;
    assert_eq!(json_response["total"], 2);
    assert!(json_response["providers"].is_array());
}

#[tokio::test]
async fn test_list_providers_matches_specialty_case_insensitively() {
    let mock_server = MockServer::start().await;
    let id = Uuid::new_v4().to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/providers"))
        .and(query_param("specialty", "eq.dermatology"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::provider_response(&id, "CA"),
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let app = create_test_app(&mock_server);
    let request = Request::builder()
        .method("GET")
        .uri("/?specialty=Dermatology")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["total"], 1);
}

#[tokio::test]
async fn test_get_unknown_provider_is_not_found() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/providers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let app = create_test_app(&mock_server);
    let request = Request::builder()
        .method("GET")
        .uri(format!("/{}", Uuid::new_v4()))
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_create_provider_requires_admin() {
    let mock_server = MockServer::start().await;
    let provider = TestUser::provider("doc@example.com");
    let token = JwtTestUtils::token_for(&provider);

    let app = create_test_app(&mock_server);
    let request = Request::builder()
        .method("POST")
        .uri("/manage")
        .header("authorization", format!("Bearer {}", token))
        .header("content-type", "application/json")
        .body(Body::from(create_body(&provider.id, &provider.email).to_string()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_admin_creates_provider() {
    let mock_server = MockServer::start().await;
    let admin = TestUser::admin("admin@example.com");
    let new_id = Uuid::new_v4().to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/providers"))
        .and(query_param("email", "eq.house@example.com"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/providers"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockSupabaseResponses::provider_response(&new_id, "CA")
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let app = create_test_app(&mock_server);
    let request = Request::builder()
        .method("POST")
        .uri("/manage")
        .header("authorization", format!("Bearer {}", JwtTestUtils::token_for(&admin)))
        .header("content-type", "application/json")
        .body(Body::from(create_body(&new_id, "House@example.com").to_string()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(body_json(response).await["id"], new_id);
}

#[tokio::test]
async fn test_create_provider_duplicate_email() {
    let mock_server = MockServer::start().await;
    let admin = TestUser::admin("admin@example.com");

    Mock::given(method("GET"))
        .and(path("/rest/v1/providers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": "x" }])))
        .mount(&mock_server)
        .await;

    let app = create_test_app(&mock_server);
    let request = Request::builder()
        .method("POST")
        .uri("/manage")
        .header("authorization", format!("Bearer {}", JwtTestUtils::token_for(&admin)))
        .header("content-type", "application/json")
        .body(Body::from(
            create_body(&Uuid::new_v4().to_string(), "house@example.com").to_string(),
        ))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_provider_toggles_own_availability() {
    let mock_server = MockServer::start().await;
    let provider = TestUser::provider("doc@example.com");

    let mut row = MockSupabaseResponses::provider_response(&provider.id, "CA");
    row["accepting_consultations"] = json!(false);

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/providers"))
        .and(query_param("id", format!("eq.{}", provider.id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([row])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let app = create_test_app(&mock_server);
    let request = Request::builder()
        .method("PATCH")
        .uri(format!("/manage/{}/availability", provider.id))
        .header("authorization", format!("Bearer {}", JwtTestUtils::token_for(&provider)))
        .header("content-type", "application/json")
        .body(Body::from(json!({ "accepting_consultations": false }).to_string()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["accepting_consultations"], false);
}

#[tokio::test]
async fn test_match_candidates_reports_workload() {
    let mock_server = MockServer::start().await;
    let admin = TestUser::admin("admin@example.com");
    let busy = Uuid::from_u128(1).to_string();
    let idle = Uuid::from_u128(2).to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/providers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::provider_response(&busy, "TX"),
            MockSupabaseResponses::provider_response(&idle, "TX"),
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/consultations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "provider_id": busy },
            { "provider_id": busy },
        ])))
        .mount(&mock_server)
        .await;

    let app = create_test_app(&mock_server);
    let request = Request::builder()
        .method("GET")
        .uri("/manage/match?state=tx")
        .header("authorization", format!("Bearer {}", JwtTestUtils::token_for(&admin)))
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json_response = body_json(response).await;
    assert_eq!(json_response["state"], "TX");
    let candidates = json_response["candidates"].as_array().unwrap();
    assert_eq!(candidates[0]["open_consultations"], 2);
    assert_eq!(candidates[1]["open_consultations"], 0);
}
