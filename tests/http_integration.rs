//! End-to-end scenarios against the HTTP transport (§8 S1-S8), driven
//! in-process through the axum router via `tower::ServiceExt::oneshot` —
//! no real socket.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use indoc::indoc;
use serde_json::{json, Value};
use tower::ServiceExt;

use treequery_service::config::{ConfigManager, Profile, QueryConfig};
use treequery_service::http::router;
use treequery_service::service::Coordinator;

fn test_app() -> axum::Router {
    let coordinator = Arc::new(Coordinator::new(ConfigManager::new(QueryConfig::for_profile(Profile::Test))));
    router(coordinator)
}

async fn post(app: &axum::Router, path: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(path)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let parsed: Value = serde_json::from_slice(&bytes).unwrap();
    (status, parsed)
}

async fn get(app: &axum::Router, path: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let parsed: Value = serde_json::from_slice(&bytes).unwrap();
    (status, parsed)
}

#[tokio::test]
async fn s1_basic_identifier_query_returns_matches() {
    let app = test_app();
    let (status, body) = post(
        &app,
        "/parse",
        json!({
            "language": "javascript",
            "code": "function greet(name) { return name; }",
            "query": "((identifier) @id)"
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    let names: Vec<&str> = body["matches"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["capture_name"].as_str().unwrap())
        .collect();
    assert!(names.iter().all(|n| *n == "id"));
    assert!(body["matches"].as_array().unwrap().iter().any(|m| m["text"] == "greet"));
}

#[tokio::test]
async fn s2_eq_predicate_filters_matches_by_text() {
    let app = test_app();
    let code = indoc! {"
        function greet(name) {
            return name;
        }
    "};
    let (status, body) = post(
        &app,
        "/parse",
        json!({
            "language": "javascript",
            "code": code,
            "query": r#"((identifier) @id (#eq? @id "name"))"#
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["success"].as_bool().unwrap());
    let matches = body["matches"].as_array().unwrap();
    assert!(!matches.is_empty());
    assert!(matches.iter().all(|m| m["text"] == "name"));
}

#[tokio::test]
async fn s3_unsupported_language_returns_bad_request() {
    let app = test_app();
    let (status, body) = post(
        &app,
        "/parse",
        json!({
            "language": "cobol",
            "code": "x",
            "query": "((identifier) @id)"
        }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn s4_empty_code_succeeds_with_no_matches() {
    let app = test_app();
    let (status, body) = post(
        &app,
        "/parse",
        json!({
            "language": "javascript",
            "code": "",
            "query": "((identifier) @id)"
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert!(body["matches"].as_array().unwrap().is_empty());
    assert!(body["errors"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn s5_advanced_endpoint_applies_strip_directive_without_touching_original_text() {
    let app = test_app();
    let (status, body) = post(
        &app,
        "/parse/advanced",
        json!({
            "language": "javascript",
            "code": "let testValue = 1;",
            "query": r#"((identifier) @id (#eq? @id "testValue") (#strip! @id "^test"))"#,
            "enableAdvancedFeatures": true,
            "processDirectives": true,
            "includeMetadata": true
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let matches = body["matches"].as_array().unwrap();
    assert!(matches.iter().any(|m| m["text"] == "testValue" && m["processed_text"] == "Value"));
}

#[tokio::test]
async fn s6_multi_query_request_unions_and_dedups_matches() {
    let app = test_app();
    let (status, body) = post(
        &app,
        "/parse",
        json!({
            "language": "javascript",
            "code": "let a = 1;",
            "queries": ["((identifier) @id)", "((identifier) @id)"]
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let matches = body["matches"].as_array().unwrap();
    assert_eq!(matches.iter().filter(|m| m["text"] == "a").count(), 1);
}

#[tokio::test]
async fn s7_too_many_queries_is_rejected() {
    let app = test_app();
    let queries: Vec<&str> = std::iter::repeat("((identifier) @id)").take(11).collect();
    let (status, _) = post(
        &app,
        "/parse",
        json!({
            "language": "javascript",
            "code": "let a = 1;",
            "queries": queries
        }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn s8_health_and_stats_endpoints_report_healthy_and_track_requests() {
    let app = test_app();
    let (health_status, health_body) = get(&app, "/health").await;
    assert_eq!(health_status, StatusCode::OK);
    assert_eq!(health_body["status"], "healthy");

    let _ = post(
        &app,
        "/parse",
        json!({"language": "javascript", "code": "let a = 1;", "query": "((identifier) @id)"}),
    )
    .await;

    let (stats_status, stats_body) = get(&app, "/stats").await;
    assert_eq!(stats_status, StatusCode::OK);
    assert_eq!(stats_body["request_count"], 1);
}
