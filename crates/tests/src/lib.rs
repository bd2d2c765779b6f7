//! Shared helpers for the HTTP integration tests.

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use callgenie_api::{build_app, ApiConfig};
use serde_json::Value;
use tower::ServiceExt;

pub const TEST_API_KEY: &str = "test-callgenie-key";

pub async fn test_app() -> Router {
    build_app(ApiConfig {
        api_key: TEST_API_KEY.to_string(),
        ..ApiConfig::default()
    })
    .await
    .expect("app should build")
}

pub fn authed(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-api-key", TEST_API_KEY);

    match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let parsed = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or(Value::Null)
    };
    (status, parsed)
}
