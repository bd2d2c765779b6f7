use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use callgenie_api::{build_app, ApiConfig};
use callgenie_tests::{authed, send, test_app, TEST_API_KEY};
use serde_json::json;

#[tokio::test]
async fn health_is_public() {
    let app = test_app().await;

    let (status, body) = send(
        &app,
        Request::builder().uri("/health").body(Body::empty()).unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["store"], "memory");
    assert_eq!(body["unknown_tier_policy"], "reject");
}

#[tokio::test]
async fn policy_requires_api_key() {
    let app = test_app().await;

    let (status, body) = send(
        &app,
        Request::builder()
            .uri("/v1/policy/slots?tier=pro&count=2")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");
}

#[tokio::test]
async fn slots_follow_the_tier_table() {
    let app = test_app().await;

    let (status, body) = send(&app, authed("GET", "/v1/policy/slots?tier=pro&count=2", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["occupied"], 2);
    assert_eq!(body["available"], 2);
    assert_eq!(body["locked"], 6);

    let slots = body["slots"].as_array().unwrap();
    assert_eq!(slots.len(), 10);
    assert_eq!(slots[0]["state"], "occupied");
    assert_eq!(slots[2]["state"], "available");
    assert_eq!(slots[9]["state"], "locked");
    assert_eq!(slots[9]["upgrade_target"], "enterprise");
    assert_eq!(slots[9]["position"], 9);

    let (status, body) = send(&app, authed("GET", "/v1/policy/slots?tier=starter", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tier"], "basic");
    assert_eq!(body["available"], 2);
}

#[tokio::test]
async fn bad_slot_arguments_are_rejected() {
    let app = test_app().await;

    let (status, body) =
        send(&app, authed("GET", "/v1/policy/slots?tier=basic&count=-1", None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_argument");

    let (status, body) = send(&app, authed("GET", "/v1/policy/slots?tier=gold&count=1", None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_argument");
}

#[tokio::test]
async fn unknown_tier_can_fail_closed_to_basic() {
    let app = build_app(ApiConfig {
        api_key: TEST_API_KEY.to_string(),
        unknown_tier: callgenie_core::UnknownTierPolicy::TreatAsBasic,
        ..ApiConfig::default()
    })
    .await
    .unwrap();

    let (status, body) = send(&app, authed("GET", "/v1/policy/slots?tier=gold&count=1", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tier"], "basic");
    assert_eq!(body["display_slot_count"], 4);
}

#[tokio::test]
async fn language_and_voice_gates() {
    let app = test_app().await;

    let (status, body) =
        send(&app, authed("GET", "/v1/policy/language?code=fr&tier=basic", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["allowed"], false);
    assert_eq!(body["upgrade_target"], "Pro or Enterprise");

    let (_, body) = send(&app, authed("GET", "/v1/policy/language?code=hi&tier=pro", None)).await;
    assert_eq!(body["allowed"], true);
    assert!(body["upgrade_target"].is_null());

    let (status, body) = send(
        &app,
        authed(
            "POST",
            "/v1/policy/voice",
            Some(json!({
                "voiceId": "voice-kabir",
                "name": "Kabir",
                "accessControl": { "available": false, "requiredPlan": "pro" }
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["allowed"], false);
    assert_eq!(body["required_plan"], "pro");

    let (_, body) = send(
        &app,
        authed(
            "POST",
            "/v1/policy/voice",
            Some(json!({ "voice_id": "voice-aria", "name": "Aria" })),
        ),
    )
    .await;
    assert_eq!(body["allowed"], true);
}

#[tokio::test]
async fn agent_creation_is_capped_until_upgrade() {
    let app = test_app().await;

    for name in ["Sales", "Support"] {
        let (status, _) = send(
            &app,
            authed("POST", "/v1/users/u-42/agents", Some(json!({ "name": name }))),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, body) = send(
        &app,
        authed("POST", "/v1/users/u-42/agents", Some(json!({ "name": "Renewals" }))),
    )
    .await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["error"], "agent_limit_reached");
    assert_eq!(body["upgrade_target"], "Pro");

    let (status, body) = send(
        &app,
        authed("PUT", "/v1/users/u-42/plan", Some(json!({ "tier": "pro" }))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tier"], "pro");

    let (status, _) = send(
        &app,
        authed("POST", "/v1/users/u-42/agents", Some(json!({ "name": "Renewals" }))),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, board) = send(&app, authed("GET", "/v1/users/u-42/board", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(board["occupied"], 3);
    assert_eq!(board["available"], 1);
    assert_eq!(board["locked"], 6);
    assert_eq!(board["slots"][0]["resource"]["name"], "Sales");
}

#[tokio::test]
async fn locked_language_returns_forbidden() {
    let app = test_app().await;

    let (status, body) = send(
        &app,
        authed(
            "POST",
            "/v1/users/u-7/agents",
            Some(json!({ "name": "Desk", "language": "hi" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "language_locked");
    assert_eq!(body["upgrade_target"], "Pro");
}

#[tokio::test]
async fn call_history_is_filtered() {
    let app = test_app().await;

    let call = json!({
        "call_id": "call-1",
        "user_id": "u-9",
        "agent_id": "agent-1",
        "contact_name": "Priya",
        "phone_number": "+1 (555) 010-0001",
        "status": "completed",
        "started_at": "2026-10-16T09:30:00Z",
        "duration_secs": 125
    });
    let (status, _) = send(&app, authed("POST", "/v1/users/u-9/calls", Some(call.clone()))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &app,
        authed("GET", "/v1/users/u-9/calls?status=completed&q=5550100", None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["calls"][0]["call_id"], "call-1");

    let (_, body) = send(&app, authed("GET", "/v1/users/u-9/calls?status=failed", None)).await;
    assert_eq!(body["total"], 0);

    let (status, _) = send(&app, authed("GET", "/v1/users/u-9/calls?status=bogus", None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, authed("POST", "/v1/users/someone-else/calls", Some(call))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn rate_limit_applies_per_client() {
    let app = build_app(ApiConfig {
        api_key: TEST_API_KEY.to_string(),
        rate_limit_window: Duration::from_secs(60),
        rate_limit_max: 2,
        ..ApiConfig::default()
    })
    .await
    .unwrap();

    for _ in 0..2 {
        let (status, _) = send(&app, authed("GET", "/v1/policy/slots?tier=basic", None)).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = send(&app, authed("GET", "/v1/policy/slots?tier=basic", None)).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "rate_limited");

    let (status, _) = send(
        &app,
        Request::builder().uri("/health").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}
