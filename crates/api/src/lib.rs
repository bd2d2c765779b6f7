mod config;
mod rate_limit;

use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Json, Path, Query, State};
use axum::http::{header, HeaderValue, Method, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{body::Body, Router};
use callgenie_agents::{AgentWorkspace, WorkspaceError};
use callgenie_core::{
    CallFilter, CallRecord, CallStatus, NewAgent, PolicyError, TierPolicyEngine,
    VoiceAccessDescriptor,
};
use callgenie_observability::{DecisionKind, PolicyMetrics};
use callgenie_storage::Store;
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

pub use crate::config::ApiConfig;
use crate::rate_limit::SlidingWindowLimiter;

#[derive(Clone)]
pub struct ApiState {
    pub workspace: Arc<AgentWorkspace<Store>>,
    pub metrics: Arc<PolicyMetrics>,
    pub api_key: String,
    pub limiter: SlidingWindowLimiter,
    pub allowed_origins: Arc<Vec<String>>,
    pub store_backend: &'static str,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp_utc: String,
    store: &'static str,
    unknown_tier_policy: callgenie_core::UnknownTierPolicy,
    metrics: callgenie_observability::MetricsSnapshot,
}

#[derive(Debug, Deserialize)]
struct SlotsQuery {
    tier: String,
    #[serde(default)]
    count: i64,
}

#[derive(Debug, Deserialize)]
struct LanguageQuery {
    code: String,
    tier: String,
}

#[derive(Debug, Deserialize)]
struct PlanRequest {
    tier: String,
}

#[derive(Debug, Deserialize)]
struct CallsQuery {
    status: Option<String>,
    agent_id: Option<String>,
    q: Option<String>,
}

#[derive(Debug, Serialize)]
struct VoiceAccessResponse {
    voice_id: String,
    allowed: bool,
    required_plan: Option<String>,
}

pub async fn build_app(config: ApiConfig) -> Result<Router> {
    let metrics = PolicyMetrics::shared();

    let store = match config.database_url.as_deref() {
        Some(database_url) => Store::sqlite(database_url).await?,
        None => Store::memory(),
    };
    let store_backend = store.backend_name();

    let workspace = Arc::new(AgentWorkspace::new(
        TierPolicyEngine::new(config.unknown_tier),
        Arc::new(store),
        metrics.clone(),
    ));

    let state = ApiState {
        workspace,
        metrics,
        api_key: config.api_key,
        limiter: SlidingWindowLimiter::new(config.rate_limit_window, config.rate_limit_max),
        allowed_origins: Arc::new(config.allowed_origins),
        store_backend,
    };

    Ok(build_router(state))
}

pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/policy/slots", get(policy_slots))
        .route("/v1/policy/language", get(policy_language))
        .route("/v1/policy/voice", post(policy_voice))
        .route("/v1/users/:user_id/board", get(user_board))
        .route("/v1/users/:user_id/plan", put(user_plan))
        .route("/v1/users/:user_id/agents", post(agent_create))
        .route(
            "/v1/users/:user_id/calls",
            get(calls_list).post(calls_record),
        )
        .layer(build_cors_layer(&state.allowed_origins))
        .layer(middleware::from_fn(security_headers_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(RequestBodyLimitLayer::new(64 * 1024))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api_key_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .with_state(state)
}

async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    let payload = HealthResponse {
        status: "ok",
        timestamp_utc: chrono::Utc::now().to_rfc3339(),
        store: state.store_backend,
        unknown_tier_policy: state.workspace.engine().unknown_tier_policy(),
        metrics: state.metrics.snapshot(),
    };
    (StatusCode::OK, Json(payload))
}

async fn policy_slots(
    State(state): State<ApiState>,
    Query(query): Query<SlotsQuery>,
) -> Response {
    state.metrics.inc_request();
    match state.workspace.engine().slots_for(&query.tier, query.count) {
        Ok(board) => {
            state.metrics.record_decision(DecisionKind::Slots, true);
            (StatusCode::OK, Json(board)).into_response()
        }
        Err(error) => policy_error_response(&state, error),
    }
}

async fn policy_language(
    State(state): State<ApiState>,
    Query(query): Query<LanguageQuery>,
) -> Response {
    state.metrics.inc_request();
    match state
        .workspace
        .engine()
        .language_access(&query.code, &query.tier)
    {
        Ok(access) => {
            state
                .metrics
                .record_decision(DecisionKind::Language, access.allowed);
            (StatusCode::OK, Json(access)).into_response()
        }
        Err(error) => policy_error_response(&state, error),
    }
}

async fn policy_voice(
    State(state): State<ApiState>,
    Json(voice): Json<VoiceAccessDescriptor>,
) -> Response {
    state.metrics.inc_request();
    let allowed = state.workspace.voice_access(&voice);
    let required_plan = voice
        .access_control
        .and_then(|access| access.required_plan);

    (
        StatusCode::OK,
        Json(VoiceAccessResponse {
            voice_id: voice.voice_id,
            allowed,
            required_plan,
        }),
    )
        .into_response()
}

async fn user_board(State(state): State<ApiState>, Path(user_id): Path<String>) -> Response {
    state.metrics.inc_request();
    match state.workspace.slot_board(&user_id).await {
        Ok(board) => (StatusCode::OK, Json(board)).into_response(),
        Err(error) => workspace_error_response(error),
    }
}

async fn user_plan(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
    Json(request): Json<PlanRequest>,
) -> Response {
    state.metrics.inc_request();
    match state.workspace.set_plan(&user_id, &request.tier).await {
        Ok(plan) => (StatusCode::OK, Json(plan)).into_response(),
        Err(error) => workspace_error_response(error),
    }
}

async fn agent_create(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
    Json(request): Json<NewAgent>,
) -> Response {
    state.metrics.inc_request();
    match state.workspace.create_agent(&user_id, request).await {
        Ok(agent) => (StatusCode::CREATED, Json(agent)).into_response(),
        Err(error) => workspace_error_response(error),
    }
}

async fn calls_list(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
    Query(query): Query<CallsQuery>,
) -> Response {
    state.metrics.inc_request();

    let status = match query.status.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => match CallStatus::parse(raw) {
            Some(status) => Some(status),
            None => {
                return policy_error_response(
                    &state,
                    PolicyError::invalid("status", format!("unknown call status `{raw}`")),
                )
            }
        },
        None => None,
    };
    let filter = CallFilter {
        status,
        agent_id: query.agent_id,
        query: query.q,
    };

    match state.workspace.call_history(&user_id, &filter).await {
        Ok(calls) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "total": calls.len(),
                "calls": calls
            })),
        )
            .into_response(),
        Err(error) => workspace_error_response(error),
    }
}

async fn calls_record(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
    Json(call): Json<CallRecord>,
) -> Response {
    state.metrics.inc_request();
    if call.user_id != user_id {
        return policy_error_response(
            &state,
            PolicyError::invalid("user_id", "call belongs to a different user"),
        );
    }

    match state.workspace.record_call(&call).await {
        Ok(()) => (StatusCode::OK, Json(call)).into_response(),
        Err(error) => workspace_error_response(error),
    }
}

fn policy_error_response(state: &ApiState, error: PolicyError) -> Response {
    state.metrics.inc_invalid_argument();
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({
            "error": error.code(),
            "message": error.to_string()
        })),
    )
        .into_response()
}

fn workspace_error_response(error: WorkspaceError) -> Response {
    match error {
        WorkspaceError::Policy(error) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": error.code(),
                "message": error.to_string()
            })),
        )
            .into_response(),
        WorkspaceError::AgentLimitReached {
            tier,
            limit,
            upgrade_target,
        } => (
            StatusCode::PAYMENT_REQUIRED,
            Json(serde_json::json!({
                "error": "agent_limit_reached",
                "message": format!("The {tier} plan allows {limit} agents."),
                "tier": tier,
                "limit": limit,
                "upgrade_target": upgrade_target.map(|target| target.display_name()),
            })),
        )
            .into_response(),
        WorkspaceError::LanguageLocked {
            code,
            tier,
            upgrade_target,
        } => (
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({
                "error": "language_locked",
                "message": format!("Language `{code}` is not included in the {tier} plan."),
                "code": code,
                "tier": tier,
                "upgrade_target": upgrade_target,
            })),
        )
            .into_response(),
        WorkspaceError::Storage(error) => {
            error!(error = %error, "storage failure");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "error": "storage_failure",
                    "message": "the request could not be completed"
                })),
            )
                .into_response()
        }
    }
}

fn is_public_endpoint(path: &str) -> bool {
    matches!(path, "/health")
}

async fn api_key_middleware(
    State(state): State<ApiState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.method() == Method::OPTIONS || is_public_endpoint(request.uri().path()) {
        return next.run(request).await;
    }

    let header_key = request
        .headers()
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    if header_key != state.api_key {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "error": "unauthorized",
                "message": "missing or invalid x-api-key"
            })),
        )
            .into_response();
    }

    next.run(request).await
}

async fn rate_limit_middleware(
    State(state): State<ApiState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.method() == Method::OPTIONS || is_public_endpoint(request.uri().path()) {
        return next.run(request).await;
    }

    let key = request_ip(&request);
    if let Err(retry_after) = state.limiter.check(&key) {
        let mut response = (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({
                "error": "rate_limited",
                "message": "rate limit exceeded for this client"
            })),
        )
            .into_response();
        if let Ok(value) = HeaderValue::from_str(&retry_after.as_secs().max(1).to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        return response;
    }

    next.run(request).await
}

fn request_ip(request: &Request<Body>) -> String {
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .map(|value| {
            value
                .split(',')
                .next()
                .unwrap_or("unknown")
                .trim()
                .to_string()
        })
        .unwrap_or_else(|| "local".to_string())
}

fn build_cors_layer(allowed_origins: &Arc<Vec<String>>) -> CorsLayer {
    let origins = allowed_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect::<Vec<_>>();
    let origins = if origins.is_empty() {
        vec![HeaderValue::from_static("http://localhost:3000")]
    } else {
        origins
    };

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::HeaderName::from_static("x-api-key"),
        ])
}

async fn security_headers_middleware(request: Request<Body>, next: Next) -> Response {
    let mut response = next.run(request).await;

    response.headers_mut().insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    response.headers_mut().insert(
        header::HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("DENY"),
    );
    response.headers_mut().insert(
        header::HeaderName::from_static("referrer-policy"),
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );

    response
}

#[cfg(test)]
mod tests {
    use super::is_public_endpoint;

    #[test]
    fn only_health_is_public() {
        assert!(is_public_endpoint("/health"));
        assert!(!is_public_endpoint("/v1/policy/slots"));
    }
}
