//! HTTP ingress: router, shared state, auth extractor, API errors.
//!
//! JSON API under `/api`, a WebSocket progress stream at
//! `/ws/executions`, and health probes at the root. Handlers enforce
//! their rate-limit category explicitly at the top of each function,
//! mirroring the per-endpoint budgets in [`rate_limit`].

pub mod auth;
pub mod rate_limit;
pub mod routes;
pub mod ws;

use axum::Router;
use axum::extract::connect_info::ConnectInfo;
use axum::extract::FromRequestParts;
use axum::http::{StatusCode, request::Parts};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde_json::json;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::runtimes::{Engine, StoreError};
use crate::scheduler::WorkflowScheduler;
use auth::AuthService;
use rate_limit::{LimitCategory, RateLimiter};

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub scheduler: Arc<WorkflowScheduler>,
    pub auth: Arc<AuthService>,
    pub limiter: Arc<RateLimiter>,
}

impl AppState {
    #[must_use]
    pub fn new(engine: Arc<Engine>, scheduler: Arc<WorkflowScheduler>) -> Self {
        Self {
            engine,
            scheduler,
            auth: Arc::new(AuthService::new()),
            limiter: Arc::new(RateLimiter::new()),
        }
    }

    /// Enforce a rate-limit category for one request.
    pub fn limit(&self, category: LimitCategory, ip: IpAddr) -> Result<(), ApiError> {
        self.limiter
            .check(category, ip)
            .map_err(ApiError::too_many_requests)
    }
}

/// JSON API error: `{detail, retry_after?}` with an HTTP status.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub detail: String,
    pub retry_after: Option<u64>,
}

impl ApiError {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
            retry_after: None,
        }
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, detail)
    }

    pub fn unauthorized(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, detail)
    }

    pub fn forbidden(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, detail)
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, detail)
    }

    pub fn too_many_requests(retry_after: u64) -> Self {
        Self {
            status: StatusCode::TOO_MANY_REQUESTS,
            detail: "Rate limit exceeded. Please try again later.".to_string(),
            retry_after: Some(retry_after),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({ "detail": self.detail });
        if let Some(retry_after) = self.retry_after {
            body["retry_after"] = json!(retry_after);
        }
        (self.status, axum::Json(body)).into_response()
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Source IP for rate limiting; `0.0.0.0` when the transport gives none
/// (in-process tests).
pub struct ClientIp(pub IpAddr);

impl FromRequestParts<AppState> for ClientIp {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let ip = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0.ip())
            .unwrap_or(IpAddr::from([0, 0, 0, 0]));
        Ok(ClientIp(ip))
    }
}

/// Extractor gating admin-only routes: setup must be complete and the
/// bearer token valid.
pub struct RequireAdmin;

impl FromRequestParts<AppState> for RequireAdmin {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let settings = state.engine.store().settings().await?;
        if !settings.is_setup_complete {
            return Err(ApiError::forbidden(
                "Setup not complete. Please set admin password first.",
            ));
        }
        let authenticated = bearer_token(parts)
            .map(|token| state.auth.verify_token(token))
            .unwrap_or(false);
        if !authenticated {
            return Err(ApiError::unauthorized("Not authenticated"));
        }
        Ok(RequireAdmin)
    }
}

/// Non-rejecting variant: carries whether the request held a valid admin
/// token. Used by endpoints whose response shape depends on auth state.
pub struct MaybeAdmin(pub bool);

impl FromRequestParts<AppState> for MaybeAdmin {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let authenticated = bearer_token(parts)
            .map(|token| state.auth.verify_token(token))
            .unwrap_or(false);
        Ok(MaybeAdmin(authenticated))
    }
}

async fn root() -> axum::Json<serde_json::Value> {
    axum::Json(json!({
        "name": "TradeWeave",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
    }))
}

async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(json!({ "status": "healthy" }))
}

/// Assemble the full application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        // Auth
        .route("/api/auth/status", get(routes::auth::status))
        .route("/api/auth/setup", post(routes::auth::setup))
        .route("/api/auth/login", post(routes::auth::login))
        .route("/api/auth/change-password", post(routes::auth::change_password))
        .route("/api/auth/logout", post(routes::auth::logout))
        .route("/api/auth/verify", get(routes::auth::verify))
        // Settings
        .route(
            "/api/settings",
            get(routes::settings::get_settings).put(routes::settings::update_settings),
        )
        .route("/api/settings/test", post(routes::settings::test_settings))
        // Workflows
        .route(
            "/api/workflows",
            get(routes::workflows::list).post(routes::workflows::create),
        )
        .route(
            "/api/workflows/{id}",
            get(routes::workflows::get_one)
                .put(routes::workflows::update)
                .delete(routes::workflows::delete),
        )
        .route("/api/workflows/{id}/activate", post(routes::workflows::activate))
        .route(
            "/api/workflows/{id}/deactivate",
            post(routes::workflows::deactivate),
        )
        .route("/api/workflows/{id}/execute", post(routes::workflows::execute))
        .route(
            "/api/workflows/{id}/executions",
            get(routes::workflows::executions),
        )
        // Anonymous webhook ingress
        .route("/api/webhook/{id}", post(routes::workflows::webhook))
        // Symbol proxy
        .route("/api/symbols/search", get(routes::symbols::search))
        .route("/api/symbols/quotes", get(routes::symbols::quotes))
        // Live progress
        .route("/ws/executions", get(ws::executions))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
