//! Auth endpoints: first-run setup, login, token maintenance.
//!
//! Tokens are stateless, so logout is client-side; the endpoint exists
//! for symmetry and so clients can confirm their token was still valid
//! when they left.

use axum::Json;
use axum::extract::State;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::server::auth::{hash_password, verify_password};
use crate::server::rate_limit::LimitCategory;
use crate::server::{ApiError, AppState, ClientIp, MaybeAdmin, RequireAdmin};

#[derive(Deserialize)]
pub struct SetupRequest {
    pub password: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub password: String,
}

#[derive(Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

fn token_response(token: String) -> Json<Value> {
    Json(json!({ "access_token": token, "token_type": "bearer" }))
}

/// `GET /api/auth/status` — public.
pub async fn status(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    MaybeAdmin(authenticated): MaybeAdmin,
) -> Result<Json<Value>, ApiError> {
    state.limit(LimitCategory::Auth, ip)?;
    let settings = state.engine.store().settings().await?;
    Ok(Json(json!({
        "is_setup_complete": settings.is_setup_complete,
        "is_authenticated": authenticated,
    })))
}

/// `POST /api/auth/setup` — set the initial admin password. Only usable
/// before setup completes.
pub async fn setup(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(request): Json<SetupRequest>,
) -> Result<Json<Value>, ApiError> {
    state.limit(LimitCategory::Auth, ip)?;
    let settings = state.engine.store().settings().await?;
    if settings.is_setup_complete {
        return Err(ApiError::forbidden("Setup already complete"));
    }
    if request.password.len() < 8 {
        return Err(ApiError::bad_request(
            "Password must be at least 8 characters",
        ));
    }
    state
        .engine
        .store()
        .set_admin_password(&hash_password(&request.password))
        .await?;
    Ok(token_response(state.auth.issue_token()))
}

/// `POST /api/auth/login` — exchange the admin password for a token.
pub async fn login(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(request): Json<LoginRequest>,
) -> Result<Json<Value>, ApiError> {
    state.limit(LimitCategory::Auth, ip)?;
    let settings = state.engine.store().settings().await?;
    let Some(stored) = settings.admin_password_hash.as_deref() else {
        return Err(ApiError::forbidden(
            "Setup not complete. Please set admin password first.",
        ));
    };
    if !verify_password(&request.password, stored) {
        return Err(ApiError::unauthorized("Invalid password"));
    }
    Ok(token_response(state.auth.issue_token()))
}

/// `POST /api/auth/change-password` — requires the current password.
pub async fn change_password(
    _admin: RequireAdmin,
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(request): Json<ChangePasswordRequest>,
) -> Result<Json<Value>, ApiError> {
    state.limit(LimitCategory::Auth, ip)?;
    let settings = state.engine.store().settings().await?;
    let stored = settings.admin_password_hash.as_deref().unwrap_or("");
    if !verify_password(&request.current_password, stored) {
        return Err(ApiError::unauthorized("Current password is incorrect"));
    }
    if request.new_password.len() < 8 {
        return Err(ApiError::bad_request(
            "Password must be at least 8 characters",
        ));
    }
    state
        .engine
        .store()
        .set_admin_password(&hash_password(&request.new_password))
        .await?;
    Ok(Json(json!({ "status": "success" })))
}

/// `POST /api/auth/logout`.
pub async fn logout(
    _admin: RequireAdmin,
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
) -> Result<Json<Value>, ApiError> {
    state.limit(LimitCategory::Auth, ip)?;
    Ok(Json(json!({ "status": "success" })))
}

/// `GET /api/auth/verify` — token validation probe.
pub async fn verify(
    _admin: RequireAdmin,
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
) -> Result<Json<Value>, ApiError> {
    state.limit(LimitCategory::Auth, ip)?;
    Ok(Json(json!({ "valid": true })))
}
