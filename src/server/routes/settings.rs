//! Gateway settings endpoints. The API key is write-only: it is sealed
//! before storage and never echoed back.

use axum::Json;
use axum::extract::State;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::gateway::GatewayClient;
use crate::secret;
use crate::server::rate_limit::LimitCategory;
use crate::server::{ApiError, AppState, ClientIp, RequireAdmin};

#[derive(Deserialize)]
pub struct SettingsRequest {
    #[serde(default)]
    pub api_key: Option<String>,
    pub gateway_host: String,
    pub gateway_ws_url: String,
}

#[derive(Deserialize, Default)]
pub struct TestRequest {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub gateway_host: Option<String>,
}

fn settings_body(settings: &crate::runtimes::AppSettings) -> Json<Value> {
    Json(json!({
        "gateway_host": settings.gateway_host,
        "gateway_ws_url": settings.gateway_ws_url,
        "has_api_key": settings.gateway_api_key.is_some(),
        "is_setup_complete": settings.is_setup_complete,
        "updated_at": settings.updated_at,
    }))
}

/// `GET /api/settings`.
pub async fn get_settings(
    _admin: RequireAdmin,
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
) -> Result<Json<Value>, ApiError> {
    state.limit(LimitCategory::Read, ip)?;
    let settings = state.engine.store().settings().await?;
    Ok(settings_body(&settings))
}

/// `PUT /api/settings` — omitting `api_key` keeps the stored key.
pub async fn update_settings(
    _admin: RequireAdmin,
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(request): Json<SettingsRequest>,
) -> Result<Json<Value>, ApiError> {
    state.limit(LimitCategory::Mutate, ip)?;
    let sealed = request
        .api_key
        .as_deref()
        .filter(|key| !key.is_empty())
        .map(secret::seal);
    let settings = state
        .engine
        .store()
        .update_gateway_settings(
            sealed.as_deref(),
            &request.gateway_host,
            &request.gateway_ws_url,
        )
        .await?;
    Ok(settings_body(&settings))
}

/// `POST /api/settings/test` — probe the gateway with the provided
/// credentials, falling back to the stored ones.
pub async fn test_settings(
    _admin: RequireAdmin,
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(request): Json<TestRequest>,
) -> Result<Json<Value>, ApiError> {
    state.limit(LimitCategory::Mutate, ip)?;
    let settings = state.engine.store().settings().await?;
    let api_key = match request.api_key.filter(|key| !key.is_empty()) {
        Some(key) => key,
        None => settings
            .gateway_api_key
            .as_deref()
            .and_then(secret::open)
            .ok_or_else(|| ApiError::bad_request("Gateway not configured"))?,
    };
    let host = request.gateway_host.unwrap_or(settings.gateway_host);
    let client = GatewayClient::new(api_key, host);
    let envelope = client.test_connection().await;
    Ok(Json(envelope.to_value()))
}
