//! Symbol search and quote proxy onto the gateway.

use axum::Json;
use axum::extract::{Query, State};
use serde::Deserialize;
use serde_json::Value;

use crate::gateway::GatewayClient;
use crate::secret;
use crate::server::rate_limit::LimitCategory;
use crate::server::{ApiError, AppState, ClientIp, RequireAdmin};

#[derive(Deserialize)]
pub struct SearchQuery {
    pub query: String,
    #[serde(default = "default_exchange")]
    pub exchange: String,
}

#[derive(Deserialize)]
pub struct QuotesQuery {
    pub symbol: String,
    #[serde(default = "default_exchange")]
    pub exchange: String,
}

fn default_exchange() -> String {
    "NSE".to_string()
}

async fn gateway_from_settings(state: &AppState) -> Result<GatewayClient, ApiError> {
    let settings = state.engine.store().settings().await?;
    let api_key = settings
        .gateway_api_key
        .as_deref()
        .and_then(secret::open)
        .ok_or_else(|| ApiError::bad_request("Gateway not configured"))?;
    Ok(GatewayClient::new(api_key, settings.gateway_host))
}

/// `GET /api/symbols/search?query=…&exchange=…`.
pub async fn search(
    _admin: RequireAdmin,
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Value>, ApiError> {
    state.limit(LimitCategory::Read, ip)?;
    let gateway = gateway_from_settings(&state).await?;
    let envelope = gateway.search(&query.query, &query.exchange).await;
    Ok(Json(envelope.to_value()))
}

/// `GET /api/symbols/quotes?symbol=…&exchange=…`.
pub async fn quotes(
    _admin: RequireAdmin,
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Query(query): Query<QuotesQuery>,
) -> Result<Json<Value>, ApiError> {
    state.limit(LimitCategory::Read, ip)?;
    let gateway = gateway_from_settings(&state).await?;
    let envelope = gateway.quotes(&query.symbol, &query.exchange).await;
    Ok(Json(envelope.to_value()))
}
