//! Typed client for the brokerage gateway.
//!
//! The gateway exposes a JSON-over-HTTP API plus a streaming socket for
//! market data. Every REST call returns an [`Envelope`] — on transport
//! failure the client folds the error into an `Envelope` with
//! `status: "error"` instead of propagating it, so node handlers never see
//! a transport `Err` across this boundary.
//!
//! Submodules:
//! - [`rest`]: one method per gateway operation
//! - [`stream`]: the process-global streaming client
//! - [`types`]: request payload types shared by handlers and the client

pub mod rest;
pub mod stream;
pub mod types;

pub use stream::{StreamClient, StreamMode};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

/// Strategy tag attached to every order-side gateway call.
pub const STRATEGY_TAG: &str = "TradeWeave";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The gateway's uniform response shape: `{status, data?, message?, …}`.
///
/// Fields beyond the common three are preserved in `extra` so handlers can
/// surface operation-specific keys (e.g. `quantity` on open-position).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Envelope {
    /// Build an error envelope, the client-side shape for transport and
    /// configuration failures.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            data: None,
            message: Some(message.into()),
            extra: Map::new(),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }

    /// Look up a key inside `data`, treating it as an object.
    #[must_use]
    pub fn data_field(&self, key: &str) -> Option<&Value> {
        self.data.as_ref()?.as_object()?.get(key)
    }

    /// Numeric field inside `data`, tolerating string-encoded numbers
    /// (the gateway stringifies some account figures).
    #[must_use]
    pub fn data_f64(&self, key: &str) -> Option<f64> {
        value_as_f64(self.data_field(key)?)
    }

    /// Top-level field outside the common trio.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }

    /// The envelope as a plain JSON value, for output-variable storage and
    /// execution logs.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Null)
    }
}

/// Coerce a JSON scalar to `f64`, accepting `"123.5"` string forms.
#[must_use]
pub fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// REST client for the gateway. Cheap to construct; one is built per
/// execution from the current settings so credential changes apply on the
/// next run.
#[derive(Clone, Debug)]
pub struct GatewayClient {
    http: reqwest::Client,
    host: String,
    api_key: String,
}

impl GatewayClient {
    #[must_use]
    pub fn new(api_key: impl Into<String>, host: impl Into<String>) -> Self {
        let host = host.into().trim_end_matches('/').to_string();
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            host,
            api_key: api_key.into(),
        }
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// POST a JSON body to `/api/v1/{endpoint}`, injecting the API key.
    /// Transport failures and non-JSON responses come back as error
    /// envelopes; this method never fails.
    pub(crate) async fn post(&self, endpoint: &str, body: Value) -> Envelope {
        let mut body = body;
        if let Value::Object(map) = &mut body {
            map.insert("apikey".to_string(), Value::String(self.api_key.clone()));
        }
        let url = format!("{}/api/v1/{}", self.host, endpoint);
        debug!(%endpoint, "gateway request");
        let response = match self.http.post(&url).json(&body).send().await {
            Ok(response) => response,
            Err(err) => return Envelope::error(format!("gateway request failed: {err}")),
        };
        match response.json::<Envelope>().await {
            Ok(envelope) => envelope,
            Err(err) => Envelope::error(format!("invalid gateway response: {err}")),
        }
    }

    /// Probe connectivity by fetching funds; used by the settings test
    /// endpoint.
    pub async fn test_connection(&self) -> Envelope {
        self.funds().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_field_accessors() {
        let envelope: Envelope = serde_json::from_value(json!({
            "status": "success",
            "data": {"ltp": "123.5", "volume": 100},
            "quantity": 5,
        }))
        .unwrap();
        assert!(envelope.is_success());
        assert_eq!(envelope.data_f64("ltp"), Some(123.5));
        assert_eq!(envelope.data_f64("volume"), Some(100.0));
        assert_eq!(envelope.field("quantity"), Some(&json!(5)));
        assert_eq!(envelope.data_f64("missing"), None);
    }

    #[test]
    fn error_envelope_shape() {
        let envelope = Envelope::error("boom");
        assert!(!envelope.is_success());
        assert_eq!(envelope.to_value()["status"], "error");
        assert_eq!(envelope.to_value()["message"], "boom");
    }

    #[tokio::test]
    async fn transport_failure_becomes_error_envelope() {
        // Nothing listens on this port.
        let client = GatewayClient::new("key", "http://127.0.0.1:1");
        let envelope = client.funds().await;
        assert_eq!(envelope.status, "error");
        assert!(envelope.message.unwrap().contains("gateway request failed"));
    }
}
