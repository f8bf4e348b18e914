//! Control handlers: delay, wait-until, log, and outbound HTTP requests.
//!
//! These are the engine's suspension points: they block the execution
//! worker but nothing else.

use chrono::Local;
use serde_json::{Map, Value, json};
use std::time::Duration;

use super::{HandlerReport, NodeExecutor};
use crate::utils::clock::{parse_naive_time, seconds_since_midnight};

impl NodeExecutor {
    /// Sleep for `delayValue` × `delayUnit`. The legacy `delayMs` field is
    /// honored when the new pair is absent.
    pub(crate) async fn delay(&mut self, data: &Map<String, Value>) -> HandlerReport {
        let (duration, display) = if data.contains_key("delayValue") {
            let value = self.context.get_int(data, "delayValue", 0).max(0) as u64;
            let unit = self.context.get_str(data, "delayUnit", "seconds");
            match unit.as_str() {
                "minutes" => (Duration::from_secs(value * 60), format!("{value} minute(s)")),
                "hours" => (Duration::from_secs(value * 3600), format!("{value} hour(s)")),
                _ => (Duration::from_secs(value), format!("{value} second(s)")),
            }
        } else {
            let ms = self.context.get_int(data, "delayMs", 1000).max(0) as u64;
            (Duration::from_millis(ms), format!("{ms}ms"))
        };

        self.log_info(format!("Waiting for {display}"));
        tokio::time::sleep(duration).await;
        self.log_info("Delay complete");
        HandlerReport::success().with_message(format!("Waited {display}"))
    }

    /// Block until the wall clock reaches `targetTime` (HH:MM[:SS]).
    ///
    /// A target already in the past returns immediately with
    /// `waited: false`. Otherwise the handler wakes on a check interval
    /// rather than one long sleep, so clock adjustments are noticed.
    pub(crate) async fn wait_until(&mut self, data: &Map<String, Value>) -> HandlerReport {
        let target_str = self.context.get_str(data, "targetTime", "09:30");
        let check_interval_ms = self.context.get_int(data, "checkIntervalMs", 1000).max(1) as u64;

        let target = parse_naive_time(&target_str, 9, 30);
        let target_seconds = seconds_since_midnight(target);

        let now = Local::now().time();
        let now_seconds = seconds_since_midnight(now);

        if now_seconds >= target_seconds {
            self.log_info(format!(
                "Wait Until: Target time {target_str} has already passed (current: {}), continuing...",
                now.format("%H:%M:%S")
            ));
            return HandlerReport::success()
                .with_message(format!("Target time {target_str} already passed"))
                .with_field("current_time", json!(now.format("%H:%M:%S").to_string()))
                .with_field("target_time", json!(target_str))
                .with_field("waited", json!(false));
        }

        self.log_info(format!(
            "Wait Until: Waiting for {target_str} (current: {}, ~{}s remaining)",
            now.format("%H:%M:%S"),
            target_seconds - now_seconds
        ));

        let check_interval = Duration::from_millis(check_interval_ms);
        loop {
            let now_seconds = seconds_since_midnight(Local::now().time());
            if now_seconds >= target_seconds {
                break;
            }
            let remaining = Duration::from_secs((target_seconds - now_seconds) as u64);
            tokio::time::sleep(check_interval.min(remaining)).await;
        }

        self.log_info(format!("Wait Until: Target time {target_str} reached"));
        HandlerReport::success()
            .with_message(format!("Waited until {target_str}"))
            .with_field(
                "current_time",
                json!(Local::now().time().format("%H:%M:%S").to_string()),
            )
            .with_field("target_time", json!(target_str))
            .with_field("waited", json!(true))
    }

    pub(crate) fn log_node(&mut self, data: &Map<String, Value>) -> HandlerReport {
        let message = self.context.get_str(data, "message", "");
        let level = match self.context.get_str(data, "level", "info").as_str() {
            "error" => crate::runtimes::records::LogLevel::Error,
            "warning" => crate::runtimes::records::LogLevel::Warning,
            _ => crate::runtimes::records::LogLevel::Info,
        };
        self.log(format!("[LOG] {message}"), level);
        HandlerReport::success().with_message(message)
    }

    /// Outbound HTTP request with interpolated URL, headers, and body.
    pub(crate) async fn http_request(&mut self, data: &Map<String, Value>) -> HandlerReport {
        let method = self.context.get_str(data, "method", "GET").to_uppercase();
        let url = self.context.get_str(data, "url", "");
        let timeout_secs = self.context.get_int(data, "timeout", 30).max(1) as u64;
        let content_type = self.context.get_str(data, "contentType", "application/json");

        if url.is_empty() {
            self.log_error("HTTP Request: No URL specified");
            return HandlerReport::error("No URL specified");
        }

        // Headers arrive as an object or as a JSON-encoded string.
        let mut headers: Vec<(String, String)> = Vec::new();
        match data.get("headers") {
            Some(Value::Object(map)) => {
                for (key, value) in map {
                    let rendered = match value {
                        Value::String(s) => self.context.interpolate(s),
                        other => other.to_string(),
                    };
                    headers.push((key.clone(), rendered));
                }
            }
            Some(Value::String(raw)) if !raw.is_empty() => {
                if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(raw) {
                    for (key, value) in map {
                        let rendered = value.as_str().map_or_else(|| value.to_string(), str::to_string);
                        headers.push((key, rendered));
                    }
                }
            }
            _ => {}
        }
        if !content_type.is_empty() && !headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("content-type")) {
            headers.push(("Content-Type".to_string(), content_type.clone()));
        }

        let body = match data.get("body") {
            Some(Value::String(s)) if !s.is_empty() => Some(self.context.interpolate(s)),
            _ => None,
        };

        self.log_info(format!("HTTP {method} {url}"));

        let method = match method.as_str() {
            "GET" => reqwest::Method::GET,
            "POST" => reqwest::Method::POST,
            "PUT" => reqwest::Method::PUT,
            "DELETE" => reqwest::Method::DELETE,
            "PATCH" => reqwest::Method::PATCH,
            other => {
                self.log_error(format!("HTTP Request: Unsupported method '{other}'"));
                return HandlerReport::error(format!("Unsupported method: {other}"));
            }
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        let mut request = client.request(method, &url);
        for (key, value) in &headers {
            request = request.header(key, value);
        }
        if let Some(body) = body {
            // JSON content is re-parsed so the server receives a JSON
            // payload rather than a quoted string; non-JSON falls back to
            // the raw body.
            if content_type == "application/json" {
                match serde_json::from_str::<Value>(&body) {
                    Ok(parsed) => request = request.json(&parsed),
                    Err(_) => request = request.body(body),
                }
            } else {
                request = request.body(body);
            }
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) if err.is_timeout() => {
                self.log_error(format!("HTTP Request timed out after {timeout_secs}s"));
                return HandlerReport::error(format!("Request timed out after {timeout_secs}s"));
            }
            Err(err) => {
                self.log_error(format!("HTTP Request failed: {err}"));
                return HandlerReport::error(err.to_string());
            }
        };

        let status_code = response.status().as_u16();
        let ok = response.status().is_success();
        let mut response_headers = Map::new();
        for (key, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                response_headers.insert(key.to_string(), json!(value));
            }
        }
        let text = response.text().await.unwrap_or_default();
        let payload = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));

        self.log_info(format!("HTTP Response: {status_code}"));
        let report = if ok {
            HandlerReport::success()
        } else {
            HandlerReport::error(format!("HTTP {status_code}"))
        }
        .with_field("statusCode", json!(status_code))
        .with_field("data", payload)
        .with_field("headers", Value::Object(response_headers));
        self.store_output(
            data,
            json!({
                "status": if ok { "success" } else { "error" },
                "statusCode": report.fields["statusCode"],
                "data": report.fields["data"],
                "headers": report.fields["headers"],
            }),
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{GatewayClient, StreamClient};
    use httpmock::prelude::*;
    use std::time::Instant;

    fn executor() -> NodeExecutor {
        NodeExecutor::new(
            GatewayClient::new("k", "http://127.0.0.1:1"),
            StreamClient::new("ws://nowhere", "k"),
        )
    }

    fn node(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn delay_sleeps_roughly_the_requested_time() {
        let mut executor = executor();
        let started = Instant::now();
        let report = executor
            .delay(&node(json!({"delayMs": 30})))
            .await;
        assert!(report.ok());
        assert!(started.elapsed() >= Duration::from_millis(25));
    }

    #[tokio::test]
    async fn delay_value_unit_takes_precedence() {
        let mut executor = executor();
        let report = executor
            .delay(&node(json!({"delayValue": 0, "delayUnit": "minutes", "delayMs": 99999})))
            .await;
        assert_eq!(report.message.as_deref(), Some("Waited 0 minute(s)"));
    }

    #[tokio::test]
    async fn wait_until_past_target_returns_immediately() {
        let mut executor = executor();
        // Five minutes ago, except right after midnight where that would
        // wrap to yesterday evening; midnight itself is always past.
        let now = Local::now();
        let past = if seconds_since_midnight(now.time()) >= 300 {
            (now - chrono::Duration::minutes(5))
                .time()
                .format("%H:%M:%S")
                .to_string()
        } else {
            "00:00:00".to_string()
        };
        let started = Instant::now();
        let report = executor
            .wait_until(&node(json!({"targetTime": past})))
            .await;
        assert!(report.ok());
        assert_eq!(report.fields.get("waited"), Some(&json!(false)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn http_request_interpolates_and_parses_json() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/hook")
                    .header("x-token", "secret-1")
                    .json_body(json!({"price": 42}));
                then.status(200).json_body(json!({"received": true}));
            })
            .await;

        let mut executor = executor();
        executor.context.set_variable("token", json!("secret-1"));
        executor.context.set_variable("price", json!(42));
        let report = executor
            .http_request(&node(json!({
                "method": "POST",
                "url": format!("{}/hook", server.base_url()),
                "headers": {"x-token": "{{token}}"},
                "body": "{\"price\": {{price}}}",
                "outputVariable": "resp",
            })))
            .await;
        mock.assert_async().await;
        assert!(report.ok());
        assert_eq!(report.fields["statusCode"], json!(200));
        assert_eq!(
            executor.context.variable("resp").unwrap()["data"]["received"],
            json!(true)
        );
    }

    #[tokio::test]
    async fn http_request_rejects_unknown_method() {
        let mut executor = executor();
        let report = executor
            .http_request(&node(json!({"method": "TRACE", "url": "http://example.invalid"})))
            .await;
        assert!(!report.ok());
        assert!(report.message.unwrap().contains("Unsupported method"));
    }

    #[tokio::test]
    async fn http_request_requires_url() {
        let mut executor = executor();
        let report = executor.http_request(&node(json!({"method": "GET"}))).await;
        assert!(!report.ok());
    }
}
