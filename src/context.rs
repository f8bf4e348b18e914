//! Per-execution variable context and template interpolation.
//!
//! Every execution owns exactly one [`WorkflowContext`]; it is dropped when
//! the run completes and is never shared between executions, so it carries
//! no internal synchronization. Two mappings live here: named variables
//! (arbitrary JSON values) and the condition-result memo that logic gates
//! read by upstream node id.
//!
//! # Template language
//!
//! Strings may embed `{{ path }}` placeholders. Resolution order:
//!
//! 1. A fixed set of clock builtins (`date`, `time`, `weekday`, …).
//! 2. A dotted path descending through the variable map, treating
//!    intermediate values as JSON objects.
//!
//! Unresolvable placeholders are left verbatim — interpolation is
//! fail-soft by design so a half-configured graph still runs.

use chrono::Local;
use rustc_hash::FxHashMap;
use serde_json::{Map, Value};

/// Per-execution mapping of names to values plus the condition memo.
#[derive(Debug, Default)]
pub struct WorkflowContext {
    variables: FxHashMap<String, Value>,
    condition_results: FxHashMap<String, bool>,
}

impl WorkflowContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }

    #[must_use]
    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn set_condition_result(&mut self, node_id: impl Into<String>, result: bool) {
        self.condition_results.insert(node_id.into(), result);
    }

    #[must_use]
    pub fn condition_result(&self, node_id: &str) -> Option<bool> {
        self.condition_results.get(node_id).copied()
    }

    /// Clock builtins, rendered from the current local wall clock.
    fn builtin_variable(name: &str) -> Option<String> {
        let now = Local::now();
        let rendered = match name {
            "timestamp" => now.format("%Y-%m-%d %H:%M:%S").to_string(),
            "date" => now.format("%Y-%m-%d").to_string(),
            "time" => now.format("%H:%M:%S").to_string(),
            "year" => now.format("%Y").to_string(),
            "month" => now.format("%m").to_string(),
            "day" => now.format("%d").to_string(),
            "hour" => now.format("%H").to_string(),
            "minute" => now.format("%M").to_string(),
            "second" => now.format("%S").to_string(),
            "weekday" => now.format("%A").to_string(),
            "iso_timestamp" => now.to_rfc3339(),
            _ => return None,
        };
        Some(rendered)
    }

    /// Resolve a dotted path against the variable map. `None` means the
    /// path (or any intermediate step) is missing, and the caller keeps
    /// the literal placeholder.
    fn lookup_path(&self, path: &str) -> Option<String> {
        let mut parts = path.split('.');
        let first = parts.next()?;
        let mut value = self.variables.get(first)?;
        for part in parts {
            value = value.as_object()?.get(part)?;
        }
        render_value(value)
    }

    /// Substitute every `{{ path }}` occurrence in `text`.
    ///
    /// Builtins win over user variables; unknown paths stay literal. An
    /// unterminated `{{` is copied through unchanged.
    #[must_use]
    pub fn interpolate(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(open) = rest.find("{{") {
            out.push_str(&rest[..open]);
            let after_open = &rest[open + 2..];
            let Some(close) = after_open.find("}}") else {
                out.push_str(&rest[open..]);
                return out;
            };
            let raw = &after_open[..close];
            let path = raw.trim();
            let replacement = Self::builtin_variable(path).or_else(|| self.lookup_path(path));
            match replacement {
                Some(value) => out.push_str(&value),
                None => {
                    out.push_str("{{");
                    out.push_str(raw);
                    out.push_str("}}");
                }
            }
            rest = &after_open[close + 2..];
        }
        out.push_str(rest);
        out
    }

    /// Interpolate a JSON value: strings are substituted (with a numeric
    /// coercion attempt, so `"{{qty}}"` can feed an integer field); all
    /// other value types pass through unchanged.
    #[must_use]
    pub fn interpolate_value(&self, value: &Value) -> Value {
        let Value::String(s) = value else {
            return value.clone();
        };
        let interpolated = self.interpolate(s);
        if let Ok(n) = interpolated.parse::<i64>() {
            return Value::from(n);
        }
        if let Ok(f) = interpolated.parse::<f64>() {
            if let Some(n) = serde_json::Number::from_f64(f) {
                return Value::Number(n);
            }
        }
        Value::String(interpolated)
    }

    /// Interpolated string lookup from a node's data bag. Missing or empty
    /// values yield `default`.
    #[must_use]
    pub fn get_str(&self, data: &Map<String, Value>, key: &str, default: &str) -> String {
        match data.get(key) {
            Some(Value::String(s)) if !s.is_empty() => self.interpolate(s),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            _ => default.to_string(),
        }
    }

    /// Interpolated integer lookup. String values are interpolated then
    /// parsed as a float and truncated, so `"1.0"` and `"{{qty}}"` both
    /// work; coercion failure yields `default`.
    #[must_use]
    pub fn get_int(&self, data: &Map<String, Value>, key: &str, default: i64) -> i64 {
        match data.get(key) {
            Some(Value::String(s)) if !s.is_empty() => self
                .interpolate(s)
                .parse::<f64>()
                .map(|f| f as i64)
                .unwrap_or(default),
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .unwrap_or(default),
            _ => default,
        }
    }

    /// Interpolated float lookup with the same fallback rules as
    /// [`get_int`](Self::get_int).
    #[must_use]
    pub fn get_float(&self, data: &Map<String, Value>, key: &str, default: f64) -> f64 {
        match data.get(key) {
            Some(Value::String(s)) if !s.is_empty() => {
                self.interpolate(s).parse::<f64>().unwrap_or(default)
            }
            Some(Value::Number(n)) => n.as_f64().unwrap_or(default),
            _ => default,
        }
    }
}

/// String form of a variable value for substitution into templates.
/// Strings render bare (no quotes), scalars via their display form,
/// compound values as compact JSON. `null` counts as missing.
fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_text_passes_through() {
        let ctx = WorkflowContext::new();
        assert_eq!(ctx.interpolate("no placeholders here"), "no placeholders here");
    }

    #[test]
    fn substitutes_set_variable() {
        let mut ctx = WorkflowContext::new();
        ctx.set_variable("x", json!(42));
        assert_eq!(ctx.interpolate("{{x}}"), "42");
        ctx.set_variable("name", json!("RELIANCE"));
        assert_eq!(ctx.interpolate("sym={{ name }}"), "sym=RELIANCE");
    }

    #[test]
    fn unknown_placeholder_stays_literal() {
        let ctx = WorkflowContext::new();
        assert_eq!(ctx.interpolate("{{missing}}"), "{{missing}}");
        assert_eq!(ctx.interpolate("a {{missing.deep}} b"), "a {{missing.deep}} b");
    }

    #[test]
    fn unterminated_placeholder_is_untouched() {
        let ctx = WorkflowContext::new();
        assert_eq!(ctx.interpolate("{{open"), "{{open");
    }

    #[test]
    fn dotted_path_descends_objects() {
        let mut ctx = WorkflowContext::new();
        ctx.set_variable("quote", json!({"data": {"ltp": 123.5}}));
        assert_eq!(ctx.interpolate("{{quote.data.ltp}}"), "123.5");
        // Descending through a non-object leaves the placeholder.
        assert_eq!(ctx.interpolate("{{quote.data.ltp.deeper}}"), "{{quote.data.ltp.deeper}}");
    }

    #[test]
    fn null_counts_as_missing() {
        let mut ctx = WorkflowContext::new();
        ctx.set_variable("gone", Value::Null);
        assert_eq!(ctx.interpolate("{{gone}}"), "{{gone}}");
    }

    #[test]
    fn builtins_have_expected_shape() {
        let ctx = WorkflowContext::new();
        let date = ctx.interpolate("{{date}}");
        assert_eq!(date.len(), 10);
        assert_eq!(date.as_bytes()[4], b'-');
        let time = ctx.interpolate("{{time}}");
        assert_eq!(time.len(), 8);
        assert!(!ctx.interpolate("{{weekday}}").contains("{{"));
    }

    #[test]
    fn builtins_shadow_user_variables() {
        let mut ctx = WorkflowContext::new();
        ctx.set_variable("date", json!("not-a-date"));
        assert_ne!(ctx.interpolate("{{date}}"), "not-a-date");
    }

    #[test]
    fn typed_getters_coerce_and_default() {
        let mut ctx = WorkflowContext::new();
        ctx.set_variable("qty", json!("7"));
        let mut data = Map::new();
        data.insert("quantity".to_string(), json!("{{qty}}"));
        data.insert("price".to_string(), json!("12.5"));
        data.insert("bad".to_string(), json!("oops"));
        assert_eq!(ctx.get_int(&data, "quantity", 1), 7);
        assert_eq!(ctx.get_float(&data, "price", 0.0), 12.5);
        assert_eq!(ctx.get_int(&data, "bad", 3), 3);
        assert_eq!(ctx.get_int(&data, "absent", 9), 9);
        assert_eq!(ctx.get_str(&data, "absent", "NSE"), "NSE");
    }

    #[test]
    fn get_int_truncates_float_strings() {
        let ctx = WorkflowContext::new();
        let mut data = Map::new();
        data.insert("qty".to_string(), json!("2.9"));
        assert_eq!(ctx.get_int(&data, "qty", 0), 2);
    }

    #[test]
    fn condition_memo() {
        let mut ctx = WorkflowContext::new();
        assert_eq!(ctx.condition_result("n1"), None);
        ctx.set_condition_result("n1", true);
        assert_eq!(ctx.condition_result("n1"), Some(true));
    }

    #[test]
    fn interpolate_value_coerces_numerics() {
        let mut ctx = WorkflowContext::new();
        ctx.set_variable("n", json!(5));
        assert_eq!(ctx.interpolate_value(&json!("{{n}}")), json!(5));
        assert_eq!(ctx.interpolate_value(&json!("{{n}}.5")), json!(5.5));
        assert_eq!(ctx.interpolate_value(&json!(true)), json!(true));
    }
}
