//! The variable mini-language and the math-expression handler.

use serde_json::{Map, Value, json};

use super::{HandlerReport, NodeExecutor};
use crate::expr;
use crate::gateway::value_as_f64;

/// Current numeric value of a variable for increment/decrement. Missing
/// and non-numeric values count as zero.
fn numeric(value: Option<&Value>) -> f64 {
    match value {
        Some(v) => value_as_f64(v).unwrap_or(0.0),
        None => 0.0,
    }
}

/// Numeric coercion for arithmetic mutation: missing/empty values take
/// the operation's identity, anything non-numeric is an error.
fn coerce_numeric(value: Option<&Value>, empty_default: f64) -> Result<f64, String> {
    let Some(value) = value else {
        return Ok(empty_default);
    };
    if value_is_empty(value) {
        return Ok(empty_default);
    }
    value_as_f64(value).ok_or_else(|| format!("could not convert {value} to a number"))
}

fn number(value: f64) -> Value {
    serde_json::Number::from_f64(value).map_or(Value::Null, Value::Number)
}

impl NodeExecutor {
    /// The `variable` node: one handler, an `operation` selector.
    pub(crate) fn variable(&mut self, data: &Map<String, Value>) -> HandlerReport {
        // The editor writes `variableName`; `name` is the legacy key.
        let var_name = self
            .context
            .get_str(data, "variableName", &self.context.get_str(data, "name", ""));
        let operation = self.context.get_str(data, "operation", "set");
        let raw_value = data.get("value").cloned().unwrap_or_else(|| json!(""));
        let source_var = self.context.get_str(data, "sourceVariable", "");

        let value = self.context.interpolate_value(&raw_value);

        let stored: Value = match operation.as_str() {
            "set" => {
                // JSON-looking strings are parsed so `set v = "[1,2]"`
                // stores a list, not a string.
                let value = match &value {
                    Value::String(s) if s.starts_with('{') || s.starts_with('[') => {
                        serde_json::from_str(s).unwrap_or(value.clone())
                    }
                    other => other.clone(),
                };
                self.context.set_variable(var_name.clone(), value.clone());
                self.log_info(format!("Set variable {var_name} = {value}"));
                value
            }

            "get" => {
                let source_value = self
                    .context
                    .variable(&source_var)
                    .cloned()
                    .unwrap_or_else(|| json!(""));
                if !var_name.is_empty() {
                    self.context
                        .set_variable(var_name.clone(), source_value.clone());
                    self.log_info(format!("Copied {source_var} to {var_name}"));
                }
                return HandlerReport::success()
                    .with_field("variable", json!(var_name))
                    .with_field("value", source_value);
            }

            "add" | "subtract" | "multiply" | "divide" => {
                let identity = if operation == "add" || operation == "subtract" {
                    0.0
                } else {
                    1.0
                };
                let current = match coerce_numeric(self.context.variable(&var_name), 0.0) {
                    Ok(n) => n,
                    Err(err) => {
                        self.log_error(format!("{operation} operation failed: {err}"));
                        return HandlerReport::error(err);
                    }
                };
                let operand = match coerce_numeric(Some(&value), identity) {
                    Ok(n) => n,
                    Err(err) => {
                        self.log_error(format!("{operation} operation failed: {err}"));
                        return HandlerReport::error(err);
                    }
                };
                let result = match operation.as_str() {
                    "add" => current + operand,
                    "subtract" => current - operand,
                    "multiply" => current * operand,
                    _ => {
                        if operand == 0.0 {
                            self.log_error("Division by zero error");
                            return HandlerReport::error("Division by zero");
                        }
                        current / operand
                    }
                };
                self.context.set_variable(var_name.clone(), number(result));
                self.log_info(format!("{operation} on {var_name}: {result}"));
                number(result)
            }

            "increment" | "decrement" => {
                let current = numeric(self.context.variable(&var_name));
                let result = if operation == "increment" {
                    current + 1.0
                } else {
                    current - 1.0
                };
                self.context.set_variable(var_name.clone(), number(result));
                self.log_info(format!("{operation}ed {var_name}: {result}"));
                number(result)
            }

            "append" => {
                let current = self
                    .context
                    .variable(&var_name)
                    .map(render_for_append)
                    .unwrap_or_default();
                let suffix = render_for_append(&value);
                let result = format!("{current}{suffix}");
                self.context
                    .set_variable(var_name.clone(), json!(result.clone()));
                self.log_info(format!("Appended to {var_name}: {result}"));
                json!(result)
            }

            "parse_json" => {
                let text = render_for_append(&value);
                match serde_json::from_str::<Value>(&text) {
                    Ok(parsed) => {
                        self.context.set_variable(var_name.clone(), parsed.clone());
                        self.log_info(format!("Parsed JSON into {var_name}"));
                        parsed
                    }
                    Err(err) => {
                        self.log_error(format!("JSON parse failed: {err}"));
                        return HandlerReport::error(format!("Invalid JSON: {err}"));
                    }
                }
            }

            "stringify" => {
                let source_value = self
                    .context
                    .variable(&source_var)
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                let text = source_value.to_string();
                self.context.set_variable(var_name.clone(), json!(text.clone()));
                self.log_info(format!("Stringified {source_var} into {var_name}"));
                json!(text)
            }

            other => {
                self.log_warning(format!("Unknown variable operation: {other}"));
                return HandlerReport::error(format!("Unknown operation: {other}"));
            }
        };

        HandlerReport::success()
            .with_field("variable", json!(var_name))
            .with_field("value", stored)
            .with_field("operation", json!(operation))
    }

    /// Evaluate a math expression (§`expr`) into `outputVariable`.
    pub(crate) fn math_expression(&mut self, data: &Map<String, Value>) -> HandlerReport {
        let expression = data
            .get("expression")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let output_var = self.context.get_str(data, "outputVariable", "result");

        if expression.is_empty() {
            self.log_error("No expression provided");
            return HandlerReport::error("No expression provided");
        }

        self.log_info(format!("Evaluating: {expression}"));
        let interpolated = self.context.interpolate(&expression);
        self.log_info(format!("Interpolated: {interpolated}"));

        match expr::evaluate(&interpolated) {
            Ok(result) => {
                self.context.set_variable(output_var.clone(), number(result));
                self.log_info(format!("Result: {output_var} = {result}"));
                HandlerReport::success()
                    .with_field("expression", json!(expression))
                    .with_field("interpolated", json!(interpolated))
                    .with_field("result", number(result))
                    .with_field("outputVariable", json!(output_var))
            }
            Err(err) => {
                self.log_error(format!("Math expression failed: {err}"));
                HandlerReport::error(err.to_string())
            }
        }
    }
}

fn value_is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// String form for append/parse: bare strings, JSON text otherwise.
fn render_for_append(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
