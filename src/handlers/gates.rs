//! Logic gates over upstream condition results.
//!
//! The traverser looks up `context.condition_results` for each incoming
//! edge's source node and hands the booleans here. Gates with no inputs
//! take their identity-ish defaults: AND/OR are false, NOT is true.

use serde_json::json;

use super::{HandlerReport, NodeExecutor};

impl NodeExecutor {
    pub(crate) fn and_gate(&mut self, inputs: &[bool]) -> HandlerReport {
        if inputs.is_empty() {
            self.log_warning("AND Gate: No input conditions found");
            return HandlerReport::success().with_condition(false);
        }
        let condition = inputs.iter().all(|&b| b);
        self.log_info(format!("AND Gate: inputs={inputs:?} -> {condition}"));
        HandlerReport::success()
            .with_condition(condition)
            .with_field("inputs", json!(inputs))
            .with_field("gate_type", json!("AND"))
    }

    pub(crate) fn or_gate(&mut self, inputs: &[bool]) -> HandlerReport {
        if inputs.is_empty() {
            self.log_warning("OR Gate: No input conditions found");
            return HandlerReport::success().with_condition(false);
        }
        let condition = inputs.iter().any(|&b| b);
        self.log_info(format!("OR Gate: inputs={inputs:?} -> {condition}"));
        HandlerReport::success()
            .with_condition(condition)
            .with_field("inputs", json!(inputs))
            .with_field("gate_type", json!("OR"))
    }

    /// NOT takes a single input; extra inputs are ignored.
    pub(crate) fn not_gate(&mut self, inputs: &[bool]) -> HandlerReport {
        if inputs.is_empty() {
            self.log_warning("NOT Gate: No input condition found");
            return HandlerReport::success().with_condition(true);
        }
        let condition = !inputs[0];
        self.log_info(format!("NOT Gate: input={} -> {condition}", inputs[0]));
        HandlerReport::success()
            .with_condition(condition)
            .with_field("input", json!(inputs[0]))
            .with_field("gate_type", json!("NOT"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{GatewayClient, StreamClient};

    fn executor() -> NodeExecutor {
        NodeExecutor::new(
            GatewayClient::new("k", "http://127.0.0.1:1"),
            StreamClient::new("ws://nowhere", "k"),
        )
    }

    #[test]
    fn and_gate_truth_table() {
        let mut executor = executor();
        assert_eq!(executor.and_gate(&[true, true]).condition, Some(true));
        assert_eq!(executor.and_gate(&[true, false]).condition, Some(false));
        assert_eq!(executor.and_gate(&[]).condition, Some(false));
    }

    #[test]
    fn or_gate_truth_table() {
        let mut executor = executor();
        assert_eq!(executor.or_gate(&[false, true]).condition, Some(true));
        assert_eq!(executor.or_gate(&[false, false]).condition, Some(false));
        assert_eq!(executor.or_gate(&[]).condition, Some(false));
    }

    #[test]
    fn not_gate_inverts_first_input() {
        let mut executor = executor();
        assert_eq!(executor.not_gate(&[true]).condition, Some(false));
        assert_eq!(executor.not_gate(&[false]).condition, Some(true));
        assert_eq!(executor.not_gate(&[false, true]).condition, Some(true));
        assert_eq!(executor.not_gate(&[]).condition, Some(true));
    }
}
