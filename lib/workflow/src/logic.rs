//! Evaluation of `if`, `switch` and `loop` nodes.

use crate::error::{ErrorCause, NodeExecutionError};
use crate::expression::{Expression, Scope};
use crate::node::{DEFAULT_OUTPUT_PORT, LogicConfig, NodeId, SWITCH_DEFAULT_PORT};
use serde_json::{Value as JsonValue, json};

/// Result of evaluating a logic node.
#[derive(Debug, Clone, PartialEq)]
pub struct LogicOutcome {
    pub output: JsonValue,
    /// The single port the node emits on.
    pub port: String,
}

fn parse(node_id: &NodeId, source: &str) -> Result<Expression, NodeExecutionError> {
    Expression::parse(source).map_err(|e| {
        NodeExecutionError::new(
            node_id.clone(),
            e.to_string(),
            ErrorCause::Expression {
                expression: source.to_string(),
            },
        )
    })
}

/// Text a switch value is matched against cases with.
fn case_key(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Evaluates a logic node against its resolved input (bound to `$`).
///
/// # Errors
///
/// Fails when an expression does not parse, or a loop's items are neither an
/// array nor null.
pub fn evaluate(
    node_id: &NodeId,
    config: &LogicConfig,
    scope: &Scope<'_>,
) -> Result<LogicOutcome, NodeExecutionError> {
    let data = scope.current.clone();
    match config {
        LogicConfig::If { condition } => {
            let result = parse(node_id, condition)?.evaluate_bool(scope);
            let branch = if result { "true" } else { "false" };
            Ok(LogicOutcome {
                output: json!({ "branch": branch, "result": result, "data": data }),
                port: branch.to_string(),
            })
        }
        LogicConfig::Switch { expression, cases } => {
            let value = parse(node_id, expression)?.evaluate(scope);
            let key = case_key(&value);
            let branch = cases
                .iter()
                .find(|case| **case == key)
                .map_or(SWITCH_DEFAULT_PORT, String::as_str)
                .to_string();
            Ok(LogicOutcome {
                output: json!({ "branch": branch, "result": value, "data": data }),
                port: branch,
            })
        }
        LogicConfig::Loop { items } => {
            let items_value = match parse(node_id, items)?.evaluate(scope) {
                JsonValue::Array(values) => values,
                JsonValue::Null => Vec::new(),
                other => {
                    return Err(NodeExecutionError::new(
                        node_id.clone(),
                        format!("loop items must be an array, got {other}"),
                        ErrorCause::Expression {
                            expression: items.clone(),
                        },
                    ));
                }
            };
            let count = items_value.len();
            Ok(LogicOutcome {
                output: json!({ "items": items_value, "count": count, "data": data }),
                port: DEFAULT_OUTPUT_PORT.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn run(config: LogicConfig, input: JsonValue) -> Result<LogicOutcome, NodeExecutionError> {
        let run_input = json!({ "tier": "gold" });
        let nodes = HashMap::new();
        let scope = Scope {
            current: &input,
            run: &run_input,
            nodes: &nodes,
        };
        evaluate(&NodeId::from("logic"), &config, &scope)
    }

    #[test]
    fn if_selects_branch_port() {
        let config = LogicConfig::If {
            condition: "score > 70".to_string(),
        };

        let outcome = run(config.clone(), json!({ "score": 40 })).expect("evaluate");
        assert_eq!(outcome.port, "false");
        assert_eq!(
            outcome.output,
            json!({ "branch": "false", "result": false, "data": { "score": 40 } })
        );

        let outcome = run(config, json!({ "score": 90 })).expect("evaluate");
        assert_eq!(outcome.port, "true");
    }

    #[test]
    fn switch_matches_cases_or_falls_back() {
        let config = LogicConfig::Switch {
            expression: "run.tier".to_string(),
            cases: vec!["bronze".to_string(), "gold".to_string()],
        };
        let outcome = run(config, json!(null)).expect("evaluate");
        assert_eq!(outcome.port, "gold");
        assert_eq!(outcome.output["result"], "gold");

        let config = LogicConfig::Switch {
            expression: "priority".to_string(),
            cases: vec!["1".to_string()],
        };
        assert_eq!(run(config.clone(), json!({ "priority": 1 })).expect("eval").port, "1");
        assert_eq!(
            run(config, json!({ "priority": 2 })).expect("eval").port,
            SWITCH_DEFAULT_PORT
        );
    }

    #[test]
    fn loop_collects_items() {
        let config = LogicConfig::Loop {
            items: "rows".to_string(),
        };
        let outcome = run(config.clone(), json!({ "rows": [1, 2, 3] })).expect("evaluate");
        assert_eq!(outcome.output["count"], 3);
        assert_eq!(outcome.port, DEFAULT_OUTPUT_PORT);

        let outcome = run(config.clone(), json!({})).expect("missing is empty");
        assert_eq!(outcome.output["count"], 0);

        let err = run(config, json!({ "rows": "nope" })).expect_err("not a list");
        assert!(matches!(err.cause, ErrorCause::Expression { .. }));
    }

    #[test]
    fn unparsable_condition_is_a_node_error() {
        let err = run(
            LogicConfig::If {
                condition: "a ==".to_string(),
            },
            json!({}),
        )
        .expect_err("parse error");
        assert_eq!(err.node_id.as_str(), "logic");
        assert_eq!(
            err.cause,
            ErrorCause::Expression {
                expression: "a ==".to_string(),
            }
        );
    }
}
