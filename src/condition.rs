//! Predicate evaluation for `when` guards and conditional steps
//!
//! Expressions are minijinja expressions evaluated against the run context:
//! `data.score > 5`, `steps.fetch.result.success`, `workflow == 'nightly'`.

use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConditionError {
    #[error("invalid expression '{expr}': {message}")]
    Syntax { expr: String, message: String },

    #[error("failed to evaluate '{expr}': {message}")]
    Evaluation { expr: String, message: String },
}

fn environment<'source>() -> Environment<'source> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Chainable);
    env
}

/// Check that an expression parses, without evaluating it
pub fn validate_expression(expr: &str) -> Result<(), ConditionError> {
    let expr = expr.trim();
    if expr.is_empty() {
        return Ok(());
    }

    environment()
        .compile_expression(expr)
        .map(|_| ())
        .map_err(|e| ConditionError::Syntax {
            expr: expr.to_string(),
            message: e.to_string(),
        })
}

/// Evaluate an expression against any serializable context
///
/// An empty expression is always true. Missing attributes are falsy, so
/// `data.flag` on a run without `flag` evaluates to false rather than failing.
pub fn evaluate_condition<S: Serialize>(expr: &str, ctx: &S) -> Result<bool, ConditionError> {
    let expr = expr.trim();
    if expr.is_empty() {
        return Ok(true);
    }

    let env = environment();
    let compiled = env
        .compile_expression(expr)
        .map_err(|e| ConditionError::Syntax {
            expr: expr.to_string(),
            message: e.to_string(),
        })?;

    let value = compiled
        .eval(minijinja::Value::from_serialize(ctx))
        .map_err(|e| ConditionError::Evaluation {
            expr: expr.to_string(),
            message: e.to_string(),
        })?;

    Ok(value.is_true())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> serde_json::Value {
        json!({
            "workflow": "review",
            "data": {"score": 7, "label": "ok", "tags": ["a", "b"]},
            "steps": {
                "fetch": {"status": "succeeded", "result": {"success": true, "data": {"count": 3}}}
            }
        })
    }

    #[test]
    fn test_empty_is_true() {
        assert!(evaluate_condition("", &ctx()).unwrap());
        assert!(evaluate_condition("   ", &ctx()).unwrap());
    }

    #[test]
    fn test_comparisons() {
        assert!(evaluate_condition("data.score > 5", &ctx()).unwrap());
        assert!(!evaluate_condition("data.score > 10", &ctx()).unwrap());
        assert!(evaluate_condition("data.label == 'ok'", &ctx()).unwrap());
        assert!(evaluate_condition("workflow == 'review'", &ctx()).unwrap());
    }

    #[test]
    fn test_step_results() {
        assert!(evaluate_condition("steps.fetch.result.success", &ctx()).unwrap());
        assert!(evaluate_condition("steps.fetch.result.data.count == 3", &ctx()).unwrap());
        assert!(evaluate_condition("steps.fetch.status == 'succeeded'", &ctx()).unwrap());
    }

    #[test]
    fn test_boolean_operators() {
        assert!(evaluate_condition("data.score > 5 and 'a' in data.tags", &ctx()).unwrap());
        assert!(evaluate_condition("not data.missing or false", &ctx()).unwrap());
        assert!(!evaluate_condition("(data.score < 5) or ('z' in data.tags)", &ctx()).unwrap());
    }

    #[test]
    fn test_missing_attribute_is_falsy() {
        assert!(!evaluate_condition("data.flag", &ctx()).unwrap());
        assert!(!evaluate_condition("steps.nope.result.success", &ctx()).unwrap());
    }

    #[test]
    fn test_syntax_error() {
        let err = evaluate_condition("data.score >", &ctx()).unwrap_err();
        assert!(matches!(err, ConditionError::Syntax { .. }));
        assert!(validate_expression("data.score >").is_err());
        assert!(validate_expression("data.score > 1").is_ok());
    }

    #[test]
    fn test_statements_are_not_expressions() {
        let injected = "true %}{% set x = 1 %}{% if true";
        assert!(validate_expression(injected).is_err());
        assert!(matches!(
            evaluate_condition(injected, &ctx()).unwrap_err(),
            ConditionError::Syntax { .. }
        ));
        assert!(validate_expression("data.score > 1 %}").is_err());
    }
}
