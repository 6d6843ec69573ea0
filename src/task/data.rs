//! Data processing task: filter, aggregate, sort and validate JSON data

use super::types::{Task, TaskResult, matches_criteria, type_name, value_size};
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::cmp::Ordering;
use tracing::warn;

/// Applies a list of `operations` to `data` in order
///
/// Parameters:
/// - `data`: input (required)
/// - `operations`: `passthrough`, `filter`, `aggregate`, `sort`, `validate`
/// - `filter_criteria`: object of key/value pairs list items must match
/// - `aggregation_function`: `count`, `sum`, `avg`, `min`, `max`
/// - `sort_key`, `reverse`: sort options
/// - `validation_schema`: `{type, min_length, max_length}`
#[derive(Debug, Clone)]
pub struct DataProcessingTask {
    name: String,
}

impl DataProcessingTask {
    pub fn new() -> Self {
        Self::named("data_processing")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for DataProcessingTask {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Task for DataProcessingTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Process data using specified operations"
    }

    async fn execute(&self, params: &Map<String, Value>) -> TaskResult {
        let data = match params.get("data") {
            Some(Value::Null) | None => return TaskResult::failure("No input data provided"),
            Some(data) => data,
        };

        let operations: Vec<&str> = match params.get("operations").and_then(Value::as_array) {
            Some(ops) => ops.iter().filter_map(Value::as_str).collect(),
            None => vec!["passthrough"],
        };

        let mut processed = data.clone();
        let mut applied = Vec::new();

        for operation in operations {
            match operation {
                "passthrough" => {}
                "filter" => {
                    let criteria = object_param(params, "filter_criteria");
                    processed = filter(processed, &criteria);
                }
                "aggregate" => {
                    let function = params
                        .get("aggregation_function")
                        .and_then(Value::as_str)
                        .unwrap_or("count");
                    processed = aggregate(processed, function);
                }
                "sort" => {
                    let key = params.get("sort_key").and_then(Value::as_str);
                    let reverse = params.get("reverse").and_then(Value::as_bool).unwrap_or(false);
                    processed = sort(processed, key, reverse);
                }
                "validate" => {
                    let schema = object_param(params, "validation_schema");
                    let errors = validate(&processed, &schema);
                    if !errors.is_empty() {
                        return TaskResult::failure(format!(
                            "Data validation failed: {}",
                            errors.join("; ")
                        ));
                    }
                }
                other => {
                    warn!(operation = other, "unknown data operation, skipping");
                    continue;
                }
            }

            applied.push(json!({
                "operation": operation,
                "success": true,
                "data_size": value_size(&processed),
            }));
        }

        TaskResult::success(processed.clone())
            .with_metadata("original_data_size", value_size(data))
            .with_metadata("processed_data_size", value_size(&processed))
            .with_metadata("operations_applied", applied)
    }
}

fn object_param(params: &Map<String, Value>, key: &str) -> Map<String, Value> {
    params
        .get(key)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

/// Keep list items whose fields match `criteria`; non-object items always pass
fn filter(data: Value, criteria: &Map<String, Value>) -> Value {
    match data {
        Value::Array(items) if !criteria.is_empty() => Value::Array(
            items
                .into_iter()
                .filter(|item| match item {
                    Value::Object(map) => matches_criteria(map, criteria),
                    _ => true,
                })
                .collect(),
        ),
        other => other,
    }
}

fn aggregate(data: Value, function: &str) -> Value {
    let Value::Array(items) = data else {
        return data;
    };

    let numbers: Option<Vec<f64>> = items.iter().map(Value::as_f64).collect();

    match (function, numbers) {
        ("sum", Some(nums)) => json!({"sum": nums.iter().sum::<f64>()}),
        ("avg", Some(nums)) => {
            let average = if nums.is_empty() {
                0.0
            } else {
                nums.iter().sum::<f64>() / nums.len() as f64
            };
            json!({"average": average})
        }
        ("min", _) if !items.is_empty() => {
            json!({"minimum": items.iter().min_by(|a, b| compare_values(a, b))})
        }
        ("max", _) if !items.is_empty() => {
            json!({"maximum": items.iter().max_by(|a, b| compare_values(a, b))})
        }
        _ => json!({"count": items.len()}),
    }
}

fn sort(data: Value, key: Option<&str>, reverse: bool) -> Value {
    let Value::Array(mut items) = data else {
        return data;
    };

    match key {
        Some(key) if items.iter().all(Value::is_object) => {
            let zero = json!(0);
            items.sort_by(|a, b| {
                compare_values(a.get(key).unwrap_or(&zero), b.get(key).unwrap_or(&zero))
            });
        }
        _ => items.sort_by(compare_values),
    }

    if reverse {
        items.reverse();
    }
    Value::Array(items)
}

fn validate(data: &Value, schema: &Map<String, Value>) -> Vec<String> {
    let mut errors = Vec::new();

    if let Some(expected) = schema.get("type").and_then(Value::as_str) {
        let actual = type_name(data);
        let ok = match expected {
            "int" => data.is_i64() || data.is_u64(),
            "float" | "number" => data.is_number(),
            other => actual == other,
        };
        if !ok {
            errors.push(format!("Expected {}, got {}", expected, actual));
        }
    }

    let sized = matches!(data, Value::Array(_) | Value::Object(_) | Value::String(_));
    if sized {
        let len = value_size(data);
        if let Some(min) = schema.get("min_length").and_then(Value::as_u64) {
            if (len as u64) < min {
                errors.push(format!("Length {} is less than minimum {}", len, min));
            }
        }
        if let Some(max) = schema.get("max_length").and_then(Value::as_u64) {
            if len as u64 > max {
                errors.push(format!("Length {} is greater than maximum {}", len, max));
            }
        }
    }

    errors
}

/// Total order over JSON values: numbers numerically, strings lexically,
/// mixed types by type rank
pub(crate) fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}
