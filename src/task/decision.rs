//! Decision task: pick one of several options

use super::data::compare_values;
use super::types::{Task, TaskResult, matches_criteria};
use async_trait::async_trait;
use rand::Rng;
use serde_json::{Map, Value, json};

/// Selects from `options` using `decision_type`
///
/// - `simple`: first object option matching `criteria`, else the first option
/// - `weighted`: highest score against `criteria`, scaled by `weights`
/// - `random`: uniform choice
/// - `rule_based`: apply `rules` (`filter` / `sort`) in order, then take the first
#[derive(Debug, Clone)]
pub struct DecisionTask {
    name: String,
}

impl DecisionTask {
    pub fn new() -> Self {
        Self::named("decision")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for DecisionTask {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Task for DecisionTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Make decisions based on input criteria"
    }

    async fn execute(&self, params: &Map<String, Value>) -> TaskResult {
        let options = match params.get("options").and_then(Value::as_array) {
            Some(options) if !options.is_empty() => options,
            _ => return TaskResult::failure("No options provided for decision making"),
        };
        let criteria = object(params.get("criteria"));
        let decision_type = params
            .get("decision_type")
            .and_then(Value::as_str)
            .unwrap_or("simple");

        let decision = match decision_type {
            "simple" => simple(options, &criteria),
            "weighted" => weighted(options, &criteria, &object(params.get("weights"))),
            "random" => random(options),
            "rule_based" => {
                let rules = params
                    .get("rules")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                rule_based(options, &rules)
            }
            other => return TaskResult::failure(format!("Unknown decision type: {}", other)),
        };

        TaskResult::success(decision)
            .with_metadata("decision_type", decision_type)
            .with_metadata("options_count", options.len())
            .with_metadata("criteria_count", criteria.len())
    }
}

fn object(value: Option<&Value>) -> Map<String, Value> {
    value.and_then(Value::as_object).cloned().unwrap_or_default()
}

fn simple(options: &[Value], criteria: &Map<String, Value>) -> Value {
    let matching = (!criteria.is_empty())
        .then(|| {
            options.iter().find(|option| {
                option
                    .as_object()
                    .is_some_and(|map| matches_criteria(map, criteria))
            })
        })
        .flatten();

    let (selected, reason) = match matching {
        Some(option) => (option, format!("Meets criteria: {}", Value::Object(criteria.clone()))),
        None => (&options[0], "Default selection (first option)".to_string()),
    };

    json!({
        "selected_option": selected,
        "decision_method": "simple",
        "reasons": [reason],
    })
}

fn weighted(options: &[Value], criteria: &Map<String, Value>, weights: &Map<String, Value>) -> Value {
    let scores: Vec<Value> = options
        .iter()
        .enumerate()
        .map(|(index, option)| {
            let mut total = 0.0;
            let mut details = Map::new();

            if let Some(map) = option.as_object() {
                for (criterion, target) in criteria {
                    let weight = weights.get(criterion).and_then(Value::as_f64).unwrap_or(1.0);
                    let value = map.get(criterion).cloned().unwrap_or(json!(0));
                    let score = criterion_score(&value, target);
                    total += score * weight;
                    details.insert(
                        criterion.clone(),
                        json!({
                            "value": value,
                            "target": target,
                            "criterion_score": score,
                            "weight": weight,
                            "weighted_score": score * weight,
                        }),
                    );
                }
            }

            json!({
                "option": option,
                "index": index,
                "total_score": total,
                "score_details": details,
            })
        })
        .collect();

    let mut best = &scores[0];
    for candidate in &scores[1..] {
        if candidate["total_score"].as_f64() > best["total_score"].as_f64() {
            best = candidate;
        }
    }

    json!({
        "selected_option": best["option"],
        "decision_method": "weighted",
        "total_score": best["total_score"],
        "score_details": best["score_details"],
        "all_scores": scores,
    })
}

/// 1.0 for an exact match, linear closeness for numbers, 0.0 otherwise
fn criterion_score(value: &Value, target: &Value) -> f64 {
    if value == target {
        return 1.0;
    }
    match (value.as_f64(), target.as_f64()) {
        (Some(v), Some(t)) => {
            let max_diff = t.abs().max(1.0);
            (1.0 - (v - t).abs() / max_diff).max(0.0)
        }
        _ => 0.0,
    }
}

fn random(options: &[Value]) -> Value {
    let index = rand::rng().random_range(0..options.len());
    json!({
        "selected_option": options[index],
        "decision_method": "random",
        "reasons": ["Random selection"],
    })
}

fn rule_based(options: &[Value], rules: &[Value]) -> Value {
    let mut remaining: Vec<Value> = options.to_vec();

    for rule in rules {
        match rule.get("type").and_then(Value::as_str).unwrap_or("filter") {
            "filter" => {
                let criteria = object(rule.get("criteria"));
                let filtered: Vec<Value> = remaining
                    .iter()
                    .filter(|option| {
                        option
                            .as_object()
                            .is_some_and(|map| matches_criteria(map, &criteria))
                    })
                    .cloned()
                    .collect();
                if !filtered.is_empty() {
                    remaining = filtered;
                }
            }
            "sort" => {
                if let Some(key) = rule.get("key").and_then(Value::as_str) {
                    let zero = json!(0);
                    remaining.sort_by(|a, b| {
                        let a = a.get(key).unwrap_or(&zero);
                        let b = b.get(key).unwrap_or(&zero);
                        compare_values(a, b)
                    });
                    if rule.get("reverse").and_then(Value::as_bool).unwrap_or(false) {
                        remaining.reverse();
                    }
                }
            }
            _ => {}
        }
    }

    json!({
        "selected_option": remaining.first(),
        "decision_method": "rule_based",
        "rules_applied": rules.len(),
        "final_options_count": remaining.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn decide(params: Value) -> TaskResult {
        DecisionTask::new().execute(params.as_object().unwrap()).await
    }

    #[tokio::test]
    async fn test_no_options() {
        let result = decide(json!({"options": []})).await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_simple() {
        let options = json!([{"id": 1, "ok": false}, {"id": 2, "ok": true}]);
        let result = decide(json!({"options": options, "criteria": {"ok": true}})).await;
        assert_eq!(result.data["selected_option"]["id"], 2);

        let fallback = decide(json!({"options": options})).await;
        assert_eq!(fallback.data["selected_option"]["id"], 1);
        assert_eq!(fallback.data["reasons"][0], "Default selection (first option)");
    }

    #[tokio::test]
    async fn test_weighted() {
        let result = decide(json!({
            "decision_type": "weighted",
            "options": [{"cost": 100, "speed": 1}, {"cost": 50, "speed": 5}],
            "criteria": {"cost": 50, "speed": 5},
            "weights": {"speed": 2.0}
        }))
        .await;
        assert_eq!(result.data["selected_option"]["cost"], 50);
        assert_eq!(result.data["total_score"], 3.0);
        assert_eq!(result.data["all_scores"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_random_picks_an_option() {
        let options = json!(["a", "b", "c"]);
        let result = decide(json!({"decision_type": "random", "options": options})).await;
        assert!(options.as_array().unwrap().contains(&result.data["selected_option"]));
    }

    #[tokio::test]
    async fn test_rule_based() {
        let result = decide(json!({
            "decision_type": "rule_based",
            "options": [
                {"name": "a", "tier": "gold", "price": 30},
                {"name": "b", "tier": "gold", "price": 10},
                {"name": "c", "tier": "silver", "price": 5}
            ],
            "rules": [
                {"type": "filter", "criteria": {"tier": "gold"}},
                {"type": "sort", "key": "price"}
            ]
        }))
        .await;
        assert_eq!(result.data["selected_option"]["name"], "b");
        assert_eq!(result.data["final_options_count"], 2);
        assert_eq!(result.data["rules_applied"], 2);
    }

    #[tokio::test]
    async fn test_unknown_type() {
        let result = decide(json!({"decision_type": "coin", "options": [1]})).await;
        assert_eq!(result.error.as_deref(), Some("Unknown decision type: coin"));
    }
}
