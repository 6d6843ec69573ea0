//! Analysis task: structural, statistical and text analysis of JSON data

use super::types::{Task, TaskResult, type_name, value_size};
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::collections::{BTreeSet, HashMap, HashSet};

const TOP_WORDS: usize = 10;

/// Analyzes `data` according to `analysis_type` (`basic`, `statistical`, `text`)
#[derive(Debug, Clone)]
pub struct AnalysisTask {
    name: String,
}

impl AnalysisTask {
    pub fn new() -> Self {
        Self::named("analysis")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for AnalysisTask {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Task for AnalysisTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Perform analysis on input data"
    }

    async fn execute(&self, params: &Map<String, Value>) -> TaskResult {
        let data = match params.get("data") {
            Some(Value::Null) | None => {
                return TaskResult::failure("No input data provided for analysis");
            }
            Some(data) => data,
        };

        let analysis_type = params
            .get("analysis_type")
            .and_then(Value::as_str)
            .unwrap_or("basic");

        let analysis = match analysis_type {
            "basic" => basic(data),
            "statistical" => statistical(data),
            "text" => text(data),
            other => return TaskResult::failure(format!("Unknown analysis type: {}", other)),
        };

        TaskResult::success(analysis)
            .with_metadata("analysis_type", analysis_type)
            .with_metadata("input_data_type", type_name(data))
            .with_metadata("input_size", value_size(data))
    }
}

fn basic(data: &Value) -> Value {
    let mut analysis = Map::new();
    analysis.insert("data_type".into(), type_name(data).into());

    match data {
        Value::Array(items) => {
            analysis.insert("length".into(), items.len().into());
            let types: BTreeSet<&str> = items.iter().map(type_name).collect();
            analysis.insert("element_types".into(), json!(types));
            if let (Some(first), Some(last)) = (items.first(), items.last()) {
                analysis.insert("first_element".into(), first.clone());
                analysis.insert("last_element".into(), last.clone());
            }
        }
        Value::Object(map) => {
            analysis.insert("length".into(), map.len().into());
            analysis.insert("keys".into(), json!(map.keys().collect::<Vec<_>>()));
            analysis.insert("key_count".into(), map.len().into());
        }
        Value::String(s) => {
            let chars = s.chars().count();
            analysis.insert("length".into(), chars.into());
            analysis.insert("character_count".into(), chars.into());
            analysis.insert("word_count".into(), s.split_whitespace().count().into());
            analysis.insert("line_count".into(), s.lines().count().into());
        }
        _ => {}
    }

    Value::Object(analysis)
}

fn statistical(data: &Value) -> Value {
    match data {
        Value::Array(items) => {
            let mut numbers: Vec<f64> = items.iter().filter_map(Value::as_f64).collect();
            if numbers.is_empty() {
                return json!({
                    "analysis_type": "statistical",
                    "error": "No numerical data found for statistical analysis",
                });
            }

            numbers.sort_by(|a, b| a.total_cmp(b));
            let count = numbers.len();
            let sum: f64 = numbers.iter().sum();
            let min = numbers[0];
            let max = numbers[count - 1];
            let median = if count % 2 == 0 {
                (numbers[count / 2 - 1] + numbers[count / 2]) / 2.0
            } else {
                numbers[count / 2]
            };

            json!({
                "analysis_type": "statistical",
                "count": count,
                "sum": sum,
                "mean": sum / count as f64,
                "min": min,
                "max": max,
                "range": max - min,
                "median": median,
            })
        }
        Value::Number(n) => {
            let value = n.as_f64().unwrap_or(0.0);
            json!({
                "analysis_type": "statistical",
                "value": data,
                "type": "single_number",
                "absolute_value": value.abs(),
                "is_positive": value > 0.0,
                "is_negative": value < 0.0,
                "is_zero": value == 0.0,
            })
        }
        other => json!({
            "analysis_type": "statistical",
            "error": format!("Statistical analysis not applicable to {}", type_name(other)),
        }),
    }
}

fn text(data: &Value) -> Value {
    match data {
        Value::String(s) => text_stats(s),
        Value::Array(items) if items.iter().all(Value::is_string) => {
            let strings: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
            let total_chars: usize = strings.iter().map(|s| s.chars().count()).sum();
            let total_words: usize = strings.iter().map(|s| s.split_whitespace().count()).sum();
            let average = if strings.is_empty() {
                0.0
            } else {
                total_chars as f64 / strings.len() as f64
            };

            json!({
                "analysis_type": "text",
                "string_count": strings.len(),
                "total_characters": total_chars,
                "total_words": total_words,
                "average_string_length": average,
                "longest_string": first_longest(&strings),
                "shortest_string": strings.iter().min_by_key(|s| s.chars().count()).copied().unwrap_or(""),
                "empty_strings": strings.iter().filter(|s| s.trim().is_empty()).count(),
            })
        }
        other => json!({
            "analysis_type": "text",
            "error": format!("Text analysis not applicable to {}", type_name(other)),
        }),
    }
}

fn text_stats(s: &str) -> Value {
    let words: Vec<&str> = s.split_whitespace().collect();
    let average_word_length = if words.is_empty() {
        0.0
    } else {
        words.iter().map(|w| w.chars().count()).sum::<usize>() as f64 / words.len() as f64
    };
    let unique: HashSet<String> = words.iter().map(|w| w.to_lowercase()).collect();

    json!({
        "analysis_type": "text",
        "character_count": s.chars().count(),
        "character_count_no_spaces": s.chars().filter(|c| *c != ' ').count(),
        "word_count": words.len(),
        "line_count": s.lines().count(),
        "paragraph_count": s.split("\n\n").filter(|p| !p.trim().is_empty()).count(),
        "average_word_length": average_word_length,
        "longest_word": first_longest(&words),
        "shortest_word": words.iter().min_by_key(|w| w.chars().count()).copied().unwrap_or(""),
        "unique_words": unique.len(),
        "is_empty": s.trim().is_empty(),
        "starts_with_uppercase": s.chars().next().is_some_and(char::is_uppercase),
        "contains_numbers": s.chars().any(|c| c.is_ascii_digit()),
        "contains_special_chars": s.chars().any(|c| !c.is_alphanumeric() && !c.is_whitespace()),
        "top_words": top_words(&words),
    })
}

/// First of the longest strings
fn first_longest<'a>(items: &[&'a str]) -> &'a str {
    items
        .iter()
        .rev()
        .max_by_key(|s| s.chars().count())
        .copied()
        .unwrap_or("")
}

/// Most frequent words as `[word, count]` pairs; ties keep first-appearance order
fn top_words(words: &[&str]) -> Value {
    let mut order: Vec<(String, usize)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for word in words {
        let normalized = word
            .to_lowercase()
            .trim_matches(|c: char| ".,!?\";:".contains(c))
            .to_string();
        match index.get(&normalized) {
            Some(&i) => order[i].1 += 1,
            None => {
                index.insert(normalized.clone(), order.len());
                order.push((normalized, 1));
            }
        }
    }

    order.sort_by(|a, b| b.1.cmp(&a.1));
    order.truncate(TOP_WORDS);
    json!(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn analyze(data: Value, analysis_type: &str) -> TaskResult {
        let params = json!({"data": data, "analysis_type": analysis_type});
        AnalysisTask::new().execute(params.as_object().unwrap()).await
    }

    #[tokio::test]
    async fn test_missing_data() {
        let result = AnalysisTask::new().execute(&Map::new()).await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_unknown_type() {
        let result = analyze(json!([1]), "astrology").await;
        assert_eq!(result.error.as_deref(), Some("Unknown analysis type: astrology"));
    }

    #[tokio::test]
    async fn test_basic_list() {
        let result = analyze(json!([1, "a", 2]), "basic").await;
        assert!(result.success);
        assert_eq!(result.data["length"], 3);
        assert_eq!(result.data["element_types"], json!(["int", "str"]));
        assert_eq!(result.data["first_element"], 1);
        assert_eq!(result.data["last_element"], 2);
        assert_eq!(result.metadata["input_data_type"], "list");
    }

    #[tokio::test]
    async fn test_statistical() {
        let result = analyze(json!([4, 1, 3, 2, "x"]), "statistical").await;
        assert_eq!(result.data["count"], 4);
        assert_eq!(result.data["sum"], 10.0);
        assert_eq!(result.data["mean"], 2.5);
        assert_eq!(result.data["median"], 2.5);
        assert_eq!(result.data["range"], 3.0);

        let single = analyze(json!(-3), "statistical").await;
        assert_eq!(single.data["is_negative"], true);
        assert_eq!(single.data["absolute_value"], 3.0);

        let none = analyze(json!(["a"]), "statistical").await;
        assert!(none.data["error"].is_string());
    }

    #[tokio::test]
    async fn test_text() {
        let result = analyze(json!("The cat saw the dog. The end!"), "text").await;
        assert_eq!(result.data["word_count"], 7);
        assert_eq!(result.data["longest_word"], "dog.");
        assert_eq!(result.data["shortest_word"], "The");
        assert_eq!(result.data["starts_with_uppercase"], true);
        assert_eq!(result.data["top_words"][0], json!(["the", 3]));
        assert_eq!(result.data["top_words"][1], json!(["cat", 1]));
    }

    #[tokio::test]
    async fn test_text_list() {
        let result = analyze(json!(["ab", "", "abcd"]), "text").await;
        assert_eq!(result.data["string_count"], 3);
        assert_eq!(result.data["longest_string"], "abcd");
        assert_eq!(result.data["empty_strings"], 1);
    }
}
