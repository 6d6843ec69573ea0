//! Communication task: messages, notifications, broadcasts and log lines

use super::types::{Task, TaskResult};
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::{debug, error, info, warn};

/// Delivers `message` according to `communication_type`
///
/// Delivery is simulated: the task logs the message and reports what it
/// would have sent. Wire it to a real transport with a custom executor.
#[derive(Debug, Clone)]
pub struct CommunicationTask {
    name: String,
}

impl CommunicationTask {
    pub fn new() -> Self {
        Self::named("communication")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for CommunicationTask {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Task for CommunicationTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Handle communication operations"
    }

    async fn execute(&self, params: &Map<String, Value>) -> TaskResult {
        let message = match params.get("message").and_then(Value::as_str) {
            Some(m) if !m.is_empty() => m,
            _ => return TaskResult::failure("No message content provided"),
        };
        let recipient = params.get("recipient").and_then(Value::as_str);
        let kind = params
            .get("communication_type")
            .and_then(Value::as_str)
            .unwrap_or("message");
        let str_param = |key: &str, default: &'static str| {
            params
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or(default)
                .to_string()
        };

        let outcome = match kind {
            "message" => {
                info!(recipient, message, "sending message");
                json!({
                    "action": "message_sent",
                    "recipient": recipient,
                    "message": message,
                    "priority": str_param("priority", "normal"),
                    "status": "delivered",
                })
            }
            "notification" => {
                info!(recipient, message, "sending notification");
                json!({
                    "action": "notification_sent",
                    "recipient": recipient,
                    "message": message,
                    "notification_type": str_param("notification_type", "info"),
                    "status": "sent",
                })
            }
            "broadcast" => {
                let recipients = params
                    .get("recipients")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_else(|| vec![json!("all")]);
                info!(reach = recipients.len(), message, "broadcasting message");
                json!({
                    "action": "message_broadcasted",
                    "reach": recipients.len(),
                    "recipients": recipients,
                    "message": message,
                    "status": "broadcasted",
                })
            }
            "log" => {
                let level = str_param("level", "info");
                match level.as_str() {
                    "error" => error!(message, "workflow message"),
                    "warning" => warn!(message, "workflow message"),
                    "debug" => debug!(message, "workflow message"),
                    _ => info!(message, "workflow message"),
                }
                json!({
                    "action": "message_logged",
                    "message": message,
                    "level": level,
                    "status": "logged",
                })
            }
            other => return TaskResult::failure(format!("Unknown communication type: {}", other)),
        };

        TaskResult::success(outcome)
            .with_metadata("communication_type", kind)
            .with_metadata("recipient", recipient)
            .with_metadata("message_length", message.chars().count())
    }
}
