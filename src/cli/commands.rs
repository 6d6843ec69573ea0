//! CLI command implementations

use super::output::{OutputEvent, OutputHandler};
use super::signals::{CancellationToken, with_cancellation};
use crate::config::{EngineConfig, load_workflow};
use crate::workflow::{WorkflowEngine, WorkflowStatus, validate_workflow as check_workflow};
use serde_json::{Map, Value};
use std::path::Path;
use tracing::{info, warn};

/// Exit code when the run is interrupted
pub const EXIT_CANCELLED: i32 = 130;

/// Process exit code for a finished run
pub fn exit_code(status: WorkflowStatus) -> i32 {
    match status {
        WorkflowStatus::Completed => 0,
        WorkflowStatus::PartiallyFailed => 2,
        _ => 1,
    }
}

/// Parse `--data` into the run's initial data store
pub fn parse_data(data: Option<&str>) -> Result<Map<String, Value>, String> {
    let Some(data) = data else {
        return Ok(Map::new());
    };

    match serde_json::from_str::<Value>(data) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!("--data must be a JSON object, got {}", other)),
        Err(e) => Err(format!("--data is not valid JSON: {}", e)),
    }
}

/// Run a workflow file to completion
pub async fn run_workflow(
    path: &Path,
    data: Option<&str>,
    engine: &WorkflowEngine,
    handler: &dyn OutputHandler,
    token: &CancellationToken,
) -> Result<i32, String> {
    let workflow = load_workflow(path)
        .map_err(|e| format!("Failed to load workflow '{}': {:#}", path.display(), e))?;
    let data = parse_data(data)?;

    handler.emit(OutputEvent::WorkflowStart {
        name: workflow.name.clone(),
        steps: workflow.steps.len(),
    });

    let run = engine
        .submit_workflow(workflow.clone(), data)
        .await
        .map_err(|e| format!("Workflow rejected: {}", e))?;
    let run_id = run.run_id;
    info!(run_id = %run_id, workflow = %workflow.name, "run started");

    let Some(outcome) = with_cancellation(token, run.wait()).await else {
        if let Some(status) = engine.get_workflow_status(run_id).await {
            warn!(
                run_id = %run_id,
                succeeded = status.steps.succeeded,
                running = status.steps.running,
                "run cancelled"
            );
        }
        handler.emit(OutputEvent::WorkflowError {
            error: "run cancelled".into(),
        });
        return Ok(EXIT_CANCELLED);
    };

    let ctx = outcome.map_err(|e| format!("Workflow execution failed: {}", e))?;

    for step in &workflow.steps {
        if let Some(exec) = ctx.step(&step.name) {
            handler.emit(OutputEvent::step(&step.name, exec));
        }
    }
    handler.emit(OutputEvent::finished(&ctx));
    if let Some(error) = ctx.error() {
        handler.emit(OutputEvent::Debug {
            message: error.to_string(),
        });
    }
    handler.result(&ctx);

    Ok(exit_code(ctx.status()))
}

/// Validate a workflow file
pub fn validate_workflow(path: &Path, handler: &dyn OutputHandler) -> i32 {
    let workflow = match load_workflow(path) {
        Ok(workflow) => workflow,
        Err(e) => {
            handler.emit(OutputEvent::WorkflowError {
                error: format!("✗ {:#}", e),
            });
            return 1;
        }
    };

    handler.emit(OutputEvent::Info {
        message: format!(
            "✓ Workflow '{}' is valid ({} steps)",
            workflow.name,
            workflow.steps.len()
        ),
    });
    if let Ok(order) = check_workflow(&workflow) {
        handler.emit(OutputEvent::Info {
            message: format!("  order: {}", order.join(" -> ")),
        });
    }
    0
}

/// List configured agents and available step types
pub fn list_agents(config: &EngineConfig, engine: &WorkflowEngine, handler: &dyn OutputHandler) -> i32 {
    if config.agents.is_empty() {
        handler.emit(OutputEvent::Info {
            message: "(no agents configured)".into(),
        });
    }

    for agent in &config.agents {
        handler.emit(OutputEvent::Info {
            message: agent.name.clone(),
        });
        if !agent.description.is_empty() {
            handler.emit(OutputEvent::Info {
                message: format!("  {}", agent.description),
            });
        }
        if !agent.capabilities.is_empty() {
            handler.emit(OutputEvent::Info {
                message: format!("  capabilities: {}", agent.capabilities.join(", ")),
            });
        }
        if !agent.actions.is_empty() {
            handler.emit(OutputEvent::Info {
                message: format!("  actions: {}", agent.actions.join(", ")),
            });
        }
    }

    handler.emit(OutputEvent::Info {
        message: format!("step types: {}", engine.step_types().join(", ")),
    });
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;
    use crate::workflow::{StepStatus, WorkflowContext};
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<OutputEvent>>,
        results: Mutex<usize>,
    }

    impl Recorder {
        fn infos(&self) -> Vec<String> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter_map(|e| match e {
                    OutputEvent::Info { message } => Some(message.clone()),
                    _ => None,
                })
                .collect()
        }
    }

    impl OutputHandler for Recorder {
        fn emit(&self, event: OutputEvent) {
            self.events.lock().unwrap().push(event);
        }

        fn result(&self, _ctx: &WorkflowContext) {
            *self.results.lock().unwrap() += 1;
        }
    }

    fn workflow_file(dir: &TempDir, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join("flow.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn engine() -> WorkflowEngine {
        let config = EngineConfig {
            agents: vec![AgentConfig {
                capabilities: vec!["analysis".into()],
                actions: vec!["analysis".into()],
                ..AgentConfig::new("analyst")
            }],
            ..Default::default()
        };
        WorkflowEngine::from_config(&config).unwrap()
    }

    #[test]
    fn test_parse_data() {
        assert!(parse_data(None).unwrap().is_empty());
        assert_eq!(parse_data(Some(r#"{"a": 1}"#)).unwrap()["a"], 1);
        assert!(parse_data(Some("[1, 2]")).unwrap_err().contains("JSON object"));
        assert!(parse_data(Some("{")).is_err());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(WorkflowStatus::Completed), 0);
        assert_eq!(exit_code(WorkflowStatus::Failed), 1);
        assert_eq!(exit_code(WorkflowStatus::PartiallyFailed), 2);
    }

    #[tokio::test]
    async fn test_run_workflow() {
        let dir = TempDir::new().unwrap();
        let path = workflow_file(
            &dir,
            r#"
            name = "report"

            [[steps]]
            name = "stats"
            agent_name = "analyst"
            parameters = { action = "analysis", analysis_type = "statistical", store_result_as = "stats" }

            [[steps]]
            name = "pause"
            type = "delay"
            depends_on = ["stats"]
            parameters = { seconds = 0.01 }
            "#,
        );

        let recorder = Recorder::default();
        let code = run_workflow(
            &path,
            Some(r#"{"data": [2, 4, 6]}"#),
            &engine(),
            &recorder,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(code, 0);
        assert_eq!(*recorder.results.lock().unwrap(), 1);
        let events = recorder.events.lock().unwrap();
        let steps: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                OutputEvent::StepComplete { name, status, .. } => Some((name.clone(), *status)),
                _ => None,
            })
            .collect();
        assert_eq!(
            steps,
            vec![
                ("stats".to_string(), StepStatus::Succeeded),
                ("pause".to_string(), StepStatus::Succeeded)
            ]
        );
    }

    #[tokio::test]
    async fn test_run_cancelled() {
        let dir = TempDir::new().unwrap();
        let path = workflow_file(
            &dir,
            r#"
            name = "slow"

            [[steps]]
            name = "wait"
            type = "delay"
            parameters = { seconds = 5.0 }
            "#,
        );

        let token = CancellationToken::new();
        token.cancel();
        let recorder = Recorder::default();
        let code = run_workflow(&path, None, &engine(), &recorder, &token)
            .await
            .unwrap();
        assert_eq!(code, EXIT_CANCELLED);
    }

    #[tokio::test]
    async fn test_run_missing_file() {
        let recorder = Recorder::default();
        let err = run_workflow(
            Path::new("/nonexistent/flow.toml"),
            None,
            &engine(),
            &recorder,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(err.contains("Failed to load workflow"));
    }

    #[test]
    fn test_validate_workflow() {
        let dir = TempDir::new().unwrap();
        let path = workflow_file(
            &dir,
            r#"
            name = "pair"

            [[steps]]
            name = "second"
            agent_name = "x"
            dependencies = ["first"]

            [[steps]]
            name = "first"
            agent_name = "x"
            "#,
        );

        let recorder = Recorder::default();
        assert_eq!(validate_workflow(&path, &recorder), 0);
        assert!(recorder.infos().contains(&"  order: first -> second".to_string()));

        let bad = workflow_file(&dir, "name = \"broken\"\nsteps = 3\n");
        assert_eq!(validate_workflow(&bad, &Recorder::default()), 1);
    }

    #[test]
    fn test_list_agents() {
        let config = EngineConfig {
            agents: vec![AgentConfig::for_role("analyzer")],
            ..Default::default()
        };
        let engine = WorkflowEngine::from_config(&config).unwrap();
        let recorder = Recorder::default();

        assert_eq!(list_agents(&config, &engine, &recorder), 0);
        let infos = recorder.infos();
        assert_eq!(infos[0], "analyzer_agent");
        assert!(infos.iter().any(|m| m == "  actions: analysis"));
        assert!(infos.last().unwrap().contains("data_processing"));
    }
}
