//! Structural validation of workflow definitions

use super::error::WorkflowError;
use crate::config::WorkflowConfig;
use std::collections::{HashMap, HashSet};

/// Validate a workflow and return its steps in dependency order
///
/// Checks run in order: duplicate names, unknown dependencies, cycles, then
/// per-step required fields. Nothing is executed.
pub fn validate_workflow(workflow: &WorkflowConfig) -> Result<Vec<String>, WorkflowError> {
    let mut seen = HashSet::new();
    for step in &workflow.steps {
        if !seen.insert(step.name.as_str()) {
            return Err(WorkflowError::DuplicateStep {
                step: step.name.clone(),
            });
        }
    }

    for step in &workflow.steps {
        for dep in &step.dependencies {
            if !seen.contains(dep.as_str()) {
                return Err(WorkflowError::UnknownDependency {
                    step: step.name.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    let order = topological_sort(workflow)?;

    workflow
        .check_steps()
        .map_err(|errors| WorkflowError::InvalidDefinition { errors })?;

    Ok(order)
}

/// Depth-first topological sort; dependencies come before dependents
///
/// Assumes every dependency names an existing step.
pub fn topological_sort(workflow: &WorkflowConfig) -> Result<Vec<String>, WorkflowError> {
    let step_map: HashMap<&str, &[String]> = workflow
        .steps
        .iter()
        .map(|s| (s.name.as_str(), s.dependencies.as_slice()))
        .collect();

    let mut result = Vec::with_capacity(workflow.steps.len());
    let mut visited = HashSet::new();
    let mut path = Vec::new();

    fn visit<'a>(
        step: &'a str,
        step_map: &HashMap<&'a str, &'a [String]>,
        visited: &mut HashSet<&'a str>,
        path: &mut Vec<&'a str>,
        result: &mut Vec<String>,
    ) -> Result<(), WorkflowError> {
        if visited.contains(step) {
            return Ok(());
        }
        if let Some(pos) = path.iter().position(|s| *s == step) {
            let mut cycle: Vec<String> = path[pos..].iter().map(|s| s.to_string()).collect();
            cycle.push(step.to_string());
            return Err(WorkflowError::CyclicDependency { cycle });
        }

        path.push(step);
        for dep in step_map.get(step).copied().unwrap_or_default() {
            visit(dep, step_map, visited, path, result)?;
        }
        path.pop();

        visited.insert(step);
        result.push(step.to_string());
        Ok(())
    }

    for step in &workflow.steps {
        visit(&step.name, &step_map, &mut visited, &mut path, &mut result)?;
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{StepConfig, StepType};

    fn step(name: &str, deps: &[&str]) -> StepConfig {
        StepConfig::agent_task(name, "worker").depends_on(deps.iter().copied())
    }

    #[test]
    fn test_order_respects_dependencies() {
        let workflow = WorkflowConfig::new(
            "dag",
            vec![step("c", &["a", "b"]), step("a", &[]), step("b", &["a"])],
        );
        let order = validate_workflow(&workflow).unwrap();
        let pos = |n: &str| order.iter().position(|s| s == n).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("b") < pos("c"));
    }

    #[test]
    fn test_duplicate_step() {
        let workflow = WorkflowConfig::new("dup", vec![step("a", &[]), step("a", &[])]);
        assert_eq!(
            validate_workflow(&workflow).unwrap_err(),
            WorkflowError::DuplicateStep { step: "a".into() }
        );
    }

    #[test]
    fn test_unknown_dependency() {
        let workflow = WorkflowConfig::new("dangling", vec![step("a", &["ghost"])]);
        assert_eq!(
            validate_workflow(&workflow).unwrap_err(),
            WorkflowError::UnknownDependency {
                step: "a".into(),
                dependency: "ghost".into()
            }
        );
    }

    #[test]
    fn test_cycle() {
        let workflow = WorkflowConfig::new(
            "loop",
            vec![step("a", &["c"]), step("b", &["a"]), step("c", &["b"])],
        );
        match validate_workflow(&workflow).unwrap_err() {
            WorkflowError::CyclicDependency { cycle } => {
                assert_eq!(cycle.first(), cycle.last());
                assert_eq!(cycle.len(), 4);
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let workflow = WorkflowConfig::new("self", vec![step("a", &["a"])]);
        assert_eq!(
            validate_workflow(&workflow).unwrap_err(),
            WorkflowError::CyclicDependency {
                cycle: vec!["a".into(), "a".into()]
            }
        );
    }

    #[test]
    fn test_field_errors_after_structure() {
        let workflow = WorkflowConfig::new(
            "fields",
            vec![StepConfig::new("cond", StepType::Conditional)],
        );
        assert!(matches!(
            validate_workflow(&workflow).unwrap_err(),
            WorkflowError::InvalidDefinition { .. }
        ));
    }
}
