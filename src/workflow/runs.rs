//! Live table of active and recently completed runs

use super::context::{RunId, StepCounts, WorkflowContext, WorkflowStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Point-in-time summary of a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunStatus {
    pub run_id: RunId,
    pub workflow: String,
    pub status: WorkflowStatus,
    #[serde(flatten)]
    pub steps: StepCounts,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunStatus {
    pub fn from_context(ctx: &WorkflowContext) -> Self {
        Self {
            run_id: ctx.run_id(),
            workflow: ctx.workflow().to_string(),
            status: ctx.status(),
            steps: ctx.counts(),
            started_at: ctx.started_at(),
            completed_at: ctx.completed_at(),
        }
    }
}

#[derive(Debug, Default)]
struct RunTable {
    active: HashMap<RunId, RunStatus>,
    completed: VecDeque<RunStatus>,
    keep: usize,
}

/// Shared run table; cloning shares the table
#[derive(Debug, Clone, Default)]
pub struct RunTracker {
    inner: Arc<RwLock<RunTable>>,
}

impl RunTracker {
    /// Tracker remembering up to `keep` completed runs
    pub fn new(keep: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(RunTable {
                keep,
                ..Default::default()
            })),
        }
    }

    /// Record the current state of a run
    pub async fn update(&self, ctx: &WorkflowContext) {
        let status = RunStatus::from_context(ctx);
        let mut table = self.inner.write().await;

        if status.status.is_terminal() {
            table.active.remove(&status.run_id);
            table.completed.push_back(status);
            while table.completed.len() > table.keep {
                table.completed.pop_front();
            }
        } else {
            table.active.insert(status.run_id, status);
        }
    }

    pub async fn get(&self, run_id: RunId) -> Option<RunStatus> {
        let table = self.inner.read().await;
        table
            .active
            .get(&run_id)
            .or_else(|| table.completed.iter().find(|r| r.run_id == run_id))
            .cloned()
    }

    /// Active runs (oldest first) followed by completed runs (oldest first)
    pub async fn list(&self) -> Vec<RunStatus> {
        let table = self.inner.read().await;
        let mut active: Vec<RunStatus> = table.active.values().cloned().collect();
        active.sort_by_key(|r| r.started_at);
        active.extend(table.completed.iter().cloned());
        active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[tokio::test]
    async fn test_active_then_completed() {
        let tracker = RunTracker::new(10);
        let mut ctx = WorkflowContext::new("wf", Map::new());
        ctx.start(["a"]);
        tracker.update(&ctx).await;

        let status = tracker.get(ctx.run_id()).await.unwrap();
        assert_eq!(status.status, WorkflowStatus::Running);
        assert_eq!(status.steps.total, 1);

        ctx.finish(WorkflowStatus::Completed, None);
        tracker.update(&ctx).await;

        let listed = tracker.list().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, WorkflowStatus::Completed);
        assert!(listed[0].completed_at.is_some());
    }

    #[tokio::test]
    async fn test_completed_runs_are_capped() {
        let tracker = RunTracker::new(2);
        let mut ids = Vec::new();
        for _ in 0..3 {
            let mut ctx = WorkflowContext::new("wf", Map::new());
            ctx.start(std::iter::empty());
            ctx.finish(WorkflowStatus::Completed, None);
            tracker.update(&ctx).await;
            ids.push(ctx.run_id());
        }

        assert!(tracker.get(ids[0]).await.is_none());
        assert!(tracker.get(ids[2]).await.is_some());
        assert_eq!(tracker.list().await.len(), 2);
    }

    #[test]
    fn test_status_json_flattens_counts() {
        let ctx = WorkflowContext::new("wf", Map::new());
        let json = serde_json::to_value(RunStatus::from_context(&ctx)).unwrap();
        assert_eq!(json["workflow"], "wf");
        assert_eq!(json["total"], 0);
        assert_eq!(json["status"], "pending");
    }
}
