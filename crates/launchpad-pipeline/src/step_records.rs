//! Durable per-step bookkeeping for each project's initialization.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use launchpad_types::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub project_id: String,
    pub step: String,
    pub display_name: String,
    pub sequence: u32,
    pub state: StepState,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

impl StepRecord {
    pub fn pending(project_id: &str, step: &str, display_name: &str, sequence: u32) -> Self {
        Self {
            project_id: project_id.to_string(),
            step: step.to_string(),
            display_name: display_name.to_string(),
            sequence,
            state: StepState::Pending,
            error: None,
            started_at: None,
            completed_at: None,
            duration_ms: None,
        }
    }

    /// Move to `state` at `now`, stamping start and end times as appropriate.
    pub fn transition(&mut self, state: StepState, error: Option<String>, now: DateTime<Utc>) {
        match state {
            StepState::Running => {
                self.started_at = Some(now);
                self.completed_at = None;
                self.duration_ms = None;
            }
            StepState::Completed | StepState::Failed | StepState::Skipped => {
                self.completed_at = Some(now);
                self.duration_ms = self
                    .started_at
                    .map(|start| (now - start).num_milliseconds());
            }
            StepState::Pending => {}
        }
        self.state = state;
        self.error = error;
    }
}

#[async_trait]
pub trait StepRecordStore: Send + Sync {
    /// Replace all records for the project with a fresh pending set.
    async fn initialize(&self, project_id: &str, records: Vec<StepRecord>) -> Result<()>;

    async fn update(
        &self,
        project_id: &str,
        step: &str,
        state: StepState,
        error: Option<String>,
    ) -> Result<()>;

    async fn list(&self, project_id: &str) -> Result<Vec<StepRecord>>;
}

/// Writes step records for one run, logging rather than propagating failures.
pub struct StepTracker {
    store: Arc<dyn StepRecordStore>,
    project_id: String,
}

impl StepTracker {
    pub fn new(store: Arc<dyn StepRecordStore>, project_id: impl Into<String>) -> Self {
        Self {
            store,
            project_id: project_id.into(),
        }
    }

    pub async fn initialize<'a>(&self, steps: impl IntoIterator<Item = (&'a str, &'a str)>) {
        let records = steps
            .into_iter()
            .enumerate()
            .map(|(i, (name, display))| StepRecord::pending(&self.project_id, name, display, i as u32 + 1))
            .collect();
        if let Err(e) = self.store.initialize(&self.project_id, records).await {
            tracing::warn!(project_id = %self.project_id, error = %e, "Failed to initialize step records");
        }
    }

    pub async fn set(&self, step: &str, state: StepState, error: Option<String>) {
        if let Err(e) = self.store.update(&self.project_id, step, state, error).await {
            tracing::warn!(
                project_id = %self.project_id,
                step,
                error = %e,
                "Failed to update step record"
            );
        }
    }
}
