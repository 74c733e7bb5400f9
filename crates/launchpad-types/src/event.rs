//! Progress events published at every step boundary of an initialization run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State labels that are not step names.
pub mod states {
    pub const STARTED: &str = "started";
    pub const COMPLETED: &str = "completed";
    pub const FAILED: &str = "failed";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Progress,
    Completed,
    Failed,
    Error,
}

/// Finer-grained position inside a running step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Substep {
    pub name: String,
    pub progress: u8,
}

/// One immutable moment in a job's execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub project_id: String,
    pub state: String,
    pub progress: u8,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub substep: Option<Substep>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    fn build(
        event_type: EventType,
        project_id: impl Into<String>,
        state: impl Into<String>,
        progress: u8,
        message: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            project_id: project_id.into(),
            state: state.into(),
            progress: progress.min(100),
            message: message.into(),
            substep: None,
            timestamp: Utc::now(),
        }
    }

    pub fn progress(
        project_id: impl Into<String>,
        state: impl Into<String>,
        progress: u8,
        message: impl Into<String>,
    ) -> Self {
        Self::build(EventType::Progress, project_id, state, progress, message)
    }

    pub fn completed(project_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::build(EventType::Completed, project_id, states::COMPLETED, 100, message)
    }

    pub fn failed(project_id: impl Into<String>, progress: u8, message: impl Into<String>) -> Self {
        Self::build(EventType::Failed, project_id, states::FAILED, progress, message)
    }

    pub fn error(
        project_id: impl Into<String>,
        state: impl Into<String>,
        progress: u8,
        message: impl Into<String>,
    ) -> Self {
        Self::build(EventType::Error, project_id, state, progress, message)
    }

    pub fn with_substep(mut self, name: impl Into<String>, progress: u8) -> Self {
        self.substep = Some(Substep {
            name: name.into(),
            progress: progress.min(100),
        });
        self
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.event_type, EventType::Completed | EventType::Failed)
    }
}
