//! Step trait, dynamic dispatch wrapper, and in-step progress reporting.

use std::sync::atomic::{AtomicU8, Ordering};

use async_trait::async_trait;
use launchpad_types::{ProgressEvent, Result};

use crate::context::InitializationContext;
use crate::events::RunPublisher;

/// Stable step names, also used as event states and step-record keys.
pub mod names {
    pub const CREATE_PROJECT: &str = "create_project";
    pub const LOAD_TEMPLATE: &str = "load_template";
    pub const RENDER_TEMPLATE: &str = "render_template";
    pub const CREATE_ENVIRONMENTS: &str = "create_environments";
    pub const SETUP_REPOSITORY: &str = "setup_repository";
    pub const CREATE_GITOPS: &str = "create_gitops";
    pub const FINALIZE: &str = "finalize";
}

/// How the orchestrator treats a step's failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Criticality {
    /// Failure aborts the job.
    Critical,
    /// Failure becomes a warning and the job continues.
    Tolerated,
}

// ---------------------------------------------------------------------------
// InitStep trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait InitStep: Send + Sync {
    fn name(&self) -> &str;

    fn display_name(&self) -> &str;

    /// Relative share of overall progress. Must be positive.
    fn weight(&self) -> u32;

    fn criticality(&self) -> Criticality {
        Criticality::Critical
    }

    /// Whether the step applies to this job. Must not perform I/O.
    fn can_handle(&self, ctx: &InitializationContext) -> bool;

    async fn execute(&self, ctx: &mut InitializationContext, progress: &StepProgress) -> Result<()>;
}

// ---------------------------------------------------------------------------
// DynStep: object-safe wrapper
// ---------------------------------------------------------------------------

pub struct DynStep(Box<dyn InitStep>);

impl DynStep {
    pub fn new(step: impl InitStep + 'static) -> Self {
        Self(Box::new(step))
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }

    pub fn display_name(&self) -> &str {
        self.0.display_name()
    }

    pub fn weight(&self) -> u32 {
        self.0.weight()
    }

    pub fn criticality(&self) -> Criticality {
        self.0.criticality()
    }

    pub fn can_handle(&self, ctx: &InitializationContext) -> bool {
        self.0.can_handle(ctx)
    }

    pub async fn execute(&self, ctx: &mut InitializationContext, progress: &StepProgress) -> Result<()> {
        self.0.execute(ctx, progress).await
    }
}

impl std::fmt::Debug for DynStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynStep")
            .field("name", &self.name())
            .field("weight", &self.weight())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// StepProgress
// ---------------------------------------------------------------------------

/// Lets a running step report sub-progress inside its own slice of the bar.
pub struct StepProgress {
    publisher: RunPublisher,
    step: String,
    start: u8,
    end: u8,
    /// Highest overall value accepted so far within this step.
    last: AtomicU8,
}

impl StepProgress {
    pub fn new(publisher: RunPublisher, step: impl Into<String>, start: u8, end: u8) -> Self {
        Self {
            publisher,
            step: step.into(),
            start,
            end: end.max(start),
            last: AtomicU8::new(start),
        }
    }

    pub fn current(&self) -> u8 {
        self.last.load(Ordering::SeqCst)
    }

    /// Overall progress for `percent` of this step.
    pub fn overall(&self, percent: u8) -> u8 {
        let span = (self.end - self.start) as u32;
        self.start + (span * percent.min(100) as u32 / 100) as u8
    }

    /// Publish a substep event. Failures are logged, never returned.
    pub async fn report(&self, substep: &str, percent: u8, message: impl Into<String>) {
        let overall = self.overall(percent);
        let event = ProgressEvent::progress(
            self.publisher.project_id(),
            self.step.as_str(),
            overall,
            message,
        )
        .with_substep(substep, percent);
        match self.publisher.publish(event).await {
            Ok(true) => {
                self.last.fetch_max(overall, Ordering::SeqCst);
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(step = %self.step, substep, error = %e, "Failed to publish substep progress")
            }
        }
    }
}
