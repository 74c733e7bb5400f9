//! The orchestrator: runs the step sequence for one job and accounts for progress.

use std::collections::HashSet;
use std::sync::Arc;

use launchpad_types::{states, LaunchpadError, ProgressEvent, RepoInfo, Result};
use serde::Serialize;

use crate::config::LaunchpadConfig;
use crate::context::InitializationContext;
use crate::events::{ProgressPublisher, RunPublisher};
use crate::retry::ErrorClassifier;
use crate::services::{ProjectStore, Services};
use crate::step::{Criticality, DynStep, StepProgress};
use crate::step_records::{StepRecordStore, StepState, StepTracker};
use crate::steps::default_steps;

pub struct Orchestrator {
    steps: Vec<DynStep>,
    total_weight: u32,
    publisher: ProgressPublisher,
    projects: Arc<dyn ProjectStore>,
    step_records: Arc<dyn StepRecordStore>,
    classifier: ErrorClassifier,
}

/// What a successful run produced. The context itself is dropped.
#[derive(Debug, Clone, Serialize)]
pub struct InitializationSummary {
    pub project_id: String,
    pub completed_steps: Vec<String>,
    pub skipped_steps: Vec<String>,
    pub warnings: Vec<String>,
    pub environment_count: usize,
    pub repository: Option<RepoInfo>,
    pub sync_resource_count: usize,
}

/// One row of the step table: name, weight, and progress once the step is done.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepPlan {
    pub name: String,
    pub display_name: String,
    pub weight: u32,
    pub progress_after: u8,
}

impl Orchestrator {
    /// Build an orchestrator over an explicit step list.
    ///
    /// Rejects an empty list, zero weights, and duplicate step names.
    pub fn new(
        steps: Vec<DynStep>,
        services: &Services,
        publisher: ProgressPublisher,
        classifier: ErrorClassifier,
    ) -> Result<Self> {
        if steps.is_empty() {
            return Err(LaunchpadError::Config("orchestrator needs at least one step".into()));
        }
        let mut seen = HashSet::new();
        for step in &steps {
            if step.weight() == 0 {
                return Err(LaunchpadError::Config(format!(
                    "step '{}' must have a positive weight",
                    step.name()
                )));
            }
            if !seen.insert(step.name().to_string()) {
                return Err(LaunchpadError::Config(format!("duplicate step '{}'", step.name())));
            }
        }
        let total_weight = steps.iter().map(|s| s.weight()).sum();

        Ok(Self {
            steps,
            total_weight,
            publisher,
            projects: services.projects.clone(),
            step_records: services.step_records.clone(),
            classifier,
        })
    }

    /// Build an orchestrator with the seven standard steps.
    pub fn with_default_steps(
        services: &Services,
        publisher: ProgressPublisher,
        config: &LaunchpadConfig,
    ) -> Result<Self> {
        Self::new(
            default_steps(services, config),
            services,
            publisher,
            ErrorClassifier::from_config(&config.retry),
        )
    }

    pub fn publisher(&self) -> &ProgressPublisher {
        &self.publisher
    }

    pub fn total_weight(&self) -> u32 {
        self.total_weight
    }

    /// Overall progress once `completed_weight` worth of steps are behind us.
    pub fn progress_at(&self, completed_weight: u32) -> u8 {
        (completed_weight as u64 * 100 / self.total_weight as u64).min(100) as u8
    }

    pub fn plan(&self) -> Vec<StepPlan> {
        let mut cumulative = 0;
        self.steps
            .iter()
            .map(|step| {
                cumulative += step.weight();
                StepPlan {
                    name: step.name().to_string(),
                    display_name: step.display_name().to_string(),
                    weight: step.weight(),
                    progress_after: self.progress_at(cumulative),
                }
            })
            .collect()
    }

    /// Run every step in order for one job.
    ///
    /// A critical step failure stops the run, marks the project failed, and
    /// returns `StepFailed` wrapping the original error.
    pub async fn run(&self, mut ctx: InitializationContext) -> Result<InitializationSummary> {
        let project_id = ctx.project_id().to_string();
        let run = self.publisher.begin_run(&project_id, ctx.user_id());
        let tracker = StepTracker::new(self.step_records.clone(), &project_id);

        tracker
            .initialize(self.steps.iter().map(|s| (s.name(), s.display_name())))
            .await;
        if let Err(e) = run
            .start(ProgressEvent::progress(&project_id, states::STARTED, 0, "Initialization started"))
            .await
        {
            tracing::warn!(project_id = %project_id, error = %e, "Failed to publish start event");
        }
        tracing::info!(
            project_id = %project_id,
            run_id = %run.run_id(),
            steps = self.steps.len(),
            "Initialization started"
        );

        let mut cumulative = 0u32;
        let mut completed_steps = Vec::new();
        let mut skipped_steps = Vec::new();

        for step in &self.steps {
            let next = cumulative + step.weight();
            let start = self.progress_at(cumulative);
            let end = self.progress_at(next);

            if !step.can_handle(&ctx) {
                tracing::debug!(project_id = %project_id, step = %step.name(), "Step not applicable, skipping");
                tracker.set(step.name(), StepState::Skipped, None).await;
                skipped_steps.push(step.name().to_string());
                cumulative = next;
                continue;
            }

            tracing::info!(project_id = %project_id, step = %step.name(), progress = start, "Step started");
            tracker.set(step.name(), StepState::Running, None).await;
            self.emit(
                &run,
                ProgressEvent::progress(&project_id, step.name(), start, format!("{}...", step.display_name())),
            )
            .await;

            let progress = StepProgress::new(run.clone(), step.name(), start, end);
            match self.execute_with_retry(step, &mut ctx, &progress, &run).await {
                Ok(()) => {
                    tracker.set(step.name(), StepState::Completed, None).await;
                    self.emit(
                        &run,
                        ProgressEvent::progress(&project_id, step.name(), end, format!("{} complete", step.display_name())),
                    )
                    .await;
                    tracing::info!(project_id = %project_id, step = %step.name(), progress = end, "Step completed");
                    completed_steps.push(step.name().to_string());
                }
                Err(err) if step.criticality() == Criticality::Tolerated => {
                    let warning = format!("{} skipped: {}", step.display_name(), err);
                    tracing::warn!(project_id = %project_id, step = %step.name(), error = %err, "Optional step failed, continuing");
                    tracker.set(step.name(), StepState::Failed, Some(err.to_string())).await;
                    self.emit(&run, ProgressEvent::progress(&project_id, step.name(), end, warning.clone()))
                        .await;
                    ctx.warnings.push(warning);
                    skipped_steps.push(step.name().to_string());
                }
                Err(err) => {
                    return Err(self.abort(&ctx, &run, &tracker, step, progress.current(), err).await);
                }
            }
            cumulative = next;
        }

        self.emit(&run, ProgressEvent::completed(&project_id, "Project initialized"))
            .await;
        run.schedule_cleanup();
        tracing::info!(
            project_id = %project_id,
            completed = completed_steps.len(),
            skipped = skipped_steps.len(),
            warnings = ctx.warnings.len(),
            "Initialization completed"
        );

        Ok(InitializationSummary {
            project_id,
            completed_steps,
            skipped_steps,
            environment_count: ctx.environments.len(),
            repository: ctx.repository.take(),
            sync_resource_count: ctx.sync_resource_ids.len(),
            warnings: ctx.warnings,
        })
    }

    /// Run a step, re-running it while the classifier advises another attempt.
    async fn execute_with_retry(
        &self,
        step: &DynStep,
        ctx: &mut InitializationContext,
        progress: &StepProgress,
        run: &RunPublisher,
    ) -> Result<()> {
        let mut attempt = 0u32;
        loop {
            let err = match step.execute(ctx, progress).await {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };
            attempt += 1;

            let decision = self.classifier.decide(&err, attempt);
            if !decision.should_retry {
                return Err(err);
            }

            tracing::warn!(
                project_id = %run.project_id(),
                step = %step.name(),
                attempt,
                kind = %decision.kind,
                delay_ms = %decision.delay.as_millis(),
                error = %err,
                "Retryable error, retrying"
            );
            self.emit(
                run,
                ProgressEvent::error(
                    run.project_id(),
                    step.name(),
                    progress.current(),
                    format!(
                        "{} failed (attempt {}), retrying in {} ms: {}",
                        step.display_name(),
                        attempt,
                        decision.delay.as_millis(),
                        err
                    ),
                ),
            )
            .await;
            tokio::time::sleep(decision.delay).await;
        }
    }

    async fn abort(
        &self,
        ctx: &InitializationContext,
        run: &RunPublisher,
        tracker: &StepTracker,
        step: &DynStep,
        at: u8,
        err: LaunchpadError,
    ) -> LaunchpadError {
        let project_id = ctx.project_id();
        let message = err.to_string();
        tracing::error!(project_id = %project_id, step = %step.name(), kind = %err.kind(), error = %message, "Initialization failed");

        tracker.set(step.name(), StepState::Failed, Some(message.clone())).await;
        // Only a project this run created or adopted is ours to mark.
        if ctx.project.is_some() {
            if let Err(e) = self.projects.mark_failed(project_id, &message).await {
                tracing::warn!(project_id = %project_id, error = %e, "Failed to record project failure");
            }
        }
        self.emit(run, ProgressEvent::failed(project_id, at, message)).await;
        run.schedule_cleanup();

        LaunchpadError::StepFailed {
            step: step.name().to_string(),
            project_id: project_id.to_string(),
            source: Box::new(err),
        }
    }

    async fn emit(&self, run: &RunPublisher, event: ProgressEvent) {
        if let Err(e) = run.publish(event).await {
            tracing::warn!(project_id = %run.project_id(), error = %e, "Failed to publish progress event");
        }
    }
}
