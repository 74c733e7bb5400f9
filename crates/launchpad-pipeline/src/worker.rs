//! Queue-facing worker: pulls jobs, bounds concurrency, and reports outcomes.

use std::num::NonZeroU32;
use std::sync::Arc;

use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use launchpad_types::{LaunchpadError, Result};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::WorkerConfig;
use crate::context::InitializationContext;
use crate::engine::{InitializationSummary, Orchestrator};
use crate::queue::{JobFailure, JobQueue, QueuedJob};

type JobLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
}

pub struct Worker {
    queue: Arc<dyn JobQueue>,
    orchestrator: Arc<Orchestrator>,
    permits: Arc<Semaphore>,
    limiter: Arc<JobLimiter>,
}

impl Worker {
    pub fn new(queue: Arc<dyn JobQueue>, orchestrator: Arc<Orchestrator>, config: &WorkerConfig) -> Result<Self> {
        if config.concurrency == 0 {
            return Err(LaunchpadError::Config("worker.concurrency must be at least 1".into()));
        }
        let rate = NonZeroU32::new(config.jobs_per_second)
            .ok_or_else(|| LaunchpadError::Config("worker.jobs_per_second must be at least 1".into()))?;

        Ok(Self {
            queue,
            orchestrator,
            permits: Arc::new(Semaphore::new(config.concurrency)),
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(rate))),
        })
    }

    /// Process jobs until the queue reports it is closed and drained.
    pub async fn run(&self) -> WorkerStats {
        let mut tasks = JoinSet::new();

        loop {
            let permit = match self.permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let Some(job) = self.queue.dequeue().await else {
                break;
            };
            self.limiter.until_ready().await;

            let queue = self.queue.clone();
            let orchestrator = self.orchestrator.clone();
            tasks.spawn(async move {
                let outcome = Self::process(queue.as_ref(), &orchestrator, job).await;
                drop(permit);
                outcome.is_ok()
            });
        }

        let mut stats = WorkerStats::default();
        while let Some(joined) = tasks.join_next().await {
            stats.processed += 1;
            match joined {
                Ok(true) => stats.succeeded += 1,
                Ok(false) => stats.failed += 1,
                Err(e) => {
                    tracing::error!(error = %e, "Initialization task panicked");
                    stats.failed += 1;
                }
            }
        }
        tracing::info!(
            processed = stats.processed,
            succeeded = stats.succeeded,
            failed = stats.failed,
            "Worker stopped"
        );
        stats
    }

    /// Run one job and report the result to the queue.
    ///
    /// Whether the queue may retry depends only on the error's kind; attempt
    /// counting is the queue's business.
    pub async fn process(
        queue: &dyn JobQueue,
        orchestrator: &Orchestrator,
        job: QueuedJob,
    ) -> Result<InitializationSummary> {
        tracing::info!(
            job_id = %job.id,
            project_id = %job.payload.project_id,
            attempt = job.attempt,
            "Processing initialization job"
        );

        let result = match job.payload.validate() {
            Ok(()) => {
                orchestrator
                    .run(InitializationContext::new(job.payload.clone()))
                    .await
            }
            Err(e) => Err(e),
        };

        match &result {
            Ok(summary) => {
                if let Err(e) = queue.complete(&job).await {
                    tracing::warn!(job_id = %job.id, error = %e, "Failed to acknowledge job");
                }
                tracing::info!(
                    job_id = %job.id,
                    project_id = %summary.project_id,
                    warnings = summary.warnings.len(),
                    "Initialization job succeeded"
                );
            }
            Err(err) => {
                let failure = JobFailure {
                    message: err.to_string(),
                    retryable: err.is_retryable(),
                };
                tracing::error!(
                    job_id = %job.id,
                    project_id = %job.payload.project_id,
                    retryable = failure.retryable,
                    error = %failure.message,
                    "Initialization job failed"
                );
                if let Err(e) = queue.fail(&job, failure).await {
                    tracing::warn!(job_id = %job.id, error = %e, "Failed to report job failure");
                }
            }
        }
        result
    }
}
