//! Job queue contract and an in-process implementation.
//!
//! The queue owns whole-job retries: a failed job that is still retryable is
//! re-delivered after a backoff until `max_attempts` is reached, then moved to
//! the dead-letter list.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use launchpad_types::{InitializationJob, LaunchpadError, Result};
use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::retry::BackoffPolicy;

#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub id: String,
    /// 1-based delivery count.
    pub attempt: u32,
    pub payload: InitializationJob,
}

#[derive(Debug, Clone)]
pub struct JobFailure {
    pub message: String,
    pub retryable: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeadLetter {
    pub job_id: String,
    pub project_id: String,
    pub attempts: u32,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: InitializationJob) -> Result<String>;

    /// Wait for the next job. Returns `None` once the queue is closed and
    /// nothing is queued, delayed, or in flight.
    async fn dequeue(&self) -> Option<QueuedJob>;

    async fn complete(&self, job: &QueuedJob) -> Result<()>;

    async fn fail(&self, job: &QueuedJob, failure: JobFailure) -> Result<()>;
}

// ---------------------------------------------------------------------------
// InMemoryQueue
// ---------------------------------------------------------------------------

#[derive(Default)]
struct QueueState {
    ready: VecDeque<QueuedJob>,
    in_flight: HashMap<String, QueuedJob>,
    delayed: usize,
    closed: bool,
    completed: Vec<String>,
    dead: Vec<DeadLetter>,
}

impl QueueState {
    fn drained(&self) -> bool {
        self.ready.is_empty() && self.in_flight.is_empty() && self.delayed == 0
    }
}

struct Shared {
    state: Mutex<QueueState>,
    notify: Notify,
}

pub struct InMemoryQueue {
    shared: Arc<Shared>,
    max_attempts: u32,
    backoff: BackoffPolicy,
}

impl InMemoryQueue {
    pub fn new(config: &QueueConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
            }),
            max_attempts: config.max_attempts,
            backoff: BackoffPolicy::Exponential {
                base: std::time::Duration::from_millis(config.base_delay_ms),
                max: std::time::Duration::from_millis(config.max_delay_ms),
                jitter: 0.0,
            },
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Stop accepting jobs. Dequeue returns `None` once everything has drained.
    pub async fn close(&self) {
        self.shared.state.lock().await.closed = true;
        self.shared.notify.notify_waiters();
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.shared.state.lock().await.dead.clone()
    }

    pub async fn completed(&self) -> Vec<String> {
        self.shared.state.lock().await.completed.clone()
    }

    fn take_in_flight(state: &mut QueueState, job: &QueuedJob) -> Result<QueuedJob> {
        state
            .in_flight
            .remove(&job.id)
            .ok_or_else(|| LaunchpadError::NotFound {
                resource: "In-flight job".into(),
                id: job.id.clone(),
            })
    }
}

#[async_trait]
impl JobQueue for InMemoryQueue {
    async fn enqueue(&self, job: InitializationJob) -> Result<String> {
        let mut state = self.shared.state.lock().await;
        if state.closed {
            return Err(LaunchpadError::Conflict("queue is closed".into()));
        }
        let id = Uuid::new_v4().to_string();
        tracing::debug!(job_id = %id, project_id = %job.project_id, "Job enqueued");
        state.ready.push_back(QueuedJob {
            id: id.clone(),
            attempt: 1,
            payload: job,
        });
        drop(state);
        self.shared.notify.notify_waiters();
        Ok(id)
    }

    async fn dequeue(&self) -> Option<QueuedJob> {
        loop {
            let notified = self.shared.notify.notified();
            {
                let mut state = self.shared.state.lock().await;
                if let Some(job) = state.ready.pop_front() {
                    state.in_flight.insert(job.id.clone(), job.clone());
                    return Some(job);
                }
                if state.closed && state.drained() {
                    return None;
                }
            }
            notified.await;
        }
    }

    async fn complete(&self, job: &QueuedJob) -> Result<()> {
        let mut state = self.shared.state.lock().await;
        Self::take_in_flight(&mut state, job)?;
        state.completed.push(job.id.clone());
        drop(state);
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn fail(&self, job: &QueuedJob, failure: JobFailure) -> Result<()> {
        let mut state = self.shared.state.lock().await;
        let job = Self::take_in_flight(&mut state, job)?;

        if !failure.retryable || job.attempt >= self.max_attempts {
            tracing::warn!(
                job_id = %job.id,
                project_id = %job.payload.project_id,
                attempts = job.attempt,
                retryable = failure.retryable,
                error = %failure.message,
                "Job moved to dead-letter list"
            );
            state.dead.push(DeadLetter {
                job_id: job.id.clone(),
                project_id: job.payload.project_id.clone(),
                attempts: job.attempt,
                error: failure.message,
                failed_at: Utc::now(),
            });
            drop(state);
            self.shared.notify.notify_waiters();
            return Ok(());
        }

        let delay = self.backoff.delay_for_attempt(job.attempt - 1);
        tracing::info!(
            job_id = %job.id,
            project_id = %job.payload.project_id,
            attempt = job.attempt,
            delay_ms = %delay.as_millis(),
            "Job will be re-delivered"
        );
        state.delayed += 1;
        drop(state);

        let shared = self.shared.clone();
        let retry = QueuedJob {
            attempt: job.attempt + 1,
            ..job
        };
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut state = shared.state.lock().await;
            state.delayed -= 1;
            state.ready.push_back(retry);
            drop(state);
            shared.notify.notify_waiters();
        });
        Ok(())
    }
}
