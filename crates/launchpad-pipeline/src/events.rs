//! Progress publication: a durable per-project slot plus pub/sub fan-out.
//!
//! Every event first passes through [`ProgressStore::advance`], which refuses
//! to move a project's progress backwards. Only accepted events reach the
//! `project:<id>` and `user:<id>` topics and local subscribers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use launchpad_types::{ProgressEvent, Result, Substep};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::ProgressConfig;

pub fn project_topic(project_id: &str) -> String {
    format!("project:{project_id}")
}

pub fn user_topic(user_id: &str) -> String {
    format!("user:{user_id}")
}

/// Last accepted progress for a project, tagged with the run that wrote it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub run_id: Uuid,
    pub state: String,
    pub progress: u8,
    pub message: String,
    pub substep: Option<Substep>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressSnapshot {
    pub fn from_event(run_id: Uuid, event: &ProgressEvent) -> Self {
        Self {
            run_id,
            state: event.state.clone(),
            progress: event.progress,
            message: event.message.clone(),
            substep: event.substep.clone(),
            timestamp: event.timestamp,
        }
    }

    /// Whether this snapshot may replace `current` in the slot.
    ///
    /// A slot owned by another run is never overwritten here; new runs take
    /// the slot through [`ProgressStore::reset`].
    pub fn may_replace(&self, current: &ProgressSnapshot) -> bool {
        self.run_id == current.run_id && self.progress >= current.progress
    }
}

/// Durable per-project progress slot.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Atomically store `snapshot` unless it would regress the slot.
    /// Returns whether the snapshot was accepted.
    async fn advance(&self, project_id: &str, snapshot: ProgressSnapshot) -> Result<bool>;

    /// Unconditionally overwrite the slot, used when a run begins.
    async fn reset(&self, project_id: &str, snapshot: ProgressSnapshot) -> Result<()>;

    async fn get(&self, project_id: &str) -> Result<Option<ProgressSnapshot>>;

    /// Delete the slot if it still belongs to `run_id`.
    async fn remove(&self, project_id: &str, run_id: Uuid) -> Result<bool>;
}

/// Topic-based pub/sub transport.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, topic: &str, event: &ProgressEvent) -> Result<()>;
}

// ---------------------------------------------------------------------------
// ProgressPublisher
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ProgressPublisher {
    store: Arc<dyn ProgressStore>,
    bus: Arc<dyn EventBus>,
    local: broadcast::Sender<ProgressEvent>,
    retention: Duration,
}

impl ProgressPublisher {
    pub fn new(store: Arc<dyn ProgressStore>, bus: Arc<dyn EventBus>, config: &ProgressConfig) -> Self {
        let (local, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            store,
            bus,
            local,
            retention: Duration::from_secs(config.retention_secs),
        }
    }

    /// Receive every accepted event for every project, in publication order.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.local.subscribe()
    }

    /// Current progress for a project, for clients that connect mid-run.
    pub async fn current(&self, project_id: &str) -> Result<Option<ProgressSnapshot>> {
        self.store.get(project_id).await
    }

    /// Open a publication scope for one execution of one job.
    pub fn begin_run(&self, project_id: impl Into<String>, user_id: impl Into<String>) -> RunPublisher {
        RunPublisher {
            inner: self.clone(),
            project_id: project_id.into(),
            user_id: user_id.into(),
            run_id: Uuid::new_v4(),
        }
    }
}

/// Publisher bound to a single run of a single project.
#[derive(Clone)]
pub struct RunPublisher {
    inner: ProgressPublisher,
    project_id: String,
    user_id: String,
    run_id: Uuid,
}

impl RunPublisher {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Claim the slot for this run, discarding whatever an earlier run left there.
    pub async fn start(&self, event: ProgressEvent) -> Result<()> {
        let snapshot = ProgressSnapshot::from_event(self.run_id, &event);
        self.inner.store.reset(&self.project_id, snapshot).await?;
        self.fan_out(&event).await
    }

    /// Publish an event. Returns `Ok(false)` when the event was dropped
    /// because it would have moved progress backwards.
    pub async fn publish(&self, event: ProgressEvent) -> Result<bool> {
        let snapshot = ProgressSnapshot::from_event(self.run_id, &event);
        if !self.inner.store.advance(&self.project_id, snapshot).await? {
            tracing::warn!(
                project_id = %self.project_id,
                state = %event.state,
                progress = event.progress,
                "Dropped regressing progress event"
            );
            return Ok(false);
        }
        self.fan_out(&event).await?;
        Ok(true)
    }

    async fn fan_out(&self, event: &ProgressEvent) -> Result<()> {
        let _ = self.inner.local.send(event.clone());
        self.inner
            .bus
            .publish(&project_topic(&self.project_id), event)
            .await?;
        self.inner.bus.publish(&user_topic(&self.user_id), event).await
    }

    /// Delete this run's slot once the grace period has passed.
    ///
    /// A newer run that reset the slot in the meantime keeps it.
    pub fn schedule_cleanup(&self) -> JoinHandle<()> {
        let store = self.inner.store.clone();
        let project_id = self.project_id.clone();
        let run_id = self.run_id;
        let retention = self.inner.retention;
        tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            match store.remove(&project_id, run_id).await {
                Ok(removed) => {
                    tracing::debug!(project_id = %project_id, removed, "Progress slot cleanup")
                }
                Err(e) => {
                    tracing::warn!(project_id = %project_id, error = %e, "Progress slot cleanup failed")
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryEventBus, MemoryProgressStore};

    fn publisher() -> (ProgressPublisher, Arc<MemoryEventBus>) {
        let bus = Arc::new(MemoryEventBus::default());
        let publisher = ProgressPublisher::new(
            Arc::new(MemoryProgressStore::default()),
            bus.clone(),
            &ProgressConfig::default(),
        );
        (publisher, bus)
    }

    // 1. Accepted events reach both topics and local subscribers
    #[tokio::test]
    async fn accepted_event_fans_out() {
        let (publisher, bus) = publisher();
        let mut rx = publisher.subscribe();
        let run = publisher.begin_run("p1", "u1");

        run.start(ProgressEvent::progress("p1", "started", 0, "Starting"))
            .await
            .unwrap();
        assert!(run
            .publish(ProgressEvent::progress("p1", "create_project", 10, "Created"))
            .await
            .unwrap());

        assert_eq!(rx.recv().await.unwrap().progress, 0);
        assert_eq!(rx.recv().await.unwrap().progress, 10);
        assert_eq!(bus.events_on("project:p1").await.len(), 2);
        assert_eq!(bus.events_on("user:u1").await.len(), 2);
        assert_eq!(publisher.current("p1").await.unwrap().unwrap().progress, 10);
    }

    // 2. Regressing event is dropped and not broadcast
    #[tokio::test]
    async fn regression_is_rejected() {
        let (publisher, bus) = publisher();
        let run = publisher.begin_run("p1", "u1");
        run.start(ProgressEvent::progress("p1", "started", 0, "Starting"))
            .await
            .unwrap();
        run.publish(ProgressEvent::progress("p1", "render_template", 40, "Rendered"))
            .await
            .unwrap();

        let accepted = run
            .publish(ProgressEvent::progress("p1", "load_template", 20, "late"))
            .await
            .unwrap();

        assert!(!accepted);
        assert_eq!(publisher.current("p1").await.unwrap().unwrap().progress, 40);
        assert_eq!(bus.events_on("project:p1").await.len(), 2);
    }

    // 3. Equal progress is allowed so error events can report at the current value
    #[tokio::test]
    async fn equal_progress_is_accepted() {
        let (publisher, _bus) = publisher();
        let run = publisher.begin_run("p1", "u1");
        run.start(ProgressEvent::progress("p1", "started", 0, "Starting"))
            .await
            .unwrap();
        run.publish(ProgressEvent::progress("p1", "create_project", 10, "Created"))
            .await
            .unwrap();
        assert!(run
            .publish(ProgressEvent::error("p1", "load_template", 10, "retrying"))
            .await
            .unwrap());
    }

    // 4. A new run resets the slot even below the previous run's progress
    #[tokio::test]
    async fn new_run_resets_slot() {
        let (publisher, _bus) = publisher();
        let first = publisher.begin_run("p1", "u1");
        first
            .start(ProgressEvent::progress("p1", "started", 0, "Starting"))
            .await
            .unwrap();
        first
            .publish(ProgressEvent::progress("p1", "setup_repository", 80, "Pushed"))
            .await
            .unwrap();

        let second = publisher.begin_run("p1", "u1");
        second
            .start(ProgressEvent::progress("p1", "started", 0, "Starting"))
            .await
            .unwrap();
        assert_eq!(publisher.current("p1").await.unwrap().unwrap().progress, 0);

        // Stale writes from the first run cannot touch the new slot.
        assert!(!first
            .publish(ProgressEvent::progress("p1", "create_gitops", 95, "late"))
            .await
            .unwrap());
    }

    // 5. Cleanup deletes the slot after the grace period
    #[tokio::test(start_paused = true)]
    async fn cleanup_after_grace_period() {
        let (publisher, _bus) = publisher();
        let run = publisher.begin_run("p1", "u1");
        run.start(ProgressEvent::progress("p1", "started", 0, "Starting"))
            .await
            .unwrap();

        let handle = run.schedule_cleanup();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(publisher.current("p1").await.unwrap().is_some());

        handle.await.unwrap();
        assert!(publisher.current("p1").await.unwrap().is_none());
    }

    // 6. Cleanup of an old run leaves a newer run's slot alone
    #[tokio::test(start_paused = true)]
    async fn cleanup_is_run_scoped() {
        let (publisher, _bus) = publisher();
        let old = publisher.begin_run("p1", "u1");
        old.start(ProgressEvent::progress("p1", "started", 0, "Starting"))
            .await
            .unwrap();
        let handle = old.schedule_cleanup();

        let new = publisher.begin_run("p1", "u1");
        new.start(ProgressEvent::progress("p1", "started", 0, "Starting"))
            .await
            .unwrap();

        handle.await.unwrap();
        let slot = publisher.current("p1").await.unwrap().unwrap();
        assert_eq!(slot.run_id, new.run_id());
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    // 7. A dropped regression is reported at warn level
    #[tokio::test]
    async fn regression_is_logged_as_warning() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let (publisher, _bus) = publisher();
        let run = publisher.begin_run("p1", "u1");
        run.start(ProgressEvent::progress("p1", "started", 0, "Starting"))
            .await
            .unwrap();
        run.publish(ProgressEvent::progress("p1", "render_template", 40, "Rendered"))
            .await
            .unwrap();
        run.publish(ProgressEvent::progress("p1", "load_template", 20, "late"))
            .await
            .unwrap();

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        let line = output
            .lines()
            .find(|l| l.contains("Dropped regressing progress event"))
            .expect("regression was logged");
        assert!(line.contains("WARN"), "unexpected level: {line}");
        assert!(line.contains("progress=20"));
    }
}
