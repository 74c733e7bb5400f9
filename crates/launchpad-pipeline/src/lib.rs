//! Project initialization orchestrator.
//!
//! This crate turns one enqueued [`InitializationJob`](launchpad_types::InitializationJob)
//! into a fully provisioned project: weighted step execution with progress
//! accounting, retry classification, progress fan-out with monotonic
//! enforcement, per-step status records, and the rate-limited queue worker.

pub mod config;
pub mod context;
pub mod engine;
pub mod events;
pub mod memory;
pub mod queue;
pub mod retry;
pub mod scaffold;
pub mod services;
pub mod step;
pub mod step_records;
pub mod steps;
pub mod worker;

pub use config::{
    DefaultEnvironments, EnvironmentTemplate, GitOpsConfig, LaunchpadConfig, ProgressConfig,
    QueueConfig, RepositoryDefaults, RetryConfig, TemplateDefaults, WorkerConfig,
};
pub use context::{InitializationContext, ResolvedCredentials};
pub use engine::{InitializationSummary, Orchestrator, StepPlan};
pub use events::{
    project_topic, user_topic, EventBus, ProgressPublisher, ProgressSnapshot, ProgressStore,
    RunPublisher,
};
pub use memory::MemoryBackend;
pub use queue::{DeadLetter, InMemoryQueue, JobFailure, JobQueue, QueuedJob};
pub use retry::{BackoffPolicy, ErrorClassifier, RetryDecision};
pub use scaffold::{default_scaffold, expand_variables};
pub use services::{
    AccountStore, AuditSink, EnvironmentStore, Notifier, ProjectStore, RepositoryProvider,
    RepositoryProviders, RepositoryStore, Services, SyncResourceProvider, TemplateCatalog,
    TemplateVariables,
};
pub use step::{names, Criticality, DynStep, InitStep, StepProgress};
pub use step_records::{StepRecord, StepRecordStore, StepState, StepTracker};
pub use steps::default_steps;
pub use worker::{Worker, WorkerStats};
