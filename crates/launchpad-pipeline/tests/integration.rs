//! End-to-end tests for the initialization pipeline.
//!
//! Each test wires the default steps over the in-memory backend and drives a
//! job through the orchestrator (or the worker), then inspects the published
//! events and the collaborators' recorded state.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use launchpad_pipeline::memory::{self, MemoryBackend, MemoryEnvironmentStore, MemoryProjectStore};
use launchpad_pipeline::{
    names, project_topic, user_topic, EnvironmentStore, InMemoryQueue, InitializationContext, JobQueue,
    LaunchpadConfig, Orchestrator, ProjectStore, QueueConfig, RepositoryStore, StepRecordStore,
    StepState, Worker, WorkerConfig,
};
use launchpad_types::{
    AccountStatus, EnvironmentKind, EnvironmentRecord, EventType, GitProvider, InitializationJob,
    LaunchpadError, LinkedAccount, NewEnvironment, ProgressEvent, ProjectRecord, ProjectStatus,
    RenderedFile, RepositoryRequest, Result, TemplateMetadata, TokenSource, Visibility,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn orchestrator(backend: &MemoryBackend) -> Orchestrator {
    Orchestrator::with_default_steps(&backend.services(), backend.publisher(), &LaunchpadConfig::default())
        .expect("default steps are valid")
}

fn create_request(token: Option<TokenSource>) -> RepositoryRequest {
    RepositoryRequest::Create {
        provider: GitProvider::Github,
        name: "billing".into(),
        visibility: Visibility::Private,
        branch: None,
        access_token: token,
    }
}

fn full_job() -> InitializationJob {
    let mut job = memory::sample_job("p1", "billing");
    job.project.template_id = Some("service".into());
    job.repository = Some(create_request(Some(TokenSource::Explicit("ghp_explicit".into()))));
    job
}

async fn seed_template(backend: &MemoryBackend) {
    backend
        .templates
        .add(
            TemplateMetadata {
                id: "service".into(),
                name: "Service".into(),
                description: Some("HTTP service".into()),
            },
            vec![
                RenderedFile::new("README.md", "# ${projectName}\n\n${description}\n"),
                RenderedFile::new(
                    "k8s/base/deployment.yaml",
                    "name: ${projectSlug}\nimage: ${registry}/${projectSlug}\nport: ${port}\n",
                ),
                RenderedFile::new("deploy/source.txt", "${repositoryUrl}@${repositoryBranch}\n"),
            ],
        )
        .await;
}

fn linked(status: AccountStatus) -> LinkedAccount {
    LinkedAccount {
        user_id: "u1".into(),
        provider: GitProvider::Github,
        username: "octo".into(),
        access_token: "gho_linked".into(),
        status,
        expires_at: None,
    }
}

/// Environment store whose second `create` fails once with a storage error.
struct FlakyEnvironments {
    inner: Arc<MemoryEnvironmentStore>,
    creates: AtomicUsize,
}

#[async_trait]
impl EnvironmentStore for FlakyEnvironments {
    async fn get(&self, id: &str) -> Result<Option<EnvironmentRecord>> {
        self.inner.get(id).await
    }

    async fn create(&self, environment: NewEnvironment) -> Result<EnvironmentRecord> {
        if self.creates.fetch_add(1, Ordering::SeqCst) == 1 {
            return Err(LaunchpadError::Storage("connection reset".into()));
        }
        self.inner.create(environment).await
    }

    async fn list_for_project(&self, project_id: &str) -> Result<Vec<EnvironmentRecord>> {
        self.inner.list_for_project(project_id).await
    }
}

/// Project store whose first `mark_active` fails with a storage error.
struct FlakyActivation {
    inner: Arc<MemoryProjectStore>,
    activations: AtomicUsize,
}

#[async_trait]
impl ProjectStore for FlakyActivation {
    async fn get(&self, id: &str) -> Result<Option<ProjectRecord>> {
        self.inner.get(id).await
    }

    async fn insert(&self, project: ProjectRecord) -> Result<ProjectRecord> {
        self.inner.insert(project).await
    }

    async fn mark_initializing(&self, id: &str) -> Result<()> {
        self.inner.mark_initializing(id).await
    }

    async fn mark_active(&self, id: &str, completed_at: DateTime<Utc>) -> Result<()> {
        if self.activations.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(LaunchpadError::Storage("deadlock detected".into()));
        }
        self.inner.mark_active(id, completed_at).await
    }

    async fn mark_failed(&self, id: &str, reason: &str) -> Result<()> {
        self.inner.mark_failed(id, reason).await
    }
}

fn assert_monotonic(events: &[ProgressEvent]) {
    let values: Vec<u8> = events.iter().map(|e| e.progress).collect();
    assert!(
        values.windows(2).all(|w| w[0] <= w[1]),
        "progress went backwards: {values:?}"
    );
}

// ---------------------------------------------------------------------------
// Test 1: every step runs, progress climbs to 100
// ---------------------------------------------------------------------------

#[tokio::test]
async fn full_job_runs_every_step() {
    let backend = MemoryBackend::new();
    seed_template(&backend).await;

    let summary = orchestrator(&backend)
        .run(InitializationContext::new(full_job()))
        .await
        .expect("initialization should succeed");

    // 1. All seven steps completed, nothing skipped
    assert_eq!(
        summary.completed_steps,
        vec![
            names::CREATE_PROJECT,
            names::LOAD_TEMPLATE,
            names::RENDER_TEMPLATE,
            names::CREATE_ENVIRONMENTS,
            names::SETUP_REPOSITORY,
            names::CREATE_GITOPS,
            names::FINALIZE,
        ]
    );
    assert!(summary.skipped_steps.is_empty());
    assert!(summary.warnings.is_empty(), "unexpected warnings: {:?}", summary.warnings);
    assert_eq!(summary.environment_count, 3);
    assert_eq!(summary.sync_resource_count, 3);

    // 2. Events on both topics, monotonic, ending in a single completion at 100
    let events = backend.bus.events_on(&project_topic("p1")).await;
    assert_monotonic(&events);
    let last = events.last().expect("events were published");
    assert_eq!(last.event_type, EventType::Completed);
    assert_eq!(last.progress, 100);
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    assert_eq!(backend.bus.events_on(&user_topic("u1")).await.len(), events.len());

    // 3. Template rendered with the created repository's URL, pushed in one commit
    let pushes = backend.github.pushes().await;
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].token, "ghp_explicit");
    assert_eq!(pushes[0].message, "Initial commit: add 3 project files");
    let source = pushes[0]
        .files
        .iter()
        .find(|f| f.path == "deploy/source.txt")
        .expect("rendered file pushed");
    assert_eq!(source.content, "https://github.com/launchpad-test/billing.git@main\n");

    // 4. One sync resource per environment kind
    let mut resources: Vec<String> = backend.sync.created().await.into_iter().map(|s| s.name).collect();
    resources.sort();
    assert_eq!(resources, vec!["billing-development", "billing-production", "billing-staging"]);

    // 5. Project active, audit written, step records completed
    let project = backend.projects.get("p1").await.unwrap().unwrap();
    assert_eq!(project.status, ProjectStatus::Active);
    assert_eq!(backend.audit.entries().await.len(), 1);
    let records = backend.step_records.list("p1").await.unwrap();
    assert_eq!(records.len(), 7);
    assert!(records.iter().all(|r| r.state == StepState::Completed));
}

// ---------------------------------------------------------------------------
// Test 2: steps whose guard is false still count toward progress
// ---------------------------------------------------------------------------

#[tokio::test]
async fn minimal_job_skips_optional_steps_and_reaches_100() {
    let backend = MemoryBackend::new();

    let summary = orchestrator(&backend)
        .run(InitializationContext::new(memory::sample_job("p1", "billing")))
        .await
        .unwrap();

    assert_eq!(
        summary.skipped_steps,
        vec![
            names::LOAD_TEMPLATE,
            names::RENDER_TEMPLATE,
            names::SETUP_REPOSITORY,
            names::CREATE_GITOPS,
        ]
    );
    assert_eq!(
        summary.completed_steps,
        vec![names::CREATE_PROJECT, names::CREATE_ENVIRONMENTS, names::FINALIZE]
    );

    // No side effects from skipped steps
    assert!(backend.github.created().await.is_empty());
    assert!(backend.sync.created().await.is_empty());
    assert!(backend.repositories.find_by_project("p1").await.unwrap().is_none());

    let events = backend.bus.events_on(&project_topic("p1")).await;
    assert_monotonic(&events);
    assert_eq!(events.last().unwrap().progress, 100);
    // Skipped steps publish nothing under their own name
    assert!(!events.iter().any(|e| e.state == names::SETUP_REPOSITORY));

    let records = backend.step_records.list("p1").await.unwrap();
    let skipped = records.iter().filter(|r| r.state == StepState::Skipped).count();
    assert_eq!(skipped, 4);
}

// ---------------------------------------------------------------------------
// Test 3: GitOps failures never fail the job
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_gitops_controller_is_a_warning() {
    let backend = MemoryBackend::new();
    seed_template(&backend).await;
    backend.sync.set_installed(false).await;

    let summary = orchestrator(&backend)
        .run(InitializationContext::new(full_job()))
        .await
        .expect("GitOps problems must not fail the job");

    assert_eq!(summary.sync_resource_count, 0);
    assert_eq!(summary.warnings.len(), 1);
    assert!(summary.warnings[0].contains("not installed"));
    assert!(summary.completed_steps.contains(&names::FINALIZE.to_string()));

    let project = backend.projects.get("p1").await.unwrap().unwrap();
    assert_eq!(project.status, ProjectStatus::Active);
    let audit = backend.audit.entries().await;
    assert_eq!(audit[0].metadata["gitopsResourceCount"], 0);
}

#[tokio::test]
async fn every_sync_call_failing_is_a_warning() {
    let backend = MemoryBackend::new();
    seed_template(&backend).await;

    let mut job = full_job();
    for (name, kind) in [("Dev", EnvironmentKind::Development), ("Prod", EnvironmentKind::Production)] {
        let env = backend
            .environments
            .create(NewEnvironment {
                project_id: "p1".into(),
                name: name.into(),
                kind,
                approval_required: false,
                min_approvals: 1,
            })
            .await
            .unwrap();
        backend.sync.fail_for(&env.id).await;
        job.environment_ids.push(env.id);
    }

    let summary = orchestrator(&backend)
        .run(InitializationContext::new(job))
        .await
        .unwrap();

    assert_eq!(summary.environment_count, 2);
    assert_eq!(summary.sync_resource_count, 0);
    assert!(summary.warnings[0].contains("2 of 2"));
    assert!(summary.skipped_steps.contains(&names::CREATE_GITOPS.to_string()));

    let events = backend.bus.events_on(&project_topic("p1")).await;
    assert_eq!(events.last().unwrap().event_type, EventType::Completed);
}

// ---------------------------------------------------------------------------
// Test 4: a fatal repository error stops the run
// ---------------------------------------------------------------------------

#[tokio::test]
async fn repository_auth_failure_aborts_the_run() {
    let backend = MemoryBackend::new();
    seed_template(&backend).await;
    backend
        .github
        .fail_next_create(LaunchpadError::Provider {
            provider: "github".into(),
            status: 401,
            message: "Bad credentials".into(),
            rate_limit_reset: None,
        })
        .await;

    let err = orchestrator(&backend)
        .run(InitializationContext::new(full_job()))
        .await
        .unwrap_err();

    match &err {
        LaunchpadError::StepFailed { step, .. } => assert_eq!(step, names::SETUP_REPOSITORY),
        other => panic!("expected StepFailed, got {other:?}"),
    }

    // Nothing after the failing step ran
    assert!(backend.sync.created().await.is_empty());
    assert!(backend.audit.entries().await.is_empty());
    assert!(backend.notifier.sent().await.is_empty());

    let project = backend.projects.get("p1").await.unwrap().unwrap();
    assert_eq!(project.status, ProjectStatus::Failed);
    assert!(project.initialization_error.unwrap().contains("Bad credentials"));

    let events = backend.bus.events_on(&project_topic("p1")).await;
    assert_monotonic(&events);
    let last = events.last().unwrap();
    assert_eq!(last.event_type, EventType::Failed);
    assert!(last.progress < 100);

    let records = backend.step_records.list("p1").await.unwrap();
    let state_of = |step: &str| records.iter().find(|r| r.step == step).map(|r| r.state);
    assert_eq!(state_of(names::SETUP_REPOSITORY), Some(StepState::Failed));
    assert_eq!(state_of(names::CREATE_GITOPS), Some(StepState::Pending));
    assert_eq!(state_of(names::FINALIZE), Some(StepState::Pending));
}

// ---------------------------------------------------------------------------
// Test 5: duplicate slug surfaces an actionable error
// ---------------------------------------------------------------------------

#[tokio::test]
async fn duplicate_slug_is_reported_as_identifier_conflict() {
    let backend = MemoryBackend::new();
    let orchestrator = orchestrator(&backend);

    orchestrator
        .run(InitializationContext::new(memory::sample_job("p1", "billing")))
        .await
        .unwrap();
    let err = orchestrator
        .run(InitializationContext::new(memory::sample_job("p2", "billing")))
        .await
        .unwrap_err();

    assert!(matches!(err.root(), LaunchpadError::DuplicateIdentifier { .. }));
    assert!(err.to_string().contains("already exists"));
    assert!(!err.is_retryable());
    // The first project is untouched
    let first = backend.projects.get("p1").await.unwrap().unwrap();
    assert_eq!(first.status, ProjectStatus::Active);
}

// ---------------------------------------------------------------------------
// Test 6: linked-account fallback distinguishes missing from expired
// ---------------------------------------------------------------------------

#[tokio::test]
async fn linked_account_errors_are_distinguishable() {
    let missing = MemoryBackend::new();
    let mut job = memory::sample_job("p1", "billing");
    job.repository = Some(create_request(Some(TokenSource::Linked)));
    let no_account = orchestrator(&missing)
        .run(InitializationContext::new(job.clone()))
        .await
        .unwrap_err();

    let stale = MemoryBackend::new();
    stale.accounts.link(linked(AccountStatus::Revoked)).await;
    let expired = orchestrator(&stale)
        .run(InitializationContext::new(job))
        .await
        .unwrap_err();

    assert!(matches!(no_account.root(), LaunchpadError::NoLinkedAccount { .. }));
    assert!(matches!(expired.root(), LaunchpadError::LinkedAccountExpired { .. }));
    assert_ne!(no_account.root().to_string(), expired.root().to_string());
    assert!(no_account.to_string().contains("No linked GitHub account"));
    assert!(expired.to_string().contains("expired"));
}

#[tokio::test]
async fn linked_account_token_is_used_when_no_explicit_token() {
    let backend = MemoryBackend::new();
    backend.accounts.link(linked(AccountStatus::Active)).await;
    let mut job = memory::sample_job("p1", "billing");
    job.repository = Some(create_request(None));

    let summary = orchestrator(&backend)
        .run(InitializationContext::new(job))
        .await
        .unwrap();

    assert_eq!(summary.repository.unwrap().full_name, "launchpad-test/billing");
    let pushes = backend.github.pushes().await;
    assert_eq!(pushes[0].token, "gho_linked");
    // Built-in scaffold when no template was chosen
    assert_eq!(pushes[0].files.len(), 8);
}

// ---------------------------------------------------------------------------
// Test 7: worker retries a transiently failing job end to end
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn worker_redelivers_after_transient_failure() {
    let backend = MemoryBackend::new();
    let config = LaunchpadConfig::default();
    // Enough 502s to exhaust the in-step retries of the first delivery
    for _ in 0..config.retry.max_attempts {
        backend
            .github
            .fail_next_create(LaunchpadError::Provider {
                provider: "github".into(),
                status: 502,
                message: "Bad Gateway".into(),
                rate_limit_reset: None,
            })
            .await;
    }

    let orchestrator = Orchestrator::with_default_steps(&backend.services(), backend.publisher(), &config).unwrap();
    let queue = Arc::new(InMemoryQueue::new(&config.queue));
    let mut job = memory::sample_job("p1", "billing");
    job.repository = Some(create_request(Some(TokenSource::Explicit("ghp_x".into()))));
    queue.enqueue(job).await.unwrap();
    queue.close().await;

    let worker = Worker::new(queue.clone(), Arc::new(orchestrator), &config.worker).unwrap();
    let stats = worker.run().await;

    // 1. First delivery failed, second succeeded
    assert_eq!(stats.processed, 2);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.succeeded, 1);
    assert_eq!(queue.completed().await.len(), 1);
    assert!(queue.dead_letters().await.is_empty());

    // 2. Replay reused the project and its environments
    let project = backend.projects.get("p1").await.unwrap().unwrap();
    assert_eq!(project.status, ProjectStatus::Active);
    assert_eq!(backend.environments.list_for_project("p1").await.unwrap().len(), 3);
    assert_eq!(backend.github.created().await.len(), 1);

    // 3. Retry notices were published as error events
    let events = backend.bus.events_on(&project_topic("p1")).await;
    assert!(events.iter().any(|e| e.event_type == EventType::Error && e.message.contains("retrying")));
    assert_eq!(events.last().unwrap().event_type, EventType::Completed);
}

#[tokio::test]
async fn worker_dead_letters_non_retryable_failure() {
    let backend = MemoryBackend::new();
    let config = LaunchpadConfig::default();
    let orchestrator = Orchestrator::with_default_steps(&backend.services(), backend.publisher(), &config).unwrap();
    let queue = Arc::new(InMemoryQueue::new(&QueueConfig::default()));

    let mut job = memory::sample_job("p1", "billing");
    job.project.template_id = Some("does-not-exist".into());
    queue.enqueue(job).await.unwrap();
    queue.close().await;

    let worker = Worker::new(
        queue.clone(),
        Arc::new(orchestrator),
        &WorkerConfig {
            concurrency: 1,
            jobs_per_second: 10,
        },
    )
    .unwrap();
    let stats = worker.run().await;

    assert_eq!(stats.failed, 1);
    let dead = queue.dead_letters().await;
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].attempts, 1);
    assert!(dead[0].error.contains("does-not-exist"));

    let project = backend.projects.get("p1").await.unwrap().unwrap();
    assert_eq!(project.status, ProjectStatus::Failed);
}

// ---------------------------------------------------------------------------
// Test: in-step retry of CreateEnvironments after a partial failure
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn environment_retry_after_partial_failure_creates_every_default() {
    let backend = MemoryBackend::new();
    let flaky = Arc::new(FlakyEnvironments {
        inner: backend.environments.clone(),
        creates: AtomicUsize::new(0),
    });
    let mut services = backend.services();
    services.environments = flaky.clone();
    let orchestrator =
        Orchestrator::with_default_steps(&services, backend.publisher(), &LaunchpadConfig::default()).unwrap();

    let summary = orchestrator
        .run(InitializationContext::new(memory::sample_job("p1", "billing")))
        .await
        .expect("retry should recover");

    // 1. All three defaults exist exactly once
    assert_eq!(summary.environment_count, 3);
    let mut kinds: Vec<EnvironmentKind> = backend
        .environments
        .list_for_project("p1")
        .await
        .unwrap()
        .iter()
        .map(|e| e.kind)
        .collect();
    kinds.sort_by_key(|k| k.as_str());
    assert_eq!(
        kinds,
        vec![EnvironmentKind::Development, EnvironmentKind::Production, EnvironmentKind::Staging]
    );

    // 2. Four create calls: one stored, one failed, then the two missing ones
    assert_eq!(flaky.creates.load(Ordering::SeqCst), 4);

    // 3. The step completed after a retry and the project is active
    let records = backend.step_records.list("p1").await.unwrap();
    let record = records
        .iter()
        .find(|r| r.step == names::CREATE_ENVIRONMENTS)
        .unwrap();
    assert_eq!(record.state, StepState::Completed);
    let events = backend.bus.events_on(&project_topic("p1")).await;
    assert!(events
        .iter()
        .any(|e| e.event_type == EventType::Error && e.state == names::CREATE_ENVIRONMENTS));
    let project = backend.projects.get("p1").await.unwrap().unwrap();
    assert_eq!(project.status, ProjectStatus::Active);
}

// ---------------------------------------------------------------------------
// Test: in-step retry of Finalize audits and notifies once
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn finalize_retry_audits_and_notifies_once() {
    let backend = MemoryBackend::new();
    let mut services = backend.services();
    services.projects = Arc::new(FlakyActivation {
        inner: backend.projects.clone(),
        activations: AtomicUsize::new(0),
    });
    let orchestrator =
        Orchestrator::with_default_steps(&services, backend.publisher(), &LaunchpadConfig::default()).unwrap();

    let summary = orchestrator
        .run(InitializationContext::new(memory::sample_job("p1", "billing")))
        .await
        .expect("retry should recover");

    assert_eq!(summary.completed_steps.last().map(String::as_str), Some(names::FINALIZE));
    let project = backend.projects.get("p1").await.unwrap().unwrap();
    assert_eq!(project.status, ProjectStatus::Active);
    assert!(project.initialization_completed_at.is_some());
    assert_eq!(backend.audit.entries().await.len(), 1);
    assert_eq!(backend.notifier.sent().await.len(), 1);

    let events = backend.bus.events_on(&project_topic("p1")).await;
    assert_monotonic(&events);
    assert_eq!(events.last().unwrap().event_type, EventType::Completed);
}
