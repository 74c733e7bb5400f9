//! In-memory implementations of every collaborator.
//!
//! Used by the test suites and by the CLI's local dry run. Failure injection
//! hooks (`fail_next_push`, `fail_for`, `set_failing`, ...) let tests script
//! provider behavior.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use launchpad_types::{
    AuditEntry, CreateRepositoryOptions, EnvironmentRecord, GitProvider, InitializationJob,
    LaunchpadError, LinkedAccount, NewEnvironment, Notification, ProjectRecord, ProjectSpec,
    ProjectStatus, RenderedFile, RepoInfo, RepositoryRecord, Result, SyncResource,
    SyncResourceSpec, TemplateMetadata,
};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::config::ProgressConfig;
use crate::events::{EventBus, ProgressPublisher, ProgressSnapshot, ProgressStore, RunPublisher};
use crate::scaffold::{expand_variables, unresolved_placeholder};
use crate::services::{
    AccountStore, AuditSink, EnvironmentStore, Notifier, ProjectStore, RepositoryProvider,
    RepositoryProviders, RepositoryStore, Services, SyncResourceProvider, TemplateCatalog,
    TemplateVariables,
};
use crate::step::StepProgress;
use crate::step_records::{StepRecord, StepRecordStore, StepState};

// ---------------------------------------------------------------------------
// Stores
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryProjectStore {
    projects: RwLock<HashMap<String, ProjectRecord>>,
}

impl MemoryProjectStore {
    async fn update(&self, id: &str, f: impl FnOnce(&mut ProjectRecord)) -> Result<()> {
        let mut projects = self.projects.write().await;
        let project = projects.get_mut(id).ok_or_else(|| LaunchpadError::NotFound {
            resource: "Project".into(),
            id: id.to_string(),
        })?;
        f(project);
        project.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl ProjectStore for MemoryProjectStore {
    async fn get(&self, id: &str) -> Result<Option<ProjectRecord>> {
        Ok(self.projects.read().await.get(id).cloned())
    }

    async fn insert(&self, project: ProjectRecord) -> Result<ProjectRecord> {
        let mut projects = self.projects.write().await;
        if projects.contains_key(&project.id) {
            return Err(LaunchpadError::UniqueViolation {
                constraint: "projects_pkey".into(),
                message: format!("project {} already exists", project.id),
            });
        }
        let slug_taken = projects
            .values()
            .any(|p| p.organization_id == project.organization_id && p.slug == project.slug);
        if slug_taken {
            return Err(LaunchpadError::UniqueViolation {
                constraint: "projects_organization_id_slug_key".into(),
                message: format!("duplicate key value (slug)=({})", project.slug),
            });
        }
        projects.insert(project.id.clone(), project.clone());
        Ok(project)
    }

    async fn mark_initializing(&self, id: &str) -> Result<()> {
        self.update(id, |p| {
            p.status = ProjectStatus::Initializing;
            p.initialization_error = None;
            p.initialization_completed_at = None;
        })
        .await
    }

    async fn mark_active(&self, id: &str, completed_at: DateTime<Utc>) -> Result<()> {
        self.update(id, |p| {
            p.status = ProjectStatus::Active;
            p.initialization_error = None;
            p.initialization_completed_at = Some(completed_at);
        })
        .await
    }

    async fn mark_failed(&self, id: &str, reason: &str) -> Result<()> {
        let reason = reason.to_string();
        self.update(id, |p| {
            p.status = ProjectStatus::Failed;
            p.initialization_error = Some(reason);
        })
        .await
    }
}

#[derive(Default)]
pub struct MemoryEnvironmentStore {
    environments: RwLock<Vec<EnvironmentRecord>>,
}

#[async_trait]
impl EnvironmentStore for MemoryEnvironmentStore {
    async fn get(&self, id: &str) -> Result<Option<EnvironmentRecord>> {
        Ok(self
            .environments
            .read()
            .await
            .iter()
            .find(|e| e.id == id)
            .cloned())
    }

    async fn create(&self, environment: NewEnvironment) -> Result<EnvironmentRecord> {
        let record = EnvironmentRecord {
            id: Uuid::new_v4().to_string(),
            project_id: environment.project_id,
            name: environment.name,
            kind: environment.kind,
            approval_required: environment.approval_required,
            min_approvals: environment.min_approvals,
        };
        self.environments.write().await.push(record.clone());
        Ok(record)
    }

    async fn list_for_project(&self, project_id: &str) -> Result<Vec<EnvironmentRecord>> {
        Ok(self
            .environments
            .read()
            .await
            .iter()
            .filter(|e| e.project_id == project_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryRepositoryStore {
    records: RwLock<Vec<RepositoryRecord>>,
}

#[async_trait]
impl RepositoryStore for MemoryRepositoryStore {
    async fn find_by_project(&self, project_id: &str) -> Result<Option<RepositoryRecord>> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .find(|r| r.project_id == project_id)
            .cloned())
    }

    async fn create(
        &self,
        project_id: &str,
        provider: GitProvider,
        repo: &RepoInfo,
        linked: bool,
    ) -> Result<RepositoryRecord> {
        let record = RepositoryRecord {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            provider,
            full_name: repo.full_name.clone(),
            clone_url: repo.clone_url.clone(),
            default_branch: repo.default_branch.clone(),
            linked,
            created_at: Utc::now(),
        };
        self.records.write().await.push(record.clone());
        Ok(record)
    }
}

#[derive(Default)]
pub struct MemoryAccountStore {
    accounts: RwLock<HashMap<(String, GitProvider), LinkedAccount>>,
}

impl MemoryAccountStore {
    pub async fn link(&self, account: LinkedAccount) {
        self.accounts
            .write()
            .await
            .insert((account.user_id.clone(), account.provider), account);
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn find(&self, user_id: &str, provider: GitProvider) -> Result<Option<LinkedAccount>> {
        Ok(self
            .accounts
            .read()
            .await
            .get(&(user_id.to_string(), provider))
            .cloned())
    }
}

#[derive(Default)]
pub struct MemoryStepRecords {
    records: RwLock<HashMap<String, Vec<StepRecord>>>,
}

#[async_trait]
impl StepRecordStore for MemoryStepRecords {
    async fn initialize(&self, project_id: &str, records: Vec<StepRecord>) -> Result<()> {
        self.records
            .write()
            .await
            .insert(project_id.to_string(), records);
        Ok(())
    }

    async fn update(
        &self,
        project_id: &str,
        step: &str,
        state: StepState,
        error: Option<String>,
    ) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(project_id)
            .and_then(|steps| steps.iter_mut().find(|r| r.step == step))
            .ok_or_else(|| LaunchpadError::NotFound {
                resource: "Step record".into(),
                id: format!("{project_id}/{step}"),
            })?;
        record.transition(state, error, Utc::now());
        Ok(())
    }

    async fn list(&self, project_id: &str) -> Result<Vec<StepRecord>> {
        let mut records = self
            .records
            .read()
            .await
            .get(project_id)
            .cloned()
            .unwrap_or_default();
        records.sort_by_key(|r| r.sequence);
        Ok(records)
    }
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

/// Template files with `${variable}` placeholders.
#[derive(Default)]
pub struct MemoryTemplateCatalog {
    templates: RwLock<HashMap<String, (TemplateMetadata, Vec<RenderedFile>)>>,
}

impl MemoryTemplateCatalog {
    pub async fn add(&self, metadata: TemplateMetadata, files: Vec<RenderedFile>) {
        self.templates
            .write()
            .await
            .insert(metadata.id.clone(), (metadata, files));
    }
}

#[async_trait]
impl TemplateCatalog for MemoryTemplateCatalog {
    async fn load(&self, template_id: &str) -> Result<Option<TemplateMetadata>> {
        Ok(self
            .templates
            .read()
            .await
            .get(template_id)
            .map(|(meta, _)| meta.clone()))
    }

    async fn render(&self, template_id: &str, variables: &TemplateVariables) -> Result<Vec<RenderedFile>> {
        let templates = self.templates.read().await;
        let (_, files) = templates
            .get(template_id)
            .ok_or_else(|| LaunchpadError::TemplateNotFound {
                template: template_id.to_string(),
            })?;

        let vars = variables.to_map();
        files
            .iter()
            .map(|file| {
                let path = expand_variables(&file.path, &vars);
                let content = expand_variables(&file.content, &vars);
                if let Some(placeholder) = unresolved_placeholder(&path).or(unresolved_placeholder(&content)) {
                    return Err(LaunchpadError::Template {
                        template: template_id.to_string(),
                        message: format!("unresolved variable {placeholder} in {}", file.path),
                    });
                }
                Ok(RenderedFile { path, content })
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Git host
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PushRecord {
    pub token: String,
    pub full_name: String,
    pub branch: String,
    pub files: Vec<RenderedFile>,
    pub message: String,
}

/// Git host double that records calls and can be told to fail.
pub struct RecordingRepositoryProvider {
    provider: GitProvider,
    owner: String,
    created: Mutex<Vec<RepoInfo>>,
    pushes: Mutex<Vec<PushRecord>>,
    create_failures: Mutex<VecDeque<LaunchpadError>>,
    push_failures: Mutex<VecDeque<LaunchpadError>>,
}

impl RecordingRepositoryProvider {
    pub fn new(provider: GitProvider, owner: impl Into<String>) -> Self {
        Self {
            provider,
            owner: owner.into(),
            created: Mutex::new(Vec::new()),
            pushes: Mutex::new(Vec::new()),
            create_failures: Mutex::new(VecDeque::new()),
            push_failures: Mutex::new(VecDeque::new()),
        }
    }

    pub async fn fail_next_create(&self, err: LaunchpadError) {
        self.create_failures.lock().await.push_back(err);
    }

    pub async fn fail_next_push(&self, err: LaunchpadError) {
        self.push_failures.lock().await.push_back(err);
    }

    pub async fn created(&self) -> Vec<RepoInfo> {
        self.created.lock().await.clone()
    }

    pub async fn pushes(&self) -> Vec<PushRecord> {
        self.pushes.lock().await.clone()
    }

    fn host(&self) -> &'static str {
        match self.provider {
            GitProvider::Github => "github.com",
            GitProvider::Gitlab => "gitlab.com",
        }
    }
}

#[async_trait]
impl RepositoryProvider for RecordingRepositoryProvider {
    async fn create_repository(&self, _token: &str, options: &CreateRepositoryOptions) -> Result<RepoInfo> {
        if let Some(err) = self.create_failures.lock().await.pop_front() {
            return Err(err);
        }
        let full_name = format!("{}/{}", self.owner, options.name);
        let mut created = self.created.lock().await;
        if created.iter().any(|r| r.full_name == full_name) {
            return Err(LaunchpadError::Provider {
                provider: self.provider.as_str().into(),
                status: 422,
                message: "name already exists on this account".into(),
                rate_limit_reset: None,
            });
        }
        let repo = RepoInfo {
            clone_url: format!("https://{}/{}.git", self.host(), full_name),
            full_name,
            default_branch: options.default_branch.clone(),
        };
        created.push(repo.clone());
        Ok(repo)
    }

    async fn push_files(
        &self,
        token: &str,
        full_name: &str,
        branch: &str,
        files: &[RenderedFile],
        message: &str,
    ) -> Result<()> {
        if let Some(err) = self.push_failures.lock().await.pop_front() {
            return Err(err);
        }
        self.pushes.lock().await.push(PushRecord {
            token: token.to_string(),
            full_name: full_name.to_string(),
            branch: branch.to_string(),
            files: files.to_vec(),
            message: message.to_string(),
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// GitOps controller
// ---------------------------------------------------------------------------

pub struct MemorySyncProvider {
    installed: RwLock<bool>,
    failing_environments: RwLock<HashSet<String>>,
    created: Mutex<Vec<SyncResourceSpec>>,
}

impl Default for MemorySyncProvider {
    fn default() -> Self {
        Self {
            installed: RwLock::new(true),
            failing_environments: RwLock::new(HashSet::new()),
            created: Mutex::new(Vec::new()),
        }
    }
}

impl MemorySyncProvider {
    pub async fn set_installed(&self, installed: bool) {
        *self.installed.write().await = installed;
    }

    /// Make sync resource creation fail for one environment.
    pub async fn fail_for(&self, environment_id: &str) {
        self.failing_environments
            .write()
            .await
            .insert(environment_id.to_string());
    }

    pub async fn created(&self) -> Vec<SyncResourceSpec> {
        self.created.lock().await.clone()
    }
}

#[async_trait]
impl SyncResourceProvider for MemorySyncProvider {
    async fn is_installed(&self) -> Result<bool> {
        Ok(*self.installed.read().await)
    }

    async fn create(&self, spec: &SyncResourceSpec) -> Result<SyncResource> {
        if self
            .failing_environments
            .read()
            .await
            .contains(&spec.environment_id)
        {
            return Err(LaunchpadError::Other(format!(
                "failed to apply sync resource {}/{}",
                spec.namespace, spec.name
            )));
        }
        self.created.lock().await.push(spec.clone());
        Ok(SyncResource {
            id: Uuid::new_v4().to_string(),
            name: spec.name.clone(),
            namespace: spec.namespace.clone(),
            environment_id: spec.environment_id.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Audit and notifications
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryAuditLog {
    entries: Mutex<Vec<AuditEntry>>,
    failing: RwLock<bool>,
}

impl MemoryAuditLog {
    pub async fn set_failing(&self, failing: bool) {
        *self.failing.write().await = failing;
    }

    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().await.clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditLog {
    async fn record(&self, entry: AuditEntry) -> Result<()> {
        if *self.failing.read().await {
            return Err(LaunchpadError::Storage("audit log unavailable".into()));
        }
        self.entries.lock().await.push(entry);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl MemoryNotifier {
    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn notify(&self, notification: Notification) -> Result<()> {
        self.sent.lock().await.push(notification);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Progress slot and pub/sub
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryProgressStore {
    slots: Mutex<HashMap<String, ProgressSnapshot>>,
}

#[async_trait]
impl ProgressStore for MemoryProgressStore {
    async fn advance(&self, project_id: &str, snapshot: ProgressSnapshot) -> Result<bool> {
        let mut slots = self.slots.lock().await;
        if let Some(current) = slots.get(project_id) {
            if !snapshot.may_replace(current) {
                return Ok(false);
            }
        }
        slots.insert(project_id.to_string(), snapshot);
        Ok(true)
    }

    async fn reset(&self, project_id: &str, snapshot: ProgressSnapshot) -> Result<()> {
        self.slots
            .lock()
            .await
            .insert(project_id.to_string(), snapshot);
        Ok(())
    }

    async fn get(&self, project_id: &str) -> Result<Option<ProgressSnapshot>> {
        Ok(self.slots.lock().await.get(project_id).cloned())
    }

    async fn remove(&self, project_id: &str, run_id: Uuid) -> Result<bool> {
        let mut slots = self.slots.lock().await;
        match slots.get(project_id) {
            Some(current) if current.run_id == run_id => {
                slots.remove(project_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Records every publication per topic.
#[derive(Default)]
pub struct MemoryEventBus {
    published: Mutex<Vec<(String, launchpad_types::ProgressEvent)>>,
}

impl MemoryEventBus {
    pub async fn events_on(&self, topic: &str) -> Vec<launchpad_types::ProgressEvent> {
        self.published
            .lock()
            .await
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, e)| e.clone())
            .collect()
    }
}

#[async_trait]
impl EventBus for MemoryEventBus {
    async fn publish(&self, topic: &str, event: &launchpad_types::ProgressEvent) -> Result<()> {
        self.published
            .lock()
            .await
            .push((topic.to_string(), event.clone()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryBackend
// ---------------------------------------------------------------------------

pub const TEST_OWNER: &str = "launchpad-test";

pub struct MemoryBackend {
    pub projects: Arc<MemoryProjectStore>,
    pub environments: Arc<MemoryEnvironmentStore>,
    pub repositories: Arc<MemoryRepositoryStore>,
    pub accounts: Arc<MemoryAccountStore>,
    pub templates: Arc<MemoryTemplateCatalog>,
    pub github: Arc<RecordingRepositoryProvider>,
    pub gitlab: Arc<RecordingRepositoryProvider>,
    pub sync: Arc<MemorySyncProvider>,
    pub audit: Arc<MemoryAuditLog>,
    pub notifier: Arc<MemoryNotifier>,
    pub step_records: Arc<MemoryStepRecords>,
    pub progress: Arc<MemoryProgressStore>,
    pub bus: Arc<MemoryEventBus>,
    progress_config: ProgressConfig,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_progress_config(ProgressConfig::default())
    }

    pub fn with_progress_config(progress_config: ProgressConfig) -> Self {
        Self {
            projects: Arc::default(),
            environments: Arc::default(),
            repositories: Arc::default(),
            accounts: Arc::default(),
            templates: Arc::default(),
            github: Arc::new(RecordingRepositoryProvider::new(GitProvider::Github, TEST_OWNER)),
            gitlab: Arc::new(RecordingRepositoryProvider::new(GitProvider::Gitlab, TEST_OWNER)),
            sync: Arc::default(),
            audit: Arc::default(),
            notifier: Arc::default(),
            step_records: Arc::default(),
            progress: Arc::default(),
            bus: Arc::default(),
            progress_config,
        }
    }

    pub fn services(&self) -> Services {
        Services {
            projects: self.projects.clone(),
            environments: self.environments.clone(),
            repositories: self.repositories.clone(),
            accounts: self.accounts.clone(),
            templates: self.templates.clone(),
            providers: RepositoryProviders::new()
                .with(GitProvider::Github, self.github.clone())
                .with(GitProvider::Gitlab, self.gitlab.clone()),
            sync: self.sync.clone(),
            audit: self.audit.clone(),
            notifier: self.notifier.clone(),
            step_records: self.step_records.clone(),
        }
    }

    pub fn publisher(&self) -> ProgressPublisher {
        ProgressPublisher::new(self.progress.clone(), self.bus.clone(), &self.progress_config)
    }

    /// Register a small service template (readme plus deployment manifest)
    /// under `template_id`.
    pub async fn seed_sample_template(&self, template_id: &str) {
        self.templates
            .add(
                TemplateMetadata {
                    id: template_id.to_string(),
                    name: "Sample service".into(),
                    description: Some("Readme and deployment manifest".into()),
                },
                vec![
                    RenderedFile::new("README.md", "# ${projectName}\n\n${description}\n"),
                    RenderedFile::new(
                        "deploy/${projectSlug}.yaml",
                        "name: ${projectSlug}\nimage: ${registry}/${projectSlug}:latest\nreplicas: ${replicas}\nport: ${port}\n",
                    ),
                ],
            )
            .await;
    }

    /// Insert an initializing project directly, bypassing the pipeline.
    pub async fn seed_project(&self, id: &str, slug: &str) -> ProjectRecord {
        let now = Utc::now();
        let record = ProjectRecord {
            id: id.to_string(),
            organization_id: "o1".into(),
            name: slug.to_string(),
            slug: slug.to_string(),
            description: None,
            template_id: None,
            status: ProjectStatus::Initializing,
            initialization_error: None,
            initialization_completed_at: None,
            created_at: now,
            updated_at: now,
        };
        self.projects.projects.write().await.insert(id.to_string(), record.clone());
        record
    }
}

/// A publisher over fresh in-memory stores, plus its bus for inspection.
pub fn publisher() -> (ProgressPublisher, Arc<MemoryEventBus>) {
    let bus = Arc::new(MemoryEventBus::default());
    let publisher = ProgressPublisher::new(
        Arc::new(MemoryProgressStore::default()),
        bus.clone(),
        &ProgressConfig::default(),
    );
    (publisher, bus)
}

/// A run publisher nobody listens to.
pub fn detached_run(project_id: &str) -> RunPublisher {
    publisher().0.begin_run(project_id, "u1")
}

/// Progress handle spanning the full bar, for exercising a step on its own.
pub fn detached_progress(project_id: &str, step: &str) -> StepProgress {
    StepProgress::new(detached_run(project_id), step, 0, 100)
}

/// Minimal valid job: no template, no repository, default environments.
pub fn sample_job(project_id: &str, slug: &str) -> InitializationJob {
    let mut name = slug.to_string();
    if let Some(first) = name.get_mut(0..1) {
        first.make_ascii_uppercase();
    }
    InitializationJob {
        project_id: project_id.to_string(),
        user_id: "u1".into(),
        organization_id: "o1".into(),
        project: ProjectSpec {
            name,
            slug: slug.to_string(),
            description: None,
            template_id: None,
        },
        repository: None,
        environment_ids: Vec::new(),
    }
}
