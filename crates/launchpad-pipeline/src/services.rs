//! Collaborator interfaces the initialization steps depend on.
//!
//! Each trait is narrow so that tests and the CLI can plug in the in-memory
//! implementations from [`crate::memory`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use launchpad_types::{
    AuditEntry, CreateRepositoryOptions, EnvironmentRecord, GitProvider, LaunchpadError,
    LinkedAccount, NewEnvironment, Notification, ProjectRecord, RenderedFile, RepoInfo,
    RepositoryRecord, Result, SyncResource, SyncResourceSpec, TemplateMetadata,
};
use serde::{Deserialize, Serialize};

use crate::step_records::StepRecordStore;

// ---------------------------------------------------------------------------
// Persistent store
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<ProjectRecord>>;

    /// Insert a new project. Fails with `UniqueViolation` when the ID or the
    /// organization-scoped slug is taken.
    async fn insert(&self, project: ProjectRecord) -> Result<ProjectRecord>;

    /// Put a replayed project back into the initializing state.
    async fn mark_initializing(&self, id: &str) -> Result<()>;

    async fn mark_active(&self, id: &str, completed_at: DateTime<Utc>) -> Result<()>;

    async fn mark_failed(&self, id: &str, reason: &str) -> Result<()>;
}

#[async_trait]
pub trait EnvironmentStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<EnvironmentRecord>>;

    async fn create(&self, environment: NewEnvironment) -> Result<EnvironmentRecord>;

    async fn list_for_project(&self, project_id: &str) -> Result<Vec<EnvironmentRecord>>;
}

#[async_trait]
pub trait RepositoryStore: Send + Sync {
    async fn find_by_project(&self, project_id: &str) -> Result<Option<RepositoryRecord>>;

    async fn create(
        &self,
        project_id: &str,
        provider: GitProvider,
        repo: &RepoInfo,
        linked: bool,
    ) -> Result<RepositoryRecord>;
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find(&self, user_id: &str, provider: GitProvider) -> Result<Option<LinkedAccount>>;
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

/// Inputs substituted into template files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateVariables {
    pub project_name: String,
    pub project_slug: String,
    pub description: String,
    pub organization_id: String,
    pub repository_url: String,
    pub repository_branch: String,
    pub registry: String,
    pub port: u16,
    pub replicas: u32,
}

impl TemplateVariables {
    /// Flatten into `${key}` substitution pairs.
    pub fn to_map(&self) -> HashMap<String, String> {
        HashMap::from([
            ("projectName".to_string(), self.project_name.clone()),
            ("projectSlug".to_string(), self.project_slug.clone()),
            ("description".to_string(), self.description.clone()),
            ("organizationId".to_string(), self.organization_id.clone()),
            ("repositoryUrl".to_string(), self.repository_url.clone()),
            ("repositoryBranch".to_string(), self.repository_branch.clone()),
            ("registry".to_string(), self.registry.clone()),
            ("port".to_string(), self.port.to_string()),
            ("replicas".to_string(), self.replicas.to_string()),
        ])
    }
}

#[async_trait]
pub trait TemplateCatalog: Send + Sync {
    async fn load(&self, template_id: &str) -> Result<Option<TemplateMetadata>>;

    async fn render(&self, template_id: &str, variables: &TemplateVariables) -> Result<Vec<RenderedFile>>;
}

// ---------------------------------------------------------------------------
// Git hosts and GitOps
// ---------------------------------------------------------------------------

#[async_trait]
pub trait RepositoryProvider: Send + Sync {
    async fn create_repository(&self, token: &str, options: &CreateRepositoryOptions) -> Result<RepoInfo>;

    /// Push all files to `branch` as a single commit.
    async fn push_files(
        &self,
        token: &str,
        full_name: &str,
        branch: &str,
        files: &[RenderedFile],
        message: &str,
    ) -> Result<()>;
}

/// Git host clients keyed by provider.
#[derive(Clone, Default)]
pub struct RepositoryProviders {
    providers: HashMap<GitProvider, Arc<dyn RepositoryProvider>>,
}

impl RepositoryProviders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: GitProvider, client: Arc<dyn RepositoryProvider>) {
        self.providers.insert(provider, client);
    }

    pub fn with(mut self, provider: GitProvider, client: Arc<dyn RepositoryProvider>) -> Self {
        self.register(provider, client);
        self
    }

    pub fn get(&self, provider: GitProvider) -> Result<&Arc<dyn RepositoryProvider>> {
        self.providers
            .get(&provider)
            .ok_or_else(|| LaunchpadError::Config(format!("no repository client configured for {provider}")))
    }
}

#[async_trait]
pub trait SyncResourceProvider: Send + Sync {
    /// Whether the GitOps controller is present in the target cluster.
    async fn is_installed(&self) -> Result<bool>;

    async fn create(&self, spec: &SyncResourceSpec) -> Result<SyncResource>;
}

// ---------------------------------------------------------------------------
// Fire-and-forget sinks
// ---------------------------------------------------------------------------

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: AuditEntry) -> Result<()>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<()>;
}

/// Everything the default steps need, shared across jobs.
#[derive(Clone)]
pub struct Services {
    pub projects: Arc<dyn ProjectStore>,
    pub environments: Arc<dyn EnvironmentStore>,
    pub repositories: Arc<dyn RepositoryStore>,
    pub accounts: Arc<dyn AccountStore>,
    pub templates: Arc<dyn TemplateCatalog>,
    pub providers: RepositoryProviders,
    pub sync: Arc<dyn SyncResourceProvider>,
    pub audit: Arc<dyn AuditSink>,
    pub notifier: Arc<dyn Notifier>,
    pub step_records: Arc<dyn StepRecordStore>,
}
