//! Per-job state threaded through the steps.
//!
//! Each field has exactly one writer step; later steps only read it.

use launchpad_types::{
    EnvironmentRecord, GitProvider, InitializationJob, LaunchpadError, ProjectRecord,
    RenderedFile, RepoInfo, Result, TemplateMetadata,
};

use crate::services::TemplateVariables;

/// Access token resolved for the job's Git host.
#[derive(Clone)]
pub struct ResolvedCredentials {
    pub provider: GitProvider,
    /// Account name when the token came from a linked account.
    pub username: Option<String>,
    pub access_token: String,
}

impl std::fmt::Debug for ResolvedCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedCredentials")
            .field("provider", &self.provider)
            .field("username", &self.username)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct InitializationContext {
    pub job: InitializationJob,
    /// Written by `create_project`.
    pub project: Option<ProjectRecord>,
    /// Written by `load_template`.
    pub template: Option<TemplateMetadata>,
    /// Written by `render_template`; `setup_repository` refreshes it after creating a repository.
    pub template_variables: Option<TemplateVariables>,
    pub rendered_files: Option<Vec<RenderedFile>>,
    /// Written by `create_environments`.
    pub environments: Vec<EnvironmentRecord>,
    /// Written by `setup_repository`.
    pub credentials: Option<ResolvedCredentials>,
    pub repository: Option<RepoInfo>,
    pub repository_record_id: Option<String>,
    /// Written by `create_gitops`.
    pub sync_resource_ids: Vec<String>,
    /// Non-fatal problems collected along the way.
    pub warnings: Vec<String>,
}

impl InitializationContext {
    pub fn new(job: InitializationJob) -> Self {
        Self {
            job,
            project: None,
            template: None,
            template_variables: None,
            rendered_files: None,
            environments: Vec::new(),
            credentials: None,
            repository: None,
            repository_record_id: None,
            sync_resource_ids: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn project_id(&self) -> &str {
        &self.job.project_id
    }

    pub fn user_id(&self) -> &str {
        &self.job.user_id
    }

    pub fn require_project(&self) -> Result<&ProjectRecord> {
        self.project
            .as_ref()
            .ok_or_else(|| LaunchpadError::Other("project record missing from context".into()))
    }

    pub fn require_repository(&self) -> Result<&RepoInfo> {
        self.repository
            .as_ref()
            .ok_or_else(|| LaunchpadError::Other("repository missing from context".into()))
    }
}
