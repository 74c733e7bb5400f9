//! Record shapes exchanged with the persistent store, the Git host, and the
//! GitOps controller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Providers and visibility
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GitProvider {
    Github,
    Gitlab,
}

impl GitProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            GitProvider::Github => "github",
            GitProvider::Gitlab => "gitlab",
        }
    }
}

impl std::fmt::Display for GitProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GitProvider::Github => f.write_str("GitHub"),
            GitProvider::Gitlab => f.write_str("GitLab"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    #[default]
    Private,
}

// ---------------------------------------------------------------------------
// Projects
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Initializing,
    Active,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub template_id: Option<String>,
    pub status: ProjectStatus,
    /// Human-readable reason recorded when initialization fails.
    pub initialization_error: Option<String>,
    pub initialization_completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Environments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentKind {
    Development,
    Staging,
    Production,
    Testing,
}

impl EnvironmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvironmentKind::Development => "development",
            EnvironmentKind::Staging => "staging",
            EnvironmentKind::Production => "production",
            EnvironmentKind::Testing => "testing",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentRecord {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub kind: EnvironmentKind,
    pub approval_required: bool,
    pub min_approvals: u32,
}

/// Insert shape for an environment; the store assigns the ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEnvironment {
    pub project_id: String,
    pub name: String,
    pub kind: EnvironmentKind,
    pub approval_required: bool,
    pub min_approvals: u32,
}

// ---------------------------------------------------------------------------
// Repositories
// ---------------------------------------------------------------------------

/// Repository identity as reported by the Git host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoInfo {
    pub full_name: String,
    pub clone_url: String,
    pub default_branch: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRepositoryOptions {
    pub name: String,
    pub visibility: Visibility,
    pub default_branch: String,
    pub auto_init: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryRecord {
    pub id: String,
    pub project_id: String,
    pub provider: GitProvider,
    pub full_name: String,
    pub clone_url: String,
    pub default_branch: String,
    /// `true` when the repository pre-existed and was only linked.
    pub linked: bool,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Linked accounts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Expired,
    Revoked,
}

/// A user's OAuth connection to a Git host.
#[derive(Clone, Serialize, Deserialize)]
pub struct LinkedAccount {
    pub user_id: String,
    pub provider: GitProvider,
    pub username: String,
    pub access_token: String,
    pub status: AccountStatus,
    pub expires_at: Option<DateTime<Utc>>,
}

impl LinkedAccount {
    /// Whether the stored token passed its freshness check at `now`.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.status == AccountStatus::Active
            && !self.access_token.is_empty()
            && self.expires_at.map_or(true, |exp| exp > now)
    }
}

impl std::fmt::Debug for LinkedAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkedAccount")
            .field("user_id", &self.user_id)
            .field("provider", &self.provider)
            .field("username", &self.username)
            .field("access_token", &"<redacted>")
            .field("status", &self.status)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateMetadata {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedFile {
    pub path: String,
    pub content: String,
}

impl RenderedFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// GitOps
// ---------------------------------------------------------------------------

/// Reconciliation object tying one environment to a path in the repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResourceSpec {
    pub project_id: String,
    pub environment_id: String,
    pub name: String,
    pub namespace: String,
    pub source_url: String,
    pub source_branch: String,
    pub path: String,
    pub interval: String,
    pub prune: bool,
    pub timeout: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResource {
    pub id: String,
    pub name: String,
    pub namespace: String,
    pub environment_id: String,
}

// ---------------------------------------------------------------------------
// Audit and notifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub action: String,
    pub project_id: String,
    pub user_id: String,
    pub organization_id: String,
    pub metadata: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub user_id: String,
    pub project_id: String,
    pub title: String,
    pub message: String,
}
