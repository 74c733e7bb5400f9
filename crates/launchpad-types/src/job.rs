//! The initialization job payload, enqueued once per project creation request.
//!
//! Jobs are never mutated after creation; replays must reconstruct identical intent.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::records::{GitProvider, Visibility};
use crate::{LaunchpadError, Result};

/// Wire value asking the worker to use the user's linked account token.
pub const LINKED_TOKEN_SENTINEL: &str = "__USE_LINKED__";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializationJob {
    pub project_id: String,
    pub user_id: String,
    pub organization_id: String,
    pub project: ProjectSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<RepositoryRequest>,
    #[serde(default)]
    pub environment_ids: Vec<String>,
}

/// The human-chosen identity of the project being created.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSpec {
    pub name: String,
    pub slug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RepositoryRequest {
    /// Link a repository that already exists on the Git host.
    #[serde(rename_all = "camelCase")]
    Existing {
        provider: GitProvider,
        url: String,
        #[serde(default)]
        branch: Option<String>,
        #[serde(default)]
        access_token: Option<TokenSource>,
    },
    /// Create a new repository and push the rendered template into it.
    #[serde(rename_all = "camelCase")]
    Create {
        provider: GitProvider,
        name: String,
        #[serde(default)]
        visibility: Visibility,
        #[serde(default)]
        branch: Option<String>,
        #[serde(default)]
        access_token: Option<TokenSource>,
    },
}

impl RepositoryRequest {
    pub fn provider(&self) -> GitProvider {
        match self {
            RepositoryRequest::Existing { provider, .. }
            | RepositoryRequest::Create { provider, .. } => *provider,
        }
    }

    pub fn branch(&self) -> Option<&str> {
        match self {
            RepositoryRequest::Existing { branch, .. } | RepositoryRequest::Create { branch, .. } => {
                branch.as_deref()
            }
        }
    }

    /// The explicitly supplied token, or `None` when the linked account should be used.
    pub fn explicit_token(&self) -> Option<&str> {
        let source = match self {
            RepositoryRequest::Existing { access_token, .. }
            | RepositoryRequest::Create { access_token, .. } => access_token.as_ref(),
        };
        match source {
            Some(TokenSource::Explicit(token)) if !token.is_empty() => Some(token),
            _ => None,
        }
    }
}

/// Where the access token for the Git host comes from.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TokenSource {
    Explicit(String),
    Linked,
}

impl From<String> for TokenSource {
    fn from(value: String) -> Self {
        if value == LINKED_TOKEN_SENTINEL {
            TokenSource::Linked
        } else {
            TokenSource::Explicit(value)
        }
    }
}

impl From<TokenSource> for String {
    fn from(value: TokenSource) -> Self {
        match value {
            TokenSource::Explicit(token) => token,
            TokenSource::Linked => LINKED_TOKEN_SENTINEL.to_string(),
        }
    }
}

impl std::fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenSource::Explicit(_) => f.write_str("Explicit(<redacted>)"),
            TokenSource::Linked => f.write_str("Linked"),
        }
    }
}

impl InitializationJob {
    /// Check the payload before any step runs.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("projectId", &self.project_id),
            ("userId", &self.user_id),
            ("organizationId", &self.organization_id),
            ("project.name", &self.project.name),
            ("project.slug", &self.project.slug),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(LaunchpadError::InvalidJob(format!("{field} must not be empty")));
            }
        }

        match &self.repository {
            Some(RepositoryRequest::Existing { url, .. }) if url.trim().is_empty() => {
                return Err(LaunchpadError::InvalidJob(
                    "repository.url must not be empty".into(),
                ));
            }
            Some(RepositoryRequest::Create { name, .. }) if name.trim().is_empty() => {
                return Err(LaunchpadError::InvalidJob(
                    "repository.name must not be empty".into(),
                ));
            }
            _ => {}
        }

        let mut seen = HashSet::new();
        for id in &self.environment_ids {
            if !seen.insert(id.as_str()) {
                return Err(LaunchpadError::InvalidJob(format!(
                    "duplicate environment id '{id}'"
                )));
            }
        }
        Ok(())
    }
}
