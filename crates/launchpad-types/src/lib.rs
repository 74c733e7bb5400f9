//! Shared types, errors, job payloads, and progress events for Launchpad.
//!
//! This crate provides the foundational types used across the other Launchpad crates:
//! - `LaunchpadError`: unified error taxonomy, mapped onto [`ErrorKind`]
//! - `InitializationJob`: the payload enqueued once per project
//! - record types shared with the persistent store and the Git host
//! - `ProgressEvent`: the wire record published at every step boundary

pub mod event;
pub mod job;
pub mod records;

pub use event::{states, EventType, ProgressEvent, Substep};
pub use job::{InitializationJob, ProjectSpec, RepositoryRequest, TokenSource, LINKED_TOKEN_SENTINEL};
pub use records::{
    AccountStatus, AuditEntry, CreateRepositoryOptions, EnvironmentKind, EnvironmentRecord,
    GitProvider, LinkedAccount, NewEnvironment, Notification, ProjectRecord, ProjectStatus,
    RenderedFile, RepoInfo, RepositoryRecord, SyncResource, SyncResourceSpec, TemplateMetadata,
    Visibility,
};

use serde::{Deserialize, Serialize};

/// Unified error type for all Launchpad subsystems.
#[derive(Debug, thiserror::Error)]
pub enum LaunchpadError {
    // === Git host errors ===
    #[error("Provider {provider} returned HTTP {status}: {message}")]
    Provider {
        provider: String,
        status: u16,
        message: String,
        /// Reset instant reported by the provider alongside a rate limit.
        rate_limit_reset: Option<chrono::DateTime<chrono::Utc>>,
    },

    #[error("Network error ({kind}): {message}")]
    Transport { kind: TransportKind, message: String },

    // === Store errors ===
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Unique constraint '{constraint}' violated: {message}")]
    UniqueViolation { constraint: String, message: String },

    #[error("{resource} '{id}' not found")]
    NotFound { resource: String, id: String },

    // === Business errors ===
    #[error("Project identifier '{slug}' already exists; choose a different identifier")]
    DuplicateIdentifier { slug: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Template '{template}' not found")]
    TemplateNotFound { template: String },

    #[error("Template rendering failed for '{template}': {message}")]
    Template { template: String, message: String },

    #[error("No linked {provider} account found; connect an account first")]
    NoLinkedAccount { provider: GitProvider },

    #[error("The linked {provider} connection has expired or is no longer active; reconnect the account")]
    LinkedAccountExpired { provider: GitProvider },

    // === GitOps errors ===
    #[error("GitOps controller is not installed")]
    GitOpsUnavailable,

    #[error("GitOps setup failed for {failed} of {total} environments: {reason}")]
    GitOpsFailed {
        failed: usize,
        total: usize,
        reason: String,
    },

    // === Pipeline errors ===
    #[error("Initialization step '{step}' failed for project {project_id}: {source}")]
    StepFailed {
        step: String,
        project_id: String,
        #[source]
        source: Box<LaunchpadError>,
    },

    #[error("Invalid initialization job: {0}")]
    InvalidJob(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Transport-level failure modes that never reached the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    ConnectionRefused,
    TimedOut,
    NameNotResolved,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransportKind::ConnectionRefused => "connection refused",
            TransportKind::TimedOut => "timed out",
            TransportKind::NameNotResolved => "name not resolved",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorKind: the classification taxonomy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Authentication,
    NotFound,
    Conflict,
    RateLimit,
    ServerError,
    Transport,
    Storage,
    Template,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Authentication => "authentication",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::ServerError => "server_error",
            ErrorKind::Transport => "transport",
            ErrorKind::Storage => "storage",
            ErrorKind::Template => "template",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// Whether failures of this kind may succeed on a later attempt.
    ///
    /// Unknown failures are surfaced rather than retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimit | ErrorKind::ServerError | ErrorKind::Transport | ErrorKind::Storage
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn mentions_rate_limit(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("rate limit") || lower.contains("rate-limit")
}

impl LaunchpadError {
    /// Map the error onto the classification taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LaunchpadError::Provider {
                status, message, ..
            } => match *status {
                401 => ErrorKind::Authentication,
                403 if mentions_rate_limit(message) => ErrorKind::RateLimit,
                403 => ErrorKind::Authentication,
                404 => ErrorKind::NotFound,
                409 | 422 => ErrorKind::Conflict,
                429 => ErrorKind::RateLimit,
                500..=599 => ErrorKind::ServerError,
                _ => ErrorKind::Unknown,
            },
            LaunchpadError::Transport { .. } => ErrorKind::Transport,
            LaunchpadError::Storage(_) => ErrorKind::Storage,
            LaunchpadError::UniqueViolation { .. }
            | LaunchpadError::DuplicateIdentifier { .. }
            | LaunchpadError::Conflict(_) => ErrorKind::Conflict,
            LaunchpadError::NotFound { .. } | LaunchpadError::TemplateNotFound { .. } => {
                ErrorKind::NotFound
            }
            LaunchpadError::Template { .. } => ErrorKind::Template,
            LaunchpadError::NoLinkedAccount { .. } | LaunchpadError::LinkedAccountExpired { .. } => {
                ErrorKind::Authentication
            }
            LaunchpadError::StepFailed { source, .. } => source.kind(),
            LaunchpadError::Other(message) => classify_message(message),
            LaunchpadError::GitOpsUnavailable
            | LaunchpadError::GitOpsFailed { .. }
            | LaunchpadError::InvalidJob(_)
            | LaunchpadError::Config(_)
            | LaunchpadError::Io(_)
            | LaunchpadError::Json(_) => ErrorKind::Unknown,
        }
    }

    /// Returns `true` if the error is transient and the operation may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Provider-reported instant at which rate-limited capacity returns.
    pub fn rate_limit_reset(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        match self {
            LaunchpadError::Provider {
                rate_limit_reset, ..
            } => *rate_limit_reset,
            LaunchpadError::StepFailed { source, .. } => source.rate_limit_reset(),
            _ => None,
        }
    }

    /// The innermost error, looking through `StepFailed` wrappers.
    pub fn root(&self) -> &LaunchpadError {
        match self {
            LaunchpadError::StepFailed { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Classify a free-form message from a collaborator that did not produce a typed error.
///
/// Storage and connection problems win over template mentions.
fn classify_message(message: &str) -> ErrorKind {
    let lower = message.to_ascii_lowercase();
    if lower.contains("connection refused") || lower.contains("timed out") {
        ErrorKind::Transport
    } else if lower.contains("database") || lower.contains("connection") {
        ErrorKind::Storage
    } else if lower.contains("template") {
        ErrorKind::Template
    } else {
        ErrorKind::Unknown
    }
}

/// A convenience alias for `Result<T, LaunchpadError>`.
pub type Result<T> = std::result::Result<T, LaunchpadError>;
