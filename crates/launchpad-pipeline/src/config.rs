//! Runtime configuration, built once at startup and passed into constructors.

use std::path::Path;

use launchpad_types::{EnvironmentKind, LaunchpadError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchpadConfig {
    pub worker: WorkerConfig,
    pub queue: QueueConfig,
    pub retry: RetryConfig,
    pub progress: ProgressConfig,
    pub gitops: GitOpsConfig,
    pub template_defaults: TemplateDefaults,
    pub repository: RepositoryDefaults,
    pub default_environments: DefaultEnvironments,
}

/// Worker pool limits shared by every concurrently running job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub concurrency: usize,
    /// Global job-start budget, protecting third-party API quotas.
    pub jobs_per_second: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            jobs_per_second: 5,
        }
    }
}

/// Re-delivery policy for whole jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2_000,
            max_delay_ms: 60_000,
        }
    }
}

/// In-pipeline retry policy for a single step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Symmetric jitter as a fraction of the computed delay.
    pub jitter: f64,
    /// Wait used for a rate limit that carries no reset timestamp.
    pub rate_limit_fallback_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2_000,
            max_delay_ms: 60_000,
            jitter: 0.2,
            rate_limit_fallback_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
    /// Grace period before a finished job's progress slot is deleted.
    pub retention_secs: u64,
    pub event_capacity: usize,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            retention_secs: 60,
            event_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitOpsConfig {
    pub interval: String,
    pub prune: bool,
    pub timeout: String,
    pub path_prefix: String,
}

impl Default for GitOpsConfig {
    fn default() -> Self {
        Self {
            interval: "5m".into(),
            prune: true,
            timeout: "2m".into(),
            path_prefix: "k8s/overlays".into(),
        }
    }
}

/// Values fed to template rendering that the job payload does not carry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateDefaults {
    pub registry: String,
    pub port: u16,
    pub replicas: u32,
}

impl Default for TemplateDefaults {
    fn default() -> Self {
        Self {
            registry: "ghcr.io".into(),
            port: 3000,
            replicas: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryDefaults {
    pub default_branch: String,
}

impl Default for RepositoryDefaults {
    fn default() -> Self {
        Self {
            default_branch: "main".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentTemplate {
    pub name: String,
    pub kind: EnvironmentKind,
    pub approval_required: bool,
    pub min_approvals: u32,
}

/// Environments created when the job does not name existing ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DefaultEnvironments(pub Vec<EnvironmentTemplate>);

impl Default for DefaultEnvironments {
    fn default() -> Self {
        let env = |name: &str, kind, approval_required, min_approvals| EnvironmentTemplate {
            name: name.into(),
            kind,
            approval_required,
            min_approvals,
        };
        Self(vec![
            env("Development", EnvironmentKind::Development, false, 1),
            env("Staging", EnvironmentKind::Staging, true, 1),
            env("Production", EnvironmentKind::Production, true, 2),
        ])
    }
}

impl LaunchpadConfig {
    /// Read a JSON config file. Missing fields fall back to their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker.concurrency == 0 {
            return Err(LaunchpadError::Config("worker.concurrency must be at least 1".into()));
        }
        if self.worker.jobs_per_second == 0 {
            return Err(LaunchpadError::Config(
                "worker.jobs_per_second must be at least 1".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.retry.jitter) {
            return Err(LaunchpadError::Config("retry.jitter must be within [0, 1)".into()));
        }
        if self.queue.max_attempts == 0 {
            return Err(LaunchpadError::Config("queue.max_attempts must be at least 1".into()));
        }
        if self.repository.default_branch.trim().is_empty() {
            return Err(LaunchpadError::Config(
                "repository.default_branch must not be empty".into(),
            ));
        }
        Ok(())
    }
}
