use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use launchpad_types::{LaunchpadError, Result, SyncResourceSpec};

use crate::config::GitOpsConfig;
use crate::context::InitializationContext;
use crate::services::SyncResourceProvider;
use crate::step::{names, Criticality, InitStep, StepProgress};

use super::CREATE_GITOPS_WEIGHT;

/// Creates one sync resource per environment. Optional: the orchestrator
/// downgrades any failure here to a warning.
pub struct CreateGitOpsStep {
    sync: Arc<dyn SyncResourceProvider>,
    config: GitOpsConfig,
}

impl CreateGitOpsStep {
    pub fn new(sync: Arc<dyn SyncResourceProvider>, config: GitOpsConfig) -> Self {
        Self { sync, config }
    }

    fn specs(&self, ctx: &InitializationContext) -> Result<Vec<SyncResourceSpec>> {
        let project = ctx.require_project()?;
        let repo = ctx.require_repository()?;
        Ok(ctx
            .environments
            .iter()
            .map(|env| {
                let kind = env.kind.as_str();
                let name = format!("{}-{}", project.slug, kind);
                SyncResourceSpec {
                    project_id: project.id.clone(),
                    environment_id: env.id.clone(),
                    name: name.clone(),
                    namespace: name,
                    source_url: repo.clone_url.clone(),
                    source_branch: repo.default_branch.clone(),
                    path: format!("{}/{}", self.config.path_prefix.trim_end_matches('/'), kind),
                    interval: self.config.interval.clone(),
                    prune: self.config.prune,
                    timeout: self.config.timeout.clone(),
                }
            })
            .collect())
    }
}

#[async_trait]
impl InitStep for CreateGitOpsStep {
    fn name(&self) -> &str {
        names::CREATE_GITOPS
    }

    fn display_name(&self) -> &str {
        "Set up GitOps"
    }

    fn weight(&self) -> u32 {
        CREATE_GITOPS_WEIGHT
    }

    fn criticality(&self) -> Criticality {
        Criticality::Tolerated
    }

    fn can_handle(&self, ctx: &InitializationContext) -> bool {
        ctx.repository.is_some()
    }

    async fn execute(&self, ctx: &mut InitializationContext, progress: &StepProgress) -> Result<()> {
        if !self.sync.is_installed().await? {
            return Err(LaunchpadError::GitOpsUnavailable);
        }

        let specs = self.specs(ctx)?;
        if specs.is_empty() {
            progress.report("sync", 100, "No environments to sync").await;
            return Ok(());
        }

        progress
            .report("sync", 10, format!("Creating {} sync resources", specs.len()))
            .await;
        let results = join_all(specs.iter().map(|spec| self.sync.create(spec))).await;

        let total = specs.len();
        let mut created = Vec::new();
        let mut failures = Vec::new();
        for (spec, result) in specs.iter().zip(results) {
            match result {
                Ok(resource) => created.push(resource.id),
                Err(e) => {
                    tracing::warn!(
                        project_id = %spec.project_id,
                        environment_id = %spec.environment_id,
                        resource = %spec.name,
                        error = %e,
                        "Sync resource creation failed"
                    );
                    failures.push(format!("{}: {}", spec.name, e));
                }
            }
        }

        if created.is_empty() {
            return Err(LaunchpadError::GitOpsFailed {
                failed: failures.len(),
                total,
                reason: failures.join("; "),
            });
        }
        if !failures.is_empty() {
            ctx.warnings.push(format!(
                "GitOps created {} of {} sync resources ({})",
                created.len(),
                total,
                failures.join("; ")
            ));
        }

        tracing::info!(project_id = %ctx.project_id(), created = created.len(), total, "Sync resources created");
        progress
            .report("sync", 100, format!("Created {} of {} sync resources", created.len(), total))
            .await;
        ctx.sync_resource_ids = created;
        Ok(())
    }
}
