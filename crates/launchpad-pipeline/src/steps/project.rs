use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use launchpad_types::{LaunchpadError, ProjectRecord, ProjectStatus, Result};

use crate::context::InitializationContext;
use crate::services::ProjectStore;
use crate::step::{names, InitStep, StepProgress};

use super::CREATE_PROJECT_WEIGHT;

/// Inserts the project row, or adopts it when the same job is replayed.
pub struct CreateProjectStep {
    projects: Arc<dyn ProjectStore>,
}

impl CreateProjectStep {
    pub fn new(projects: Arc<dyn ProjectStore>) -> Self {
        Self { projects }
    }
}

#[async_trait]
impl InitStep for CreateProjectStep {
    fn name(&self) -> &str {
        names::CREATE_PROJECT
    }

    fn display_name(&self) -> &str {
        "Create project"
    }

    fn weight(&self) -> u32 {
        CREATE_PROJECT_WEIGHT
    }

    fn can_handle(&self, _ctx: &InitializationContext) -> bool {
        true
    }

    async fn execute(&self, ctx: &mut InitializationContext, progress: &StepProgress) -> Result<()> {
        let job = &ctx.job;

        if let Some(mut existing) = self.projects.get(&job.project_id).await? {
            if existing.organization_id != job.organization_id || existing.slug != job.project.slug {
                return Err(LaunchpadError::Conflict(format!(
                    "project {} already exists with identifier '{}'",
                    existing.id, existing.slug
                )));
            }
            self.projects.mark_initializing(&existing.id).await?;
            existing.status = ProjectStatus::Initializing;
            existing.initialization_error = None;
            tracing::info!(project_id = %existing.id, slug = %existing.slug, "Reusing project from earlier attempt");
            progress.report("reuse", 100, "Resuming existing project").await;
            ctx.project = Some(existing);
            return Ok(());
        }

        let now = Utc::now();
        let record = ProjectRecord {
            id: job.project_id.clone(),
            organization_id: job.organization_id.clone(),
            name: job.project.name.clone(),
            slug: job.project.slug.clone(),
            description: job.project.description.clone(),
            template_id: job.project.template_id.clone(),
            status: ProjectStatus::Initializing,
            initialization_error: None,
            initialization_completed_at: None,
            created_at: now,
            updated_at: now,
        };

        let created = match self.projects.insert(record).await {
            Ok(created) => created,
            Err(LaunchpadError::UniqueViolation { constraint, .. }) if constraint.contains("slug") => {
                return Err(LaunchpadError::DuplicateIdentifier {
                    slug: job.project.slug.clone(),
                });
            }
            Err(LaunchpadError::UniqueViolation { message, .. }) => {
                return Err(LaunchpadError::Conflict(message));
            }
            Err(e) => return Err(e),
        };

        tracing::info!(project_id = %created.id, slug = %created.slug, "Project record created");
        progress.report("insert", 100, "Project record created").await;
        ctx.project = Some(created);
        Ok(())
    }
}
