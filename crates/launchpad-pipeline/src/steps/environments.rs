use std::sync::Arc;

use async_trait::async_trait;
use launchpad_types::{LaunchpadError, NewEnvironment, Result};

use crate::config::DefaultEnvironments;
use crate::context::InitializationContext;
use crate::services::EnvironmentStore;
use crate::step::{names, InitStep, StepProgress};

use super::CREATE_ENVIRONMENTS_WEIGHT;

/// Attaches the requested environments to the project, or creates the defaults.
pub struct CreateEnvironmentsStep {
    environments: Arc<dyn EnvironmentStore>,
    defaults: DefaultEnvironments,
}

impl CreateEnvironmentsStep {
    pub fn new(environments: Arc<dyn EnvironmentStore>, defaults: DefaultEnvironments) -> Self {
        Self {
            environments,
            defaults,
        }
    }
}

#[async_trait]
impl InitStep for CreateEnvironmentsStep {
    fn name(&self) -> &str {
        names::CREATE_ENVIRONMENTS
    }

    fn display_name(&self) -> &str {
        "Create environments"
    }

    fn weight(&self) -> u32 {
        CREATE_ENVIRONMENTS_WEIGHT
    }

    fn can_handle(&self, _ctx: &InitializationContext) -> bool {
        true
    }

    async fn execute(&self, ctx: &mut InitializationContext, progress: &StepProgress) -> Result<()> {
        let project_id = ctx.require_project()?.id.clone();

        let mut environments = Vec::new();
        if !ctx.job.environment_ids.is_empty() {
            for id in &ctx.job.environment_ids {
                let env = self
                    .environments
                    .get(id)
                    .await?
                    .ok_or_else(|| LaunchpadError::NotFound {
                        resource: "Environment".into(),
                        id: id.clone(),
                    })?;
                if env.project_id != project_id {
                    return Err(LaunchpadError::Conflict(format!(
                        "environment {} belongs to project {}, not {}",
                        env.id, env.project_id, project_id
                    )));
                }
                environments.push(env);
            }
        } else {
            // Attempts that failed part way leave some defaults behind; only the missing ones are created.
            let mut existing = self.environments.list_for_project(&project_id).await?;
            let total = self.defaults.0.len();
            for (i, template) in self.defaults.0.iter().enumerate() {
                let percent = ((i + 1) * 100 / total) as u8;
                let found = existing
                    .iter()
                    .position(|e| e.kind == template.kind && e.name == template.name);
                let env = match found {
                    Some(pos) => {
                        let env = existing.remove(pos);
                        progress
                            .report(env.kind.as_str(), percent, format!("Reused {} environment", env.name))
                            .await;
                        env
                    }
                    None => {
                        let env = self
                            .environments
                            .create(NewEnvironment {
                                project_id: project_id.clone(),
                                name: template.name.clone(),
                                kind: template.kind,
                                approval_required: template.approval_required,
                                min_approvals: template.min_approvals,
                            })
                            .await?;
                        progress
                            .report(env.kind.as_str(), percent, format!("Created {} environment", env.name))
                            .await;
                        env
                    }
                };
                environments.push(env);
            }
            // Environments added outside the defaults stay attached to the project.
            environments.extend(existing);
        }

        tracing::info!(project_id = %project_id, count = environments.len(), "Environments ready");
        ctx.environments = environments;
        Ok(())
    }
}
