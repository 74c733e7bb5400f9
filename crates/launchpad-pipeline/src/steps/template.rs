use std::sync::Arc;

use async_trait::async_trait;
use launchpad_types::{InitializationJob, LaunchpadError, RepoInfo, RepositoryRequest, Result};

use crate::config::TemplateDefaults;
use crate::context::InitializationContext;
use crate::services::{TemplateCatalog, TemplateVariables};
use crate::step::{names, InitStep, StepProgress};

use super::{LOAD_TEMPLATE_WEIGHT, RENDER_TEMPLATE_WEIGHT};

/// Variables for rendering. Repository fields come from `repo` once it
/// exists, otherwise from what the job requested.
pub fn template_variables(
    job: &InitializationJob,
    defaults: &TemplateDefaults,
    default_branch: &str,
    repo: Option<&RepoInfo>,
) -> TemplateVariables {
    let (repository_url, repository_branch) = match (repo, &job.repository) {
        (Some(repo), _) => (repo.clone_url.clone(), repo.default_branch.clone()),
        (None, Some(RepositoryRequest::Existing { url, branch, .. })) => (
            url.clone(),
            branch.clone().unwrap_or_else(|| default_branch.to_string()),
        ),
        (None, Some(RepositoryRequest::Create { branch, .. })) => (
            String::new(),
            branch.clone().unwrap_or_else(|| default_branch.to_string()),
        ),
        (None, None) => (String::new(), default_branch.to_string()),
    };

    TemplateVariables {
        project_name: job.project.name.clone(),
        project_slug: job.project.slug.clone(),
        description: job
            .project
            .description
            .clone()
            .unwrap_or_else(|| format!("{} project", job.project.name)),
        organization_id: job.organization_id.clone(),
        repository_url,
        repository_branch,
        registry: defaults.registry.clone(),
        port: defaults.port,
        replicas: defaults.replicas,
    }
}

// ---------------------------------------------------------------------------
// LoadTemplateStep
// ---------------------------------------------------------------------------

pub struct LoadTemplateStep {
    templates: Arc<dyn TemplateCatalog>,
}

impl LoadTemplateStep {
    pub fn new(templates: Arc<dyn TemplateCatalog>) -> Self {
        Self { templates }
    }
}

#[async_trait]
impl InitStep for LoadTemplateStep {
    fn name(&self) -> &str {
        names::LOAD_TEMPLATE
    }

    fn display_name(&self) -> &str {
        "Load template"
    }

    fn weight(&self) -> u32 {
        LOAD_TEMPLATE_WEIGHT
    }

    fn can_handle(&self, ctx: &InitializationContext) -> bool {
        ctx.job.project.template_id.is_some()
    }

    async fn execute(&self, ctx: &mut InitializationContext, progress: &StepProgress) -> Result<()> {
        let template_id = ctx
            .job
            .project
            .template_id
            .clone()
            .ok_or_else(|| LaunchpadError::Other("load_template ran without a template id".into()))?;

        let template = self
            .templates
            .load(&template_id)
            .await?
            .ok_or(LaunchpadError::TemplateNotFound {
                template: template_id.clone(),
            })?;

        tracing::info!(project_id = %ctx.project_id(), template = %template.id, "Template loaded");
        progress
            .report("resolve", 100, format!("Using template {}", template.name))
            .await;
        ctx.template = Some(template);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RenderTemplateStep
// ---------------------------------------------------------------------------

/// Renders the loaded template before any remote side effect, so template
/// errors surface early.
pub struct RenderTemplateStep {
    templates: Arc<dyn TemplateCatalog>,
    defaults: TemplateDefaults,
    default_branch: String,
}

impl RenderTemplateStep {
    pub fn new(templates: Arc<dyn TemplateCatalog>, defaults: TemplateDefaults, default_branch: String) -> Self {
        Self {
            templates,
            defaults,
            default_branch,
        }
    }
}

#[async_trait]
impl InitStep for RenderTemplateStep {
    fn name(&self) -> &str {
        names::RENDER_TEMPLATE
    }

    fn display_name(&self) -> &str {
        "Render template"
    }

    fn weight(&self) -> u32 {
        RENDER_TEMPLATE_WEIGHT
    }

    fn can_handle(&self, ctx: &InitializationContext) -> bool {
        ctx.template.is_some()
    }

    async fn execute(&self, ctx: &mut InitializationContext, progress: &StepProgress) -> Result<()> {
        let template_id = match &ctx.template {
            Some(template) => template.id.clone(),
            None => return Err(LaunchpadError::Other("render_template ran without a loaded template".into())),
        };
        let variables = template_variables(
            &ctx.job,
            &self.defaults,
            &self.default_branch,
            ctx.repository.as_ref(),
        );

        let files = self.templates.render(&template_id, &variables).await?;
        if files.is_empty() {
            return Err(LaunchpadError::Template {
                template: template_id,
                message: "template produced no files".into(),
            });
        }

        tracing::info!(project_id = %ctx.project_id(), template = %template_id, files = files.len(), "Template rendered");
        progress
            .report("render", 100, format!("Rendered {} files", files.len()))
            .await;
        ctx.template_variables = Some(variables);
        ctx.rendered_files = Some(files);
        Ok(())
    }
}
