//! The seven built-in initialization steps, in execution order.
//!
//! | step                  | weight | guard                          | on failure |
//! |-----------------------|--------|--------------------------------|------------|
//! | `create_project`      | 10     | always                         | abort      |
//! | `load_template`       | 10     | job names a template           | abort      |
//! | `render_template`     | 20     | a template was loaded          | abort      |
//! | `create_environments` | 10     | always                         | abort      |
//! | `setup_repository`    | 30     | job carries a repository       | abort      |
//! | `create_gitops`       | 15     | a repository is set up         | warning    |
//! | `finalize`            | 5      | always                         | abort      |
//!
//! Clients rely on these weights staying fixed.

pub mod environments;
pub mod finalize;
pub mod gitops;
pub mod project;
pub mod repository;
pub mod template;

pub use environments::CreateEnvironmentsStep;
pub use finalize::FinalizeStep;
pub use gitops::CreateGitOpsStep;
pub use project::CreateProjectStep;
pub use repository::SetupRepositoryStep;
pub use template::{LoadTemplateStep, RenderTemplateStep};

use crate::config::LaunchpadConfig;
use crate::services::Services;
use crate::step::DynStep;

pub const CREATE_PROJECT_WEIGHT: u32 = 10;
pub const LOAD_TEMPLATE_WEIGHT: u32 = 10;
pub const RENDER_TEMPLATE_WEIGHT: u32 = 20;
pub const CREATE_ENVIRONMENTS_WEIGHT: u32 = 10;
pub const SETUP_REPOSITORY_WEIGHT: u32 = 30;
pub const CREATE_GITOPS_WEIGHT: u32 = 15;
pub const FINALIZE_WEIGHT: u32 = 5;

/// Build the standard step sequence over the given collaborators.
pub fn default_steps(services: &Services, config: &LaunchpadConfig) -> Vec<DynStep> {
    vec![
        DynStep::new(CreateProjectStep::new(services.projects.clone())),
        DynStep::new(LoadTemplateStep::new(services.templates.clone())),
        DynStep::new(RenderTemplateStep::new(
            services.templates.clone(),
            config.template_defaults.clone(),
            config.repository.default_branch.clone(),
        )),
        DynStep::new(CreateEnvironmentsStep::new(
            services.environments.clone(),
            config.default_environments.clone(),
        )),
        DynStep::new(SetupRepositoryStep::new(
            services,
            config.template_defaults.clone(),
            config.repository.default_branch.clone(),
        )),
        DynStep::new(CreateGitOpsStep::new(services.sync.clone(), config.gitops.clone())),
        DynStep::new(FinalizeStep::new(
            services.projects.clone(),
            services.audit.clone(),
            services.notifier.clone(),
        )),
    ]
}
