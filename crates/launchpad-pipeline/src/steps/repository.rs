use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use launchpad_types::{
    CreateRepositoryOptions, GitProvider, InitializationJob, LaunchpadError, RepoInfo,
    RepositoryRequest, Result,
};

use crate::config::TemplateDefaults;
use crate::context::{InitializationContext, ResolvedCredentials};
use crate::scaffold::default_scaffold;
use crate::services::{AccountStore, RepositoryProviders, RepositoryStore, Services, TemplateCatalog};
use crate::step::{names, InitStep, StepProgress};

use super::template::template_variables;
use super::SETUP_REPOSITORY_WEIGHT;

/// Pick the explicit token from the job, falling back to the user's linked account.
pub async fn resolve_credentials(
    accounts: &dyn AccountStore,
    job: &InitializationJob,
    provider: GitProvider,
    now: DateTime<Utc>,
) -> Result<ResolvedCredentials> {
    let explicit = job.repository.as_ref().and_then(|r| r.explicit_token());
    if let Some(token) = explicit {
        return Ok(ResolvedCredentials {
            provider,
            username: None,
            access_token: token.to_string(),
        });
    }

    let account = accounts
        .find(&job.user_id, provider)
        .await?
        .ok_or(LaunchpadError::NoLinkedAccount { provider })?;
    if !account.is_usable(now) {
        return Err(LaunchpadError::LinkedAccountExpired { provider });
    }
    Ok(ResolvedCredentials {
        provider,
        username: Some(account.username),
        access_token: account.access_token,
    })
}

/// `owner/name` from an HTTPS or SCP-style clone URL.
pub fn repository_full_name(url: &str) -> Result<String> {
    let trimmed = url.trim().trim_end_matches('/').trim_end_matches(".git");
    let path = match trimmed.split_once("://") {
        Some((_, rest)) => rest.split_once('/').map(|(_, path)| path),
        None => trimmed.split_once(':').map(|(_, path)| path),
    };
    match path {
        Some(path) if path.contains('/') && !path.starts_with('/') => Ok(path.to_string()),
        _ => Err(LaunchpadError::InvalidJob(format!(
            "cannot determine repository name from '{url}'"
        ))),
    }
}

/// Links an existing repository or creates a new one and pushes the project files.
pub struct SetupRepositoryStep {
    repositories: Arc<dyn RepositoryStore>,
    accounts: Arc<dyn AccountStore>,
    templates: Arc<dyn TemplateCatalog>,
    providers: RepositoryProviders,
    defaults: TemplateDefaults,
    default_branch: String,
}

impl SetupRepositoryStep {
    pub fn new(services: &Services, defaults: TemplateDefaults, default_branch: String) -> Self {
        Self {
            repositories: services.repositories.clone(),
            accounts: services.accounts.clone(),
            templates: services.templates.clone(),
            providers: services.providers.clone(),
            defaults,
            default_branch,
        }
    }

    async fn link_existing(
        &self,
        ctx: &mut InitializationContext,
        progress: &StepProgress,
        url: &str,
        branch: Option<&str>,
    ) -> Result<RepoInfo> {
        let repo = RepoInfo {
            full_name: repository_full_name(url)?,
            clone_url: url.to_string(),
            default_branch: branch.unwrap_or(&self.default_branch).to_string(),
        };
        progress
            .report("link", 50, format!("Linking {}", repo.full_name))
            .await;
        ctx.repository = Some(repo.clone());
        Ok(repo)
    }

    async fn create_new(
        &self,
        ctx: &mut InitializationContext,
        progress: &StepProgress,
        options: CreateRepositoryOptions,
    ) -> Result<RepoInfo> {
        let provider = ctx
            .credentials
            .as_ref()
            .map(|c| c.provider)
            .ok_or_else(|| LaunchpadError::Other("credentials missing from context".into()))?;
        let client = self.providers.get(provider)?;
        let token = ctx
            .credentials
            .as_ref()
            .map(|c| c.access_token.clone())
            .unwrap_or_default();

        // A previous attempt of this step may already have created it.
        let repo = match ctx.repository.clone() {
            Some(repo) => repo,
            None => {
                progress
                    .report("create", 20, format!("Creating repository {}", options.name))
                    .await;
                let repo = client.create_repository(&token, &options).await?;
                tracing::info!(
                    project_id = %ctx.project_id(),
                    repository = %repo.full_name,
                    provider = %provider,
                    "Repository created"
                );
                ctx.repository = Some(repo.clone());
                repo
            }
        };

        let variables = template_variables(&ctx.job, &self.defaults, &self.default_branch, Some(&repo));
        let files = match &ctx.template {
            Some(template) => self.templates.render(&template.id, &variables).await?,
            None => default_scaffold(&variables),
        };
        progress
            .report("push", 60, format!("Pushing {} files", files.len()))
            .await;

        let message = format!("Initial commit: add {} project files", files.len());
        client
            .push_files(&token, &repo.full_name, &repo.default_branch, &files, &message)
            .await?;
        tracing::info!(
            project_id = %ctx.project_id(),
            repository = %repo.full_name,
            files = files.len(),
            "Initial commit pushed"
        );

        ctx.template_variables = Some(variables);
        ctx.rendered_files = Some(files);
        Ok(repo)
    }
}

#[async_trait]
impl InitStep for SetupRepositoryStep {
    fn name(&self) -> &str {
        names::SETUP_REPOSITORY
    }

    fn display_name(&self) -> &str {
        "Set up repository"
    }

    fn weight(&self) -> u32 {
        SETUP_REPOSITORY_WEIGHT
    }

    fn can_handle(&self, ctx: &InitializationContext) -> bool {
        ctx.job.repository.is_some()
    }

    async fn execute(&self, ctx: &mut InitializationContext, progress: &StepProgress) -> Result<()> {
        let request = ctx
            .job
            .repository
            .clone()
            .ok_or_else(|| LaunchpadError::Other("setup_repository ran without a repository request".into()))?;
        let project_id = ctx.require_project()?.id.clone();
        let provider = request.provider();

        if let Some(record) = self.repositories.find_by_project(&project_id).await? {
            tracing::info!(project_id = %project_id, repository = %record.full_name, "Repository already set up");
            ctx.repository = Some(RepoInfo {
                full_name: record.full_name,
                clone_url: record.clone_url,
                default_branch: record.default_branch,
            });
            ctx.repository_record_id = Some(record.id);
            progress.report("record", 100, "Repository already set up").await;
            return Ok(());
        }

        if ctx.credentials.is_none() {
            let credentials = resolve_credentials(self.accounts.as_ref(), &ctx.job, provider, Utc::now()).await?;
            progress.report("credentials", 10, "Resolved credentials").await;
            ctx.credentials = Some(credentials);
        }

        let (repo, linked) = match &request {
            RepositoryRequest::Existing { url, branch, .. } => {
                (self.link_existing(ctx, progress, url, branch.as_deref()).await?, true)
            }
            RepositoryRequest::Create {
                name,
                visibility,
                branch,
                ..
            } => {
                let options = CreateRepositoryOptions {
                    name: name.clone(),
                    visibility: *visibility,
                    default_branch: branch.clone().unwrap_or_else(|| self.default_branch.clone()),
                    auto_init: false,
                };
                (self.create_new(ctx, progress, options).await?, false)
            }
        };

        let record = self
            .repositories
            .create(&project_id, provider, &repo, linked)
            .await?;
        progress
            .report("record", 100, format!("Repository {} ready", repo.full_name))
            .await;
        ctx.repository_record_id = Some(record.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{self, MemoryBackend};
    use launchpad_types::{AccountStatus, LinkedAccount, TokenSource, Visibility};

    fn create_request(token: Option<TokenSource>) -> RepositoryRequest {
        RepositoryRequest::Create {
            provider: GitProvider::Github,
            name: "billing".into(),
            visibility: Visibility::Private,
            branch: None,
            access_token: token,
        }
    }

    async fn context(backend: &MemoryBackend, request: RepositoryRequest) -> InitializationContext {
        let mut job = memory::sample_job("p1", "billing");
        job.repository = Some(request);
        let mut ctx = InitializationContext::new(job);
        ctx.project = Some(backend.seed_project("p1", "billing").await);
        ctx
    }

    fn step(backend: &MemoryBackend) -> SetupRepositoryStep {
        SetupRepositoryStep::new(&backend.services(), TemplateDefaults::default(), "main".into())
    }

    fn linked(status: AccountStatus) -> LinkedAccount {
        LinkedAccount {
            user_id: "u1".into(),
            provider: GitProvider::Github,
            username: "octo".into(),
            access_token: "gho_linked".into(),
            status,
            expires_at: None,
        }
    }

    #[test]
    fn full_name_from_urls() {
        assert_eq!(
            repository_full_name("https://github.com/acme/billing.git").unwrap(),
            "acme/billing"
        );
        assert_eq!(
            repository_full_name("git@gitlab.com:acme/platform/billing.git").unwrap(),
            "acme/platform/billing"
        );
        assert!(repository_full_name("not a url").is_err());
    }

    #[tokio::test]
    async fn missing_linked_account_is_actionable() {
        let backend = MemoryBackend::new();
        let mut ctx = context(&backend, create_request(Some(TokenSource::Linked))).await;
        let err = step(&backend)
            .execute(&mut ctx, &memory::detached_progress("p1", names::SETUP_REPOSITORY))
            .await
            .unwrap_err();
        assert!(matches!(err, LaunchpadError::NoLinkedAccount { .. }));
        assert!(err.to_string().contains("connect an account"));
    }

    #[tokio::test]
    async fn expired_linked_account_is_distinguished() {
        let backend = MemoryBackend::new();
        backend.accounts.link(linked(AccountStatus::Expired)).await;
        let mut ctx = context(&backend, create_request(None)).await;
        let err = step(&backend)
            .execute(&mut ctx, &memory::detached_progress("p1", names::SETUP_REPOSITORY))
            .await
            .unwrap_err();
        assert!(matches!(err, LaunchpadError::LinkedAccountExpired { .. }));
    }

    #[tokio::test]
    async fn create_path_pushes_single_commit_with_linked_token() {
        let backend = MemoryBackend::new();
        backend.accounts.link(linked(AccountStatus::Active)).await;
        let mut ctx = context(&backend, create_request(Some(TokenSource::Linked))).await;

        step(&backend)
            .execute(&mut ctx, &memory::detached_progress("p1", names::SETUP_REPOSITORY))
            .await
            .unwrap();

        let pushes = backend.github.pushes().await;
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].token, "gho_linked");
        assert_eq!(pushes[0].files.len(), 8);
        assert_eq!(pushes[0].message, "Initial commit: add 8 project files");
        assert_eq!(ctx.repository.unwrap().full_name, "launchpad-test/billing");
        assert!(ctx.repository_record_id.is_some());
    }

    #[tokio::test]
    async fn retry_after_push_failure_does_not_recreate() {
        let backend = MemoryBackend::new();
        backend
            .github
            .fail_next_push(LaunchpadError::Provider {
                provider: "github".into(),
                status: 502,
                message: "bad gateway".into(),
                rate_limit_reset: None,
            })
            .await;
        let mut ctx = context(&backend, create_request(Some(TokenSource::Explicit("ghp_x".into())))).await;
        let step = step(&backend);
        let progress = memory::detached_progress("p1", names::SETUP_REPOSITORY);

        assert!(step.execute(&mut ctx, &progress).await.is_err());
        step.execute(&mut ctx, &progress).await.unwrap();

        assert_eq!(backend.github.created().await.len(), 1);
        assert_eq!(backend.github.pushes().await.len(), 1);
    }

    #[tokio::test]
    async fn existing_path_makes_no_provider_calls() {
        let backend = MemoryBackend::new();
        let request = RepositoryRequest::Existing {
            provider: GitProvider::Github,
            url: "https://github.com/acme/legacy.git".into(),
            branch: Some("develop".into()),
            access_token: Some(TokenSource::Explicit("ghp_x".into())),
        };
        let mut ctx = context(&backend, request).await;

        step(&backend)
            .execute(&mut ctx, &memory::detached_progress("p1", names::SETUP_REPOSITORY))
            .await
            .unwrap();

        assert!(backend.github.created().await.is_empty());
        assert!(backend.github.pushes().await.is_empty());
        let repo = ctx.repository.unwrap();
        assert_eq!(repo.full_name, "acme/legacy");
        assert_eq!(repo.default_branch, "develop");
        let record = backend.repositories.find_by_project("p1").await.unwrap().unwrap();
        assert!(record.linked);
    }
}
