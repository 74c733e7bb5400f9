//! CLI binary for running and inspecting project initialization jobs.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use launchpad_pipeline::{InMemoryQueue, JobQueue, LaunchpadConfig, MemoryBackend, Orchestrator, Worker};
use launchpad_types::{
    AccountStatus, EventType, GitProvider, InitializationJob, LinkedAccount, ProgressEvent,
    RepositoryRequest,
};
use tokio::sync::oneshot;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "launchpad", version, about = "Project initialization orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one initialization job through the queue worker against in-memory collaborators
    Run {
        /// Path to the job payload (JSON)
        job: PathBuf,

        /// Configuration file (JSON); defaults apply when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Token stored as the user's linked account for the job's Git provider
        #[arg(long)]
        linked_token: Option<String>,

        /// Simulate a cluster without a GitOps controller
        #[arg(long)]
        no_gitops: bool,
    },

    /// Check a job payload without running it
    Validate {
        /// Path to the job payload (JSON)
        job: PathBuf,
    },

    /// Print the step table with weights and cumulative progress
    Steps {
        /// Configuration file (JSON); defaults apply when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match cli.command {
        Commands::Run {
            job,
            config,
            linked_token,
            no_gitops,
        } => {
            cmd_run(&job, config.as_deref(), linked_token, no_gitops).await?;
        }
        Commands::Validate { job } => {
            cmd_validate(&job)?;
        }
        Commands::Steps { config } => {
            cmd_steps(config.as_deref())?;
        }
    }

    Ok(())
}

fn load_job(path: &Path) -> anyhow::Result<InitializationJob> {
    let source = std::fs::read_to_string(path)?;
    let job: InitializationJob = serde_json::from_str(&source)?;
    Ok(job)
}

fn load_config(path: Option<&Path>) -> anyhow::Result<LaunchpadConfig> {
    match path {
        Some(path) => {
            let config = LaunchpadConfig::from_file(path)?;
            tracing::debug!(path = %path.display(), "Loaded configuration");
            Ok(config)
        }
        None => Ok(LaunchpadConfig::default()),
    }
}

fn cmd_validate(path: &Path) -> anyhow::Result<()> {
    let job = load_job(path)?;
    if let Err(e) = job.validate() {
        println!("[ERROR] {e}");
        std::process::exit(1);
    }

    println!("Job is valid");
    println!("Project: {} ({})", job.project.name, job.project.slug);
    println!("Template: {}", job.project.template_id.as_deref().unwrap_or("(none)"));
    match &job.repository {
        Some(RepositoryRequest::Existing { provider, url, .. }) => {
            println!("Repository: link existing {provider} repository {url}");
        }
        Some(RepositoryRequest::Create { provider, name, .. }) => {
            println!("Repository: create {provider} repository {name}");
        }
        None => println!("Repository: (none)"),
    }
    if job.environment_ids.is_empty() {
        println!("Environments: defaults");
    } else {
        println!("Environments: {}", job.environment_ids.join(", "));
    }
    Ok(())
}

fn cmd_steps(config: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(config)?;
    let backend = MemoryBackend::new();
    let orchestrator = Orchestrator::with_default_steps(&backend.services(), backend.publisher(), &config)?;

    println!("{:<22} {:>6} {:>9}", "STEP", "WEIGHT", "PROGRESS");
    for row in orchestrator.plan() {
        println!("{:<22} {:>6} {:>8}%", row.name, row.weight, row.progress_after);
    }
    println!("{:<22} {:>6}", "total", orchestrator.total_weight());
    Ok(())
}

fn print_event(event: &ProgressEvent) {
    let marker = match event.event_type {
        EventType::Progress => " ",
        EventType::Completed => "✓",
        EventType::Failed => "✗",
        EventType::Error => "!",
    };
    match &event.substep {
        Some(substep) => println!(
            "{marker} [{:>3}%] {} / {}: {}",
            event.progress, event.state, substep.name, event.message
        ),
        None => println!("{marker} [{:>3}%] {}: {}", event.progress, event.state, event.message),
    }
}

async fn cmd_run(
    path: &Path,
    config: Option<&Path>,
    linked_token: Option<String>,
    no_gitops: bool,
) -> anyhow::Result<()> {
    let config = load_config(config)?;
    let job = load_job(path)?;
    job.validate()?;

    let backend = MemoryBackend::new();
    if let Some(token) = linked_token {
        let provider = job
            .repository
            .as_ref()
            .map(|r| r.provider())
            .unwrap_or(GitProvider::Github);
        backend
            .accounts
            .link(LinkedAccount {
                user_id: job.user_id.clone(),
                provider,
                username: job.user_id.clone(),
                access_token: token,
                status: AccountStatus::Active,
                expires_at: None,
            })
            .await;
    }
    if no_gitops {
        backend.sync.set_installed(false).await;
    }

    if let Some(template_id) = &job.project.template_id {
        backend.seed_sample_template(template_id).await;
    }

    let orchestrator = Orchestrator::with_default_steps(&backend.services(), backend.publisher(), &config)?;

    println!("Initializing project: {} ({})", job.project.name, job.project.slug);
    let project_id = job.project_id.clone();
    let mut events = BroadcastStream::new(orchestrator.publisher().subscribe());
    let (done_tx, mut done_rx) = oneshot::channel::<()>();
    let printer = tokio::spawn(async move {
        let show = |item: Result<ProgressEvent, BroadcastStreamRecvError>| match item {
            Ok(event) if event.project_id == project_id => print_event(&event),
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Progress printer fell behind"),
        };
        loop {
            tokio::select! {
                item = events.next() => match item {
                    Some(item) => show(item),
                    None => return,
                },
                _ = &mut done_rx => break,
            }
        }
        // Events published before the worker finished are already buffered.
        while let Ok(Some(item)) = tokio::time::timeout(Duration::from_millis(50), events.next()).await {
            show(item);
        }
    });

    // One job through the queue: failed deliveries are redelivered or dead-lettered.
    let queue = Arc::new(InMemoryQueue::new(&config.queue));
    queue.enqueue(job).await?;
    queue.close().await;
    let mut summary = None;
    while let Some(delivery) = queue.dequeue().await {
        let attempt = delivery.attempt;
        match Worker::process(queue.as_ref(), &orchestrator, delivery).await {
            Ok(done) => summary = Some(done),
            Err(e) => println!("[ERROR] attempt {attempt}: {e}"),
        }
    }

    let _ = done_tx.send(());
    if let Err(e) = printer.await {
        tracing::warn!(error = %e, "Progress printer task failed");
    }

    let Some(summary) = summary else {
        let dead = queue.dead_letters().await;
        let reason = dead.first().map(|d| d.error.as_str()).unwrap_or("job was not processed");
        anyhow::bail!("initialization failed: {reason}");
    };
    println!("\nProject initialized");
    println!("{}", serde_json::to_string_pretty(&summary)?);
    for warning in &summary.warnings {
        println!("[WARN] {warning}");
    }
    Ok(())
}
