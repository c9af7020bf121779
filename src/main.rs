use crate::config::Config;
use crate::jobs::{FetchJob, JobQueue, RetryPolicy};
use crate::model::{NewProfessor, ProfessorId};
use crate::registry::GrantsRegistryClient;
use crate::service::ProfessorService;
use crate::store::Store;
use crate::workflow::ProjectUpsertWorkflow;
use clap::{ArgAction, Parser, Subcommand};
use eyre::{Result, WrapErr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

mod config;
mod display;
mod error;
mod jobs;
mod model;
mod registry;
mod service;
mod store;
mod web;
mod workflow;

/// How long the fetch workers may take to finish queued jobs on shutdown
/// before they are aborted.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    /// Use FILE instead of profgrants.toml
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Set verbosity level (repeat for more)
    #[arg(short, action = ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP interface and run queued fetches in the background
    Serve,
    /// Register a professor
    AddProfessor {
        #[arg(long)]
        pi_profile_id: i64,
        #[arg(long)]
        name: String,
        #[arg(long)]
        university: String,
    },
    /// List registered professors
    List,
    /// Show a professor and the associated projects
    Show { id: i64 },
    /// Fetch the projects of a professor right away
    Fetch { id: i64 },
}

fn build_workflow(config: &Config, store: Store) -> Result<ProjectUpsertWorkflow> {
    let client = GrantsRegistryClient::new(&config.registry.base_url, config.registry.timeout())
        .wrap_err("cannot build registry client")?;
    Ok(ProjectUpsertWorkflow::new(store, Arc::new(client))
        .with_page_size(config.registry.page_size)
        .with_fetch_error_policy(config.registry.on_fetch_error))
}

fn retry_policy(config: &Config) -> RetryPolicy {
    RetryPolicy {
        max_attempts: config.jobs.max_attempts,
        delay: config.jobs.retry_delay(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "cannot listen for shutdown signal");
    }
    info!("shutdown requested");
}

async fn serve(config: &Config, store: Store) -> Result<()> {
    let workflow = Arc::new(build_workflow(config, store.clone())?);
    let (queue, workers) = JobQueue::start(
        workflow,
        config.jobs.workers,
        config.jobs.queue_capacity,
        retry_policy(config),
    );
    let queue = Arc::new(queue);
    let app = web::router(ProfessorService::new(store, queue.clone()));
    let listener = tokio::net::TcpListener::bind(config.server.listen)
        .await
        .wrap_err_with(|| format!("cannot listen on {}", config.server.listen))?;
    info!(listen = %config.server.listen, "serving");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .wrap_err("server error")?;
    queue.shutdown(workers, SHUTDOWN_GRACE).await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    let level = match args.verbose {
        0 => tracing::Level::ERROR,
        1 => tracing::Level::WARN,
        2 => tracing::Level::INFO,
        3 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt().with_max_level(level).init();
    let config = Config::load_or_default(args.config.as_deref())?;
    let store = Store::connect(&config.database.url, config.database.max_connections)
        .await
        .wrap_err("cannot open database")?;
    match args.command {
        Command::Serve => serve(&config, store).await?,
        Command::AddProfessor {
            pi_profile_id,
            name,
            university,
        } => {
            let professor = store
                .add_professor(&NewProfessor {
                    pi_profile_id,
                    name,
                    university,
                })
                .await?;
            println!("Added {} with id {}", professor, professor.id);
        }
        Command::List => display::display_professors(&store.list_professors().await?),
        Command::Show { id } => {
            let professor = store.get_professor(ProfessorId(id)).await?;
            let projects = store.projects_for(professor.id).await?;
            display::display_professor(&professor, &projects);
        }
        Command::Fetch { id } => {
            let workflow = build_workflow(&config, store.clone())?;
            let summary = jobs::run_with_retries(
                FetchJob::new(ProfessorId(id)),
                &workflow,
                retry_policy(&config),
            )
            .await?;
            let professor = store.get_professor(ProfessorId(id)).await?;
            display::display_summary(&professor, &summary);
        }
    }
    Ok(())
}
