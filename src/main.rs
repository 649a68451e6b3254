//! Crawl-Runner main entry point
//!
//! This is the command-line interface for the crawl-runner supervisor and its
//! extraction worker.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use crawl_runner::config::{load_config, load_config_with_hash, Config};
use crawl_runner::extraction::{run_extraction, ExtractionParams};
use crawl_runner::storage::{open_storage, CourseRecord, CourseStore, RunQueue, SqliteStorage};
use crawl_runner::{RunStatus, Supervisor};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Crawl-Runner: supervised execution of browser-driven extraction runs
///
/// Queued runs are claimed from the database and executed one at a time as
/// isolated, time-boxed extraction processes.
#[derive(Parser, Debug)]
#[command(name = "crawl-runner")]
#[command(version)]
#[command(about = "Supervised job execution for a browser-driven crawler", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll the run queue and execute runs
    Supervise {
        /// Path to TOML configuration file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,

        /// Process at most one queued run and exit
        #[arg(long)]
        once: bool,
    },

    /// Run one extraction with parameters taken from the environment
    Extract,

    /// Create or update a course
    AddCourse {
        #[arg(value_name = "CONFIG")]
        config: PathBuf,

        #[arg(long)]
        id: String,

        #[arg(long)]
        base_url: String,

        #[arg(long)]
        username: String,

        #[arg(long, default_value = "")]
        password: String,

        /// Page to capture; may be repeated
        #[arg(long = "target-url", value_name = "URL")]
        target_urls: Vec<String>,

        /// JSON manifest of attachments and videos to acquire
        #[arg(long)]
        asset_manifest: Option<PathBuf>,
    },

    /// Queue a run for a course
    Enqueue {
        #[arg(value_name = "CONFIG")]
        config: PathBuf,

        #[arg(value_name = "COURSE_ID")]
        course_id: String,
    },

    /// Request cancellation of a queued or running run
    Cancel {
        #[arg(value_name = "CONFIG")]
        config: PathBuf,

        #[arg(value_name = "RUN_ID")]
        run_id: String,
    },

    /// Show recent runs and per-status counts
    Status {
        #[arg(value_name = "CONFIG")]
        config: PathBuf,

        /// Number of runs to list
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    match cli.command {
        Command::Supervise { config, once } => handle_supervise(&config, once).await,
        Command::Extract => handle_extract().await,
        Command::AddCourse {
            config,
            id,
            base_url,
            username,
            password,
            target_urls,
            asset_manifest,
        } => {
            let mut course = CourseRecord::new(id, base_url, username, password, target_urls);
            if let Some(path) = asset_manifest {
                course = course.with_asset_manifest(path.to_string_lossy());
            }
            handle_add_course(&config, &course)
        }
        Command::Enqueue { config, course_id } => handle_enqueue(&config, &course_id),
        Command::Cancel { config, run_id } => handle_cancel(&config, &run_id),
        Command::Status { config, limit } => handle_status(&config, limit),
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("crawl_runner=info,warn"),
            1 => EnvFilter::new("crawl_runner=debug,info"),
            2 => EnvFilter::new("crawl_runner=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Loads and validates configuration, logging its hash
fn load_logged_config(path: &Path) -> anyhow::Result<Config> {
    tracing::info!("Loading configuration from: {}", path.display());
    let (config, hash) = load_config_with_hash(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", hash);
    Ok(config)
}

fn open_configured_storage(config: &Config) -> anyhow::Result<SqliteStorage> {
    let path = Path::new(&config.storage.database_path);
    open_storage(path).with_context(|| format!("Failed to open database {}", path.display()))
}

/// Handles `supervise`: runs the polling loop until interrupted
async fn handle_supervise(config_path: &Path, once: bool) -> anyhow::Result<()> {
    let config = load_logged_config(config_path)?;
    let storage = open_configured_storage(&config)?;
    let supervisor =
        Supervisor::new(config.supervisor.clone(), storage).with_config_path(config_path);

    if once {
        match supervisor.poll_and_execute_next().await? {
            Some(processed) => println!("Run {} finished as {}", processed.run_id, processed.status),
            None => println!("No queued runs"),
        }
        return Ok(());
    }

    tokio::select! {
        _ = supervisor.run() => {}
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for interrupt")?;
            tracing::info!("Interrupted, shutting down supervisor");
        }
    }

    Ok(())
}

/// Handles `extract`: the worker side of the extraction process contract
async fn handle_extract() -> anyhow::Result<()> {
    let params = ExtractionParams::from_env().context("Invalid extraction environment")?;

    let config = match &params.config_path {
        Some(path) => load_config(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => Config::default(),
    };

    tracing::info!(
        "Starting extraction for run {} ({} target pages)",
        params.run_id,
        params.target_urls.len()
    );

    match run_extraction(&params, &config).await {
        Ok(result_dir) => {
            tracing::info!("Extraction wrote {}", result_dir.display());
            Ok(())
        }
        Err(e) => {
            tracing::error!("Extraction failed: {}", e);
            Err(e.into())
        }
    }
}

/// Handles `add-course`
fn handle_add_course(config_path: &Path, course: &CourseRecord) -> anyhow::Result<()> {
    if course.target_urls.is_empty() {
        tracing::warn!("Course {} has no target pages", course.id);
    }
    url::Url::parse(&course.base_url)
        .with_context(|| format!("Invalid base URL: {}", course.base_url))?;

    let config = load_logged_config(config_path)?;
    let mut storage = open_configured_storage(&config)?;
    storage.upsert_course(course)?;

    println!("✓ Course {} saved", course.id);
    Ok(())
}

/// Handles `enqueue`
fn handle_enqueue(config_path: &Path, course_id: &str) -> anyhow::Result<()> {
    let config = load_logged_config(config_path)?;
    let mut storage = open_configured_storage(&config)?;

    if storage.get_course(course_id)?.is_none() {
        bail!("Course {} not found", course_id);
    }

    let run_id = storage.enqueue_run(course_id)?;
    println!("{}", run_id);
    Ok(())
}

/// Handles `cancel`: records the request for the owning supervisor
fn handle_cancel(config_path: &Path, run_id: &str) -> anyhow::Result<()> {
    let config = load_logged_config(config_path)?;
    let mut storage = open_configured_storage(&config)?;

    let status = storage.request_cancel(run_id)?;
    match status {
        RunStatus::Cancelled => println!("✓ Run {} cancelled", run_id),
        RunStatus::Running => {
            println!("✓ Cancellation requested; the supervisor will stop run {}", run_id)
        }
        other => println!("Run {} is {}", run_id, other),
    }
    Ok(())
}

/// Handles `status`: recent runs and per-status counts
fn handle_status(config_path: &Path, limit: usize) -> anyhow::Result<()> {
    let config = load_logged_config(config_path)?;
    let storage = open_configured_storage(&config)?;

    println!("=== Crawl-Runner Status ===\n");
    println!("Database: {}\n", config.storage.database_path);

    println!("Runs by status:");
    for status in RunStatus::all_states() {
        println!("  {:<10} {}", status, storage.count_runs_by_status(status)?);
    }

    let runs = storage.list_runs(limit)?;
    println!("\nRecent runs ({}):", runs.len());
    for run in &runs {
        println!(
            "  {}  {:<10} course={}  created={}",
            run.id, run.status, run.course_id, run.created_at
        );
        if let Some(dir) = &run.outputs_dir {
            println!("      outputs: {}", dir);
        }
        if let Some(error) = &run.error {
            let first_line = error.lines().next().unwrap_or_default();
            println!("      error: {}", first_line);
        }
    }

    Ok(())
}
