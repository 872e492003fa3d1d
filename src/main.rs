use anyhow::{Context, Result};
use bq_shortcuts::browse::{self, BrowseItem};
use bq_shortcuts::config::Config;
use bq_shortcuts::gcp::client::{format_gcp_error, GcpClient};
use bq_shortcuts::refresh::Refresher;
use bq_shortcuts::resource::RateLimiter;
use bq_shortcuts::snapshot::{SnapshotError, SnapshotStore};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Mirror BigQuery projects, datasets and tables into a local snapshot
#[derive(Parser, Debug)]
#[command(name = "bq-shortcuts", version, about, long_about = None)]
struct Args {
    /// Log level for the log file
    #[arg(long, value_enum, default_value = "info", global = true)]
    log_level: LogLevel,

    /// Snapshot directory (overrides the config file)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Re-fetch the whole inventory and replace the snapshot
    Refresh {
        /// Maximum number of tables fetched per dataset
        #[arg(long)]
        max_tables_per_dataset: Option<usize>,

        /// Aggregate API page requests per second
        #[arg(long)]
        requests_per_second: Option<u32>,
    },
    /// Print snapshot items as JSON: projects, or datasets of --project,
    /// or tables of --project/--dataset
    Browse {
        #[arg(short, long)]
        project: Option<String>,

        #[arg(short, long, requires = "project")]
        dataset: Option<String>,
    },
    /// Print the report of the last refresh
    Status,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn setup_logging(level: LogLevel) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let tracing_level = level.to_tracing_level()?;

    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Logging disabled, cannot open {:?}: {}", log_path, e);
            return None;
        }
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_max_level(tracing_level)
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("bq-shortcuts started with log level: {:?}", level);

    Some(guard)
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("bq-shortcuts").join("bq-shortcuts.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".bq-shortcuts").join("bq-shortcuts.log");
    }
    PathBuf::from("bq-shortcuts.log")
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level);

    let mut config = Config::load();
    if let Some(dir) = args.data_dir {
        config.data_dir = Some(dir);
    }

    let result = match args.command {
        Command::Refresh {
            max_tables_per_dataset,
            requests_per_second,
        } => {
            if let Some(max) = max_tables_per_dataset {
                config.max_tables_per_dataset = max;
            }
            if let Some(rate) = requests_per_second {
                config.requests_per_second = rate;
            }
            cmd_refresh(&config).await
        }
        Command::Browse { project, dataset } => {
            cmd_browse(&config, project.as_deref(), dataset.as_deref())
        }
        Command::Status => cmd_status(&config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{:#}", err);
            eprintln!("Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

async fn cmd_refresh(config: &Config) -> Result<()> {
    let store = SnapshotStore::new(config.effective_data_dir());
    let api_base = config.effective_api_base();
    tracing::info!("Using API endpoint {}", api_base);

    let client = GcpClient::new(&api_base).await?;
    let refresher = Refresher::new(
        Arc::new(client),
        Arc::new(RateLimiter::per_second(config.requests_per_second)),
        config.refresh_options(),
    );

    let outcome = refresher.run().await.map_err(|e| {
        tracing::error!("Refresh aborted: {:#}", e);
        anyhow::anyhow!("Refresh aborted: {}", format_gcp_error(&e))
    })?;

    store
        .write(&outcome.inventory)
        .context("Failed to store snapshot")?;
    store
        .write_report(&outcome.report)
        .context("Failed to store refresh report")?;

    let report = &outcome.report;
    eprintln!(
        "Stored {} projects, {} datasets, {} tables in {}",
        report.project_count,
        report.dataset_count,
        report.table_count,
        store.root().display()
    );
    if !report.is_complete() {
        eprintln!(
            "{} listings failed; see `bq-shortcuts status` for details",
            report.failures.len()
        );
    }

    Ok(())
}

fn cmd_browse(config: &Config, project: Option<&str>, dataset: Option<&str>) -> Result<()> {
    let store = SnapshotStore::new(config.effective_data_dir());

    let items: Vec<BrowseItem> = match (project, dataset) {
        (None, _) => browse::project_items(&store.load_index().map_err(no_data)?),
        (Some(project_id), None) => {
            browse::dataset_items(&store.load_project(project_id).map_err(no_data)?)
        }
        (Some(project_id), Some(dataset_id)) => {
            browse::table_items(&store.load_project(project_id).map_err(no_data)?, dataset_id)
        }
    };

    println!("{}", serde_json::to_string_pretty(&items)?);
    Ok(())
}

fn cmd_status(config: &Config) -> Result<()> {
    let store = SnapshotStore::new(config.effective_data_dir());
    let report = store.load_report().map_err(no_data)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn no_data(err: SnapshotError) -> anyhow::Error {
    if err.is_missing_data() {
        tracing::warn!("{}", err);
        anyhow::anyhow!("No data, run `bq-shortcuts refresh` first ({})", err)
    } else {
        err.into()
    }
}
