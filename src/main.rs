// Module-specific lints configuration
#![allow(clippy::uninlined_format_args)]

use anyhow::{Context, Result, anyhow};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{Shell, generate};
use indicatif::{ProgressBar, ProgressStyle};
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError, error, info, warn};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use transpub::app_config::{Config, LogLevel};
use transpub::database::{DatabaseConnection, Repository};
use transpub::harvest;
use transpub::pipeline::{PassReport, PipelineRunner, RunnerSettings};
use transpub::providers::invenio::Invenio;
use transpub::providers::matecat::Matecat;

/// CLI Wrapper for LogLevel to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
enum CliLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<CliLogLevel> for LogLevel {
    fn from(cli_level: CliLogLevel) -> Self {
        match cli_level {
            CliLogLevel::Error => LogLevel::Error,
            CliLogLevel::Warn => LogLevel::Warn,
            CliLogLevel::Info => LogLevel::Info,
            CliLogLevel::Debug => LogLevel::Debug,
            CliLogLevel::Trace => LogLevel::Trace,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Store harvested records (`<name>.json` next to `<name>.<ext>`) from a directory
    Ingest {
        /// Directory holding the harvested records and files
        #[arg(value_name = "DIR")]
        dir: PathBuf,
    },

    /// Submit unpublished documents for translation
    Dispatch,

    /// Run one poll pass and retrieve finished translations
    Poll,

    /// Publish every document whose translations are settled
    Publish {
        /// Also retry documents whose last publish failed
        #[arg(long)]
        retry_failed: bool,
    },

    /// Dispatch, poll until no job is pending, then publish
    Run,

    /// Show store statistics and per-document progress
    Status,

    /// Generate shell completions for transpub
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// transpub - translate and publish bibliographic documents
#[derive(Parser, Debug)]
#[command(name = "transpub")]
#[command(version)]
#[command(about = "Translate harvested documents and publish them as multilingual records")]
#[command(long_about = "transpub sends harvested documents and their metadata to a translation
provider, collects the translated files and metadata, and publishes one multilingual
record per document to a content repository.

EXAMPLES:
    transpub ingest ./harvest            # Store harvested records
    transpub run                         # Translate and publish everything pending
    transpub poll                        # One poll pass
    transpub publish --retry-failed      # Publish, retrying earlier failures
    transpub status                      # Show progress
    transpub completions bash > transpub.bash

CONFIGURATION:
    Configuration is stored in conf.json by default. If the file doesn't exist,
    a default one is created and must be completed with the provider API key
    and the repository token.")]
struct CommandLineOptions {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "conf.json", global = true)]
    config_path: PathBuf,

    /// Document store path (overrides the configuration)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Set logging level
    #[arg(short, long, value_enum, global = true)]
    log_level: Option<CliLogLevel>,
}

struct CustomLogger {
    level: LevelFilter,
}

impl CustomLogger {
    fn new(level: LevelFilter) -> Self {
        CustomLogger { level }
    }

    fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
        let logger = Box::new(CustomLogger::new(level));
        log::set_boxed_logger(logger)?;
        log::set_max_level(level);
        Ok(())
    }

    fn color_for_level(level: Level) -> &'static str {
        match level {
            Level::Error => "1;31",
            Level::Warn => "1;33",
            Level::Info => "1;32",
            Level::Debug => "1;36",
            Level::Trace => "1;35",
        }
    }
}

impl Log for CustomLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let now = chrono::Local::now().format("%H:%M:%S.%3f");
            let _ = writeln!(
                std::io::stderr(),
                "\x1B[{}m{} {:<5} {}\x1B[0m",
                Self::color_for_level(record.level()),
                now,
                record.level(),
                record.args()
            );
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Trace here, narrowed once the configuration is known
    CustomLogger::init(LevelFilter::Trace)?;
    log::set_max_level(LevelFilter::Info);

    let cli = CommandLineOptions::parse();

    if let Commands::Completions { shell } = cli.command {
        let mut cmd = CommandLineOptions::command();
        generate(shell, &mut cmd, "transpub", &mut std::io::stdout());
        return Ok(());
    }

    let config = load_config(&cli)?;

    match cli.command {
        Commands::Ingest { dir } => {
            let store = open_store(&config)?;
            run_ingest(&store, &dir, &config).await
        }
        Commands::Status => {
            let store = open_store(&config)?;
            run_status(&store).await
        }
        Commands::Dispatch => {
            let runner = build_runner(&config)?;
            let report = runner.dispatch_pending().await?;
            finish(report)
        }
        Commands::Poll => {
            let runner = build_runner(&config)?;
            let report = runner.poll_pending().await?;
            finish(report)
        }
        Commands::Publish { retry_failed } => {
            let runner = build_runner(&config)?;
            let report = runner.publish_ready(retry_failed).await?;
            finish(report)
        }
        Commands::Run => {
            let runner = build_runner(&config)?;
            run_pipeline(&runner).await
        }
        Commands::Completions { .. } => Ok(()),
    }
}

fn load_config(cli: &CommandLineOptions) -> Result<Config> {
    let (mut config, created) = Config::load_or_create(&cli.config_path)?;
    if created {
        warn!(
            "Config file not found at '{}', created a default one.",
            cli.config_path.display()
        );
    }

    if let Some(log_level) = &cli.log_level {
        config.log_level = log_level.clone().into();
    }
    if let Some(database) = &cli.database {
        config.database_path = Some(database.clone());
    }

    log::set_max_level(config.log_level.to_level_filter());
    Ok(config)
}

fn open_store(config: &Config) -> Result<Repository> {
    let db = match &config.database_path {
        Some(path) => DatabaseConnection::new(path)?,
        None => DatabaseConnection::new_default()?,
    };
    info!("Using document store at {}", db.path().display());
    Ok(Repository::new(db))
}

fn build_runner(config: &Config) -> Result<PipelineRunner> {
    config
        .validate()
        .context("Configuration validation failed")?;

    let store = open_store(config)?;
    let provider = Matecat::new(
        config.provider.endpoint.clone(),
        config.provider.api_key.clone(),
        config.provider.timeout_secs,
    );
    let repository = Invenio::new(
        config.repository.endpoint.clone(),
        config.repository.api_token.clone(),
        config.repository.accept_invalid_certs,
        config.repository.timeout_secs,
    );

    PipelineRunner::new(
        store,
        Arc::new(provider),
        Arc::new(repository),
        RunnerSettings::from_config(config),
    )
}

async fn run_ingest(store: &Repository, dir: &Path, config: &Config) -> Result<()> {
    if !dir.is_dir() {
        return Err(anyhow!("Input path is not a directory: {:?}", dir));
    }

    let ids = harvest::ingest_directory(store, dir, &config.repository.name).await?;
    info!("Ingested {} document(s)", ids.len());
    Ok(())
}

async fn run_status(store: &Repository) -> Result<()> {
    let stats = store.stats().await?;
    println!("{}", stats);

    for document in store.list_documents().await? {
        let variants = store.list_variants(document.id).await?;
        let complete = variants.iter().filter(|v| v.is_complete()).count();
        let abandoned = variants.iter().filter(|v| v.is_abandoned()).count();
        let status = document
            .publish_status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unpublished".to_string());

        println!(
            "{:>5}  {:<12} {:>2}/{:<2} complete {:>2} abandoned  {}",
            document.id,
            status,
            complete,
            variants.len(),
            abandoned,
            document.identifier
        );
    }

    Ok(())
}

async fn run_pipeline(runner: &PipelineRunner) -> Result<()> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner.set_message("Dispatching documents...");

    let result = runner
        .run_until_settled(|pass, remaining| {
            spinner.set_message(format!(
                "Poll pass {} done, {} job(s) pending",
                pass, remaining
            ));
        })
        .await;

    spinner.finish_and_clear();
    finish(result?)
}

/// Print terminal failures; the process fails when any were reported
fn finish(report: PassReport) -> Result<()> {
    info!(
        "{} item(s) processed, {} deferred, {} failed",
        report.processed,
        report.deferred,
        report.failures.len()
    );

    for failure in &report.failures {
        error!("{}", failure);
    }

    if report.failures.is_empty() {
        Ok(())
    } else {
        Err(anyhow!("{} terminal failure(s)", report.failures.len()))
    }
}
