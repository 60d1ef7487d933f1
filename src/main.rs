// Module-specific lints configuration
#![allow(clippy::uninlined_format_args)]

use anyhow::{anyhow, Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use futures::StreamExt;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::{error, info, warn, Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use bookling::app_config::{self, Config, ProviderKind};
use bookling::database::models::JobRecord;
use bookling::database::{DatabaseConnection, Repository};
use bookling::file_utils::FileManager;
use bookling::pipeline::{Orchestrator, Stage};
use bookling::providers;

/// CLI Wrapper for ProviderKind to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
enum CliProvider {
    Stub,
    #[value(name = "openai")]
    OpenAI,
}

impl From<CliProvider> for ProviderKind {
    fn from(cli_provider: CliProvider) -> Self {
        match cli_provider {
            CliProvider::Stub => ProviderKind::Stub,
            CliProvider::OpenAI => ProviderKind::OpenAI,
        }
    }
}

/// CLI Wrapper for LogLevel to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
enum CliLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<CliLogLevel> for app_config::LogLevel {
    fn from(cli_level: CliLogLevel) -> Self {
        match cli_level {
            CliLogLevel::Error => app_config::LogLevel::Error,
            CliLogLevel::Warn => app_config::LogLevel::Warn,
            CliLogLevel::Info => app_config::LogLevel::Info,
            CliLogLevel::Debug => app_config::LogLevel::Debug,
            CliLogLevel::Trace => app_config::LogLevel::Trace,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Submit a document, or every document in a directory, and process it
    Submit {
        /// Input document or directory
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Source language code (e.g., 'en', 'es', 'fr')
        #[arg(short, long)]
        source_language: Option<String>,

        /// Target language code (e.g., 'en', 'es', 'fr')
        #[arg(short, long)]
        target_language: Option<String>,

        /// Only create the jobs, do not process them
        #[arg(long)]
        no_run: bool,
    },

    /// Resume every job that is neither done nor failed
    Resume,

    /// Show the state of a job
    Status {
        /// Job identifier
        job_id: String,
    },

    /// List jobs
    Jobs {
        /// Only jobs at this stage
        #[arg(long)]
        stage: Option<String>,
    },

    /// Inspect or clear the translation cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Generate shell completions for bookling
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
    /// Show cache statistics
    Stats,
    /// Remove every cache entry
    Clear,
}

/// bookling - translated books and study decks from your documents
#[derive(Parser, Debug)]
#[command(name = "bookling")]
#[command(version = "0.1.0")]
#[command(about = "Resumable document translation with vocabulary decks")]
#[command(long_about = "bookling translates documents chapter by chapter and builds a flashcard deck of
the most useful vocabulary of every chapter. Jobs are persisted, so an
interrupted run continues where it stopped.

EXAMPLES:
    bookling submit novel.txt -s en -t es     # Translate a book into Spanish
    bookling submit ./library                 # Submit every .txt/.md file in a directory
    bookling resume                           # Continue all unfinished jobs
    bookling status <JOB_ID>                  # Show the state of a job
    bookling cache stats                      # Translation cache statistics
    bookling completions bash > bookling.bash # Generate bash completions

CONFIGURATION:
    Configuration is stored in conf.json by default. You can specify a different
    config file with --config-path. If the config file doesn't exist, a default one
    will be created automatically.")]
struct CommandLineOptions {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "conf.json", global = true)]
    config_path: String,

    /// Translation provider to use
    #[arg(short, long, value_enum, global = true)]
    provider: Option<CliProvider>,

    /// Model name to use for translation
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// API key for the translation provider
    #[arg(long, env = "BOOKLING_API_KEY", hide_env_values = true, global = true)]
    api_key: Option<String>,

    /// Set logging level
    #[arg(short, long, value_enum, global = true)]
    log_level: Option<CliLogLevel>,
}

// @struct: Custom logger implementation
struct CustomLogger {
    level: LevelFilter,
}

impl CustomLogger {
    // @creates: New logger with specified level
    fn new(level: LevelFilter) -> Self {
        CustomLogger { level }
    }

    // @initializes: Global logger
    fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
        let logger = Box::new(CustomLogger::new(level));
        log::set_boxed_logger(logger)?;
        log::set_max_level(level);
        Ok(())
    }

    // @returns: Emoji prefix for log level
    fn get_emoji_for_level(level: Level) -> &'static str {
        match level {
            Level::Error => "❌ ",
            Level::Warn => "🚧 ",
            Level::Info => "",
            Level::Debug => "🔍 ",
            Level::Trace => "📋 ",
        }
    }

    // @returns: ANSI colour for log level
    fn color_for_level(level: Level) -> &'static str {
        match level {
            Level::Error => "\x1B[1;31m",
            Level::Warn => "\x1B[1;33m",
            Level::Info => "\x1B[1;32m",
            Level::Debug => "\x1B[1;36m",
            Level::Trace => "\x1B[1;35m",
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
            let mut stderr = std::io::stderr();
            let _ = writeln!(
                stderr,
                "{}{} {}{}\x1B[0m",
                Self::color_for_level(record.level()),
                now,
                Self::get_emoji_for_level(record.level()),
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
    // Start at trace so the configured level can only narrow it
    CustomLogger::init(LevelFilter::Trace)?;
    log::set_max_level(LevelFilter::Info);

    let cli = CommandLineOptions::parse();

    if let Commands::Completions { shell } = cli.command {
        let mut cmd = CommandLineOptions::command();
        generate(shell, &mut cmd, "bookling", &mut std::io::stdout());
        return Ok(());
    }

    let config = load_config(&cli)?;
    log::set_max_level(config.log_level.to_level_filter());

    let repo = open_repository(&config)?;

    match cli.command {
        Commands::Submit {
            input,
            source_language,
            target_language,
            no_run,
        } => {
            let source_language = source_language.unwrap_or_else(|| config.source_language.clone());
            let target_language = target_language.unwrap_or_else(|| config.target_language.clone());
            let orchestrator = Arc::new(build_orchestrator(&config, repo)?);
            run_submit(&orchestrator, input, &source_language, &target_language, no_run).await
        }
        Commands::Resume => {
            let orchestrator = Arc::new(build_orchestrator(&config, repo)?);
            run_resume(&orchestrator).await
        }
        Commands::Status { job_id } => {
            let job = repo
                .get_job(&job_id)
                .await?
                .ok_or_else(|| anyhow!("Job not found: {}", job_id))?;
            print_job(&job);
            for event in repo.get_events(&job_id, 0).await? {
                println!(
                    "  #{:<4} {:<12} {:>5.1}%  {}",
                    event.seq,
                    event.stage.to_string(),
                    event.percentage,
                    event.detail.unwrap_or_default()
                );
            }
            Ok(())
        }
        Commands::Jobs { stage } => {
            let stage = stage.map(|s| s.parse::<Stage>()).transpose()?;
            let jobs = repo.list_jobs(stage).await?;
            if jobs.is_empty() {
                println!("No jobs");
            }
            for job in &jobs {
                print_job(job);
            }
            Ok(())
        }
        Commands::Cache { action } => match action {
            CacheAction::Stats => {
                let stats = repo.get_cache_stats().await?;
                println!("Entries: {}", stats.total_entries);
                println!("Hits:    {}", stats.total_hits);
                println!("{}", repo.connection().stats()?);
                Ok(())
            }
            CacheAction::Clear => {
                let removed = repo.clear_cache().await?;
                info!("Removed {} cache entries", removed);
                Ok(())
            }
        },
        Commands::Completions { .. } => Ok(()),
    }
}

fn load_config(cli: &CommandLineOptions) -> Result<Config> {
    let mut config = Config::load_or_create(&cli.config_path)?;

    // Override config with CLI options if provided
    if let Some(provider) = &cli.provider {
        config.translation.provider = provider.clone().into();
    }
    if let Some(model) = &cli.model {
        config.translation.model = model.clone();
    }
    if let Some(api_key) = &cli.api_key {
        config.translation.api_key = api_key.clone();
    }
    if let Some(log_level) = &cli.log_level {
        config.log_level = log_level.clone().into();
    }

    config.validate().context("Configuration validation failed")?;
    Ok(config)
}

fn open_repository(config: &Config) -> Result<Repository> {
    let db = match &config.storage.database_path {
        Some(path) => DatabaseConnection::new(path)?,
        None => DatabaseConnection::new_default()?,
    };
    Ok(Repository::new(db))
}

fn build_orchestrator(config: &Config, repo: Repository) -> Result<Orchestrator> {
    FileManager::ensure_dir(&config.storage.artifact_dir)?;
    let client = providers::create_client(&config.translation)?;
    info!(
        "Using {} provider ({})",
        config.translation.provider, config.translation.model
    );
    Orchestrator::from_config(config, repo, client)
}

fn progress_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {prefix} {msg}")
        .or_else(|_| ProgressStyle::default_bar().template("{spinner} [{elapsed_precise}] [{bar:40}] {pos}% {msg}"))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▓▒░")
}

/// Run a job with a progress bar fed from its event stream
async fn run_with_progress(orchestrator: &Arc<Orchestrator>, multi: &MultiProgress, job_id: &str, label: String) -> Result<JobRecord> {
    let bar = multi.add(ProgressBar::new(100));
    bar.set_style(progress_style());
    bar.set_prefix(label);

    let mut events = Box::pin(orchestrator.subscribe(job_id));
    let progress_bar = bar.clone();
    let follower = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            progress_bar.set_position(event.percentage.round() as u64);
            progress_bar.set_message(format!("{} {}", event.stage, event.detail.unwrap_or_default()));
        }
    });

    let job = orchestrator.spawn(job_id).await??;
    // The event stream only ends on done or failed
    if job.stage.is_terminal() {
        let _ = follower.await;
    } else {
        follower.abort();
    }

    match job.stage {
        Stage::Done => bar.finish_with_message("done"),
        Stage::Failed => bar.abandon_with_message(format!(
            "failed at {}: {}",
            job.failed_stage.map(|s| s.to_string()).unwrap_or_default(),
            job.error.clone().unwrap_or_default()
        )),
        stage => bar.abandon_with_message(format!("stopped at {}", stage)),
    }
    Ok(job)
}

async fn run_submit(
    orchestrator: &Arc<Orchestrator>,
    input: PathBuf,
    source_language: &str,
    target_language: &str,
    no_run: bool,
) -> Result<()> {
    let documents = FileManager::collect_inputs(&input)?;
    if documents.is_empty() {
        warn!("No documents found in {}", input.display());
        return Ok(());
    }

    let mut jobs = Vec::with_capacity(documents.len());
    for document in &documents {
        let job = orchestrator
            .create_job(document, source_language, target_language)
            .await?;
        println!("{}  {}", job.id, document.display());
        jobs.push(job);
    }
    if no_run {
        return Ok(());
    }

    let multi = MultiProgress::new();
    let runs = jobs.iter().map(|job| {
        let label = FileManager::display_name(&job.source_path);
        run_with_progress(orchestrator, &multi, &job.id, label)
    });
    let results = futures::future::join_all(runs).await;
    report(results)
}

async fn run_resume(orchestrator: &Arc<Orchestrator>) -> Result<()> {
    let jobs = orchestrator.repository().list_resumable_jobs().await?;
    if jobs.is_empty() {
        info!("No unfinished jobs");
        return Ok(());
    }

    let multi = MultiProgress::new();
    let runs = jobs.iter().map(|job| {
        let label = FileManager::display_name(&job.source_path);
        run_with_progress(orchestrator, &multi, &job.id, label)
    });
    let results = futures::future::join_all(runs).await;
    report(results)
}

fn report(results: Vec<Result<JobRecord>>) -> Result<()> {
    let mut failed = 0;
    for result in results {
        match result {
            Ok(job) if job.stage == Stage::Done => {
                info!(
                    "Job {} done: {}, {}",
                    job.id,
                    job.book_path.unwrap_or_default(),
                    job.cards_path.unwrap_or_default()
                );
            }
            Ok(job) => {
                failed += 1;
                error!("Job {} ended at {}: {}", job.id, job.stage, job.error.unwrap_or_default());
            }
            Err(e) => {
                failed += 1;
                error!("Job error: {:#}", e);
            }
        }
    }

    if failed > 0 {
        return Err(anyhow!("{} job(s) did not finish", failed));
    }
    Ok(())
}

fn print_job(job: &JobRecord) {
    println!(
        "{}  {:<12} {:>5.1}%  {} -> {}  {}",
        job.id,
        job.stage.to_string(),
        job.percentage,
        job.source_language,
        job.target_language,
        job.source_path
    );
    if let Some(error) = &job.error {
        println!(
            "    failed at {}: {}",
            job.failed_stage.map(|s| s.to_string()).unwrap_or_default(),
            error
        );
    }
}
