//! Whisper Migrate Binary
//!
//! Inspects whisper files, or migrates them into block files or a remote
//! write endpoint.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use whisper_migrate::config::{
    MigrationConfig, PatternConfig, DEFAULT_DATABASE, DEFAULT_HOST, DEFAULT_RETENTION_POLICY,
};
use whisper_migrate::counters::format_size;
use whisper_migrate::error::MigrateError;
use whisper_migrate::migration::{self, MigrationContext};
use whisper_migrate::prompt::InteractivePatternSource;
use whisper_migrate::remote::{HttpEngine, RemoteEngine};
use whisper_migrate::shard::{parse_date, BootstrapShardCatalog, ShardLayout, TimeWindow};
use whisper_migrate::telemetry;
use whisper_migrate::whisper::{discover_files, LegacyReader, WhisperReader};
use whisper_migrate::writer::{
    ErrorPolicy, FileWriteStrategy, OutputMode, RemoteWriteStrategy, DEFAULT_BATCH_THRESHOLD,
};

const CONTINUE_QUESTION: &str = "Do you want to continue the migration? Yes/No";

/// Whisper Migrate
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level, overridden by RUST_LOG
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print archive layout, oldest timestamp and point count of each file
    Info {
        /// Whisper files folder
        #[arg(long)]
        wsp_path: PathBuf,
    },
    /// Migrate whisper files
    Migrate(MigrateArgs),
}

#[derive(clap::Args, Debug)]
struct MigrateArgs {
    /// Output strategy
    #[arg(long, value_enum)]
    mode: OutputMode,

    /// Whisper files folder
    #[arg(long)]
    wsp_path: PathBuf,

    /// Start date (YYYY-MM-DD), inclusive
    #[arg(long)]
    from: String,

    /// End date (YYYY-MM-DD), exclusive; defaults to now
    #[arg(long)]
    until: Option<String>,

    /// Pattern configuration file, rewritten after the preview
    #[arg(long)]
    tag_config: PathBuf,

    /// Engine data directory (tsm mode)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Destination database
    #[arg(long, default_value = DEFAULT_DATABASE)]
    db: String,

    /// Destination retention policy
    #[arg(long, default_value = DEFAULT_RETENTION_POLICY)]
    retention_policy: String,

    /// Engine URL
    #[arg(long, env = "WHISPER_MIGRATE_HOST", default_value = DEFAULT_HOST)]
    host: String,

    /// Username for basic auth
    #[arg(long, env = "WHISPER_MIGRATE_USERNAME")]
    username: Option<String>,

    /// Password for basic auth
    #[arg(long, env = "WHISPER_MIGRATE_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Points per remote write batch
    #[arg(long, default_value_t = DEFAULT_BATCH_THRESHOLD)]
    batch_size: usize,

    /// What a failed file, shard or batch does to the run
    #[arg(long, value_enum, default_value_t = ErrorPolicy::Continue)]
    on_error: ErrorPolicy,

    /// Skip the confirmation prompt
    #[arg(long)]
    yes: bool,
}

impl MigrateArgs {
    fn window(&self) -> whisper_migrate::Result<TimeWindow> {
        let from = parse_date(&self.from)?;
        let until = match &self.until {
            Some(until) => parse_date(until)?,
            None => Utc::now(),
        };
        TimeWindow::new(from, until)
    }

    fn config(&self) -> whisper_migrate::Result<MigrationConfig> {
        let mut config = MigrationConfig::new(self.mode, &self.wsp_path, self.window()?)
            .with_database(&self.db)
            .with_retention_policy(&self.retention_policy)
            .with_host(&self.host)
            .with_batch_threshold(self.batch_size)
            .with_error_policy(self.on_error);
        if let Some(data_dir) = &self.data_dir {
            config = config.with_data_dir(data_dir);
        }
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            config = config.with_credentials(username, password);
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let args = Args::parse();
    telemetry::init(&args.log_level);

    match args.command {
        Command::Info { wsp_path } => {
            info_command(&wsp_path)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Migrate(migrate) => migrate_command(&migrate).await,
    }
}

fn info_command(wsp_path: &Path) -> whisper_migrate::Result<()> {
    let discovered = discover_files(wsp_path)?;
    if discovered.files.is_empty() {
        println!("No whisper files found");
        return Ok(());
    }

    let reader = WhisperReader::new();
    for path in &discovered.files {
        match reader.info(path) {
            Ok(info) => {
                let oldest = DateTime::<Utc>::from_timestamp(info.oldest_timestamp, 0)
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| info.oldest_timestamp.to_string());
                println!("Whisper file : {}", info.path.display());
                println!("Oldest data in file : {}", oldest);
                println!("Number of whisper points : {}", info.point_count);
                for (i, archive) in info.archives.iter().enumerate() {
                    println!(
                        "Archive {} : {}s per point, {} points, {}s retention",
                        i,
                        archive.seconds_per_point,
                        archive.points,
                        archive.retention()
                    );
                }
                println!("-----------------------------------------------------------------------");
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Cannot read whisper file"),
        }
    }
    println!("Total whisper file size : {}", format_size(discovered.total_bytes));
    Ok(())
}

async fn migrate_command(args: &MigrateArgs) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let config = args.config()?;
    let patterns = PatternConfig::load(&args.tag_config)?;

    let mut ctx = MigrationContext::new(patterns.patterns, config.error_policy);
    let files = migration::discover(&mut ctx, &config.input_dir)?;
    if files.is_empty() {
        println!("No whisper files found");
        return Ok(ExitCode::SUCCESS);
    }

    let mut source = InteractivePatternSource::new(io::stdin().lock(), io::stdout());
    let mut stdout = io::stdout();
    migration::preview(&mut ctx, &files, &mut source, &mut stdout)?;
    PatternConfig {
        patterns: ctx.patterns().to_vec(),
    }
    .save(&args.tag_config)?;

    if !args.yes && !source.confirm(CONTINUE_QUESTION)? {
        info!("Migration cancelled");
        return Ok(ExitCode::SUCCESS);
    }

    let mut engine = HttpEngine::new(config.host.as_str())?;
    if let Some((username, password)) = &config.credentials {
        engine = engine.with_basic_auth(username, password);
    }
    let engine = Arc::new(engine);
    let reader: Arc<dyn LegacyReader> = Arc::new(WhisperReader::new());

    let started = Instant::now();
    match config.mode {
        OutputMode::Tsm => {
            let data_dir = config
                .data_dir
                .as_deref()
                .ok_or_else(|| MigrateError::Config("--data-dir is required for tsm mode".into()))?;
            let catalog = BootstrapShardCatalog::new(Arc::clone(&engine))
                .with_retention_policy(&config.retention_policy);
            let layout = ShardLayout::new(data_dir, &config.database, &config.retention_policy)
                .with_file_name(config.file_name);
            let strategy = FileWriteStrategy::new(layout);
            migration::run_file_mode(
                &mut ctx,
                &files,
                &config.window,
                &config.database,
                &catalog,
                reader,
                &strategy,
                &mut source,
            )
            .await?;
        }
        OutputMode::Remote => {
            let engine: Arc<dyn RemoteEngine> = engine;
            let strategy = RemoteWriteStrategy::new(Arc::clone(&engine), &config.database)
                .with_retention_policy(Some(config.retention_policy.clone()))
                .with_threshold(config.batch_threshold)
                .with_error_policy(config.error_policy);
            migration::run_remote_mode(
                &mut ctx,
                &files,
                &config.window,
                reader.as_ref(),
                engine,
                strategy,
                &config.database,
                &mut source,
            )
            .await?;
        }
    }

    let summary = ctx.summary(started.elapsed(), config.mode == OutputMode::Tsm);
    println!("{}", summary);
    io::stdout().flush()?;

    if ctx.failures.is_empty() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
