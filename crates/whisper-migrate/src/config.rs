//! Pattern configuration file and run configuration.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{MigrateError, Result};
use crate::identity::TagPattern;
use crate::shard::{TimeWindow, TsmFileName};
use crate::writer::{ErrorPolicy, OutputMode, DEFAULT_BATCH_THRESHOLD};

/// Default destination database.
pub const DEFAULT_DATABASE: &str = "migrated";

/// Default destination retention policy.
pub const DEFAULT_RETENTION_POLICY: &str = "autogen";

/// Default remote engine URL.
pub const DEFAULT_HOST: &str = "http://localhost:8086";

/// Patterns loaded from, and saved back to, a JSON configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatternConfig {
    /// Patterns in file order.
    pub patterns: Vec<TagPattern>,
}

impl PatternConfig {
    /// Reads a JSON array of patterns.
    ///
    /// # Errors
    ///
    /// Returns [`MigrateError::Config`] if the file is missing, unreadable or
    /// not a valid pattern array.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| MigrateError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let patterns: Vec<TagPattern> = serde_json::from_str(&text)
            .map_err(|e| MigrateError::Config(format!("cannot parse {}: {}", path.display(), e)))?;
        debug!(path = %path.display(), patterns = patterns.len(), "Loaded pattern config");
        Ok(Self { patterns })
    }

    /// Rewrites the file with the current patterns.
    ///
    /// Writes a sibling temporary file and renames it over `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut json = serde_json::to_string_pretty(&self.patterns)?;
        json.push('\n');

        let tmp_path = tmp_path_for(path);
        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, path)?;
        info!(path = %path.display(), patterns = self.patterns.len(), "Saved pattern config");
        Ok(())
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Options of one migration run.
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Output strategy.
    pub mode: OutputMode,
    /// Directory scanned for legacy files.
    pub input_dir: PathBuf,
    /// Engine data directory (file mode).
    pub data_dir: Option<PathBuf>,
    /// Destination database.
    pub database: String,
    /// Destination retention policy.
    pub retention_policy: String,
    /// Requested time window.
    pub window: TimeWindow,
    /// Remote engine URL.
    pub host: String,
    /// Basic auth credentials.
    pub credentials: Option<(String, String)>,
    /// Points per remote batch.
    pub batch_threshold: usize,
    /// Failure handling.
    pub error_policy: ErrorPolicy,
    /// File name written in each shard directory.
    pub file_name: TsmFileName,
}

impl MigrationConfig {
    /// Creates a configuration with defaults for everything but the
    /// mode, input directory and window.
    pub fn new(mode: OutputMode, input_dir: impl Into<PathBuf>, window: TimeWindow) -> Self {
        Self {
            mode,
            input_dir: input_dir.into(),
            data_dir: None,
            database: DEFAULT_DATABASE.to_string(),
            retention_policy: DEFAULT_RETENTION_POLICY.to_string(),
            window,
            host: DEFAULT_HOST.to_string(),
            credentials: None,
            batch_threshold: DEFAULT_BATCH_THRESHOLD,
            error_policy: ErrorPolicy::default(),
            file_name: TsmFileName::default(),
        }
    }

    /// Sets the engine data directory.
    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(data_dir.into());
        self
    }

    /// Sets the destination database.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Sets the destination retention policy.
    pub fn with_retention_policy(mut self, retention_policy: impl Into<String>) -> Self {
        self.retention_policy = retention_policy.into();
        self
    }

    /// Sets the remote engine URL.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets basic auth credentials.
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    /// Sets the remote batch threshold.
    pub fn with_batch_threshold(mut self, threshold: usize) -> Self {
        self.batch_threshold = threshold;
        self
    }

    /// Sets the error policy.
    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    /// Sets the shard file name.
    pub fn with_file_name(mut self, file_name: TsmFileName) -> Self {
        self.file_name = file_name;
        self
    }

    /// Checks option combinations before any work starts.
    ///
    /// # Errors
    ///
    /// Returns [`MigrateError::Config`] for file mode without a data
    /// directory, an empty database name or a zero batch threshold.
    pub fn validate(&self) -> Result<()> {
        if self.mode == OutputMode::Tsm && self.data_dir.is_none() {
            return Err(MigrateError::Config("--data-dir is required for tsm mode".into()));
        }
        if self.database.is_empty() {
            return Err(MigrateError::Config("database name is empty".into()));
        }
        if self.batch_threshold == 0 {
            return Err(MigrateError::Config("batch threshold must be positive".into()));
        }
        Ok(())
    }
}
