//! Output strategies for point batches.
//!
//! - [`file`]: one block file per shard, written directly to the data directory
//! - [`remote`]: line protocol batches streamed to the write endpoint

pub mod file;
pub mod remote;

pub use file::{FileWriteStrategy, ShardWriteReport};
pub use remote::{RemoteWriteStrategy, DEFAULT_BATCH_THRESHOLD, DEFAULT_MAX_IN_FLIGHT};

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{MigrateError, Result};
use crate::tsm::{Timestamp, TsmWriter};

/// Destination of the write phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Write block files into the engine's data directory.
    Tsm,
    /// Stream points to the engine's write endpoint.
    Remote,
}

/// What a failed source read or destination write does to the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Stop at the first failure.
    Abort,
    /// Skip the failing unit and report it at the end.
    #[default]
    Continue,
}

/// One skipped unit of work.
#[derive(Debug)]
pub struct Failure {
    /// File, shard or batch that failed.
    pub unit: String,
    /// Cause.
    pub error: MigrateError,
}

/// Failures accumulated under [`ErrorPolicy::Continue`].
#[derive(Debug, Default)]
pub struct FailureLog {
    failures: Vec<Failure>,
}

impl FailureLog {
    /// Applies `policy` to a failure of `unit`.
    ///
    /// Returns the error under [`ErrorPolicy::Abort`] or when the error is
    /// fatal regardless of policy; otherwise logs and records it.
    pub fn record(&mut self, policy: ErrorPolicy, unit: impl Into<String>, error: MigrateError) -> Result<()> {
        if policy == ErrorPolicy::Abort || error.is_fatal() {
            return Err(error);
        }
        let unit = unit.into();
        warn!(unit = %unit, error = %error, "Skipping failed unit");
        self.failures.push(Failure { unit, error });
        Ok(())
    }

    /// Moves every failure of `other` into this log.
    pub fn extend(&mut self, other: FailureLog) {
        self.failures.extend(other.failures);
    }

    /// Returns the failures in the order they happened.
    pub fn failures(&self) -> &[Failure] {
        &self.failures
    }

    /// Number of failures.
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    /// Returns true if nothing failed.
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Renders each failure as `unit: error`.
    pub fn describe(&self) -> Vec<String> {
        self.failures
            .iter()
            .map(|f| format!("{}: {}", f.unit, f.error))
            .collect()
    }
}

/// Native block writer used by the file-write strategy.
pub trait BlockWriter: Send {
    /// Appends one block for `key`. Timestamps are nanoseconds.
    fn write(&mut self, key: &str, values: &[(Timestamp, f64)]) -> Result<()>;

    /// Finalizes the file index.
    fn write_index(&mut self) -> Result<()>;

    /// Flushes and closes the file, returning its size in bytes.
    fn close(self: Box<Self>) -> Result<u64>;
}

/// Opens a [`BlockWriter`] per shard file.
pub trait BlockWriterFactory: Send + Sync {
    /// Creates the file at `path`, truncating an existing one.
    fn create(&self, path: &Path) -> Result<Box<dyn BlockWriter>>;
}

impl BlockWriter for TsmWriter {
    fn write(&mut self, key: &str, values: &[(Timestamp, f64)]) -> Result<()> {
        TsmWriter::write(self, key, values)
    }

    fn write_index(&mut self) -> Result<()> {
        TsmWriter::write_index(self)
    }

    fn close(self: Box<Self>) -> Result<u64> {
        TsmWriter::close(*self)
    }
}

/// Factory for on-disk [`TsmWriter`]s. Creates missing parent directories.
#[derive(Debug, Default, Clone, Copy)]
pub struct TsmWriterFactory;

impl BlockWriterFactory for TsmWriterFactory {
    fn create(&self, path: &Path) -> Result<Box<dyn BlockWriter>> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Box::new(TsmWriter::create(path)?))
    }
}
