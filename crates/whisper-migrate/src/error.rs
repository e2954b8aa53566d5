//! Error and Result types for migration runs.

use crate::remote::RemoteError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// A convenience `Result` type for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

/// The error type for migration operations.
#[derive(Debug, Error)]
pub enum MigrateError {
    /// Pattern configuration or run options could not be used.
    #[error("Configuration error: {0}")]
    Config(String),

    /// No pattern matched and the pattern source produced none.
    #[error("No pattern available for {0}")]
    NoPatternAvailable(PathBuf),

    /// A legacy file could not be opened or fetched.
    #[error("Failed to read {path}: {reason}")]
    SourceRead {
        /// Path of the legacy file.
        path: PathBuf,
        /// Underlying cause.
        reason: String,
    },

    /// A whisper file has a malformed header or archive layout.
    #[error("Invalid whisper file: {0}")]
    InvalidWhisper(String),

    /// Invalid magic bytes in a TSM file header or footer.
    #[error("Invalid magic bytes: expected {expected:?}, got {actual:?}")]
    InvalidMagic {
        /// Expected magic.
        expected: [u8; 4],
        /// Magic found in the file.
        actual: [u8; 4],
    },

    /// Unsupported TSM file format version.
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u16),

    /// Block or file checksum does not match expected value.
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Expected CRC32 checksum.
        expected: u32,
        /// Actual computed CRC32 checksum.
        actual: u32,
    },

    /// Error while encoding or decoding a block.
    #[error("Codec error: {0}")]
    Codec(String),

    /// Writer was used out of order (write after index, index twice, ...).
    #[error("Block writer misuse: {0}")]
    WriterState(&'static str),

    /// Shard metadata could not be obtained from the destination engine.
    #[error("Shard catalog error: {0}")]
    ShardCatalog(String),

    /// A dispatched flush task panicked or was cancelled.
    #[error("Flush task failed: {0}")]
    FlushTask(String),

    /// The blocking task gathering a shard's points panicked or was cancelled.
    #[error("Gather task failed: {0}")]
    GatherTask(String),

    /// Remote engine request failed.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Pattern configuration JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl MigrateError {
    /// Builds a [`MigrateError::SourceRead`] from any displayable cause.
    pub fn source_read(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::SourceRead {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns true for errors that must stop a run regardless of error policy.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::NoPatternAvailable(_))
    }
}
