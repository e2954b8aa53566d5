//! On-disk layout of destination shard files.
//!
//! ```text
//! {data_dir}/{database}/{retention_policy}/{shard_id}/{generation:09}-{sequence:09}.tsm
//! ```

use crate::error::Result;
use crate::shard::ShardId;
use std::fs;
use std::path::{Path, PathBuf};

/// Generation and sequence encoded in a TSM file name.
///
/// # Examples
/// ```rust,ignore
/// use whisper_migrate::shard::TsmFileName;
///
/// let name = TsmFileName::new(1, 2).file_name();
/// assert_eq!(name, "000000001-000000002.tsm");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TsmFileName {
    /// Compaction generation.
    pub generation: u32,
    /// Sequence within the generation.
    pub sequence: u32,
}

impl TsmFileName {
    /// File extension of TSM files.
    pub const EXTENSION: &'static str = "tsm";

    /// Creates a file name descriptor.
    pub fn new(generation: u32, sequence: u32) -> Self {
        Self {
            generation,
            sequence,
        }
    }

    /// Builds `{generation:09}-{sequence:09}.tsm`.
    pub fn file_name(&self) -> String {
        format!(
            "{:09}-{:09}.{}",
            self.generation,
            self.sequence,
            Self::EXTENSION
        )
    }

    /// Parses a file name into generation and sequence.
    pub fn parse(name: &str) -> Option<Self> {
        let stem = name.strip_suffix(".tsm")?;
        let (generation, sequence) = stem.split_once('-')?;
        if generation.len() != 9 || sequence.len() != 9 {
            return None;
        }
        Some(Self {
            generation: generation.parse().ok()?,
            sequence: sequence.parse().ok()?,
        })
    }
}

impl Default for TsmFileName {
    fn default() -> Self {
        Self::new(1, 2)
    }
}

/// Resolves shard directories and file paths under a destination data directory.
///
/// # Examples
/// ```rust,ignore
/// use whisper_migrate::shard::ShardLayout;
///
/// let layout = ShardLayout::new("/var/lib/influxdb/data", "migrated", "autogen");
/// let path = layout.shard_file_path(42);
/// ```
#[derive(Debug, Clone)]
pub struct ShardLayout {
    data_dir: PathBuf,
    database: String,
    retention_policy: String,
    file_name: TsmFileName,
}

impl ShardLayout {
    /// Creates a layout for one database and retention policy.
    pub fn new(
        data_dir: impl AsRef<Path>,
        database: impl Into<String>,
        retention_policy: impl Into<String>,
    ) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            database: database.into(),
            retention_policy: retention_policy.into(),
            file_name: TsmFileName::default(),
        }
    }

    /// Overrides the file name written inside each shard directory.
    pub fn with_file_name(mut self, file_name: TsmFileName) -> Self {
        self.file_name = file_name;
        self
    }

    /// Returns the root data directory.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Returns the directory of one shard.
    pub fn shard_dir(&self, shard_id: ShardId) -> PathBuf {
        self.data_dir
            .join(&self.database)
            .join(&self.retention_policy)
            .join(shard_id.to_string())
    }

    /// Returns the file path written for one shard.
    pub fn shard_file_path(&self, shard_id: ShardId) -> PathBuf {
        self.shard_dir(shard_id).join(self.file_name.file_name())
    }

    /// Lists TSM files already present in a shard directory.
    pub fn list_tsm_files(&self, shard_id: ShardId) -> Result<Vec<(TsmFileName, PathBuf)>> {
        let dir = self.shard_dir(shard_id);
        let mut files = Vec::new();

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(files),
            Err(err) => return Err(err.into()),
        };

        for entry in entries {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let Some(parsed) = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(TsmFileName::parse)
            else {
                continue;
            };
            files.push((parsed, path));
        }

        files.sort_by_key(|(name, _)| *name);
        Ok(files)
    }
}
