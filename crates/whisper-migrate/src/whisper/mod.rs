//! Legacy round-robin (whisper) file access.
//!
//! # File Layout
//!
//! All integers are big-endian.
//!
//! ```text
//! ┌────────────────────────────────────────────────┐
//! │ Metadata (16 bytes)                            │
//! │  aggregation u32 │ max_retention u32 │         │
//! │  x_files_factor f32 │ archive_count u32        │
//! ├────────────────────────────────────────────────┤
//! │ Archive descriptors (12 bytes each)            │
//! │  offset u32 │ seconds_per_point u32 │ points u32│
//! ├────────────────────────────────────────────────┤
//! │ Archive 0 ring: points × (timestamp u32, f64)  │
//! │ Archive 1 ring ...                             │
//! └────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{MigrateError, Result};
use crate::identity::LEGACY_EXTENSION;
use crate::shard::TimeWindow;

/// Size of the metadata header in bytes.
pub const METADATA_SIZE: usize = 16;

/// Size of one archive descriptor in bytes.
pub const ARCHIVE_INFO_SIZE: usize = 12;

/// Size of one point slot in bytes.
pub const POINT_SIZE: usize = 12;

/// Fetches points from legacy series files.
///
/// Opening, fetching and closing happen within one call; no handle outlives it.
pub trait LegacyReader: Send + Sync {
    /// Returns every point of `path` whose timestamp lies in `window`, ascending.
    ///
    /// # Errors
    ///
    /// Returns [`MigrateError::SourceRead`] if the file cannot be read or parsed.
    fn fetch_range(&self, path: &Path, window: &TimeWindow) -> Result<Vec<(i64, f64)>>;
}

/// Descriptor of one archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveInfo {
    /// Byte offset of the archive's ring.
    pub offset: u32,
    /// Step between slots.
    pub seconds_per_point: u32,
    /// Number of slots.
    pub points: u32,
}

impl ArchiveInfo {
    /// Seconds covered by the archive.
    pub fn retention(&self) -> u64 {
        u64::from(self.seconds_per_point) * u64::from(self.points)
    }

    fn end(&self) -> usize {
        self.offset as usize + self.points as usize * POINT_SIZE
    }
}

/// Parsed metadata and archive descriptors.
#[derive(Debug, Clone, PartialEq)]
pub struct WhisperHeader {
    /// Aggregation method code.
    pub aggregation: u32,
    /// Retention of the lowest-precision archive, in seconds.
    pub max_retention: u32,
    /// Fraction of known points needed to aggregate.
    pub x_files_factor: f32,
    /// Archives, highest precision first.
    pub archives: Vec<ArchiveInfo>,
}

impl WhisperHeader {
    /// Parses and validates the header against the file length.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < METADATA_SIZE {
            return Err(MigrateError::InvalidWhisper(format!(
                "file too short for metadata: {} bytes",
                buf.len()
            )));
        }
        let aggregation = be_u32(buf, 0);
        let max_retention = be_u32(buf, 4);
        let x_files_factor = f32::from_bits(be_u32(buf, 8));
        let archive_count = be_u32(buf, 12) as usize;

        if archive_count == 0 {
            return Err(MigrateError::InvalidWhisper("no archives".into()));
        }
        let descriptors_end = METADATA_SIZE + archive_count * ARCHIVE_INFO_SIZE;
        if descriptors_end > buf.len() {
            return Err(MigrateError::InvalidWhisper(format!(
                "{} archive descriptors exceed file length {}",
                archive_count,
                buf.len()
            )));
        }

        let mut archives = Vec::with_capacity(archive_count);
        for i in 0..archive_count {
            let at = METADATA_SIZE + i * ARCHIVE_INFO_SIZE;
            let archive = ArchiveInfo {
                offset: be_u32(buf, at),
                seconds_per_point: be_u32(buf, at + 4),
                points: be_u32(buf, at + 8),
            };
            if archive.seconds_per_point == 0 {
                return Err(MigrateError::InvalidWhisper(format!("archive {} has zero step", i)));
            }
            if (archive.offset as usize) < descriptors_end || archive.end() > buf.len() {
                return Err(MigrateError::InvalidWhisper(format!(
                    "archive {} spans {}..{} outside file length {}",
                    i,
                    archive.offset,
                    archive.end(),
                    buf.len()
                )));
            }
            archives.push(archive);
        }

        Ok(Self {
            aggregation,
            max_retention,
            x_files_factor,
            archives,
        })
    }

    /// Picks the highest-precision archive covering `age` seconds, falling
    /// back to the lowest-precision one.
    pub fn archive_for_age(&self, age: i64) -> Result<&ArchiveInfo> {
        let age = u64::try_from(age).unwrap_or(0);
        self.archives
            .iter()
            .find(|a| a.retention() >= age)
            .or_else(|| self.archives.last())
            .ok_or_else(|| MigrateError::InvalidWhisper("no archives".into()))
    }
}

fn be_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn be_f64(buf: &[u8], at: usize) -> f64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    f64::from_be_bytes(bytes)
}

/// Reads every populated slot of `archive` inside `window`, ascending.
fn read_archive(buf: &[u8], archive: &ArchiveInfo, window: &TimeWindow) -> Vec<(i64, f64)> {
    let step = i64::from(archive.seconds_per_point);
    let mut points: Vec<(i64, f64)> = (0..archive.points as usize)
        .filter_map(|slot| {
            let at = archive.offset as usize + slot * POINT_SIZE;
            let ts = i64::from(be_u32(buf, at));
            if ts == 0 || ts % step != 0 || !window.contains_secs(ts) {
                return None;
            }
            Some((ts, be_f64(buf, at + 4)))
        })
        .collect();
    // Ring order wraps around; slot order is not time order.
    points.sort_by_key(|(ts, _)| *ts);
    points
}

/// [`LegacyReader`] over on-disk whisper files.
#[derive(Debug, Clone, Copy, Default)]
pub struct WhisperReader {
    now: Option<i64>,
}

impl WhisperReader {
    /// Creates a reader that selects archives relative to the wall clock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fixes the instant (unix seconds) archives are selected against.
    pub fn with_now(mut self, now: i64) -> Self {
        self.now = Some(now);
        self
    }

    fn now(&self) -> i64 {
        self.now.unwrap_or_else(|| Utc::now().timestamp())
    }

    fn load(&self, path: &Path) -> Result<(Vec<u8>, WhisperHeader)> {
        let buf = fs::read(path).map_err(|e| MigrateError::source_read(path, e))?;
        let header = WhisperHeader::parse(&buf).map_err(|e| MigrateError::source_read(path, e))?;
        Ok((buf, header))
    }

    /// Summarizes one file for the `info` command.
    pub fn info(&self, path: &Path) -> Result<WhisperInfo> {
        let (buf, header) = self.load(path)?;
        let now = self.now();
        let oldest_timestamp = now - i64::from(header.max_retention);
        let window = TimeWindow::from_unix(oldest_timestamp.max(0), now + 1)?;
        let archive = header
            .archive_for_age(now - window.from_secs())
            .map_err(|e| MigrateError::source_read(path, e))?;
        let point_count = read_archive(&buf, archive, &window).len();

        Ok(WhisperInfo {
            path: path.to_path_buf(),
            aggregation: header.aggregation,
            max_retention: header.max_retention,
            x_files_factor: header.x_files_factor,
            archives: header.archives,
            oldest_timestamp,
            point_count,
        })
    }
}

impl LegacyReader for WhisperReader {
    fn fetch_range(&self, path: &Path, window: &TimeWindow) -> Result<Vec<(i64, f64)>> {
        if window.is_empty() {
            return Ok(Vec::new());
        }
        let (buf, header) = self.load(path)?;
        let archive = header
            .archive_for_age(self.now() - window.from_secs())
            .map_err(|e| MigrateError::source_read(path, e))?;
        let points = read_archive(&buf, archive, window);
        debug!(
            path = %path.display(),
            step = archive.seconds_per_point,
            points = points.len(),
            "Fetched legacy points"
        );
        Ok(points)
    }
}

/// Per-file summary printed by the `info` command.
#[derive(Debug, Clone, PartialEq)]
pub struct WhisperInfo {
    /// File path.
    pub path: PathBuf,
    /// Aggregation method code.
    pub aggregation: u32,
    /// Maximum retention in seconds.
    pub max_retention: u32,
    /// Fraction of known points needed to aggregate.
    pub x_files_factor: f32,
    /// Archive descriptors.
    pub archives: Vec<ArchiveInfo>,
    /// Oldest timestamp the file can hold.
    pub oldest_timestamp: i64,
    /// Points present between the oldest timestamp and now.
    pub point_count: usize,
}

/// Legacy files found under an input directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovered {
    /// Files sorted by path.
    pub files: Vec<PathBuf>,
    /// Total size of the files in bytes.
    pub total_bytes: u64,
}

/// Recursively collects legacy series files under `dir`, sorted by path.
///
/// A missing directory yields no files. Entries that cannot be read, such
/// as symlink loops or directories without permission, are logged and
/// skipped.
pub fn discover_files(dir: &Path) -> Result<Discovered> {
    let mut discovered = Discovered::default();
    if !dir.exists() {
        warn!(dir = %dir.display(), "Input directory does not exist");
        return Ok(discovered);
    }

    for entry in WalkDir::new(dir).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let is_legacy = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.ends_with(LEGACY_EXTENSION));
        if !is_legacy {
            continue;
        }
        let size = match entry.metadata() {
            Ok(metadata) => metadata.len(),
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "Skipping unreadable file");
                continue;
            }
        };
        discovered.total_bytes += size;
        discovered.files.push(entry.into_path());
    }

    discovered.files.sort();
    debug!(
        dir = %dir.display(),
        files = discovered.files.len(),
        bytes = discovered.total_bytes,
        "Discovered legacy files"
    );
    Ok(discovered)
}
