//! Byte and point accounting for the end-of-run summary.

use std::fmt;
use std::time::Duration;

const KB: u64 = 1024;
const MB: u64 = 1024 * KB;
const GB: u64 = 1024 * MB;

/// Running totals of one migration run.
///
/// Only the control task mutates the counters; flush tasks report their
/// results back through join handles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationCounters {
    /// Legacy files found under the input directory.
    pub files_scanned: usize,
    /// Legacy files that produced at least one point.
    pub files_migrated: usize,
    /// Size of the scanned legacy files.
    pub legacy_bytes: u64,
    /// Size of the closed destination files.
    pub destination_bytes: u64,
    /// Points handed to a destination successfully.
    pub points_written: u64,
    /// Destination files written.
    pub shard_files: usize,
}

impl MigrationCounters {
    /// Records the legacy files found by discovery.
    pub fn add_scanned(&mut self, files: usize, bytes: u64) {
        self.files_scanned += files;
        self.legacy_bytes += bytes;
    }

    /// Records one closed destination file.
    pub fn add_destination_file(&mut self, bytes: u64) {
        self.shard_files += 1;
        self.destination_bytes += bytes;
    }

    /// Records points accepted by a destination.
    pub fn add_points(&mut self, points: u64) {
        self.points_written += points;
    }

    /// Percentage by which destination files are smaller than the legacy
    /// files, or `None` when nothing was scanned.
    pub fn size_reduction(&self) -> Option<f64> {
        if self.legacy_bytes == 0 {
            return None;
        }
        let legacy = self.legacy_bytes as f64;
        Some((legacy - self.destination_bytes as f64) / legacy * 100.0)
    }
}

/// Formats a byte count as B, KB, MB or GB with two decimals.
pub fn format_size(bytes: u64) -> String {
    match bytes {
        b if b < KB => format!("{:.2} B", b as f64),
        b if b < MB => format!("{:.2} KB", b as f64 / KB as f64),
        b if b < GB => format!("{:.2} MB", b as f64 / MB as f64),
        b => format!("{:.2} GB", b as f64 / GB as f64),
    }
}

/// Final report of a run.
#[derive(Debug, Clone)]
pub struct Summary {
    /// Counters at the end of the run.
    pub counters: MigrationCounters,
    /// Wall time of the write phase.
    pub elapsed: Duration,
    /// Whether destination files were written (file mode).
    pub file_mode: bool,
    /// Units that failed and were skipped.
    pub failures: Vec<String>,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.counters;
        writeln!(f, "|------------------------------------|")?;
        writeln!(f, "|--------- Migration Summary --------|")?;
        writeln!(f, "|------------------------------------|")?;
        writeln!(f, "| Legacy files scanned    {}", c.files_scanned)?;
        writeln!(f, "| Legacy files migrated   {}", c.files_migrated)?;
        writeln!(f, "| Time taken              {:.2?}", self.elapsed)?;
        writeln!(f, "| Total legacy file size  {}", format_size(c.legacy_bytes))?;
        if self.file_mode {
            writeln!(f, "| Shard files written     {}", c.shard_files)?;
            writeln!(f, "| Total TSM file size     {}", format_size(c.destination_bytes))?;
            if let Some(reduction) = c.size_reduction() {
                writeln!(f, "| Size reduction          {:.2}%", reduction)?;
            }
        }
        writeln!(f, "| Points written          {}", c.points_written)?;
        writeln!(f, "| Failures                {}", self.failures.len())?;
        for failure in &self.failures {
            writeln!(f, "|   {}", failure)?;
        }
        write!(f, "|------------------------------------|")
    }
}
