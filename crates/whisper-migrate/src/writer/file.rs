//! File-write strategy: one block file per shard.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::counters::MigrationCounters;
use crate::error::Result;
use crate::mapper::PointBatch;
use crate::shard::{ShardId, ShardLayout};
use crate::tsm::{seconds_to_nanos, Timestamp};
use crate::writer::{BlockWriter, BlockWriterFactory, TsmWriterFactory};

/// Outcome of writing one shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardWriteReport {
    /// Shard written.
    pub shard_id: ShardId,
    /// File written, or `None` when every batch was empty.
    pub path: Option<PathBuf>,
    /// Blocks written (one per non-empty batch).
    pub blocks: usize,
    /// Points written.
    pub points: u64,
    /// Size of the closed file.
    pub bytes: u64,
}

/// Writes each shard's batches into `{data_dir}/{db}/{rp}/{shard_id}/{file}`.
pub struct FileWriteStrategy<F = TsmWriterFactory> {
    layout: ShardLayout,
    factory: F,
}

impl FileWriteStrategy<TsmWriterFactory> {
    /// Creates a strategy writing real block files.
    pub fn new(layout: ShardLayout) -> Self {
        Self::with_factory(layout, TsmWriterFactory)
    }
}

impl<F: BlockWriterFactory> FileWriteStrategy<F> {
    /// Creates a strategy with a custom writer factory.
    pub fn with_factory(layout: ShardLayout, factory: F) -> Self {
        Self { layout, factory }
    }

    /// Returns the destination layout.
    pub fn layout(&self) -> &ShardLayout {
        &self.layout
    }

    /// Writes `batches` into the shard's file.
    ///
    /// The file is created on the first non-empty batch; a shard whose
    /// batches are all empty gets no file and no index. Counters are
    /// updated only after the file is closed. A failed write removes the
    /// partial file.
    pub fn write_shard(
        &self,
        shard_id: ShardId,
        batches: &[PointBatch],
        counters: &mut MigrationCounters,
    ) -> Result<ShardWriteReport> {
        let path = self.layout.shard_file_path(shard_id);
        let mut report = ShardWriteReport {
            shard_id,
            path: None,
            blocks: 0,
            points: 0,
            bytes: 0,
        };

        let mut writer: Option<Box<dyn BlockWriter>> = None;
        let written = self.write_batches(&path, batches, &mut writer, &mut report);
        let closed = written.and_then(|()| match writer.take() {
            Some(mut w) => {
                w.write_index()?;
                w.close()
            }
            None => Ok(0),
        });

        let bytes = match closed {
            Ok(bytes) => bytes,
            Err(e) => {
                drop(writer);
                if report.path.is_some() {
                    if let Err(remove) = fs::remove_file(&path) {
                        warn!(path = %path.display(), error = %remove, "Failed to remove partial shard file");
                    }
                }
                return Err(e);
            }
        };

        if report.path.is_none() {
            info!(shard_id, "No points for shard, skipping file");
            return Ok(report);
        }

        report.bytes = bytes;
        counters.add_destination_file(bytes);
        counters.add_points(report.points);
        info!(
            shard_id,
            path = %path.display(),
            blocks = report.blocks,
            points = report.points,
            bytes,
            "Wrote shard file"
        );
        Ok(report)
    }

    fn write_batches(
        &self,
        path: &Path,
        batches: &[PointBatch],
        writer: &mut Option<Box<dyn BlockWriter>>,
        report: &mut ShardWriteReport,
    ) -> Result<()> {
        for batch in batches.iter().filter(|b| !b.is_empty()) {
            let values = batch
                .points
                .iter()
                .map(|&(ts, value)| Ok((seconds_to_nanos(ts)?, value)))
                .collect::<Result<Vec<(Timestamp, f64)>>>()?;

            if writer.is_none() {
                debug!(path = %path.display(), "Creating shard file");
                report.path = Some(path.to_path_buf());
                *writer = Some(self.factory.create(path)?);
            }
            if let Some(w) = writer.as_mut() {
                w.write(&batch.key, &values)?;
            }
            report.blocks += 1;
            report.points += values.len() as u64;
        }
        Ok(())
    }
}
