//! Run orchestration: discovery, preview and the two write phases.
//!
//! All mutable run state lives in [`MigrationContext`], owned by the
//! control task. Background work (point gathering, remote flushes) only
//! sees data moved into it.

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::counters::{MigrationCounters, Summary};
use crate::error::{MigrateError, Result};
use crate::identity::{IdentityResolver, PatternSource, TagPattern};
use crate::mapper::{self, PointBatch};
use crate::remote::{line_protocol, RemoteEngine};
use crate::shard::{clip, ShardCatalog, TimeWindow};
use crate::whisper::{discover_files, LegacyReader};
use crate::writer::{BlockWriterFactory, ErrorPolicy, FailureLog, FileWriteStrategy, RemoteWriteStrategy};

/// Mutable state of one run.
#[derive(Debug)]
pub struct MigrationContext {
    /// Patterns and per-path identity cache.
    pub resolver: IdentityResolver,
    /// Byte and point totals.
    pub counters: MigrationCounters,
    /// Skipped units.
    pub failures: FailureLog,
    /// Failure handling.
    pub policy: ErrorPolicy,
    migrated: HashSet<PathBuf>,
}

impl MigrationContext {
    /// Creates a context over the configured patterns.
    pub fn new(patterns: Vec<TagPattern>, policy: ErrorPolicy) -> Self {
        Self {
            resolver: IdentityResolver::new(patterns),
            counters: MigrationCounters::default(),
            failures: FailureLog::default(),
            policy,
            migrated: HashSet::new(),
        }
    }

    /// Returns the pattern list, including patterns added during the run.
    pub fn patterns(&self) -> &[TagPattern] {
        self.resolver.patterns()
    }

    fn record(&mut self, unit: impl Into<String>, error: MigrateError) -> Result<()> {
        self.failures.record(self.policy, unit, error)
    }

    fn mark_migrated(&mut self, path: &Path) {
        if self.migrated.insert(path.to_path_buf()) {
            self.counters.files_migrated = self.migrated.len();
        }
    }

    /// Builds the end-of-run summary.
    pub fn summary(&self, elapsed: Duration, file_mode: bool) -> Summary {
        Summary {
            counters: self.counters.clone(),
            elapsed,
            file_mode,
            failures: self.failures.describe(),
        }
    }
}

/// One resolved file shown before the write phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewRow {
    /// Legacy file.
    pub path: PathBuf,
    /// Destination series key.
    pub key: String,
}

/// Lists legacy files under `dir` and counts their bytes.
pub fn discover(ctx: &mut MigrationContext, dir: &Path) -> Result<Vec<PathBuf>> {
    let discovered = discover_files(dir)?;
    ctx.counters.add_scanned(discovered.files.len(), discovered.total_bytes);
    if discovered.files.is_empty() {
        warn!(dir = %dir.display(), "No legacy files found");
    }
    Ok(discovered.files)
}

/// Resolves every file, prompting through `source` when unmatched, and
/// prints one `file -> key` line each.
///
/// The caller persists [`MigrationContext::patterns`] afterwards.
pub fn preview<W: Write>(
    ctx: &mut MigrationContext,
    files: &[PathBuf],
    source: &mut dyn PatternSource,
    out: &mut W,
) -> Result<Vec<PreviewRow>> {
    let mut rows = Vec::with_capacity(files.len());
    for path in files {
        let identity = ctx.resolver.identity_for(path, source)?;
        let key = identity.key();
        writeln!(out, "{} -> {}", path.display(), key)?;
        rows.push(PreviewRow {
            path: path.clone(),
            key,
        });
    }
    if ctx.resolver.added_patterns() > 0 {
        info!(added = ctx.resolver.added_patterns(), "New patterns entered during preview");
    }
    Ok(rows)
}

/// Writes one block file per destination shard.
///
/// Shards come from `catalog`; each is clipped to `window` and skipped when
/// the overlap is empty. Points for a shard are gathered on a blocking task
/// and mapped on the calling task before the shard file is written.
#[allow(clippy::too_many_arguments)]
pub async fn run_file_mode<F: BlockWriterFactory>(
    ctx: &mut MigrationContext,
    files: &[PathBuf],
    window: &TimeWindow,
    database: &str,
    catalog: &dyn ShardCatalog,
    reader: Arc<dyn LegacyReader>,
    strategy: &FileWriteStrategy<F>,
    source: &mut dyn PatternSource,
) -> Result<()> {
    let shards = catalog.resolve_shards(database, window).await?;
    if shards.is_empty() {
        warn!(database, window = %window, "No destination shards overlap the window");
    }
    let files: Arc<[PathBuf]> = files.into();

    for shard in shards {
        let Some(clipped) = clip(&shard.window, window) else {
            info!(shard_id = shard.id, shard_window = %shard.window, "Shard outside window, skipping");
            continue;
        };
        info!(shard_id = shard.id, window = %clipped, "Migrating shard");

        let task_reader = Arc::clone(&reader);
        let task_files = Arc::clone(&files);
        let gathered = tokio::task::spawn_blocking(move || {
            mapper::gather(task_reader.as_ref(), &task_files, &clipped)
        })
        .await
        .map_err(|e| MigrateError::GatherTask(e.to_string()))?;

        let mut batches: Vec<PointBatch> = Vec::new();
        for (path, fetched) in gathered {
            let mapped = fetched.and_then(|points| mapper::map_points(&path, points, &mut ctx.resolver, source));
            match mapped {
                Ok(Some(batch)) => {
                    ctx.mark_migrated(&path);
                    batches.push(batch);
                }
                Ok(None) => {}
                Err(e) => ctx.record(path.display().to_string(), e)?,
            }
        }

        if let Err(e) = strategy.write_shard(shard.id, &batches, &mut ctx.counters) {
            ctx.record(format!("shard {}", shard.id), e)?;
        }
    }
    Ok(())
}

/// Streams every file's points to the remote engine.
///
/// Batches span files; the run completes only after every flush is joined,
/// including when it stops early. A file whose identity cannot be written
/// as line protocol is a per-file failure and none of its rows are sent.
#[allow(clippy::too_many_arguments)]
pub async fn run_remote_mode(
    ctx: &mut MigrationContext,
    files: &[PathBuf],
    window: &TimeWindow,
    reader: &dyn LegacyReader,
    engine: Arc<dyn RemoteEngine>,
    mut strategy: RemoteWriteStrategy,
    database: &str,
    source: &mut dyn PatternSource,
) -> Result<()> {
    engine.create_database(database).await?;

    for path in files {
        let step = match mapper::map_file(path, window, reader, &mut ctx.resolver, source) {
            Ok(Some(batch)) => match line_protocol::check_identity(&batch.identity) {
                Ok(()) => {
                    info!(path = %path.display(), points = batch.len(), "Streaming legacy file");
                    ctx.mark_migrated(path);
                    strategy.push(&batch).await
                }
                Err(e) => ctx.record(path.display().to_string(), e.into()),
            },
            Ok(None) => Ok(()),
            Err(e) => ctx.record(path.display().to_string(), e),
        };
        if let Err(e) = step {
            strategy.drain().await;
            return Err(e);
        }
    }

    let report = strategy.finish().await?;
    ctx.counters.add_points(report.points_written);
    ctx.failures.extend(report.failures);
    Ok(())
}
