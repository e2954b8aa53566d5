//! Maps legacy files to point batches bound for one destination key.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::identity::{IdentityResolver, PatternSource, SeriesIdentity};
use crate::shard::TimeWindow;
use crate::whisper::LegacyReader;

/// Points of one legacy file in one window, tagged with their destination.
///
/// Timestamps are unix seconds in the order the legacy reader returned them.
#[derive(Debug, Clone, PartialEq)]
pub struct PointBatch {
    /// Encoded series key.
    pub key: String,
    /// Destination identity.
    pub identity: Arc<SeriesIdentity>,
    /// `(timestamp, value)` pairs.
    pub points: Vec<(i64, f64)>,
}

impl PointBatch {
    /// Creates a batch for `identity`.
    pub fn new(identity: SeriesIdentity, points: Vec<(i64, f64)>) -> Self {
        Self {
            key: identity.key(),
            identity: Arc::new(identity),
            points,
        }
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Returns true if the batch holds no points.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Points fetched for one file, before identity resolution.
pub type Gathered = (PathBuf, Result<Vec<(i64, f64)>>);

/// Fetches `window` from every file. Per-file errors are returned in place
/// so the caller can apply its error policy.
pub fn gather(reader: &dyn LegacyReader, files: &[PathBuf], window: &TimeWindow) -> Vec<Gathered> {
    files
        .iter()
        .map(|path| (path.clone(), reader.fetch_range(path, window)))
        .collect()
}

/// Tags fetched points with the identity of `path`.
///
/// Returns `None` for an empty point list without resolving the identity.
pub fn map_points(
    path: &Path,
    points: Vec<(i64, f64)>,
    resolver: &mut IdentityResolver,
    source: &mut dyn PatternSource,
) -> Result<Option<PointBatch>> {
    if points.is_empty() {
        debug!(path = %path.display(), "No points in window");
        return Ok(None);
    }
    let identity = resolver.identity_for(path, source)?;
    Ok(Some(PointBatch::new(identity, points)))
}

/// Fetches `window` from `path` and maps the points to a batch.
pub fn map_file(
    path: &Path,
    window: &TimeWindow,
    reader: &dyn LegacyReader,
    resolver: &mut IdentityResolver,
    source: &mut dyn PatternSource,
) -> Result<Option<PointBatch>> {
    let points = reader.fetch_range(path, window)?;
    map_points(path, points, resolver, source)
}
