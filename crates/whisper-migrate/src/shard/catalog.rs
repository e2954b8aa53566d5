//! Discovery of destination shards covering a time window.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{MigrateError, Result};
use crate::identity::SeriesIdentity;
use crate::remote::client::quote_ident;
use crate::remote::{QueryResponse, RemoteEngine, Row, WriteBatch};
use crate::shard::{Shard, ShardId, TimeWindow};

/// Measurement written to force shard creation, dropped afterwards.
pub const MARKER_MEASUREMENT: &str = "whisper_migrate_shard_marker";

/// Statement listing shard groups.
pub const SHOW_SHARD_GROUPS: &str = "SHOW SHARD GROUPS";

/// Resolves the destination shards overlapping a window.
#[async_trait]
pub trait ShardCatalog: Send + Sync {
    /// Returns the shards of `database` overlapping `window`, ordered by start.
    async fn resolve_shards(&self, database: &str, window: &TimeWindow) -> Result<Vec<Shard>>;
}

/// Catalog returning a fixed shard list.
#[derive(Debug, Clone, Default)]
pub struct StaticShardCatalog {
    shards: Vec<Shard>,
}

impl StaticShardCatalog {
    /// Creates a catalog over `shards`.
    pub fn new(mut shards: Vec<Shard>) -> Self {
        shards.sort_by_key(|s| s.window.from());
        Self { shards }
    }
}

#[async_trait]
impl ShardCatalog for StaticShardCatalog {
    async fn resolve_shards(&self, _database: &str, _window: &TimeWindow) -> Result<Vec<Shard>> {
        Ok(self.shards.clone())
    }
}

/// Catalog that makes the engine create its shards before listing them.
///
/// The engine only creates shard groups when data arrives, so one marker
/// point per day is written across the window, shard groups are listed, and
/// the marker measurement is dropped again.
#[derive(Debug, Clone)]
pub struct BootstrapShardCatalog<E> {
    engine: E,
    retention_policy: Option<String>,
}

impl<E: RemoteEngine> BootstrapShardCatalog<E> {
    /// Creates a catalog over `engine`.
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            retention_policy: None,
        }
    }

    /// Restricts the marker write and the listing to one retention policy.
    pub fn with_retention_policy(mut self, retention_policy: impl Into<String>) -> Self {
        self.retention_policy = Some(retention_policy.into());
        self
    }

    async fn write_markers(&self, database: &str, window: &TimeWindow) -> Result<()> {
        let marker = Arc::new(SeriesIdentity::new(MARKER_MEASUREMENT, vec![], "value"));
        let mut batch = WriteBatch::default();
        let mut ts = window.from();
        while ts < window.until() {
            batch.push(Row {
                identity: Arc::clone(&marker),
                timestamp: ts.timestamp(),
                value: 0.0,
            });
            ts += Duration::days(1);
        }
        debug!(database, points = batch.len(), "Writing shard marker points");
        self.engine
            .write(database, self.retention_policy.as_deref(), &batch)
            .await?;
        Ok(())
    }

    async fn drop_markers(&self, database: &str) -> Result<()> {
        let statement = format!("DROP MEASUREMENT {}", quote_ident(MARKER_MEASUREMENT));
        self.engine.query(Some(database), &statement).await?;
        Ok(())
    }
}

#[async_trait]
impl<E: RemoteEngine> ShardCatalog for BootstrapShardCatalog<E> {
    async fn resolve_shards(&self, database: &str, window: &TimeWindow) -> Result<Vec<Shard>> {
        self.engine.create_database(database).await?;
        if window.is_empty() {
            return Ok(Vec::new());
        }
        self.write_markers(database, window).await?;

        let listed = self.engine.query(Some(database), SHOW_SHARD_GROUPS).await;
        if let Err(e) = self.drop_markers(database).await {
            warn!(database, error = %e, "Failed to drop shard marker measurement");
        }
        let shards = parse_shard_groups(&listed?, database, self.retention_policy.as_deref())?;

        info!(database, shards = shards.len(), "Resolved destination shards");
        Ok(shards)
    }
}

/// Extracts the shards of `database` from a `SHOW SHARD GROUPS` response.
///
/// Columns are located by name. When `retention_policy` is set and the
/// response carries a `retention_policy` column, other policies are skipped.
pub fn parse_shard_groups(
    response: &QueryResponse,
    database: &str,
    retention_policy: Option<&str>,
) -> Result<Vec<Shard>> {
    let mut shards = Vec::new();

    for series in response.series() {
        let column = |name: &str| {
            series.column(name).ok_or_else(|| {
                MigrateError::ShardCatalog(format!("shard groups response has no '{}' column", name))
            })
        };
        let id_col = column("id")?;
        let db_col = column("database")?;
        let start_col = column("start_time")?;
        let end_col = column("end_time")?;
        let rp_col = series.column("retention_policy");

        for row in &series.values {
            if row.get(db_col).and_then(|v| v.as_str()) != Some(database) {
                continue;
            }
            if let (Some(rp), Some(rp_col)) = (retention_policy, rp_col) {
                if row.get(rp_col).and_then(|v| v.as_str()) != Some(rp) {
                    continue;
                }
            }

            let id = parse_id(row.get(id_col))?;
            let from = parse_time(row.get(start_col))?;
            let until = parse_time(row.get(end_col))?;
            shards.push(Shard::new(id, TimeWindow::new(from, until)?));
        }
    }

    shards.sort_by_key(|s| s.window.from());
    Ok(shards)
}

fn parse_id(value: Option<&serde_json::Value>) -> Result<ShardId> {
    let parsed = match value {
        Some(serde_json::Value::Number(n)) => n.as_u64(),
        Some(serde_json::Value::String(s)) => s.parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| MigrateError::ShardCatalog(format!("invalid shard id: {:?}", value)))
}

fn parse_time(value: Option<&serde_json::Value>) -> Result<DateTime<Utc>> {
    value
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
        .ok_or_else(|| MigrateError::ShardCatalog(format!("invalid shard bound: {:?}", value)))
}
