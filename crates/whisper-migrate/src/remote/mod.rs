//! Remote engine access through the 1.x HTTP API.
//!
//! [`RemoteEngine`] is the seam used by the remote-write strategy and the
//! shard catalog bootstrap; [`HttpEngine`] is the HTTP implementation.

pub mod client;
pub mod line_protocol;

pub use client::HttpEngine;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use std::string::FromUtf8Error;
use std::sync::Arc;

use crate::identity::SeriesIdentity;

/// Error type for remote engine requests.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// The configured base URL could not be parsed.
    #[error("base URL error: {0}")]
    BaseUrl(#[source] reqwest::Error),

    /// A request URL could not be built from the base URL.
    #[error("request URL error: {0}")]
    RequestUrl(#[from] url::ParseError),

    /// The request could not be sent.
    #[error("failed to send {method} {url} request: {source}")]
    RequestSend {
        /// HTTP method.
        method: Method,
        /// Request path.
        url: String,
        /// Transport error.
        #[source]
        source: reqwest::Error,
    },

    /// The response body could not be read.
    #[error("failed to read the API response bytes: {0}")]
    Bytes(#[source] reqwest::Error),

    /// The response body was not valid UTF-8.
    #[error("invalid UTF8 in response: {0}")]
    InvalidUtf8(#[from] FromUtf8Error),

    /// The response body was not the expected JSON.
    #[error("failed to parse JSON response: {0}")]
    Json(#[from] serde_json::Error),

    /// The server answered with a non-success status.
    #[error("server responded with error [{status}]: {message}")]
    Api {
        /// Response status.
        status: StatusCode,
        /// Response body.
        message: String,
    },

    /// The server accepted the query but reported a statement error.
    #[error("query error: {0}")]
    Query(String),

    /// A series cannot be expressed as a line protocol row.
    #[error("series {key:?} cannot be written: {reason}")]
    InvalidSeries {
        /// Encoded series key.
        key: String,
        /// Which part is missing.
        reason: &'static str,
    },
}

impl RemoteError {
    pub(crate) fn request_send(method: Method, url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::RequestSend {
            method,
            url: url.into(),
            source,
        }
    }
}

/// One point bound for the remote write endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Destination identity shared by all rows of one legacy file.
    pub identity: Arc<SeriesIdentity>,
    /// Unix seconds.
    pub timestamp: i64,
    /// Point value.
    pub value: f64,
}

/// A finalized batch of rows handed to [`RemoteEngine::write`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    rows: Vec<Row>,
}

impl WriteBatch {
    /// Creates an empty batch with room for `capacity` rows.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            rows: Vec::with_capacity(capacity),
        }
    }

    /// Appends a row.
    pub fn push(&mut self, row: Row) {
        self.rows.push(row);
    }

    /// Returns the number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if the batch holds no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns the rows in insertion order.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Renders the batch as a line protocol body.
    pub fn to_line_protocol(&self) -> String {
        line_protocol::render(&self.rows)
    }
}

impl From<Vec<Row>> for WriteBatch {
    fn from(rows: Vec<Row>) -> Self {
        Self { rows }
    }
}

/// JSON body returned by `/query`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct QueryResponse {
    /// One result per statement.
    #[serde(default)]
    pub results: Vec<StatementResult>,
}

/// Result of one statement.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct StatementResult {
    /// Statement index within the request.
    #[serde(default)]
    pub statement_id: u32,
    /// Result series.
    #[serde(default)]
    pub series: Vec<ResultSeries>,
    /// Statement error, if any.
    #[serde(default)]
    pub error: Option<String>,
}

/// One series of a statement result.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ResultSeries {
    /// Series name.
    #[serde(default)]
    pub name: String,
    /// Column names.
    #[serde(default)]
    pub columns: Vec<String>,
    /// Rows, positionally matching `columns`.
    #[serde(default)]
    pub values: Vec<Vec<serde_json::Value>>,
}

impl ResultSeries {
    /// Returns the position of a column by name.
    pub fn column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

impl QueryResponse {
    /// Returns the first statement error reported by the server.
    pub fn first_error(&self) -> Option<&str> {
        self.results.iter().find_map(|r| r.error.as_deref())
    }

    /// Iterates over every series of every statement.
    pub fn series(&self) -> impl Iterator<Item = &ResultSeries> {
        self.results.iter().flat_map(|r| r.series.iter())
    }
}

/// Operations the migration needs from the destination engine.
#[async_trait]
pub trait RemoteEngine: Send + Sync {
    /// Creates a database; succeeds if it already exists.
    async fn create_database(&self, name: &str) -> Result<(), RemoteError>;

    /// Runs a query statement, optionally scoped to a database.
    async fn query(&self, database: Option<&str>, statement: &str) -> Result<QueryResponse, RemoteError>;

    /// Writes a batch with second precision.
    async fn write(
        &self,
        database: &str,
        retention_policy: Option<&str>,
        batch: &WriteBatch,
    ) -> Result<(), RemoteError>;
}

#[async_trait]
impl<E: RemoteEngine + ?Sized> RemoteEngine for Arc<E> {
    async fn create_database(&self, name: &str) -> Result<(), RemoteError> {
        (**self).create_database(name).await
    }

    async fn query(&self, database: Option<&str>, statement: &str) -> Result<QueryResponse, RemoteError> {
        (**self).query(database, statement).await
    }

    async fn write(
        &self,
        database: &str,
        retention_policy: Option<&str>,
        batch: &WriteBatch,
    ) -> Result<(), RemoteError> {
        (**self).write(database, retention_policy, batch).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_response_parse() {
        let body = r#"{"results":[{"statement_id":0,"series":[{"name":"migrated","columns":["id","database","start_time"],"values":[[3,"migrated","2020-01-01T00:00:00Z"]]}]}]}"#;
        let response: QueryResponse = serde_json::from_str(body).unwrap();
        let series: Vec<_> = response.series().collect();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].column("database"), Some(1));
        assert_eq!(series[0].values[0][0], serde_json::json!(3));
        assert!(response.first_error().is_none());
    }

    #[test]
    fn test_query_response_statement_error() {
        let body = r#"{"results":[{"statement_id":0,"error":"database not found: x"}]}"#;
        let response: QueryResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.first_error(), Some("database not found: x"));
        assert_eq!(response.series().count(), 0);
    }

    #[test]
    fn test_write_batch_line_protocol() {
        let identity = Arc::new(SeriesIdentity::new("load", vec![], "value"));
        let mut batch = WriteBatch::with_capacity(2);
        batch.push(Row {
            identity: Arc::clone(&identity),
            timestamp: 100,
            value: 1.0,
        });
        batch.push(Row {
            identity,
            timestamp: 200,
            value: 2.5,
        });
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.to_line_protocol(), "load value=1 100\nload value=2.5 200\n");
    }
}
