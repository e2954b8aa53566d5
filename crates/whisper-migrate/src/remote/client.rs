//! HTTP implementation of [`RemoteEngine`].

use async_trait::async_trait;
use reqwest::{IntoUrl, Method, RequestBuilder, StatusCode};
use tracing::debug;
use url::Url;

use crate::remote::{QueryResponse, RemoteEngine, RemoteError, WriteBatch};

/// Timestamp precision of every write issued by the migration.
pub const WRITE_PRECISION: &str = "s";

/// Quotes an identifier for use in a query statement.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Client for the 1.x `/query` and `/write` endpoints.
#[derive(Debug, Clone)]
pub struct HttpEngine {
    base_url: Url,
    credentials: Option<(String, String)>,
    http_client: reqwest::Client,
}

impl HttpEngine {
    /// Creates a client for the server at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::BaseUrl`] if `base_url` is not a valid URL.
    pub fn new<U: IntoUrl>(base_url: U) -> Result<Self, RemoteError> {
        Ok(Self {
            base_url: base_url.into_url().map_err(RemoteError::BaseUrl)?,
            credentials: None,
            http_client: reqwest::Client::new(),
        })
    }

    /// Sends basic auth credentials with each request.
    pub fn with_basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    fn request(&self, path: &str) -> Result<RequestBuilder, RemoteError> {
        let url = self.base_url.join(path)?;
        let mut req = self.http_client.post(url);
        if let Some((username, password)) = &self.credentials {
            req = req.basic_auth(username, Some(password));
        }
        Ok(req)
    }

    async fn send(&self, path: &'static str, req: RequestBuilder) -> Result<(StatusCode, String), RemoteError> {
        let resp = req
            .send()
            .await
            .map_err(|src| RemoteError::request_send(Method::POST, path, src))?;
        let status = resp.status();
        let content = resp.bytes().await.map_err(RemoteError::Bytes)?;
        let body = String::from_utf8(content.to_vec())?;
        if !status.is_success() {
            return Err(RemoteError::Api {
                status,
                message: body,
            });
        }
        Ok((status, body))
    }
}

#[async_trait]
impl RemoteEngine for HttpEngine {
    async fn create_database(&self, name: &str) -> Result<(), RemoteError> {
        let statement = format!("CREATE DATABASE {}", quote_ident(name));
        self.query(None, &statement).await?;
        Ok(())
    }

    async fn query(&self, database: Option<&str>, statement: &str) -> Result<QueryResponse, RemoteError> {
        let mut params = vec![("q", statement)];
        if let Some(db) = database {
            params.push(("db", db));
        }
        let req = self.request("/query")?.query(&params);
        let (_, body) = self.send("/query", req).await?;
        let response: QueryResponse = serde_json::from_str(&body)?;
        if let Some(message) = response.first_error() {
            return Err(RemoteError::Query(message.to_string()));
        }
        Ok(response)
    }

    async fn write(
        &self,
        database: &str,
        retention_policy: Option<&str>,
        batch: &WriteBatch,
    ) -> Result<(), RemoteError> {
        let body = batch.to_line_protocol();
        if body.is_empty() {
            return Ok(());
        }
        let mut params = vec![("db", database), ("precision", WRITE_PRECISION)];
        if let Some(rp) = retention_policy {
            params.push(("rp", rp));
        }
        let req = self.request("/write")?.query(&params).body(body);
        self.send("/write", req).await?;
        debug!(database, rows = batch.len(), "Wrote batch");
        Ok(())
    }
}
