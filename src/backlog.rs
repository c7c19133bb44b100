//! One-shot queries for historical log lines.
//!
//! The log stream seeds itself from a backlog when a generation first
//! connects, then tails live lines. Where the backlog comes from is a
//! [`BacklogSource`].

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use streamwatch_types::LogRecord;
use tracing::debug;
use url::Url;

use crate::channel::StreamKind;
use crate::error::{Error, Result};

/// Default bound on one backlog query.
pub const DEFAULT_BACKLOG_TIMEOUT: Duration = Duration::from_secs(5);

/// Fetches the lines a stream already produced before it was subscribed.
#[async_trait]
pub trait BacklogSource: Send + Sync + fmt::Debug {
    async fn fetch_backlog(&self, kind: StreamKind) -> Result<Vec<LogRecord>>;
}

/// A source with no history.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBacklog;

#[async_trait]
impl BacklogSource for NoBacklog {
    async fn fetch_backlog(&self, _kind: StreamKind) -> Result<Vec<LogRecord>> {
        Ok(Vec::new())
    }
}

/// A fixed backlog, returned on every fetch.
#[derive(Debug, Clone, Default)]
pub struct StaticBacklog(pub Vec<LogRecord>);

#[async_trait]
impl BacklogSource for StaticBacklog {
    async fn fetch_backlog(&self, _kind: StreamKind) -> Result<Vec<LogRecord>> {
        Ok(self.0.clone())
    }
}

/// Stands in for a backend whose backlog query never completes.
#[cfg(test)]
#[derive(Debug)]
pub(crate) struct StuckBacklog;

#[cfg(test)]
#[async_trait]
impl BacklogSource for StuckBacklog {
    async fn fetch_backlog(&self, _kind: StreamKind) -> Result<Vec<LogRecord>> {
        std::future::pending().await
    }
}

/// A source whose every query fails.
#[cfg(test)]
#[derive(Debug)]
pub(crate) struct FailingBacklog;

#[cfg(test)]
#[async_trait]
impl BacklogSource for FailingBacklog {
    async fn fetch_backlog(&self, _kind: StreamKind) -> Result<Vec<LogRecord>> {
        Err(Error::Backlog("history unavailable".to_string()))
    }
}

/// Queries the backlog over HTTP.
///
/// Expects a JSON array of log records in response to a `GET`. Each query,
/// connect included, is bounded by the timeout given to [`new`](Self::new).
#[derive(Debug, Clone)]
pub struct HttpBacklog {
    client: reqwest::Client,
    url: Url,
    secret: Option<String>,
}

impl HttpBacklog {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|e| Error::Config(format!("invalid backlog url '{}': {}", url, e)))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("backlog client: {}", e)))?;
        Ok(Self {
            client,
            url,
            secret: None,
        })
    }

    pub fn with_secret(mut self, secret: Option<String>) -> Self {
        self.secret = secret.filter(|s| !s.is_empty());
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl BacklogSource for HttpBacklog {
    async fn fetch_backlog(&self, kind: StreamKind) -> Result<Vec<LogRecord>> {
        debug!(stream = %kind, url = %self.url, "Fetching backlog");

        let mut request = self.client.get(self.url.clone());
        if let Some(secret) = &self.secret {
            request = request.bearer_auth(secret);
        }

        let records = request
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<LogRecord>>()
            .await?;

        debug!(stream = %kind, lines = records.len(), "Backlog fetched");
        Ok(records)
    }
}
