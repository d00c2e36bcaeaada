//! Purge sender implementations.

use crate::config::PurgeConfig;
use async_trait::async_trait;
use regen_core::PurgeSender;
use reqwest::Method;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

#[derive(Debug, Error)]
pub enum PurgeError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Invalid purge URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Edge returned {status}")]
    Rejected { status: u16 },
}

/// Sends `PURGE` requests for `<base_url><path>` to the fronting edge.
pub struct HttpPurger {
    base_url: String,
    headers: Vec<(String, String)>,
    method: Method,
    client: reqwest::Client,
}

impl HttpPurger {
    pub fn new(config: &PurgeConfig) -> Result<Self, PurgeError> {
        // Reject unusable base URLs up front rather than on every purge.
        Url::parse(&config.base_url)?;

        let method = Method::from_bytes(b"PURGE").unwrap_or(Method::DELETE);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .unwrap_or_default();

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            headers: config
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            method,
            client,
        })
    }

    /// Absolute URL the edge caches `path` under.
    pub fn target_url(&self, path: &str) -> Result<Url, PurgeError> {
        let url = if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        };
        Ok(Url::parse(&url)?)
    }

    async fn send(&self, path: &str) -> Result<(), PurgeError> {
        let url = self.target_url(path)?;
        debug!(%url, "Sending purge request");

        let mut request = self.client.request(self.method.clone(), url.clone());
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(PurgeError::Rejected {
                status: response.status().as_u16(),
            });
        }

        info!(%url, "Purge accepted");
        Ok(())
    }
}

#[async_trait]
impl PurgeSender for HttpPurger {
    async fn purge(&self, path: &str) -> regen_core::Result<()> {
        self.send(path)
            .await
            .map_err(|e| regen_core::Error::purge(path, e.to_string()))
    }
}

/// Accepts every purge without sending anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPurger;

#[async_trait]
impl PurgeSender for NoopPurger {
    async fn purge(&self, path: &str) -> regen_core::Result<()> {
        debug!(path, "Purge disabled, skipping");
        Ok(())
    }
}

/// Create a purger for a configuration.
pub fn create_purger(config: &PurgeConfig) -> Result<Arc<dyn PurgeSender>, PurgeError> {
    if !config.enabled {
        return Ok(Arc::new(NoopPurger));
    }
    Ok(Arc::new(HttpPurger::new(config)?))
}
