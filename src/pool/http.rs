//! HTTP connection handles for the pool
//!
//! Each handle owns a dedicated `reqwest::Client` capped at one idle
//! connection per host, so one pooled handle maps to one reusable wire
//! connection to the endpoint.

use super::Connector;
use crate::error::{TetherError, TetherResult};
use async_trait::async_trait;
use reqwest::{Client, Url};
use std::time::Duration;

/// One reusable HTTP connection to a service endpoint.
pub struct HttpConnection {
    client: Client,
    base_url: Url,
}

impl HttpConnection {
    /// The underlying HTTP client
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Build a full request URL for a path like `tool/summarize` or
    /// `resource/events`
    pub fn url_for(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// Opens [`HttpConnection`]s to one endpoint.
pub struct HttpConnector {
    base_url: Url,
    connect_timeout: Duration,
}

impl HttpConnector {
    /// Create a connector for an endpoint
    pub fn new(base_url: Url, connect_timeout: Duration) -> Self {
        Self {
            base_url,
            connect_timeout,
        }
    }
}

#[async_trait]
impl Connector for HttpConnector {
    type Conn = HttpConnection;

    async fn connect(&self) -> TetherResult<HttpConnection> {
        let client = Client::builder()
            .pool_max_idle_per_host(1)
            .connect_timeout(self.connect_timeout)
            .build()
            .map_err(|e| {
                TetherError::config(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(HttpConnection {
            client,
            base_url: self.base_url.clone(),
        })
    }
}
