//! Periodic health probing

use reqwest::{Client, Url};
use std::time::Duration;
use tracing::debug;

/// Probe one endpoint's `/health` route.
///
/// Healthy means a 2xx response within the timeout; a connect error, a
/// non-success status, or a timeout all mean unhealthy.
pub(super) async fn probe_endpoint(client: &Client, endpoint: &Url, timeout: Duration) -> bool {
    let url = format!("{}/health", endpoint.as_str().trim_end_matches('/'));
    match client.get(&url).timeout(timeout).send().await {
        Ok(response) => {
            let healthy = response.status().is_success();
            if !healthy {
                debug!(url = %url, status = %response.status(), "health probe returned non-success");
            }
            healthy
        }
        Err(err) => {
            debug!(url = %url, error = %err, "health probe failed");
            false
        }
    }
}
