//! Service registry: logical name to endpoint mapping with health probing
//!
//! The registry is owned by the client instance (no process-wide state).
//! Health is informational: [`resolve`](ServiceRegistry::resolve) returns the
//! endpoint even when a service is marked unhealthy; callers decide whether
//! to consult [`is_healthy`](ServiceRegistry::is_healthy) first.

mod probe;
mod types;


pub use types::ServiceRecord;

use crate::config::RegistryConfig;
use crate::error::{TetherError, TetherResult};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use reqwest::{Client, Url};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Maps logical service names to endpoints and tracks per-name health.
pub struct ServiceRegistry {
    records: DashMap<String, ServiceRecord>,
    config: RegistryConfig,
    http: Client,
    cancel: CancellationToken,
    probe_task: Mutex<Option<JoinHandle<()>>>,
}

/// Normalize a service name: lookup and storage are case-insensitive.
pub(crate) fn normalize(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

impl ServiceRegistry {
    /// Create an empty registry
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            records: DashMap::new(),
            config,
            http: Client::new(),
            cancel: CancellationToken::new(),
            probe_task: Mutex::new(None),
        }
    }

    /// Create a registry bootstrapped from environment variables.
    ///
    /// Every variable `<prefix><NAME>` whose value parses as a URL registers
    /// service `name` (suffix lowercased). Invalid URLs are logged and
    /// skipped.
    pub fn from_env(config: RegistryConfig) -> Self {
        let registry = Self::new(config);
        let prefix = registry.config.env_prefix.clone();
        for (key, value) in std::env::vars() {
            let Some(suffix) = key.strip_prefix(&prefix) else {
                continue;
            };
            if suffix.is_empty() {
                continue;
            }
            match Url::parse(&value) {
                Ok(endpoint) => {
                    registry.register(suffix, endpoint);
                }
                Err(err) => {
                    warn!(var = %key, value = %value, error = %err,
                        "skipping service with invalid endpoint URL");
                }
            }
        }
        registry
    }

    /// Register a service endpoint. Idempotent; last write wins.
    pub fn register(&self, name: &str, endpoint: Url) {
        let name = normalize(name);
        debug!(service = %name, endpoint = %endpoint, "registering service");
        self.records
            .insert(name.clone(), ServiceRecord::new(name, endpoint));
    }

    /// Register from an endpoint string, validating the URL
    pub fn register_str(&self, name: &str, endpoint: &str) -> TetherResult<()> {
        let url = Url::parse(endpoint)
            .map_err(|e| TetherError::config(format!("invalid endpoint '{endpoint}': {e}")))?;
        self.register(name, url);
        Ok(())
    }

    /// Remove a service and its cached health state
    pub fn deregister(&self, name: &str) {
        let name = normalize(name);
        if self.records.remove(&name).is_some() {
            debug!(service = %name, "deregistered service");
        }
    }

    /// Resolve a service name to its endpoint.
    ///
    /// Returns the endpoint regardless of the health flag.
    pub fn resolve(&self, name: &str) -> TetherResult<Url> {
        let name = normalize(name);
        self.records
            .get(&name)
            .map(|record| record.endpoint.clone())
            .ok_or_else(|| TetherError::not_found(name))
    }

    /// Whether the service is believed healthy.
    ///
    /// A service that has never been probed (or is unknown) counts as
    /// healthy; only an explicit failed probe flips this to `false`.
    pub fn is_healthy(&self, name: &str) -> bool {
        let name = normalize(name);
        self.records
            .get(&name)
            .map(|record| record.healthy.unwrap_or(true))
            .unwrap_or(false)
    }

    /// Snapshot of all registered services
    pub fn list_all(&self) -> HashMap<String, ServiceRecord> {
        self.records
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Start the background probe loop.
    ///
    /// Idempotent: calling this while the loop is running does nothing.
    /// The loop probes every registered endpoint each `probe_interval` and
    /// runs until [`shutdown`](Self::shutdown).
    pub fn start_probes(self: &Arc<Self>) {
        let mut task = self.probe_task.lock();
        if task.is_some() {
            return;
        }
        let registry = Arc::clone(self);
        let cancel = self.cancel.clone();
        *task = Some(tokio::spawn(async move {
            // First probe fires one full interval after startup.
            let period = registry.config.probe_interval;
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => registry.probe_round().await,
                }
            }
            debug!("health probe loop stopped");
        }));
    }

    /// Probe every registered endpoint once and update health flags
    async fn probe_round(&self) {
        let targets: Vec<(String, Url)> = self
            .records
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().endpoint.clone()))
            .collect();

        for (name, endpoint) in targets {
            let healthy =
                probe::probe_endpoint(&self.http, &endpoint, self.config.probe_timeout).await;
            // The service may have been deregistered mid-round.
            if let Some(mut record) = self.records.get_mut(&name) {
                if record.healthy != Some(healthy) {
                    info!(service = %name, healthy, "service health changed");
                }
                record.healthy = Some(healthy);
                record.last_check = Some(Utc::now());
            }
        }
    }

    /// Stop the probe loop deterministically.
    ///
    /// No probe fires after this returns.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self.probe_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl Drop for ServiceRegistry {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.probe_task.lock().take() {
            task.abort();
        }
    }
}
