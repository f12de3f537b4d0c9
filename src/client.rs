//! Client facade owning all per-service state
//!
//! A [`TetherClient`] owns its registry, circuit breakers, and connection
//! pools; nothing lives in process-wide globals. Dropping or shutting down
//! the client tears everything down: the probe loop stops, pools drain,
//! and outstanding streams observe the shutdown token.

use crate::breaker::CircuitBreaker;
use crate::config::ClientConfig;
use crate::error::TetherResult;
use crate::pool::{ConnectionPool, HttpConnector};
use crate::registry::ServiceRegistry;
use crate::retry::RetryPolicy;
use crate::rpc::{CallOptions, RpcClient};
use crate::stream::{ResourceStream, StreamClient};
use dashmap::DashMap;
use reqwest::Url;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// One service's pool, pinned to the endpoint it was built against.
pub(crate) struct PoolEntry {
    pub(crate) endpoint: Url,
    pub(crate) pool: ConnectionPool<HttpConnector>,
}

/// State shared by the RPC and stream clients.
pub(crate) struct Shared {
    pub(crate) registry: Arc<ServiceRegistry>,
    pub(crate) breakers: DashMap<String, Arc<CircuitBreaker>>,
    pub(crate) pools: DashMap<String, Arc<PoolEntry>>,
    pub(crate) retry: RetryPolicy,
    pub(crate) config: ClientConfig,
    pub(crate) shutdown: CancellationToken,
}

impl Shared {
    /// Breaker for a service, created lazily on first call
    pub(crate) fn breaker_for(&self, service: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(service.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(service, self.config.breaker.clone()))
            })
            .clone()
    }

    /// Pool for a service, created lazily and rebuilt when the registered
    /// endpoint changes (last-write-wins endpoint semantics carry through
    /// to the pool layer).
    pub(crate) async fn pool_for(&self, service: &str, endpoint: &Url) -> Arc<PoolEntry> {
        if let Some(entry) = self.pools.get(service) {
            if entry.endpoint == *endpoint {
                return Arc::clone(&entry);
            }
        }

        let connector = HttpConnector::new(endpoint.clone(), self.config.pool.connect_timeout);
        let pool = ConnectionPool::new(service, connector, self.config.pool.clone());
        pool.warm().await;
        let entry = Arc::new(PoolEntry {
            endpoint: endpoint.clone(),
            pool,
        });

        if let Some(previous) = self.pools.insert(service.to_string(), Arc::clone(&entry)) {
            debug!(service, old = %previous.endpoint, new = %endpoint,
                "endpoint changed, replacing connection pool");
            previous.pool.shutdown();
        }
        entry
    }
}

/// Resilient service-call client: tool calls and resource streams with
/// endpoint resolution, circuit breaking, bounded pooling, and retry.
///
/// Cheap to clone; all clones share one set of per-service state.
#[derive(Clone)]
pub struct TetherClient {
    shared: Arc<Shared>,
}

impl TetherClient {
    /// Create a client and start its health probe loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: ClientConfig) -> Self {
        Self::with_registry(Arc::new(ServiceRegistry::new(config.registry.clone())), config)
    }

    /// Create a client whose registry is bootstrapped from environment
    /// variables (`<prefix><NAME> = endpoint URL`).
    pub fn from_env(config: ClientConfig) -> Self {
        Self::with_registry(
            Arc::new(ServiceRegistry::from_env(config.registry.clone())),
            config,
        )
    }

    fn with_registry(registry: Arc<ServiceRegistry>, config: ClientConfig) -> Self {
        registry.start_probes();
        let shared = Arc::new(Shared {
            registry,
            breakers: DashMap::new(),
            pools: DashMap::new(),
            retry: RetryPolicy::new(config.retry.clone()),
            shutdown: CancellationToken::new(),
            config,
        });
        Self { shared }
    }

    /// The service registry
    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.shared.registry
    }

    /// Register a service endpoint (convenience for `registry().register_str`)
    pub fn register(&self, name: &str, endpoint: &str) -> TetherResult<()> {
        self.shared.registry.register_str(name, endpoint)
    }

    /// Remove a service
    pub fn deregister(&self, name: &str) {
        self.shared.registry.deregister(name);
    }

    /// The request/response client
    pub fn rpc(&self) -> RpcClient {
        RpcClient::new(Arc::clone(&self.shared))
    }

    /// The resource stream client
    pub fn streams(&self) -> StreamClient {
        StreamClient::new(Arc::clone(&self.shared))
    }

    /// Invoke a tool on a service with default options
    pub async fn call(&self, service: &str, tool: &str, arguments: Value) -> TetherResult<Value> {
        self.rpc().call(service, tool, arguments).await
    }

    /// Invoke a tool with explicit call options
    pub async fn call_with(
        &self,
        service: &str,
        tool: &str,
        arguments: Value,
        options: CallOptions,
    ) -> TetherResult<Value> {
        self.rpc().call_with(service, tool, arguments, options).await
    }

    /// Issue independent tool calls concurrently; results are positional
    /// and one failure never aborts the others
    pub async fn call_batch(
        &self,
        service: &str,
        calls: Vec<(String, Value)>,
    ) -> Vec<TetherResult<Value>> {
        self.rpc().call_batch(service, calls).await
    }

    /// Open a resource stream with default options
    pub async fn stream(&self, service: &str, path: &str) -> TetherResult<ResourceStream> {
        self.streams().stream(service, path).await
    }

    /// Open a resource stream with explicit call options
    pub async fn stream_with(
        &self,
        service: &str,
        path: &str,
        options: CallOptions,
    ) -> TetherResult<ResourceStream> {
        self.streams().stream_with(service, path, options).await
    }

    /// Tear the client down deterministically.
    ///
    /// Stops the probe loop, signals outstanding calls and streams to
    /// cancel, and drains every connection pool. No background work
    /// survives this call.
    pub async fn shutdown(&self) {
        info!("shutting down tether client");
        self.shared.shutdown.cancel();
        self.shared.registry.shutdown().await;
        for entry in self.shared.pools.iter() {
            entry.pool.shutdown();
        }
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn quiet_config() -> ClientConfig {
        let mut config = ClientConfig::default();
        config.registry.probe_interval = Duration::from_secs(3600);
        config.pool.min_size = 0;
        config
    }

    async fn tool_server(result: serde_json::Value) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tool/op"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": result})))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn from_env_registers_services() {
        unsafe {
            std::env::set_var("TETHER_TEST_B_CACHE", "http://localhost:9010");
        }
        let mut config = quiet_config();
        config.registry.env_prefix = "TETHER_TEST_B_".to_string();
        let client = TetherClient::from_env(config);
        assert!(client.registry().resolve("cache").is_ok());
        client.shutdown().await;
    }

    #[tokio::test]
    async fn per_service_state_is_independent() {
        let client = TetherClient::new(quiet_config());
        let a = client.shared.breaker_for("alpha");
        let b = client.shared.breaker_for("beta");
        a.record_failure();
        assert_eq!(a.failure_count(), 1);
        assert_eq!(b.failure_count(), 0);
        // Same service name yields the same breaker instance.
        assert!(Arc::ptr_eq(&a, &client.shared.breaker_for("alpha")));
        client.shutdown().await;
    }

    #[tokio::test]
    async fn pool_is_rebuilt_when_endpoint_changes() {
        let first = tool_server(json!("first")).await;
        let second = tool_server(json!("second")).await;

        let client = TetherClient::new(quiet_config());
        client.register("svc", &first.uri()).unwrap();
        assert_eq!(client.call("svc", "op", json!({})).await.unwrap(), json!("first"));

        // Last write wins: the pool follows the endpoint.
        client.register("svc", &second.uri()).unwrap();
        assert_eq!(
            client.call("svc", "op", json!({})).await.unwrap(),
            json!("second")
        );
        client.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let client = TetherClient::new(quiet_config());
        client.shutdown().await;
        client.shutdown().await;
    }
}
