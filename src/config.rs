//! Configuration for the tether client
//!
//! Every component gets its own config struct with defaults matching the
//! documented behavior; `ClientConfig` aggregates them. All structs are
//! serde-deserializable so they can be loaded from a config file, with
//! durations in humantime form ("30s", "100ms").

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Service registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Interval between health probe rounds
    #[serde(with = "humantime_serde")]
    pub probe_interval: Duration,
    /// Per-probe request timeout
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,
    /// Environment variable prefix for endpoint bootstrap,
    /// e.g. `TETHER_SERVICE_MEMORY=http://localhost:8001`
    pub env_prefix: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
            env_prefix: "TETHER_SERVICE_".to_string(),
        }
    }
}

impl RegistryConfig {
    /// Set the probe interval
    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    /// Set the probe timeout
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Set the environment bootstrap prefix
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// How long the circuit stays open before half-open probing is allowed
    #[serde(with = "humantime_serde")]
    pub recovery_time: Duration,
    /// Maximum concurrent probe calls admitted while half-open
    pub half_open_max_probes: u32,
    /// Whether semantic (non-network) failures count toward the threshold
    pub count_semantic_failures: bool,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_time: Duration::from_secs(30),
            half_open_max_probes: 3,
            count_semantic_failures: true,
        }
    }
}

impl BreakerConfig {
    /// Set the failure threshold
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set the recovery time
    pub fn with_recovery_time(mut self, recovery: Duration) -> Self {
        self.recovery_time = recovery;
        self
    }

    /// Set the half-open probe cap
    pub fn with_half_open_max_probes(mut self, max: u32) -> Self {
        self.half_open_max_probes = max;
        self
    }

    /// Set whether semantic failures count toward the threshold
    pub fn with_count_semantic_failures(mut self, count: bool) -> Self {
        self.count_semantic_failures = count;
        self
    }
}

/// Connection pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Connections pre-warmed at pool creation
    pub min_size: usize,
    /// Maximum simultaneously outstanding connections; acquisition beyond
    /// this blocks until a connection is released
    pub max_size: usize,
    /// Timeout for opening a new connection
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 1,
            max_size: 10,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl PoolConfig {
    /// Set the minimum pool size
    pub fn with_min_size(mut self, min: usize) -> Self {
        self.min_size = min;
        self
    }

    /// Set the maximum pool size
    pub fn with_max_size(mut self, max: usize) -> Self {
        self.max_size = max;
        self
    }

    /// Set the connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of repeat attempts after the first failure
    pub max_retries: u32,
    /// Backoff for the first retry
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,
    /// Backoff multiplier per attempt
    pub multiplier: f64,
    /// Backoff ceiling (before jitter)
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    /// Set the maximum retries
    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    /// Set the initial backoff
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    /// Set the backoff multiplier
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Set the backoff ceiling
    pub fn with_max_backoff(mut self, max: Duration) -> Self {
        self.max_backoff = max;
        self
    }
}

/// Aggregate configuration for a [`TetherClient`](crate::TetherClient)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub registry: RegistryConfig,
    pub breaker: BreakerConfig,
    pub pool: PoolConfig,
    pub retry: RetryConfig,
    /// Default deadline for a single tool call or stream establishment
    #[serde(with = "humantime_serde")]
    pub call_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            registry: RegistryConfig::default(),
            breaker: BreakerConfig::default(),
            pool: PoolConfig::default(),
            retry: RetryConfig::default(),
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl ClientConfig {
    /// Create a config with all defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the registry config
    pub fn with_registry(mut self, registry: RegistryConfig) -> Self {
        self.registry = registry;
        self
    }

    /// Replace the breaker config
    pub fn with_breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    /// Replace the pool config
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Replace the retry config
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set the default call timeout
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ClientConfig::default();
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.breaker.recovery_time, Duration::from_secs(30));
        assert_eq!(config.breaker.half_open_max_probes, 3);
        assert!(config.breaker.count_semantic_failures);
        assert_eq!(config.pool.max_size, 10);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.initial_backoff, Duration::from_millis(100));
        assert_eq!(config.retry.max_backoff, Duration::from_secs(10));
        assert_eq!(config.registry.probe_interval, Duration::from_secs(30));
        assert_eq!(config.call_timeout, Duration::from_secs(30));
    }

    #[test]
    fn builder_methods() {
        let config = ClientConfig::new()
            .with_breaker(BreakerConfig::default().with_failure_threshold(2))
            .with_pool(PoolConfig::default().with_max_size(4))
            .with_call_timeout(Duration::from_secs(5));
        assert_eq!(config.breaker.failure_threshold, 2);
        assert_eq!(config.pool.max_size, 4);
        assert_eq!(config.call_timeout, Duration::from_secs(5));
    }

    #[test]
    fn deserializes_humantime_durations() {
        let config: ClientConfig = serde_json::from_str(
            r#"{
                "retry": {"initial_backoff": "250ms", "max_backoff": "5s"},
                "breaker": {"recovery_time": "10s", "count_semantic_failures": false},
                "call_timeout": "15s"
            }"#,
        )
        .unwrap();
        assert_eq!(config.retry.initial_backoff, Duration::from_millis(250));
        assert_eq!(config.retry.max_backoff, Duration::from_secs(5));
        assert_eq!(config.breaker.recovery_time, Duration::from_secs(10));
        assert!(!config.breaker.count_semantic_failures);
        assert_eq!(config.call_timeout, Duration::from_secs(15));
    }
}
