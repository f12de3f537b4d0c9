//! Tether: a resilient service-to-service call client
//!
//! Lets independent network services invoke each other's tool calls and
//! consume server-pushed resource streams without a message broker, while
//! surviving partial failures, slow peers, and transient outages. Four
//! coupled concerns are handled together: endpoint resolution, bounded
//! connection reuse, failure-triggered call suppression (circuit
//! breaking), and retry with exponential backoff.
//!
//! ```rust,no_run
//! use tether::{ClientConfig, TetherClient};
//! use serde_json::json;
//! use futures::StreamExt;
//!
//! # async fn example() -> tether::TetherResult<()> {
//! let client = TetherClient::new(ClientConfig::default());
//! client.register("memory", "http://localhost:8001")?;
//!
//! let result = client
//!     .call("memory", "recall", json!({"query": "meeting notes"}))
//!     .await?;
//!
//! let mut events = client.stream("memory", "updates").await?;
//! while let Some(event) = events.next().await {
//!     println!("{:?}", event?);
//! }
//! # Ok(())
//! # }
//! ```

pub mod breaker;
pub mod client;
pub mod config;
pub mod error;
pub mod pool;
pub mod registry;
pub mod retry;
pub mod rpc;
pub mod stream;

// Re-export commonly used types
pub use breaker::{BreakerPermit, CircuitBreaker, CircuitState};
pub use client::TetherClient;
pub use config::{BreakerConfig, ClientConfig, PoolConfig, RegistryConfig, RetryConfig};
pub use error::{ErrorClass, TetherError, TetherResult};
pub use pool::{ConnectionPool, Connector, HttpConnection, HttpConnector, PooledConn};
pub use registry::{ServiceRecord, ServiceRegistry};
pub use retry::RetryPolicy;
pub use rpc::{CallOptions, RpcClient, ToolCallRequest, ToolCallResponse, WireError};
pub use stream::{ResourceStream, StreamClient, StreamEvent};
