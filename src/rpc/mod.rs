//! Request/response tool calls
//!
//! One attempt runs resolve → circuit check → pool acquire → HTTP exchange
//! → circuit record → release. Transient failures loop through the retry
//! policy with a cancellation-aware backoff sleep; semantic failures
//! surface immediately (still counted toward the breaker per policy). The
//! pooled connection handle is scoped to the attempt, so it is released
//! exactly once on every exit path.

mod envelope;


pub use envelope::{ToolCallRequest, ToolCallResponse, WireError, WireErrorBody};

use crate::client::Shared;
use crate::error::{TetherError, TetherResult};
use crate::registry::normalize;
use crate::retry::RetryContext;
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Per-call options: deadline, retry cap, auth, tracing IDs, cancellation.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Deadline for each attempt (default: client `call_timeout`)
    pub timeout: Option<Duration>,
    /// Retry cap override (default: retry policy `max_retries`)
    pub max_retries: Option<u32>,
    /// Opaque bearer token forwarded as `Authorization: Bearer …`
    pub bearer_token: Option<String>,
    /// `X-Request-ID` value; generated per call when absent
    pub request_id: Option<String>,
    /// `X-Trace-ID` value; generated per call when absent
    pub trace_id: Option<String>,
    /// Caller-side cancellation token
    pub cancellation: Option<CancellationToken>,
}

impl CallOptions {
    /// Options with all defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-attempt deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Override the retry cap
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Attach a bearer token
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Set an explicit request ID
    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    /// Set an explicit trace ID
    pub fn with_trace_id(mut self, id: impl Into<String>) -> Self {
        self.trace_id = Some(id.into());
        self
    }

    /// Attach a cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

/// Wait for either client shutdown or caller cancellation.
pub(crate) async fn wait_cancelled(shutdown: &CancellationToken, caller: Option<&CancellationToken>) {
    match caller {
        Some(caller) => tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = caller.cancelled() => {}
        },
        None => shutdown.cancelled().await,
    }
}

/// Request/response client for tool calls.
#[derive(Clone)]
pub struct RpcClient {
    shared: Arc<Shared>,
}

impl RpcClient {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Invoke `tool` on `service` with default options
    pub async fn call(&self, service: &str, tool: &str, arguments: Value) -> TetherResult<Value> {
        self.call_with(service, tool, arguments, CallOptions::default())
            .await
    }

    /// Invoke `tool` on `service`.
    ///
    /// Transient failures are retried with exponential backoff up to the
    /// retry cap, then surfaced as [`TetherError::Exhausted`]. NotFound,
    /// CircuitOpen, semantic errors, and cancellation surface immediately.
    pub async fn call_with(
        &self,
        service: &str,
        tool: &str,
        arguments: Value,
        options: CallOptions,
    ) -> TetherResult<Value> {
        let service = normalize(service);
        let timeout = options.timeout.unwrap_or(self.shared.config.call_timeout);
        let mut retry = RetryContext::new(&self.shared.retry, options.max_retries);

        loop {
            match self
                .attempt(&service, tool, &arguments, &options, timeout)
                .await
            {
                Ok(result) => {
                    if retry.attempts() > 1 {
                        info!(service = %service, tool, attempts = retry.attempts(),
                            "call succeeded after retry");
                    }
                    return Ok(result);
                }
                Err(err) => match retry.next_delay(err.class()) {
                    Some(delay) => {
                        warn!(
                            service = %service,
                            tool,
                            attempt = retry.attempts() - 1,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "transient failure, retrying"
                        );
                        tokio::select! {
                            _ = wait_cancelled(&self.shared.shutdown, options.cancellation.as_ref()) => {
                                return Err(TetherError::Cancelled);
                            }
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                    None => {
                        return if err.is_transient() {
                            warn!(service = %service, tool, attempts = retry.attempts(),
                                "all attempts exhausted");
                            Err(TetherError::exhausted(&service, retry.attempts(), err))
                        } else {
                            Err(err)
                        };
                    }
                },
            }
        }
    }

    /// Issue N independent calls concurrently; results are positional and
    /// one failure never aborts the others.
    pub async fn call_batch(
        &self,
        service: &str,
        calls: Vec<(String, Value)>,
    ) -> Vec<TetherResult<Value>> {
        self.call_batch_with(service, calls, CallOptions::default())
            .await
    }

    /// Batched calls with shared options
    pub async fn call_batch_with(
        &self,
        service: &str,
        calls: Vec<(String, Value)>,
        options: CallOptions,
    ) -> Vec<TetherResult<Value>> {
        let futures = calls.into_iter().map(|(tool, arguments)| {
            let options = options.clone();
            async move { self.call_with(service, &tool, arguments, options).await }
        });
        futures::future::join_all(futures).await
    }

    /// One attempt: resolve, circuit check, acquire, exchange, record.
    async fn attempt(
        &self,
        service: &str,
        tool: &str,
        arguments: &Value,
        options: &CallOptions,
        timeout: Duration,
    ) -> TetherResult<Value> {
        let endpoint = self.shared.registry.resolve(service)?;
        let breaker = self.shared.breaker_for(service);
        let permit = breaker.try_acquire()?;

        let result = self
            .exchange(service, tool, arguments, options, timeout, &endpoint)
            .await;
        match &result {
            Ok(_) => permit.success(),
            Err(err) => permit.observe(err),
        }
        result
    }

    async fn exchange(
        &self,
        service: &str,
        tool: &str,
        arguments: &Value,
        options: &CallOptions,
        timeout: Duration,
        endpoint: &reqwest::Url,
    ) -> TetherResult<Value> {
        let entry = self.shared.pool_for(service, endpoint).await;
        let cancel = options.cancellation.clone().unwrap_or_default();
        let request_id = options
            .request_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let trace_id = options
            .trace_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        debug!(service, tool, request_id = %request_id, "sending tool call");

        // The deadline covers the pool wait as well as the HTTP exchange;
        // a call never hangs past its timeout waiting for a connection.
        // The connection handle lives inside the timed block, so it drops
        // on every path out of it, releasing it back to the pool exactly
        // once.
        let exchange = async {
            let conn = entry.pool.acquire(&cancel).await?;
            let url = conn.url_for(&format!("tool/{tool}"));
            let mut request = conn
                .client()
                .post(&url)
                .header("X-Request-ID", &request_id)
                .header("X-Trace-ID", &trace_id)
                .json(&ToolCallRequest {
                    arguments: arguments.clone(),
                });
            if let Some(token) = &options.bearer_token {
                request = request.bearer_auth(token);
            }
            let response = request
                .send()
                .await
                .map_err(|e| TetherError::from_reqwest(service, e, timeout))?;
            let status = response.status();
            let body = response
                .bytes()
                .await
                .map_err(|e| TetherError::from_reqwest(service, e, timeout))?;
            if status.is_success() {
                let envelope: ToolCallResponse = serde_json::from_slice(&body)?;
                Ok(envelope.result)
            } else {
                Err(error_from_status(service, status, &body))
            }
        };

        tokio::select! {
            _ = wait_cancelled(&self.shared.shutdown, options.cancellation.as_ref()) => {
                Err(TetherError::Cancelled)
            }
            outcome = tokio::time::timeout(timeout, exchange) => match outcome {
                Ok(result) => result,
                Err(_) => Err(TetherError::timeout(timeout)),
            },
        }
    }
}

/// Map a non-success response to a status error, preferring the structured
/// error envelope when the body carries one.
pub(crate) fn error_from_status(service: &str, status: StatusCode, body: &[u8]) -> TetherError {
    let message = match serde_json::from_slice::<WireErrorBody>(body) {
        Ok(envelope) => format!("{}: {}", envelope.error.code, envelope.error.message),
        Err(_) => {
            let text = String::from_utf8_lossy(body);
            let text = text.trim();
            if text.is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("unknown error")
                    .to_string()
            } else {
                text.chars().take(200).collect()
            }
        }
    };
    TetherError::status(service, status.as_u16(), message)
}
