//! Resource streams: long-lived server-pushed item sequences
//!
//! A stream holds its pooled connection for its entire lifetime and yields
//! items lazily in wire-arrival order. Malformed payloads are logged and
//! skipped; the stream ends on peer close, caller cancellation, client
//! shutdown, or an I/O error. On every exit path the held connection drops
//! back to the pool exactly once, and a circuit failure is recorded only
//! for connection-level errors, never for a clean peer close.

mod sse;

#[cfg(test)]
mod tests;

use crate::breaker::CircuitBreaker;
use crate::client::Shared;
use crate::error::{TetherError, TetherResult};
use crate::pool::{HttpConnection, PooledConn};
use crate::registry::normalize;
use crate::rpc::{CallOptions, error_from_status, wait_cancelled};
use futures::{Stream, StreamExt};
use serde_json::Value;
use sse::SseParser;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio_util::sync::WaitForCancellationFutureOwned;
use tracing::{debug, warn};
use uuid::Uuid;

/// One decoded item from a resource stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    /// The event's JSON payload
    pub data: Value,
}

impl StreamEvent {
    /// Unwrap the payload
    pub fn into_inner(self) -> Value {
        self.data
    }
}

type BodyStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, reqwest::Error>> + Send>>;

/// Client for server-pushed resource streams.
#[derive(Clone)]
pub struct StreamClient {
    shared: Arc<Shared>,
}

impl StreamClient {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Open a resource stream with default options
    pub async fn stream(&self, service: &str, path: &str) -> TetherResult<ResourceStream> {
        self.stream_with(service, path, CallOptions::default()).await
    }

    /// Open a resource stream.
    ///
    /// Resolution and circuit checking work exactly as for a tool call;
    /// the timeout in `options` bounds stream establishment only, not the
    /// stream's lifetime.
    pub async fn stream_with(
        &self,
        service: &str,
        path: &str,
        options: CallOptions,
    ) -> TetherResult<ResourceStream> {
        let service = normalize(service);
        let endpoint = self.shared.registry.resolve(&service)?;
        let breaker = self.shared.breaker_for(&service);
        let permit = breaker.try_acquire()?;

        match self.establish(&service, path, &options, &endpoint).await {
            Ok((conn, response)) => {
                permit.success();
                debug!(service = %service, path, "resource stream established");
                let caller = options
                    .cancellation
                    .map(|token| Box::pin(token.cancelled_owned()));
                Ok(ResourceStream {
                    service,
                    conn: Some(conn),
                    breaker,
                    body: Some(Box::pin(
                        response.bytes_stream().map(|chunk| chunk.map(|b| b.to_vec())),
                    )),
                    parser: SseParser::new(),
                    pending: VecDeque::new(),
                    shutdown: Box::pin(self.shared.shutdown.clone().cancelled_owned()),
                    caller,
                    done: false,
                })
            }
            Err(err) => {
                permit.observe(&err);
                Err(err)
            }
        }
    }

    async fn establish(
        &self,
        service: &str,
        path: &str,
        options: &CallOptions,
        endpoint: &reqwest::Url,
    ) -> TetherResult<(PooledConn<HttpConnection>, reqwest::Response)> {
        let timeout = options.timeout.unwrap_or(self.shared.config.call_timeout);
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

        // The establishment deadline covers the pool wait as well as the
        // initial HTTP exchange.
        let attempt = async {
            let conn = entry.pool.acquire(&cancel).await?;
            let url = conn.url_for(&format!("resource/{path}"));
            let mut request = conn
                .client()
                .get(&url)
                .header("Accept", "text/event-stream")
                .header("X-Request-ID", &request_id)
                .header("X-Trace-ID", &trace_id);
            if let Some(token) = &options.bearer_token {
                request = request.bearer_auth(token);
            }
            let response = request
                .send()
                .await
                .map_err(|e| TetherError::from_reqwest(service, e, timeout))?;
            let status = response.status();
            if !status.is_success() {
                let body = response.bytes().await.unwrap_or_default();
                return Err(error_from_status(service, status, &body));
            }
            Ok((conn, response))
        };

        tokio::select! {
            _ = wait_cancelled(&self.shared.shutdown, options.cancellation.as_ref()) => {
                Err(TetherError::Cancelled)
            }
            outcome = tokio::time::timeout(timeout, attempt) => match outcome {
                Ok(result) => result,
                Err(_) => Err(TetherError::timeout(timeout)),
            },
        }
    }
}

/// A lazy, forward-only sequence of [`StreamEvent`]s.
///
/// Not restartable; effectively infinite until the peer closes, the caller
/// cancels, or an I/O error occurs. Dropping the stream releases its held
/// connection.
pub struct ResourceStream {
    service: String,
    conn: Option<PooledConn<HttpConnection>>,
    breaker: Arc<CircuitBreaker>,
    body: Option<BodyStream>,
    parser: SseParser,
    pending: VecDeque<StreamEvent>,
    shutdown: Pin<Box<WaitForCancellationFutureOwned>>,
    caller: Option<Pin<Box<WaitForCancellationFutureOwned>>>,
    done: bool,
}

impl std::fmt::Debug for ResourceStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceStream")
            .field("service", &self.service)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl ResourceStream {
    /// Release the connection and stop yielding
    fn finish(&mut self) {
        self.done = true;
        self.body.take();
        self.conn.take();
        self.pending.clear();
    }
}

impl Stream for ResourceStream {
    type Item = TetherResult<StreamEvent>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if this.done {
                return Poll::Ready(None);
            }

            // Cancellation wins over buffered items: a cancelled stream
            // yields no further events.
            let cancelled = this.shutdown.as_mut().poll(cx).is_ready()
                || this
                    .caller
                    .as_mut()
                    .map(|fut| fut.as_mut().poll(cx).is_ready())
                    .unwrap_or(false);
            if cancelled {
                this.finish();
                return Poll::Ready(Some(Err(TetherError::Cancelled)));
            }

            if let Some(event) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(event)));
            }

            let Some(body) = this.body.as_mut() else {
                this.finish();
                return Poll::Ready(None);
            };
            match body.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    for payload in this.parser.push(&chunk) {
                        match serde_json::from_str::<Value>(&payload) {
                            Ok(data) => this.pending.push_back(StreamEvent { data }),
                            Err(err) => {
                                // Malformed payloads are skipped, not fatal.
                                warn!(
                                    service = %this.service,
                                    error = %err,
                                    payload = %payload,
                                    "skipping malformed stream payload"
                                );
                            }
                        }
                    }
                    // Loop: deliver decoded items or poll for more bytes.
                }
                Poll::Ready(Some(Err(err))) => {
                    // Connection-level failure counts against the circuit.
                    this.breaker.record_failure();
                    let service = this.service.clone();
                    this.finish();
                    return Poll::Ready(Some(Err(TetherError::transport(
                        service,
                        err.to_string(),
                    ))));
                }
                Poll::Ready(None) => {
                    // Clean peer close: no circuit failure.
                    debug!(service = %this.service, "resource stream closed by peer");
                    this.finish();
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl Drop for ResourceStream {
    fn drop(&mut self) {
        // Connection (if still held) returns to the pool here.
        self.conn.take();
    }
}
