//! Bounded connection pool with exclusive RAII handles
//!
//! One pool exists per resolved endpoint. A counting semaphore of
//! `max_size` permits bounds the simultaneously outstanding connections;
//! acquisition beyond the cap waits until a handle is dropped. Handles are
//! never shared: exactly one caller owns a connection at a time, and the
//! handle's `Drop` returns it to the idle set (or closes it once the pool
//! is shut down), so release happens exactly once on every exit path.

mod http;


pub use http::{HttpConnection, HttpConnector};

use crate::config::PoolConfig;
use crate::error::{TetherError, TetherResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Opens connections for a pool.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// The connection type this connector produces
    type Conn: Send + 'static;

    /// Open one new connection
    async fn connect(&self) -> TetherResult<Self::Conn>;
}

struct PoolShared<C> {
    idle: Mutex<Vec<C>>,
    shut_down: AtomicBool,
    max_idle: usize,
}

/// Bounded pool of reusable connections to one endpoint.
pub struct ConnectionPool<K: Connector> {
    service: String,
    connector: K,
    config: PoolConfig,
    semaphore: Arc<Semaphore>,
    shared: Arc<PoolShared<K::Conn>>,
}

impl<K: Connector> ConnectionPool<K> {
    /// Create an empty pool; call [`warm`](Self::warm) to pre-open
    /// `min_size` connections.
    pub fn new(service: impl Into<String>, connector: K, config: PoolConfig) -> Self {
        let max_size = config.max_size.max(1);
        Self {
            service: service.into(),
            connector,
            semaphore: Arc::new(Semaphore::new(max_size)),
            shared: Arc::new(PoolShared {
                idle: Mutex::new(Vec::with_capacity(max_size)),
                shut_down: AtomicBool::new(false),
                max_idle: max_size,
            }),
            config,
        }
    }

    /// Pre-open `min_size` connections into the idle set.
    ///
    /// Best effort: a failed warmup connection is logged and skipped; the
    /// pool still works, opening connections on demand.
    pub async fn warm(&self) {
        for _ in 0..self.config.min_size {
            match self.open().await {
                Ok(conn) => self.shared.idle.lock().push(conn),
                Err(err) => {
                    debug!(service = %self.service, error = %err, "pool warmup connect failed");
                    break;
                }
            }
        }
    }

    async fn open(&self) -> TetherResult<K::Conn> {
        match tokio::time::timeout(self.config.connect_timeout, self.connector.connect()).await {
            Ok(result) => result,
            Err(_) => Err(TetherError::connect(
                &self.service,
                format!(
                    "connect timed out after {:?}",
                    self.config.connect_timeout
                ),
            )),
        }
    }

    /// Acquire an exclusive connection handle.
    ///
    /// Returns an idle connection when one exists, otherwise opens a new
    /// one; waits on the capacity semaphore when `max_size` handles are
    /// outstanding. The wait is cancellation-aware.
    pub async fn acquire(&self, cancel: &CancellationToken) -> TetherResult<PooledConn<K::Conn>> {
        if self.shared.shut_down.load(Ordering::SeqCst) {
            return Err(TetherError::pool_closed(&self.service));
        }

        let permit = tokio::select! {
            _ = cancel.cancelled() => return Err(TetherError::Cancelled),
            permit = Arc::clone(&self.semaphore).acquire_owned() => {
                // The semaphore is closed only by shutdown.
                permit.map_err(|_| TetherError::pool_closed(&self.service))?
            }
        };

        if self.shared.shut_down.load(Ordering::SeqCst) {
            return Err(TetherError::pool_closed(&self.service));
        }

        // Pop in its own statement so the idle guard drops before any
        // await point.
        let idle_conn = self.shared.idle.lock().pop();
        let conn = match idle_conn {
            Some(conn) => conn,
            None => {
                // On failure the permit drops here, releasing the
                // capacity slot.
                self.open().await?
            }
        };

        Ok(PooledConn {
            conn: Some(conn),
            _permit: permit,
            shared: Arc::clone(&self.shared),
        })
    }

    /// Close the pool: drop all idle connections and fail further
    /// acquisitions fast. Outstanding handles close their connections on
    /// drop instead of returning them.
    pub fn shutdown(&self) {
        if self.shared.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.semaphore.close();
        let drained = std::mem::take(&mut *self.shared.idle.lock());
        if !drained.is_empty() {
            debug!(
                service = %self.service,
                count = drained.len(),
                "closed idle connections on pool shutdown"
            );
        }
        warn!(service = %self.service, "connection pool shut down");
    }

    /// Number of idle connections (diagnostics)
    pub fn idle_len(&self) -> usize {
        self.shared.idle.lock().len()
    }

    /// Free capacity slots (diagnostics)
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// Exclusively owned handle to one pooled connection.
///
/// Dropping the handle returns the connection to the pool's idle set, or
/// closes it when the pool has shut down or the idle set is full. The
/// capacity permit is released either way.
pub struct PooledConn<C: Send + 'static> {
    conn: Option<C>,
    _permit: OwnedSemaphorePermit,
    shared: Arc<PoolShared<C>>,
}

impl<C: Send + 'static> PooledConn<C> {
    /// Consume the handle and close the connection instead of returning it.
    /// Used when the connection is known broken.
    pub fn discard(mut self) {
        self.conn.take();
    }
}

impl<C: Send + 'static> std::fmt::Debug for PooledConn<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConn")
            .field("live", &self.conn.is_some())
            .finish_non_exhaustive()
    }
}

impl<C: Send + 'static> Deref for PooledConn<C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.conn.as_ref().expect("connection already released")
    }
}

impl<C: Send + 'static> DerefMut for PooledConn<C> {
    fn deref_mut(&mut self) -> &mut C {
        self.conn.as_mut().expect("connection already released")
    }
}

impl<C: Send + 'static> Drop for PooledConn<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            // The flag is checked under the idle lock: shutdown sets it
            // before draining under the same lock, so a racing return can
            // never re-park a connection after the drain. At capacity the
            // connection is simply dropped (closed).
            let mut idle = self.shared.idle.lock();
            if !self.shared.shut_down.load(Ordering::SeqCst) && idle.len() < self.shared.max_idle {
                idle.push(conn);
            }
        }
        // The permit drops after this, waking one waiting acquirer.
    }
}
