//! Bounded connection pool.
//!
//! A semaphore caps the number of live connections; released clean
//! connections go onto a LIFO idle list so the hottest socket is reused
//! first. The idle list sits behind a plain mutex that is only held for
//! list operations, never across an await.

use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::ConnectOptions;
use crate::connection::{self, Connection};
use crate::db::Db;
use crate::error::Error;
use crate::pubsub::PubSub;

pub const DEFAULT_MAX_CONNECTIONS: usize = 16;

/// Shared handle to a connection pool. Cheap to clone.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    /// Parse `url` and create an empty pool with the default size limit.
    /// Connections are dialled lazily on first use.
    pub fn new(url: &str) -> Result<Self, Error> {
        Self::with_max_connections(url, DEFAULT_MAX_CONNECTIONS)
    }

    pub fn with_max_connections(url: &str, max: usize) -> Result<Self, Error> {
        let opts = ConnectOptions::parse(url)?;
        Ok(Self {
            inner: Arc::new(PoolInner {
                opts,
                max,
                semaphore: Arc::new(Semaphore::new(max)),
                idle: Mutex::new(Vec::new()),
            }),
        })
    }

    /// A command facade. It checks a connection out lazily, on first await.
    pub fn db(&self) -> Db {
        Db::new(Arc::clone(&self.inner))
    }

    /// Open a dedicated subscription connection and subscribe to `names`.
    /// Names containing `*`, `?` or `[` are treated as patterns. The
    /// connection bypasses the pool: it is owned by the receiver for its
    /// whole lifetime and never returned.
    pub async fn pubsub<I, S>(&self, names: I) -> Result<PubSub, Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        PubSub::connect(
            &self.inner.opts,
            names.into_iter().map(Into::into).collect(),
        )
        .await
    }

    /// Live connections: checked out plus idle.
    pub fn size(&self) -> usize {
        self.inner.max - self.inner.semaphore.available_permits() + self.num_idle()
    }

    pub fn num_idle(&self) -> usize {
        lock(&self.inner.idle).len()
    }

    /// Shut the pool down: drop every idle socket and fail all future
    /// acquires with [`Error::PoolClosed`]. Checked-out connections are
    /// closed as they come back.
    pub fn close(&self) {
        self.inner.semaphore.close();
        let dropped = {
            let mut idle = lock(&self.inner.idle);
            std::mem::take(&mut *idle).len()
        };
        tracing::debug!(dropped, "pool closed");
    }
}

pub(crate) struct PoolInner {
    opts: ConnectOptions,
    max: usize,
    semaphore: Arc<Semaphore>,
    idle: Mutex<Vec<Connection>>,
}

impl PoolInner {
    /// Check a connection out: reuse the most recently released idle one,
    /// or dial a new connection while holding a live-count permit.
    pub(crate) async fn acquire(self: &Arc<Self>) -> Result<PooledConn, Error> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| Error::PoolClosed)?;

        let reused = lock(&self.idle).pop();
        let conn = match reused {
            Some(conn) => {
                tracing::trace!("reusing idle connection");
                conn
            }
            // A failed dial drops the permit, releasing the slot.
            None => connection::connect(&self.opts).await?,
        };

        Ok(PooledConn {
            conn: Some(conn),
            discard: false,
            pool: Arc::clone(self),
            _permit: permit,
        })
    }

    fn release(&self, conn: Connection, discard: bool) {
        if discard || !conn.is_clean() || self.semaphore.is_closed() {
            tracing::debug!(discard, clean = conn.is_clean(), "closing connection");
        } else {
            lock(&self.idle).push(conn);
        }
    }
}

/// RAII checkout. Dropping it returns a clean connection to the idle list
/// and closes anything else.
pub(crate) struct PooledConn {
    conn: Option<Connection>,
    discard: bool,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl PooledConn {
    pub(crate) fn conn_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection already released")
    }

    /// Force the connection to be closed instead of pooled on drop.
    pub(crate) fn set_discard(&mut self, discard: bool) {
        self.discard = discard;
    }
}

impl Drop for PooledConn {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn, self.discard);
        }
    }
}

/// Poison-proof lock: a panicked holder cannot have left the list in a
/// broken state, list operations do not unwind mid-update.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
