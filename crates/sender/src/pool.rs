//! Bounded pool of reusable coordinator connections.

use std::ops::Deref;
use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::SendError;

/// Fixed set of connections handed out one borrower at a time.
///
/// Callers wait for a free slot when every connection is borrowed.
pub struct ConnectionPool<C> {
    idle: Mutex<Vec<C>>,
    permits: Arc<Semaphore>,
    size: usize,
}

impl<C> ConnectionPool<C> {
    pub fn new(connections: Vec<C>) -> Self {
        let size = connections.len();
        Self {
            idle: Mutex::new(connections),
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Borrows a connection, waiting for one to be returned if necessary.
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledConnection<C>, SendError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| SendError::PoolClosed)?;
        // A permit guarantees an idle connection.
        let conn = self
            .idle
            .lock()
            .unwrap()
            .pop()
            .ok_or(SendError::PoolClosed)?;
        Ok(PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(self),
            _permit: permit,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Fails pending and future [`acquire`](Self::acquire) calls.
    pub fn close(&self) {
        self.permits.close();
    }
}

/// A borrowed connection, returned to its pool when dropped.
pub struct PooledConnection<C> {
    conn: Option<C>,
    pool: Arc<ConnectionPool<C>>,
    // Dropped after `Drop::drop` has put the connection back.
    _permit: OwnedSemaphorePermit,
}

impl<C> Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &C {
        // Only taken in `drop`.
        self.conn.as_ref().unwrap()
    }
}

impl<C> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.idle.lock().unwrap().push(conn);
        }
    }
}
