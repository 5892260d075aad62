//! `DuckDB` connection pooling for a single market store.

use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ::duckdb::Connection;

/// Access mode for store connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Summary and status reads.
    ReadOnly,
    /// Upserts, audit appends, and maintenance.
    ReadWrite,
}

#[derive(Default)]
struct PoolState {
    root: Option<Connection>,
    read_only: Vec<Connection>,
    read_write: Vec<Connection>,
}

impl PoolState {
    fn slot(&mut self, mode: AccessMode) -> &mut Vec<Connection> {
        match mode {
            AccessMode::ReadOnly => &mut self.read_only,
            AccessMode::ReadWrite => &mut self.read_write,
        }
    }
}

struct PoolInner {
    db_path: PathBuf,
    max_pool_size: usize,
    state: Mutex<PoolState>,
}

impl PoolInner {
    // A panic while the lock was held cannot leave a half-pushed Vec behind,
    // so a poisoned pool is still usable.
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Hands out pooled connections to one market database file.
#[derive(Clone)]
pub struct DuckDbConnectionManager {
    inner: Arc<PoolInner>,
}

impl DuckDbConnectionManager {
    /// Create a pool for `path` that keeps at most `max_pool_size` idle
    /// connections per access mode.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, max_pool_size: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                db_path: path.into(),
                max_pool_size: max_pool_size.max(1),
                state: Mutex::new(PoolState::default()),
            }),
        }
    }

    /// Acquire an idle connection or open a new one.
    ///
    /// # Errors
    /// Returns an error if the database file cannot be opened or configured.
    pub fn acquire(&self, mode: AccessMode) -> Result<PooledConnection, ::duckdb::Error> {
        let mut state = self.inner.lock();
        let idle = state.slot(mode).pop();
        let connection = match idle {
            Some(connection) => connection,
            None => {
                // Every connection shares one database instance; opening the
                // file twice in one process trips DuckDB's file lock.
                let root = match state.root.take() {
                    Some(root) => root,
                    None => Connection::open(self.inner.db_path.as_path())?,
                };
                let cloned = root.try_clone();
                state.root = Some(root);
                let connection = cloned?;
                configure_connection(&connection, mode)?;
                connection
            }
        };
        drop(state);

        Ok(PooledConnection {
            mode,
            pool: Arc::clone(&self.inner),
            connection: Some(connection),
        })
    }

    #[must_use]
    pub fn db_path(&self) -> &Path {
        self.inner.db_path.as_path()
    }

    /// Drop every idle connection, and the shared instance, so the file can
    /// be copied or moved. Connections still checked out keep it alive.
    pub fn close_idle(&self) {
        let mut state = self.inner.lock();
        state.read_only.clear();
        state.read_write.clear();
        state.root = None;
    }
}

/// A pooled connection that returns to the pool when dropped.
pub struct PooledConnection {
    mode: AccessMode,
    pool: Arc<PoolInner>,
    connection: Option<Connection>,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        // Only `drop` takes the connection out.
        match self.connection.as_ref() {
            Some(connection) => connection,
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self.connection.as_mut() {
            Some(connection) => connection,
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };

        let mut state = self.pool.lock();
        let slot = state.slot(self.mode);
        if slot.len() < self.pool.max_pool_size {
            slot.push(connection);
        }
    }
}

fn configure_connection(connection: &Connection, mode: AccessMode) -> Result<(), ::duckdb::Error> {
    connection.execute_batch("PRAGMA disable_progress_bar;")?;
    if mode == AccessMode::ReadOnly {
        // Older embedded builds reject this; reads never issue writes anyway.
        let _ = connection.execute_batch("SET access_mode = 'READ_ONLY';");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn released_connections_are_reused_up_to_pool_size() {
        let temp = tempdir().expect("tempdir");
        let manager = DuckDbConnectionManager::new(temp.path().join("pool.duckdb"), 1);

        let first = manager.acquire(AccessMode::ReadWrite).expect("first");
        let second = manager.acquire(AccessMode::ReadWrite).expect("second");
        drop(first);
        drop(second);

        assert_eq!(manager.inner.lock().read_write.len(), 1);
        manager.close_idle();
        assert!(manager.inner.lock().read_write.is_empty());
    }
}
