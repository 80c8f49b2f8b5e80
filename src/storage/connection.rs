//! The store's single write connection.
//!
//! One `rusqlite::Connection` is shared by the synchronous register calls and
//! the writer thread. Every holder runs exactly one transaction per lock, so
//! register calls and batch flushes interleave but never share a transaction.

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::schema::apply_pragmas;

/// Shared, releasable handle to the write connection.
#[derive(Clone, Debug)]
pub struct SharedConnection {
    inner: Arc<Mutex<Option<Connection>>>,
}

impl SharedConnection {
    /// Wrap an already configured connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(conn))),
        }
    }

    /// Open `path` (creating it if needed) with writer pragmas applied.
    pub fn open<P: AsRef<Path>>(path: P, busy_timeout: Duration) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;
        apply_pragmas(&conn, busy_timeout)?;
        Ok(Self::new(conn))
    }

    /// Run `f` with exclusive access to the connection.
    ///
    /// Returns `None` once the connection has been released.
    pub fn with<T, E, F>(&self, f: F) -> Option<Result<T, E>>
    where
        F: FnOnce(&mut Connection) -> Result<T, E>,
    {
        let mut guard = self.lock();
        guard.as_mut().map(f)
    }

    /// Close the connection. Later [`with`](Self::with) calls return `None`.
    pub fn release(&self) -> Result<(), rusqlite::Error> {
        match self.lock().take() {
            Some(conn) => conn.close().map_err(|(_, e)| e),
            None => Ok(()),
        }
    }

    /// True once [`release`](Self::release) has run.
    pub fn is_released(&self) -> bool {
        self.lock().is_none()
    }

    // A panic while holding the lock leaves no transaction open (rusqlite
    // rolls back on drop), so a poisoned lock is still safe to reuse.
    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_runs_on_connection() {
        let shared = SharedConnection::new(Connection::open_in_memory().unwrap());
        let one: i64 = shared
            .with(|conn| conn.query_row("SELECT 1", [], |row| row.get(0)))
            .unwrap()
            .unwrap();
        assert_eq!(one, 1);
    }

    #[test]
    fn test_release_is_idempotent() {
        let shared = SharedConnection::new(Connection::open_in_memory().unwrap());
        let other = shared.clone();

        shared.release().unwrap();
        shared.release().unwrap();

        assert!(other.is_released());
        let result: Option<Result<(), rusqlite::Error>> = other.with(|_| Ok(()));
        assert!(result.is_none());
    }

    #[test]
    fn test_open_enables_wal() {
        let dir = tempfile::TempDir::new().unwrap();
        let shared = SharedConnection::open(dir.path().join("wal.db"), Duration::from_secs(1))
            .unwrap();
        let mode: String = shared
            .with(|conn| conn.query_row("PRAGMA journal_mode", [], |row| row.get(0)))
            .unwrap()
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }
}
