//! Pooled SQLite source.
//!
//! Connections are handed out from an `r2d2` pool. rusqlite is blocking, so
//! async callers go through [`SqlSource::with_connection`], which runs the
//! closure on the blocking thread pool.

use std::fmt;
use std::time::Duration;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use tracing::debug;

use crate::error::{ResourceError, ResourceResult};

/// Database url selecting a private in-memory database per connection.
pub const MEMORY_URL: &str = ":memory:";

/// A pooled SQL connection.
pub type SqlConnection = PooledConnection<SqliteConnectionManager>;

/// A cloneable handle to the connection pool.
#[derive(Clone)]
pub struct SqlSource {
    url: String,
    pool: Pool<SqliteConnectionManager>,
}

impl SqlSource {
    /// Opens a pool for `url`.
    ///
    /// Accepts [`MEMORY_URL`], a plain path, or a `sqlite://` url.
    pub fn open(url: &str, max_size: u32, timeout: Duration) -> ResourceResult<Self> {
        let manager = if url == MEMORY_URL {
            SqliteConnectionManager::memory()
        } else {
            let path = url.strip_prefix("sqlite://").unwrap_or(url);
            if path.is_empty() {
                return Err(ResourceError::Sql("empty database path".into()));
            }
            SqliteConnectionManager::file(path)
        };

        let pool = Pool::builder()
            .max_size(max_size.max(1))
            .connection_timeout(timeout)
            .build(manager)?;

        debug!(url = %url, max_size, "Opened SQL pool");
        Ok(Self {
            url: url.to_string(),
            pool,
        })
    }

    /// The url the pool was opened with.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Checks out a connection, blocking until one is free.
    pub fn get(&self) -> ResourceResult<SqlConnection> {
        Ok(self.pool.get()?)
    }

    /// Runs `f` with a pooled connection on the blocking thread pool.
    pub async fn with_connection<F, T>(&self, f: F) -> ResourceResult<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            f(&conn).map_err(ResourceError::from)
        })
        .await?
    }

    /// Verifies that a connection can be obtained and queried.
    pub async fn probe(&self) -> ResourceResult<()> {
        let one: i64 = self
            .with_connection(|conn| conn.query_row("SELECT 1", [], |row| row.get(0)))
            .await?;
        if one != 1 {
            return Err(ResourceError::Sql(format!("probe returned {one}")));
        }
        Ok(())
    }
}

impl fmt::Debug for SqlSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.pool.state();
        f.debug_struct("SqlSource")
            .field("url", &self.url)
            .field("connections", &state.connections)
            .field("idle", &state.idle_connections)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_probe() {
        let sql = SqlSource::open(MEMORY_URL, 2, Duration::from_secs(5)).unwrap();
        sql.probe().await.unwrap();

        let sum: i64 = sql
            .with_connection(|conn| conn.query_row("SELECT 40 + 2", [], |row| row.get(0)))
            .await
            .unwrap();
        assert_eq!(sum, 42);
    }

    #[test]
    fn test_empty_path_rejected() {
        let err = SqlSource::open("sqlite://", 1, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, ResourceError::Sql(_)));
    }
}
