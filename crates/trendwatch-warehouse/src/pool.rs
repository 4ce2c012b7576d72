//! Pooled `DuckDB` connections.

use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use ::duckdb::Connection;

struct PoolShared {
    db_path: PathBuf,
    max_idle: usize,
    idle: Mutex<Vec<Connection>>,
}

impl PoolShared {
    fn idle(&self) -> MutexGuard<'_, Vec<Connection>> {
        // A poisoned idle list only holds connections; recover them.
        self.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Keeps a bounded set of idle read-write connections to one database file.
#[derive(Clone)]
pub struct ConnectionPool {
    shared: Arc<PoolShared>,
}

impl ConnectionPool {
    #[must_use]
    pub fn new(db_path: impl Into<PathBuf>, max_idle: usize) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                db_path: db_path.into(),
                max_idle: max_idle.max(1),
                idle: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Check out an idle connection or open a fresh one.
    ///
    /// # Errors
    /// Returns an error if a new connection cannot be opened.
    pub fn checkout(&self) -> Result<PooledConnection, ::duckdb::Error> {
        let reused = self.shared.idle().pop();
        let connection = match reused {
            Some(connection) => connection,
            None => {
                let connection = Connection::open(self.shared.db_path.as_path())?;
                connection.execute_batch("PRAGMA disable_progress_bar;")?;
                connection
            }
        };

        Ok(PooledConnection {
            pool: Arc::clone(&self.shared),
            connection: Some(connection),
        })
    }

    #[must_use]
    pub fn db_path(&self) -> &Path {
        self.shared.db_path.as_path()
    }

    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.shared.idle().len()
    }
}

/// Connection handle that goes back to the idle list on drop.
pub struct PooledConnection {
    pool: Arc<PoolShared>,
    connection: Option<Connection>,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        match self.connection.as_ref() {
            Some(connection) => connection,
            None => unreachable!("connection is only taken in drop"),
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };

        let mut idle = self.pool.idle();
        if idle.len() < self.pool.max_idle {
            idle.push(connection);
        }
    }
}
