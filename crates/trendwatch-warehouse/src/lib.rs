//! # Trendwatch Warehouse
//!
//! DuckDB-backed persistence for trendwatch.
//!
//! The warehouse stores two things:
//!
//! | Table | Description |
//! |-------|-------------|
//! | `trend_cache` | One row per (entity, metric kind, timeframe, geo) cache entry |
//! | `request_log` | Append-only log of upstream call attempts |
//!
//! Payloads are stored as opaque JSON text; the core crate owns their shape.
//! Timestamps are stored as RFC3339 UTC strings.
//!
//! ```rust,no_run
//! use trendwatch_warehouse::{Warehouse, WarehouseConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let warehouse = Warehouse::open(WarehouseConfig::default())?;
//!     for entry in warehouse.list_entries()? {
//!         println!("{} {} {}", entry.entity, entry.metric_kind, entry.expires_at);
//!     }
//!     Ok(())
//! }
//! ```

pub mod migrations;
pub mod pool;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use ::duckdb::{Connection, Row, ToSql};
use serde::Serialize;
use thiserror::Error;

pub use pool::{ConnectionPool, PooledConnection};

/// Errors that can occur during warehouse operations.
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// `DuckDB` database error.
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    /// I/O error (file system operations).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A stored row could not be mapped back to a record.
    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

/// Configuration for the warehouse database.
#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    /// Root directory for trendwatch data.
    pub trendwatch_home: PathBuf,
    /// Path to the `DuckDB` database file.
    pub db_path: PathBuf,
    /// Maximum number of idle connections kept around.
    pub max_pool_size: usize,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self::under(resolve_trendwatch_home())
    }
}

impl WarehouseConfig {
    /// Layout rooted at an explicit home directory.
    pub fn under(trendwatch_home: impl Into<PathBuf>) -> Self {
        let trendwatch_home = trendwatch_home.into();
        let db_path = trendwatch_home.join("cache").join("trends.duckdb");
        Self {
            trendwatch_home,
            db_path,
            max_pool_size: 4,
        }
    }
}

/// A persisted cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntryRecord {
    pub key: String,
    pub entity: String,
    pub metric_kind: String,
    pub timeframe: String,
    pub geo: String,
    /// Normalized payload as JSON text.
    pub payload: String,
    pub fetched_at: String,
    pub expires_at: String,
    pub last_accessed_at: String,
    pub fetch_count: u64,
    pub retry_count: u32,
    pub last_error: String,
    pub last_error_kind: Option<String>,
}

/// One upstream call attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestLogRecord {
    pub timestamp: String,
    pub entity: String,
    pub metric_kind: String,
    pub timeframe: String,
    pub geo: String,
    pub status: String,
    pub response_time_ms: u64,
    pub error_message: Option<String>,
    pub cache_hit: bool,
}

const ENTRY_COLUMNS: &str = "cache_key, entity, metric_kind, timeframe, geo, payload, \
    fetched_at, expires_at, last_accessed_at, fetch_count, retry_count, last_error, last_error_kind";

/// The warehouse handle. Cloning shares the pool and the write gate.
#[derive(Clone)]
pub struct Warehouse {
    config: WarehouseConfig,
    pool: ConnectionPool,
    write_gate: Arc<Mutex<()>>,
}

impl Warehouse {
    /// Open a warehouse with default configuration.
    pub fn open_default() -> Result<Self, WarehouseError> {
        Self::open(WarehouseConfig::default())
    }

    /// Open a warehouse with the specified configuration.
    pub fn open(config: WarehouseConfig) -> Result<Self, WarehouseError> {
        if let Some(parent) = config.db_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let pool = ConnectionPool::new(config.db_path.clone(), config.max_pool_size);
        let warehouse = Self {
            config,
            pool,
            write_gate: Arc::new(Mutex::new(())),
        };
        warehouse.initialize()?;
        Ok(warehouse)
    }

    /// Initialize database schema.
    pub fn initialize(&self) -> Result<(), WarehouseError> {
        let connection = self.pool.checkout()?;
        migrations::apply_migrations(&connection)?;
        Ok(())
    }

    /// Get the path to the database file.
    pub fn db_path(&self) -> &Path {
        self.pool.db_path()
    }

    pub fn home(&self) -> &Path {
        self.config.trendwatch_home.as_path()
    }

    pub fn fetch_entry(&self, key: &str) -> Result<Option<CacheEntryRecord>, WarehouseError> {
        let connection = self.pool.checkout()?;
        select_entry(&connection, key)
    }

    /// Insert or replace an entry keyed by `record.key`.
    pub fn upsert_entry(&self, record: &CacheEntryRecord) -> Result<(), WarehouseError> {
        let _gate = self.lock_writes();
        let connection = self.pool.checkout()?;
        write_entry(&connection, record)
    }

    /// Read-modify-write of one entry inside a single transaction.
    ///
    /// `update` receives the current row (if any) and returns the row to
    /// persist; returning `None` leaves the table untouched.
    pub fn update_entry<F>(
        &self,
        key: &str,
        update: F,
    ) -> Result<Option<CacheEntryRecord>, WarehouseError>
    where
        F: FnOnce(Option<CacheEntryRecord>) -> Option<CacheEntryRecord>,
    {
        let _gate = self.lock_writes();
        let connection = self.pool.checkout()?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<Option<CacheEntryRecord>, WarehouseError> {
            let current = select_entry(&connection, key)?;
            let Some(next) = update(current) else {
                return Ok(None);
            };
            if next.key != key {
                return Err(WarehouseError::InvalidRecord(format!(
                    "update for key '{key}' produced key '{}'",
                    next.key
                )));
            }
            write_entry(&connection, &next)?;
            Ok(Some(next))
        })();

        finalize_transaction(&connection, result)
    }

    /// Update `last_accessed_at` only. Returns whether the key existed.
    pub fn touch_entry(&self, key: &str, accessed_at: &str) -> Result<bool, WarehouseError> {
        let _gate = self.lock_writes();
        let connection = self.pool.checkout()?;
        let params: [&dyn ToSql; 2] = [&accessed_at, &key];
        let changed = connection.execute(
            "UPDATE trend_cache SET last_accessed_at = ? WHERE cache_key = ?",
            params.as_slice(),
        )?;
        Ok(changed > 0)
    }

    /// Delete entries matching the optional filters; no filter deletes everything.
    pub fn delete_entries(
        &self,
        entity: Option<&str>,
        metric_kind: Option<&str>,
    ) -> Result<usize, WarehouseError> {
        let mut clauses = Vec::new();
        let mut params: Vec<&dyn ToSql> = Vec::new();
        if let Some(entity) = entity.as_ref() {
            clauses.push("entity = ?");
            params.push(entity);
        }
        if let Some(metric_kind) = metric_kind.as_ref() {
            clauses.push("metric_kind = ?");
            params.push(metric_kind);
        }

        let sql = if clauses.is_empty() {
            String::from("DELETE FROM trend_cache")
        } else {
            format!("DELETE FROM trend_cache WHERE {}", clauses.join(" AND "))
        };

        let _gate = self.lock_writes();
        let connection = self.pool.checkout()?;
        let removed = connection.execute(sql.as_str(), params.as_slice())?;
        tracing::info!(?entity, ?metric_kind, removed, "cleared cache entries");
        Ok(removed)
    }

    pub fn list_entries(&self) -> Result<Vec<CacheEntryRecord>, WarehouseError> {
        let connection = self.pool.checkout()?;
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM trend_cache ORDER BY entity, metric_kind");
        let mut statement = connection.prepare(sql.as_str())?;
        let mut rows = statement.query([])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(read_entry(row)?);
        }
        Ok(entries)
    }

    pub fn append_request(&self, record: &RequestLogRecord) -> Result<(), WarehouseError> {
        let response_time_ms = to_i64(record.response_time_ms);
        let params: [&dyn ToSql; 9] = [
            &record.timestamp,
            &record.entity,
            &record.metric_kind,
            &record.timeframe,
            &record.geo,
            &record.status,
            &response_time_ms,
            &record.error_message,
            &record.cache_hit,
        ];

        let _gate = self.lock_writes();
        let connection = self.pool.checkout()?;
        connection.execute(
            "INSERT INTO request_log \
             (timestamp, entity, metric_kind, timeframe, geo, status, response_time_ms, error_message, cache_hit) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params.as_slice(),
        )?;
        Ok(())
    }

    /// Most recent request log rows in reverse insertion order.
    pub fn recent_requests(&self, limit: usize) -> Result<Vec<RequestLogRecord>, WarehouseError> {
        let connection = self.pool.checkout()?;
        let limit = to_i64(limit as u64);
        let mut statement = connection.prepare(
            "SELECT timestamp, entity, metric_kind, timeframe, geo, status, response_time_ms, \
             error_message, cache_hit FROM request_log ORDER BY seq DESC LIMIT ?",
        )?;
        let mut rows = statement.query([limit])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let response_time_ms: i64 = row.get(6)?;
            records.push(RequestLogRecord {
                timestamp: row.get(0)?,
                entity: row.get(1)?,
                metric_kind: row.get(2)?,
                timeframe: row.get(3)?,
                geo: row.get(4)?,
                status: row.get(5)?,
                response_time_ms: u64::try_from(response_time_ms).unwrap_or(0),
                error_message: row.get(7)?,
                cache_hit: row.get(8)?,
            });
        }
        Ok(records)
    }

    fn lock_writes(&self) -> std::sync::MutexGuard<'_, ()> {
        self.write_gate
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn select_entry(
    connection: &Connection,
    key: &str,
) -> Result<Option<CacheEntryRecord>, WarehouseError> {
    let sql = format!("SELECT {ENTRY_COLUMNS} FROM trend_cache WHERE cache_key = ?");
    let mut statement = connection.prepare(sql.as_str())?;
    let mut rows = statement.query([key])?;
    match rows.next()? {
        Some(row) => Ok(Some(read_entry(row)?)),
        None => Ok(None),
    }
}

fn write_entry(connection: &Connection, record: &CacheEntryRecord) -> Result<(), WarehouseError> {
    let fetch_count = to_i64(record.fetch_count);
    let retry_count = i64::from(record.retry_count);
    let params: [&dyn ToSql; 13] = [
        &record.key,
        &record.entity,
        &record.metric_kind,
        &record.timeframe,
        &record.geo,
        &record.payload,
        &record.fetched_at,
        &record.expires_at,
        &record.last_accessed_at,
        &fetch_count,
        &retry_count,
        &record.last_error,
        &record.last_error_kind,
    ];
    let sql = format!(
        "INSERT OR REPLACE INTO trend_cache ({ENTRY_COLUMNS}) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
    );
    connection.execute(sql.as_str(), params.as_slice())?;
    Ok(())
}

fn read_entry(row: &Row<'_>) -> Result<CacheEntryRecord, WarehouseError> {
    let fetch_count: i64 = row.get(9)?;
    let retry_count: i64 = row.get(10)?;
    let key: String = row.get(0)?;

    let fetch_count = u64::try_from(fetch_count)
        .map_err(|_| WarehouseError::InvalidRecord(format!("negative fetch_count for '{key}'")))?;
    let retry_count = u32::try_from(retry_count)
        .map_err(|_| WarehouseError::InvalidRecord(format!("bad retry_count for '{key}'")))?;

    Ok(CacheEntryRecord {
        key,
        entity: row.get(1)?,
        metric_kind: row.get(2)?,
        timeframe: row.get(3)?,
        geo: row.get(4)?,
        payload: row.get(5)?,
        fetched_at: row.get(6)?,
        expires_at: row.get(7)?,
        last_accessed_at: row.get(8)?,
        fetch_count,
        retry_count,
        last_error: row.get(11)?,
        last_error_kind: row.get(12)?,
    })
}

/// Finalize a transaction, committing on success or rolling back on failure.
fn finalize_transaction<T>(
    connection: &Connection,
    result: Result<T, WarehouseError>,
) -> Result<T, WarehouseError> {
    match result {
        Ok(value) => {
            connection.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(error) => {
            let _ = connection.execute_batch("ROLLBACK");
            Err(error)
        }
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Resolve the trendwatch home directory from environment or default.
fn resolve_trendwatch_home() -> PathBuf {
    if let Some(path) = env::var_os("TRENDWATCH_HOME") {
        let path = PathBuf::from(path);
        if !path.as_os_str().is_empty() {
            return path;
        }
    }

    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".trendwatch");
    }

    PathBuf::from(".trendwatch")
}
