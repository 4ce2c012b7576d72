use ::duckdb::Connection;

struct Migration {
    version: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "0001_trend_cache",
        sql: r#"
CREATE TABLE IF NOT EXISTS trend_cache (
    cache_key TEXT PRIMARY KEY,
    entity TEXT NOT NULL,
    metric_kind TEXT NOT NULL,
    timeframe TEXT NOT NULL,
    geo TEXT NOT NULL,
    payload TEXT NOT NULL,
    fetched_at TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    last_accessed_at TEXT NOT NULL,
    fetch_count BIGINT NOT NULL DEFAULT 0,
    retry_count BIGINT NOT NULL DEFAULT 0,
    last_error TEXT NOT NULL DEFAULT '',
    last_error_kind TEXT
);

CREATE SEQUENCE IF NOT EXISTS request_log_seq START 1;

CREATE TABLE IF NOT EXISTS request_log (
    seq BIGINT NOT NULL DEFAULT nextval('request_log_seq'),
    timestamp TEXT NOT NULL,
    entity TEXT NOT NULL,
    metric_kind TEXT NOT NULL,
    timeframe TEXT NOT NULL,
    geo TEXT NOT NULL,
    status TEXT NOT NULL,
    response_time_ms BIGINT NOT NULL,
    error_message TEXT,
    cache_hit BOOLEAN NOT NULL DEFAULT FALSE
);
"#,
    },
    Migration {
        version: "0002_indexes",
        sql: r#"
CREATE INDEX IF NOT EXISTS idx_trend_cache_entity_kind ON trend_cache(entity, metric_kind);
CREATE INDEX IF NOT EXISTS idx_request_log_seq ON request_log(seq);
"#,
    },
];

pub fn apply_migrations(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    )?;

    for migration in MIGRATIONS {
        let applied: i64 = connection.query_row(
            "SELECT COUNT(*) FROM schema_migrations WHERE version = ?",
            [migration.version],
            |row| row.get(0),
        )?;

        if applied == 0 {
            connection.execute_batch(migration.sql)?;
            connection.execute(
                "INSERT INTO schema_migrations (version) VALUES (?)",
                [migration.version],
            )?;
            tracing::debug!(version = migration.version, "applied warehouse migration");
        }
    }

    Ok(())
}
