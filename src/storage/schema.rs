//! Schema contract, connection pragmas and the synchronous register calls.
//!
//! The DDL lives in `schema/schema.sql` and is embedded at build time. A
//! replacement file can be supplied at open; it must create the same three
//! tables.

use rusqlite::{params, Connection, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Embedded schema DDL.
pub const SCHEMA_SQL: &str = include_str!("../../schema/schema.sql");

/// Tables the write pipeline depends on.
pub const REQUIRED_TABLES: [&str; 3] = ["runs", "frames", "detections"];

/// Error type for schema loading and application.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Failed to read schema file {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to apply schema: {0}")]
    Apply(#[from] rusqlite::Error),

    #[error("Schema does not define required table '{0}'")]
    MissingTable(&'static str),
}

/// Load schema DDL from `path`, or the embedded DDL when no path is given.
pub fn load_schema(path: Option<&Path>) -> Result<String, SchemaError> {
    match path {
        Some(path) => std::fs::read_to_string(path).map_err(|source| SchemaError::Unreadable {
            path: path.to_path_buf(),
            source,
        }),
        None => Ok(SCHEMA_SQL.to_string()),
    }
}

/// Apply writer pragmas: WAL journal, NORMAL sync, enforced foreign keys.
///
/// A crash can lose the transaction in flight but never corrupts committed
/// batches.
pub fn apply_pragmas(conn: &Connection, busy_timeout: Duration) -> Result<(), rusqlite::Error> {
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        tracing::warn!(journal_mode = %mode, "SQLite refused WAL journal mode");
    }
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", true)?;
    conn.busy_timeout(busy_timeout)?;
    Ok(())
}

/// Apply pragmas for pooled read connections.
pub fn apply_reader_pragmas(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.pragma_update(None, "query_only", true)?;
    conn.pragma_update(None, "foreign_keys", true)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(())
}

/// True when any of the [`REQUIRED_TABLES`] is missing.
pub fn needs_schema(conn: &Connection) -> Result<bool, rusqlite::Error> {
    for table in REQUIRED_TABLES {
        if !table_exists(conn, table)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Execute the schema DDL and check that the required tables now exist.
///
/// Runs in one transaction: DDL that fails, or that leaves a required table
/// out, is rolled back completely. The DDL must not manage transactions
/// itself. It only uses `IF NOT EXISTS`, so running it on an initialized
/// database is a no-op.
pub fn initialize_schema(conn: &Connection, ddl: &str) -> Result<(), SchemaError> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(ddl)?;
    verify_schema(&tx)?;
    tx.commit()?;
    Ok(())
}

/// Check that every table in [`REQUIRED_TABLES`] exists.
pub fn verify_schema(conn: &Connection) -> Result<(), SchemaError> {
    for table in REQUIRED_TABLES {
        if !table_exists(conn, table)? {
            return Err(SchemaError::MissingTable(table));
        }
    }
    Ok(())
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool, rusqlite::Error> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Insert a new run row and return its engine-assigned id.
pub fn begin_run(conn: &Connection) -> Result<i64, rusqlite::Error> {
    conn.execute("INSERT INTO runs DEFAULT VALUES", [])?;
    Ok(conn.last_insert_rowid())
}

/// Insert a frame row for `run_id`.
///
/// The run's own `frame_width`/`frame_height` are filled from the first frame
/// recorded for it, in the same transaction.
pub fn record_frame(
    conn: &mut Connection,
    run_id: i64,
    frame_id: i64,
    width: u32,
    height: u32,
) -> Result<(), rusqlite::Error> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    tx.execute(
        "INSERT INTO frames (run_id, frame_id, width, height) VALUES (?1, ?2, ?3, ?4)",
        params![run_id, frame_id, i64::from(width), i64::from(height)],
    )?;
    tx.execute(
        "UPDATE runs SET frame_width = ?2, frame_height = ?3
         WHERE run_id = ?1 AND frame_width IS NULL",
        params![run_id, i64::from(width), i64::from(height)],
    )?;
    tx.commit()
}
