//! Database migrations

use crate::error::{Error, Result};
use rusqlite::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn)?;
    if version > CURRENT_VERSION {
        return Err(Error::Database(format!(
            "schema version {version} is newer than supported version {CURRENT_VERSION}"
        )));
    }

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get::<_, i32>(0).map(|value| value != 0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

/// Apply a list of statements inside one transaction
fn apply(conn: &Connection, statements: &[&str]) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    for stmt in statements {
        tx.execute(stmt, [])?;
    }
    tx.commit()?;
    Ok(())
}

/// Migration to version 1: file records, operation queue, conflicts, folders
fn migrate_v1(conn: &Connection) -> Result<()> {
    apply(
        conn,
        &[
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )",
            "CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS sync_folders (
                id TEXT PRIMARY KEY,
                device_id TEXT NOT NULL,
                local_root TEXT NOT NULL,
                remote_root TEXT NOT NULL,
                sync_type TEXT NOT NULL,
                auto_sync INTEGER NOT NULL DEFAULT 1,
                conflict_policy TEXT NOT NULL,
                exclude_patterns TEXT NOT NULL DEFAULT '[]',
                last_sync_at INTEGER,
                status TEXT NOT NULL DEFAULT 'idle'
            )",
            "CREATE TABLE IF NOT EXISTS file_records (
                folder_id TEXT NOT NULL,
                relative_path TEXT NOT NULL,
                size INTEGER NOT NULL,
                content_hash TEXT NOT NULL,
                is_directory INTEGER NOT NULL DEFAULT 0,
                modified_at INTEGER NOT NULL,
                sync_status TEXT NOT NULL,
                version INTEGER NOT NULL DEFAULT 0,
                device_id TEXT NOT NULL,
                vector_clock TEXT NOT NULL DEFAULT '{}',
                PRIMARY KEY (folder_id, relative_path)
            )",
            "CREATE INDEX IF NOT EXISTS idx_file_records_status ON file_records(folder_id, sync_status)",
            "CREATE TABLE IF NOT EXISTS pending_operations (
                id TEXT PRIMARY KEY,
                folder_id TEXT NOT NULL,
                operation_type TEXT NOT NULL,
                file_path TEXT NOT NULL,
                local_file_path TEXT,
                destination_path TEXT,
                status TEXT NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                max_retries INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                next_attempt_at INTEGER,
                last_retry_at INTEGER,
                completed_at INTEGER,
                error_message TEXT
            )",
            "CREATE INDEX IF NOT EXISTS idx_pending_operations_created ON pending_operations(created_at)",
            "CREATE INDEX IF NOT EXISTS idx_pending_operations_status ON pending_operations(status)",
            // One active operation per path
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_pending_operations_active_path
                ON pending_operations(folder_id, file_path)
                WHERE status IN ('pending', 'retrying')",
            "CREATE TABLE IF NOT EXISTS conflicts (
                id TEXT PRIMARY KEY,
                folder_id TEXT NOT NULL,
                relative_path TEXT NOT NULL,
                local_modified_at INTEGER NOT NULL,
                remote_modified_at INTEGER NOT NULL,
                local_hash TEXT NOT NULL,
                remote_hash TEXT NOT NULL,
                reason TEXT NOT NULL,
                detected_at INTEGER NOT NULL,
                resolution TEXT,
                resolved_at INTEGER
            )",
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_conflicts_open_path
                ON conflicts(folder_id, relative_path)
                WHERE resolved_at IS NULL",
            "CREATE INDEX IF NOT EXISTS idx_conflicts_resolved_at ON conflicts(resolved_at DESC)",
            "INSERT INTO schema_version (version) VALUES (1)",
        ],
    )?;

    tracing::info!("Migrated database to version 1");
    Ok(())
}

/// Migration to version 2: resumable chunked upload sessions
fn migrate_v2(conn: &Connection) -> Result<()> {
    apply(
        conn,
        &[
            "CREATE TABLE IF NOT EXISTS upload_sessions (
                folder_id TEXT NOT NULL,
                relative_path TEXT NOT NULL,
                upload_id TEXT NOT NULL,
                total_size INTEGER NOT NULL,
                content_hash TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (folder_id, relative_path)
            )",
            "INSERT INTO schema_version (version) VALUES (2)",
        ],
    )?;

    tracing::info!("Migrated database to version {CURRENT_VERSION}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    fn table_exists(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?)",
            [name],
            |row| row.get::<_, i32>(0),
        )
        .unwrap()
            != 0
    }

    #[test]
    fn test_migrations() {
        let conn = setup();
        run(&conn).unwrap();

        let version = get_version(&conn).unwrap();
        assert_eq!(version, CURRENT_VERSION);
        for table in [
            "file_records",
            "pending_operations",
            "conflicts",
            "sync_folders",
            "upload_sessions",
        ] {
            assert!(table_exists(&conn, table), "missing table {table}");
        }
    }

    #[test]
    fn test_migrations_idempotent() {
        let conn = setup();
        run(&conn).unwrap();
        run(&conn).unwrap(); // Should not fail

        let version = get_version(&conn).unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn newer_schema_is_refused() {
        let conn = setup();
        run(&conn).unwrap();
        conn.execute("INSERT INTO schema_version (version) VALUES (99)", [])
            .unwrap();

        assert!(matches!(run(&conn), Err(Error::Database(_))));
    }

    #[test]
    fn active_path_index_rejects_duplicates() {
        let conn = setup();
        run(&conn).unwrap();

        let insert = "INSERT INTO pending_operations
            (id, folder_id, operation_type, file_path, status, max_retries, created_at)
            VALUES (?, 'docs', 'upload', 'a.txt', ?, 3, 0)";
        conn.execute(insert, ["op-1", "pending"]).unwrap();
        assert!(conn.execute(insert, ["op-2", "retrying"]).is_err());
        // Terminal rows do not count
        conn.execute(insert, ["op-3", "completed"]).unwrap();
    }
}
