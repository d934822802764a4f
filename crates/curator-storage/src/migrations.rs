//! Database schema migrations.
//!
//! Applies the initial schema: works, work_collections, file_sets, binaries,
//! relations, versions, index_documents and schema_migrations.

use rusqlite::Connection;
use tracing::info;

use curator_core::error::CuratorError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), CuratorError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| CuratorError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| CuratorError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }

    Ok(())
}

/// Version 1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<(), CuratorError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS works (
            id              TEXT PRIMARY KEY NOT NULL,
            thumbnail_id    TEXT,
            created_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        CREATE TABLE IF NOT EXISTS work_collections (
            work_id         TEXT NOT NULL REFERENCES works(id) ON DELETE CASCADE,
            collection_id   TEXT NOT NULL,
            PRIMARY KEY (work_id, collection_id)
        );

        CREATE TABLE IF NOT EXISTS file_sets (
            id              TEXT PRIMARY KEY NOT NULL,
            parent_id       TEXT,
            characteristics TEXT NOT NULL DEFAULT '{}',
            updated_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_file_sets_parent
            ON file_sets (parent_id);

        -- Binaries are written on attach; a relation row only points at one
        -- after the owning file set is persisted.
        CREATE TABLE IF NOT EXISTS binaries (
            id              TEXT PRIMARY KEY NOT NULL,
            file_set_id     TEXT NOT NULL,
            relation        TEXT NOT NULL,
            mime_type       TEXT,
            original_name   TEXT NOT NULL,
            size            INTEGER NOT NULL,
            content         BLOB NOT NULL,
            updated_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        CREATE TABLE IF NOT EXISTS relations (
            file_set_id     TEXT NOT NULL REFERENCES file_sets(id) ON DELETE CASCADE,
            name            TEXT NOT NULL,
            binary_id       TEXT NOT NULL REFERENCES binaries(id),
            PRIMARY KEY (file_set_id, name)
        );

        CREATE TABLE IF NOT EXISTS versions (
            id              TEXT PRIMARY KEY NOT NULL,
            binary_id       TEXT NOT NULL REFERENCES binaries(id),
            seq             INTEGER NOT NULL,
            relation        TEXT NOT NULL,
            actor           TEXT NOT NULL,
            mime_type       TEXT,
            original_name   TEXT NOT NULL,
            content         BLOB NOT NULL,
            created_at      TEXT NOT NULL,
            UNIQUE (binary_id, seq)
        );

        CREATE TABLE IF NOT EXISTS index_documents (
            kind            TEXT NOT NULL
                            CHECK (kind IN ('file_set', 'work', 'collection')),
            id              TEXT NOT NULL,
            fields          TEXT NOT NULL DEFAULT 'null',
            publish_count   INTEGER NOT NULL DEFAULT 1,
            published_at    TEXT NOT NULL,
            PRIMARY KEY (kind, id)
        );

        INSERT INTO schema_migrations (version, name) VALUES (1, 'initial_schema');
        ",
    )
    .map_err(|e| CuratorError::Storage(format!("Migration v1 failed: {}", e)))?;

    Ok(())
}
