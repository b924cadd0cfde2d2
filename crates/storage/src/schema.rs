use rusqlite::Connection;

use crate::error::StorageError;

pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
    ",
    )?;
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

// AUTOINCREMENT keeps handles of deleted elements from being handed out again.
const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);
INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, unixepoch());

CREATE TABLE IF NOT EXISTS handles (
    handle INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL CHECK (kind IN ('collection', 'network', 'node', 'edge')),
    parent INTEGER,
    name TEXT,
    source INTEGER,
    target INTEGER
);
CREATE INDEX IF NOT EXISTS idx_handles_parent ON handles (parent, kind);

CREATE TABLE IF NOT EXISTS attr_columns (
    position INTEGER PRIMARY KEY AUTOINCREMENT,
    network INTEGER NOT NULL,
    table_kind TEXT NOT NULL CHECK (table_kind IN ('network', 'node', 'edge')),
    name TEXT NOT NULL,
    column_type TEXT NOT NULL,
    UNIQUE (network, table_kind, name)
);

CREATE TABLE IF NOT EXISTS attr_cells (
    network INTEGER NOT NULL,
    table_kind TEXT NOT NULL,
    row_handle INTEGER NOT NULL,
    name TEXT NOT NULL,
    value BLOB NOT NULL,
    PRIMARY KEY (network, table_kind, row_handle, name)
);
CREATE INDEX IF NOT EXISTS idx_attr_cells_column ON attr_cells (network, table_kind, name);
";
