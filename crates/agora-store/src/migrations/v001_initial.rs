//! v001 -- Initial schema creation.
//!
//! Documents of every collection share one table; bodies are JSON text.
//! `store_meta.revision` is the store-wide commit counter.

use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    collection TEXT NOT NULL,
    id         TEXT NOT NULL,
    body       TEXT NOT NULL,                 -- JSON object
    revision   INTEGER NOT NULL,              -- commit that last touched it
    updated_at TEXT NOT NULL,                 -- RFC-3339

    PRIMARY KEY (collection, id)
);

CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection);

CREATE TABLE IF NOT EXISTS store_meta (
    key   TEXT PRIMARY KEY NOT NULL,
    value INTEGER NOT NULL
);

INSERT OR IGNORE INTO store_meta (key, value) VALUES ('revision', 0);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
