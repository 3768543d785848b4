//! Schema setup.

use rusqlite::Connection;

use crate::error::{StoreError, StoreResult};

pub(crate) fn run_migrations(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            filename TEXT NOT NULL,
            file_path TEXT NOT NULL,
            file_size INTEGER NOT NULL DEFAULT 0,
            pages INTEGER NOT NULL DEFAULT 0,
            upload_time TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            chunk_count INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_documents_status_upload
            ON documents(status, upload_time);
        "#,
    )
    .map_err(|e| StoreError::Migration {
        message: e.to_string(),
    })
}
