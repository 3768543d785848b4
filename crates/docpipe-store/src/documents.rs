//! Document record queries.
//!
//! Status writes are guarded in SQL so a record only ever moves forward
//! (`pending -> processing -> completed | failed`). Each guarded update
//! returns whether a row changed.

use chrono::{DateTime, SecondsFormat, Utc};
use docpipe_models::{DocumentId, DocumentRecord, DocumentStatus};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::{DocumentSession, DocumentTransaction};
use crate::error::StoreResult;

const COLUMNS: &str = "id, filename, file_path, file_size, pages, upload_time, status, chunk_count";

/// Fixed-width UTC timestamps so text comparison matches time order.
fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error(index: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, msg.into())
}

fn from_row(row: &Row<'_>) -> rusqlite::Result<DocumentRecord> {
    let upload_time: String = row.get(5)?;
    let upload_time = DateTime::parse_from_rfc3339(&upload_time)
        .map_err(|e| conversion_error(5, e.to_string()))?
        .with_timezone(&Utc);
    let status: String = row.get(6)?;
    let status = status
        .parse::<DocumentStatus>()
        .map_err(|e| conversion_error(6, e))?;

    Ok(DocumentRecord {
        id: DocumentId::from_string(row.get::<_, String>(0)?),
        filename: row.get(1)?,
        file_path: row.get(2)?,
        file_size: row.get::<_, i64>(3)? as u64,
        pages: row.get::<_, i64>(4)? as u32,
        upload_time,
        status,
        chunk_count: row.get::<_, i64>(7)? as u32,
    })
}

fn get(conn: &Connection, id: &DocumentId) -> StoreResult<Option<DocumentRecord>> {
    let record = conn
        .query_row(
            &format!("SELECT {} FROM documents WHERE id = ?1", COLUMNS),
            params![id.as_str()],
            from_row,
        )
        .optional()?;
    Ok(record)
}

impl DocumentSession {
    pub fn insert(&self, record: &DocumentRecord) -> StoreResult<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO documents ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                COLUMNS
            ),
            params![
                record.id.as_str(),
                record.filename,
                record.file_path,
                record.file_size as i64,
                record.pages as i64,
                format_time(&record.upload_time),
                record.status.as_str(),
                record.chunk_count as i64,
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, id: &DocumentId) -> StoreResult<Option<DocumentRecord>> {
        get(&self.conn, id)
    }

    /// `pending -> processing`.
    pub fn mark_processing(&self, id: &DocumentId) -> StoreResult<bool> {
        let rows = self.conn.execute(
            "UPDATE documents SET status = 'processing' WHERE id = ?1 AND status = 'pending'",
            params![id.as_str()],
        )?;
        Ok(rows > 0)
    }

    /// `processing -> completed`, recording extraction results.
    pub fn mark_completed(&self, id: &DocumentId, pages: u32, chunk_count: u32) -> StoreResult<bool> {
        let rows = self.conn.execute(
            "UPDATE documents SET status = 'completed', pages = ?2, chunk_count = ?3 \
             WHERE id = ?1 AND status = 'processing'",
            params![id.as_str(), pages as i64, chunk_count as i64],
        )?;
        Ok(rows > 0)
    }

    /// `pending | processing -> failed`. Completed records are left alone.
    pub fn mark_failed(&self, id: &DocumentId) -> StoreResult<bool> {
        let rows = self.conn.execute(
            "UPDATE documents SET status = 'failed' \
             WHERE id = ?1 AND status IN ('pending', 'processing')",
            params![id.as_str()],
        )?;
        Ok(rows > 0)
    }

    /// Records with the given status, oldest upload first.
    pub fn list_by_status(&self, status: DocumentStatus) -> StoreResult<Vec<DocumentRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM documents WHERE status = ?1 ORDER BY upload_time",
            COLUMNS
        ))?;
        let records = stmt
            .query_map(params![status.as_str()], from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }
}

impl DocumentTransaction<'_> {
    /// Failed records uploaded strictly before `cutoff`.
    pub fn expired_failed(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<DocumentRecord>> {
        let mut stmt = self.tx.prepare(&format!(
            "SELECT {} FROM documents WHERE status = 'failed' AND upload_time < ?1 \
             ORDER BY upload_time",
            COLUMNS
        ))?;
        let records = stmt
            .query_map(params![format_time(&cutoff)], from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// Delete a record if it is still failed. Returns false if another
    /// actor already removed or changed it.
    pub fn delete_failed(&self, id: &DocumentId) -> StoreResult<bool> {
        let rows = self.tx.execute(
            "DELETE FROM documents WHERE id = ?1 AND status = 'failed'",
            params![id.as_str()],
        )?;
        Ok(rows > 0)
    }

    pub fn get(&self, id: &DocumentId) -> StoreResult<Option<DocumentRecord>> {
        get(&self.tx, id)
    }
}
