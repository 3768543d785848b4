use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::migrations;

/// Handle to the document database. Cheap to clone; holds no connection.
#[derive(Debug, Clone)]
pub struct DocumentDb {
    path: PathBuf,
}

impl DocumentDb {
    /// Open or create the database at the given path and migrate it.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = connect(&path)?;
        // WAL lets the sweeper and processing sessions work side by side.
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        migrations::run_migrations(&conn)?;

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a session with its own connection.
    pub fn session(&self) -> StoreResult<DocumentSession> {
        debug!("Opening document session on {}", self.path.display());
        Ok(DocumentSession {
            conn: connect(&self.path)?,
        })
    }
}

fn connect(path: &Path) -> StoreResult<Connection> {
    let conn = Connection::open(path).map_err(StoreError::Connection)?;
    conn.busy_timeout(Duration::from_secs(5))
        .map_err(StoreError::Connection)?;
    Ok(conn)
}

/// One job's connection to the document database.
pub struct DocumentSession {
    pub(crate) conn: Connection,
}

impl DocumentSession {
    /// Begin a write transaction, taking the write lock up front. Dropping
    /// it without [`DocumentTransaction::commit`] rolls back.
    pub fn transaction(&mut self) -> StoreResult<DocumentTransaction<'_>> {
        Ok(DocumentTransaction {
            tx: self
                .conn
                .transaction_with_behavior(TransactionBehavior::Immediate)?,
        })
    }
}

/// Batch of writes committed together.
pub struct DocumentTransaction<'a> {
    pub(crate) tx: Transaction<'a>,
}

impl DocumentTransaction<'_> {
    pub fn commit(self) -> StoreResult<()> {
        self.tx.commit()?;
        Ok(())
    }
}
