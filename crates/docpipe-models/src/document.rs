//! Document records and extraction metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for an uploaded document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub String);

impl DocumentId {
    /// Generate a new random document ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Processing status of a document record.
///
/// Moves forward only: `pending -> processing -> completed | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DocumentStatus::Completed | DocumentStatus::Failed)
    }

    /// Whether `self -> next` keeps the status monotonic.
    pub fn can_transition_to(&self, next: DocumentStatus) -> bool {
        use DocumentStatus::*;
        matches!(
            (self, next),
            (Pending, Processing) | (Pending, Failed) | (Processing, Completed) | (Processing, Failed)
        )
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DocumentStatus::Pending),
            "processing" => Ok(DocumentStatus::Processing),
            "completed" => Ok(DocumentStatus::Completed),
            "failed" => Ok(DocumentStatus::Failed),
            other => Err(format!("unknown document status: {}", other)),
        }
    }
}

/// Persisted record of an uploaded document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: DocumentId,
    /// Original file name as uploaded
    pub filename: String,
    /// Stored location under the uploads root
    pub file_path: String,
    /// Size in bytes
    pub file_size: u64,
    pub pages: u32,
    pub chunk_count: u32,
    pub status: DocumentStatus,
    pub upload_time: DateTime<Utc>,
}

impl DocumentRecord {
    /// Create a new pending record.
    pub fn new(
        id: DocumentId,
        filename: impl Into<String>,
        file_path: impl Into<String>,
        file_size: u64,
    ) -> Self {
        Self {
            id,
            filename: filename.into(),
            file_path: file_path.into(),
            file_size,
            pages: 0,
            chunk_count: 0,
            status: DocumentStatus::Pending,
            upload_time: Utc::now(),
        }
    }

    /// Override the upload time.
    pub fn uploaded_at(mut self, upload_time: DateTime<Utc>) -> Self {
        self.upload_time = upload_time;
        self
    }

    /// Override the status.
    pub fn with_status(mut self, status: DocumentStatus) -> Self {
        self.status = status;
        self
    }
}

/// Descriptive metadata read from a document. Missing fields are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub pages: u32,
    pub title: String,
    pub author: String,
    pub subject: String,
    pub keywords: String,
}

/// Text of a single page (1-indexed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageText {
    pub page_number: u32,
    pub text: String,
}
