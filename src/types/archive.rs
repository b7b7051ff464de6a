//! Archive metadata

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::identifiers::{ArchiveId, SessionId};

/// Archive status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveStatus {
    /// Recorded, not started
    Pending,
    /// Snapshot/compress/relocate in progress
    InProgress,
    /// Durably written; live directory may be deleted
    Completed,
    /// Failed; live directory untouched
    Failed,
}

/// Archive of one session's working directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveMetadata {
    /// Identity
    pub id: ArchiveId,
    /// Archived session
    pub session_id: SessionId,
    /// Status
    pub status: ArchiveStatus,
    /// Directory that was archived
    pub source_path: PathBuf,
    /// Destination archive file
    pub archive_path: Option<PathBuf>,
    /// Compression format
    pub compression: String,
    /// Uncompressed size
    pub original_size_bytes: u64,
    /// Compressed size
    pub archive_size_bytes: u64,
    /// Number of files archived
    pub file_count: u64,
    /// Failure description
    pub error_message: Option<String>,
    /// Whether the live directory has been deleted
    pub source_deleted: bool,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Completion time
    pub completed_at: Option<DateTime<Utc>>,
}
