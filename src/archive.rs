//! Compress-and-relocate of session working directories
//!
//! Archiving runs `pending -> in_progress -> completed | failed`. The tarball
//! is written under a temporary name, synced, then renamed into place; only
//! after that rename does the metadata become `completed`. Deleting the live
//! directory is a separate call that refuses anything but `completed`.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use flate2::Compression;
use flate2::write::GzEncoder;

use crate::error::{EngineError, Result};
use crate::store::SessionStore;
use crate::types::archive::{ArchiveMetadata, ArchiveStatus};
use crate::types::identifiers::ArchiveId;
use crate::types::session::Session;

/// Compression label stored on metadata
pub const COMPRESSION: &str = "tar.gz";

/// What a finished archive contains
#[derive(Debug, Clone, Copy, Default)]
struct ArchiveStats {
    file_count: u64,
    original_size_bytes: u64,
    archive_size_bytes: u64,
}

/// Archives working directories into `archive_root`
pub struct ArchiveManager {
    store: Arc<dyn SessionStore>,
    archive_root: PathBuf,
}

impl ArchiveManager {
    /// Create a manager writing archives under `archive_root`
    pub fn new(store: Arc<dyn SessionStore>, archive_root: impl Into<PathBuf>) -> Self {
        Self {
            store,
            archive_root: archive_root.into(),
        }
    }

    /// Archive a session's working directory
    ///
    /// The returned metadata is `completed` or `failed`; on failure the
    /// live directory is untouched and the metadata carries the reason.
    ///
    /// # Errors
    /// Returns error only if the metadata itself cannot be stored
    pub async fn archive(&self, session: &Session) -> Result<ArchiveMetadata> {
        let mut metadata = ArchiveMetadata {
            id: ArchiveId::generate(),
            session_id: session.id.clone(),
            status: ArchiveStatus::Pending,
            source_path: session.working_directory.clone(),
            archive_path: None,
            compression: COMPRESSION.to_string(),
            original_size_bytes: 0,
            archive_size_bytes: 0,
            file_count: 0,
            error_message: None,
            source_deleted: false,
            created_at: Utc::now(),
            completed_at: None,
        };
        self.store.save_archive(&metadata).await?;

        metadata.status = ArchiveStatus::InProgress;
        self.store.save_archive(&metadata).await?;

        let file_name = format!(
            "{}-{}.tar.gz",
            session.id,
            Utc::now().format("%Y%m%dT%H%M%S%.3fZ")
        );
        let destination = self.archive_root.join(file_name);
        let source = metadata.source_path.clone();
        let target = destination.clone();

        let written = tokio::task::spawn_blocking(move || write_archive(&source, &target))
            .await
            .map_err(|e| EngineError::archive(format!("archive task failed: {e}")))
            .and_then(|r| r);

        match written {
            Ok(stats) => {
                metadata.status = ArchiveStatus::Completed;
                metadata.archive_path = Some(destination);
                metadata.file_count = stats.file_count;
                metadata.original_size_bytes = stats.original_size_bytes;
                metadata.archive_size_bytes = stats.archive_size_bytes;
                metadata.completed_at = Some(Utc::now());
                log::info!(
                    "[{}] archived {} file(s), {} -> {} bytes",
                    session.id,
                    stats.file_count,
                    stats.original_size_bytes,
                    stats.archive_size_bytes
                );
            }
            Err(e) => {
                log::error!("[{}] archive failed: {e}", session.id);
                metadata.status = ArchiveStatus::Failed;
                metadata.error_message = Some(e.to_string());
            }
        }

        self.store.save_archive(&metadata).await?;
        Ok(metadata)
    }

    /// Delete the live working directory of a completed archive
    ///
    /// The stored metadata is re-read; the caller's copy is not trusted.
    ///
    /// # Errors
    /// Returns `EngineError::Archive` unless the archive is `completed` and
    /// its file exists
    pub async fn purge_working_directory(&self, archive: &ArchiveMetadata) -> Result<ArchiveMetadata> {
        let mut stored = self.store.get_archive(&archive.id).await?;
        if stored.status != ArchiveStatus::Completed {
            return Err(EngineError::archive(format!(
                "refusing to delete {}: archive {} is {:?}",
                stored.source_path.display(),
                stored.id,
                stored.status
            )));
        }
        let durable = match &stored.archive_path {
            Some(path) => tokio::fs::try_exists(path).await.unwrap_or(false),
            None => false,
        };
        if !durable {
            return Err(EngineError::archive(format!(
                "refusing to delete {}: archive file is missing",
                stored.source_path.display()
            )));
        }
        if stored.source_deleted {
            return Ok(stored);
        }

        match tokio::fs::remove_dir_all(&stored.source_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(EngineError::archive(format!(
                    "failed to delete {}: {e}",
                    stored.source_path.display()
                )));
            }
        }
        stored.source_deleted = true;
        self.store.save_archive(&stored).await?;
        log::info!(
            "[{}] deleted working directory {}",
            stored.session_id,
            stored.source_path.display()
        );
        Ok(stored)
    }
}

fn write_archive(source: &Path, destination: &Path) -> Result<ArchiveStats> {
    if !source.is_dir() {
        return Err(EngineError::archive(format!(
            "working directory {} does not exist",
            source.display()
        )));
    }
    let parent = destination
        .parent()
        .ok_or_else(|| EngineError::archive("archive destination has no parent"))?;
    std::fs::create_dir_all(parent)
        .map_err(|e| EngineError::archive(format!("cannot create {}: {e}", parent.display())))?;

    let partial = destination.with_extension("partial");
    let result = write_tarball(source, &partial).and_then(|mut stats| {
        std::fs::rename(&partial, destination)?;
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
        stats.archive_size_bytes = std::fs::metadata(destination)?.len();
        Ok(stats)
    });

    result.map_err(|e| {
        let _ = std::fs::remove_file(&partial);
        EngineError::archive(format!("writing {} failed: {e}", destination.display()))
    })
}

fn write_tarball(source: &Path, partial: &Path) -> io::Result<ArchiveStats> {
    let file = File::create(partial)?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    // Links are stored as links; their targets may live outside the tree
    builder.follow_symlinks(false);
    let mut stats = ArchiveStats::default();

    for entry in walkdir::WalkDir::new(source).sort_by_file_name() {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(io::Error::other)?;
        if relative.as_os_str().is_empty() {
            continue;
        }
        let file_type = entry.file_type();
        if file_type.is_dir() {
            builder.append_dir(relative, entry.path())?;
        } else if file_type.is_file() {
            stats.file_count += 1;
            stats.original_size_bytes += entry.metadata().map_err(io::Error::other)?.len();
            builder.append_path_with_name(entry.path(), relative)?;
        } else if file_type.is_symlink() {
            stats.file_count += 1;
            builder.append_path_with_name(entry.path(), relative)?;
        } else {
            // Anything left out would be lost when the directory is purged
            return Err(io::Error::other(format!(
                "cannot archive special file {}",
                relative.display()
            )));
        }
    }

    let encoder = builder.into_inner()?;
    let file = encoder.finish()?;
    file.sync_all()?;
    Ok(stats)
}

/// Copy a directory tree, returning the number of files copied
///
/// # Errors
/// Returns `EngineError::Io` if any entry cannot be read or written
pub async fn copy_tree(source: PathBuf, destination: PathBuf) -> Result<u64> {
    tokio::task::spawn_blocking(move || -> Result<u64> {
        let mut copied = 0;
        for entry in walkdir::WalkDir::new(&source) {
            let entry = entry.map_err(|e| EngineError::Io(io::Error::other(e)))?;
            let relative = entry
                .path()
                .strip_prefix(&source)
                .map_err(|e| EngineError::Io(io::Error::other(e)))?;
            let target = destination.join(relative);
            if entry.file_type().is_dir() {
                std::fs::create_dir_all(&target)?;
            } else if entry.file_type().is_file() {
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::copy(entry.path(), &target)?;
                copied += 1;
            } else if entry.file_type().is_symlink() {
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                copy_link(entry.path(), &target)?;
                copied += 1;
            }
        }
        Ok(copied)
    })
    .await
    .map_err(|e| EngineError::Io(io::Error::other(e)))?
}

#[cfg(unix)]
fn copy_link(link: &Path, target: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(std::fs::read_link(link)?, target)
}

#[cfg(not(unix))]
fn copy_link(link: &Path, target: &Path) -> io::Result<()> {
    // Without portable links, copy what the link points at
    std::fs::copy(link, target).map(|_| ())
}
