//! Local JSON archive of statistic batches
//!
//! The archive is a single JSON array of flat objects. Each append reads the
//! existing array, extends it and rewrites the file through a temporary file
//! and an atomic rename. Missing or corrupt content counts as an empty
//! history.

use crate::models::{ArchiveEntry, StatRecord};
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

/// Default archive file name
pub const DEFAULT_ARCHIVE_PATH: &str = "network_metrics.json";

/// Failures persisting the archive
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize archive: {0}")]
    Json(#[from] serde_json::Error),
}

/// Append-only JSON archive file
pub struct JsonArchive {
    path: PathBuf,
    /// Serializes read-modify-write cycles
    lock: Mutex<()>,
}

impl JsonArchive {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a batch, returning the number of entries now in the archive
    pub fn append(&self, records: &[StatRecord]) -> Result<usize, ArchiveError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut entries = self.read_existing();
        for record in records {
            entries.push(serde_json::to_value(ArchiveEntry::from(record))?);
        }

        self.write_entries(&entries)?;
        debug!(
            path = %self.path.display(),
            appended = records.len(),
            total = entries.len(),
            "Batch archived"
        );

        Ok(entries.len())
    }

    /// Entries currently stored; unknown objects are skipped
    pub fn load(&self) -> Vec<ArchiveEntry> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        self.read_existing()
            .into_iter()
            .filter_map(|value| serde_json::from_value(value).ok())
            .collect()
    }

    /// Raw archive content, or an empty history if missing or unreadable
    fn read_existing(&self) -> Vec<serde_json::Value> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Archive unreadable, starting empty");
                return Vec::new();
            }
        };

        if data.iter().all(u8::is_ascii_whitespace) {
            return Vec::new();
        }

        match serde_json::from_slice(&data) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Archive corrupt, starting empty");
                Vec::new()
            }
        }
    }

    fn write_entries(&self, entries: &[serde_json::Value]) -> Result<(), ArchiveError> {
        let io_err = |source: std::io::Error| ArchiveError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let mut json = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut json, formatter);
        entries.serialize(&mut serializer)?;

        // Write atomically using temp file
        let temp_path = self.path.with_extension("tmp");
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(io_err)?;
        file.write_all(&json).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;

        fs::rename(&temp_path, &self.path).map_err(io_err)?;
        Ok(())
    }
}

impl std::fmt::Debug for JsonArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonArchive")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl Default for JsonArchive {
    fn default() -> Self {
        Self::new(DEFAULT_ARCHIVE_PATH)
    }
}
