//! File-backed collaborators used by the CLI.
//!
//! - [`JsonlAuditLog`]: one JSON object per line, append-only, flushed on
//!   every write.
//! - [`JsonFileMustDeleteList`]: a JSON array loaded on open and rewritten
//!   atomically (temp file + rename) on every upsert.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{debug, trace};

use super::memory::upsert_entry;
use super::{AuditSink, MustDeleteStore, StoreError};
use crate::candidate::{AttemptRecord, MustDeleteEntry};

/// Audit log appending JSON lines to a sink.
pub struct JsonlAuditLog {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl JsonlAuditLog {
    /// Append to the file at `path`, creating it and its parent directory.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            writer: Mutex::new(Box::new(file)),
        })
    }

    /// Write to an arbitrary sink (for testing).
    pub fn from_writer(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

#[async_trait]
impl AuditSink for JsonlAuditLog {
    async fn log_unsubscribe_attempt(&self, record: &AttemptRecord) -> Result<(), StoreError> {
        let line = serde_json::to_string(record)?;
        let mut writer = self.writer.lock().map_err(|_| StoreError::Poisoned)?;
        writeln!(writer, "{line}")?;
        writer.flush()?;
        trace!(
            sender = %record.sender,
            strategy = %record.strategy_name,
            "attempt logged"
        );
        Ok(())
    }
}

/// Must-delete worklist persisted as a JSON array.
#[derive(Debug)]
pub struct JsonFileMustDeleteList {
    path: PathBuf,
    entries: Mutex<Vec<MustDeleteEntry>>,
}

impl JsonFileMustDeleteList {
    /// Load the list at `path`; a missing file is an empty list.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries: Vec<MustDeleteEntry> = match std::fs::read_to_string(&path) {
            Ok(contents) if contents.trim().is_empty() => Vec::new(),
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), count = entries.len(), "must-delete list loaded");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Current entries in insertion order.
    pub fn entries(&self) -> Vec<MustDeleteEntry> {
        match self.entries.lock() {
            Ok(entries) => entries.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn persist(&self, entries: &[MustDeleteEntry]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(entries)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[async_trait]
impl MustDeleteStore for JsonFileMustDeleteList {
    async fn add_to_must_delete(&self, sender: &str, reason: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        // Memory only changes once the file write has succeeded.
        let mut next = entries.clone();
        upsert_entry(&mut next, sender, reason);
        self.persist(&next)?;
        *entries = next;
        Ok(())
    }
}
