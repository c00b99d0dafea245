//! In-memory collaborators for tests and dry runs.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use super::{AccountStore, AuditSink, MailAccount, MustDeleteStore, StoreError};
use crate::candidate::{AttemptRecord, MustDeleteEntry};

/// Audit trail kept in a vector.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    records: Mutex<Vec<AttemptRecord>>,
}

impl MemoryAuditLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every record written so far.
    pub fn records(&self) -> Vec<AttemptRecord> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl AuditSink for MemoryAuditLog {
    async fn log_unsubscribe_attempt(&self, record: &AttemptRecord) -> Result<(), StoreError> {
        self.records
            .lock()
            .map_err(|_| StoreError::Poisoned)?
            .push(record.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MustDeleteState {
    entries: Vec<MustDeleteEntry>,
    upserts: usize,
}

/// Must-delete worklist keyed by lowercase sender.
#[derive(Debug, Default)]
pub struct MemoryMustDeleteList {
    state: Mutex<MustDeleteState>,
}

impl MemoryMustDeleteList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current entries in insertion order.
    pub fn entries(&self) -> Vec<MustDeleteEntry> {
        match self.state.lock() {
            Ok(state) => state.entries.clone(),
            Err(poisoned) => poisoned.into_inner().entries.clone(),
        }
    }

    /// Number of `add_to_must_delete` calls received.
    pub fn upsert_count(&self) -> usize {
        match self.state.lock() {
            Ok(state) => state.upserts,
            Err(poisoned) => poisoned.into_inner().upserts,
        }
    }
}

/// Insert or refresh `sender` in `entries`.
pub(crate) fn upsert_entry(entries: &mut Vec<MustDeleteEntry>, sender: &str, reason: &str) {
    let key = sender.trim().to_lowercase();
    let now = Utc::now();
    if let Some(existing) = entries
        .iter_mut()
        .find(|e| e.sender.trim().to_lowercase() == key)
    {
        existing.reason = reason.to_owned();
        existing.added_at = now;
        return;
    }
    entries.push(MustDeleteEntry {
        sender: sender.trim().to_owned(),
        reason: reason.to_owned(),
        added_at: now,
    });
}

#[async_trait]
impl MustDeleteStore for MemoryMustDeleteList {
    async fn add_to_must_delete(&self, sender: &str, reason: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().map_err(|_| StoreError::Poisoned)?;
        upsert_entry(&mut state.entries, sender, reason);
        state.upserts = state.upserts.saturating_add(1);
        Ok(())
    }
}

/// Account store returning a fixed account, or none.
#[derive(Debug, Clone, Default)]
pub struct StaticAccountStore {
    account: Option<MailAccount>,
}

impl StaticAccountStore {
    /// Store that always returns `account`.
    pub fn new(account: Option<MailAccount>) -> Self {
        Self { account }
    }
}

#[async_trait]
impl AccountStore for StaticAccountStore {
    async fn primary_or_matching_account(&self) -> Result<Option<MailAccount>, StoreError> {
        Ok(self.account.clone())
    }
}
