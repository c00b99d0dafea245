//! Collaborator interfaces the engine calls into.
//!
//! Persistence and account management live outside the engine. It only
//! needs four narrow operations: append an attempt to the audit trail,
//! upsert a must-delete entry, look up the outbound mail account, and turn
//! a stored credential into its plaintext.
//!
//! In-memory ([`memory`]) and file-backed ([`jsonl`]) implementations ship
//! for the CLI and tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::candidate::AttemptRecord;

pub mod jsonl;
pub mod memory;

/// Collaborator failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding or decoding failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No credential exists under the given reference.
    #[error("secret not found: {0}")]
    SecretNotFound(String),

    /// A lock was poisoned by a panicking writer.
    #[error("store lock poisoned")]
    Poisoned,
}

/// Opaque secret value that never appears in logs.
#[derive(Clone)]
pub struct SecretValue(String);

impl SecretValue {
    /// Wrap a plaintext secret.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the plaintext. Use only at the point of submission.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("__REDACTED__")
    }
}

/// The user's outbound mail account.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailAccount {
    /// Address mail is sent from; also the SMTP username.
    pub email: String,
    /// Provider key (`gmail`, `outlook`, ...). May be empty.
    #[serde(default)]
    pub provider: String,
    /// Stored (encrypted or referenced) credential.
    pub secret: String,
}

impl std::fmt::Debug for MailAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailAccount")
            .field("email", &self.email)
            .field("provider", &self.provider)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Append-only audit trail of unsubscribe attempts.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Record one executed strategy.
    async fn log_unsubscribe_attempt(&self, record: &AttemptRecord) -> Result<(), StoreError>;
}

/// Worklist of senders that need manual deletion.
#[async_trait]
pub trait MustDeleteStore: Send + Sync {
    /// Insert the sender, or refresh its reason and timestamp.
    async fn add_to_must_delete(&self, sender: &str, reason: &str) -> Result<(), StoreError>;
}

/// Source of the outbound mail account.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// The primary account, or the one matching the current mailbox.
    async fn primary_or_matching_account(&self) -> Result<Option<MailAccount>, StoreError>;
}

/// Turns a stored credential into plaintext.
pub trait SecretDecryptor: Send + Sync {
    /// Decrypt or resolve `secret`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::SecretNotFound`] when it cannot be resolved.
    fn decrypt(&self, secret: &str) -> Result<SecretValue, StoreError>;
}
