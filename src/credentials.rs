//! SMTP credential loading from the runtime `.env` file.
//!
//! Mail accounts never carry a plaintext password; they name a key in
//! `~/.unsubscriber/.env` and [`Credentials`] resolves it on demand.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::Context;
use tracing::debug;

use crate::config::config_dir;
use crate::store::{SecretDecryptor, SecretValue, StoreError};

/// Runtime credentials loaded from the `.env` file.
#[derive(Clone, Default)]
pub struct Credentials {
    vars: BTreeMap<String, String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("keys", &self.vars.keys().collect::<Vec<_>>())
            .field("values", &"[REDACTED]")
            .finish()
    }
}

impl Credentials {
    /// Build credentials from a key-value map.
    pub fn from_map(vars: BTreeMap<String, String>) -> Self {
        Self { vars }
    }

    /// Returns a credential value for a key, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Returns a required credential or an error when missing.
    ///
    /// # Errors
    ///
    /// Returns an error when the key does not exist in loaded credentials.
    pub fn require(&self, key: &str) -> anyhow::Result<String> {
        self.vars
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("missing required credential: {key}"))
    }

    /// Number of loaded keys.
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// True when nothing was loaded.
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl SecretDecryptor for Credentials {
    fn decrypt(&self, secret: &str) -> Result<SecretValue, StoreError> {
        let key = secret.trim();
        match self.get(key) {
            Some(value) if !value.trim().is_empty() => Ok(SecretValue::new(value)),
            _ => Err(StoreError::SecretNotFound(key.to_owned())),
        }
    }
}

/// Load credentials from a specific `.env` path.
///
/// # Errors
///
/// Returns an error if the file does not exist, permissions are too broad,
/// or parsing fails.
pub fn load_credentials(path: &Path) -> anyhow::Result<Credentials> {
    if !path.exists() {
        return Err(anyhow::anyhow!(
            "credentials file does not exist: {}",
            path.display()
        ));
    }

    validate_private_permissions(path)?;

    let mut vars = BTreeMap::new();
    let iter = dotenvy::from_path_iter(path)
        .with_context(|| format!("failed to read credentials at {}", path.display()))?;

    for item in iter {
        let (key, value) = item.with_context(|| {
            format!(
                "failed to parse key-value entry in credentials file {}",
                path.display()
            )
        })?;
        vars.insert(key, value);
    }

    debug!(path = %path.display(), keys = vars.len(), "credentials loaded");
    Ok(Credentials { vars })
}

/// Load `~/.unsubscriber/.env`, or empty credentials when it is absent.
///
/// # Errors
///
/// Returns an error when the home directory cannot be resolved or the file
/// exists but is invalid.
pub fn load_default_credentials() -> anyhow::Result<Credentials> {
    let path = config_dir()?.join(".env");
    if !path.exists() {
        debug!(path = %path.display(), "no credentials file; mail fallback will be unable to authenticate");
        return Ok(Credentials::default());
    }
    load_credentials(&path)
}

#[cfg(unix)]
fn validate_private_permissions(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = fs::metadata(path)
        .with_context(|| format!("failed to inspect credentials file {}", path.display()))?;
    let mode = metadata.permissions().mode() & 0o777;

    if mode & 0o077 != 0 {
        return Err(anyhow::anyhow!(
            "credentials file {} must be 0600, found {:o}",
            path.display(),
            mode
        ));
    }

    Ok(())
}

#[cfg(not(unix))]
fn validate_private_permissions(_path: &Path) -> anyhow::Result<()> {
    Ok(())
}
