//! Configuration loading and validation.
//!
//! Unsubscriber reads `~/.unsubscriber/config.toml` (or `--config <path>`).
//! Every section is optional. Precedence: env vars > config file > defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::gate::GateSettings;
use crate::store::MailAccount;
use crate::strategies::direct_link::{DirectLinkSettings, DEFAULT_USER_AGENTS};
use crate::strategies::header_link::HeaderLinkSettings;
use crate::strategies::mail_fallback::MailFallbackSettings;
use crate::strategies::CLIENT_USER_AGENT;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Concurrency gate limits.
    pub gate: GateConfig,

    /// List-Unsubscribe header strategy.
    pub header_link: HeaderLinkConfig,

    /// Direct link strategy.
    pub direct_link: DirectLinkConfig,

    /// Mailto fallback strategy.
    pub mail: MailConfig,

    /// Outbound mail account for the mailto fallback.
    pub account: Option<AccountConfig>,

    /// Where audit and must-delete data are written.
    pub paths: PathsConfig,
}

/// Concurrency gate limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GateConfig {
    /// Simultaneous outbound requests.
    pub max_concurrent: usize,

    /// Lower pacing bound in milliseconds.
    pub min_delay_ms: u64,

    /// Upper pacing bound in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            min_delay_ms: 1000,
            max_delay_ms: 3000,
        }
    }
}

impl GateConfig {
    /// Gate construction parameters.
    pub fn settings(&self) -> GateSettings {
        GateSettings {
            permits: self.max_concurrent,
            min_delay: Duration::from_millis(self.min_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

/// Header strategy settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HeaderLinkConfig {
    /// Request timeout in seconds.
    pub timeout_secs: u64,

    /// Redirect hops followed.
    pub max_redirects: usize,

    /// Identifying `User-Agent`.
    pub user_agent: String,
}

impl Default for HeaderLinkConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            max_redirects: 10,
            user_agent: CLIENT_USER_AGENT.to_owned(),
        }
    }
}

impl HeaderLinkConfig {
    /// Strategy settings.
    pub fn settings(&self) -> HeaderLinkSettings {
        HeaderLinkSettings {
            timeout: Duration::from_secs(self.timeout_secs),
            max_redirects: self.max_redirects,
            user_agent: self.user_agent.clone(),
        }
    }
}

/// Direct link strategy settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DirectLinkConfig {
    /// Request timeout in seconds.
    pub timeout_secs: u64,

    /// Redirect hops followed.
    pub max_redirects: usize,

    /// Links tried per sender.
    pub max_links: usize,

    /// Attempts per link.
    pub max_attempts: u32,

    /// Backoff unit in milliseconds.
    pub backoff_base_ms: u64,

    /// Maximum random jitter added to each backoff, in milliseconds.
    pub max_jitter_ms: u64,

    /// Browser `User-Agent` strings rotated across attempts.
    pub user_agents: Vec<String>,
}

impl Default for DirectLinkConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            max_redirects: 5,
            max_links: 3,
            max_attempts: 3,
            backoff_base_ms: 1000,
            max_jitter_ms: 1000,
            user_agents: DEFAULT_USER_AGENTS.iter().map(|ua| (*ua).to_owned()).collect(),
        }
    }
}

impl DirectLinkConfig {
    /// Strategy settings.
    pub fn settings(&self) -> DirectLinkSettings {
        DirectLinkSettings {
            timeout: Duration::from_secs(self.timeout_secs),
            max_redirects: self.max_redirects,
            max_links: self.max_links,
            max_attempts: self.max_attempts,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            max_jitter: Duration::from_millis(self.max_jitter_ms),
            user_agents: self.user_agents.clone(),
        }
    }
}

/// Mailto fallback settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MailConfig {
    /// SMTP session timeout in seconds.
    pub timeout_secs: u64,

    /// Subject when the mailto has none.
    pub default_subject: String,

    /// Body when the mailto has none.
    pub default_body: String,
}

impl Default for MailConfig {
    fn default() -> Self {
        let defaults = MailFallbackSettings::default();
        Self {
            timeout_secs: defaults.timeout.as_secs(),
            default_subject: defaults.default_subject,
            default_body: defaults.default_body,
        }
    }
}

impl MailConfig {
    /// Strategy settings.
    pub fn settings(&self) -> MailFallbackSettings {
        MailFallbackSettings {
            timeout: Duration::from_secs(self.timeout_secs),
            default_subject: self.default_subject.clone(),
            default_body: self.default_body.clone(),
        }
    }
}

/// Outbound account definition.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccountConfig {
    /// Sending address.
    pub email: String,

    /// Provider key (`gmail`, `outlook`, ...). Inferred from the address
    /// domain when empty.
    #[serde(default)]
    pub provider: String,

    /// Name of the credentials-file key holding the SMTP password.
    pub secret_ref: String,
}

impl AccountConfig {
    /// The account as the engine sees it.
    pub fn to_account(&self) -> MailAccount {
        MailAccount {
            email: self.email.clone(),
            provider: self.provider.clone(),
            secret: self.secret_ref.clone(),
        }
    }
}

/// Output locations. Empty values resolve under the config directory.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PathsConfig {
    /// JSON-lines audit log.
    pub audit_log: Option<PathBuf>,

    /// Must-delete list (JSON array).
    pub must_delete: Option<PathBuf>,
}

impl PathsConfig {
    /// Audit log path, defaulting to `<base>/audit.jsonl`.
    pub fn audit_log_or(&self, base: &Path) -> PathBuf {
        self.audit_log
            .clone()
            .unwrap_or_else(|| base.join("audit.jsonl"))
    }

    /// Must-delete path, defaulting to `<base>/must_delete.json`.
    pub fn must_delete_or(&self, base: &Path) -> PathBuf {
        self.must_delete
            .clone()
            .unwrap_or_else(|| base.join("must_delete.json"))
    }
}

impl Config {
    /// Parse a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or has wrong types.
    pub fn from_toml(toml_str: &str) -> anyhow::Result<Self> {
        toml::from_str(toml_str).context("failed to parse config TOML")
    }

    /// Apply `UNSUBSCRIBER_*` overrides through a resolver.
    ///
    /// Takes a resolver function for testability (avoids unsafe `set_var` in tests).
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        override_parsed(&env, "UNSUBSCRIBER_MAX_CONCURRENT", &mut self.gate.max_concurrent);
        override_parsed(&env, "UNSUBSCRIBER_MIN_DELAY_MS", &mut self.gate.min_delay_ms);
        override_parsed(&env, "UNSUBSCRIBER_MAX_DELAY_MS", &mut self.gate.max_delay_ms);
        override_parsed(
            &env,
            "UNSUBSCRIBER_LINK_ATTEMPTS",
            &mut self.direct_link.max_attempts,
        );

        if let Some(v) = env("UNSUBSCRIBER_AUDIT_LOG") {
            self.paths.audit_log = Some(PathBuf::from(v));
        }
        if let Some(v) = env("UNSUBSCRIBER_MUST_DELETE") {
            self.paths.must_delete = Some(PathBuf::from(v));
        }

        if let Some(email) = env("UNSUBSCRIBER_ACCOUNT_EMAIL") {
            let provider = env("UNSUBSCRIBER_ACCOUNT_PROVIDER")
                .or_else(|| self.account.as_ref().map(|a| a.provider.clone()))
                .unwrap_or_default();
            let secret_ref = env("UNSUBSCRIBER_ACCOUNT_SECRET_REF")
                .or_else(|| self.account.as_ref().map(|a| a.secret_ref.clone()))
                .unwrap_or_else(|| "SMTP_PASSWORD".to_owned());
            self.account = Some(AccountConfig {
                email,
                provider,
                secret_ref,
            });
        }
    }
}

fn override_parsed<T: std::str::FromStr>(
    env: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) {
    if let Some(v) = env(key) {
        match v.trim().parse() {
            Ok(parsed) => *target = parsed,
            Err(_) => tracing::warn!(var = key, value = %v, "ignoring invalid env override"),
        }
    }
}

/// Load config from a TOML file. A missing file yields defaults.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    match std::fs::read_to_string(path) {
        Ok(contents) => {
            tracing::info!(path = %path.display(), "loading config from file");
            toml::from_str(&contents)
                .map_err(|e| anyhow::anyhow!("failed to parse config at {}: {e}", path.display()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "no config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => Err(anyhow::anyhow!(
            "failed to read config at {}: {e}",
            path.display()
        )),
    }
}

/// Resolve the default config directory (`~/.unsubscriber/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".unsubscriber"))
}
