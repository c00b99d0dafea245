//! Records flowing through the unsubscribe chain.
//!
//! [`UnsubscribeCandidate`] is produced upstream by the mailbox scanner and
//! is read-only for the duration of a chain run. [`AttemptRecord`],
//! [`ChainOutcome`] and [`MustDeleteEntry`] are what the engine emits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Upper bound on candidate links carried per sender.
pub const MAX_CANDIDATE_LINKS: usize = 5;

/// Strategy name reported when no strategy succeeded.
pub const NO_STRATEGY: &str = "None";

/// URI scheme of a candidate link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkScheme {
    /// `http://` or `https://`.
    Http,
    /// `mailto:`.
    Mailto,
}

/// Classify a link by scheme, case-insensitively. Other schemes yield `None`.
pub fn link_scheme(link: &str) -> Option<LinkScheme> {
    let lower = link.trim().to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        Some(LinkScheme::Http)
    } else if lower.starts_with("mailto:") {
        Some(LinkScheme::Mailto)
    } else {
        None
    }
}

/// A sender the user wants to stop receiving mail from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsubscribeCandidate {
    /// Sender email address.
    pub sender: String,

    /// Raw `List-Unsubscribe` header text (RFC 2369), possibly empty.
    #[serde(default, alias = "list_unsubscribe")]
    pub header_value: String,

    /// Whether the sender advertised `List-Unsubscribe-Post` (RFC 8058).
    #[serde(
        default,
        alias = "list_unsubscribe_post",
        deserialize_with = "deserialize_one_click"
    )]
    pub one_click_eligible: bool,

    /// Ordered, deduplicated unsubscribe links (http, https or mailto).
    #[serde(
        default,
        alias = "sample_links",
        alias = "unsubscribe_links",
        deserialize_with = "deserialize_links"
    )]
    pub candidate_links: Vec<String>,
}

impl UnsubscribeCandidate {
    /// Build a candidate, deduplicating links and keeping at most
    /// [`MAX_CANDIDATE_LINKS`] of them in their original order.
    pub fn new(
        sender: impl Into<String>,
        header_value: impl Into<String>,
        one_click_eligible: bool,
        links: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            sender: sender.into(),
            header_value: header_value.into(),
            one_click_eligible,
            candidate_links: cap_links(links),
        }
    }

    /// Links whose scheme is http or https, in order.
    pub fn http_links(&self) -> impl Iterator<Item = &str> {
        self.links_with(LinkScheme::Http)
    }

    /// Links whose scheme is mailto, in order.
    pub fn mailto_links(&self) -> impl Iterator<Item = &str> {
        self.links_with(LinkScheme::Mailto)
    }

    fn links_with(&self, scheme: LinkScheme) -> impl Iterator<Item = &str> {
        self.candidate_links
            .iter()
            .map(String::as_str)
            .filter(move |link| link_scheme(link) == Some(scheme))
    }
}

fn cap_links(links: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut kept: Vec<String> = Vec::new();
    for link in links {
        let link = link.trim().to_owned();
        if link.is_empty() || kept.contains(&link) {
            continue;
        }
        kept.push(link);
        if kept.len() >= MAX_CANDIDATE_LINKS {
            break;
        }
    }
    kept
}

fn deserialize_links<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<String>>::deserialize(deserializer)?;
    Ok(cap_links(raw.unwrap_or_default()))
}

/// Accepts a bool or the raw `List-Unsubscribe-Post` header text.
fn deserialize_one_click<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    Ok(match Option::<Flag>::deserialize(deserializer)? {
        Some(Flag::Bool(b)) => b,
        Some(Flag::Text(text)) => text.to_ascii_lowercase().contains("one-click"),
        None => false,
    })
}

/// Audit entry for one executed strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// Sender the attempt was made for.
    pub sender: String,
    /// Name of the strategy that ran.
    pub strategy_name: String,
    /// Whether the strategy reported success.
    pub success: bool,
    /// Short human-readable result.
    pub message: String,
    /// When the attempt finished.
    pub timestamp: DateTime<Utc>,
}

impl AttemptRecord {
    /// Create a record stamped with the current time.
    pub fn now(sender: &str, strategy_name: &str, success: bool, message: &str) -> Self {
        Self {
            sender: sender.to_owned(),
            strategy_name: strategy_name.to_owned(),
            success,
            message: message.to_owned(),
            timestamp: Utc::now(),
        }
    }
}

/// Result of running the full chain for one candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainOutcome {
    /// Whether any strategy succeeded.
    pub success: bool,
    /// Message of the deciding strategy, or the exhaustion reason.
    pub message: String,
    /// Name of the successful strategy, or [`NO_STRATEGY`].
    pub strategy_name: String,
}

impl ChainOutcome {
    /// Outcome for a successful strategy.
    pub fn succeeded(strategy_name: &str, message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            strategy_name: strategy_name.to_owned(),
        }
    }

    /// Outcome for an exhausted chain.
    pub fn exhausted(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            strategy_name: NO_STRATEGY.to_owned(),
        }
    }
}

/// A sender queued for manual or bulk deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MustDeleteEntry {
    /// Sender email address.
    pub sender: String,
    /// Why automated unsubscription failed.
    pub reason: String,
    /// When the entry was inserted or last refreshed.
    pub added_at: DateTime<Utc>,
}
