//! Unsubscribe strategies tried in order by the [`crate::chain::StrategyChain`].
//!
//! Each strategy answers two questions: can it handle a candidate at all
//! ([`UnsubscribeStrategy::can_handle`]), and did its protocol exchange
//! succeed ([`UnsubscribeStrategy::execute`]). Strategies hold no per-call
//! mutable state, so one instance serves every candidate concurrently.
//!
//! Three strategies ship, in chain order:
//! - [`header_link::HeaderLinkStrategy`]: RFC 2369 / RFC 8058 header
//! - [`direct_link::DirectLinkStrategy`]: link requests with retry and pacing
//! - [`mail_fallback::MailFallbackStrategy`]: mailto submission over SMTP

use async_trait::async_trait;

use crate::candidate::UnsubscribeCandidate;

pub mod direct_link;
pub mod email_injection;
pub mod header_link;
pub mod mail_fallback;

/// Longest message, in characters, carried in outcomes and audit records.
pub const MAX_MESSAGE_CHARS: usize = 200;

/// Identifying client string for requests that are not disguised.
pub const CLIENT_USER_AGENT: &str = concat!("unsubscriber/", env!("CARGO_PKG_VERSION"));

/// Protocol-level verdict of one strategy run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyOutcome {
    /// Whether the unsubscribe exchange completed.
    pub success: bool,
    /// Short human-readable explanation.
    pub message: String,
}

impl StrategyOutcome {
    /// Successful outcome.
    pub fn success(message: impl AsRef<str>) -> Self {
        Self {
            success: true,
            message: truncate_message(message.as_ref()),
        }
    }

    /// Failed outcome.
    pub fn failure(message: impl AsRef<str>) -> Self {
        Self {
            success: false,
            message: truncate_message(message.as_ref()),
        }
    }
}

/// Internal faults a strategy could not turn into a protocol verdict.
#[derive(Debug, thiserror::Error)]
pub enum StrategyError {
    /// HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// A collaborator (account store, decryptor) failed.
    #[error("collaborator failure: {0}")]
    Collaborator(#[from] crate::store::StoreError),

    /// The concurrency gate refused a permit.
    #[error("concurrency gate: {0}")]
    Gate(#[from] crate::gate::GateError),

    /// Anything else.
    #[error("{0}")]
    Internal(String),
}

/// One unsubscribe mechanism.
#[async_trait]
pub trait UnsubscribeStrategy: Send + Sync {
    /// Stable name recorded in audit entries and outcomes.
    fn name(&self) -> &'static str;

    /// Whether the candidate carries what this strategy needs. Cheap and
    /// side-effect free.
    fn can_handle(&self, candidate: &UnsubscribeCandidate) -> bool;

    /// Run the mechanism once for the candidate.
    ///
    /// # Errors
    ///
    /// Returns [`StrategyError`] only for faults outside the protocol
    /// exchange; network and server failures are `Ok` with `success: false`.
    async fn execute(
        &self,
        candidate: &UnsubscribeCandidate,
    ) -> Result<StrategyOutcome, StrategyError>;
}

/// Cut a message to [`MAX_MESSAGE_CHARS`] characters, appending `...` when
/// shortened. Newlines are flattened to spaces.
pub fn truncate_message(message: &str) -> String {
    let flat: String = message
        .trim()
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    if flat.chars().count() <= MAX_MESSAGE_CHARS {
        return flat;
    }
    let mut out: String = flat
        .chars()
        .take(MAX_MESSAGE_CHARS.saturating_sub(3))
        .collect();
    out.push_str("...");
    out
}
