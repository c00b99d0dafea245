//! Direct unsubscribe links.
//!
//! Takes the candidate's http(s) links, injects the sender address, and
//! tries up to `max_links` of them in order. Every link gets its own
//! cookie-carrying session and a bounded retry loop; every attempt waits on
//! the shared [`ConcurrencyGate`] first and goes out under a rotated browser
//! `User-Agent`. The 405 fallback POSTs are gated individually, so they are
//! paced like any other request.
//!
//! Classification of a single attempt:
//! - 2xx: unsubscribed (body keywords only enrich the message)
//! - 405: POST fallback, form `email=<sender>` then JSON `{"email": ...}`,
//!   or an empty POST when the sender is unknown
//! - anything else: failure carrying the status code
//!
//! Only transient failures (5xx, timeout, connection dropped before a
//! response) are retried, sleeping `base * 2^attempt` plus up to `max_jitter`
//! between tries. A 429 is treated as permanent here; callers wanting a
//! longer cooldown can use
//! [`crate::gate::interpret_too_many_requests`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::{RequestBuilder, StatusCode};
use serde_json::json;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::email_injection::inject_email;
use super::{StrategyError, StrategyOutcome, UnsubscribeStrategy, CLIENT_USER_AGENT};
use crate::candidate::UnsubscribeCandidate;
use crate::gate::ConcurrencyGate;

/// Strategy name recorded in the audit trail.
pub const DIRECT_LINK: &str = "DirectLink";

/// Browser identities rotated across attempts.
pub const DEFAULT_USER_AGENTS: [&str; 5] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.0.0",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Mobile/15E148 Safari/604.1",
];

/// Body phrases that corroborate a successful unsubscribe page.
const SUCCESS_KEYWORDS: &[&str] = &[
    "unsubscribed",
    "successfully",
    "removed from",
    "opted out",
    "no longer receive",
];

/// Settings for [`DirectLinkStrategy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectLinkSettings {
    /// Per-request timeout.
    pub timeout: Duration,
    /// Redirect hops followed before giving up.
    pub max_redirects: usize,
    /// Links tried per candidate.
    pub max_links: usize,
    /// Attempts per link, including the first.
    pub max_attempts: u32,
    /// Backoff unit; the n-th retry sleeps `base * 2^n` plus jitter.
    pub backoff_base: Duration,
    /// Upper (exclusive) bound of the random jitter added to each backoff.
    pub max_jitter: Duration,
    /// `User-Agent` pool rotated across attempts.
    pub user_agents: Vec<String>,
}

impl Default for DirectLinkSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            max_redirects: 5,
            max_links: 3,
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
            max_jitter: Duration::from_secs(1),
            user_agents: DEFAULT_USER_AGENTS.iter().map(|ua| (*ua).to_owned()).collect(),
        }
    }
}

/// Why a single link attempt did not unsubscribe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkFailure {
    /// Non-2xx response.
    Status {
        /// HTTP status code.
        code: u16,
        /// Request that produced it.
        method: &'static str,
    },
    /// The request exceeded its timeout.
    Timeout,
    /// The redirect limit was exceeded.
    TooManyRedirects,
    /// The connection failed before a response arrived.
    Connection(String),
    /// The response body could not be read or decoded.
    Network(String),
    /// The link is not a valid URL.
    InvalidUrl(String),
    /// Anything unclassified.
    Unexpected(String),
}

impl LinkFailure {
    /// Whether the retry loop should try the same link again.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Status { code, .. } => (500..600).contains(code),
            Self::Timeout | Self::Connection(_) => true,
            Self::TooManyRedirects
            | Self::Network(_)
            | Self::InvalidUrl(_)
            | Self::Unexpected(_) => false,
        }
    }

    fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_redirect() {
            Self::TooManyRedirects
        } else if err.is_connect() || err.is_request() {
            // The request never got a response; the peer may have hung up.
            Self::Connection(err.to_string())
        } else if err.is_body() || err.is_decode() {
            Self::Network(err.to_string())
        } else {
            Self::Unexpected(err.to_string())
        }
    }
}

impl std::fmt::Display for LinkFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Status { code, method } => write!(f, "HTTP {code} ({method})"),
            Self::Timeout => f.write_str("Request timed out"),
            Self::TooManyRedirects => f.write_str("Too many redirects"),
            Self::Connection(e) => write!(f, "Network error: connection failed: {e}"),
            Self::Network(e) => write!(f, "Network error: {e}"),
            Self::InvalidUrl(e) => write!(f, "Invalid URL: {e}"),
            Self::Unexpected(e) => write!(f, "Unexpected error: {e}"),
        }
    }
}

/// Result of one attempt against one link.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LinkVerdict {
    Unsubscribed(String),
    Failed(LinkFailure),
}

/// Direct-link unsubscribe, paced by the shared gate.
pub struct DirectLinkStrategy {
    gate: Arc<ConcurrencyGate>,
    settings: DirectLinkSettings,
}

impl DirectLinkStrategy {
    /// Create the strategy around the process-wide gate.
    pub fn new(gate: Arc<ConcurrencyGate>, settings: DirectLinkSettings) -> Self {
        Self { gate, settings }
    }

    /// Sleep before retry number `attempt + 1`: `base * 2^attempt` plus
    /// uniform jitter in `[0, max_jitter)`.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 2_u32.checked_pow(attempt).unwrap_or(u32::MAX);
        let backoff = self
            .settings
            .backoff_base
            .checked_mul(factor)
            .unwrap_or(Duration::MAX);
        let jitter = if self.settings.max_jitter.is_zero() {
            Duration::ZERO
        } else {
            rand::thread_rng().gen_range(Duration::ZERO..self.settings.max_jitter)
        };
        backoff.saturating_add(jitter)
    }

    fn session(&self) -> Result<reqwest::Client, StrategyError> {
        Ok(reqwest::Client::builder()
            .cookie_store(true)
            .timeout(self.settings.timeout)
            .redirect(reqwest::redirect::Policy::limited(
                self.settings.max_redirects,
            ))
            .build()?)
    }

    fn pick_user_agent(&self) -> String {
        self.settings
            .user_agents
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_else(|| CLIENT_USER_AGENT.to_owned())
    }

    /// Try one link with retries. `Err` only for gate or client faults.
    async fn try_link(&self, link: &str, sender: &str) -> Result<LinkVerdict, StrategyError> {
        if let Err(e) = Url::parse(link) {
            return Ok(LinkVerdict::Failed(LinkFailure::InvalidUrl(e.to_string())));
        }

        let session = self.session()?;
        let max_attempts = self.settings.max_attempts.max(1);
        let mut attempt: u32 = 0;
        loop {
            let verdict = self.attempt(&session, link, sender).await?;
            let failure = match verdict {
                LinkVerdict::Unsubscribed(_) => return Ok(verdict),
                LinkVerdict::Failed(failure) => failure,
            };

            let next = attempt.saturating_add(1);
            if !failure.is_transient() || next >= max_attempts {
                return Ok(LinkVerdict::Failed(failure));
            }

            let delay = self.retry_delay(attempt);
            debug!(
                link,
                attempt = next,
                delay_ms = delay.as_millis(),
                error = %failure,
                "transient failure, backing off"
            );
            tokio::time::sleep(delay).await;
            attempt = next;
        }
    }

    /// One gated GET, with the POST fallback on 405.
    async fn attempt(
        &self,
        session: &reqwest::Client,
        link: &str,
        sender: &str,
    ) -> Result<LinkVerdict, StrategyError> {
        let user_agent = self.pick_user_agent();

        debug!(link, "direct link GET");
        let request = session
            .get(link)
            .header(USER_AGENT, &user_agent)
            .header(ACCEPT, "text/html,application/xhtml+xml,*/*;q=0.8");

        let verdict = match self.send_gated(request, "GET").await? {
            LinkVerdict::Failed(LinkFailure::Status { code, .. })
                if code == StatusCode::METHOD_NOT_ALLOWED.as_u16() =>
            {
                debug!(link, "GET not allowed, falling back to POST");
                self.post_fallback(session, link, sender, &user_agent)
                    .await?
            }
            other => other,
        };
        Ok(verdict)
    }

    async fn post_fallback(
        &self,
        session: &reqwest::Client,
        link: &str,
        sender: &str,
        user_agent: &str,
    ) -> Result<LinkVerdict, StrategyError> {
        if sender.is_empty() {
            let request = session.post(link).header(USER_AGENT, user_agent);
            return self.send_gated(request, "POST").await;
        }

        let form = session
            .post(link)
            .header(USER_AGENT, user_agent)
            .form(&[("email", sender)]);
        let verdict = self.send_gated(form, "form POST").await?;
        if matches!(verdict, LinkVerdict::Unsubscribed(_)) {
            return Ok(verdict);
        }

        let json_request = session
            .post(link)
            .header(USER_AGENT, user_agent)
            .json(&json!({ "email": sender }));
        self.send_gated(json_request, "JSON POST").await
    }

    /// Wait on the gate, then send. The permit is held until the response
    /// is classified.
    async fn send_gated(
        &self,
        request: RequestBuilder,
        method: &'static str,
    ) -> Result<LinkVerdict, StrategyError> {
        let _permit = self.gate.acquire().await?;
        Ok(send_and_classify(request, method).await)
    }
}

async fn send_and_classify(request: RequestBuilder, method: &'static str) -> LinkVerdict {
    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => return LinkVerdict::Failed(LinkFailure::from_reqwest(&e)),
    };

    let status = response.status();
    if !status.is_success() {
        return LinkVerdict::Failed(LinkFailure::Status {
            code: status.as_u16(),
            method,
        });
    }

    let host = response.url().host_str().unwrap_or("link").to_owned();
    let body = response.text().await.unwrap_or_default();
    LinkVerdict::Unsubscribed(success_message(&host, status, method, &body))
}

fn success_message(host: &str, status: StatusCode, method: &str, body: &str) -> String {
    let lower = body.to_lowercase();
    let confirmed = SUCCESS_KEYWORDS.iter().any(|k| lower.contains(k));
    if confirmed {
        format!(
            "Unsubscribed via {host} ({method} HTTP {}, confirmation found)",
            status.as_u16()
        )
    } else {
        format!("Unsubscribed via {host} ({method} HTTP {})", status.as_u16())
    }
}

#[async_trait]
impl UnsubscribeStrategy for DirectLinkStrategy {
    fn name(&self) -> &'static str {
        DIRECT_LINK
    }

    fn can_handle(&self, candidate: &UnsubscribeCandidate) -> bool {
        candidate.http_links().next().is_some()
    }

    #[instrument(skip_all, fields(strategy = DIRECT_LINK, sender = %candidate.sender))]
    async fn execute(
        &self,
        candidate: &UnsubscribeCandidate,
    ) -> Result<StrategyOutcome, StrategyError> {
        let links: Vec<String> = candidate
            .http_links()
            .take(self.settings.max_links)
            .map(|link| inject_email(link, &candidate.sender))
            .collect();

        if links.is_empty() {
            return Ok(StrategyOutcome::failure("no HTTP unsubscribe links"));
        }

        let mut last_failure: Option<LinkFailure> = None;
        for link in &links {
            match self.try_link(link, &candidate.sender).await? {
                LinkVerdict::Unsubscribed(message) => {
                    info!(link = %link, "direct link unsubscribe succeeded");
                    return Ok(StrategyOutcome::success(message));
                }
                LinkVerdict::Failed(failure) => {
                    warn!(link = %link, error = %failure, "direct link failed");
                    last_failure = Some(failure);
                }
            }
        }

        let last = last_failure.map_or_else(|| "unknown".to_owned(), |f| f.to_string());
        Ok(StrategyOutcome::failure(format!(
            "All {} unsubscribe link(s) failed; last error: {last}",
            links.len()
        )))
    }
}
