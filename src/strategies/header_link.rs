//! RFC 2369 `List-Unsubscribe` header strategy with RFC 8058 one-click.
//!
//! The header looks like `<https://a.example/u?x=1>, <mailto:u@a.example>`.
//! Only the first http(s) URI is used. When the sender also advertised
//! `List-Unsubscribe-Post`, the URI receives a one-shot POST with body
//! `List-Unsubscribe=One-Click`; otherwise a plain GET.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, instrument};

use super::{StrategyError, StrategyOutcome, UnsubscribeStrategy, CLIENT_USER_AGENT};
use crate::candidate::{link_scheme, LinkScheme, UnsubscribeCandidate};

/// Strategy name recorded in the audit trail.
pub const HEADER_LINK: &str = "HeaderLink";

/// Settings for [`HeaderLinkStrategy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderLinkSettings {
    /// Per-request timeout.
    pub timeout: Duration,
    /// Redirect hops followed before giving up.
    pub max_redirects: usize,
    /// Identifying `User-Agent`.
    pub user_agent: String,
}

impl Default for HeaderLinkSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_redirects: 10,
            user_agent: CLIENT_USER_AGENT.to_owned(),
        }
    }
}

/// Header-driven unsubscribe.
pub struct HeaderLinkStrategy {
    client: reqwest::Client,
}

impl HeaderLinkStrategy {
    /// Build the strategy and its shared HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`StrategyError::HttpClient`] if the client cannot be built.
    pub fn new(settings: HeaderLinkSettings) -> Result<Self, StrategyError> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .redirect(reqwest::redirect::Policy::limited(settings.max_redirects))
            .user_agent(settings.user_agent)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl UnsubscribeStrategy for HeaderLinkStrategy {
    fn name(&self) -> &'static str {
        HEADER_LINK
    }

    fn can_handle(&self, candidate: &UnsubscribeCandidate) -> bool {
        !candidate.header_value.trim().is_empty()
    }

    #[instrument(skip_all, fields(strategy = HEADER_LINK, sender = %candidate.sender))]
    async fn execute(
        &self,
        candidate: &UnsubscribeCandidate,
    ) -> Result<StrategyOutcome, StrategyError> {
        let urls = extract_http_urls(&candidate.header_value);
        let Some(url) = urls.first() else {
            return Ok(StrategyOutcome::failure(
                "no HTTP URLs found in List-Unsubscribe header",
            ));
        };

        let request = if candidate.one_click_eligible {
            debug!(%url, "sending RFC 8058 one-click POST");
            self.client
                .post(url.as_str())
                .form(&[("List-Unsubscribe", "One-Click")])
        } else {
            debug!(%url, "sending header GET");
            self.client.get(url.as_str())
        };

        let method = if candidate.one_click_eligible {
            "one-click POST"
        } else {
            "GET"
        };

        let outcome = match request.send().await {
            Ok(response) if response.status().is_success() => StrategyOutcome::success(format!(
                "Unsubscribed via List-Unsubscribe {method} (HTTP {})",
                response.status().as_u16()
            )),
            Ok(response) => StrategyOutcome::failure(format!(
                "List-Unsubscribe {method} returned HTTP {}",
                response.status().as_u16()
            )),
            Err(e) if e.is_timeout() => StrategyOutcome::failure("List-Unsubscribe request timed out"),
            Err(e) if e.is_redirect() => {
                StrategyOutcome::failure("List-Unsubscribe request hit too many redirects")
            }
            Err(e) => StrategyOutcome::failure(format!("List-Unsubscribe network error: {e}")),
        };
        Ok(outcome)
    }
}

fn bracketed_token() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<\s*([^<>]+?)\s*>").ok())
        .as_ref()
}

/// All `<...>` tokens of a `List-Unsubscribe` value with an http(s) scheme,
/// in header order.
pub fn extract_http_urls(header_value: &str) -> Vec<String> {
    let Some(re) = bracketed_token() else {
        return Vec::new();
    };
    re.captures_iter(header_value)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_owned())
        .filter(|token| link_scheme(token) == Some(LinkScheme::Http))
        .collect()
}
