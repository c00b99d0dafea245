//! `mailto:` unsubscribe via the user's own outbound mail account.
//!
//! The first mailto link is parsed into recipient, subject and body
//! (RFC 6068, percent-decoded). The message is submitted once over
//! STARTTLS on port 587 to the provider's submission host, authenticated
//! with the account's decrypted credential. No retry at this layer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials as SmtpCredentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::{StrategyError, StrategyOutcome, UnsubscribeStrategy};
use crate::candidate::UnsubscribeCandidate;
use crate::store::{AccountStore, MailAccount, SecretDecryptor, SecretValue};

/// Strategy name recorded in the audit trail.
pub const MAIL_FALLBACK: &str = "MailFallback";

/// Mail submission port (RFC 6409).
pub const SUBMISSION_PORT: u16 = 587;

/// Provider keys and their submission hosts.
const PROVIDER_HOSTS: &[(&[&str], &str)] = &[
    (&["gmail", "google", "googlemail"], "smtp.gmail.com"),
    (
        &["outlook", "hotmail", "live", "office365", "microsoft"],
        "smtp.office365.com",
    ),
    (&["yahoo"], "smtp.mail.yahoo.com"),
    (&["icloud", "me"], "smtp.mail.me.com"),
    (&["aol"], "smtp.aol.com"),
    (&["zoho"], "smtp.zoho.com"),
];

/// Mail domains mapped to provider keys.
const DOMAIN_PROVIDERS: &[(&str, &str)] = &[
    ("gmail.com", "gmail"),
    ("googlemail.com", "gmail"),
    ("outlook.com", "outlook"),
    ("hotmail.com", "outlook"),
    ("live.com", "outlook"),
    ("yahoo.com", "yahoo"),
    ("icloud.com", "icloud"),
    ("me.com", "icloud"),
    ("aol.com", "aol"),
    ("zoho.com", "zoho"),
];

/// Settings for [`MailFallbackStrategy`] and [`SmtpSubmitter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailFallbackSettings {
    /// SMTP session timeout.
    pub timeout: Duration,
    /// Subject used when the mailto carries none.
    pub default_subject: String,
    /// Body used when the mailto carries none.
    pub default_body: String,
}

impl Default for MailFallbackSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            default_subject: "Unsubscribe".to_owned(),
            default_body: "Please remove this email address from your mailing list.".to_owned(),
        }
    }
}

/// Parsed `mailto:` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailtoRequest {
    /// Single recipient address.
    pub recipient: String,
    /// Subject line.
    pub subject: String,
    /// Plain-text body.
    pub body: String,
}

/// Parse a `mailto:` URI. Returns `None` when no valid recipient exists.
///
/// The recipient comes from the path, or from a `to` parameter when the
/// path is empty; only the first of several comma-separated addresses is
/// kept. Missing subject or body fall back to `settings` defaults.
pub fn parse_mailto(uri: &str, settings: &MailFallbackSettings) -> Option<MailtoRequest> {
    let parsed = Url::parse(uri.trim()).ok()?;
    if !parsed.scheme().eq_ignore_ascii_case("mailto") {
        return None;
    }

    let mut recipient = first_address(&decode_path(parsed.path()));
    let mut subject = None;
    let mut body = None;
    for (key, value) in parsed.query_pairs() {
        match key.to_ascii_lowercase().as_str() {
            "subject" if subject.is_none() => subject = Some(value.into_owned()),
            "body" if body.is_none() => body = Some(value.into_owned()),
            "to" if recipient.is_empty() => recipient = first_address(&value),
            _ => {}
        }
    }

    if recipient.parse::<Address>().is_err() {
        return None;
    }

    Some(MailtoRequest {
        recipient,
        subject: subject
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| settings.default_subject.clone()),
        body: body
            .filter(|b| !b.trim().is_empty())
            .unwrap_or_else(|| settings.default_body.clone()),
    })
}

fn first_address(list: &str) -> String {
    list.split(',').next().unwrap_or_default().trim().to_owned()
}

/// Percent-decode the mailto path. Escapes that do not decode to UTF-8
/// leave the path as written.
fn decode_path(path: &str) -> String {
    urlencoding::decode(path)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| path.to_owned())
}

/// SMTP submission endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpEndpoint {
    /// Submission host.
    pub host: String,
    /// Submission port.
    pub port: u16,
}

/// Resolve the submission endpoint for an account: by provider key first,
/// then by the domain of the account address.
pub fn resolve_endpoint(account: &MailAccount) -> Option<SmtpEndpoint> {
    let by_provider = host_for_provider(&account.provider);
    let host = by_provider.or_else(|| {
        let domain = account.email.rsplit_once('@')?.1.to_ascii_lowercase();
        DOMAIN_PROVIDERS
            .iter()
            .find(|(d, _)| *d == domain)
            .and_then(|(_, provider)| host_for_provider(provider))
    })?;
    Some(SmtpEndpoint {
        host: host.to_owned(),
        port: SUBMISSION_PORT,
    })
}

fn host_for_provider(provider: &str) -> Option<&'static str> {
    let key = provider.trim().to_ascii_lowercase();
    if key.is_empty() {
        return None;
    }
    PROVIDER_HOSTS
        .iter()
        .find(|(keys, _)| keys.contains(&key.as_str()))
        .map(|(_, host)| *host)
}

/// Message handed to a [`MailSubmitter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    /// Sender (the account address).
    pub from: String,
    /// Recipient from the mailto URI.
    pub to: String,
    /// Subject line.
    pub subject: String,
    /// Plain-text body.
    pub body: String,
}

/// Submission failure categories.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// The server rejected the credentials.
    #[error("authentication failed: {0}")]
    Authentication(String),
    /// The SMTP exchange failed.
    #[error("SMTP protocol error: {0}")]
    Protocol(String),
    /// Message construction, TLS, timeout or anything else.
    #[error("{0}")]
    Other(String),
}

/// Outbound mail submission.
#[async_trait]
pub trait MailSubmitter: Send + Sync {
    /// Submit `mail` once, authenticated as `username`.
    async fn submit(
        &self,
        endpoint: &SmtpEndpoint,
        username: &str,
        password: &SecretValue,
        mail: &OutgoingMail,
    ) -> Result<(), SubmitError>;
}

/// [`MailSubmitter`] speaking SMTP with STARTTLS via `lettre`.
#[derive(Debug, Clone)]
pub struct SmtpSubmitter {
    timeout: Duration,
}

impl SmtpSubmitter {
    /// Submitter with the given SMTP session timeout.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl MailSubmitter for SmtpSubmitter {
    async fn submit(
        &self,
        endpoint: &SmtpEndpoint,
        username: &str,
        password: &SecretValue,
        mail: &OutgoingMail,
    ) -> Result<(), SubmitError> {
        let from: Mailbox = mail
            .from
            .parse()
            .map_err(|e| SubmitError::Other(format!("invalid sender address: {e}")))?;
        let to: Mailbox = mail
            .to
            .parse()
            .map_err(|e| SubmitError::Other(format!("invalid recipient address: {e}")))?;

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(mail.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(mail.body.clone())
            .map_err(|e| SubmitError::Other(format!("failed to build message: {e}")))?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&endpoint.host)
            .map_err(classify_smtp_error)?
            .port(endpoint.port)
            .credentials(SmtpCredentials::new(
                username.to_owned(),
                password.expose().to_owned(),
            ))
            .timeout(Some(self.timeout))
            .build();

        debug!(host = %endpoint.host, port = endpoint.port, "submitting unsubscribe mail");
        transport.send(message).await.map_err(classify_smtp_error)?;
        Ok(())
    }
}

fn classify_smtp_error(err: lettre::transport::smtp::Error) -> SubmitError {
    let auth_rejected = err
        .status()
        .is_some_and(|code| matches!(code.to_string().as_str(), "530" | "534" | "535"));
    if auth_rejected {
        SubmitError::Authentication(err.to_string())
    } else if err.is_response() || err.is_transient() || err.is_permanent() {
        SubmitError::Protocol(err.to_string())
    } else {
        SubmitError::Other(err.to_string())
    }
}

/// Mailto-driven unsubscribe.
pub struct MailFallbackStrategy {
    accounts: Arc<dyn AccountStore>,
    secrets: Arc<dyn SecretDecryptor>,
    submitter: Arc<dyn MailSubmitter>,
    settings: MailFallbackSettings,
}

impl MailFallbackStrategy {
    /// Create the strategy from its collaborators.
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        secrets: Arc<dyn SecretDecryptor>,
        submitter: Arc<dyn MailSubmitter>,
        settings: MailFallbackSettings,
    ) -> Self {
        Self {
            accounts,
            secrets,
            submitter,
            settings,
        }
    }
}

#[async_trait]
impl UnsubscribeStrategy for MailFallbackStrategy {
    fn name(&self) -> &'static str {
        MAIL_FALLBACK
    }

    fn can_handle(&self, candidate: &UnsubscribeCandidate) -> bool {
        candidate.mailto_links().next().is_some()
    }

    #[instrument(skip_all, fields(strategy = MAIL_FALLBACK, sender = %candidate.sender))]
    async fn execute(
        &self,
        candidate: &UnsubscribeCandidate,
    ) -> Result<StrategyOutcome, StrategyError> {
        let Some(uri) = candidate.mailto_links().next() else {
            return Ok(StrategyOutcome::failure("no mailto link"));
        };
        let Some(request) = parse_mailto(uri, &self.settings) else {
            return Ok(StrategyOutcome::failure(format!(
                "could not parse mailto recipient from {uri}"
            )));
        };

        let Some(account) = self.accounts.primary_or_matching_account().await? else {
            return Ok(StrategyOutcome::failure("no email account configured"));
        };

        let Some(endpoint) = resolve_endpoint(&account) else {
            return Ok(StrategyOutcome::failure(format!(
                "unsupported mail provider '{}' for {}",
                account.provider, account.email
            )));
        };

        let password = match self.secrets.decrypt(&account.secret) {
            Ok(password) => password,
            Err(e) => {
                warn!(error = %e, "stored mail credential unusable");
                return Ok(StrategyOutcome::failure(format!(
                    "Authentication failed: stored credential unusable ({e})"
                )));
            }
        };

        let mail = OutgoingMail {
            from: account.email.clone(),
            to: request.recipient.clone(),
            subject: request.subject,
            body: request.body,
        };

        let outcome = match self
            .submitter
            .submit(&endpoint, &account.email, &password, &mail)
            .await
        {
            Ok(()) => {
                info!(recipient = %request.recipient, host = %endpoint.host, "unsubscribe mail sent");
                StrategyOutcome::success(format!(
                    "Unsubscribe email sent to {}",
                    request.recipient
                ))
            }
            Err(SubmitError::Authentication(e)) => {
                StrategyOutcome::failure(format!("Authentication failed: {e}"))
            }
            Err(SubmitError::Protocol(e)) => StrategyOutcome::failure(format!("SMTP error: {e}")),
            Err(SubmitError::Other(e)) => {
                StrategyOutcome::failure(format!("Failed to send unsubscribe email: {e}"))
            }
        };
        Ok(outcome)
    }
}
