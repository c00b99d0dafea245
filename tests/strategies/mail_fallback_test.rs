//! Tests for the mailto fallback with a scripted submitter.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use unsubscriber::candidate::UnsubscribeCandidate;
use unsubscriber::credentials::Credentials;
use unsubscriber::store::memory::StaticAccountStore;
use unsubscriber::store::{MailAccount, SecretValue};
use unsubscriber::strategies::mail_fallback::{
    MailFallbackSettings, MailFallbackStrategy, MailSubmitter, OutgoingMail, SmtpEndpoint,
    SubmitError,
};
use unsubscriber::strategies::UnsubscribeStrategy;

#[derive(Clone, Copy)]
enum Reply {
    Accept,
    RejectAuth,
    ProtocolError,
    Other,
}

struct ScriptedSubmitter {
    reply: Reply,
    calls: Mutex<Vec<(SmtpEndpoint, String, String, OutgoingMail)>>,
}

impl ScriptedSubmitter {
    fn new(reply: Reply) -> Arc<Self> {
        Arc::new(Self {
            reply,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<(SmtpEndpoint, String, String, OutgoingMail)> {
        self.calls.lock().expect("test lock").clone()
    }
}

#[async_trait]
impl MailSubmitter for ScriptedSubmitter {
    async fn submit(
        &self,
        endpoint: &SmtpEndpoint,
        username: &str,
        password: &SecretValue,
        mail: &OutgoingMail,
    ) -> Result<(), SubmitError> {
        self.calls.lock().expect("test lock").push((
            endpoint.clone(),
            username.to_owned(),
            password.expose().to_owned(),
            mail.clone(),
        ));
        match self.reply {
            Reply::Accept => Ok(()),
            Reply::RejectAuth => Err(SubmitError::Authentication(
                "535 5.7.8 credentials rejected".to_owned(),
            )),
            Reply::ProtocolError => Err(SubmitError::Protocol("554 relay denied".to_owned())),
            Reply::Other => Err(SubmitError::Other("connection reset".to_owned())),
        }
    }
}

fn account(email: &str, provider: &str) -> MailAccount {
    MailAccount {
        email: email.to_owned(),
        provider: provider.to_owned(),
        secret: "SMTP_PASSWORD".to_owned(),
    }
}

fn credentials() -> Arc<Credentials> {
    Arc::new(Credentials::from_map(BTreeMap::from([(
        "SMTP_PASSWORD".to_owned(),
        "app-password".to_owned(),
    )])))
}

fn strategy(account: Option<MailAccount>, submitter: Arc<ScriptedSubmitter>) -> MailFallbackStrategy {
    MailFallbackStrategy::new(
        Arc::new(StaticAccountStore::new(account)),
        credentials(),
        submitter,
        MailFallbackSettings::default(),
    )
}

fn with_links(links: &[&str]) -> UnsubscribeCandidate {
    UnsubscribeCandidate::new(
        "news@shop.example",
        "",
        false,
        links.iter().map(|l| (*l).to_owned()),
    )
}

#[test]
fn needs_a_mailto_link() {
    let s = strategy(None, ScriptedSubmitter::new(Reply::Accept));
    assert!(!s.can_handle(&with_links(&["https://x.com/u"])));
    assert!(s.can_handle(&with_links(&["https://x.com/u", "MAILTO:leave@x.com"])));
}

#[tokio::test]
async fn first_mailto_is_sent_with_defaults() {
    let submitter = ScriptedSubmitter::new(Reply::Accept);
    let s = strategy(Some(account("me@gmail.com", "gmail")), submitter.clone());

    let outcome = s
        .execute(&with_links(&[
            "mailto:first@list.example",
            "mailto:second@list.example",
        ]))
        .await
        .expect("no internal error");

    assert!(outcome.success, "unexpected failure: {}", outcome.message);
    assert_eq!(outcome.message, "Unsubscribe email sent to first@list.example");

    let calls = submitter.calls();
    assert_eq!(calls.len(), 1);
    let (endpoint, username, password, mail) = &calls[0];
    assert_eq!(endpoint.host, "smtp.gmail.com");
    assert_eq!(endpoint.port, 587);
    assert_eq!(username, "me@gmail.com");
    assert_eq!(password, "app-password");
    assert_eq!(mail.to, "first@list.example");
    assert_eq!(mail.subject, "Unsubscribe");
    assert_eq!(
        mail.body,
        "Please remove this email address from your mailing list."
    );
}

#[tokio::test]
async fn provider_is_inferred_from_account_domain() {
    let submitter = ScriptedSubmitter::new(Reply::Accept);
    let s = strategy(Some(account("me@outlook.com", "")), submitter.clone());

    let outcome = s
        .execute(&with_links(&["mailto:leave@list.example?body=stop"]))
        .await
        .expect("no internal error");

    assert!(outcome.success);
    let calls = submitter.calls();
    assert_eq!(calls[0].0.host, "smtp.office365.com");
    assert_eq!(calls[0].3.body, "stop");
}

#[tokio::test]
async fn missing_account_fails_without_submitting() {
    let submitter = ScriptedSubmitter::new(Reply::Accept);
    let s = strategy(None, submitter.clone());

    let outcome = s
        .execute(&with_links(&["mailto:leave@list.example"]))
        .await
        .expect("no internal error");

    assert!(!outcome.success);
    assert_eq!(outcome.message, "no email account configured");
    assert!(submitter.calls().is_empty());
}

#[tokio::test]
async fn unparseable_recipient_fails_immediately() {
    let submitter = ScriptedSubmitter::new(Reply::Accept);
    let s = strategy(Some(account("me@gmail.com", "gmail")), submitter.clone());

    let outcome = s
        .execute(&with_links(&["mailto:?subject=unsubscribe"]))
        .await
        .expect("no internal error");

    assert!(!outcome.success);
    assert!(outcome.message.starts_with("could not parse mailto recipient"));
    assert!(submitter.calls().is_empty());
}

#[tokio::test]
async fn unknown_provider_is_reported() {
    let s = strategy(
        Some(account("me@selfhosted.example", "")),
        ScriptedSubmitter::new(Reply::Accept),
    );

    let outcome = s
        .execute(&with_links(&["mailto:leave@list.example"]))
        .await
        .expect("no internal error");

    assert!(!outcome.success);
    assert!(outcome.message.starts_with("unsupported mail provider"));
}

#[tokio::test]
async fn unresolvable_secret_is_an_authentication_failure() {
    let submitter = ScriptedSubmitter::new(Reply::Accept);
    let mut acct = account("me@gmail.com", "gmail");
    acct.secret = "MISSING_KEY".to_owned();
    let s = strategy(Some(acct), submitter.clone());

    let outcome = s
        .execute(&with_links(&["mailto:leave@list.example"]))
        .await
        .expect("no internal error");

    assert!(!outcome.success);
    assert!(outcome.message.starts_with("Authentication failed"));
    assert!(submitter.calls().is_empty());
}

#[tokio::test]
async fn submission_failures_are_categorised() {
    let cases = [
        (Reply::RejectAuth, "Authentication failed: "),
        (Reply::ProtocolError, "SMTP error: "),
        (Reply::Other, "Failed to send unsubscribe email: "),
    ];
    for (reply, prefix) in cases {
        let s = strategy(
            Some(account("me@gmail.com", "gmail")),
            ScriptedSubmitter::new(reply),
        );
        let outcome = s
            .execute(&with_links(&["mailto:leave@list.example"]))
            .await
            .expect("no internal error");
        assert!(!outcome.success);
        assert!(
            outcome.message.starts_with(prefix),
            "{} should start with {prefix}",
            outcome.message
        );
    }
}
