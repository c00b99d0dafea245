//! End-to-end runs of the standard chain against mock HTTP and mail endpoints.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use wiremock::matchers::{body_string, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use unsubscriber::candidate::{UnsubscribeCandidate, NO_STRATEGY};
use unsubscriber::chain::{standard_chain, ChainDependencies, StrategyChain};
use unsubscriber::credentials::Credentials;
use unsubscriber::gate::{ConcurrencyGate, GateSettings};
use unsubscriber::store::memory::{MemoryAuditLog, MemoryMustDeleteList, StaticAccountStore};
use unsubscriber::store::{MailAccount, SecretValue};
use unsubscriber::strategies::direct_link::DirectLinkSettings;
use unsubscriber::strategies::mail_fallback::{
    MailSubmitter, OutgoingMail, SmtpEndpoint, SubmitError,
};

#[derive(Default)]
struct RecordingSubmitter {
    sent: Mutex<Vec<OutgoingMail>>,
}

#[async_trait]
impl MailSubmitter for RecordingSubmitter {
    async fn submit(
        &self,
        _endpoint: &SmtpEndpoint,
        _username: &str,
        _password: &SecretValue,
        mail: &OutgoingMail,
    ) -> Result<(), SubmitError> {
        self.sent.lock().expect("test lock").push(mail.clone());
        Ok(())
    }
}

struct Harness {
    chain: StrategyChain,
    audit: Arc<MemoryAuditLog>,
    must_delete: Arc<MemoryMustDeleteList>,
    submitter: Arc<RecordingSubmitter>,
}

fn harness(account: Option<MailAccount>) -> Harness {
    let audit = Arc::new(MemoryAuditLog::new());
    let must_delete = Arc::new(MemoryMustDeleteList::new());
    let submitter = Arc::new(RecordingSubmitter::default());
    let credentials = Credentials::from_map(BTreeMap::from([(
        "SMTP_PASSWORD".to_owned(),
        "app-password".to_owned(),
    )]));

    let chain = standard_chain(ChainDependencies {
        gate: Arc::new(ConcurrencyGate::new(GateSettings {
            permits: 3,
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        })),
        audit: audit.clone(),
        must_delete: must_delete.clone(),
        accounts: Arc::new(StaticAccountStore::new(account)),
        secrets: Arc::new(credentials),
        submitter: submitter.clone(),
        header_link: Default::default(),
        direct_link: DirectLinkSettings {
            max_attempts: 1,
            ..DirectLinkSettings::default()
        },
        mail_fallback: Default::default(),
    })
    .expect("chain should build");

    Harness {
        chain,
        audit,
        must_delete,
        submitter,
    }
}

fn gmail_account() -> MailAccount {
    MailAccount {
        email: "me@gmail.com".to_owned(),
        provider: "gmail".to_owned(),
        secret: "SMTP_PASSWORD".to_owned(),
    }
}

#[tokio::test]
async fn header_link_success_records_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/unsub"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(None);
    let candidate = UnsubscribeCandidate::new(
        "news@shop.example",
        &format!("<mailto:leave@shop.example>, <{}/unsub>", server.uri()),
        false,
        Vec::new(),
    );

    let outcome = h.chain.execute(&candidate).await;

    assert!(outcome.success, "unexpected failure: {}", outcome.message);
    assert_eq!(outcome.strategy_name, "HeaderLink");
    assert_eq!(h.audit.records().len(), 1);
    assert_eq!(h.must_delete.upsert_count(), 0);
}

#[tokio::test]
async fn one_click_header_posts_rfc8058_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/one-click"))
        .and(body_string("List-Unsubscribe=One-Click"))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(None);
    let candidate = UnsubscribeCandidate::new(
        "news@shop.example",
        &format!("<{}/one-click>", server.uri()),
        true,
        Vec::new(),
    );

    let outcome = h.chain.execute(&candidate).await;

    assert!(outcome.success, "unexpected failure: {}", outcome.message);
    assert!(outcome.message.contains("POST"));
}

#[tokio::test]
async fn mailto_only_header_falls_through_to_direct_link() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/optout"))
        .respond_with(ResponseTemplate::new(200).set_body_string("You have been unsubscribed"))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(None);
    let candidate = UnsubscribeCandidate::new(
        "news@shop.example",
        "<mailto:leave@shop.example>",
        false,
        vec![format!("{}/optout", server.uri())],
    );

    let outcome = h.chain.execute(&candidate).await;

    assert!(outcome.success, "unexpected failure: {}", outcome.message);
    assert_eq!(outcome.strategy_name, "DirectLink");
    assert!(outcome.message.contains("confirmation found"));

    let records = h.audit.records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].strategy_name, "HeaderLink");
    assert!(!records[0].success);
    assert!(records[0].message.contains("no HTTP"));
}

#[tokio::test]
async fn repeated_runs_are_independent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/unsub"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&server)
        .await;

    let h = harness(None);
    let candidate = UnsubscribeCandidate::new(
        "news@shop.example",
        &format!("<{}/unsub>", server.uri()),
        false,
        Vec::new(),
    );

    let first = h.chain.execute(&candidate).await;
    let second = h.chain.execute(&candidate).await;

    assert!(first.success);
    assert!(second.success);
    assert_eq!(h.audit.records().len(), 2);
}

#[tokio::test]
async fn mailto_link_sends_mail_when_http_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let h = harness(Some(gmail_account()));
    let candidate = UnsubscribeCandidate::new(
        "news@shop.example",
        "",
        false,
        vec![
            format!("{}/gone", server.uri()),
            "mailto:leave@shop.example?subject=Remove%20me".to_owned(),
        ],
    );

    let outcome = h.chain.execute(&candidate).await;

    assert!(outcome.success, "unexpected failure: {}", outcome.message);
    assert_eq!(outcome.strategy_name, "MailFallback");
    assert_eq!(outcome.message, "Unsubscribe email sent to leave@shop.example");

    let sent = h.submitter.sent.lock().expect("test lock").clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].from, "me@gmail.com");
    assert_eq!(sent[0].subject, "Remove me");
}

#[tokio::test]
async fn total_failure_lands_on_must_delete_list() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let h = harness(None);
    let candidate = UnsubscribeCandidate::new(
        "news@shop.example",
        &format!("<{}/header>", server.uri()),
        false,
        vec![
            format!("{}/link", server.uri()),
            "mailto:leave@shop.example".to_owned(),
        ],
    );

    let outcome = h.chain.execute(&candidate).await;

    assert!(!outcome.success);
    assert_eq!(outcome.strategy_name, NO_STRATEGY);
    assert_eq!(outcome.message, "no email account configured");

    let names: Vec<String> = h
        .audit
        .records()
        .into_iter()
        .map(|r| r.strategy_name)
        .collect();
    assert_eq!(names, vec!["HeaderLink", "DirectLink", "MailFallback"]);

    assert_eq!(h.must_delete.upsert_count(), 1);
    assert_eq!(
        h.must_delete.entries()[0].reason,
        "no email account configured"
    );
}
