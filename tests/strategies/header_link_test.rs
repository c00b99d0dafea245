//! Tests for the RFC 2369 / RFC 8058 header strategy.

use std::time::Duration;

use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use unsubscriber::candidate::UnsubscribeCandidate;
use unsubscriber::strategies::header_link::{HeaderLinkSettings, HeaderLinkStrategy};
use unsubscriber::strategies::{UnsubscribeStrategy, CLIENT_USER_AGENT};

fn strategy() -> HeaderLinkStrategy {
    HeaderLinkStrategy::new(HeaderLinkSettings::default()).expect("client should build")
}

fn with_header(value: &str, one_click: bool) -> UnsubscribeCandidate {
    UnsubscribeCandidate::new("news@shop.example", value, one_click, Vec::new())
}

#[test]
fn blank_header_is_not_handled() {
    let s = strategy();
    assert!(!s.can_handle(&with_header("   ", false)));
    assert!(s.can_handle(&with_header("<mailto:a@b.c>", false)));
}

#[tokio::test]
async fn mailto_only_header_fails_without_request() {
    let outcome = strategy()
        .execute(&with_header("<mailto:leave@shop.example>", false))
        .await
        .expect("no internal error");
    assert!(!outcome.success);
    assert!(outcome.message.contains("no HTTP"));
}

#[tokio::test]
async fn only_first_http_url_is_used() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/first"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(path("/second"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let value = format!(
        "<mailto:x@y.z>, <{uri}/first>, <{uri}/second>",
        uri = server.uri()
    );
    let outcome = strategy()
        .execute(&with_header(&value, false))
        .await
        .expect("no internal error");

    assert!(outcome.success);
    assert_eq!(outcome.message, "Unsubscribed via List-Unsubscribe GET (HTTP 200)");
}

#[tokio::test]
async fn identifying_user_agent_is_sent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("user-agent", CLIENT_USER_AGENT))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = strategy()
        .execute(&with_header(&format!("<{}/u>", server.uri()), false))
        .await
        .expect("no internal error");
    assert!(outcome.success);
}

#[tokio::test]
async fn redirects_are_followed() {
    let server = MockServer::start().await;
    Mock::given(path("/start"))
        .respond_with(
            ResponseTemplate::new(302).insert_header("location", format!("{}/done", server.uri())),
        )
        .mount(&server)
        .await;
    Mock::given(path("/done"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = strategy()
        .execute(&with_header(&format!("<{}/start>", server.uri()), false))
        .await
        .expect("no internal error");
    assert!(outcome.success);
}

#[tokio::test]
async fn non_2xx_reports_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&server)
        .await;

    let outcome = strategy()
        .execute(&with_header(&format!("<{}/u>", server.uri()), true))
        .await
        .expect("no internal error");
    assert!(!outcome.success);
    assert_eq!(
        outcome.message,
        "List-Unsubscribe one-click POST returned HTTP 410"
    );
}

#[tokio::test]
async fn slow_endpoint_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let s = HeaderLinkStrategy::new(HeaderLinkSettings {
        timeout: Duration::from_millis(200),
        ..HeaderLinkSettings::default()
    })
    .expect("client should build");

    let outcome = s
        .execute(&with_header(&format!("<{}/slow>", server.uri()), false))
        .await
        .expect("no internal error");
    assert!(!outcome.success);
    assert!(outcome.message.contains("timed out"));
}

#[tokio::test]
async fn redirect_loop_is_reported() {
    let server = MockServer::start().await;
    Mock::given(path("/loop"))
        .respond_with(
            ResponseTemplate::new(302).insert_header("location", format!("{}/loop", server.uri())),
        )
        .mount(&server)
        .await;

    let outcome = strategy()
        .execute(&with_header(&format!("<{}/loop>", server.uri()), false))
        .await
        .expect("no internal error");
    assert!(!outcome.success);
    assert!(outcome.message.contains("too many redirects"));
}
