//! Sender-address injection into unsubscribe URLs.
//!
//! Many list providers template the recipient address into the link
//! (`?email={EMAIL}`) or expect it as a query parameter. Rules, first match
//! wins:
//! 1. Replace placeholder tokens (`{EMAIL}`, `{EMAIL_ADDRESS}`, `{{email}}`,
//!    `[EMAIL]`, `*|EMAIL|*`), in any casing and percent-encoded forms.
//! 2. Fill an empty `email=` query value.
//! 3. If the URL mentions "unsubscribe" and has no `email` parameter,
//!    append `email=<sender>`.

use std::sync::OnceLock;

use regex::Regex;

const PLACEHOLDER_PATTERN: &str = r"(?i)(?:\{\{|\{|%7B%7B|%7B|\[|%5B|\*\||\*%7C)\s*(?:email_address|emailaddress|email|e-mail)\s*(?:\}\}|\}|%7D%7D|%7D|\]|%5D|\|\*|%7C\*)";

const EMPTY_PARAM_PATTERN: &str = r"(?i)([?&]email=)(&|#|$)";

const HAS_PARAM_PATTERN: &str = r"(?i)[?&]email=";

fn compiled(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

fn placeholder() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    compiled(&RE, PLACEHOLDER_PATTERN)
}

fn empty_param() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    compiled(&RE, EMPTY_PARAM_PATTERN)
}

fn has_param() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    compiled(&RE, HAS_PARAM_PATTERN)
}

/// Insert `sender` into `url` per the module rules. Returns the URL
/// unchanged when the sender is blank or no rule applies.
pub fn inject_email(url: &str, sender: &str) -> String {
    let sender = sender.trim();
    if sender.is_empty() {
        return url.to_owned();
    }

    if let Some(re) = placeholder() {
        if re.is_match(url) {
            return re.replace_all(url, regex::NoExpand(sender)).into_owned();
        }
    }

    if let Some(re) = empty_param() {
        if re.is_match(url) {
            return re
                .replace(url, |caps: &regex::Captures<'_>| {
                    format!("{}{sender}{}", &caps[1], &caps[2])
                })
                .into_owned();
        }
    }

    let mentions_unsubscribe = url.to_ascii_lowercase().contains("unsubscribe");
    let has_email_param = has_param().is_some_and(|re| re.is_match(url));
    if mentions_unsubscribe && !has_email_param {
        return append_param(url, sender);
    }

    url.to_owned()
}

fn append_param(url: &str, sender: &str) -> String {
    let (base, fragment) = match url.find('#') {
        Some(idx) => url.split_at(idx),
        None => (url, ""),
    };
    let separator = if base.contains('?') {
        if base.ends_with('?') || base.ends_with('&') {
            ""
        } else {
            "&"
        }
    } else {
        "?"
    };
    format!("{base}{separator}email={sender}{fragment}")
}
