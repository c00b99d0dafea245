//! Coverage for credential loading and secret resolution.

use std::fs;

use unsubscriber::credentials::load_credentials;
use unsubscriber::store::SecretDecryptor;

fn private_env_file(contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
    let tmp = tempfile::tempdir().expect("temp dir");
    let path = tmp.path().join(".env");
    fs::write(&path, contents).expect("write env");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600)).expect("chmod");
    }
    (tmp, path)
}

#[test]
fn loads_and_resolves_smtp_password() {
    let (_tmp, path) = private_env_file("GMAIL_APP_PASSWORD=abcd efgh\n# comment\nOTHER=1\n");

    let credentials = load_credentials(&path).expect("credentials should load");
    assert_eq!(credentials.len(), 2);

    let secret = credentials
        .decrypt("GMAIL_APP_PASSWORD")
        .expect("secret resolves");
    assert_eq!(secret.expose(), "abcd efgh");
}

#[test]
fn missing_file_is_an_error() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let err = load_credentials(&tmp.path().join(".env")).expect_err("missing file");
    assert!(err.to_string().contains("does not exist"));
}

#[test]
fn unknown_reference_is_not_found() {
    let (_tmp, path) = private_env_file("SMTP_PASSWORD=x\n");
    let credentials = load_credentials(&path).expect("credentials should load");
    let err = credentials.decrypt("NOPE").expect_err("unknown key");
    assert!(err.to_string().contains("NOPE"));
}

#[test]
fn secret_debug_is_redacted() {
    let (_tmp, path) = private_env_file("SMTP_PASSWORD=supersecret\n");
    let credentials = load_credentials(&path).expect("credentials should load");
    let secret = credentials.decrypt("SMTP_PASSWORD").expect("resolves");
    assert!(!format!("{secret:?}").contains("supersecret"));
    assert!(!format!("{credentials:?}").contains("supersecret"));
}
