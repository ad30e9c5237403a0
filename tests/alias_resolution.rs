//! Alias Resolution Tests
//!
//! Loads alias stores and settings from a configuration directory and checks
//! endpoint precedence.

use azkaban_cli::alias::AliasResolver;
use azkaban_cli::config::{ConfigError, Settings, ALIASES_FILE, SETTINGS_FILE};
use azkaban_cli::session::RetryPolicy;
use std::time::Duration;
use tempfile::TempDir;

const ALIASES: &str = r#"
[alias.prod]
url = "https://azkaban.example.com:8443/"
user = "etl"
attempts = 5
default = true

[alias.dev]
url = "http://localhost:8081"
verify = false
"#;

fn config_dir(aliases: &str) -> TempDir {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join(ALIASES_FILE), aliases).unwrap();
    dir
}

#[test]
fn test_explicit_url_wins() {
    let dir = config_dir(ALIASES);
    let resolver = AliasResolver::load_from_dir(dir.path())
        .unwrap()
        .with_fallback_user("someone");

    let endpoint = resolver
        .resolve(Some("admin@http://other:9000"), Some("dev"))
        .unwrap();

    assert_eq!(endpoint.url, "http://other:9000");
    assert_eq!(endpoint.user, "admin");
    assert!(endpoint.verify);
    assert_eq!(endpoint.attempts, 3);
}

#[test]
fn test_named_alias_beats_default() {
    let dir = config_dir(ALIASES);
    let resolver = AliasResolver::load_from_dir(dir.path())
        .unwrap()
        .with_fallback_user("someone");

    let endpoint = resolver.resolve(None, Some("dev")).unwrap();

    assert_eq!(endpoint.url, "http://localhost:8081");
    assert_eq!(endpoint.user, "someone");
    assert!(!endpoint.verify);
}

#[test]
fn test_default_alias() {
    let dir = config_dir(ALIASES);
    let resolver = AliasResolver::load_from_dir(dir.path()).unwrap();

    let endpoint = resolver.resolve(None, None).unwrap();

    assert_eq!(endpoint.url, "https://azkaban.example.com:8443");
    assert_eq!(endpoint.user, "etl");
    assert_eq!(endpoint.attempts, 5);
    assert_eq!(endpoint.session_key(), "etl@azkaban.example.com:8443");
}

#[test]
fn test_no_endpoint_without_default() {
    let dir = config_dir("[alias.dev]\nurl = \"http://localhost:8081\"\n");
    let resolver = AliasResolver::load_from_dir(dir.path()).unwrap();

    let err = resolver.resolve(None, None).unwrap_err();
    assert!(matches!(err, ConfigError::NoEndpoint));
}

#[test]
fn test_missing_store_is_empty() {
    let dir = TempDir::new().unwrap();
    let resolver = AliasResolver::load_from_dir(dir.path()).unwrap();

    assert_eq!(resolver.names().count(), 0);
    assert!(matches!(
        resolver.resolve(None, Some("prod")).unwrap_err(),
        ConfigError::UnknownAlias(name) if name == "prod"
    ));
}

#[test]
fn test_two_defaults_rejected() {
    let dir = config_dir(
        r#"
[alias.a]
url = "http://a:8081"
default = true

[alias.b]
url = "http://b:8081"
default = true
"#,
    );

    let err = AliasResolver::load_from_dir(dir.path()).unwrap_err();
    assert!(matches!(err, ConfigError::MultipleDefaults { .. }));
}

#[test]
fn test_broken_store_reports_path() {
    let dir = config_dir("[alias.a\n");

    match AliasResolver::load_from_dir(dir.path()).unwrap_err() {
        ConfigError::Parse { path, .. } => assert!(path.ends_with(ALIASES_FILE)),
        other => panic!("expected Parse, got {:?}", other),
    }
}

#[test]
fn test_settings_drive_retry_policy() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join(SETTINGS_FILE),
        "[client]\nretry_initial_delay_ms = 100\nretry_max_delay_ms = 250\n",
    )
    .unwrap();

    let settings = Settings::load_from_dir(dir.path()).unwrap();
    let policy = RetryPolicy::from(&settings.client);

    assert_eq!(policy.backoff(1), Duration::from_millis(100));
    assert_eq!(policy.backoff(2), Duration::from_millis(200));
    assert_eq!(policy.backoff(3), Duration::from_millis(250));
    assert_eq!(policy.poll_interval, Duration::from_millis(2000));
}
