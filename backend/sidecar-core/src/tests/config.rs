use crate::config::{ConfigOverrides, DEFAULT_BATCH_SIZE, SidecarConfig};
use crate::error::config::ConfigError;
use crate::{DEFAULT_KMS_URL, DEFAULT_LISTENER_PORT};

use std::io::Write;
use std::path::Path;

use serial_test::serial;
use tempfile::{NamedTempFile, TempDir};

const SIDE_VARIABLES: &[&str] = &[
    "SIDE_PORT",
    "SIDE_SERVICE",
    "SIDE_BATCH_SIZE",
    "SIDE_KMS_URL",
    "SIDE_KMS_PING_INTERVAL",
    "SIDE_KMS_REQUEST_TIMEOUT",
    "SIDE_KMS_CONNECT_TIMEOUT",
    "SIDE_KMS_RECONNECT_INTERVAL",
    "SIDE_LOG_LEVEL",
];

/// Sets environment variables for one test and clears every `SIDE_*` variable on drop.
struct EnvGuard;

impl EnvGuard {
    fn set(vars: &[(&str, &str)]) -> Self {
        clear_side_variables();
        for (name, value) in vars {
            // SAFETY: config tests are #[serial], nothing else touches the environment concurrently.
            unsafe { std::env::set_var(name, value) };
        }
        Self
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        clear_side_variables();
    }
}

fn clear_side_variables() {
    for name in SIDE_VARIABLES {
        // SAFETY: see EnvGuard::set.
        unsafe { std::env::remove_var(name) };
    }
}

fn config_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    file.write_all(contents.as_bytes()).expect("written");
    file
}

fn with_service() -> ConfigOverrides {
    ConfigOverrides {
        port: None,
        service_name: Some(String::from("ledger")),
    }
}

/// **VALUE**: Verifies the defaults every deployment starts from.
///
/// **WHY THIS MATTERS**: The KMS and the service both assume these values when nothing is
/// configured; drifting defaults silently break existing deployments.
///
/// **BUG THIS CATCHES**: Would catch a changed default port, batch size or KMS URL.
#[test]
fn given_nothing_configured_when_default_then_uses_documented_defaults() {
    // GIVEN/WHEN: Default config
    let config = SidecarConfig::default();

    // THEN: Documented defaults
    assert_eq!(config.listener.port, DEFAULT_LISTENER_PORT);
    assert_eq!(config.listener.port, 5678);
    assert_eq!(config.listener.address, "0.0.0.0");
    assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
    assert_eq!(config.kms.url, DEFAULT_KMS_URL);
    assert_eq!(config.kms.url, "ws://localhost:8080/sidecar");
    assert_eq!(config.kms.ping_interval_ms, 30_000);
    assert_eq!(config.kms.request_timeout_ms, 5_000);
    assert!(config.kms.auto_reconnect);
    assert_eq!(config.log_level, "info");
}

/// **VALUE**: Verifies a partial TOML file only overrides the keys it sets.
///
/// **BUG THIS CATCHES**: Would catch a missing `#[serde(default)]` turning an omitted
/// section into a parse error.
#[test]
fn given_partial_toml_when_loaded_from_file_then_missing_keys_keep_defaults() {
    // GIVEN: A file with only a service name and a KMS URL
    let file = config_file(
        r#"
service_name = "ledger"

[kms]
url = "ws://kms.internal:9000/sidecar"
"#,
    );

    // WHEN: Reading it
    let config = SidecarConfig::from_file(file.path()).expect("parsed");

    // THEN: Set keys applied, the rest default
    assert_eq!(config.service_name, "ledger");
    assert_eq!(config.kms.url, "ws://kms.internal:9000/sidecar");
    assert_eq!(config.kms.request_timeout_ms, 5_000);
    assert_eq!(config.listener.port, DEFAULT_LISTENER_PORT);
}

/// **VALUE**: Verifies a missing config file is not fatal.
///
/// **WHY THIS MATTERS**: Containers commonly configure the sidecar purely via environment.
///
/// **BUG THIS CATCHES**: Would catch `from_file` surfacing `NotFound` as a read error.
#[test]
fn given_missing_file_when_loaded_from_file_then_returns_defaults() {
    // GIVEN: A path inside an empty directory
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("absent.toml");

    // WHEN: Reading it
    let config = SidecarConfig::from_file(&path).expect("defaults");

    // THEN: Defaults
    assert_eq!(config, SidecarConfig::default());
}

/// **VALUE**: Verifies corrupt TOML is reported with the offending path.
///
/// **BUG THIS CATCHES**: Would catch parse errors being swallowed into defaults.
#[test]
fn given_corrupt_toml_when_loaded_from_file_then_returns_parse_error() {
    // GIVEN: Garbage
    let file = config_file("service_name = [unterminated");

    // WHEN: Reading it
    let result = SidecarConfig::from_file(file.path());

    // THEN: Parse error naming the file
    match result {
        Err(ConfigError::ParseError { path, .. }) => assert_eq!(path, file.path()),
        other => panic!("expected ParseError, got {other:?}"),
    }
}

/// **VALUE**: Verifies environment variables override the file.
///
/// **WHY THIS MATTERS**: Operators patch deployments with `SIDE_*` variables without
/// rebuilding the config file.
///
/// **BUG THIS CATCHES**: Would catch the file being applied after the environment.
#[test]
#[serial]
fn given_file_and_environment_when_loaded_then_environment_wins() {
    // GIVEN: A file with port 7000 and environment with port 7001
    let file = config_file("service_name = \"ledger\"\n[listener]\nport = 7000\n");
    let _env = EnvGuard::set(&[("SIDE_PORT", "7001"), ("SIDE_BATCH_SIZE", "8")]);

    // WHEN: Loading
    let config = SidecarConfig::load(Some(file.path()), &ConfigOverrides::default()).expect("loaded");

    // THEN: Environment values applied
    assert_eq!(config.listener.port, 7001);
    assert_eq!(config.batch_size, 8);
    assert_eq!(config.service_name, "ledger");
}

/// **VALUE**: Verifies command-line values beat both file and environment.
///
/// **BUG THIS CATCHES**: Would catch overrides applied before the environment layer.
#[test]
#[serial]
fn given_environment_and_cli_when_loaded_then_cli_wins() {
    // GIVEN: Environment port and service, CLI port and service
    let _env = EnvGuard::set(&[("SIDE_PORT", "7001"), ("SIDE_SERVICE", "from-env")]);
    let overrides = ConfigOverrides {
        port: Some(7002),
        service_name: Some(String::from("from-cli")),
    };

    // WHEN: Loading without a file
    let config = SidecarConfig::load(None, &overrides).expect("loaded");

    // THEN: CLI values applied
    assert_eq!(config.listener.port, 7002);
    assert_eq!(config.service_name, "from-cli");
}

/// **VALUE**: Verifies an unparsable environment value names the variable.
///
/// **BUG THIS CATCHES**: Would catch bad values silently falling back to defaults.
#[test]
#[serial]
fn given_non_numeric_port_in_environment_when_loaded_then_returns_environment_error() {
    // GIVEN: A non-numeric port
    let _env = EnvGuard::set(&[("SIDE_PORT", "eighty")]);

    // WHEN: Loading
    let result = SidecarConfig::load(None, &with_service());

    // THEN: Environment error for SIDE_PORT
    match result {
        Err(ConfigError::EnvironmentError { variable, .. }) => assert_eq!(variable, "SIDE_PORT"),
        other => panic!("expected EnvironmentError, got {other:?}"),
    }
}

/// **VALUE**: Verifies the service name is mandatory.
///
/// **WHY THIS MATTERS**: Registration sends the service name; the KMS rejects an empty one
/// only after a network round trip.
///
/// **BUG THIS CATCHES**: Would catch validation being skipped by `load`.
#[test]
#[serial]
fn given_no_service_name_when_loaded_then_returns_validation_error() {
    // GIVEN: Nothing configured
    let _env = EnvGuard::set(&[]);

    // WHEN: Loading
    let result = SidecarConfig::load(None::<&Path>, &ConfigOverrides::default());

    // THEN: Validation error
    assert!(matches!(result, Err(ConfigError::ValidationError { .. })));
}

/// **VALUE**: Verifies only plain WebSocket URLs are accepted for the KMS.
///
/// **BUG THIS CATCHES**: Would catch an http or wss URL passing validation and failing at
/// connect time.
#[test]
#[serial]
fn given_non_ws_kms_url_when_loaded_then_returns_validation_error() {
    for url in ["http://localhost:8080/sidecar", "wss://localhost/sidecar", "not a url"] {
        // GIVEN: An unsupported URL
        let _env = EnvGuard::set(&[("SIDE_KMS_URL", url)]);

        // WHEN: Loading
        let result = SidecarConfig::load(None, &with_service());

        // THEN: Rejected
        assert!(
            matches!(result, Err(ConfigError::ValidationError { .. })),
            "{url} should be rejected"
        );
    }
}

/// **VALUE**: Verifies zero batch size and unknown log levels are rejected.
///
/// **BUG THIS CATCHES**: Would catch a zero batch size reaching the tracker.
#[test]
fn given_invalid_values_when_validated_then_returns_validation_error() {
    // GIVEN: A valid baseline
    let mut config = SidecarConfig {
        service_name: String::from("ledger"),
        ..SidecarConfig::default()
    };
    assert!(config.validate().is_ok());

    // WHEN/THEN: Zero batch size
    config.batch_size = 0;
    assert!(matches!(config.validate(), Err(ConfigError::ValidationError { .. })));

    // WHEN/THEN: Unknown log level
    config.batch_size = 1;
    config.log_level = String::from("chatty");
    assert!(matches!(config.validate(), Err(ConfigError::ValidationError { .. })));
}
