//! Integration tests for configuration validation

#![allow(clippy::expect_used)]

use privilege_broker::config::{
    BrokerConfig, ClientConfig, LoggingConfig, ServerConfig, DEFAULT_CHANNEL_NAME,
    DEFAULT_MAX_FRAME_SIZE,
};
use privilege_broker::transport::access::{AccessRights, Principal};
use std::time::Duration;
use tracing::Level;

#[test]
fn test_default_config_validates() {
    let config = BrokerConfig::default();
    let errors = config.validate();
    assert!(
        errors.is_empty(),
        "Default config should be valid, but got errors: {:?}",
        errors
    );
    assert_eq!(config.channel.name, DEFAULT_CHANNEL_NAME);
    assert_eq!(config.channel.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
}

#[test]
fn test_empty_channel_name() {
    let mut config = BrokerConfig::default();
    config.channel.name = String::new();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("cannot be empty")));
}

#[test]
fn test_relative_channel_name_with_separator() {
    let mut config = BrokerConfig::default();
    config.channel.name = "nested/broker".to_string();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Invalid channel name")));
}

#[cfg(unix)]
#[test]
fn test_absolute_channel_path_is_allowed() {
    let mut config = BrokerConfig::default();
    config.channel.name = "/run/broker/broker.sock".to_string();

    assert!(config.validate().is_empty());
}

#[test]
fn test_tiny_max_frame_size() {
    let mut config = BrokerConfig::default();
    config.channel.max_frame_size = 100;

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Max frame size too small")));
}

#[test]
fn test_excessive_max_frame_size() {
    let mut config = BrokerConfig::default();
    config.channel.max_frame_size = 1024 * 1024 * 1024;

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Max frame size too large")));
}

#[test]
fn test_empty_thread_name() {
    let config = BrokerConfig {
        server: ServerConfig {
            thread_name: String::new(),
            ..ServerConfig::default()
        },
        ..BrokerConfig::default()
    };

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Server thread name cannot be empty")));
}

#[test]
fn test_short_busy_retry_interval() {
    let config = BrokerConfig {
        client: ClientConfig {
            busy_retry_interval: Duration::from_micros(10),
        },
        ..BrokerConfig::default()
    };

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Busy retry interval too short")));
}

#[test]
fn test_long_busy_retry_interval() {
    let config = BrokerConfig {
        client: ClientConfig {
            busy_retry_interval: Duration::from_secs(60),
        },
        ..BrokerConfig::default()
    };

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Busy retry interval too long")));
}

#[test]
fn test_empty_app_name() {
    let mut config = BrokerConfig::default();
    config.logging.app_name = String::new();

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Application name cannot be empty")));
}

#[test]
fn test_log_to_file_without_path() {
    let mut config = BrokerConfig::default();
    config.logging.log_to_file = true;
    config.logging.log_file_path = None;

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("log_file_path must be specified")));
}

#[test]
fn test_no_logging_outputs() {
    let config = BrokerConfig {
        logging: LoggingConfig {
            log_to_console: false,
            log_to_file: false,
            ..LoggingConfig::default()
        },
        ..BrokerConfig::default()
    };

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("At least one logging output")));
}

#[test]
fn test_validate_strict_with_invalid_config() {
    let mut config = BrokerConfig::default();
    config.channel.name = String::new();
    config.channel.max_frame_size = 0;

    let result = config.validate_strict();
    let message = result.expect_err("should fail").to_string();
    assert!(message.contains("Configuration validation failed"));
    assert!(message.contains("Channel name cannot be empty"));
    assert!(message.contains("Max frame size too small"));
}

#[test]
fn test_partial_toml_fills_defaults() {
    let config = BrokerConfig::from_toml(
        r#"
        [channel]
        name = "custom-broker"

        [server]
        allow_authenticated_users = false

        [logging]
        log_level = "debug"
        "#,
    )
    .expect("parse");

    assert_eq!(config.channel.name, "custom-broker");
    assert_eq!(config.channel.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
    assert!(!config.server.allow_authenticated_users);
    assert_eq!(config.logging.log_level, Level::DEBUG);
    assert_eq!(
        config.access_policy().rights_for(Principal::AuthenticatedUsers),
        None
    );
}

#[test]
fn test_invalid_toml_is_config_error() {
    let result = BrokerConfig::from_toml("[channel\nname = ");
    assert!(matches!(
        result,
        Err(privilege_broker::ProtocolError::ConfigError(_))
    ));
}

#[test]
fn test_example_config_roundtrip() {
    let text = BrokerConfig::example_config();
    let parsed = BrokerConfig::from_toml(&text).expect("example config parses");
    assert_eq!(parsed.channel.name, DEFAULT_CHANNEL_NAME);
    assert_eq!(
        parsed.client.busy_retry_interval,
        ClientConfig::default().busy_retry_interval
    );
}

#[test]
fn test_save_and_load_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("broker.toml");

    let config = BrokerConfig::default_with_overrides(|c| {
        c.channel.name = "saved-broker".to_string();
        c.client.busy_retry_interval = Duration::from_millis(250);
    });
    config.save_to_file(&path).expect("save");

    let loaded = BrokerConfig::from_file(&path).expect("load");
    assert_eq!(loaded.channel.name, "saved-broker");
    assert_eq!(loaded.client.busy_retry_interval, Duration::from_millis(250));
}

#[test]
fn test_default_policy_grants_authenticated_read_write() {
    let policy = BrokerConfig::default().access_policy();
    assert_eq!(
        policy.rights_for(Principal::AuthenticatedUsers),
        Some(AccessRights::ReadWrite)
    );
    assert_eq!(
        policy.rights_for(Principal::ServiceIdentity),
        Some(AccessRights::FullControl)
    );
}
