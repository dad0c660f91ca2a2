use std::io::Write;
use std::time::Duration;

use xctest_driver::logging::LogFormat;
use xctest_driver::{AppError, DriverConfig};

fn sample_toml() -> &'static str {
    r#"
log_format = "json"
max_frame_bytes = 65536

[testmanager]
service = "com.apple.testmanagerd.lockdown"
protocol_version = 36
authorization_delay_ms = 250
event_channel_timeout_seconds = 10
invoke_timeout_seconds = 5

[capabilities]
"XCTIssue capability" = 1
"skipped test capability" = 0

[process_control]
service = "instruments"
channel = "processcontrol"

[endpoints]
"com.apple.testmanagerd.lockdown" = "127.0.0.1:62078"
instruments = "127.0.0.1:62079"
"#
}

#[test]
fn empty_document_uses_defaults() {
    let config = DriverConfig::from_toml_str("").expect("empty config is valid");

    assert_eq!(config, DriverConfig::default());
    assert_eq!(config.log_format, LogFormat::Text);
    assert_eq!(
        config.testmanager.service,
        "com.apple.testmanagerd.lockdown.secure"
    );
    assert_eq!(config.testmanager.protocol_version, 36);
    assert_eq!(config.authorization_delay(), Duration::from_secs(1));
    assert_eq!(config.event_channel_timeout(), Some(Duration::from_secs(30)));
    assert_eq!(config.invoke_timeout(), None);
    assert!(config.capabilities.supports("test timeout capability"));
    assert_eq!(config.max_frame_bytes, 4 * 1024 * 1024);
}

#[test]
fn parses_full_document() {
    let config = DriverConfig::from_toml_str(sample_toml()).expect("valid config");

    assert_eq!(config.log_format, LogFormat::Json);
    assert_eq!(config.testmanager.service, "com.apple.testmanagerd.lockdown");
    assert_eq!(config.authorization_delay(), Duration::from_millis(250));
    assert_eq!(config.invoke_timeout(), Some(Duration::from_secs(5)));
    assert_eq!(config.capabilities.len(), 2);
    assert!(!config.capabilities.supports("skipped test capability"));
    assert_eq!(config.process_control.channel, "processcontrol");
    assert_eq!(
        config.condition_inducer.channel,
        "com.apple.instruments.server.services.ConditionInducer"
    );

    let endpoints = config.endpoint_addrs().expect("endpoints parse");
    assert_eq!(endpoints["instruments"].port(), 62079);
    assert!(config.tcp_connector().is_ok());
}

#[test]
fn zero_event_timeout_waits_indefinitely() {
    let config = DriverConfig::from_toml_str(
        "[testmanager]\nevent_channel_timeout_seconds = 0\n",
    )
    .expect("valid config");
    assert_eq!(config.event_channel_timeout(), None);
}

#[test]
fn zero_protocol_version_is_rejected() {
    let err = DriverConfig::from_toml_str("[testmanager]\nprotocol_version = 0\n")
        .expect_err("protocol version must be positive");
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("protocol_version")));
}

#[test]
fn blank_channel_name_is_rejected() {
    let err = DriverConfig::from_toml_str(
        "[condition_inducer]\nservice = \"instruments\"\nchannel = \"  \"\n",
    )
    .expect_err("blank channel must fail");
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("condition_inducer.channel")));
}

#[test]
fn zero_frame_limit_is_rejected() {
    let err = DriverConfig::from_toml_str("max_frame_bytes = 0\n").expect_err("must fail");
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("max_frame_bytes")));
}

#[test]
fn unparsable_endpoint_is_rejected() {
    let err = DriverConfig::from_toml_str("[endpoints]\nsvc = \"localhost\"\n")
        .expect_err("endpoint without port must fail");
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("svc")));
}

#[test]
fn unknown_log_format_is_rejected() {
    let err = DriverConfig::from_toml_str("log_format = \"xml\"\n").expect_err("must fail");
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn loads_from_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(sample_toml().as_bytes()).expect("write config");

    let config = DriverConfig::load_from_path(file.path()).expect("load config");
    assert_eq!(config.max_frame_bytes, 65536);
}

#[test]
fn missing_file_is_a_config_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let err = DriverConfig::load_from_path(dir.path().join("absent.toml"))
        .expect_err("missing file must fail");
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("failed to read config")));
}
