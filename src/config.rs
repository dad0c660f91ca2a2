//! Driver configuration parsing and validation.

use std::collections::HashMap;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::logging::LogFormat;
use crate::models::capabilities::Capabilities;
use crate::rpc::codec::DEFAULT_MAX_FRAME_BYTES;
use crate::rpc::stream::TcpConnector;
use crate::{AppError, Result};

/// Test manager daemon settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TestManagerConfig {
    /// Service name of the daemon.
    #[serde(default = "default_testmanager_service")]
    pub service: String,
    /// Identifier of the proxy channel opened on each connection.
    #[serde(default = "default_proxy_channel")]
    pub proxy_channel: String,
    /// Protocol version sent when starting the test plan.
    #[serde(default = "default_protocol_version")]
    pub protocol_version: i64,
    /// Pause before authorizing the launched runner.
    #[serde(default = "default_authorization_delay_ms")]
    pub authorization_delay_ms: u64,
    /// How long to wait for the daemon to open the event channel; 0 waits
    /// indefinitely.
    #[serde(default = "default_event_channel_timeout")]
    pub event_channel_timeout_seconds: u64,
    /// Deadline for each request/response invocation; 0 means none.
    #[serde(default)]
    pub invoke_timeout_seconds: u64,
}

fn default_testmanager_service() -> String {
    "com.apple.testmanagerd.lockdown.secure".into()
}

fn default_proxy_channel() -> String {
    "dtxproxy:XCTestManager_IDEInterface:XCTestManager_DaemonConnectionInterface".into()
}

fn default_protocol_version() -> i64 {
    36
}

fn default_authorization_delay_ms() -> u64 {
    1000
}

fn default_event_channel_timeout() -> u64 {
    30
}

impl Default for TestManagerConfig {
    fn default() -> Self {
        Self {
            service: default_testmanager_service(),
            proxy_channel: default_proxy_channel(),
            protocol_version: default_protocol_version(),
            authorization_delay_ms: default_authorization_delay_ms(),
            event_channel_timeout_seconds: default_event_channel_timeout(),
            invoke_timeout_seconds: 0,
        }
    }
}

/// A device service reached through one channel.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ServiceChannelConfig {
    /// Service name passed to the connector.
    pub service: String,
    /// Channel identifier opened on the connection.
    pub channel: String,
}

const INSTRUMENTS_SERVICE: &str = "com.apple.instruments.remoteserver.DVTSecureSocketProxy";

fn default_process_control() -> ServiceChannelConfig {
    ServiceChannelConfig {
        service: INSTRUMENTS_SERVICE.into(),
        channel: "com.apple.instruments.server.services.processcontrol".into(),
    }
}

fn default_condition_inducer() -> ServiceChannelConfig {
    ServiceChannelConfig {
        service: INSTRUMENTS_SERVICE.into(),
        channel: "com.apple.instruments.server.services.ConditionInducer".into(),
    }
}

fn default_max_frame_bytes() -> usize {
    DEFAULT_MAX_FRAME_BYTES
}

/// Driver configuration parsed from `config.toml`.
///
/// Every field has a default, so an empty document is valid.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct DriverConfig {
    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,
    /// Test manager daemon settings.
    #[serde(default)]
    pub testmanager: TestManagerConfig,
    /// Capabilities declared when establishing the test session.
    #[serde(default = "Capabilities::test_session_defaults")]
    pub capabilities: Capabilities,
    /// Process control service.
    #[serde(default = "default_process_control")]
    pub process_control: ServiceChannelConfig,
    /// Device condition service.
    #[serde(default = "default_condition_inducer")]
    pub condition_inducer: ServiceChannelConfig,
    /// Service name to `host:port` for the TCP connector.
    #[serde(default)]
    pub endpoints: HashMap<String, String>,
    /// Longest accepted inbound frame.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::default(),
            testmanager: TestManagerConfig::default(),
            capabilities: Capabilities::test_session_defaults(),
            process_control: default_process_control(),
            condition_inducer: default_condition_inducer(),
            endpoints: HashMap::new(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

impl DriverConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check field ranges and that every endpoint parses.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.testmanager.protocol_version <= 0 {
            return Err(AppError::Config(
                "testmanager.protocol_version must be greater than zero".into(),
            ));
        }

        let names = [
            ("testmanager.service", &self.testmanager.service),
            ("testmanager.proxy_channel", &self.testmanager.proxy_channel),
            ("process_control.service", &self.process_control.service),
            ("process_control.channel", &self.process_control.channel),
            ("condition_inducer.service", &self.condition_inducer.service),
            ("condition_inducer.channel", &self.condition_inducer.channel),
        ];
        if let Some((field, _)) = names.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(AppError::Config(format!("{field} must not be empty")));
        }

        if self.max_frame_bytes == 0 {
            return Err(AppError::Config(
                "max_frame_bytes must be greater than zero".into(),
            ));
        }

        self.endpoint_addrs()?;
        Ok(())
    }

    /// Parsed `[endpoints]` table.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` for an address that is not `host:port`.
    pub fn endpoint_addrs(&self) -> Result<HashMap<String, SocketAddr>> {
        self.endpoints
            .iter()
            .map(|(service, raw)| {
                raw.parse::<SocketAddr>()
                    .map(|addr| (service.clone(), addr))
                    .map_err(|err| {
                        AppError::Config(format!("endpoint for {service} invalid ({raw}): {err}"))
                    })
            })
            .collect()
    }

    /// TCP connector over the configured endpoints.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` for an invalid endpoint.
    pub fn tcp_connector(&self) -> Result<TcpConnector> {
        Ok(TcpConnector::new(self.endpoint_addrs()?, self.max_frame_bytes))
    }

    /// Pause observed before authorizing the runner.
    #[must_use]
    pub fn authorization_delay(&self) -> Duration {
        Duration::from_millis(self.testmanager.authorization_delay_ms)
    }

    /// Event channel wait limit, `None` when unbounded.
    #[must_use]
    pub fn event_channel_timeout(&self) -> Option<Duration> {
        non_zero_seconds(self.testmanager.event_channel_timeout_seconds)
    }

    /// Default invocation deadline, `None` when unbounded.
    #[must_use]
    pub fn invoke_timeout(&self) -> Option<Duration> {
        non_zero_seconds(self.testmanager.invoke_timeout_seconds)
    }
}

fn non_zero_seconds(seconds: u64) -> Option<Duration> {
    (seconds > 0).then(|| Duration::from_secs(seconds))
}
