//! Error types shared across the crate.

use std::fmt::{Display, Formatter};

use crate::models::session::SessionState;

/// Shared crate result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Error enumeration covering every protocol and session failure mode.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// File-system or stream I/O failure.
    Io(String),
    /// A connection to a device service could not be established.
    ConnectionSetupFailed(String),
    /// A local channel with the same identifier is already registered.
    ChannelAlreadyOpen(String),
    /// A call was issued out of protocol order (e.g. before negotiation).
    ProtocolSequenceViolation(String),
    /// Argument or frame serialization failed.
    EncodingFailed(String),
    /// An invocation deadline elapsed before the reply arrived.
    Timeout(String),
    /// The peer answered an invocation with an explicit error payload.
    RemoteFault(String),
    /// The underlying connection went away while work was outstanding.
    ConnectionLost(String),
    /// The connection or channel was closed locally.
    ConnectionClosed(String),
    /// The test runner process could not be launched.
    RunnerLaunchFailed(String),
    /// The test session could not be authorized for the runner process.
    AuthorizationFailed(String),
    /// The daemon refused to start executing the test plan.
    TestPlanStartFailed(String),
    /// The runner process could not be terminated.
    TerminationFailed(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// A device already has an active condition.
    ConditionActive(String),
    /// A test session failed; names the phase it failed in.
    Session {
        /// State the session was in when the failure happened.
        phase: SessionState,
        /// Primary failure.
        source: Box<AppError>,
        /// Failures collected while releasing session resources.
        teardown: Vec<AppError>,
    },
}

impl AppError {
    /// Innermost failure, unwrapping any [`AppError::Session`] layers.
    #[must_use]
    pub fn root_cause(&self) -> &AppError {
        match self {
            Self::Session { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::ConnectionSetupFailed(msg) => write!(f, "connection setup failed: {msg}"),
            Self::ChannelAlreadyOpen(msg) => write!(f, "channel already open: {msg}"),
            Self::ProtocolSequenceViolation(msg) => {
                write!(f, "protocol sequence violation: {msg}")
            }
            Self::EncodingFailed(msg) => write!(f, "encoding failed: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::RemoteFault(msg) => write!(f, "remote fault: {msg}"),
            Self::ConnectionLost(msg) => write!(f, "connection lost: {msg}"),
            Self::ConnectionClosed(msg) => write!(f, "connection closed: {msg}"),
            Self::RunnerLaunchFailed(msg) => write!(f, "runner launch failed: {msg}"),
            Self::AuthorizationFailed(msg) => write!(f, "authorization failed: {msg}"),
            Self::TestPlanStartFailed(msg) => write!(f, "test plan start failed: {msg}"),
            Self::TerminationFailed(msg) => write!(f, "termination failed: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::ConditionActive(msg) => write!(f, "condition active: {msg}"),
            Self::Session {
                phase,
                source,
                teardown,
            } => {
                write!(f, "session failed while {phase}: {source}")?;
                if !teardown.is_empty() {
                    let joined = teardown
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join("; ");
                    write!(f, " (teardown: {joined})")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Session { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::EncodingFailed(err.to_string())
    }
}
