//! Test session model and lifecycle helpers.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::value::{Dict, Value};

/// Lifecycle state of a test session run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Session created; nothing opened yet.
    Init,
    /// Opening the two daemon connections and their proxy channels.
    ChannelsOpening,
    /// Negotiating a control session on the primary channel.
    Negotiating,
    /// Establishing the named test session on the secondary channel.
    SessionStarting,
    /// Launching the test runner process.
    RunnerLaunching,
    /// Authorizing the runner process for the session.
    Authorizing,
    /// Test plan running; waiting for completion or cancellation.
    Executing,
    /// The daemon reported the test plan finished.
    Completed,
    /// The caller cancelled the run.
    Cancelled,
    /// A handshake, launch, or plan-start step failed.
    Failed,
}

impl SessionState {
    /// Whether this state ends the run.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    /// Determine whether a lifecycle transition is permitted.
    ///
    /// Every non-terminal state past `Init` may fail; only `Executing` may
    /// complete or be cancelled. Terminal states never transition again.
    #[must_use]
    pub fn can_transition_to(self, next: SessionState) -> bool {
        matches!(
            (self, next),
            (Self::Init, Self::ChannelsOpening)
                | (Self::ChannelsOpening, Self::Negotiating)
                | (Self::Negotiating, Self::SessionStarting)
                | (Self::SessionStarting, Self::RunnerLaunching)
                | (Self::RunnerLaunching, Self::Authorizing)
                | (Self::Authorizing, Self::Executing | Self::Cancelled)
                | (Self::Executing, Self::Completed | Self::Cancelled)
                | (
                    Self::ChannelsOpening
                        | Self::Negotiating
                        | Self::SessionStarting
                        | Self::RunnerLaunching
                        | Self::Authorizing
                        | Self::Executing,
                    Self::Failed
                )
        )
    }
}

impl Display for SessionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::ChannelsOpening => "channels_opening",
            Self::Negotiating => "negotiating",
            Self::SessionStarting => "session_starting",
            Self::RunnerLaunching => "runner_launching",
            Self::Authorizing => "authorizing",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Unique token identifying one test session run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(Uuid);

impl SessionToken {
    /// Generate a fresh random token.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Upper-case hyphenated form expected by the daemon.
    #[must_use]
    pub fn to_wire(self) -> String {
        self.0.hyphenated().to_string().to_uppercase()
    }
}

impl Display for SessionToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_wire())
    }
}

/// Caller-supplied description of a test run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TestRunRequest {
    /// Bundle identifier of the application under test.
    pub bundle_id: String,
    /// Bundle identifier of the test runner application.
    pub runner_bundle_id: String,
    /// File name of the `.xctest` bundle inside the runner's `PlugIns`.
    pub test_config_file_name: String,
    /// Extra launch arguments for the runner.
    #[serde(default)]
    pub launch_args: Vec<String>,
    /// Extra `KEY=VALUE` environment entries for the runner.
    #[serde(default)]
    pub launch_env: Vec<String>,
}

impl TestRunRequest {
    /// Build a request with no extra arguments or environment.
    #[must_use]
    pub fn new(
        bundle_id: impl Into<String>,
        runner_bundle_id: impl Into<String>,
        test_config_file_name: impl Into<String>,
    ) -> Self {
        Self {
            bundle_id: bundle_id.into(),
            runner_bundle_id: runner_bundle_id.into(),
            test_config_file_name: test_config_file_name.into(),
            launch_args: Vec::new(),
            launch_env: Vec::new(),
        }
    }
}

/// On-device locations computed while the session starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerPaths {
    /// Path of the installed runner application bundle.
    pub runner_app_path: String,
    /// Path of the `.xctest` bundle inside the runner's `PlugIns`.
    pub test_bundle_path: String,
    /// Path of the `.xctestconfiguration` file for this session.
    pub test_config_path: String,
}

impl RunnerPaths {
    /// Derive paths from the runner's install location and data container.
    #[must_use]
    pub fn compute(
        runner_app_path: &str,
        runner_container: &str,
        test_config_file_name: &str,
        token: SessionToken,
    ) -> Self {
        let app = runner_app_path.trim_end_matches('/');
        let container = runner_container.trim_end_matches('/');
        Self {
            runner_app_path: app.to_owned(),
            test_bundle_path: format!("{app}/PlugIns/{test_config_file_name}"),
            test_config_path: format!("{container}/tmp/{}.xctestconfiguration", token.to_wire()),
        }
    }
}

/// Test configuration served to the runner when it reports ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestConfiguration {
    /// Session token the runner must attach to.
    pub session_token: SessionToken,
    /// Bundle identifier of the application under test.
    pub target_bundle_id: String,
    /// Path of the `.xctest` bundle.
    pub test_bundle_path: String,
    /// Runner launch arguments forwarded to the target app.
    pub launch_args: Vec<String>,
    /// Runner environment forwarded to the target app.
    pub launch_env: Vec<(String, String)>,
}

impl TestConfiguration {
    /// Encode as the archived configuration object.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut env = Dict::new();
        for (k, v) in &self.launch_env {
            env.insert(k.clone(), Value::from(v.as_str()));
        }

        let mut d = Dict::new();
        d.insert("sessionIdentifier".into(), self.session_token.to_wire().into());
        d.insert("targetApplicationBundleID".into(), self.target_bundle_id.clone().into());
        d.insert("testBundleURL".into(), format!("file://{}", self.test_bundle_path).into());
        d.insert(
            "targetApplicationArguments".into(),
            Value::Array(self.launch_args.iter().map(|a| Value::from(a.as_str())).collect()),
        );
        d.insert("targetApplicationEnvironment".into(), Value::Dict(env));
        d.insert("reportResultsToIDE".into(), true.into());
        d.insert("reportActivities".into(), true.into());
        d.insert("testsMustRunOnMainThread".into(), true.into());
        d.insert("initializeForUITesting".into(), true.into());
        Value::Dict(d)
    }
}
