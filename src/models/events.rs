//! Test progress events delivered by the runner through the daemon.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Outcome reported for a finished test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    /// The case passed.
    Passed,
    /// The case failed.
    Failed,
    /// The case was skipped.
    Skipped,
    /// The case was expected to fail and did.
    ExpectedFailure,
    /// Any status string the runner sends that is not recognized.
    Unknown,
}

impl TestStatus {
    /// Parse the runner's status string.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw {
            "passed" => Self::Passed,
            "failed" => Self::Failed,
            "skipped" => Self::Skipped,
            "expected failure" => Self::ExpectedFailure,
            _ => Self::Unknown,
        }
    }
}

/// Asynchronous protocol event observed while a test plan executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TestEvent {
    /// The runner loaded its test bundle.
    BundleReady {
        /// Protocol version the runner speaks.
        protocol_version: i64,
    },
    /// The runner asked for its test configuration.
    RunnerReady,
    /// The test plan began executing.
    PlanStarted,
    /// A test suite started.
    SuiteStarted {
        /// Suite name.
        suite: String,
        /// Start timestamp as reported by the runner.
        started_at: String,
    },
    /// A test case started.
    CaseStarted {
        /// Test class name.
        class: String,
        /// Test method name.
        method: String,
    },
    /// A test case failed an assertion.
    CaseFailed {
        /// Test class name.
        class: String,
        /// Test method name.
        method: String,
        /// Failure message.
        message: String,
        /// Source file of the failure.
        file: String,
        /// Source line of the failure.
        line: i64,
    },
    /// A test case finished.
    CaseFinished {
        /// Test class name.
        class: String,
        /// Test method name.
        method: String,
        /// Outcome of the case.
        status: TestStatus,
        /// Wall-clock duration.
        duration: Duration,
    },
    /// Log line emitted by the runner.
    Log {
        /// Message text.
        message: String,
    },
    /// Debug log line emitted by the runner.
    DebugLog {
        /// Message text.
        message: String,
    },
    /// The test plan finished executing.
    PlanFinished,
}
