//! Remote process handles and launch options.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::models::value::{Dict, Value};

/// Opaque handle to a process launched on the device (its pid).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessHandle(u64);

impl ProcessHandle {
    /// Wrap a raw pid.
    #[must_use]
    pub fn new(pid: u64) -> Self {
        Self(pid)
    }

    /// Raw pid.
    #[must_use]
    pub fn pid(self) -> u64 {
        self.0
    }
}

impl Display for ProcessHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Options passed alongside a launch request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchOptions {
    /// Launch the process suspended.
    pub start_suspended: bool,
    /// Bring the process to the foreground once started.
    pub activate: bool,
}

impl LaunchOptions {
    /// Options used for the test runner: running and foregrounded.
    #[must_use]
    pub fn test_runner() -> Self {
        Self {
            start_suspended: false,
            activate: true,
        }
    }

    /// Encode as the options mapping understood by process control.
    #[must_use]
    pub fn to_value(self) -> Value {
        let mut d = Dict::new();
        d.insert("StartSuspendedKey".into(), Value::Integer(i64::from(self.start_suspended)));
        d.insert("ActivateSuspended".into(), Value::Integer(i64::from(self.activate)));
        Value::Dict(d)
    }
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self::test_runner()
    }
}
