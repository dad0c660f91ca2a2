//! Launching and terminating processes on the device.

pub mod remote;

use std::collections::BTreeMap;

use futures_util::future::BoxFuture;

use crate::models::process::{LaunchOptions, ProcessHandle};
use crate::Result;

/// Starts and forcibly stops processes on the device.
pub trait ProcessSupervisor: Send + Sync {
    /// Launch `bundle_id` with the given environment and arguments.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::RunnerLaunchFailed`](crate::AppError::RunnerLaunchFailed)
    /// if the process cannot be started.
    fn start_process<'a>(
        &'a self,
        bundle_id: &'a str,
        environment: &'a BTreeMap<String, String>,
        arguments: &'a [String],
        options: LaunchOptions,
    ) -> BoxFuture<'a, Result<ProcessHandle>>;

    /// Terminate the process behind `handle`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::TerminationFailed`](crate::AppError::TerminationFailed)
    /// if the handle is unknown or the request cannot be delivered.
    fn kill_process(&self, handle: ProcessHandle) -> BoxFuture<'_, Result<()>>;
}
