//! Launch arguments and environment for the test runner process.

use std::collections::BTreeMap;

use tracing::debug;

use crate::models::session::{RunnerPaths, SessionToken};
use crate::{AppError, Result};

/// Arguments every runner launch starts with.
pub const BASELINE_ARGS: [&str; 4] = [
    "-NSTreatUnknownArgumentsAsOpen",
    "NO",
    "-ApplePersistenceIgnoreState",
    "YES",
];

/// Fixed diagnostics environment the runner needs.
const BASELINE_ENV: [(&str, &str); 7] = [
    ("CA_ASSERT_MAIN_THREAD_TRANSACTIONS", "0"),
    ("CA_DEBUG_TRANSACTIONS", "0"),
    (
        "DYLD_INSERT_LIBRARIES",
        "/Developer/usr/lib/libMainThreadChecker.dylib",
    ),
    ("MTC_CRASH_ON_REPORT", "1"),
    ("NSUnbufferedIO", "YES"),
    ("OS_ACTIVITY_DT_MODE", "YES"),
    ("SQLITE_ENABLE_THREAD_ASSERTIONS", "1"),
];

/// Baseline arguments followed by the caller's.
#[must_use]
pub fn runner_arguments(extra: &[String]) -> Vec<String> {
    BASELINE_ARGS
        .iter()
        .map(|a| (*a).to_owned())
        .chain(extra.iter().cloned())
        .collect()
}

/// Split a `KEY=VALUE` entry on its first `=`.
///
/// # Errors
///
/// Returns [`AppError::RunnerLaunchFailed`] if the entry has no `=` or an
/// empty key.
pub fn parse_env_entry(entry: &str) -> Result<(String, String)> {
    match entry.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_owned(), value.to_owned())),
        _ => Err(AppError::RunnerLaunchFailed(format!(
            "environment entry '{entry}' is not KEY=VALUE"
        ))),
    }
}

/// Parse every caller entry, keeping their order.
///
/// # Errors
///
/// Fails on the first malformed entry.
pub fn parse_env_entries(entries: &[String]) -> Result<Vec<(String, String)>> {
    entries.iter().map(|e| parse_env_entry(e)).collect()
}

/// Baseline environment plus session paths, overridden by `overrides`.
///
/// # Errors
///
/// Returns [`AppError::RunnerLaunchFailed`] for a malformed override.
pub fn runner_environment(
    paths: &RunnerPaths,
    token: SessionToken,
    overrides: &[String],
) -> Result<BTreeMap<String, String>> {
    let mut env: BTreeMap<String, String> = BASELINE_ENV
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect();
    env.insert("XCTestBundlePath".into(), paths.test_bundle_path.clone());
    env.insert(
        "XCTestConfigurationFilePath".into(),
        paths.test_config_path.clone(),
    );
    env.insert("XCTestSessionIdentifier".into(), token.to_wire());

    for (key, value) in parse_env_entries(overrides)? {
        debug!(key = key.as_str(), "runner environment override");
        env.insert(key, value);
    }
    Ok(env)
}
