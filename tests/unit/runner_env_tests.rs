//! Unit tests for the runner's launch arguments and environment.

use xctest_driver::models::session::{RunnerPaths, SessionToken};
use xctest_driver::testmanager::runner::{runner_arguments, runner_environment, BASELINE_ARGS};
use xctest_driver::AppError;

fn paths(token: SessionToken) -> RunnerPaths {
    RunnerPaths::compute("/apps/Runner.app", "/data/Runner", "Runner.xctest", token)
}

#[test]
fn caller_arguments_follow_baseline() {
    let args = runner_arguments(&["-only".into(), "LoginTests".into()]);
    assert_eq!(&args[..4], &BASELINE_ARGS.map(String::from));
    assert_eq!(&args[4..], ["-only", "LoginTests"]);
}

#[test]
fn environment_points_at_session_files() {
    let token = SessionToken::generate();
    let env = runner_environment(&paths(token), token, &[]).expect("environment");

    assert_eq!(env["NSUnbufferedIO"], "YES");
    assert_eq!(
        env["DYLD_INSERT_LIBRARIES"],
        "/Developer/usr/lib/libMainThreadChecker.dylib"
    );
    assert_eq!(env["XCTestBundlePath"], "/apps/Runner.app/PlugIns/Runner.xctest");
    assert_eq!(
        env["XCTestConfigurationFilePath"],
        format!("/data/Runner/tmp/{}.xctestconfiguration", token.to_wire())
    );
    assert_eq!(env["XCTestSessionIdentifier"], token.to_wire());
}

/// Caller entries win over the baseline on key collision.
#[test]
fn caller_overrides_win() {
    let token = SessionToken::generate();
    let env = runner_environment(
        &paths(token),
        token,
        &["MTC_CRASH_ON_REPORT=0".into(), "EXTRA=a=b".into()],
    )
    .expect("environment");

    assert_eq!(env["MTC_CRASH_ON_REPORT"], "0");
    assert_eq!(env["EXTRA"], "a=b");
}

#[test]
fn malformed_override_fails_the_launch() {
    let token = SessionToken::generate();
    let err = runner_environment(&paths(token), token, &["JUSTAKEY".into()])
        .expect_err("entry without '=' must fail");
    assert!(matches!(err, AppError::RunnerLaunchFailed(ref msg) if msg.contains("JUSTAKEY")));
}
