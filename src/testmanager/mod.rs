//! Test manager daemon protocol and the session orchestrator.
//!
//! The controller talks to the daemon through two connections. Each carries
//! a proxy channel whose requests use the `_IDE_*` selectors below; the
//! runner's progress callbacks arrive as `_XCT_*` invocations that the
//! [`ide_interface::IdeInterface`] turns into [`TestEvent`]s.
//!
//! [`TestEvent`]: crate::models::events::TestEvent

pub mod daemon;
pub mod ide_interface;
pub mod orchestrator;
pub mod runner;

/// Negotiates a control session on the primary channel.
pub const INITIATE_CONTROL_SESSION: &str = "_IDE_initiateControlSessionWithCapabilities:";
/// Establishes the named test session on the secondary channel.
pub const INITIATE_SESSION: &str = "_IDE_initiateSessionWithIdentifier:capabilities:";
/// Authorizes the launched runner pid for the control session.
pub const AUTHORIZE_TEST_SESSION: &str = "_IDE_authorizeTestSessionWithProcessID:";
/// Starts the test plan on the event channel.
pub const START_EXECUTING_TEST_PLAN: &str = "_IDE_startExecutingTestPlanWithProtocolVersion:";

/// Runner loaded its test bundle.
pub const XCT_BUNDLE_READY: &str = "_XCT_testBundleReadyWithProtocolVersion:minimumVersion:";
/// Runner asks for its test configuration.
pub const XCT_RUNNER_READY: &str = "_XCT_testRunnerReadyWithCapabilities:";
/// Test plan began.
pub const XCT_PLAN_STARTED: &str = "_XCT_didBeginExecutingTestPlan";
/// Test plan finished.
pub const XCT_PLAN_FINISHED: &str = "_XCT_didFinishExecutingTestPlan";
/// Suite started.
pub const XCT_SUITE_STARTED: &str = "_XCT_testSuite:didStartAt:";
/// Case started.
pub const XCT_CASE_STARTED: &str = "_XCT_testCaseDidStartForTestClass:method:";
/// Case failed an assertion.
pub const XCT_CASE_FAILED: &str = "_XCT_testCaseDidFailForTestClass:method:withMessage:file:line:";
/// Case finished.
pub const XCT_CASE_FINISHED: &str =
    "_XCT_testCaseDidFinishForTestClass:method:withStatus:duration:";
/// Runner log line.
pub const XCT_LOG_MESSAGE: &str = "_XCT_logMessage:";
/// Runner debug log line.
pub const XCT_LOG_DEBUG_MESSAGE: &str = "_XCT_logDebugMessage:";
