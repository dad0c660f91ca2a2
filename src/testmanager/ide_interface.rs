//! Handler for the runner's progress callbacks.
//!
//! Every `_XCT_*` invocation the daemon forwards is turned into a
//! [`TestEvent`] and handed to the session's [`TestListener`]. The runner's
//! configuration request is answered with the session's test configuration,
//! and the end of the test plan fires a one-shot completion signal.

use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::models::events::{TestEvent, TestStatus};
use crate::models::session::{SessionToken, TestConfiguration};
use crate::models::value::Value;
use crate::rpc::channel::{Channel, InboundCall, MessageHandler};
use crate::testmanager::{
    XCT_BUNDLE_READY, XCT_CASE_FAILED, XCT_CASE_FINISHED, XCT_CASE_STARTED, XCT_LOG_DEBUG_MESSAGE,
    XCT_LOG_MESSAGE, XCT_PLAN_FINISHED, XCT_PLAN_STARTED, XCT_RUNNER_READY, XCT_SUITE_STARTED,
};
use crate::{AppError, Result};

/// Receives protocol events while a test plan runs.
pub trait TestListener: Send + Sync {
    /// Called once per event, in arrival order.
    fn on_event(&self, event: TestEvent);
}

impl TestListener for mpsc::UnboundedSender<TestEvent> {
    fn on_event(&self, event: TestEvent) {
        // A dropped receiver means the caller stopped listening.
        let _ = self.send(event);
    }
}

/// Inbound handler shared by every channel of one session.
pub struct IdeInterface {
    session_id: SessionToken,
    listener: Arc<dyn TestListener>,
    configuration: OnceLock<Value>,
    finished: Mutex<Option<oneshot::Sender<()>>>,
}

impl std::fmt::Debug for IdeInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdeInterface")
            .field("session_id", &self.session_id)
            .field("configured", &self.configuration.get().is_some())
            .finish_non_exhaustive()
    }
}

impl IdeInterface {
    /// Create the handler and the receiver of its completion signal.
    #[must_use]
    pub fn new(
        session_id: SessionToken,
        listener: Arc<dyn TestListener>,
    ) -> (Arc<Self>, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        let interface = Arc::new(Self {
            session_id,
            listener,
            configuration: OnceLock::new(),
            finished: Mutex::new(Some(tx)),
        });
        (interface, rx)
    }

    /// Install the configuration served to the runner. Only the first call
    /// takes effect.
    pub fn configure(&self, configuration: &TestConfiguration) {
        if self.configuration.set(configuration.to_value()).is_err() {
            debug!(session_id = %self.session_id, "test configuration already installed");
        }
    }

    fn emit(&self, event: TestEvent) {
        self.listener.on_event(event);
    }

    fn signal_finished(&self) {
        let sender = match self.finished.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match sender {
            Some(tx) => {
                info!(session_id = %self.session_id, "test plan finished");
                // The orchestrator may already have left Executing.
                let _ = tx.send(());
            }
            None => debug!(session_id = %self.session_id, "repeated finish signal ignored"),
        }
    }
}

impl MessageHandler for IdeInterface {
    fn handle(&self, channel: &Channel, call: InboundCall) -> Result<Option<Value>> {
        debug!(
            session_id = %self.session_id,
            channel = channel.identifier(),
            selector = call.selector.as_str(),
            "runner callback"
        );

        match call.selector.as_str() {
            XCT_BUNDLE_READY => self.emit(TestEvent::BundleReady {
                protocol_version: call.int_arg(0),
            }),
            XCT_RUNNER_READY => {
                self.emit(TestEvent::RunnerReady);
                let configuration = self.configuration.get().cloned().ok_or_else(|| {
                    AppError::NotFound(format!(
                        "no test configuration for session {}",
                        self.session_id
                    ))
                })?;
                return Ok(Some(configuration));
            }
            XCT_PLAN_STARTED => self.emit(TestEvent::PlanStarted),
            XCT_SUITE_STARTED => self.emit(TestEvent::SuiteStarted {
                suite: call.str_arg(0),
                started_at: call.str_arg(1),
            }),
            XCT_CASE_STARTED => self.emit(TestEvent::CaseStarted {
                class: call.str_arg(0),
                method: call.str_arg(1),
            }),
            XCT_CASE_FAILED => self.emit(TestEvent::CaseFailed {
                class: call.str_arg(0),
                method: call.str_arg(1),
                message: call.str_arg(2),
                file: call.str_arg(3),
                line: call.int_arg(4),
            }),
            XCT_CASE_FINISHED => self.emit(TestEvent::CaseFinished {
                class: call.str_arg(0),
                method: call.str_arg(1),
                status: TestStatus::parse(&call.str_arg(2)),
                duration: duration_arg(call.arg(3)),
            }),
            XCT_LOG_MESSAGE => self.emit(TestEvent::Log {
                message: call.str_arg(0),
            }),
            XCT_LOG_DEBUG_MESSAGE => self.emit(TestEvent::DebugLog {
                message: call.str_arg(0),
            }),
            XCT_PLAN_FINISHED => {
                self.emit(TestEvent::PlanFinished);
                self.signal_finished();
            }
            other => {
                warn!(session_id = %self.session_id, selector = other, "unhandled runner callback");
            }
        }
        Ok(None)
    }
}

/// Case duration: integer milliseconds, or a decimal string of seconds.
fn duration_arg(value: Option<&Value>) -> Duration {
    match value {
        Some(Value::Integer(ms)) => Duration::from_millis(u64::try_from(*ms).unwrap_or_default()),
        Some(Value::String(secs)) => secs
            .parse::<f64>()
            .ok()
            .and_then(|s| Duration::try_from_secs_f64(s).ok())
            .unwrap_or_default(),
        _ => Duration::ZERO,
    }
}
