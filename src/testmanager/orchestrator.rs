//! Session orchestrator: drives one UI test run end to end.
//!
//! ```text
//! Init → ChannelsOpening → Negotiating → SessionStarting → RunnerLaunching
//!      → Authorizing → Executing → { Completed | Cancelled | Failed }
//! ```
//!
//! Every resource a step acquires is recorded on the session before the
//! next step runs. Teardown runs exactly once after the run reaches a
//! terminal state and attempts every release step even when an earlier
//! one fails.

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::DriverConfig;
use crate::device::BundleLocator;
use crate::models::process::{LaunchOptions, ProcessHandle};
use crate::models::session::{
    RunnerPaths, SessionState, SessionToken, TestConfiguration, TestRunRequest,
};
use crate::process::ProcessSupervisor;
use crate::rpc::channel::{Channel, MessageHandler};
use crate::rpc::connection::{ArgumentCodec, Connector};
use crate::testmanager::daemon::DaemonProxy;
use crate::testmanager::ide_interface::{IdeInterface, TestListener};
use crate::testmanager::runner::{parse_env_entries, runner_arguments, runner_environment};
use crate::{AppError, Result};

/// Resources and state of one run.
struct Session {
    token: SessionToken,
    state: SessionState,
    primary: Option<DaemonProxy>,
    secondary: Option<DaemonProxy>,
    event_channel: Option<Channel>,
    process: Option<ProcessHandle>,
}

impl Session {
    fn new() -> Self {
        Self {
            token: SessionToken::generate(),
            state: SessionState::Init,
            primary: None,
            secondary: None,
            event_channel: None,
            process: None,
        }
    }

    fn transition(&mut self, next: SessionState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(AppError::ProtocolSequenceViolation(format!(
                "session cannot move from {} to {next}",
                self.state
            )));
        }
        info!(session_id = %self.token, from = %self.state, to = %next, "session state changed");
        self.state = next;
        Ok(())
    }
}

/// How the `Executing` wait ended.
enum Outcome {
    Completed,
    Cancelled,
}

/// Runs UI test sessions against one device.
pub struct TestSessionDriver {
    connector: Arc<dyn Connector>,
    supervisor: Arc<dyn ProcessSupervisor>,
    locator: Arc<dyn BundleLocator>,
    codec: Arc<dyn ArgumentCodec>,
    config: Arc<DriverConfig>,
}

impl std::fmt::Debug for TestSessionDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestSessionDriver")
            .field("service", &self.config.testmanager.service)
            .finish_non_exhaustive()
    }
}

impl TestSessionDriver {
    /// Assemble a driver from its device capabilities.
    #[must_use]
    pub fn new(
        connector: Arc<dyn Connector>,
        supervisor: Arc<dyn ProcessSupervisor>,
        locator: Arc<dyn BundleLocator>,
        config: Arc<DriverConfig>,
        codec: Arc<dyn ArgumentCodec>,
    ) -> Self {
        Self {
            connector,
            supervisor,
            locator,
            codec,
            config,
        }
    }

    /// Run one test session until the plan finishes or `cancel` fires.
    ///
    /// `listener` receives the runner's events. Cancellation is honored
    /// once the runner has launched; the runner is then killed without
    /// waiting for the daemon.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Session`] naming the phase that failed, with the
    /// failure as its source and any teardown failures attached. A
    /// completed or cancelled run returns `Ok(())`.
    pub async fn run_session(
        &self,
        request: &TestRunRequest,
        listener: Arc<dyn TestListener>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut session = Session::new();
        info!(
            session_id = %session.token,
            bundle_id = request.bundle_id.as_str(),
            runner = request.runner_bundle_id.as_str(),
            "starting test session"
        );

        let outcome = self.drive(&mut session, request, listener, &cancel).await;

        let terminal = match &outcome {
            Ok(Outcome::Completed) => SessionState::Completed,
            Ok(Outcome::Cancelled) => SessionState::Cancelled,
            Err(_) => SessionState::Failed,
        };
        let phase = session.state;
        if let Err(err) = session.transition(terminal) {
            warn!(session_id = %session.token, error = %err, "terminal transition rejected");
            session.state = terminal;
        }

        let teardown = self.teardown(&mut session).await;

        match outcome {
            Ok(_) => {
                if !teardown.is_empty() {
                    warn!(
                        session_id = %session.token,
                        failures = teardown.len(),
                        "teardown finished with errors"
                    );
                }
                info!(session_id = %session.token, state = %session.state, "test session ended");
                Ok(())
            }
            Err(source) => {
                error!(
                    session_id = %session.token,
                    %phase,
                    error = %source,
                    "test session failed"
                );
                Err(AppError::Session {
                    phase,
                    source: Box::new(source),
                    teardown,
                })
            }
        }
    }

    async fn drive(
        &self,
        session: &mut Session,
        request: &TestRunRequest,
        listener: Arc<dyn TestListener>,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        let (ide, finished) = IdeInterface::new(session.token, listener);
        let handler: Arc<dyn MessageHandler> = Arc::clone(&ide) as Arc<dyn MessageHandler>;

        session.transition(SessionState::ChannelsOpening)?;
        session.primary = Some(self.connect_proxy(Arc::clone(&handler)).await?);
        session.secondary = Some(self.connect_proxy(handler).await?);
        let (primary, secondary) = proxies(session)?;

        session.transition(SessionState::Negotiating)?;
        let control = primary.initiate_control_session().await?;
        debug!(session_id = %session.token, capabilities = ?control, "control session ready");

        session.transition(SessionState::SessionStarting)?;
        let accepted = secondary
            .initiate_session(session.token, &self.config.capabilities)
            .await?;
        debug!(session_id = %session.token, capabilities = ?accepted, "test session ready");

        let target = self.locator.locate(&request.bundle_id).await?;
        debug!(session_id = %session.token, path = target.path.as_str(), "target app located");
        let runner = self.locator.locate(&request.runner_bundle_id).await?;
        let paths = RunnerPaths::compute(
            &runner.path,
            &runner.container,
            &request.test_config_file_name,
            session.token,
        );
        debug!(
            session_id = %session.token,
            config_path = paths.test_config_path.as_str(),
            "runner paths computed"
        );

        session.transition(SessionState::RunnerLaunching)?;
        let environment = runner_environment(&paths, session.token, &request.launch_env)?;
        let arguments = runner_arguments(&request.launch_args);
        // The runner asks for its configuration as soon as it starts.
        ide.configure(&TestConfiguration {
            session_token: session.token,
            target_bundle_id: request.bundle_id.clone(),
            test_bundle_path: paths.test_bundle_path.clone(),
            launch_args: request.launch_args.clone(),
            launch_env: parse_env_entries(&request.launch_env)?,
        });
        let handle = self
            .supervisor
            .start_process(
                &request.runner_bundle_id,
                &environment,
                &arguments,
                LaunchOptions::test_runner(),
            )
            .await
            .map_err(|e| match e {
                AppError::RunnerLaunchFailed(_) => e,
                other => AppError::RunnerLaunchFailed(other.to_string()),
            })?;
        session.process = Some(handle);
        info!(session_id = %session.token, pid = handle.pid(), "test runner launched");

        session.transition(SessionState::Authorizing)?;
        let mut events = None;
        let started = tokio::select! {
            biased;

            () = cancel.cancelled() => None,

            started = self.start_test_plan(session.token, &primary, &secondary, handle, &mut events) => {
                Some(started)
            }
        };
        session.event_channel = events;
        match started {
            Some(started) => started?,
            None => return Ok(self.cancel_run(session).await),
        }

        session.transition(SessionState::Executing)?;
        self.await_outcome(session, &primary, &secondary, finished, cancel)
            .await
    }

    /// Authorize the runner, wait for the event channel, and start the plan.
    ///
    /// The event channel is stored in `events` as soon as it opens so
    /// teardown closes it even when the plan fails to start.
    async fn start_test_plan(
        &self,
        token: SessionToken,
        primary: &DaemonProxy,
        secondary: &DaemonProxy,
        handle: ProcessHandle,
        events: &mut Option<Channel>,
    ) -> Result<()> {
        let delay = self.config.authorization_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Err(err) = primary.authorize_test_session(handle).await {
            warn!(session_id = %token, pid = handle.pid(), error = %err, "authorization request not sent");
        }

        let channel = secondary
            .accept_event_channel(self.config.event_channel_timeout())
            .await?;
        let channel = events.insert(channel);
        secondary
            .start_executing_test_plan(channel, self.config.testmanager.protocol_version)
            .await
    }

    async fn await_outcome(
        &self,
        session: &mut Session,
        primary: &DaemonProxy,
        secondary: &DaemonProxy,
        finished: oneshot::Receiver<()>,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        tokio::select! {
            biased;

            () = cancel.cancelled() => Ok(self.cancel_run(session).await),

            signal = finished => match signal {
                Ok(()) => Ok(Outcome::Completed),
                Err(_) => Err(AppError::ConnectionLost(
                    "completion signal dropped before the test plan finished".into(),
                )),
            },

            () = secondary.dispatcher().closed() => Err(AppError::ConnectionLost(format!(
                "{} closed while the test plan was executing",
                secondary.dispatcher().label()
            ))),

            () = primary.dispatcher().closed() => Err(AppError::ConnectionLost(format!(
                "{} closed while the test plan was executing",
                primary.dispatcher().label()
            ))),
        }
    }

    /// Kill the runner right away; teardown then has nothing left to kill.
    async fn cancel_run(&self, session: &mut Session) -> Outcome {
        info!(session_id = %session.token, state = %session.state, "cancellation requested");
        if let Some(handle) = session.process.take() {
            self.kill(session.token, handle).await;
        }
        Outcome::Cancelled
    }

    async fn connect_proxy(&self, handler: Arc<dyn MessageHandler>) -> Result<DaemonProxy> {
        let tm = &self.config.testmanager;
        DaemonProxy::connect(
            self.connector.as_ref(),
            &tm.service,
            &tm.proxy_channel,
            Arc::clone(&self.codec),
            self.config.invoke_timeout(),
            Some(handler),
        )
        .await
    }

    /// Kill the runner; a failure is only logged.
    async fn kill(&self, token: SessionToken, handle: ProcessHandle) -> Option<AppError> {
        match self.supervisor.kill_process(handle).await {
            Ok(()) => {
                info!(session_id = %token, pid = handle.pid(), "test runner killed");
                None
            }
            Err(err) => {
                warn!(session_id = %token, pid = handle.pid(), error = %err, "failed to kill test runner");
                Some(err)
            }
        }
    }

    /// Release everything the session holds, attempting every step.
    async fn teardown(&self, session: &mut Session) -> Vec<AppError> {
        let mut failures = Vec::new();

        if let Some(handle) = session.process.take() {
            failures.extend(self.kill(session.token, handle).await);
        }

        if let Some(events) = session.event_channel.take() {
            if let Err(err) = events.close().await {
                warn!(session_id = %session.token, error = %err, "failed to close event channel");
                failures.push(err);
            }
        }

        for proxy in [session.secondary.take(), session.primary.take()]
            .into_iter()
            .flatten()
        {
            if let Err(err) = proxy.close().await {
                warn!(
                    session_id = %session.token,
                    connection = proxy.dispatcher().label(),
                    error = %err,
                    "failed to close daemon connection"
                );
                failures.push(err);
            }
        }

        debug!(session_id = %session.token, failures = failures.len(), "teardown complete");
        failures
    }
}

/// Both proxies, cloned out so the session can still be mutated.
fn proxies(session: &Session) -> Result<(DaemonProxy, DaemonProxy)> {
    match (&session.primary, &session.secondary) {
        (Some(primary), Some(secondary)) => Ok((primary.clone(), secondary.clone())),
        _ => Err(AppError::ProtocolSequenceViolation(
            "daemon connections are not open".into(),
        )),
    }
}
