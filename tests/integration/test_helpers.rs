//! Shared fixtures for integration tests.
//!
//! Every fake device service is built from the crate's own [`Dispatcher`]
//! running over an in-memory duplex stream, so tests exercise the real
//! framing and routing on both ends.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use xctest_driver::device::StaticBundleLocator;
use xctest_driver::models::capabilities::Capabilities;
use xctest_driver::models::process::{LaunchOptions, ProcessHandle};
use xctest_driver::models::value::Value;
use xctest_driver::process::ProcessSupervisor;
use xctest_driver::rpc::codec::{JsonArgumentCodec, DEFAULT_MAX_FRAME_BYTES};
use xctest_driver::rpc::message::{Message, Payload, REQUEST_CHANNEL_SELECTOR};
use xctest_driver::rpc::stream::StreamConnection;
use xctest_driver::rpc::{ArgumentCodec, Channel, Connection, Connector, Dispatcher, InboundCall, MessageHandler};
use xctest_driver::testmanager::{
    AUTHORIZE_TEST_SESSION, INITIATE_CONTROL_SESSION, INITIATE_SESSION,
    START_EXECUTING_TEST_PLAN, XCT_CASE_FINISHED, XCT_CASE_STARTED, XCT_LOG_MESSAGE,
    XCT_PLAN_FINISHED, XCT_PLAN_STARTED, XCT_RUNNER_READY,
};
use xctest_driver::{AppError, DriverConfig, Result, TestSessionDriver};

pub const APP_BUNDLE: &str = "com.app.under.test";
pub const RUNNER_BUNDLE: &str = "com.app.runner";
pub const RUNNER_PID: u64 = 4242;
pub const EVENT_CHANNEL: &str = "dtxproxy:XCTestDriverInterface:XCTestManager_IDEInterface";

pub fn codec() -> Arc<dyn ArgumentCodec> {
    Arc::new(JsonArgumentCodec)
}

/// Two ends of one in-memory link.
pub fn connection_pair(label: &str) -> (Arc<dyn Connection>, Arc<dyn Connection>) {
    let (near, far) = tokio::io::duplex(64 * 1024);
    (
        Arc::new(StreamConnection::new(
            format!("{label}/controller"),
            near,
            DEFAULT_MAX_FRAME_BYTES,
        )),
        Arc::new(StreamConnection::new(
            format!("{label}/device"),
            far,
            DEFAULT_MAX_FRAME_BYTES,
        )),
    )
}

/// Controller and device dispatchers joined by one link.
pub fn dispatcher_pair(label: &str) -> (Dispatcher, Dispatcher) {
    let (near, far) = connection_pair(label);
    (
        Dispatcher::new(format!("{label}/controller"), near, codec(), None),
        Dispatcher::new(format!("{label}/device"), far, codec(), None),
    )
}

/// Answer the controller's channel request on a raw device link and return
/// the channel code it chose.
pub async fn serve_channel_open(device: &dyn Connection) -> (i32, String) {
    let frame = device
        .recv()
        .await
        .expect("read channel request")
        .expect("link open");
    assert_eq!(frame.channel, 0, "channel requests travel on the control channel");
    let Payload::Invoke {
        selector,
        arguments,
    } = frame.payload
    else {
        panic!("expected an invocation, got {:?}", frame.payload);
    };
    assert_eq!(selector, REQUEST_CHANNEL_SELECTOR);

    let args = JsonArgumentCodec.decode(&arguments).expect("decode arguments");
    let args = args.as_array().expect("argument array").to_vec();
    let code = i32::try_from(args[0].as_i64().expect("code")).expect("code fits");
    let identifier = args[1].as_str().expect("identifier").to_owned();

    device
        .send(Message::reply(0, frame.identifier, None))
        .await
        .expect("acknowledge channel");
    (code, identifier)
}

/// Poll `check` until it holds or `limit` elapses.
pub async fn eventually(limit: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

type HandlerFactory = Box<dyn Fn(&Dispatcher) -> Arc<dyn MessageHandler> + Send + Sync>;

/// [`Connector`] whose every connection reaches a fresh in-memory service.
pub struct FakeConnector {
    make_handler: HandlerFactory,
    refuse: bool,
    pub services: Mutex<Vec<String>>,
}

impl FakeConnector {
    pub fn new(
        make_handler: impl Fn(&Dispatcher) -> Arc<dyn MessageHandler> + Send + Sync + 'static,
    ) -> Self {
        Self {
            make_handler: Box::new(make_handler),
            refuse: false,
            services: Mutex::new(Vec::new()),
        }
    }

    /// Connector whose every connect fails.
    pub fn unreachable() -> Self {
        let mut connector = Self::new(|_| {
            let handler: Arc<dyn MessageHandler> =
                Arc::new(|_: &Channel, _: InboundCall| -> Result<Option<Value>> { Ok(None) });
            handler
        });
        connector.refuse = true;
        connector
    }

    pub fn connect_count(&self) -> usize {
        self.services.lock().unwrap().len()
    }
}

impl Connector for FakeConnector {
    fn connect(&self, service: &str) -> BoxFuture<'_, Result<Arc<dyn Connection>>> {
        let service = service.to_owned();
        Box::pin(async move {
            if self.refuse {
                return Err(AppError::ConnectionSetupFailed(format!(
                    "{service} is unreachable"
                )));
            }
            let (near, far) = connection_pair(&service);
            let device = Dispatcher::new(format!("device:{service}"), far, codec(), None);
            device.on_remote_channel((self.make_handler)(&device)).await;

            self.services.lock().unwrap().push(service);
            Ok(near)
        })
    }
}

// ── Fake test manager daemon ────────────────────────────────────────────────

/// How the fake daemon behaves during a run.
#[derive(Debug, Clone, Copy, Default)]
pub struct DaemonScript {
    /// Answer the authorization request with a fault.
    pub refuse_authorization: bool,
    /// Never open the event channel.
    pub withhold_event_channel: bool,
    /// Answer the test plan start with a fault.
    pub refuse_test_plan: bool,
    /// Run a short plan and report it finished.
    pub finish_plan: bool,
    /// Drop the event connection shortly after the plan starts.
    pub drop_after_start: bool,
}

#[derive(Default)]
pub struct DaemonState {
    pub script: DaemonScript,
    pub selectors: Mutex<Vec<String>>,
    pub authorized: Mutex<Vec<i64>>,
    pub runner_configuration: Mutex<Option<Value>>,
}

impl DaemonState {
    pub fn new(script: DaemonScript) -> Arc<Self> {
        Arc::new(Self {
            script,
            ..Self::default()
        })
    }

    pub fn selectors(&self) -> Vec<String> {
        self.selectors.lock().unwrap().clone()
    }
}

/// Connector reaching a fake test manager daemon.
pub fn daemon_connector(state: &Arc<DaemonState>) -> Arc<FakeConnector> {
    let state = Arc::clone(state);
    Arc::new(FakeConnector::new(move |device| {
        daemon_handler(Arc::clone(&state), device.clone())
    }))
}

fn daemon_handler(state: Arc<DaemonState>, device: Dispatcher) -> Arc<dyn MessageHandler> {
    Arc::new(
        move |_: &Channel, call: InboundCall| -> Result<Option<Value>> {
            state.selectors.lock().unwrap().push(call.selector.clone());
            match call.selector.as_str() {
                INITIATE_CONTROL_SESSION => Ok(Some(Capabilities::empty().to_value()?)),
                INITIATE_SESSION => {
                    let acknowledged: Capabilities =
                        [("XCTIssue capability", 1), ("skipped test capability", 1)]
                            .into_iter()
                            .collect();
                    if !state.script.withhold_event_channel {
                        let device = device.clone();
                        let state = Arc::clone(&state);
                        tokio::spawn(async move {
                            let handler = event_handler(state, device.clone());
                            let _ = device
                                .open_channel_with_handler(EVENT_CHANNEL, Some(handler))
                                .await;
                        });
                    }
                    Ok(Some(acknowledged.to_value()?))
                }
                AUTHORIZE_TEST_SESSION => {
                    state.authorized.lock().unwrap().push(call.int_arg(0));
                    if state.script.refuse_authorization {
                        return Err(AppError::RemoteFault(format!(
                            "pid {} is not entitled to a test session",
                            call.int_arg(0)
                        )));
                    }
                    Ok(Some(Value::from(true)))
                }
                other => Err(AppError::NotFound(format!("daemon has no {other}"))),
            }
        },
    )
}

fn event_handler(state: Arc<DaemonState>, device: Dispatcher) -> Arc<dyn MessageHandler> {
    Arc::new(
        move |channel: &Channel, call: InboundCall| -> Result<Option<Value>> {
            state.selectors.lock().unwrap().push(call.selector.clone());
            if call.selector != START_EXECUTING_TEST_PLAN {
                return Err(AppError::NotFound(call.selector));
            }
            if state.script.refuse_test_plan {
                return Err(AppError::RemoteFault(format!(
                    "protocol version {} unsupported",
                    call.int_arg(0)
                )));
            }
            if state.script.finish_plan {
                tokio::spawn(run_plan(channel.clone(), Arc::clone(&state)));
            }
            if state.script.drop_after_start {
                let device = device.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    let _ = device.close().await;
                });
            }
            Ok(None)
        },
    )
}

/// Play the runner's side of a one-case plan.
async fn run_plan(channel: Channel, state: Arc<DaemonState>) {
    let configuration = channel
        .invoke(XCT_RUNNER_READY, vec![Capabilities::empty().to_value().unwrap()])
        .await;
    *state.runner_configuration.lock().unwrap() = configuration.ok().flatten();

    let events: [(&str, Vec<Value>); 5] = [
        (XCT_PLAN_STARTED, Vec::new()),
        (
            XCT_CASE_STARTED,
            vec![Value::from("LoginTests"), Value::from("testValidLogin")],
        ),
        (
            XCT_CASE_FINISHED,
            vec![
                Value::from("LoginTests"),
                Value::from("testValidLogin"),
                Value::from("passed"),
                Value::from(1200_i64),
            ],
        ),
        (XCT_LOG_MESSAGE, vec![Value::from("all done")]),
        (XCT_PLAN_FINISHED, Vec::new()),
    ];
    for (selector, args) in events {
        if channel.notify(selector, args).await.is_err() {
            return;
        }
    }
}

// ── Fake process supervisor ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Launch {
    pub bundle_id: String,
    pub environment: BTreeMap<String, String>,
    pub arguments: Vec<String>,
    pub options: LaunchOptions,
}

#[derive(Default)]
pub struct FakeSupervisor {
    pub launches: Mutex<Vec<Launch>>,
    pub kills: Mutex<Vec<ProcessHandle>>,
    /// Fired right after the runner launches.
    pub cancel_on_launch: Option<CancellationToken>,
    /// Every kill reports the process as already gone.
    pub fail_kill: bool,
}

impl FakeSupervisor {
    pub fn kills(&self) -> Vec<ProcessHandle> {
        self.kills.lock().unwrap().clone()
    }

    pub fn launches(&self) -> Vec<Launch> {
        self.launches.lock().unwrap().clone()
    }
}

impl ProcessSupervisor for FakeSupervisor {
    fn start_process<'a>(
        &'a self,
        bundle_id: &'a str,
        environment: &'a BTreeMap<String, String>,
        arguments: &'a [String],
        options: LaunchOptions,
    ) -> BoxFuture<'a, Result<ProcessHandle>> {
        Box::pin(async move {
            self.launches.lock().unwrap().push(Launch {
                bundle_id: bundle_id.to_owned(),
                environment: environment.clone(),
                arguments: arguments.to_vec(),
                options,
            });
            if let Some(token) = &self.cancel_on_launch {
                token.cancel();
            }
            Ok(ProcessHandle::new(RUNNER_PID))
        })
    }

    fn kill_process(&self, handle: ProcessHandle) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.kills.lock().unwrap().push(handle);
            if self.fail_kill {
                return Err(AppError::TerminationFailed(format!("pid {handle} already exited")));
            }
            Ok(())
        })
    }
}

// ── Driver assembly ─────────────────────────────────────────────────────────

pub fn test_config() -> DriverConfig {
    DriverConfig::from_toml_str(
        r"
[testmanager]
authorization_delay_ms = 0
event_channel_timeout_seconds = 5
invoke_timeout_seconds = 5
",
    )
    .expect("valid test config")
}

pub fn locator() -> StaticBundleLocator {
    StaticBundleLocator::new()
        .with_bundle(
            APP_BUNDLE,
            "/private/var/containers/Bundle/Application/A/App.app",
            "/private/var/mobile/Containers/Data/Application/A",
        )
        .with_bundle(
            RUNNER_BUNDLE,
            "/private/var/containers/Bundle/Application/R/Runner-Runner.app",
            "/private/var/mobile/Containers/Data/Application/R",
        )
}

pub fn driver(
    connector: Arc<FakeConnector>,
    supervisor: Arc<FakeSupervisor>,
    locator: StaticBundleLocator,
) -> TestSessionDriver {
    TestSessionDriver::new(
        connector,
        supervisor,
        Arc::new(locator),
        Arc::new(test_config()),
        codec(),
    )
}
