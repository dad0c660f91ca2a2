//! Integration tests for the process control supervisor.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use xctest_driver::models::process::{LaunchOptions, ProcessHandle};
use xctest_driver::models::value::Value;
use xctest_driver::process::remote::{RemoteProcessControl, KILL_SELECTOR, LAUNCH_SELECTOR};
use xctest_driver::process::ProcessSupervisor;
use xctest_driver::rpc::{Channel, InboundCall, MessageHandler};
use xctest_driver::{AppError, Result};

use super::test_helpers::{codec, eventually, FakeConnector};

const SERVICE: &str = "com.apple.instruments.remoteserver.DVTSecureSocketProxy";
const CHANNEL: &str = "com.apple.instruments.server.services.processcontrol";

/// Calls the fake process control service received.
#[derive(Default)]
struct ProcessService {
    calls: Mutex<Vec<InboundCall>>,
}

impl ProcessService {
    fn calls(&self, selector: &str) -> Vec<InboundCall> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.selector == selector)
            .cloned()
            .collect()
    }
}

/// Connect a supervisor to a service that answers launches with `pid`.
async fn supervisor(
    pid: Option<i64>,
) -> (RemoteProcessControl, Arc<ProcessService>, Arc<FakeConnector>) {
    let service = Arc::new(ProcessService::default());
    let recorder = Arc::clone(&service);
    let connector = Arc::new(FakeConnector::new(move |_| {
        let recorder = Arc::clone(&recorder);
        let handler: Arc<dyn MessageHandler> = Arc::new(
            move |_: &Channel, call: InboundCall| -> Result<Option<Value>> {
                let selector = call.selector.clone();
                recorder.calls.lock().unwrap().push(call);
                match selector.as_str() {
                    LAUNCH_SELECTOR => pid.map(Value::from).map(Some).ok_or_else(|| {
                        AppError::NotFound("application not installed".into())
                    }),
                    KILL_SELECTOR => Ok(None),
                    other => Err(AppError::NotFound(other.to_owned())),
                }
            },
        );
        handler
    }));

    let control = RemoteProcessControl::connect(
        connector.as_ref(),
        SERVICE,
        CHANNEL,
        codec(),
        Some(Duration::from_secs(2)),
    )
    .await
    .expect("process control connects");
    (control, service, connector)
}

fn runner_env() -> BTreeMap<String, String> {
    BTreeMap::from([("NSUnbufferedIO".to_owned(), "YES".to_owned())])
}

#[tokio::test]
async fn launch_sends_bundle_environment_arguments_and_options() {
    let (control, service, connector) = supervisor(Some(811)).await;
    assert_eq!(*connector.services.lock().unwrap(), vec![SERVICE.to_owned()]);

    let handle = control
        .start_process(
            "com.app.runner",
            &runner_env(),
            &["-NSTreatUnknownArgumentsAsOpen".to_owned(), "NO".to_owned()],
            LaunchOptions::test_runner(),
        )
        .await
        .expect("launch");
    assert_eq!(handle, ProcessHandle::new(811));

    let launches = service.calls(LAUNCH_SELECTOR);
    assert_eq!(launches.len(), 1);
    let call = &launches[0];
    assert_eq!(call.str_arg(0), "com.app.runner");
    assert_eq!(
        call.arg(1).and_then(|env| env.get("NSUnbufferedIO")),
        Some(&Value::from("YES"))
    );
    assert_eq!(
        call.arg(2).and_then(Value::as_array).map(<[Value]>::len),
        Some(2)
    );
    assert_eq!(call.arg(3), Some(&LaunchOptions::test_runner().to_value()));
    control.close().await.unwrap();
}

/// A handle can be killed once; afterwards it is no longer known.
#[tokio::test]
async fn second_kill_of_same_handle_fails() {
    let (control, service, _connector) = supervisor(Some(812)).await;
    let handle = control
        .start_process("com.app.runner", &runner_env(), &[], LaunchOptions::default())
        .await
        .unwrap();

    control.kill_process(handle).await.expect("first kill");
    assert!(
        eventually(Duration::from_secs(1), || !service.calls(KILL_SELECTOR).is_empty()).await,
        "kill reached the device"
    );
    assert_eq!(service.calls(KILL_SELECTOR)[0].int_arg(0), 812);

    let err = control.kill_process(handle).await.expect_err("already killed");
    assert!(matches!(err, AppError::TerminationFailed(_)));
    control.close().await.unwrap();
}

#[tokio::test]
async fn killing_unknown_handle_fails() {
    let (control, service, _connector) = supervisor(Some(813)).await;
    let err = control
        .kill_process(ProcessHandle::new(99))
        .await
        .expect_err("never launched");
    assert!(matches!(err, AppError::TerminationFailed(ref msg) if msg.contains("99")));
    assert!(service.calls(KILL_SELECTOR).is_empty());
    control.close().await.unwrap();
}

#[tokio::test]
async fn launch_fault_is_a_launch_failure() {
    let (control, _service, _connector) = supervisor(None).await;
    let err = control
        .start_process("com.app.missing", &BTreeMap::new(), &[], LaunchOptions::default())
        .await
        .expect_err("device refuses");
    assert!(
        matches!(err, AppError::RunnerLaunchFailed(ref msg) if msg.contains("not installed"))
    );
    control.close().await.unwrap();
}

/// A zero pid means the launch did not happen.
#[tokio::test]
async fn zero_pid_is_a_launch_failure() {
    let (control, _service, _connector) = supervisor(Some(0)).await;
    let err = control
        .start_process("com.app.runner", &runner_env(), &[], LaunchOptions::default())
        .await
        .expect_err("no pid");
    assert!(matches!(err, AppError::RunnerLaunchFailed(_)));
    control.close().await.unwrap();
}

#[tokio::test]
async fn unreachable_service_fails_setup() {
    let connector = FakeConnector::unreachable();
    let err = RemoteProcessControl::connect(&connector, SERVICE, CHANNEL, codec(), None)
        .await
        .expect_err("unreachable");
    assert!(matches!(err, AppError::ConnectionSetupFailed(_)));
}
