//! [`ProcessSupervisor`] backed by the device's process control service.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::models::process::{LaunchOptions, ProcessHandle};
use crate::models::value::{Dict, Value};
use crate::process::ProcessSupervisor;
use crate::rpc::channel::Channel;
use crate::rpc::connection::{ArgumentCodec, Connector};
use crate::rpc::dispatcher::Dispatcher;
use crate::{AppError, Result};

/// Selector that launches an application.
pub const LAUNCH_SELECTOR: &str = "launchSuitableJournalWithBundleId:environment:arguments:options:";
/// Selector that kills a pid.
pub const KILL_SELECTOR: &str = "killPid:";

/// Process control over its own connection and channel.
#[derive(Debug)]
pub struct RemoteProcessControl {
    dispatcher: Dispatcher,
    channel: Channel,
    launched: Mutex<HashSet<ProcessHandle>>,
}

impl RemoteProcessControl {
    /// Connect to `service` and open the process control `channel`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::ConnectionSetupFailed`] if either step fails.
    pub async fn connect(
        connector: &dyn Connector,
        service: &str,
        channel: &str,
        codec: Arc<dyn ArgumentCodec>,
        invoke_timeout: Option<Duration>,
    ) -> Result<Self> {
        let connection = connector.connect(service).await?;
        let dispatcher = Dispatcher::new(service, connection, codec, invoke_timeout);
        match dispatcher.open_channel(channel).await {
            Ok(channel) => Ok(Self::new(dispatcher, channel)),
            Err(err) => {
                if let Err(close_err) = dispatcher.close().await {
                    debug!(service, error = %close_err, "close after failed channel open");
                }
                Err(AppError::ConnectionSetupFailed(format!(
                    "cannot open '{channel}' on {service}: {err}"
                )))
            }
        }
    }

    /// Use an already opened process control channel.
    #[must_use]
    pub fn new(dispatcher: Dispatcher, channel: Channel) -> Self {
        Self {
            dispatcher,
            channel,
            launched: Mutex::new(HashSet::new()),
        }
    }

    /// Close the channel and connection.
    ///
    /// # Errors
    ///
    /// Returns the first close failure; both steps are attempted.
    pub async fn close(&self) -> Result<()> {
        let channel = self.channel.close().await;
        let connection = self.dispatcher.close().await;
        channel.and(connection)
    }

    async fn launch(
        &self,
        bundle_id: &str,
        environment: &BTreeMap<String, String>,
        arguments: &[String],
        options: LaunchOptions,
    ) -> Result<ProcessHandle> {
        let env: Dict = environment
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(v.as_str())))
            .collect();
        let args = arguments.iter().map(|a| Value::from(a.as_str())).collect();

        let reply = self
            .channel
            .invoke(
                LAUNCH_SELECTOR,
                vec![
                    Value::from(bundle_id),
                    Value::Dict(env),
                    Value::Array(args),
                    options.to_value(),
                ],
            )
            .await
            .map_err(|e| AppError::RunnerLaunchFailed(format!("{bundle_id}: {e}")))?;

        let pid = reply
            .as_ref()
            .and_then(Value::as_u64)
            .filter(|pid| *pid > 0)
            .ok_or_else(|| {
                AppError::RunnerLaunchFailed(format!("{bundle_id}: daemon returned no pid"))
            })?;

        let handle = ProcessHandle::new(pid);
        self.launched.lock().await.insert(handle);
        info!(bundle_id, pid, "process launched");
        Ok(handle)
    }

    async fn kill(&self, handle: ProcessHandle) -> Result<()> {
        if !self.launched.lock().await.remove(&handle) {
            return Err(AppError::TerminationFailed(format!(
                "pid {handle} is not a live process launched by this controller"
            )));
        }

        let pid = i64::try_from(handle.pid())
            .map_err(|_| AppError::TerminationFailed(format!("pid {handle} out of range")))?;
        self.channel
            .notify(KILL_SELECTOR, vec![Value::from(pid)])
            .await
            .map_err(|e| AppError::TerminationFailed(format!("pid {handle}: {e}")))?;
        info!(pid = handle.pid(), "kill requested");
        Ok(())
    }
}

impl ProcessSupervisor for RemoteProcessControl {
    fn start_process<'a>(
        &'a self,
        bundle_id: &'a str,
        environment: &'a BTreeMap<String, String>,
        arguments: &'a [String],
        options: LaunchOptions,
    ) -> BoxFuture<'a, Result<ProcessHandle>> {
        Box::pin(self.launch(bundle_id, environment, arguments, options))
    }

    fn kill_process(&self, handle: ProcessHandle) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.kill(handle))
    }
}
