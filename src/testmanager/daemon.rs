//! Typed proxy for one connection to the test manager daemon.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::models::capabilities::Capabilities;
use crate::models::process::ProcessHandle;
use crate::models::session::SessionToken;
use crate::models::value::Value;
use crate::rpc::channel::{Channel, MessageHandler};
use crate::rpc::connection::{ArgumentCodec, Connector};
use crate::rpc::dispatcher::Dispatcher;
use crate::rpc::handshake::{ensure_negotiated, negotiate};
use crate::testmanager::{
    AUTHORIZE_TEST_SESSION, INITIATE_CONTROL_SESSION, INITIATE_SESSION,
    START_EXECUTING_TEST_PLAN,
};
use crate::{AppError, Result};

/// A daemon connection plus its proxy channel.
#[derive(Debug, Clone)]
pub struct DaemonProxy {
    dispatcher: Dispatcher,
    channel: Channel,
}

impl DaemonProxy {
    /// Connect to `service`, register `handler` for inbound calls (on the
    /// proxy channel and on every channel the daemon opens), and open the
    /// proxy channel `identifier`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::ConnectionSetupFailed`] if the service cannot be
    /// reached or refuses the proxy channel.
    pub async fn connect(
        connector: &dyn Connector,
        service: &str,
        identifier: &str,
        codec: Arc<dyn ArgumentCodec>,
        invoke_timeout: Option<Duration>,
        handler: Option<Arc<dyn MessageHandler>>,
    ) -> Result<Self> {
        let connection = connector.connect(service).await?;
        let dispatcher = Dispatcher::new(service, connection, codec, invoke_timeout);
        if let Some(handler) = &handler {
            dispatcher.on_remote_channel(Arc::clone(handler)).await;
        }

        match dispatcher.open_channel_with_handler(identifier, handler).await {
            Ok(channel) => Ok(Self::new(dispatcher, channel)),
            Err(err) => {
                if let Err(close_err) = dispatcher.close().await {
                    debug!(service, error = %close_err, "close after failed channel open");
                }
                Err(AppError::ConnectionSetupFailed(format!(
                    "cannot open '{identifier}' on {service}: {err}"
                )))
            }
        }
    }

    /// Wrap an already opened proxy channel.
    #[must_use]
    pub fn new(dispatcher: Dispatcher, channel: Channel) -> Self {
        Self {
            dispatcher,
            channel,
        }
    }

    /// Underlying dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Proxy channel.
    #[must_use]
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Negotiate a control session with an empty capability set.
    ///
    /// # Errors
    ///
    /// Propagates the negotiation failure.
    pub async fn initiate_control_session(&self) -> Result<Capabilities> {
        let acknowledged = negotiate(
            &self.channel,
            INITIATE_CONTROL_SESSION,
            Vec::new(),
            &Capabilities::empty(),
        )
        .await?;
        debug!(
            connection = self.dispatcher.label(),
            capabilities = acknowledged.len(),
            "control session initiated"
        );
        Ok(acknowledged)
    }

    /// Establish the test session named by `token`, negotiating `required`.
    ///
    /// The daemon answers by opening the event channel, which is queued for
    /// [`DaemonProxy::accept_event_channel`].
    ///
    /// # Errors
    ///
    /// Propagates the negotiation failure.
    pub async fn initiate_session(
        &self,
        token: SessionToken,
        required: &Capabilities,
    ) -> Result<Capabilities> {
        self.dispatcher.queue_peer_channels();
        let acknowledged = negotiate(
            &self.channel,
            INITIATE_SESSION,
            vec![Value::from(token.to_wire())],
            required,
        )
        .await?;
        debug!(
            connection = self.dispatcher.label(),
            session_id = %token,
            capabilities = acknowledged.len(),
            "test session initiated"
        );
        Ok(acknowledged)
    }

    /// Ask the daemon to authorize `process` for the control session.
    ///
    /// Does not wait for the answer; the outcome is only logged.
    ///
    /// # Errors
    ///
    /// - [`AppError::ProtocolSequenceViolation`] before negotiation.
    /// - [`AppError::AuthorizationFailed`] if the request cannot be sent.
    pub async fn authorize_test_session(&self, process: ProcessHandle) -> Result<()> {
        ensure_negotiated(&self.channel, "authorize test session").await?;

        let pid = i64::try_from(process.pid())
            .map_err(|_| AppError::EncodingFailed(format!("pid {process} out of range")))?;
        self.channel
            .invoke_async(AUTHORIZE_TEST_SESSION, vec![Value::from(pid)], move |outcome| {
                match outcome {
                    Ok(reply) => {
                        let granted = reply.as_ref().and_then(Value::as_bool).unwrap_or(false);
                        if granted {
                            info!(pid = process.pid(), "test session authorized");
                        } else {
                            warn!(pid = process.pid(), "daemon declined test session authorization");
                        }
                    }
                    Err(err) => {
                        warn!(pid = process.pid(), error = %err, "test session authorization failed");
                    }
                }
            })
            .await
            .map_err(|e| AppError::AuthorizationFailed(format!("pid {process}: {e}")))
    }

    /// Wait for the daemon to open the event delivery channel.
    ///
    /// # Errors
    ///
    /// [`AppError::Timeout`] or [`AppError::ConnectionLost`].
    pub async fn accept_event_channel(&self, timeout: Option<Duration>) -> Result<Channel> {
        let channel = self.dispatcher.accept_channel(timeout).await?;
        debug!(
            connection = self.dispatcher.label(),
            channel = channel.identifier(),
            "event channel opened by daemon"
        );
        Ok(channel)
    }

    /// Start the test plan on `event_channel`.
    ///
    /// # Errors
    ///
    /// - [`AppError::ProtocolSequenceViolation`] if this proxy's channel has
    ///   not negotiated.
    /// - [`AppError::TestPlanStartFailed`] if the invocation fails.
    pub async fn start_executing_test_plan(
        &self,
        event_channel: &Channel,
        protocol_version: i64,
    ) -> Result<()> {
        ensure_negotiated(&self.channel, "start executing test plan").await?;

        event_channel
            .invoke(START_EXECUTING_TEST_PLAN, vec![Value::from(protocol_version)])
            .await
            .map_err(|e| {
                AppError::TestPlanStartFailed(format!("protocol version {protocol_version}: {e}"))
            })?;
        info!(
            channel = event_channel.identifier(),
            protocol_version, "test plan execution started"
        );
        Ok(())
    }

    /// Close the proxy channel, then the connection. Both steps are
    /// attempted; the first failure is returned.
    ///
    /// # Errors
    ///
    /// Returns the first channel or connection close error.
    pub async fn close(&self) -> Result<()> {
        let channel = self.channel.close().await;
        let connection = self.dispatcher.close().await;
        channel.and(connection)
    }
}
