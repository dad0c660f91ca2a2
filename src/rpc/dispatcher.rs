//! Channel dispatcher: routes inbound frames of one connection.
//!
//! Exactly one reader task per [`Dispatcher`] pulls frames off the
//! connection and routes them:
//!
//! | Frame                                   | Routed to                               |
//! |-----------------------------------------|-----------------------------------------|
//! | reply / fault                           | the pending invocation with its id      |
//! | invoke on the control channel           | built-in channel open/cancel handling   |
//! | invoke on a known channel               | that channel's [`MessageHandler`]       |
//! | invoke on an unknown peer channel code  | a new remote channel, then its handler  |
//!
//! Channel codes are sender-relative: a channel this side opens is stored
//! under its positive code, a channel the peer opens is stored under the
//! negated code, and the receiver negates the code of every inbound frame.
//!
//! Peer-opened channels are queued for [`Dispatcher::accept_channel`] only
//! after [`Dispatcher::queue_peer_channels`]; otherwise they are routed to
//! the remote-channel handler and nobody waits for them.
//!
//! When the reader stops (close, EOF, read error, or a panic while routing)
//! every pending invocation on the connection resolves with
//! [`AppError::ConnectionLost`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::models::capabilities::Capabilities;
use crate::models::value::Value;
use crate::rpc::channel::{Channel, ChannelKind, InboundCall, MessageHandler};
use crate::rpc::connection::{ArgumentCodec, Connection};
use crate::rpc::message::{
    Message, Payload, CHANNEL_CANCELED_SELECTOR, CONTROL_CHANNEL, REQUEST_CHANNEL_SELECTOR,
};
use crate::{AppError, Result};

/// Outcome delivered to whoever waits on an invocation.
pub(crate) type InvocationResult = Result<Option<Value>>;

/// Callback receiving the reply of a fire-and-forget invocation.
pub(crate) type ReplyCallback = Box<dyn FnOnce(InvocationResult) + Send>;

/// Where the reply of a pending invocation goes.
enum ReplySlot {
    /// A blocked caller.
    Waiter(oneshot::Sender<InvocationResult>),
    /// A registered handler (asynchronous invocation).
    Callback(ReplyCallback),
}

impl ReplySlot {
    fn resolve(self, result: InvocationResult) {
        match self {
            Self::Waiter(tx) => {
                // The caller may have given up (deadline); nothing to do then.
                let _ = tx.send(result);
            }
            Self::Callback(callback) => callback(result),
        }
    }
}

/// Outstanding request awaiting the reply with the same identifier.
struct PendingInvocation {
    channel: i32,
    selector: String,
    slot: ReplySlot,
}

/// Routing state for one registered channel.
struct ChannelEntry {
    identifier: Arc<str>,
    kind: ChannelKind,
    handler: Option<Arc<dyn MessageHandler>>,
    negotiated: Option<Capabilities>,
}

#[derive(Default)]
struct RoutingTable {
    channels: HashMap<i32, ChannelEntry>,
    pending: HashMap<u32, PendingInvocation>,
    remote_handler: Option<Arc<dyn MessageHandler>>,
}

impl RoutingTable {
    /// Remove and return every pending invocation for `channel`.
    fn drain_channel(&mut self, channel: i32) -> Vec<PendingInvocation> {
        let ids: Vec<u32> = self
            .pending
            .iter()
            .filter(|(_, p)| p.channel == channel)
            .map(|(id, _)| *id)
            .collect();
        ids.into_iter()
            .filter_map(|id| self.pending.remove(&id))
            .collect()
    }
}

pub(crate) struct DispatcherInner {
    label: String,
    connection: Arc<dyn Connection>,
    codec: Arc<dyn ArgumentCodec>,
    invoke_timeout: Option<Duration>,
    table: Mutex<RoutingTable>,
    next_message_id: AtomicU32,
    next_channel_code: AtomicI32,
    closed: CancellationToken,
    queue_peer_channels: AtomicBool,
    incoming_tx: mpsc::UnboundedSender<Channel>,
    incoming_rx: Mutex<mpsc::UnboundedReceiver<Channel>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

/// Routes the traffic of one [`Connection`] across its logical channels.
///
/// Cheap to clone; all clones share the same connection and routing table.
/// Call [`Dispatcher::close`] to stop the reader task and release the link.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("label", &self.inner.label)
            .field("closed", &self.inner.closed.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Take ownership of `connection` and start its reader task.
    ///
    /// `invoke_timeout` is the default deadline applied by
    /// [`Channel::invoke`]; `None` waits until the reply or connection loss.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(
        label: impl Into<String>,
        connection: Arc<dyn Connection>,
        codec: Arc<dyn ArgumentCodec>,
        invoke_timeout: Option<Duration>,
    ) -> Self {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let mut table = RoutingTable::default();
        table.channels.insert(
            CONTROL_CHANNEL,
            ChannelEntry {
                identifier: Arc::from("control"),
                kind: ChannelKind::Control,
                handler: None,
                negotiated: None,
            },
        );

        let inner = Arc::new(DispatcherInner {
            label: label.into(),
            connection,
            codec,
            invoke_timeout,
            table: Mutex::new(table),
            next_message_id: AtomicU32::new(1),
            next_channel_code: AtomicI32::new(1),
            closed: CancellationToken::new(),
            queue_peer_channels: AtomicBool::new(false),
            incoming_tx,
            incoming_rx: Mutex::new(incoming_rx),
            reader: Mutex::new(None),
        });

        let handle = tokio::spawn(supervise_reader(Arc::clone(&inner)));
        if let Ok(mut slot) = inner.reader.try_lock() {
            *slot = Some(handle);
        }

        Self { inner }
    }

    /// Label used in log lines.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Handle to the control channel (code 0).
    #[must_use]
    pub fn control_channel(&self) -> Channel {
        Channel::new(
            Arc::clone(&self.inner),
            CONTROL_CHANNEL,
            Arc::from("control"),
            ChannelKind::Control,
        )
    }

    /// Open a local channel named `identifier`.
    ///
    /// # Errors
    ///
    /// - [`AppError::ChannelAlreadyOpen`] if a local channel with the same
    ///   identifier is registered.
    /// - [`AppError::ConnectionClosed`] / [`AppError::ConnectionLost`] if the
    ///   connection is gone.
    /// - [`AppError::RemoteFault`] if the peer refuses the channel.
    pub async fn open_channel(&self, identifier: &str) -> Result<Channel> {
        self.open_channel_with_handler(identifier, None).await
    }

    /// Open a local channel and install `handler` before the peer learns
    /// about it, so no inbound invocation can race the registration.
    ///
    /// # Errors
    ///
    /// Same as [`Dispatcher::open_channel`].
    pub async fn open_channel_with_handler(
        &self,
        identifier: &str,
        handler: Option<Arc<dyn MessageHandler>>,
    ) -> Result<Channel> {
        let identifier: Arc<str> = Arc::from(identifier);
        let code = {
            let mut table = self.inner.table.lock().await;
            if self.inner.closed.is_cancelled() {
                return Err(AppError::ConnectionClosed(format!(
                    "cannot open '{identifier}' on closed connection '{}'",
                    self.inner.label
                )));
            }
            let in_use = table
                .channels
                .values()
                .any(|e| e.kind == ChannelKind::Local && e.identifier == identifier);
            if in_use {
                return Err(AppError::ChannelAlreadyOpen(identifier.to_string()));
            }

            let code = self.inner.next_channel_code.fetch_add(1, Ordering::Relaxed);
            table.channels.insert(
                code,
                ChannelEntry {
                    identifier: Arc::clone(&identifier),
                    kind: ChannelKind::Local,
                    handler,
                    negotiated: None,
                },
            );
            code
        };

        let request = self
            .inner
            .invoke(
                CONTROL_CHANNEL,
                REQUEST_CHANNEL_SELECTOR,
                vec![Value::from(code), Value::from(identifier.as_ref())],
                self.inner.invoke_timeout,
            )
            .await;

        if let Err(e) = request {
            self.inner.table.lock().await.channels.remove(&code);
            return Err(e);
        }

        debug!(
            connection = self.inner.label.as_str(),
            channel = identifier.as_ref(),
            code,
            "channel opened"
        );
        Ok(Channel::new(
            Arc::clone(&self.inner),
            code,
            identifier,
            ChannelKind::Local,
        ))
    }

    /// Register the handler installed on every channel the peer opens.
    ///
    /// Must be set before the peer is expected to open a channel; channels
    /// opened earlier keep whatever handler was registered at that time.
    pub async fn on_remote_channel(&self, handler: Arc<dyn MessageHandler>) {
        self.inner.table.lock().await.remote_handler = Some(handler);
    }

    /// Queue channels the peer opens from now on for
    /// [`Dispatcher::accept_channel`].
    ///
    /// Call before the request that makes the peer open its channel.
    pub fn queue_peer_channels(&self) {
        self.inner.queue_peer_channels.store(true, Ordering::Release);
    }

    /// Wait for the next channel opened by the peer.
    ///
    /// Starts queueing peer channels if [`Dispatcher::queue_peer_channels`]
    /// was not called; channels the peer opened before that are not queued.
    ///
    /// # Errors
    ///
    /// - [`AppError::Timeout`] if `timeout` elapses first.
    /// - [`AppError::ConnectionLost`] if the connection ends first.
    pub async fn accept_channel(&self, timeout: Option<Duration>) -> Result<Channel> {
        self.queue_peer_channels();
        let mut incoming = self.inner.incoming_rx.lock().await;
        let closed = self.inner.closed.clone();
        let next = async {
            tokio::select! {
                biased;

                channel = incoming.recv() => channel.ok_or_else(|| {
                    AppError::ConnectionLost("channel queue closed".into())
                }),

                () = closed.cancelled() => Err(AppError::ConnectionLost(format!(
                    "connection '{}' closed while waiting for a channel",
                    self.inner.label
                ))),
            }
        };

        match timeout {
            Some(limit) => tokio::time::timeout(limit, next).await.map_err(|_| {
                AppError::Timeout(format!("no channel opened by peer within {limit:?}"))
            })?,
            None => next.await,
        }
    }

    /// Whether the connection has been closed or lost.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Resolve once the connection has been closed or lost.
    pub async fn closed(&self) {
        self.inner.closed.cancelled().await;
    }

    /// Close the connection and wait for the reader task to finish.
    ///
    /// Every pending invocation resolves with [`AppError::ConnectionLost`].
    /// Idempotent.
    ///
    /// # Errors
    ///
    /// Returns the connection's close error, if any.
    pub async fn close(&self) -> Result<()> {
        self.inner.closed.cancel();
        let result = self.inner.connection.close().await;

        let reader = self.inner.reader.lock().await.take();
        if let Some(handle) = reader {
            if let Err(e) = handle.await {
                warn!(connection = self.inner.label.as_str(), error = %e, "reader supervisor failed");
            }
        }
        // The supervisor drains on exit; this covers one that never started.
        self.inner.fail_all_pending("connection closed").await;
        result
    }
}

impl DispatcherInner {
    pub(crate) fn default_timeout(&self) -> Option<Duration> {
        self.invoke_timeout
    }

    fn next_id(&self) -> u32 {
        self.next_message_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Encode an argument list as a single archived array.
    fn encode_arguments(&self, args: Vec<Value>) -> Result<Vec<u8>> {
        self.codec.encode(&Value::Array(args))
    }

    /// Decode archived arguments, unwrapping the outer array.
    fn decode_arguments(&self, bytes: &[u8]) -> Result<Vec<Value>> {
        if bytes.is_empty() {
            return Ok(Vec::new());
        }
        match self.codec.decode(bytes)? {
            Value::Array(items) => Ok(items),
            single => Ok(vec![single]),
        }
    }

    async fn register_pending(
        &self,
        id: u32,
        channel: i32,
        selector: &str,
        slot: ReplySlot,
    ) -> Result<()> {
        let mut table = self.table.lock().await;
        if self.closed.is_cancelled() {
            return Err(AppError::ConnectionClosed(format!(
                "connection '{}' is closed",
                self.label
            )));
        }
        if !table.channels.contains_key(&channel) {
            return Err(AppError::ConnectionClosed(format!(
                "channel {channel} is closed"
            )));
        }
        if table.pending.contains_key(&id) {
            return Err(AppError::ProtocolSequenceViolation(format!(
                "correlation key {id} already pending"
            )));
        }
        table.pending.insert(
            id,
            PendingInvocation {
                channel,
                selector: selector.to_owned(),
                slot,
            },
        );
        Ok(())
    }

    async fn take_pending(&self, id: u32) -> Option<PendingInvocation> {
        self.table.lock().await.pending.remove(&id)
    }

    /// Send a request and wait for the matching reply.
    pub(crate) async fn invoke(
        &self,
        channel: i32,
        selector: &str,
        args: Vec<Value>,
        deadline: Option<Duration>,
    ) -> InvocationResult {
        let arguments = self.encode_arguments(args)?;
        let id = self.next_id();
        let (tx, rx) = oneshot::channel();

        self.register_pending(id, channel, selector, ReplySlot::Waiter(tx))
            .await?;

        let message = Message::invoke(channel, id, selector, arguments, true);
        if let Err(e) = self.connection.send(message).await {
            self.take_pending(id).await;
            return Err(e);
        }

        let reply = match deadline {
            Some(limit) => {
                if let Ok(reply) = tokio::time::timeout(limit, rx).await {
                    reply
                } else {
                    self.take_pending(id).await;
                    return Err(AppError::Timeout(format!(
                        "{selector} not answered within {limit:?}"
                    )));
                }
            }
            None => rx.await,
        };

        reply.unwrap_or_else(|_| {
            Err(AppError::ConnectionLost(format!(
                "{selector}: reply slot dropped"
            )))
        })
    }

    /// Send a request whose reply is delivered to `callback`.
    pub(crate) async fn invoke_async(
        &self,
        channel: i32,
        selector: &str,
        args: Vec<Value>,
        callback: ReplyCallback,
    ) -> Result<()> {
        let arguments = self.encode_arguments(args)?;
        let id = self.next_id();

        self.register_pending(id, channel, selector, ReplySlot::Callback(callback))
            .await?;

        let message = Message::invoke(channel, id, selector, arguments, true);
        if let Err(e) = self.connection.send(message).await {
            if let Some(pending) = self.take_pending(id).await {
                pending
                    .slot
                    .resolve(Err(AppError::ConnectionLost(e.to_string())));
            }
            return Err(e);
        }
        Ok(())
    }

    /// Send an invocation that expects no reply.
    pub(crate) async fn notify(&self, channel: i32, selector: &str, args: Vec<Value>) -> Result<()> {
        let arguments = self.encode_arguments(args)?;
        let id = self.next_id();
        self.connection
            .send(Message::invoke(channel, id, selector, arguments, false))
            .await
    }

    pub(crate) async fn negotiated(&self, channel: i32) -> Option<Capabilities> {
        self.table
            .lock()
            .await
            .channels
            .get(&channel)
            .and_then(|e| e.negotiated.clone())
    }

    pub(crate) async fn mark_negotiated(&self, channel: i32, capabilities: Capabilities) -> Result<()> {
        let mut table = self.table.lock().await;
        let entry = table
            .channels
            .get_mut(&channel)
            .ok_or_else(|| AppError::ConnectionClosed(format!("channel {channel} is closed")))?;
        entry.negotiated = Some(capabilities);
        Ok(())
    }

    /// Unregister `channel`, fail its pending invocations, and tell the peer
    /// when the channel was opened locally.
    pub(crate) async fn close_channel(&self, channel: i32) -> Result<()> {
        if channel == CONTROL_CHANNEL {
            return Err(AppError::ProtocolSequenceViolation(
                "the control channel closes with its connection".into(),
            ));
        }

        let (entry, drained) = {
            let mut table = self.table.lock().await;
            let entry = table.channels.remove(&channel);
            let drained = table.drain_channel(channel);
            (entry, drained)
        };
        for pending in drained {
            pending.slot.resolve(Err(AppError::ConnectionClosed(format!(
                "channel {channel} closed before {} was answered",
                pending.selector
            ))));
        }

        let Some(entry) = entry else {
            return Ok(());
        };
        debug!(
            connection = self.label.as_str(),
            channel = entry.identifier.as_ref(),
            "channel closed"
        );

        if entry.kind == ChannelKind::Local && !self.closed.is_cancelled() {
            self.notify(
                CONTROL_CHANNEL,
                CHANNEL_CANCELED_SELECTOR,
                vec![Value::from(channel)],
            )
            .await?;
        }
        Ok(())
    }

    /// Hand a peer-opened channel to `accept_channel` if anyone expects one.
    fn announce(&self, channel: Channel) {
        if self.queue_peer_channels.load(Ordering::Acquire) {
            // The receiver lives as long as `self`; a send error cannot happen.
            let _ = self.incoming_tx.send(channel);
        }
    }

    async fn fail_all_pending(&self, reason: &str) {
        let drained: Vec<PendingInvocation> = {
            let mut table = self.table.lock().await;
            table.pending.drain().map(|(_, p)| p).collect()
        };
        if !drained.is_empty() {
            info!(
                connection = self.label.as_str(),
                count = drained.len(),
                reason,
                "failing pending invocations"
            );
        }
        for pending in drained {
            pending.slot.resolve(Err(AppError::ConnectionLost(format!(
                "{reason} before {} was answered",
                pending.selector
            ))));
        }
    }

    /// Route one inbound frame.
    async fn dispatch(self: &Arc<Self>, message: Message) {
        let Some(key) = message.channel.checked_neg() else {
            warn!(
                connection = self.label.as_str(),
                channel = message.channel,
                id = message.identifier,
                "frame on an unrepresentable channel code, skipping"
            );
            return;
        };

        match message.payload {
            Payload::Reply { value } => {
                let result = match value {
                    Some(bytes) => self.codec.decode(&bytes).map(Some),
                    None => Ok(None),
                };
                self.resolve(key, message.identifier, result).await;
            }
            Payload::Fault { message: fault } => {
                self.resolve(key, message.identifier, Err(AppError::RemoteFault(fault)))
                    .await;
            }
            Payload::Invoke {
                selector,
                arguments,
            } => {
                let reply = self
                    .handle_invoke(key, &selector, &arguments, message.expects_reply)
                    .await;
                if message.expects_reply {
                    let frame = match reply {
                        Ok(value) => match value.map(|v| self.codec.encode(&v)).transpose() {
                            Ok(bytes) => Message::reply(key, message.identifier, bytes),
                            Err(e) => Message::fault(key, message.identifier, e.to_string()),
                        },
                        Err(e) => Message::fault(key, message.identifier, e.to_string()),
                    };
                    if let Err(e) = self.connection.send(frame).await {
                        warn!(
                            connection = self.label.as_str(),
                            selector = selector.as_str(),
                            error = %e,
                            "failed to send reply"
                        );
                    }
                } else if let Err(e) = reply {
                    debug!(
                        connection = self.label.as_str(),
                        selector = selector.as_str(),
                        error = %e,
                        "notification handler failed"
                    );
                }
            }
        }
    }

    async fn resolve(&self, channel: i32, id: u32, result: InvocationResult) {
        let pending = {
            let mut table = self.table.lock().await;
            match table.pending.get(&id) {
                Some(p) if p.channel == channel => table.pending.remove(&id),
                Some(p) => {
                    warn!(
                        connection = self.label.as_str(),
                        id,
                        expected = p.channel,
                        got = channel,
                        "reply arrived on the wrong channel, ignoring"
                    );
                    None
                }
                None => {
                    debug!(connection = self.label.as_str(), id, "reply for unknown invocation");
                    None
                }
            }
        };
        if let Some(pending) = pending {
            pending.slot.resolve(result);
        }
    }

    async fn handle_invoke(
        self: &Arc<Self>,
        key: i32,
        selector: &str,
        arguments: &[u8],
        expects_reply: bool,
    ) -> InvocationResult {
        let args = self.decode_arguments(arguments)?;

        if key == CONTROL_CHANNEL {
            return self.handle_control(selector, &args).await;
        }

        let (channel, handler) = self.route(key).await?;
        let Some(handler) = handler else {
            return Err(AppError::NotFound(format!(
                "no handler for {selector} on channel '{}'",
                channel.identifier()
            )));
        };

        handler.handle(
            &channel,
            InboundCall {
                selector: selector.to_owned(),
                arguments: args,
                expects_reply,
            },
        )
    }

    /// Find the channel for `key`, creating a remote channel transparently
    /// when the peer uses a code it never announced.
    async fn route(
        self: &Arc<Self>,
        key: i32,
    ) -> Result<(Channel, Option<Arc<dyn MessageHandler>>)> {
        let mut table = self.table.lock().await;
        if let Some(entry) = table.channels.get(&key) {
            let channel = Channel::new(Arc::clone(self), key, Arc::clone(&entry.identifier), entry.kind);
            return Ok((channel, entry.handler.clone()));
        }
        if key > 0 {
            return Err(AppError::ConnectionClosed(format!(
                "local channel {key} is closed"
            )));
        }

        let identifier: Arc<str> = Arc::from(format!("remote:{}", -key));
        let handler = table.remote_handler.clone();
        table.channels.insert(
            key,
            ChannelEntry {
                identifier: Arc::clone(&identifier),
                kind: ChannelKind::Remote,
                handler: handler.clone(),
                negotiated: None,
            },
        );
        drop(table);

        let channel = Channel::new(Arc::clone(self), key, identifier, ChannelKind::Remote);
        debug!(
            connection = self.label.as_str(),
            channel = channel.identifier(),
            "peer used an unannounced channel, registered it"
        );
        self.announce(channel.clone());
        Ok((channel, handler))
    }

    async fn handle_control(self: &Arc<Self>, selector: &str, args: &[Value]) -> InvocationResult {
        match selector {
            REQUEST_CHANNEL_SELECTOR => {
                let code = args
                    .first()
                    .ok_or_else(|| AppError::EncodingFailed("channel request without code".into()))?
                    .expect_i64("channel code")?;
                let identifier = args
                    .get(1)
                    .ok_or_else(|| {
                        AppError::EncodingFailed("channel request without identifier".into())
                    })?
                    .expect_str("channel identifier")?;
                let key = peer_key(code)?;
                if key >= 0 {
                    return Err(AppError::ProtocolSequenceViolation(format!(
                        "peer channel code must be positive, got {code}"
                    )));
                }

                let identifier: Arc<str> = Arc::from(identifier);
                {
                    let mut table = self.table.lock().await;
                    if table.channels.contains_key(&key) {
                        return Err(AppError::ChannelAlreadyOpen(format!(
                            "peer channel code {code} already in use"
                        )));
                    }
                    let handler = table.remote_handler.clone();
                    table.channels.insert(
                        key,
                        ChannelEntry {
                            identifier: Arc::clone(&identifier),
                            kind: ChannelKind::Remote,
                            handler,
                            negotiated: None,
                        },
                    );
                }

                debug!(
                    connection = self.label.as_str(),
                    channel = identifier.as_ref(),
                    code,
                    "peer opened channel"
                );
                self.announce(Channel::new(Arc::clone(self), key, identifier, ChannelKind::Remote));
                Ok(None)
            }
            CHANNEL_CANCELED_SELECTOR => {
                let code = args
                    .first()
                    .ok_or_else(|| AppError::EncodingFailed("channel cancel without code".into()))?
                    .expect_i64("channel code")?;
                let key = peer_key(code)?;
                let drained = {
                    let mut table = self.table.lock().await;
                    table.channels.remove(&key);
                    table.drain_channel(key)
                };
                for pending in drained {
                    pending.slot.resolve(Err(AppError::ConnectionClosed(format!(
                        "peer closed channel {code}"
                    ))));
                }
                debug!(connection = self.label.as_str(), code, "peer closed channel");
                Ok(None)
            }
            other => Err(AppError::NotFound(format!(
                "unknown control selector {other}"
            ))),
        }
    }
}

/// Local key of a channel code announced by the peer.
fn peer_key(code: i64) -> Result<i32> {
    code.checked_neg()
        .and_then(|key| i32::try_from(key).ok())
        .ok_or_else(|| AppError::EncodingFailed(format!("channel code {code} out of range")))
}

/// Run the reader and release the connection however it stops, including
/// a panic in a message handler.
async fn supervise_reader(inner: Arc<DispatcherInner>) {
    let reason = match tokio::spawn(run_reader(Arc::clone(&inner))).await {
        Ok(reason) => reason,
        Err(e) => {
            warn!(connection = inner.label.as_str(), error = %e, "reader task failed");
            if let Err(close_err) = inner.connection.close().await {
                debug!(connection = inner.label.as_str(), error = %close_err, "close after reader failure");
            }
            "reader failed"
        }
    };

    inner.closed.cancel();
    inner.fail_all_pending(reason).await;
}

/// Reader loop: the single consumer of the connection's inbound frames.
async fn run_reader(inner: Arc<DispatcherInner>) -> &'static str {
    loop {
        let next = tokio::select! {
            biased;

            () = inner.closed.cancelled() => break "connection closed",

            next = inner.connection.recv() => next,
        };

        match next {
            Ok(Some(message)) => inner.dispatch(message).await,
            Ok(None) => {
                debug!(connection = inner.label.as_str(), "peer closed the connection");
                break "connection lost";
            }
            Err(e) => {
                warn!(connection = inner.label.as_str(), error = %e, "read failed, stopping");
                break "connection lost";
            }
        }
    }
}
