//! Channel handles and the remote invocation proxy.
//!
//! A [`Channel`] references a channel registered in a
//! [`Dispatcher`](crate::rpc::dispatcher::Dispatcher); the dispatcher owns
//! the routing entry. Replies are matched strictly by correlation key, so
//! any number of invocations may be in flight on one channel at once.

use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;

use crate::models::capabilities::Capabilities;
use crate::models::value::Value;
use crate::rpc::dispatcher::DispatcherInner;
use crate::{AppError, Result};

/// Which side opened a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// The per-connection control channel.
    Control,
    /// Opened by this side to issue requests.
    Local,
    /// Opened by the peer to push events.
    Remote,
}

/// Invocation received from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundCall {
    /// Method selector.
    pub selector: String,
    /// Decoded arguments.
    pub arguments: Vec<Value>,
    /// Whether the peer waits for a reply.
    pub expects_reply: bool,
}

impl InboundCall {
    /// Argument at `index`, if present.
    #[must_use]
    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.arguments.get(index)
    }

    /// String argument at `index`, or an empty string.
    #[must_use]
    pub fn str_arg(&self, index: usize) -> String {
        self.arg(index)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned()
    }

    /// Integer argument at `index`, or zero.
    #[must_use]
    pub fn int_arg(&self, index: usize) -> i64 {
        self.arg(index).and_then(Value::as_i64).unwrap_or_default()
    }
}

/// Receives invocations the peer sends on a channel.
///
/// Handlers run on the connection's reader task, one call at a time and in
/// arrival order, so they must not block. Returning `Ok(Some(value))`
/// answers with a value, `Ok(None)` with an empty acknowledgment, and `Err`
/// with a fault; nothing is sent when the peer expects no reply.
pub trait MessageHandler: Send + Sync {
    /// Handle one inbound invocation.
    ///
    /// # Errors
    ///
    /// Any error is reported to the peer as a fault.
    fn handle(&self, channel: &Channel, call: InboundCall) -> Result<Option<Value>>;
}

impl<F> MessageHandler for F
where
    F: Fn(&Channel, InboundCall) -> Result<Option<Value>> + Send + Sync,
{
    fn handle(&self, channel: &Channel, call: InboundCall) -> Result<Option<Value>> {
        self(channel, call)
    }
}

/// Handle to one logical channel.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<DispatcherInner>,
    code: i32,
    identifier: Arc<str>,
    kind: ChannelKind,
}

impl Debug for Channel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("code", &self.code)
            .field("identifier", &self.identifier)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl Channel {
    pub(crate) fn new(
        inner: Arc<DispatcherInner>,
        code: i32,
        identifier: Arc<str>,
        kind: ChannelKind,
    ) -> Self {
        Self {
            inner,
            code,
            identifier,
            kind,
        }
    }

    /// Channel code as stored by this side (negative for peer channels).
    #[must_use]
    pub fn code(&self) -> i32 {
        self.code
    }

    /// Identifier the channel was opened with.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Which side opened the channel.
    #[must_use]
    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Invoke `selector` and wait for the reply, honoring the dispatcher's
    /// default deadline.
    ///
    /// # Errors
    ///
    /// - [`AppError::EncodingFailed`] if the arguments cannot be archived.
    /// - [`AppError::Timeout`] if the default deadline elapses.
    /// - [`AppError::RemoteFault`] if the peer answers with a fault.
    /// - [`AppError::ConnectionLost`] if the connection ends first.
    pub async fn invoke(&self, selector: &str, args: Vec<Value>) -> Result<Option<Value>> {
        self.inner
            .invoke(self.code, selector, args, self.inner_timeout())
            .await
    }

    /// Invoke `selector` with an explicit deadline.
    ///
    /// # Errors
    ///
    /// Same as [`Channel::invoke`].
    pub async fn invoke_with_timeout(
        &self,
        selector: &str,
        args: Vec<Value>,
        timeout: Duration,
    ) -> Result<Option<Value>> {
        self.inner.invoke(self.code, selector, args, Some(timeout)).await
    }

    /// Invoke `selector` without waiting; `on_reply` receives the outcome
    /// on the reader task once the reply (or connection loss) arrives.
    ///
    /// # Errors
    ///
    /// Returns an error only if the request could not be sent; `on_reply` is
    /// not called in that case.
    pub async fn invoke_async<F>(&self, selector: &str, args: Vec<Value>, on_reply: F) -> Result<()>
    where
        F: FnOnce(Result<Option<Value>>) + Send + 'static,
    {
        self.inner
            .invoke_async(self.code, selector, args, Box::new(on_reply))
            .await
    }

    /// Send `selector` as a notification; the peer sends no reply.
    ///
    /// # Errors
    ///
    /// Returns an encoding or connection error if the frame cannot be sent.
    pub async fn notify(&self, selector: &str, args: Vec<Value>) -> Result<()> {
        self.inner.notify(self.code, selector, args).await
    }

    /// Effective capabilities, once negotiation on this channel completed.
    pub async fn negotiated(&self) -> Option<Capabilities> {
        self.inner.negotiated(self.code).await
    }

    pub(crate) async fn mark_negotiated(&self, capabilities: Capabilities) -> Result<()> {
        self.inner.mark_negotiated(self.code, capabilities).await
    }

    /// Close the channel. Pending invocations on it resolve with
    /// [`AppError::ConnectionClosed`]. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// - [`AppError::ProtocolSequenceViolation`] for the control channel.
    /// - A connection error if the peer could not be notified.
    pub async fn close(&self) -> Result<()> {
        if self.kind == ChannelKind::Control {
            return Err(AppError::ProtocolSequenceViolation(
                "the control channel closes with its connection".into(),
            ));
        }
        self.inner.close_channel(self.code).await
    }

    fn inner_timeout(&self) -> Option<Duration> {
        self.inner.default_timeout()
    }
}
