//! Capability boundaries consumed by the channel layer.
//!
//! A [`Connection`] moves whole [`Message`]s over one physical link, a
//! [`Connector`] produces connections to named device services, and an
//! [`ArgumentCodec`] archives [`Value`] trees into bytes. The dispatcher only
//! talks to these traits; concrete transports live in
//! [`stream`](crate::rpc::stream).

use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::models::value::Value;
use crate::rpc::message::Message;
use crate::Result;

/// One physical link to a device daemon.
///
/// Implementations must serialize concurrent `send` calls internally.
/// `recv` is only ever driven by a single reader loop.
pub trait Connection: Send + Sync {
    /// Write one message.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::ConnectionClosed`](crate::AppError::ConnectionClosed)
    /// if the link has been closed, or an I/O/encoding error if the write fails.
    fn send(&self, message: Message) -> BoxFuture<'_, Result<()>>;

    /// Read the next message; `Ok(None)` signals a clean end of stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying stream fails or violates framing.
    fn recv(&self) -> BoxFuture<'_, Result<Option<Message>>>;

    /// Close the link. Idempotent; wakes a pending `recv`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`](crate::AppError::Io) if shutting down the
    /// write side fails.
    fn close(&self) -> BoxFuture<'_, Result<()>>;
}

/// Produces connections to named device services.
pub trait Connector: Send + Sync {
    /// Open a new connection to `service`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::ConnectionSetupFailed`](crate::AppError::ConnectionSetupFailed)
    /// if the service cannot be reached.
    fn connect(&self, service: &str) -> BoxFuture<'_, Result<Arc<dyn Connection>>>;
}

/// Archival format for invocation arguments and return values.
pub trait ArgumentCodec: Send + Sync {
    /// Archive `value` into bytes.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::EncodingFailed`](crate::AppError::EncodingFailed).
    fn encode(&self, value: &Value) -> Result<Vec<u8>>;

    /// Restore a value archived by the peer.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::EncodingFailed`](crate::AppError::EncodingFailed).
    fn decode(&self, bytes: &[u8]) -> Result<Value>;
}
