//! [`Connection`] over any async byte stream.
//!
//! The stream is split into a [`FramedRead`] half driven by the
//! dispatcher's single reader loop and a [`FramedWrite`] half guarded by an
//! async mutex so concurrent senders never interleave frames.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::rpc::codec::FrameCodec;
use crate::rpc::connection::{Connection, Connector};
use crate::rpc::message::Message;
use crate::{AppError, Result};

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Message connection over a split byte stream.
pub struct StreamConnection {
    label: String,
    reader: Mutex<FramedRead<BoxedReader, FrameCodec>>,
    writer: Mutex<FramedWrite<BoxedWriter, FrameCodec>>,
    closed: CancellationToken,
}

impl std::fmt::Debug for StreamConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConnection")
            .field("label", &self.label)
            .field("closed", &self.closed.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl StreamConnection {
    /// Wrap `stream`, rejecting inbound frames longer than `max_frame_bytes`.
    pub fn new<S>(label: impl Into<String>, stream: S, max_frame_bytes: usize) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let reader: BoxedReader = Box::new(read_half);
        let writer: BoxedWriter = Box::new(write_half);
        Self {
            label: label.into(),
            reader: Mutex::new(FramedRead::new(
                reader,
                FrameCodec::with_max_frame_bytes(max_frame_bytes),
            )),
            writer: Mutex::new(FramedWrite::new(
                writer,
                FrameCodec::with_max_frame_bytes(max_frame_bytes),
            )),
            closed: CancellationToken::new(),
        }
    }

    /// Label used in log lines.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl Connection for StreamConnection {
    fn send(&self, message: Message) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.closed.is_cancelled() {
                return Err(AppError::ConnectionClosed(format!(
                    "cannot send on closed connection '{}'",
                    self.label
                )));
            }

            let line = serde_json::to_string(&message)
                .map_err(|e| AppError::EncodingFailed(format!("cannot encode frame: {e}")))?;

            let mut writer = self.writer.lock().await;
            writer.send(line).await.map_err(|e| {
                warn!(connection = self.label.as_str(), error = %e, "stream write failed");
                e
            })
        })
    }

    fn recv(&self) -> BoxFuture<'_, Result<Option<Message>>> {
        Box::pin(async move {
            let mut reader = self.reader.lock().await;

            loop {
                let item = tokio::select! {
                    biased;

                    () = self.closed.cancelled() => return Ok(None),

                    item = reader.next() => item,
                };

                match item {
                    None => {
                        debug!(connection = self.label.as_str(), "stream EOF detected");
                        return Ok(None);
                    }
                    Some(Err(e)) => return Err(e),
                    Some(Ok(line)) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<Message>(trimmed) {
                            Ok(message) => return Ok(Some(message)),
                            Err(e) => {
                                warn!(
                                    connection = self.label.as_str(),
                                    error = %e,
                                    "malformed frame, skipping"
                                );
                            }
                        }
                    }
                }
            }
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.closed.is_cancelled() {
                return Ok(());
            }
            self.closed.cancel();

            let mut writer = self.writer.lock().await;
            SinkExt::<String>::close(&mut *writer)
                .await
                .map_err(|e| AppError::Io(format!("cannot shut down '{}': {e}", self.label)))?;
            debug!(connection = self.label.as_str(), "stream closed");
            Ok(())
        })
    }
}

/// [`Connector`] that reaches device services over TCP.
///
/// Each service name maps to a forwarded `host:port` endpoint.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    endpoints: HashMap<String, SocketAddr>,
    max_frame_bytes: usize,
}

impl TcpConnector {
    /// Create a connector for the given service endpoints.
    #[must_use]
    pub fn new(endpoints: HashMap<String, SocketAddr>, max_frame_bytes: usize) -> Self {
        Self {
            endpoints,
            max_frame_bytes,
        }
    }
}

impl Connector for TcpConnector {
    fn connect(&self, service: &str) -> BoxFuture<'_, Result<Arc<dyn Connection>>> {
        let service = service.to_owned();
        Box::pin(async move {
            let addr = self.endpoints.get(&service).copied().ok_or_else(|| {
                AppError::ConnectionSetupFailed(format!("no endpoint configured for '{service}'"))
            })?;

            let stream = TcpStream::connect(addr).await.map_err(|e| {
                AppError::ConnectionSetupFailed(format!("cannot connect to {service} at {addr}: {e}"))
            })?;
            stream
                .set_nodelay(true)
                .map_err(|e| AppError::ConnectionSetupFailed(format!("{service}: {e}")))?;

            debug!(service = service.as_str(), %addr, "tcp connection established");
            let connection: Arc<dyn Connection> =
                Arc::new(StreamConnection::new(service, stream, self.max_frame_bytes));
            Ok(connection)
        })
    }
}
