//! Line framing for message streams and the JSON argument archive.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a configurable maximum line
//! length so an unterminated or oversized frame from a misbehaving peer
//! cannot exhaust memory. Each newline-terminated UTF-8 line carries one
//! JSON-encoded [`Message`](crate::rpc::message::Message).

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::models::value::Value;
use crate::rpc::connection::ArgumentCodec;
use crate::{AppError, Result};

/// Default maximum frame length: 4 MiB.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 4 * 1_048_576;

/// Newline-delimited frame codec.
///
/// # Decoder
///
/// Inbound lines longer than the configured limit return
/// [`AppError::EncodingFailed`]`("frame too long: …")` rather than
/// allocating. I/O errors are mapped to [`AppError::Io`].
///
/// # Encoder
///
/// Outbound strings are encoded as `item\n`. The limit is a decoder-side
/// concern and is not enforced during encoding.
#[derive(Debug)]
pub struct FrameCodec {
    lines: LinesCodec,
    max_frame_bytes: usize,
}

impl FrameCodec {
    /// Create a codec with the [`DEFAULT_MAX_FRAME_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_frame_bytes(DEFAULT_MAX_FRAME_BYTES)
    }

    /// Create a codec with an explicit frame limit.
    #[must_use]
    pub fn with_max_frame_bytes(max_frame_bytes: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_frame_bytes),
            max_frame_bytes,
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let max = self.max_frame_bytes;
        self.lines.decode(src).map_err(|e| map_codec_error(e, max))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let max = self.max_frame_bytes;
        self.lines
            .decode_eof(src)
            .map_err(|e| map_codec_error(e, max))
    }
}

impl Encoder<String> for FrameCodec {
    type Error = AppError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        let max = self.max_frame_bytes;
        self.lines
            .encode(item, dst)
            .map_err(|e| map_codec_error(e, max))
    }
}

/// Map a [`LinesCodecError`] to an [`AppError`].
fn map_codec_error(e: LinesCodecError, max_frame_bytes: usize) -> AppError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => AppError::EncodingFailed(format!(
            "frame too long: exceeded {max_frame_bytes} bytes"
        )),
        LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
    }
}

/// [`ArgumentCodec`] that archives [`Value`] trees as tagged JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonArgumentCodec;

impl ArgumentCodec for JsonArgumentCodec {
    fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        serde_json::to_vec(value)
            .map_err(|e| AppError::EncodingFailed(format!("cannot archive arguments: {e}")))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        serde_json::from_slice(bytes)
            .map_err(|e| AppError::EncodingFailed(format!("cannot unarchive value: {e}")))
    }
}
