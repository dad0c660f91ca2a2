//! Multiplexed message protocol: framing, channels, and remote invocation.
//!
//! - `message`: frame layout and control-channel selectors.
//! - `connection`: the [`Connection`](connection::Connection),
//!   [`Connector`](connection::Connector), and
//!   [`ArgumentCodec`](connection::ArgumentCodec) capability boundaries.
//! - `codec`: newline-delimited frame codec and JSON argument archive.
//! - `stream`: a `Connection` over any async byte stream, plus TCP connector.
//! - `dispatcher`: per-connection reader loop and channel routing.
//! - `channel`: channel handles and the invocation proxy.
//! - `handshake`: capability negotiation and its sequencing guard.

pub mod channel;
pub mod codec;
pub mod connection;
pub mod dispatcher;
pub mod handshake;
pub mod message;
pub mod stream;

pub use channel::{Channel, ChannelKind, InboundCall, MessageHandler};
pub use connection::{ArgumentCodec, Connection, Connector};
pub use dispatcher::Dispatcher;
