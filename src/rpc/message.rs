//! Frames exchanged over a [`Connection`](crate::rpc::connection::Connection).
//!
//! Every frame names the channel it travels on, a message identifier used
//! as the correlation key, and a conversation index (`0` for requests and
//! notifications, `1` for the reply to a request).

use serde::{Deserialize, Serialize};

/// Channel code of the per-connection control channel.
pub const CONTROL_CHANNEL: i32 = 0;

/// Selector used on the control channel to open a channel.
pub const REQUEST_CHANNEL_SELECTOR: &str = "_requestChannelWithCode:identifier:";

/// Selector used on the control channel to announce a closed channel.
pub const CHANNEL_CANCELED_SELECTOR: &str = "_channelCanceled:";

/// Body of a frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    /// Remote method invocation with archived arguments.
    Invoke {
        /// Method selector.
        selector: String,
        /// Archived argument array.
        arguments: Vec<u8>,
    },
    /// Successful reply, optionally carrying an archived return value.
    Reply {
        /// Archived return value, if any.
        value: Option<Vec<u8>>,
    },
    /// Error reply.
    Fault {
        /// Peer's description of the failure.
        message: String,
    },
}

/// One framed message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Sender-relative channel code.
    pub channel: i32,
    /// Message identifier; replies echo the request's identifier.
    pub identifier: u32,
    /// `0` for requests and notifications, `1` for replies.
    pub conversation_index: u32,
    /// Whether the sender waits for a reply.
    pub expects_reply: bool,
    /// Frame body.
    pub payload: Payload,
}

impl Message {
    /// Build an invocation frame.
    #[must_use]
    pub fn invoke(
        channel: i32,
        identifier: u32,
        selector: &str,
        arguments: Vec<u8>,
        expects_reply: bool,
    ) -> Self {
        Self {
            channel,
            identifier,
            conversation_index: 0,
            expects_reply,
            payload: Payload::Invoke {
                selector: selector.to_owned(),
                arguments,
            },
        }
    }

    /// Build a successful reply to request `identifier`.
    #[must_use]
    pub fn reply(channel: i32, identifier: u32, value: Option<Vec<u8>>) -> Self {
        Self {
            channel,
            identifier,
            conversation_index: 1,
            expects_reply: false,
            payload: Payload::Reply { value },
        }
    }

    /// Build an error reply to request `identifier`.
    #[must_use]
    pub fn fault(channel: i32, identifier: u32, message: impl Into<String>) -> Self {
        Self {
            channel,
            identifier,
            conversation_index: 1,
            expects_reply: false,
            payload: Payload::Fault {
                message: message.into(),
            },
        }
    }

    /// Whether this frame answers an earlier request.
    #[must_use]
    pub fn is_reply(&self) -> bool {
        matches!(self.payload, Payload::Reply { .. } | Payload::Fault { .. })
    }
}
