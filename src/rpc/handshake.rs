//! Capability negotiation.
//!
//! Before any session-scoped call is allowed on a channel, both sides
//! exchange their declared capability sets in a single request/response
//! invocation. The peer tracks capability state per channel, so every
//! channel that carries session calls negotiates on its own:
//!
//! 1. **`negotiate`** sends the selector with any leading arguments followed
//!    by the archived local capability set, decodes the peer's acknowledged
//!    set, and records the effective set on the channel.
//! 2. **`ensure_negotiated`** is the guard session-scoped calls run first;
//!    it fails with [`AppError::ProtocolSequenceViolation`] on a channel that
//!    has not negotiated yet.

use tracing::debug;

use crate::models::capabilities::Capabilities;
use crate::models::value::Value;
use crate::rpc::channel::Channel;
use crate::{AppError, Result};

/// Run the capability exchange on `channel`.
///
/// Returns the capability set the peer acknowledged. The channel records the
/// intersection of `required` with that set as its effective capabilities.
///
/// # Errors
///
/// - Any invocation error ([`AppError::RemoteFault`],
///   [`AppError::ConnectionLost`], …) from the exchange itself.
/// - [`AppError::EncodingFailed`] if the peer's reply is not a capability
///   mapping.
pub async fn negotiate(
    channel: &Channel,
    selector: &str,
    leading_args: Vec<Value>,
    required: &Capabilities,
) -> Result<Capabilities> {
    let mut args = leading_args;
    args.push(required.to_value()?);

    let reply = channel.invoke(selector, args).await?;
    let acknowledged = match reply {
        Some(value) => Capabilities::from_value(&value)?,
        None => Capabilities::empty(),
    };

    let effective = required.effective(&acknowledged);
    debug!(
        channel = channel.identifier(),
        selector,
        acknowledged = acknowledged.len(),
        effective = effective.len(),
        "capabilities negotiated"
    );
    channel.mark_negotiated(effective).await?;
    Ok(acknowledged)
}

/// Fail unless `channel` completed negotiation.
///
/// # Errors
///
/// Returns [`AppError::ProtocolSequenceViolation`] naming `operation` when
/// the channel has not negotiated.
pub async fn ensure_negotiated(channel: &Channel, operation: &str) -> Result<Capabilities> {
    channel.negotiated().await.ok_or_else(|| {
        AppError::ProtocolSequenceViolation(format!(
            "{operation} issued on channel '{}' before capability negotiation",
            channel.identifier()
        ))
    })
}
