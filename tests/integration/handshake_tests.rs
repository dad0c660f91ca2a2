//! Integration tests for capability negotiation and its sequencing guard.

use std::sync::Arc;

use xctest_driver::models::capabilities::Capabilities;
use xctest_driver::models::process::ProcessHandle;
use xctest_driver::models::value::Value;
use xctest_driver::rpc::handshake::{ensure_negotiated, negotiate};
use xctest_driver::rpc::{Channel, Dispatcher, InboundCall};
use xctest_driver::testmanager::daemon::DaemonProxy;
use xctest_driver::testmanager::INITIATE_SESSION;
use xctest_driver::{AppError, Result};

use super::test_helpers::dispatcher_pair;

/// Device that acknowledges one capability and faults on anything unknown.
async fn acknowledging_device(device: &Dispatcher) {
    device
        .on_remote_channel(Arc::new(
            |_: &Channel, call: InboundCall| -> Result<Option<Value>> {
                match call.selector.as_str() {
                    INITIATE_SESSION => {
                        let ack: Capabilities = [("XCTIssue capability", 1_u64)]
                            .into_iter()
                            .collect();
                        Ok(Some(ack.to_value()?))
                    }
                    "silent:" => Ok(None),
                    other => Err(AppError::NotFound(other.to_owned())),
                }
            },
        ))
        .await;
}

#[tokio::test]
async fn negotiation_records_effective_capabilities() {
    let (client, device) = dispatcher_pair("negotiate");
    acknowledging_device(&device).await;
    let channel = client.open_channel("com.test.proxy").await.unwrap();
    assert!(channel.negotiated().await.is_none());

    let required = Capabilities::test_session_defaults();
    let acknowledged = negotiate(
        &channel,
        INITIATE_SESSION,
        vec![Value::from("SESSION")],
        &required,
    )
    .await
    .expect("negotiation");

    assert_eq!(acknowledged.get("XCTIssue capability"), Some(1));
    let effective = channel.negotiated().await.expect("negotiated");
    assert_eq!(effective, required.effective(&acknowledged));
    assert_eq!(
        ensure_negotiated(&channel, "test").await.expect("guard passes"),
        effective
    );
    client.close().await.unwrap();
    device.close().await.unwrap();
}

/// An empty reply counts as an empty acknowledgment.
#[tokio::test]
async fn empty_reply_negotiates_nothing() {
    let (client, device) = dispatcher_pair("silent");
    acknowledging_device(&device).await;
    let channel = client.open_channel("com.test.proxy").await.unwrap();

    let required = Capabilities::test_session_defaults();
    let acknowledged = negotiate(&channel, "silent:", Vec::new(), &required)
        .await
        .expect("negotiation");
    assert!(acknowledged.is_empty());
    assert_eq!(channel.negotiated().await, Some(Capabilities::empty()));
    client.close().await.unwrap();
    device.close().await.unwrap();
}

#[tokio::test]
async fn failed_negotiation_leaves_channel_unnegotiated() {
    let (client, device) = dispatcher_pair("refused");
    acknowledging_device(&device).await;
    let channel = client.open_channel("com.test.proxy").await.unwrap();

    let err = negotiate(&channel, "unknown:", Vec::new(), &Capabilities::empty())
        .await
        .expect_err("peer faults");
    assert!(matches!(err, AppError::RemoteFault(_)));
    let err = ensure_negotiated(&channel, "authorize")
        .await
        .expect_err("still unnegotiated");
    assert!(
        matches!(err, AppError::ProtocolSequenceViolation(ref msg) if msg.contains("authorize"))
    );
    client.close().await.unwrap();
    device.close().await.unwrap();
}

/// Negotiation state belongs to the channel it ran on.
#[tokio::test]
async fn negotiation_is_per_channel() {
    let (client, device) = dispatcher_pair("per-channel");
    acknowledging_device(&device).await;
    let first = client.open_channel("com.test.first").await.unwrap();
    let second = client.open_channel("com.test.second").await.unwrap();

    negotiate(&first, INITIATE_SESSION, Vec::new(), &Capabilities::empty())
        .await
        .unwrap();
    assert!(first.negotiated().await.is_some());
    assert!(second.negotiated().await.is_none());
    client.close().await.unwrap();
    device.close().await.unwrap();
}

/// Session calls on an unnegotiated proxy fail without reaching the peer.
#[tokio::test]
async fn session_calls_before_negotiation_are_rejected() {
    let (client, device) = dispatcher_pair("early");
    acknowledging_device(&device).await;
    let channel = client.open_channel("com.test.proxy").await.unwrap();
    let events = client.open_channel("com.test.events").await.unwrap();
    let proxy = DaemonProxy::new(client.clone(), channel);

    let err = proxy
        .authorize_test_session(ProcessHandle::new(77))
        .await
        .expect_err("not negotiated");
    assert!(matches!(err, AppError::ProtocolSequenceViolation(_)));

    let err = proxy
        .start_executing_test_plan(&events, 36)
        .await
        .expect_err("not negotiated");
    assert!(matches!(err, AppError::ProtocolSequenceViolation(_)));

    proxy.close().await.unwrap();
    device.close().await.unwrap();
}
