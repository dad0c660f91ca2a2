//! Integration tests for the byte-stream connection and TCP connector.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

use xctest_driver::rpc::message::Message;
use xctest_driver::rpc::stream::{StreamConnection, TcpConnector};
use xctest_driver::rpc::{Connection, Connector};
use xctest_driver::AppError;

fn frame(message: &Message) -> String {
    format!("{}\n", serde_json::to_string(message).unwrap())
}

/// Blank lines and undecodable frames are skipped, not fatal.
#[tokio::test]
async fn malformed_frames_are_skipped() {
    let (near, mut far) = tokio::io::duplex(4096);
    let connection = StreamConnection::new("skip", near, 1024);

    let valid = Message::reply(3, 9, None);
    far.write_all(b"not json at all\n\n").await.unwrap();
    far.write_all(frame(&valid).as_bytes()).await.unwrap();

    let received = connection.recv().await.unwrap();
    assert_eq!(received, Some(valid));
}

#[tokio::test]
async fn oversized_frame_is_an_encoding_error() {
    let (near, mut far) = tokio::io::duplex(4096);
    let connection = StreamConnection::new("oversize", near, 16);

    far.write_all(&[b'x'; 64]).await.unwrap();
    far.write_all(b"\n").await.unwrap();

    let err = connection.recv().await.expect_err("frame too long");
    assert!(matches!(err, AppError::EncodingFailed(ref msg) if msg.contains("too long")));
}

#[tokio::test]
async fn peer_shutdown_is_end_of_stream() {
    let (near, mut far) = tokio::io::duplex(4096);
    let connection = StreamConnection::new("eof", near, 1024);

    far.shutdown().await.unwrap();
    assert_eq!(connection.recv().await.unwrap(), None);
}

/// Closing wakes a blocked reader and rejects further sends.
#[tokio::test]
async fn close_wakes_reader_and_stops_sends() {
    let (near, _far) = tokio::io::duplex(4096);
    let connection = Arc::new(StreamConnection::new("close", near, 1024));

    let reader = tokio::spawn({
        let connection = Arc::clone(&connection);
        async move { connection.recv().await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    connection.close().await.unwrap();
    connection.close().await.expect("close is idempotent");

    let woke = tokio::time::timeout(Duration::from_secs(1), reader)
        .await
        .expect("reader woke")
        .unwrap();
    assert_eq!(woke.unwrap(), None);

    let err = connection
        .send(Message::reply(1, 1, None))
        .await
        .expect_err("closed");
    assert!(matches!(err, AppError::ConnectionClosed(_)));
}

#[tokio::test]
async fn unknown_service_has_no_endpoint() {
    let connector = TcpConnector::new(HashMap::new(), 1024);
    let Err(err) = connector.connect("com.apple.testmanagerd.lockdown.secure").await else {
        panic!("no endpoint configured");
    };
    assert!(
        matches!(err, AppError::ConnectionSetupFailed(ref msg) if msg.contains("no endpoint"))
    );
}

/// Frames written through a TCP connection arrive as newline-delimited JSON.
#[tokio::test]
async fn tcp_connection_round_trip() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connector = TcpConnector::new(
        HashMap::from([("com.test.service".to_owned(), addr)]),
        4096,
    );

    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = socket.into_split();
        let mut lines = BufReader::new(read_half).lines();
        let line = lines.next_line().await.unwrap().expect("one frame");
        let request: Message = serde_json::from_str(&line).unwrap();

        let reply = Message::reply(-request.channel, request.identifier, None);
        write_half.write_all(frame(&reply).as_bytes()).await.unwrap();
        request
    });

    let connection = connector.connect("com.test.service").await.expect("connects");
    let request = Message::invoke(2, 41, "ping", b"[]".to_vec(), true);
    connection.send(request.clone()).await.unwrap();

    let reply = connection.recv().await.unwrap().expect("reply frame");
    assert_eq!(server.await.unwrap(), request);
    assert_eq!(reply.channel, -2);
    assert_eq!(reply.identifier, 41);
    assert!(reply.is_reply());
    connection.close().await.unwrap();
}
