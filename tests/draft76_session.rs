//! End-to-end draft76 sessions against a scripted loopback peer.

mod common;

use anyhow::Result;
use common::*;
use wsclient_drafts::{Error, Message, ProtocolDraft, ReadyState, WebSocket};

#[tokio::test]
async fn draft76_echo_then_peer_close() -> Result<()> {
    init_test_logging();
    let (listener, url) = listen().await?;

    let socket = WebSocket::builder(&url)
        .header("Origin", "http://localhost")
        .build()?;
    let recorder = Recorder::attach(&socket);
    socket.send_text("queued while connecting")?;
    socket.start()?;

    let mut peer = accept(&listener, Reply::Valid, &[]).await?;
    assert_eq!(peer.request[0], "GET /chat?room=1 HTTP/1.1");
    assert_eq!(peer.recv76().await?.as_deref(), Some("queued while connecting"));

    assert_eq!(
        socket
            .wait_for_ready_state_timeout(ReadyState::Open, STEP_TIMEOUT)
            .await?,
        ReadyState::Open
    );
    socket.send_text("Echo me back")?;
    assert_eq!(peer.recv76().await?.as_deref(), Some("Echo me back"));

    peer.send76_text("Echo me back").await?;
    peer.send76_close().await?;
    assert_eq!(peer.recv76().await?, None, "client echoes the close frame");
    drop(peer);

    socket
        .wait_for_ready_state_timeout(ReadyState::Closed, STEP_TIMEOUT)
        .await?;
    socket.join().await;

    assert_eq!(recorder.texts(), ["Echo me back"]);
    assert_eq!(recorder.states(), ["OPEN", "CLOSING", "CLOSED"]);
    assert!(recorder.errors().is_empty(), "{:?}", recorder.errors());
    assert!(socket.last_error().is_none());
    Ok(())
}

#[tokio::test]
async fn draft76_client_close() -> Result<()> {
    init_test_logging();
    let (listener, url) = listen().await?;

    let socket = WebSocket::new(url);
    let recorder = Recorder::attach(&socket);
    socket.start()?;
    let mut peer = accept(&listener, Reply::Valid, &[]).await?;
    socket
        .wait_for_ready_state_timeout(ReadyState::Open, STEP_TIMEOUT)
        .await?;

    socket.close();
    assert_eq!(socket.ready_state(), ReadyState::Closing);
    assert!(matches!(socket.send_text("too late"), Err(Error::ConnectionClosed)));

    assert_eq!(peer.recv76().await?, None);
    peer.send76_close().await?;

    socket
        .wait_for_ready_state_timeout(ReadyState::Closed, STEP_TIMEOUT)
        .await?;
    socket.join().await;
    peer.expect_client_eof().await?;

    assert_eq!(recorder.states(), ["OPEN", "CLOSING", "CLOSED"]);
    assert!(recorder.errors().is_empty(), "{:?}", recorder.errors());
    Ok(())
}

#[tokio::test]
async fn draft76_request_headers_and_subprotocol() -> Result<()> {
    init_test_logging();
    let (listener, url) = listen().await?;

    let socket = WebSocket::with_protocols(url, ["chat", "superchat"])?;
    socket.add_request_header("Origin", "http://localhost")?;
    socket.add_request_header("Upgrade", "h2c")?;
    assert!(socket.add_request_header("X-Evil", "1\r\nInjected: yes").is_err());
    socket.start()?;

    let peer = accept(&listener, Reply::Valid, &["Sec-WebSocket-Protocol: chat"]).await?;
    socket
        .wait_for_ready_state_timeout(ReadyState::Open, STEP_TIMEOUT)
        .await?;

    assert_eq!(
        peer.header_names(),
        [
            "Upgrade",
            "Connection",
            "Host",
            "Sec-WebSocket-Key1",
            "Sec-WebSocket-Key2",
            "Sec-WebSocket-Protocol",
            "Origin",
        ]
    );
    assert_eq!(peer.header("Upgrade").as_deref(), Some("WebSocket"));
    assert_eq!(peer.header("Sec-WebSocket-Protocol").as_deref(), Some("chat superchat"));
    assert!(peer.header("Injected").is_none());
    assert!(peer.header("X-Evil").is_none());

    assert_eq!(socket.protocol().as_deref(), Some("chat"));
    assert_eq!(
        socket.response_headers().get("upgrade").map(String::as_str),
        Some("WebSocket")
    );

    socket.shutdown().await;
    assert_eq!(socket.ready_state(), ReadyState::Closed);
    Ok(())
}

#[tokio::test]
async fn draft76_handshake_mismatch() -> Result<()> {
    init_test_logging();
    let (listener, url) = listen().await?;

    let socket = WebSocket::new(url);
    let recorder = Recorder::attach(&socket);
    socket.start()?;
    let _peer = accept(&listener, Reply::Corrupt, &[]).await?;

    assert_eq!(
        socket.wait_for_ready_state(ReadyState::Open).await,
        ReadyState::Closed
    );
    socket.join().await;

    assert_eq!(recorder.states(), ["CLOSED"]);
    assert_eq!(recorder.errors().len(), 1);
    assert!(matches!(
        socket.last_error().as_deref(),
        Some(Error::HandshakeMismatch { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn draft76_unverified_handshake_opens() -> Result<()> {
    init_test_logging();
    let (listener, url) = listen().await?;

    let socket = WebSocket::builder(url).verify_handshake(false).build()?;
    socket.start()?;
    let _peer = accept(&listener, Reply::Corrupt, &[]).await?;

    assert_eq!(
        socket
            .wait_for_ready_state_timeout(ReadyState::Open, STEP_TIMEOUT)
            .await?,
        ReadyState::Open
    );
    socket.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn draft76_send_immediate_jumps_queue() -> Result<()> {
    init_test_logging();
    let (listener, url) = listen().await?;

    let socket = WebSocket::new(url);
    socket.send_text("first")?;
    socket.send_text("second")?;
    socket.send_immediate(Message::text("urgent"))?;
    socket.start()?;

    let mut peer = accept(&listener, Reply::Valid, &[]).await?;
    let mut received = Vec::new();
    for _ in 0..3 {
        received.extend(peer.recv76().await?);
    }
    assert_eq!(received, ["urgent", "first", "second"]);

    socket.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn draft76_concurrent_abort_is_idempotent() -> Result<()> {
    init_test_logging();
    let (listener, url) = listen().await?;

    let socket = WebSocket::new(url);
    let recorder = Recorder::attach(&socket);
    socket.start()?;
    let mut peer = accept(&listener, Reply::Valid, &[]).await?;
    socket
        .wait_for_ready_state_timeout(ReadyState::Open, STEP_TIMEOUT)
        .await?;

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let socket = socket.clone();
            tokio::spawn(async move { socket.abort() })
        })
        .collect();
    for handle in handles {
        handle.await?;
    }
    socket.join().await;
    peer.expect_client_eof().await?;

    assert_eq!(recorder.states(), ["OPEN", "CLOSED"]);
    assert!(recorder.errors().is_empty());
    assert_eq!(socket.draft(), ProtocolDraft::Draft76);
    Ok(())
}

#[tokio::test]
async fn draft76_connection_refused_reports_error() -> Result<()> {
    init_test_logging();
    let (listener, url) = listen().await?;
    drop(listener);

    let socket = WebSocket::new(url);
    let recorder = Recorder::attach(&socket);
    socket.start()?;

    assert_eq!(
        socket.wait_for_ready_state(ReadyState::Open).await,
        ReadyState::Closed
    );
    socket.join().await;

    assert_eq!(recorder.errors().len(), 1);
    assert!(socket.last_error().is_some_and(|e| e.is_transport_error()));
    Ok(())
}

#[tokio::test]
async fn draft76_shutdown_releases_transport() -> Result<()> {
    init_test_logging();
    let (listener, url) = listen().await?;

    let socket = WebSocket::new(url);
    socket.start()?;
    let mut peer = accept(&listener, Reply::Valid, &[]).await?;
    socket
        .wait_for_ready_state_timeout(ReadyState::Open, STEP_TIMEOUT)
        .await?;

    socket.shutdown().await;
    assert_eq!(socket.ready_state(), ReadyState::Closed);

    // No close frame is sent; the peer only sees the connection drop.
    peer.expect_client_eof().await?;
    Ok(())
}
