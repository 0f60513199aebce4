//! Integration tests for the Figma bridge.
//!
//! Each test plays the relay and plugin with a real WebSocket peer on a
//! loopback port, so frames go through the same code path as in production.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_test::{assert_err, assert_ok};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

use figma_mcp_bridge::bridge::{BridgeSettings, FigmaBridge};
use figma_mcp_bridge::error::BridgeError;

type Peer = WebSocketStream<TcpStream>;

const TEST_LIMIT: Duration = Duration::from_secs(10);

async fn listen() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    (listener, url)
}

async fn accept(listener: &TcpListener) -> Peer {
    let (stream, _) = listener.accept().await.unwrap();
    accept_async(stream).await.unwrap()
}

/// Next text frame as JSON, `None` once the bridge closes.
async fn next_json(ws: &mut Peer) -> Option<Value> {
    while let Some(frame) = ws.next().await {
        match frame.ok()? {
            Message::Text(text) => return Some(serde_json::from_str(text.as_str()).unwrap()),
            Message::Close(_) => return None,
            _ => {}
        }
    }
    None
}

async fn send_json(ws: &mut Peer, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

/// Answers a join the way the relay does: a system message wrapping the id.
async fn accept_join(ws: &mut Peer, expected_channel: &str) {
    let join = next_json(ws).await.unwrap();
    assert_eq!(join["type"], "join");
    assert_eq!(join["channel"], expected_channel);
    assert_eq!(join["message"]["command"], "join");
    send_json(
        ws,
        json!({
            "type": "system",
            "channel": expected_channel,
            "message": {"id": join["id"], "result": format!("Connected to channel: {expected_channel}")},
        }),
    )
    .await;
}

#[tokio::test]
async fn lazy_connect_joins_default_channel_then_sends() {
    let (listener, url) = listen().await;

    let peer = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        accept_join(&mut ws, "design").await;

        let cmd = next_json(&mut ws).await.unwrap();
        assert_eq!(cmd["type"], "message");
        assert_eq!(cmd["channel"], "design");
        assert_eq!(cmd["message"]["command"], "get_document_info");
        assert_eq!(cmd["message"]["params"]["commandId"], cmd["id"]);

        send_json(
            &mut ws,
            json!({"id": cmd["id"], "result": {"id": "0:1", "type": "PAGE", "children": []}}),
        )
        .await;
        ws
    });

    let bridge = FigmaBridge::start(BridgeSettings::new(url).with_default_channel("design"));
    let result = tokio::time::timeout(
        TEST_LIMIT,
        bridge.send_command("get_document_info", Value::Null),
    )
    .await
    .unwrap();

    assert_eq!(
        assert_ok!(result),
        json!({"id": "0:1", "type": "PAGE", "children": []})
    );
    assert_eq!(bridge.current_channel().await.unwrap().as_deref(), Some("design"));

    let _ws = peer.await.unwrap();
    bridge.shutdown().await;
}

#[tokio::test]
async fn out_of_order_replies_reach_their_callers() {
    let (listener, url) = listen().await;

    let peer = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        accept_join(&mut ws, "review").await;

        let first = next_json(&mut ws).await.unwrap();
        let second = next_json(&mut ws).await.unwrap();

        // Answer in reverse order, wrapped the way plugin broadcasts arrive.
        for cmd in [&second, &first] {
            let node = cmd["message"]["params"]["nodeId"].clone();
            send_json(
                &mut ws,
                json!({
                    "type": "broadcast",
                    "channel": "review",
                    "message": {"id": cmd["id"], "result": {"id": node, "name": "Frame"}},
                }),
            )
            .await;
        }
        ws
    });

    let bridge = FigmaBridge::start(BridgeSettings::new(url));
    assert_ok!(bridge.join_channel("review").await);

    let a = {
        let bridge = bridge.clone();
        tokio::spawn(async move { bridge.send_command("get_node_info", json!({"nodeId": "1:1"})).await })
    };
    let b = {
        let bridge = bridge.clone();
        tokio::spawn(async move { bridge.send_command("get_node_info", json!({"nodeId": "2:2"})).await })
    };

    let (a, b) = tokio::time::timeout(TEST_LIMIT, async { (a.await.unwrap(), b.await.unwrap()) })
        .await
        .unwrap();
    assert_eq!(assert_ok!(a)["id"], "1:1");
    assert_eq!(assert_ok!(b)["id"], "2:2");

    let _ws = peer.await.unwrap();
    bridge.shutdown().await;
}

#[tokio::test]
async fn remote_error_is_surfaced() {
    let (listener, url) = listen().await;

    let peer = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        accept_join(&mut ws, "errors").await;
        let cmd = next_json(&mut ws).await.unwrap();
        send_json(&mut ws, json!({"id": cmd["id"], "error": "Node not found: 9:9"})).await;
        ws
    });

    let bridge = FigmaBridge::start(BridgeSettings::new(url).with_default_channel("errors"));
    let result = tokio::time::timeout(
        TEST_LIMIT,
        bridge.send_command("get_node_info", json!({"nodeId": "9:9"})),
    )
    .await
    .unwrap();

    assert_eq!(
        assert_err!(result),
        BridgeError::Remote {
            message: "Node not found: 9:9".to_string()
        }
    );

    let _ws = peer.await.unwrap();
    bridge.shutdown().await;
}

#[tokio::test]
async fn close_rejects_every_pending_request() {
    let (listener, url) = listen().await;

    let peer = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        accept_join(&mut ws, "doomed").await;
        for _ in 0..3 {
            next_json(&mut ws).await.unwrap();
        }
        ws.close(Some(CloseFrame {
            code: CloseCode::from(4000),
            reason: "relay restart".into(),
        }))
        .await
        .unwrap();
        // Drain until the bridge acknowledges the close.
        while ws.next().await.is_some() {}
    });

    let bridge = FigmaBridge::start(BridgeSettings::new(url).with_default_channel("doomed"));
    let calls: Vec<_> = ["get_selection", "get_styles", "get_local_components"]
        .into_iter()
        .map(|command| {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.send_command(command, json!({})).await })
        })
        .collect();

    for call in calls {
        let result = tokio::time::timeout(TEST_LIMIT, call).await.unwrap().unwrap();
        assert_eq!(
            assert_err!(result),
            BridgeError::ConnectionClosed {
                code: 4000,
                reason: "relay restart".to_string()
            }
        );
    }
    assert_eq!(bridge.current_channel().await.unwrap(), None);

    peer.await.unwrap();
    bridge.shutdown().await;
}

#[tokio::test]
async fn commands_without_channel_are_refused_unsent() {
    let (listener, url) = listen().await;

    let peer = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        // Nothing may arrive before the bridge closes the socket.
        next_json(&mut ws).await
    });

    let bridge = FigmaBridge::start(BridgeSettings::new(url));
    let result = tokio::time::timeout(TEST_LIMIT, bridge.send_command("get_selection", json!({})))
        .await
        .unwrap();
    assert_eq!(
        assert_err!(result),
        BridgeError::NoChannel {
            command: "get_selection".to_string()
        }
    );

    bridge.shutdown().await;
    let received = tokio::time::timeout(TEST_LIMIT, peer).await.unwrap().unwrap();
    assert_eq!(received, None);
}

#[tokio::test]
async fn silent_plugin_times_out() {
    let (listener, url) = listen().await;

    let peer = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        accept_join(&mut ws, "quiet").await;
        next_json(&mut ws).await.unwrap();
        ws
    });

    let mut settings = BridgeSettings::new(url).with_default_channel("quiet");
    settings.timeouts.base = Duration::from_millis(50);
    let bridge = FigmaBridge::start(settings);

    let result = tokio::time::timeout(TEST_LIMIT, bridge.send_command("get_selection", json!({})))
        .await
        .unwrap();
    match assert_err!(result) {
        BridgeError::Timeout {
            command,
            elapsed_ms,
        } => {
            assert_eq!(command, "get_selection");
            assert!(elapsed_ms >= 350, "failed after {elapsed_ms} ms");
        }
        other => panic!("expected timeout, got {other:?}"),
    }

    let _ws = peer.await.unwrap();
    bridge.shutdown().await;
}

#[tokio::test]
async fn unreachable_relay_fails_then_backs_off() {
    let (listener, url) = listen().await;
    drop(listener);

    let bridge = FigmaBridge::start(BridgeSettings::new(url).with_default_channel("any"));

    let first = tokio::time::timeout(TEST_LIMIT, bridge.send_command("get_selection", json!({})))
        .await
        .unwrap();
    assert!(matches!(
        assert_err!(first),
        BridgeError::ConnectFailed { .. }
    ));

    // Still inside the reconnect interval.
    let second = bridge.send_command("get_selection", json!({})).await;
    assert_eq!(assert_err!(second), BridgeError::NotConnected);

    bridge.shutdown().await;
}

#[tokio::test]
async fn shutdown_sends_close_and_rejects_pending() {
    let (listener, url) = listen().await;
    let (sent_tx, sent_rx) = tokio::sync::oneshot::channel();

    let peer = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        accept_join(&mut ws, "closing").await;
        let cmd = next_json(&mut ws).await.unwrap();
        assert_eq!(cmd["message"]["command"], "get_selection");
        sent_tx.send(()).unwrap();

        // The command is never answered; the next frame must be the close.
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) => return true,
                Some(Ok(_)) => {}
                Some(Err(_)) | None => return false,
            }
        }
    });

    let bridge = FigmaBridge::start(BridgeSettings::new(url).with_default_channel("closing"));
    let call = {
        let bridge = bridge.clone();
        tokio::spawn(async move { bridge.send_command("get_selection", json!({})).await })
    };

    tokio::time::timeout(TEST_LIMIT, sent_rx).await.unwrap().unwrap();
    tokio::time::timeout(TEST_LIMIT, bridge.shutdown()).await.unwrap();

    let result = tokio::time::timeout(TEST_LIMIT, call).await.unwrap().unwrap();
    assert_eq!(assert_err!(result), BridgeError::Stopped);

    let closed = tokio::time::timeout(TEST_LIMIT, peer).await.unwrap().unwrap();
    assert!(closed, "peer never saw a close frame");
}

#[tokio::test]
async fn reconnects_after_close_and_rejoins_default_channel() {
    let (listener, url) = listen().await;
    let (reconnecting_tx, reconnecting_rx) = tokio::sync::oneshot::channel();
    let (proceed_tx, proceed_rx) = tokio::sync::oneshot::channel::<()>();

    let peer = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        accept_join(&mut ws, "design").await;
        let cmd = next_json(&mut ws).await.unwrap();
        send_json(&mut ws, json!({"id": cmd["id"], "result": {"selectionCount": 0}})).await;
        ws.close(Some(CloseFrame {
            code: CloseCode::Away,
            reason: "relay restart".into(),
        }))
        .await
        .unwrap();
        while ws.next().await.is_some() {}

        // Hold the second handshake until the test has queued a command.
        let (stream, _) = listener.accept().await.unwrap();
        reconnecting_tx.send(()).unwrap();
        proceed_rx.await.unwrap();

        let mut ws = accept_async(stream).await.unwrap();
        accept_join(&mut ws, "design").await;
        let cmd = next_json(&mut ws).await.unwrap();
        assert_eq!(cmd["message"]["command"], "get_styles");
        assert_eq!(cmd["channel"], "design");
        send_json(&mut ws, json!({"id": cmd["id"], "result": {"colors": []}})).await;
        ws
    });

    let mut settings = BridgeSettings::new(url).with_default_channel("design");
    settings.reconnect.base_interval = Duration::from_millis(20);
    settings.reconnect.max_delay = Duration::from_millis(100);
    let bridge = FigmaBridge::start(settings);

    let first = tokio::time::timeout(TEST_LIMIT, bridge.send_command("get_selection", json!({})))
        .await
        .unwrap();
    assert_eq!(assert_ok!(first), json!({"selectionCount": 0}));

    // The backoff timer has fired and a new handshake is in flight.
    tokio::time::timeout(TEST_LIMIT, reconnecting_rx).await.unwrap().unwrap();

    let (second, ()) = tokio::time::timeout(TEST_LIMIT, async {
        tokio::join!(bridge.send_command("get_styles", json!({})), async {
            // Queued behind the send, so the command is already deferred.
            assert_eq!(bridge.current_channel().await.unwrap(), None);
            proceed_tx.send(()).unwrap();
        })
    })
    .await
    .unwrap();
    assert_eq!(assert_ok!(second), json!({"colors": []}));
    assert_eq!(bridge.current_channel().await.unwrap().as_deref(), Some("design"));

    let _ws = peer.await.unwrap();
    bridge.shutdown().await;
}

#[tokio::test]
async fn bounded_reconnect_gives_up() {
    let (listener, url) = listen().await;
    drop(listener);

    let mut settings = BridgeSettings::new(url).with_default_channel("any");
    settings.reconnect.base_interval = Duration::from_millis(20);
    settings.reconnect.max_attempts = Some(1);
    let bridge = FigmaBridge::start(settings);

    let first = tokio::time::timeout(TEST_LIMIT, bridge.send_command("get_selection", json!({})))
        .await
        .unwrap();
    assert!(matches!(
        assert_err!(first),
        BridgeError::ConnectFailed { .. }
    ));

    // One retry is allowed; commands racing it see the backoff or its failure.
    let exhausted = tokio::time::timeout(TEST_LIMIT, async {
        loop {
            match bridge.send_command("get_selection", json!({})).await {
                Err(BridgeError::NotConnected | BridgeError::ConnectFailed { .. }) => {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                other => return other,
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(
        assert_err!(exhausted),
        BridgeError::ReconnectExhausted { attempts: 1 }
    );

    bridge.shutdown().await;
}

#[tokio::test]
async fn stalled_handshake_hits_connect_timeout() {
    let (listener, url) = listen().await;

    // Accepts the TCP connection but never answers the upgrade request.
    let peer = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(TEST_LIMIT).await;
        drop(stream);
    });

    let mut settings = BridgeSettings::new(url.clone()).with_default_channel("any");
    settings.connect_timeout = Duration::from_millis(100);
    let bridge = FigmaBridge::start(settings);

    let result = tokio::time::timeout(TEST_LIMIT, bridge.send_command("get_selection", json!({})))
        .await
        .unwrap();
    match assert_err!(result) {
        BridgeError::ConnectFailed { url: failed, message } => {
            assert_eq!(failed, url);
            assert!(message.contains("timed out"), "unexpected message: {message}");
        }
        other => panic!("expected connect failure, got {other:?}"),
    }

    peer.abort();
    bridge.shutdown().await;
}
