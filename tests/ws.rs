//! WebSocket integration tests: subscriptions and state queries.

#![allow(clippy::panic)]

mod common;

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

use common::{TestApp, cluster, spawn_app};

type Socket = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn connect(app: &TestApp) -> Socket {
    let url = format!("ws://{}/ws", app.addr);
    let Ok((socket, _)) = tokio_tungstenite::connect_async(url).await else {
        panic!("expected the websocket upgrade to succeed");
    };
    socket
}

async fn send_command(socket: &mut Socket, id: &str, payload: serde_json::Value) {
    let msg = serde_json::json!({
        "id": id,
        "type": "command",
        "timestamp": chrono::Utc::now(),
        "payload": payload,
    });
    let Ok(()) = socket.send(Message::text(msg.to_string())).await else {
        panic!("expected send to succeed");
    };
}

async fn next_json(socket: &mut Socket) -> serde_json::Value {
    let Ok(Some(Ok(msg))) = tokio::time::timeout(Duration::from_secs(2), socket.next()).await
    else {
        panic!("expected a websocket message");
    };
    let Ok(text) = msg.to_text() else {
        panic!("expected a text frame");
    };
    let Ok(value) = serde_json::from_str(text) else {
        panic!("expected JSON");
    };
    value
}

#[tokio::test]
async fn subscribed_client_receives_state_changes() {
    let app = spawn_app("m1", cluster(Some("m1"))).await;
    let mut socket = connect(&app).await;

    let subscribe = serde_json::json!({ "command": "subscribe", "members": ["m1"] });
    send_command(&mut socket, "sub-1", subscribe).await;
    let reply = next_json(&mut socket).await;
    assert_eq!(reply["type"], "response");
    assert_eq!(reply["id"], "sub-1");
    assert_eq!(reply["payload"]["count"], 1);

    app.coordinator.tick().await;

    let event = next_json(&mut socket).await;
    assert_eq!(event["type"], "event");
    assert_eq!(event["payload"]["event_type"], "state_changed");
    assert_eq!(event["payload"]["member"], "m1");
    assert_eq!(event["payload"]["to"], "leading");
}

#[tokio::test]
async fn get_state_returns_last_tick() {
    let app = spawn_app("m1", cluster(Some("m1"))).await;
    app.coordinator.tick().await;
    let mut socket = connect(&app).await;

    send_command(&mut socket, "state-1", serde_json::json!({ "command": "get_state" })).await;
    let reply = next_json(&mut socket).await;
    assert_eq!(reply["type"], "response");
    assert_eq!(reply["payload"]["state"], "leading");
    assert_eq!(reply["payload"]["last_tick"]["leader"], "m1");
}

#[tokio::test]
async fn unknown_command_is_rejected() {
    let app = spawn_app("m1", cluster(Some("m1"))).await;
    let mut socket = connect(&app).await;

    send_command(&mut socket, "bad-1", serde_json::json!({ "command": "swap" })).await;
    let reply = next_json(&mut socket).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["id"], "bad-1");
    assert_eq!(reply["payload"]["code"], 404);
}
