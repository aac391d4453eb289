//! WebSocket connection state machine.
//!
//! Handles the read/write loop for a single WebSocket connection,
//! dispatching incoming commands and forwarding filtered events.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;

use super::messages::{WsCommand, WsMessage, WsMessageType};
use super::subscription::SubscriptionManager;
use crate::domain::HaEvent;
use crate::service::HaCoordinator;

/// Runs the read/write loop for a single WebSocket connection.
///
/// - Reads commands from the client and dispatches them.
/// - Forwards events for subscribed members from the
///   [`broadcast::Receiver`] to the client.
pub async fn run_connection(
    socket: WebSocket,
    mut event_rx: broadcast::Receiver<HaEvent>,
    coordinator: Arc<HaCoordinator>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut subs = SubscriptionManager::new();

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let response = handle_text_message(&text, &mut subs, &coordinator).await;
                        let Ok(json) = serde_json::to_string(&response) else {
                            continue;
                        };
                        if ws_tx.send(Message::text(json)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    _ => {}
                }
            }
            event = event_rx.recv() => {
                match event {
                    Ok(ha_event) => {
                        if !subs.matches(ha_event.member()) {
                            continue;
                        }
                        let Ok(payload) = serde_json::to_value(&ha_event) else {
                            continue;
                        };
                        let msg = WsMessage::new(
                            uuid::Uuid::new_v4().to_string(),
                            WsMessageType::Event,
                            payload,
                        );
                        let Ok(json) = serde_json::to_string(&msg) else {
                            continue;
                        };
                        if ws_tx.send(Message::text(json)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(lagged = n, "ws client lagged behind event bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    tracing::debug!("ws connection closed");
}

/// Handles a text frame from the client and builds the reply.
async fn handle_text_message(
    text: &str,
    subs: &mut SubscriptionManager,
    coordinator: &HaCoordinator,
) -> WsMessage {
    let Ok(msg) = serde_json::from_str::<WsMessage>(text) else {
        return WsMessage::error("", 400, "malformed JSON");
    };
    if msg.msg_type != WsMessageType::Command {
        return WsMessage::error(msg.id, 400, "expected a command message");
    }
    let command = match serde_json::from_value::<WsCommand>(msg.payload) {
        Ok(command) => command,
        Err(e) => return WsMessage::error(msg.id, 404, format!("unknown command: {e}")),
    };

    let payload = match command {
        WsCommand::Subscribe { members } => {
            let added = subs.subscribe(&members);
            serde_json::json!({
                "subscribed": added,
                "count": subs.count(),
                "wildcard": subs.is_subscribed_all(),
            })
        }
        WsCommand::Unsubscribe { members } => {
            subs.unsubscribe(&members);
            serde_json::json!({
                "unsubscribed": members,
                "remaining_count": subs.count(),
                "wildcard": subs.is_subscribed_all(),
            })
        }
        WsCommand::GetState => {
            let last_tick = coordinator
                .last_report()
                .await
                .and_then(|report| serde_json::to_value(report).ok());
            serde_json::json!({
                "member": coordinator.member_name(),
                "engine": coordinator.engine(),
                "state": coordinator.state().await,
                "last_tick": last_tick,
            })
        }
    };

    WsMessage::new(msg.id, WsMessageType::Response, payload)
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::adapter::{DatabaseAdapter, InMemoryAdapter};
    use crate::dcs::{CoordinationStore, InMemoryStore};
    use crate::domain::{Cluster, EventBus};

    fn coordinator() -> HaCoordinator {
        HaCoordinator::new(
            Arc::new(InMemoryStore::new(Cluster::default())) as Arc<dyn CoordinationStore>,
            Arc::new(InMemoryAdapter::new("m1")) as Arc<dyn DatabaseAdapter>,
            EventBus::new(8),
            Duration::from_millis(100),
        )
    }

    fn command(payload: serde_json::Value) -> String {
        let msg = WsMessage::new("req-1", WsMessageType::Command, payload);
        let Ok(text) = serde_json::to_string(&msg) else {
            panic!("expected serialization");
        };
        text
    }

    #[tokio::test]
    async fn malformed_json_is_an_error() {
        let mut subs = SubscriptionManager::new();
        let reply = handle_text_message("{nope", &mut subs, &coordinator()).await;
        assert_eq!(reply.msg_type, WsMessageType::Error);
        assert_eq!(reply.payload["code"], 400);
    }

    #[tokio::test]
    async fn subscribe_updates_filter() {
        let mut subs = SubscriptionManager::new();
        let text = command(serde_json::json!({ "command": "subscribe", "members": ["m2"] }));
        let reply = handle_text_message(&text, &mut subs, &coordinator()).await;
        assert_eq!(reply.msg_type, WsMessageType::Response);
        assert_eq!(reply.id, "req-1");
        assert_eq!(reply.payload["count"], 1);
        assert!(subs.matches("m2"));
        assert!(!subs.matches("m1"));
    }

    #[tokio::test]
    async fn unknown_command_echoes_id() {
        let mut subs = SubscriptionManager::new();
        let text = command(serde_json::json!({ "command": "swap" }));
        let reply = handle_text_message(&text, &mut subs, &coordinator()).await;
        assert_eq!(reply.msg_type, WsMessageType::Error);
        assert_eq!(reply.id, "req-1");
        assert_eq!(reply.payload["code"], 404);
    }

    #[tokio::test]
    async fn get_state_reports_unknown_before_first_tick() {
        let mut subs = SubscriptionManager::new();
        let text = command(serde_json::json!({ "command": "get_state" }));
        let reply = handle_text_message(&text, &mut subs, &coordinator()).await;
        assert_eq!(reply.msg_type, WsMessageType::Response);
        assert_eq!(reply.payload["member"], "m1");
        assert_eq!(reply.payload["state"], "unknown");
        assert!(reply.payload["last_tick"].is_null());
    }
}
