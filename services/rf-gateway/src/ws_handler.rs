//! WebSocket push channel for spectrum frames and bursts

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use rf_capture::ClientId;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

use crate::AppState;

/// Messages accepted from clients
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe { device_index: u32 },
    Unsubscribe { device_index: u32 },
    Ping,
}

/// Control replies; data events are serialized straight from `DeviceEvent`
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    ConnectionStatus {
        status: &'static str,
        client_id: u64,
    },
    SubscribeStatus {
        status: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        device_index: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Pong,
}

/// Handle WebSocket upgrade request
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let (client, events) = state.bridge.connect();
    let (reply_tx, mut reply_rx) = mpsc::channel::<ServerMessage>(16);

    info!("WebSocket {} connected", client);

    let hello = ServerMessage::ConnectionStatus {
        status: "connected",
        client_id: client.0,
    };
    if send_json(&mut sender, &hello).await.is_err() {
        state.bridge.disconnect(client);
        return;
    }

    // Forward bridge events and control replies to this client
    let mut send_task = tokio::spawn(async move {
        let mut events = ReceiverStream::new(events);
        loop {
            let sent = tokio::select! {
                event = events.next() => match event {
                    Some(event) => send_json(&mut sender, &event).await,
                    None => break,
                },
                reply = reply_rx.recv() => match reply {
                    Some(reply) => send_json(&mut sender, &reply).await,
                    None => break,
                },
            };
            if sent.is_err() {
                break;
            }
        }
    });

    // Handle incoming messages from client
    let recv_state = state.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(msg) => {
                        let reply = handle_message(&recv_state, client, msg);
                        if reply_tx.send(reply).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => debug!("Ignoring message from {}: {}", client, e),
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    error!("WebSocket error on {}: {}", client, e);
                    break;
                }
            }
        }
    });

    // Wait for either task to complete
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.bridge.disconnect(client);
    info!("WebSocket {} disconnected", client);
}

fn handle_message(state: &AppState, client: ClientId, msg: ClientMessage) -> ServerMessage {
    match msg {
        ClientMessage::Subscribe { device_index } => {
            if state.service.registry().device(device_index).is_none() {
                warn!("{} tried to subscribe to unknown device {}", client, device_index);
                return ServerMessage::SubscribeStatus {
                    status: "error",
                    device_index: Some(device_index),
                    message: Some(format!("device {} not found", device_index)),
                };
            }
            state.bridge.subscribe(client, device_index);
            info!("{} subscribed to device {}", client, device_index);
            ServerMessage::SubscribeStatus {
                status: "subscribed",
                device_index: Some(device_index),
                message: None,
            }
        }
        ClientMessage::Unsubscribe { device_index } => {
            state.bridge.unsubscribe(client, device_index);
            ServerMessage::SubscribeStatus {
                status: "unsubscribed",
                device_index: Some(device_index),
                message: None,
            }
        }
        ClientMessage::Ping => ServerMessage::Pong,
    }
}

/// Serialize and send; serialization failures are logged and skipped
async fn send_json<T: Serialize>(sender: &mut SplitSink<WebSocket, Message>, value: &T) -> Result<(), axum::Error> {
    let json = match serde_json::to_string(value) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize message: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(json)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_client_messages() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"subscribe","device_index":2}"#).unwrap();
        assert_eq!(msg, ClientMessage::Subscribe { device_index: 2 });

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Ping);

        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"subscribe"}"#).is_err());
    }

    #[test]
    fn test_server_message_shape() {
        let json = serde_json::to_value(ServerMessage::SubscribeStatus {
            status: "subscribed",
            device_index: Some(0),
            message: None,
        })
        .unwrap();
        assert_eq!(json["type"], "subscribe_status");
        assert_eq!(json["device_index"], 0);
        assert!(json.get("message").is_none());

        let json = serde_json::to_value(ServerMessage::Pong).unwrap();
        assert_eq!(json["type"], "pong");
    }
}
