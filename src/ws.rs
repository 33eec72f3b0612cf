use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use std::sync::Arc;

use crate::broker::Broker;
use crate::connection::ChannelTransport;
use crate::dispatch::DispatchOutcome;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub role: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsQuery>,
    State(broker): State<Arc<Broker>>,
) -> impl IntoResponse {
    tracing::info!("WebSocket connection request: role={:?}", params.role);

    ws.on_upgrade(move |socket| handle_socket(socket, params, broker))
}

/// Bridge one socket to a broker connection until either side gives up
async fn handle_socket(socket: WebSocket, params: WsQuery, broker: Arc<Broker>) {
    let (mut sender, mut receiver) = socket.split();

    let role = broker.parse_role(params.role.as_deref());
    let (transport, mut outbound) = ChannelTransport::channel();
    let conn = broker.connect(role, Box::new(transport)).await;

    loop {
        tokio::select! {
            // Frames the broker wants delivered to this surface
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                match serde_json::to_string(&frame) {
                    Ok(json) => {
                        if sender.send(WsMessage::Text(json.into())).await.is_err() {
                            tracing::warn!(connection = %conn.id(), "Failed to write frame");
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!(connection = %conn.id(), error = %e, "Failed to serialize frame");
                    }
                }
            }

            // Frames from the surface
            ws_msg = receiver.next() => {
                match ws_msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        tracing::debug!(connection = %conn.id(), "Received message: {}", text.as_str());
                        if broker.handle_frame(&text, &conn).await == DispatchOutcome::Disconnected {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) => {
                        tracing::info!(connection = %conn.id(), "WebSocket closed");
                        break;
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        if sender.send(WsMessage::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::error!(connection = %conn.id(), "WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    broker.disconnect(&conn).await;
    let _ = sender.close().await;
    tracing::info!(connection = %conn.id(), role = %conn.role(), "WebSocket connection closed");
}
