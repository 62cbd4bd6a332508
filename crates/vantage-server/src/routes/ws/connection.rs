//! Channel connection lifecycle.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::protocol::{ClientMessage, ServerMessage};
use crate::session::Session;

/// Drive one socket: announce the session id, then forward session events
/// and answer client frames until either side goes away or the server shuts
/// down.
pub async fn handle_socket(socket: WebSocket, session: Arc<Session>, shutdown: CancellationToken) {
    let (mut sender, mut receiver) = socket.split();
    let session_id = session.id();

    let hello = ServerMessage::Id {
        session_id: session_id.to_string(),
    };
    if send_message(&mut sender, hello).await.is_err() {
        tracing::debug!(session_id = %session_id, "Channel closed before the id was sent");
        return;
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let token = session.connect(tx);
    tracing::debug!(session_id = %session_id, "Channel attached");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
            event = rx.recv() => {
                // The sink was handed to a newer connection.
                let Some(event) = event else { break };
                if send_message(&mut sender, event.into()).await.is_err() {
                    break;
                }
            }
            frame = receiver.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text.to_string(),
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => text,
                        Err(_) => {
                            let _ = send_message(
                                &mut sender,
                                ServerMessage::error("invalid_message", "Binary data must be UTF-8"),
                            )
                            .await;
                            continue;
                        }
                    },
                    Some(Ok(Message::Ping(data))) => {
                        session.touch();
                        let _ = sender.send(Message::Pong(data)).await;
                        continue;
                    }
                    Some(Ok(Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::warn!(session_id = %session_id, error = %e, "Channel error");
                        break;
                    }
                };

                let reply = match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::Ping) => {
                        session.touch();
                        ServerMessage::Pong
                    }
                    Err(e) => ServerMessage::error("parse_error", format!("Invalid message: {e}")),
                };
                if send_message(&mut sender, reply).await.is_err() {
                    break;
                }
            }
        }
    }

    session.disconnect(token);
    tracing::debug!(session_id = %session_id, "Channel detached");
}

/// Send a message over the socket.
async fn send_message(
    sender: &mut SplitSink<WebSocket, Message>,
    msg: ServerMessage,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(&msg).map_err(axum::Error::new)?;
    sender
        .send(Message::Text(json.into()))
        .await
        .map_err(axum::Error::new)
}
