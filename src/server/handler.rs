//! Connection and message handling
//!
//! Handles individual client connections: request/response verbs plus the
//! subscriber event stream.

use crate::protocol::{ClientMessage, ServerMessage};
use crate::socket::SocketError;
use crate::transport::AsyncConnection;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;

use super::ServerInner;

type ServerResult<T> = std::result::Result<T, SocketError>;

pub(super) async fn handle_connection(
    stream: UnixStream,
    inner: Arc<ServerInner>,
) -> ServerResult<()> {
    // Convert UnixStream to AsyncConnection for line-delimited reading
    let (reader, writer) = stream.into_split();
    let mut conn = AsyncConnection {
        reader: tokio::io::BufReader::new(reader),
        writer,
    };

    // Track if this connection is a subscriber
    let mut subscriber_id: Option<String> = None;
    let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel();

    loop {
        tokio::select! {
            // Read from client
            result = conn.read_client_message() => {
                match result? {
                    None => {
                        // Connection closed
                        break;
                    }
                    Some(request) => {
                        tracing::debug!(request = ?request, "Received request");

                        match request {
                            ClientMessage::Subscribe { id } => {
                                subscriber_id = Some(id.to_string());
                                inner.add_subscriber(id.to_string(), event_tx.clone());

                                let response = ServerMessage::new_subscribed(id);
                                conn.write_server_message(&response).await?;

                                // Seed the subscriber with the current state
                                inner.broadcast_status();
                            }
                            other => {
                                let response = process_message(other, &inner).await;
                                conn.write_server_message(&response).await?;
                            }
                        }
                    }
                }
            }

            // Send events to subscriber
            Some(event_data) = event_rx.recv() => {
                conn.writer.write_all(&event_data).await?;
                conn.writer.flush().await?;
            }
        }
    }

    // Clean up subscriber on disconnect
    if let Some(id) = subscriber_id {
        inner.remove_subscriber(&id);
    }

    Ok(())
}

async fn process_message(request: ClientMessage, inner: &Arc<ServerInner>) -> ServerMessage {
    match request {
        ClientMessage::Start { id } => match inner.session.start() {
            Ok(()) => ServerMessage::new_ack(id),
            Err(e) => ServerMessage::new_error(id, e),
        },

        ClientMessage::Stop { id } => {
            inner.session.stop();
            ServerMessage::new_ack(id)
        }

        ClientMessage::Clear { id } => {
            inner.session.clear();
            ServerMessage::new_ack(id)
        }

        ClientMessage::Send { id } => match inner.deliver_current().await {
            Ok(()) => ServerMessage::new_ack(id),
            Err(e) => ServerMessage::new_error(id, e.to_string()),
        },

        ClientMessage::SetWebhook { id, url } => {
            inner.update_config(|config| config.url = url);
            ServerMessage::new_ack(id)
        }

        ClientMessage::SetAutoSend { id, enabled } => {
            inner.update_config(|config| config.auto_send = enabled);
            ServerMessage::new_ack(id)
        }

        ClientMessage::Status { id } => {
            let (listening, auto_send, webhook_configured, uptime_seconds, text_chars) =
                inner.status_fields();
            ServerMessage::new_status(
                id,
                listening,
                auto_send,
                webhook_configured,
                uptime_seconds,
                text_chars,
            )
        }

        ClientMessage::Subscribe { id } => {
            // Subscribe is handled at the connection level
            ServerMessage::new_error(id, "Subscribe should be handled at connection level")
        }
    }
}
