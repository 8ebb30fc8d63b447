//! WebSocket connection handler
//!
//! Handles individual client connections: WebSocket handshake,
//! message parsing, and bidirectional communication with the ChatServer.

use std::future::Future;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

use crate::error::AppError;
use crate::message::{ClientMessage, ServerMessage};
use crate::server::ServerCommand;
use crate::session::ChatHandle;
use crate::types::ClientId;

/// Accept connections until `shutdown` resolves
///
/// Each connection gets its own handler task.
pub async fn serve<F>(listener: TcpListener, chat: ChatHandle, shutdown: F) -> Result<(), AppError>
where
    F: Future<Output = ()>,
{
    info!("WebSocket chat server listening on {}", listener.local_addr()?);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    info!("New connection from {}", addr);
                    let chat = chat.clone();

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, chat).await {
                            error!("Connection handler error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            },
            _ = &mut shutdown => {
                info!("Stopped accepting connections");
                return Ok(());
            }
        }
    }
}

/// Handle a new TCP connection
///
/// Performs WebSocket handshake, sets up bidirectional communication,
/// and manages the connection lifecycle.
pub async fn handle_connection(stream: TcpStream, chat: ChatHandle) -> Result<(), AppError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    debug!("New TCP connection from {}", peer_addr);

    // WebSocket handshake
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;

    run_socket(ws_stream, chat, &peer_addr).await
}

/// Drive an upgraded WebSocket until either side goes away
///
/// Once registered, the connection always ends with a `Disconnect` command,
/// whichever way the socket fails.
async fn run_socket<S>(
    ws_stream: WebSocketStream<S>,
    chat: ChatHandle,
    peer_addr: &str,
) -> Result<(), AppError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    // Register with ChatServer
    let (client_id, mut msg_rx) = match chat.connect().await {
        Ok(registered) => registered,
        Err(e) => {
            error!("Failed to register connection from {} - server closed", peer_addr);
            return Err(e);
        }
    };
    info!("Client {} connected from {}", client_id, peer_addr);

    let chat_read = chat.clone();

    // Spawn read task (WebSocket -> ServerCommand)
    let mut read_task = tokio::spawn(async move {
        while let Some(msg_result) = ws_receiver.next().await {
            match msg_result {
                Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(client_msg) => {
                        let cmd = client_message_to_command(client_id, client_msg);
                        if chat_read.send(cmd).await.is_err() {
                            debug!("Server closed, ending read task for {}", client_id);
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Invalid JSON from {}: {}", client_id, e);
                    }
                },
                Ok(Message::Close(_)) => {
                    debug!("Client {} sent close frame", client_id);
                    break;
                }
                Ok(Message::Ping(_)) => {
                    // Pong is handled automatically by tungstenite
                    debug!("Ping from {}", client_id);
                }
                Ok(_) => {
                    // Binary, pong and raw frames are ignored
                }
                Err(e) => {
                    debug!("WebSocket error for {}: {}", client_id, e);
                    break;
                }
            }
        }
        debug!("Read task ended for {}", client_id);
    });

    // Spawn write task (ServerMessage -> WebSocket)
    let mut write_task = tokio::spawn(async move {
        // Connection success message goes first, through the same path
        let connected = ServerMessage::Connected {
            client_id: client_id.to_string(),
        };
        if write_message(&mut ws_sender, &connected).await {
            while let Some(msg) = msg_rx.recv().await {
                if !write_message(&mut ws_sender, &msg).await {
                    break;
                }
            }
        }
        debug!("Write task ended for {}", client_id);

        // Queue dropped by the server (leave, failed delivery, shutdown)
        let _ = ws_sender.close().await;
    });

    // Whichever side finishes first ends the connection
    tokio::select! {
        _ = &mut read_task => {
            debug!("Read task completed for {}", client_id);
            write_task.abort();
        }
        _ = &mut write_task => {
            debug!("Write task completed for {}", client_id);
            read_task.abort();
        }
    }

    // Transport is gone; a no-op if the client already left
    let _ = chat.send(ServerCommand::Disconnect { client_id }).await;

    info!("Client {} disconnected", client_id);

    Ok(())
}

/// Serialize and send one message. Returns false once the socket is unusable.
async fn write_message<S>(
    ws_sender: &mut SplitSink<WebSocketStream<S>, Message>,
    msg: &ServerMessage,
) -> bool
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match serde_json::to_string(msg) {
        Ok(json) => {
            if let Err(e) = ws_sender.send(Message::Text(json.into())).await {
                debug!("WebSocket send failed, ending write task: {}", e);
                return false;
            }
        }
        Err(e) => {
            // Continue - don't break on serialization errors
            error!("Failed to serialize message: {}", e);
        }
    }
    true
}

/// Convert a ClientMessage to a ServerCommand
fn client_message_to_command(client_id: ClientId, msg: ClientMessage) -> ServerCommand {
    match msg {
        ClientMessage::Join { username } => ServerCommand::Join { client_id, username },
        ClientMessage::ChatMessage { text } => ServerCommand::Chat { client_id, text },
        ClientMessage::Typing { is_typing } => ServerCommand::Typing {
            client_id,
            is_typing,
        },
        ClientMessage::Leave => ServerCommand::Leave { client_id },
    }
}
