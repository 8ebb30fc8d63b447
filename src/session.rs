//! Chat session ownership
//!
//! `ChatSession` is the explicitly constructed room: it spawns the
//! `ChatServer` actor on start and stops it on shutdown. `ChatHandle` is the
//! cloneable front door connection handlers talk to.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::ChatConfig;
use crate::error::AppError;
use crate::message::ServerMessage;
use crate::roster::OnlineUser;
use crate::server::{ChatServer, ServerCommand};
use crate::types::ClientId;

/// Cloneable handle to a running session
#[derive(Debug, Clone)]
pub struct ChatHandle {
    cmd_tx: mpsc::Sender<ServerCommand>,
    client_buffer: usize,
}

impl ChatHandle {
    /// Handle over a bare command channel, with no actor behind it
    #[cfg(test)]
    pub(crate) fn from_sender(cmd_tx: mpsc::Sender<ServerCommand>, client_buffer: usize) -> Self {
        Self {
            cmd_tx,
            client_buffer,
        }
    }

    /// Register a freshly accepted transport link
    ///
    /// Returns the assigned id and the receiving end of its outbound queue.
    pub async fn connect(&self) -> Result<(ClientId, mpsc::Receiver<ServerMessage>), AppError> {
        let client_id = ClientId::new();
        let (sender, receiver) = mpsc::channel(self.client_buffer);
        self.send(ServerCommand::Connect { client_id, sender })
            .await?;
        Ok((client_id, receiver))
    }

    pub async fn send(&self, cmd: ServerCommand) -> Result<(), AppError> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| AppError::ChannelSend)
    }

    /// Who is online right now, in join order
    pub async fn online_users(&self) -> Result<Vec<OnlineUser>, AppError> {
        let (reply, rx) = oneshot::channel();
        self.send(ServerCommand::OnlineUsers { reply }).await?;
        rx.await.map_err(|_| AppError::ChannelSend)
    }
}

/// A running single-room chat session
pub struct ChatSession {
    handle: ChatHandle,
    task: JoinHandle<()>,
}

impl ChatSession {
    /// Spawn the session actor. Must be called inside a tokio runtime.
    pub fn start(config: &ChatConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(config.command_buffer);
        let server = ChatServer::new(cmd_rx, config.typing_debounce);
        let task = tokio::spawn(server.run());
        info!("Chat session started");

        Self {
            handle: ChatHandle {
                cmd_tx,
                client_buffer: config.client_buffer,
            },
            task,
        }
    }

    pub fn handle(&self) -> ChatHandle {
        self.handle.clone()
    }

    /// Close every connection and wait for the actor to exit
    pub async fn shutdown(self) {
        let _ = self.handle.send(ServerCommand::Shutdown).await;
        let _ = self.task.await;
        info!("Chat session stopped");
    }
}
