//! Connection record
//!
//! Represents one joined client with its state and outbound channel.

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::DeliveryError;
use crate::message::ServerMessage;
use crate::typing::TypingTimer;
use crate::types::{ClientId, Username};

/// Live, joined client connection
///
/// Holds the connection's identity, bound username, outbound queue
/// and typing state. Dropping it releases any pending typing timer.
#[derive(Debug)]
pub struct Connection {
    /// Unique identifier for this connection
    pub id: ClientId,
    /// Username bound at join, immutable afterwards
    username: Username,
    /// When the join was accepted
    pub joined_at: DateTime<Utc>,
    /// Server → Client message channel
    sender: mpsc::Sender<ServerMessage>,
    /// Currently typing flag
    pub(crate) is_typing: bool,
    /// Pending typing expiry, owned by this connection only
    pub(crate) typing_timer: Option<TypingTimer>,
}

impl Connection {
    pub fn new(
        id: ClientId,
        username: Username,
        sender: mpsc::Sender<ServerMessage>,
        joined_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            username,
            joined_at,
            sender,
            is_typing: false,
            typing_timer: None,
        }
    }

    pub fn username(&self) -> &Username {
        &self.username
    }

    pub fn is_typing(&self) -> bool {
        self.is_typing
    }

    /// Enqueue a message for this connection without waiting
    ///
    /// A full queue means the recipient has stalled; it is reported rather
    /// than awaited so one slow socket cannot hold up the others.
    pub fn deliver(&self, msg: ServerMessage) -> Result<(), DeliveryError> {
        self.sender.try_send(msg).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Stalled,
            TrySendError::Closed(_) => DeliveryError::ChannelClosed,
        })
    }
}
