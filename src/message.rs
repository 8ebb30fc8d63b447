//! Message protocol definitions
//!
//! JSON-based bidirectional message protocol using Serde's tagged enum
//! for type-safe serialization/deserialization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Client → Server message
///
/// All messages from client to server. Uses tagged enum with snake_case naming.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Request to join the room under a username
    Join { username: String },
    /// Send a chat message
    ChatMessage { text: String },
    /// Typing state changed
    Typing { is_typing: bool },
    /// Leave the room
    Leave,
}

/// Server → Client message
///
/// All messages from server to client. Uses tagged enum with snake_case naming.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Transport accepted, connection ID issued
    Connected { client_id: String },
    /// Join acknowledged
    Joined { username: String },
    /// Join refused; client should retry with another name
    JoinRejected { reason: RejectReason },
    /// Chat message or system notice
    Message(ChatMessage),
    /// Full list of online usernames, in join order
    Roster { usernames: Vec<String> },
    /// Full set of usernames currently typing
    Typing { usernames: Vec<String> },
}

/// Why a join request was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectReason {
    DuplicateUsername,
}

/// Kind of a broadcast chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    UserMessage,
    SystemNotice,
}

/// Immutable broadcast unit
///
/// Created when the Hub accepts the event and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub kind: MessageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// A message authored by a user
    pub fn user(username: String, text: String, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: MessageKind::UserMessage,
            username: Some(username),
            text,
            timestamp,
        }
    }

    /// A server-generated notice with no author
    pub fn notice(text: String, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: MessageKind::SystemNotice,
            username: None,
            text,
            timestamp,
        }
    }
}
