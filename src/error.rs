//! Error types for the chat session layer
//!
//! Defines fatal transport errors, non-fatal chat-layer outcomes and
//! per-recipient delivery errors. Uses thiserror for ergonomic error definitions.

use thiserror::Error;

/// Connection-level errors
///
/// All of these terminate the affected connection's handler task only.
#[derive(Debug, Error)]
pub enum AppError {
    /// WebSocket protocol error (fatal)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error (fatal)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send error (fatal - session actor is gone)
    #[error("Channel send error")]
    ChannelSend,
}

/// Chat-layer errors
///
/// Handled entirely inside the session; never propagated as hard failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    /// Username already bound to another live connection
    #[error("Username '{0}' is already taken")]
    DuplicateUsername(String),

    /// Username empty after trimming or too long
    #[error("Invalid username")]
    InvalidUsername,

    /// Chat text empty after trimming or too long
    #[error("Invalid message text")]
    InvalidText,

    /// Chat or typing event from a connection that has not joined
    #[error("Not joined")]
    NotJoined,
}

/// Per-recipient delivery errors
///
/// Occurs when the Hub cannot enqueue an event for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The receiving end of the channel has been closed
    #[error("Channel closed")]
    ChannelClosed,

    /// The outbound queue is full; the recipient is not keeping up
    #[error("Recipient stalled")]
    Stalled,
}
