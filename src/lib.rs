//! Real-time Chat Session Library
//!
//! A single-room WebSocket chat layer built with tokio-tungstenite
//! using the Actor pattern for state management.
//!
//! # Features
//! - WebSocket connection handling
//! - Join with a unique username
//! - Online roster broadcast on every join/leave
//! - Chat messages and system notices fanned out in one global order
//! - Typing indicators with a server-side debounce window
//! - Idempotent leave/disconnect handling
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `ChatServer` is the central actor owning the registry, typing tracker and hub
//! - Each connection has a `handler` task communicating with the server
//! - No locks needed - all state access goes through message passing
//!
//! # Example
//! ```ignore
//! use tokio::net::TcpListener;
//! use chat_session::{serve, ChatConfig, ChatSession};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ChatConfig::default();
//!     let listener = TcpListener::bind(&config.addr).await.unwrap();
//!     let session = ChatSession::start(&config);
//!
//!     serve(listener, session.handle(), async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await
//!     .unwrap();
//!
//!     session.shutdown().await;
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod hub;
pub mod message;
pub mod registry;
pub mod roster;
pub mod server;
pub mod session;
pub mod typing;
pub mod types;

// Re-export main types for convenience
pub use config::{Args, ChatConfig};
pub use connection::Connection;
pub use error::{AppError, ChatError, DeliveryError};
pub use handler::{handle_connection, serve};
pub use message::{ChatMessage, ClientMessage, MessageKind, RejectReason, ServerMessage};
pub use registry::Registry;
pub use roster::OnlineUser;
pub use server::{ChatServer, ServerCommand};
pub use session::{ChatHandle, ChatSession};
pub use typing::TypingTracker;
pub use types::{ChatText, ClientId, Username};
