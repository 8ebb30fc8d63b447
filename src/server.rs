//! ChatServer actor implementation
//!
//! The session lifecycle controller. One task owns the registry, typing
//! tracker and broadcast hub, and processes commands from connection
//! handlers one at a time. That serialization is what keeps every recipient's
//! event stream in the same order and makes username checks race-free.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::ChatError;
use crate::hub::{Event, Hub};
use crate::message::{ChatMessage, RejectReason, ServerMessage};
use crate::registry::Registry;
use crate::roster::{self, OnlineUser};
use crate::typing::{TypingExpired, TypingTracker};
use crate::types::{ChatText, ClientId, Username};

/// Commands sent from handlers to the ChatServer actor
#[derive(Debug)]
pub enum ServerCommand {
    /// Transport link accepted
    Connect {
        client_id: ClientId,
        sender: mpsc::Sender<ServerMessage>,
    },
    /// Request to join under a username
    Join {
        client_id: ClientId,
        username: String,
    },
    /// Chat text from an active connection
    Chat {
        client_id: ClientId,
        text: String,
    },
    /// Typing state change
    Typing {
        client_id: ClientId,
        is_typing: bool,
    },
    /// Explicit leave
    Leave {
        client_id: ClientId,
    },
    /// Transport closed
    Disconnect {
        client_id: ClientId,
    },
    /// Point-in-time roster with join times
    OnlineUsers {
        reply: oneshot::Sender<Vec<OnlineUser>>,
    },
    /// Close every connection and stop the actor
    Shutdown,
}

/// Per-connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionState {
    /// Accepted, not yet joined
    Connecting,
    /// Joined and visible to others
    Active,
    /// Left or dropped (terminal); also any id the server never saw
    Closed,
}

/// The main ChatServer actor
pub struct ChatServer {
    /// Accepted connections that have not joined yet
    pending: HashMap<ClientId, mpsc::Sender<ServerMessage>>,
    /// Joined connections
    registry: Registry,
    typing: TypingTracker,
    hub: Hub,
    /// Command receiver channel
    receiver: mpsc::Receiver<ServerCommand>,
    /// Typing timer expiries
    expiry_rx: mpsc::UnboundedReceiver<TypingExpired>,
}

impl ChatServer {
    /// Create a new ChatServer with the given command receiver
    pub fn new(receiver: mpsc::Receiver<ServerCommand>, typing_debounce: Duration) -> Self {
        let (expiry_tx, expiry_rx) = mpsc::unbounded_channel();
        Self {
            pending: HashMap::new(),
            registry: Registry::new(),
            typing: TypingTracker::new(typing_debounce, expiry_tx),
            hub: Hub::new(),
            receiver,
            expiry_rx,
        }
    }

    /// Run the ChatServer event loop
    ///
    /// Processes commands and typing expiries until shut down or all
    /// command senders are dropped.
    pub async fn run(mut self) {
        info!(
            "ChatServer started (typing debounce {:?})",
            self.typing.debounce()
        );

        loop {
            tokio::select! {
                cmd = self.receiver.recv() => {
                    let Some(cmd) = cmd else { break };
                    if !self.handle_command(cmd) {
                        break;
                    }
                }
                Some(expired) = self.expiry_rx.recv() => {
                    self.handle_typing_expired(expired);
                }
            }
            self.drop_failed_recipients();
        }

        self.close_all();
        info!("ChatServer shutting down");
    }

    pub(crate) fn state_of(&self, client_id: ClientId) -> ConnectionState {
        if self.registry.contains(client_id) {
            ConnectionState::Active
        } else if self.pending.contains_key(&client_id) {
            ConnectionState::Connecting
        } else {
            ConnectionState::Closed
        }
    }

    /// Process a single command. Returns false when the actor should stop.
    fn handle_command(&mut self, cmd: ServerCommand) -> bool {
        match cmd {
            ServerCommand::Connect { client_id, sender } => {
                self.handle_connect(client_id, sender);
            }
            ServerCommand::Join {
                client_id,
                username,
            } => {
                self.handle_join(client_id, &username);
            }
            ServerCommand::Chat { client_id, text } => {
                self.handle_chat(client_id, &text);
            }
            ServerCommand::Typing {
                client_id,
                is_typing,
            } => {
                self.handle_typing(client_id, is_typing);
            }
            ServerCommand::Leave { client_id } => {
                info!("Client {} left", client_id);
                self.close(client_id);
            }
            ServerCommand::Disconnect { client_id } => {
                debug!("Client {} transport closed", client_id);
                self.close(client_id);
            }
            ServerCommand::OnlineUsers { reply } => {
                let _ = reply.send(roster::online_users(&self.registry));
            }
            ServerCommand::Shutdown => return false,
        }
        true
    }

    fn handle_connect(&mut self, client_id: ClientId, sender: mpsc::Sender<ServerMessage>) {
        info!("Client {} connected", client_id);
        self.pending.insert(client_id, sender);
        debug!(
            "Connecting: {}, Active: {}",
            self.pending.len(),
            self.registry.len()
        );
    }

    /// Connecting → Active
    fn handle_join(&mut self, client_id: ClientId, candidate: &str) {
        match self.state_of(client_id) {
            ConnectionState::Connecting => {}
            ConnectionState::Active => {
                debug!("Client {} already joined, ignoring join", client_id);
                return;
            }
            ConnectionState::Closed => return,
        }
        let Some(sender) = self.pending.get(&client_id) else {
            return;
        };

        let username = match Username::parse(candidate) {
            Ok(username) => username,
            Err(e) => {
                debug!("Dropping join from {}: {}", client_id, e);
                return;
            }
        };

        if let Err(e) = self
            .registry
            .register(client_id, username.clone(), sender.clone(), Utc::now())
        {
            warn!("Join rejected for {}: {}", client_id, e);
            if let ChatError::DuplicateUsername(_) = e {
                let _ = sender.try_send(ServerMessage::JoinRejected {
                    reason: RejectReason::DuplicateUsername,
                });
            }
            return;
        }
        self.pending.remove(&client_id);
        info!("Client {} joined as '{}'", client_id, username);

        // Ack first, so the joiner sees `joined` before its own roster entry
        if let Some(conn) = self.registry.get(client_id) {
            self.hub.deliver_to(
                conn,
                ServerMessage::Joined {
                    username: username.to_string(),
                },
            );
        }

        let notice = ChatMessage::notice(format!("{} joined", username), self.hub.stamp());
        self.hub.broadcast(&self.registry, Event::Message(notice));
        self.broadcast_roster();
    }

    fn handle_chat(&mut self, client_id: ClientId, raw: &str) {
        let Some(username) = self.registry.username_of(client_id).cloned() else {
            debug!("Dropping chat from {}: {}", client_id, ChatError::NotJoined);
            return;
        };
        let text = match ChatText::parse(raw) {
            Ok(text) => text,
            Err(e) => {
                debug!("Dropping chat from {}: {}", client_id, e);
                return;
            }
        };

        let was_typing = self.typing.clear(&mut self.registry, client_id);
        let msg = ChatMessage::user(username.to_string(), text.into_inner(), self.hub.stamp());
        self.hub.broadcast(&self.registry, Event::Message(msg));
        if was_typing {
            self.broadcast_typing();
        }
    }

    fn handle_typing(&mut self, client_id: ClientId, is_typing: bool) {
        if !self.typing.set_typing(&mut self.registry, client_id, is_typing) {
            debug!("Dropping typing from {}: {}", client_id, ChatError::NotJoined);
            return;
        }
        self.broadcast_typing();
    }

    fn handle_typing_expired(&mut self, expired: TypingExpired) {
        if self.typing.expire(&mut self.registry, expired) {
            self.broadcast_typing();
        }
    }

    /// Active → Closed (or Connecting → Closed). Safe to call repeatedly.
    fn close(&mut self, client_id: ClientId) {
        if self.pending.remove(&client_id).is_some() {
            debug!("Client {} closed before joining", client_id);
            return;
        }

        self.typing.clear(&mut self.registry, client_id);
        let Some(conn) = self.registry.unregister(client_id) else {
            return;
        };
        let username = conn.username().clone();
        // Dropping the record closes its outbound queue
        drop(conn);
        info!("Client {} ('{}') removed", client_id, username);

        let notice = ChatMessage::notice(format!("{} left", username), self.hub.stamp());
        self.hub.broadcast(&self.registry, Event::Message(notice));
        self.broadcast_roster();
    }

    /// Treat every failed delivery as an implicit disconnect
    fn drop_failed_recipients(&mut self) {
        while let Some(client_id) = self.hub.take_failed() {
            warn!("Disconnecting {} after failed delivery", client_id);
            self.close(client_id);
        }
    }

    fn close_all(&mut self) {
        let closed = self.registry.drain().len() + self.pending.len();
        self.pending.clear();
        info!("Closed {} connection(s)", closed);
    }

    fn broadcast_roster(&mut self) {
        let snapshot = roster::snapshot(&self.registry);
        self.hub.broadcast(&self.registry, Event::Roster(snapshot));
    }

    fn broadcast_typing(&mut self) {
        let snapshot = TypingTracker::snapshot(&self.registry);
        self.hub.broadcast(&self.registry, Event::Typing(snapshot));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageKind;

    const DEBOUNCE: Duration = Duration::from_millis(1000);

    fn server() -> ChatServer {
        let (_tx, rx) = mpsc::channel(8);
        ChatServer::new(rx, DEBOUNCE)
    }

    fn connect(server: &mut ChatServer) -> (ClientId, mpsc::Receiver<ServerMessage>) {
        connect_with_buffer(server, 64)
    }

    fn connect_with_buffer(
        server: &mut ChatServer,
        buffer: usize,
    ) -> (ClientId, mpsc::Receiver<ServerMessage>) {
        let client_id = ClientId::new();
        let (sender, rx) = mpsc::channel(buffer);
        server.handle_command(ServerCommand::Connect { client_id, sender });
        (client_id, rx)
    }

    fn join(server: &mut ChatServer, client_id: ClientId, username: &str) {
        server.handle_command(ServerCommand::Join {
            client_id,
            username: username.to_string(),
        });
        server.drop_failed_recipients();
    }

    fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    fn notices(msgs: &[ServerMessage]) -> Vec<String> {
        msgs.iter()
            .filter_map(|m| match m {
                ServerMessage::Message(msg) if msg.kind == MessageKind::SystemNotice => {
                    Some(msg.text.clone())
                }
                _ => None,
            })
            .collect()
    }

    fn last_roster(msgs: &[ServerMessage]) -> Option<Vec<String>> {
        msgs.iter().rev().find_map(|m| match m {
            ServerMessage::Roster { usernames } => Some(usernames.clone()),
            _ => None,
        })
    }

    #[tokio::test]
    async fn test_join_acks_then_broadcasts_notice_and_roster() {
        let mut server = server();
        let (alice, mut alice_rx) = connect(&mut server);
        assert_eq!(server.state_of(alice), ConnectionState::Connecting);

        join(&mut server, alice, "  alice ");

        assert_eq!(server.state_of(alice), ConnectionState::Active);
        let msgs = drain(&mut alice_rx);
        assert_eq!(
            msgs[0],
            ServerMessage::Joined {
                username: "alice".into()
            }
        );
        assert_eq!(notices(&msgs), vec!["alice joined"]);
        assert_eq!(last_roster(&msgs), Some(vec!["alice".to_string()]));
    }

    #[tokio::test]
    async fn test_second_join_extends_roster_for_everyone() {
        let mut server = server();
        let (alice, mut alice_rx) = connect(&mut server);
        let (bob, mut bob_rx) = connect(&mut server);
        join(&mut server, alice, "alice");
        drain(&mut alice_rx);

        join(&mut server, bob, "bob");

        let expected = Some(vec!["alice".to_string(), "bob".to_string()]);
        let alice_msgs = drain(&mut alice_rx);
        assert_eq!(notices(&alice_msgs), vec!["bob joined"]);
        assert_eq!(last_roster(&alice_msgs), expected);
        assert_eq!(last_roster(&drain(&mut bob_rx)), expected);
    }

    #[tokio::test]
    async fn test_duplicate_username_rejected_and_can_retry() {
        let mut server = server();
        let (alice, mut alice_rx) = connect(&mut server);
        let (other, mut other_rx) = connect(&mut server);
        join(&mut server, alice, "alice");
        drain(&mut alice_rx);

        join(&mut server, other, "alice");

        assert_eq!(
            drain(&mut other_rx),
            vec![ServerMessage::JoinRejected {
                reason: RejectReason::DuplicateUsername
            }]
        );
        assert_eq!(server.state_of(other), ConnectionState::Connecting);
        assert!(drain(&mut alice_rx).is_empty());
        assert_eq!(roster::snapshot(&server.registry), vec!["alice"]);

        join(&mut server, other, "alice2");
        assert_eq!(server.state_of(other), ConnectionState::Active);
    }

    #[tokio::test]
    async fn test_invalid_username_dropped_silently() {
        let mut server = server();
        let (client, mut rx) = connect(&mut server);

        join(&mut server, client, "   ");
        join(&mut server, client, &"x".repeat(31));

        assert!(drain(&mut rx).is_empty());
        assert_eq!(server.state_of(client), ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn test_rejoin_while_active_is_ignored() {
        let mut server = server();
        let (alice, mut rx) = connect(&mut server);
        join(&mut server, alice, "alice");
        drain(&mut rx);

        join(&mut server, alice, "mallory");

        assert!(drain(&mut rx).is_empty());
        assert_eq!(roster::snapshot(&server.registry), vec!["alice"]);
    }

    #[tokio::test]
    async fn test_chat_reaches_everyone_including_author() {
        let mut server = server();
        let (alice, mut alice_rx) = connect(&mut server);
        let (bob, mut bob_rx) = connect(&mut server);
        join(&mut server, alice, "alice");
        join(&mut server, bob, "bob");
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        server.handle_command(ServerCommand::Chat {
            client_id: alice,
            text: " hi ".into(),
        });

        for rx in [&mut alice_rx, &mut bob_rx] {
            let msgs = drain(rx);
            assert_eq!(msgs.len(), 1);
            let ServerMessage::Message(msg) = &msgs[0] else {
                panic!("expected message, got {:?}", msgs[0]);
            };
            assert_eq!(msg.kind, MessageKind::UserMessage);
            assert_eq!(msg.username.as_deref(), Some("alice"));
            assert_eq!(msg.text, "hi");
        }
    }

    #[tokio::test]
    async fn test_invalid_or_unjoined_chat_is_dropped() {
        let mut server = server();
        let (alice, mut alice_rx) = connect(&mut server);
        let (lurker, _lurker_rx) = connect(&mut server);
        join(&mut server, alice, "alice");
        drain(&mut alice_rx);

        server.handle_command(ServerCommand::Chat {
            client_id: alice,
            text: "   ".into(),
        });
        server.handle_command(ServerCommand::Chat {
            client_id: alice,
            text: "x".repeat(501),
        });
        server.handle_command(ServerCommand::Chat {
            client_id: lurker,
            text: "hello?".into(),
        });
        server.handle_command(ServerCommand::Typing {
            client_id: lurker,
            is_typing: true,
        });

        assert!(drain(&mut alice_rx).is_empty());
    }

    #[tokio::test]
    async fn test_typing_broadcasts_full_set() {
        let mut server = server();
        let (alice, mut alice_rx) = connect(&mut server);
        let (bob, _bob_rx) = connect(&mut server);
        join(&mut server, alice, "alice");
        join(&mut server, bob, "bob");
        drain(&mut alice_rx);

        server.handle_command(ServerCommand::Typing {
            client_id: bob,
            is_typing: true,
        });
        server.handle_command(ServerCommand::Typing {
            client_id: alice,
            is_typing: true,
        });
        server.handle_command(ServerCommand::Typing {
            client_id: bob,
            is_typing: false,
        });

        assert_eq!(
            drain(&mut alice_rx),
            vec![
                ServerMessage::Typing {
                    usernames: vec!["bob".into()]
                },
                ServerMessage::Typing {
                    usernames: vec!["alice".into(), "bob".into()]
                },
                ServerMessage::Typing {
                    usernames: vec!["alice".into()]
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_chat_clears_author_typing() {
        let mut server = server();
        let (alice, mut alice_rx) = connect(&mut server);
        join(&mut server, alice, "alice");
        server.handle_command(ServerCommand::Typing {
            client_id: alice,
            is_typing: true,
        });
        drain(&mut alice_rx);

        server.handle_command(ServerCommand::Chat {
            client_id: alice,
            text: "done".into(),
        });

        let msgs = drain(&mut alice_rx);
        assert_eq!(msgs.len(), 2);
        assert!(matches!(msgs[0], ServerMessage::Message(_)));
        assert_eq!(msgs[1], ServerMessage::Typing { usernames: vec![] });
    }

    #[tokio::test]
    async fn test_leave_and_disconnect_produce_one_notice() {
        let mut server = server();
        let (alice, mut alice_rx) = connect(&mut server);
        let (bob, _bob_rx) = connect(&mut server);
        join(&mut server, alice, "alice");
        join(&mut server, bob, "bob");
        drain(&mut alice_rx);

        server.handle_command(ServerCommand::Leave { client_id: bob });
        server.handle_command(ServerCommand::Disconnect { client_id: bob });

        let msgs = drain(&mut alice_rx);
        assert_eq!(notices(&msgs), vec!["bob left"]);
        assert_eq!(last_roster(&msgs), Some(vec!["alice".to_string()]));
        assert_eq!(server.state_of(bob), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_closed_connection_ignores_events() {
        let mut server = server();
        let (alice, mut alice_rx) = connect(&mut server);
        let (bob, _bob_rx) = connect(&mut server);
        join(&mut server, alice, "alice");
        join(&mut server, bob, "bob");
        server.handle_command(ServerCommand::Leave { client_id: bob });
        drain(&mut alice_rx);

        join(&mut server, bob, "bob");
        server.handle_command(ServerCommand::Chat {
            client_id: bob,
            text: "ghost".into(),
        });

        assert!(drain(&mut alice_rx).is_empty());
        assert_eq!(server.state_of(bob), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_leave_closes_outbound_queue() {
        let mut server = server();
        let (alice, mut alice_rx) = connect(&mut server);
        join(&mut server, alice, "alice");
        drain(&mut alice_rx);

        server.handle_command(ServerCommand::Leave { client_id: alice });

        assert_eq!(alice_rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_disconnect_before_join_is_silent() {
        let mut server = server();
        let (alice, mut alice_rx) = connect(&mut server);
        let (lurker, _lurker_rx) = connect(&mut server);
        join(&mut server, alice, "alice");
        drain(&mut alice_rx);

        server.handle_command(ServerCommand::Disconnect { client_id: lurker });

        assert!(drain(&mut alice_rx).is_empty());
        assert_eq!(server.state_of(lurker), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_failed_delivery_disconnects_recipient() {
        let mut server = server();
        let (alice, mut alice_rx) = connect(&mut server);
        let (bob, bob_rx) = connect(&mut server);
        join(&mut server, alice, "alice");
        join(&mut server, bob, "bob");
        drain(&mut alice_rx);
        drop(bob_rx);

        server.handle_command(ServerCommand::Chat {
            client_id: alice,
            text: "anyone?".into(),
        });
        server.drop_failed_recipients();

        let msgs = drain(&mut alice_rx);
        assert_eq!(notices(&msgs), vec!["bob left"]);
        assert_eq!(last_roster(&msgs), Some(vec!["alice".to_string()]));
        assert_eq!(server.state_of(bob), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_stalled_recipient_is_disconnected() {
        let mut server = server();
        let (alice, mut alice_rx) = connect(&mut server);
        let (slow, _slow_rx) = connect_with_buffer(&mut server, 3);
        join(&mut server, alice, "alice");
        // joined + notice + roster fill the queue exactly
        join(&mut server, slow, "slow");
        drain(&mut alice_rx);

        server.handle_command(ServerCommand::Chat {
            client_id: alice,
            text: "hi".into(),
        });
        server.drop_failed_recipients();

        assert_eq!(server.state_of(slow), ConnectionState::Closed);
        assert_eq!(notices(&drain(&mut alice_rx)), vec!["slow left"]);
    }

    #[tokio::test]
    async fn test_online_users_query() {
        let mut server = server();
        let (alice, _alice_rx) = connect(&mut server);
        join(&mut server, alice, "alice");

        let (reply, rx) = oneshot::channel();
        server.handle_command(ServerCommand::OnlineUsers { reply });

        let users = rx.await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].username, "alice");
    }

    #[tokio::test]
    async fn test_name_reappears_only_after_leave_notice() {
        let mut server = server();
        let (watcher, mut watcher_rx) = connect(&mut server);
        let (first, _first_rx) = connect(&mut server);
        let (second, _second_rx) = connect(&mut server);
        join(&mut server, watcher, "watcher");
        join(&mut server, first, "alice");
        drain(&mut watcher_rx);

        server.handle_command(ServerCommand::Disconnect { client_id: first });
        join(&mut server, second, "alice");

        let msgs = drain(&mut watcher_rx);
        assert_eq!(notices(&msgs), vec!["alice left", "alice joined"]);
        let rosters: Vec<Vec<String>> = msgs
            .iter()
            .filter_map(|m| match m {
                ServerMessage::Roster { usernames } => Some(usernames.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(
            rosters,
            vec![
                vec!["watcher".to_string()],
                vec!["watcher".to_string(), "alice".to_string()]
            ]
        );
    }
}
