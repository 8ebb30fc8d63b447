//! Broadcast hub
//!
//! Fans each accepted event out to every registered connection, in registry
//! order. Delivery is best-effort and non-blocking; recipients that fail are
//! remembered so the session can disconnect them once the fan-out is done.

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::connection::Connection;
use crate::message::{ChatMessage, ServerMessage};
use crate::registry::Registry;
use crate::types::ClientId;

/// Broadcastable events
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Message(ChatMessage),
    Roster(Vec<String>),
    Typing(Vec<String>),
}

impl From<Event> for ServerMessage {
    fn from(event: Event) -> Self {
        match event {
            Event::Message(msg) => ServerMessage::Message(msg),
            Event::Roster(usernames) => ServerMessage::Roster { usernames },
            Event::Typing(usernames) => ServerMessage::Typing { usernames },
        }
    }
}

#[derive(Debug)]
pub struct Hub {
    last_timestamp: DateTime<Utc>,
    /// Recipients whose delivery failed and that still await cleanup
    failed: Vec<ClientId>,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Hub {
    pub fn new() -> Self {
        Self {
            last_timestamp: DateTime::<Utc>::MIN_UTC,
            failed: Vec::new(),
        }
    }

    /// Acceptance timestamp for a new message
    ///
    /// Never goes backwards, even if the wall clock does.
    pub fn stamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        if now > self.last_timestamp {
            self.last_timestamp = now;
        }
        self.last_timestamp
    }

    /// Deliver `event` to every registered connection
    ///
    /// Connections that already failed are skipped so their stream never
    /// shows a gap followed by later events.
    pub fn broadcast(&mut self, registry: &Registry, event: Event) {
        let msg = ServerMessage::from(event);
        for conn in registry.all() {
            if self.failed.contains(&conn.id) {
                continue;
            }
            if let Err(e) = conn.deliver(msg.clone()) {
                warn!("Delivery to {} failed: {}", conn.id, e);
                self.failed.push(conn.id);
            }
        }
    }

    /// Deliver to a single connection, recording a failure like `broadcast`
    pub fn deliver_to(&mut self, conn: &Connection, msg: ServerMessage) {
        if self.failed.contains(&conn.id) {
            return;
        }
        if let Err(e) = conn.deliver(msg) {
            warn!("Delivery to {} failed: {}", conn.id, e);
            self.failed.push(conn.id);
        }
    }

    /// Next recipient awaiting disconnect after a failed delivery
    pub fn take_failed(&mut self) -> Option<ClientId> {
        if self.failed.is_empty() {
            None
        } else {
            Some(self.failed.remove(0))
        }
    }

    #[cfg(test)]
    fn has_failed(&self, client_id: ClientId) -> bool {
        self.failed.contains(&client_id)
    }
}
