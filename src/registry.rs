//! Connection registry
//!
//! Sole owner of joined `Connection` records, kept in registration order.

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::connection::Connection;
use crate::error::ChatError;
use crate::message::ServerMessage;
use crate::types::{ClientId, Username};

/// Joined connections in registration order
///
/// Linear scans are fine here: a room holds tens of connections, not thousands.
#[derive(Debug, Default)]
pub struct Registry {
    connections: Vec<Connection>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `username` to `client_id` and append the connection
    ///
    /// Fails with `DuplicateUsername` if another live connection already holds
    /// the exact same name; the registry is left untouched in that case.
    pub fn register(
        &mut self,
        client_id: ClientId,
        username: Username,
        sender: mpsc::Sender<ServerMessage>,
        joined_at: DateTime<Utc>,
    ) -> Result<&Connection, ChatError> {
        if self
            .connections
            .iter()
            .any(|c| c.id != client_id && c.username() == &username)
        {
            return Err(ChatError::DuplicateUsername(username.to_string()));
        }
        if let Some(pos) = self.position(client_id) {
            // Already bound; the username never changes after join.
            return Ok(&self.connections[pos]);
        }

        self.connections
            .push(Connection::new(client_id, username, sender, joined_at));
        Ok(&self.connections[self.connections.len() - 1])
    }

    /// Remove a connection, returning it if it was present
    ///
    /// Idempotent: a second call for the same id is a no-op.
    pub fn unregister(&mut self, client_id: ClientId) -> Option<Connection> {
        self.position(client_id)
            .map(|pos| self.connections.remove(pos))
    }

    pub fn username_of(&self, client_id: ClientId) -> Option<&Username> {
        self.get(client_id).map(Connection::username)
    }

    pub fn contains(&self, client_id: ClientId) -> bool {
        self.position(client_id).is_some()
    }

    pub fn get(&self, client_id: ClientId) -> Option<&Connection> {
        self.connections.iter().find(|c| c.id == client_id)
    }

    pub fn get_mut(&mut self, client_id: ClientId) -> Option<&mut Connection> {
        self.connections.iter_mut().find(|c| c.id == client_id)
    }

    /// All connections, in registration order
    pub fn all(&self) -> impl Iterator<Item = &Connection> {
        self.connections.iter()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Remove every connection, dropping their outbound queues
    pub fn drain(&mut self) -> Vec<Connection> {
        std::mem::take(&mut self.connections)
    }

    fn position(&self, client_id: ClientId) -> Option<usize> {
        self.connections.iter().position(|c| c.id == client_id)
    }
}
