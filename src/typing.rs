//! Typing tracker
//!
//! Per-connection typing flags with a server-side debounce window. This is
//! the only time-driven state in the session: each `typing = true` arms a
//! timer task that reports back to the session actor when it elapses.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::registry::Registry;
use crate::types::ClientId;

/// Sent to the session actor when a typing timer elapses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypingExpired {
    pub client_id: ClientId,
    pub generation: u64,
}

/// Handle to a pending typing expiry
///
/// Aborts the timer task when dropped, so replacing or clearing it disarms.
#[derive(Debug)]
pub struct TypingTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

impl Drop for TypingTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Arms, re-arms and expires typing flags stored on registry connections
#[derive(Debug)]
pub struct TypingTracker {
    debounce: Duration,
    expiry_tx: mpsc::UnboundedSender<TypingExpired>,
    next_generation: u64,
}

impl TypingTracker {
    pub fn new(debounce: Duration, expiry_tx: mpsc::UnboundedSender<TypingExpired>) -> Self {
        Self {
            debounce,
            expiry_tx,
            next_generation: 0,
        }
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Update a connection's typing flag
    ///
    /// `true` (re-)arms the debounce timer; `false` disarms it. Returns false
    /// if the connection is not registered.
    pub fn set_typing(&mut self, registry: &mut Registry, client_id: ClientId, is_typing: bool) -> bool {
        let Some(conn) = registry.get_mut(client_id) else {
            return false;
        };

        conn.is_typing = is_typing;
        conn.typing_timer = if is_typing {
            Some(self.arm(client_id))
        } else {
            None
        };
        true
    }

    /// Apply a timer expiry
    ///
    /// Returns true if the flag was cleared and a typing change should be
    /// broadcast. Stale expiries (re-armed, cleared, or unknown connection)
    /// are ignored.
    pub fn expire(&mut self, registry: &mut Registry, expired: TypingExpired) -> bool {
        let Some(conn) = registry.get_mut(expired.client_id) else {
            return false;
        };
        match &conn.typing_timer {
            Some(timer) if timer.generation == expired.generation => {}
            _ => return false,
        }

        debug!("Typing expired for {}", expired.client_id);
        conn.typing_timer = None;
        conn.is_typing = false;
        true
    }

    /// Disarm and reset a connection's typing state without emitting anything
    ///
    /// Returns whether the connection was flagged as typing.
    pub fn clear(&mut self, registry: &mut Registry, client_id: ClientId) -> bool {
        let Some(conn) = registry.get_mut(client_id) else {
            return false;
        };
        conn.typing_timer = None;
        std::mem::replace(&mut conn.is_typing, false)
    }

    /// Usernames currently typing, in registration order
    pub fn snapshot(registry: &Registry) -> Vec<String> {
        registry
            .all()
            .filter(|c| c.is_typing())
            .map(|c| c.username().to_string())
            .collect()
    }

    fn arm(&mut self, client_id: ClientId) -> TypingTimer {
        self.next_generation += 1;
        let generation = self.next_generation;
        let debounce = self.debounce;
        let tx = self.expiry_tx.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            let _ = tx.send(TypingExpired {
                client_id,
                generation,
            });
        });

        TypingTimer { generation, handle }
    }
}
