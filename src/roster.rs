//! Presence roster
//!
//! A derived view over the registry: who is online, in join order.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::registry::Registry;

/// Distinct online usernames in registration order
pub fn snapshot(registry: &Registry) -> Vec<String> {
    let mut usernames: Vec<String> = Vec::with_capacity(registry.len());
    for conn in registry.all() {
        let name = conn.username().as_str();
        if !usernames.iter().any(|u| u == name) {
            usernames.push(name.to_string());
        }
    }
    usernames
}

/// Online user with join time, for "who is online" queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OnlineUser {
    pub username: String,
    pub joined_at: DateTime<Utc>,
}

/// Like `snapshot`, keeping the first join time of each name
pub fn online_users(registry: &Registry) -> Vec<OnlineUser> {
    let mut users: Vec<OnlineUser> = Vec::with_capacity(registry.len());
    for conn in registry.all() {
        let name = conn.username().as_str();
        if !users.iter().any(|u| u.username == name) {
            users.push(OnlineUser {
                username: name.to_string(),
                joined_at: conn.joined_at,
            });
        }
    }
    users
}
