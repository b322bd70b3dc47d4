//! Default in-process session store.

use std::collections::HashMap;

use dashmap::DashMap;
use tracing::warn;

use crate::{History, SessionManager, ThawAction, UserData};

/// In-memory [`SessionManager`] keyed by username.
///
/// Mutations go through the map's entry locks, which serializes writers per
/// user while leaving other users untouched. Reads hand out clones so no
/// lock is held while the engine evaluates tags.
#[derive(Debug, Default)]
pub struct MemorySessionManager {
    users: DashMap<String, UserData>,
    frozen: DashMap<String, UserData>,
}

impl MemorySessionManager {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionManager for MemorySessionManager {
    fn init(&self, username: &str) {
        self.users.entry(username.to_string()).or_default();
    }

    fn set(&self, username: &str, name: &str, value: Option<&str>) {
        let mut user = self.users.entry(username.to_string()).or_default();
        match value {
            Some(value) => {
                user.vars.insert(name.to_string(), value.to_string());
            }
            None => {
                user.vars.remove(name);
            }
        }
    }

    fn set_vars(&self, username: &str, vars: HashMap<String, String>) {
        let mut user = self.users.entry(username.to_string()).or_default();
        user.vars.extend(vars);
    }

    fn get(&self, username: &str, name: &str) -> Option<String> {
        self.users
            .get(username)
            .and_then(|user| user.vars.get(name).cloned())
    }

    fn get_user(&self, username: &str) -> Option<UserData> {
        self.users.get(username).map(|user| user.value().clone())
    }

    fn add_history(&self, username: &str, input: &str, reply: &str) {
        let mut user = self.users.entry(username.to_string()).or_default();
        user.history.add(input, reply);
    }

    fn get_history(&self, username: &str) -> Option<History> {
        self.users
            .get(username)
            .map(|user| user.value().history.clone())
    }

    fn set_last_match(&self, username: &str, pattern: Option<&str>) {
        let mut user = self.users.entry(username.to_string()).or_default();
        user.last_match = pattern.map(str::to_string);
    }

    fn get_last_match(&self, username: &str) -> Option<String> {
        self.users
            .get(username)
            .and_then(|user| user.last_match.clone())
    }

    fn clear(&self, username: &str) {
        self.users.remove(username);
    }

    fn clear_all(&self) {
        self.users.clear();
        self.frozen.clear();
    }

    fn freeze(&self, username: &str) {
        match self.users.get(username) {
            Some(user) => {
                self.frozen.insert(username.to_string(), user.clone());
            }
            None => warn!("Can't freeze vars for unknown user '{}'", username),
        }
    }

    fn thaw(&self, username: &str, action: ThawAction) {
        match action {
            ThawAction::Thaw => match self.frozen.remove(username) {
                Some((_, data)) => {
                    self.users.insert(username.to_string(), data);
                }
                None => warn!("Can't thaw vars for never-frozen user '{}'", username),
            },
            ThawAction::Keep => match self.frozen.get(username) {
                Some(data) => {
                    self.users
                        .insert(username.to_string(), data.value().clone());
                }
                None => warn!("Can't thaw vars for never-frozen user '{}'", username),
            },
            ThawAction::Discard => {
                self.frozen.remove(username);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_roundtrip() {
        let store = MemorySessionManager::new();
        store.set("alice", "name", Some("Alice"));
        assert_eq!(store.get("alice", "name").as_deref(), Some("Alice"));

        store.set("alice", "name", None);
        assert_eq!(store.get("alice", "name"), None);
    }

    #[test]
    fn init_is_idempotent() {
        let store = MemorySessionManager::new();
        store.set("bob", "mood", Some("fine"));
        store.init("bob");
        assert_eq!(store.get("bob", "mood").as_deref(), Some("fine"));
    }

    #[test]
    fn freeze_thaw_restores_exactly() {
        let store = MemorySessionManager::new();
        store.set("carol", "count", Some("1"));
        store.freeze("carol");

        store.set("carol", "count", Some("99"));
        store.set("carol", "extra", Some("x"));
        store.thaw("carol", ThawAction::Thaw);

        assert_eq!(store.get("carol", "count").as_deref(), Some("1"));
        assert_eq!(store.get("carol", "extra"), None);

        // The snapshot is gone after Thaw.
        store.set("carol", "count", Some("2"));
        store.thaw("carol", ThawAction::Thaw);
        assert_eq!(store.get("carol", "count").as_deref(), Some("2"));
    }

    #[test]
    fn thaw_keep_leaves_the_snapshot() {
        let store = MemorySessionManager::new();
        store.set("dave", "count", Some("1"));
        store.freeze("dave");

        store.set("dave", "count", Some("5"));
        store.thaw("dave", ThawAction::Keep);
        assert_eq!(store.get("dave", "count").as_deref(), Some("1"));

        store.set("dave", "count", Some("7"));
        store.thaw("dave", ThawAction::Keep);
        assert_eq!(store.get("dave", "count").as_deref(), Some("1"));
    }

    #[test]
    fn thaw_discard_drops_the_snapshot() {
        let store = MemorySessionManager::new();
        store.set("erin", "count", Some("1"));
        store.freeze("erin");
        store.set("erin", "count", Some("3"));
        store.thaw("erin", ThawAction::Discard);
        assert_eq!(store.get("erin", "count").as_deref(), Some("3"));
    }

    #[test]
    fn last_match_set_and_cleared() {
        let store = MemorySessionManager::new();
        store.set_last_match("fred", Some("hello bot"));
        assert_eq!(store.get_last_match("fred").as_deref(), Some("hello bot"));
        store.set_last_match("fred", None);
        assert_eq!(store.get_last_match("fred"), None);
    }
}
