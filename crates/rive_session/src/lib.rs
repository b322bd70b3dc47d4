//! Per-user conversation state.
//!
//! The reply engine keeps no user state of its own: everything a conversation
//! accumulates (variables, the bounded input/reply history, the last matched
//! trigger) lives behind the [`SessionManager`] trait so deployments can swap
//! the storage. The default [`MemorySessionManager`] is an in-process
//! concurrent map.

mod data;
mod memory;

use std::collections::HashMap;

pub use data::{History, UserData, UNDEFINED};
pub use memory::MemorySessionManager;

/// Number of remembered exchanges per user, in addition to the current one.
pub const HISTORY_SIZE: usize = 9;

/// What to do with the frozen snapshot when thawing a user's variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThawAction {
    /// Restore the frozen variables and discard the snapshot.
    Thaw,
    /// Discard the snapshot without restoring anything.
    Discard,
    /// Restore the frozen variables but keep the snapshot for later.
    Keep,
}

/// Storage of user variables, history and match bookkeeping.
///
/// Implementations must serialize mutations per user; concurrent reads are
/// allowed. All methods take `&self` so a store can be shared across the
/// threads serving replies.
pub trait SessionManager: Send + Sync {
    /// Make sure a session exists for `username`.
    fn init(&self, username: &str);

    /// Set (or with `None`, delete) a single user variable.
    fn set(&self, username: &str, name: &str, value: Option<&str>);

    /// Set many user variables at once.
    fn set_vars(&self, username: &str, vars: HashMap<String, String>);

    /// Get a user variable; `None` when unset.
    fn get(&self, username: &str, name: &str) -> Option<String>;

    /// Snapshot a user's full data; `None` for unknown users.
    fn get_user(&self, username: &str) -> Option<UserData>;

    /// Prepend an exchange to the user's history, dropping the oldest.
    fn add_history(&self, username: &str, input: &str, reply: &str);

    /// Copy of the user's history; `None` for unknown users.
    fn get_history(&self, username: &str) -> Option<History>;

    /// Record the pattern text of the last matched trigger (or clear it).
    fn set_last_match(&self, username: &str, pattern: Option<&str>);

    fn get_last_match(&self, username: &str) -> Option<String>;

    /// Drop a single user's session.
    fn clear(&self, username: &str);

    /// Drop every session.
    fn clear_all(&self);

    /// Keep a deep copy of the user's data beside the live one.
    fn freeze(&self, username: &str);

    /// Apply a [`ThawAction`] to a previously frozen user.
    fn thaw(&self, username: &str, action: ThawAction);
}
