//! Room struct definition
//!
//! Represents a chat room and its membership as seen by the bot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::target::Sendable;
use crate::types::{Auth, UserKey};
use crate::user::User;

#[derive(Debug, Clone)]
struct Member {
    user: Arc<User>,
    auth: Auth,
}

/// Chat room
///
/// Membership maps each present user to their authority code. It is only
/// written by `add_user`/`remove_user`, driven by join, leave, rename and
/// user-list events.
#[derive(Debug)]
pub struct Room {
    /// Room name (never changes)
    name: String,
    members: Mutex<HashMap<UserKey, Member>>,
    /// Whether the bot is in the room
    joined: AtomicBool,
}

impl Room {
    /// Create a new room with the given name
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            members: Mutex::new(HashMap::new()),
            joined: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_joined(&self) -> bool {
        self.joined.load(Ordering::SeqCst)
    }

    pub(crate) fn set_joined(&self, joined: bool) {
        self.joined.store(joined, Ordering::SeqCst);
    }

    /// Check if a user is in the room
    pub fn has_user(&self, user: &User) -> bool {
        self.members.lock().contains_key(&user.key())
    }

    /// Authority code of a user, `None` if they are not in the room
    pub fn auth(&self, user: &User) -> Option<Auth> {
        self.members.lock().get(&user.key()).map(|m| m.auth)
    }

    /// All members, in no particular order
    pub fn users(&self) -> Vec<Arc<User>> {
        self.members
            .lock()
            .values()
            .map(|m| Arc::clone(&m.user))
            .collect()
    }

    /// Members as `auth + name` strings, the way the server lists them
    pub fn user_array(&self) -> Vec<String> {
        self.members
            .lock()
            .values()
            .map(|m| format!("{}{}", m.auth, m.user.name()))
            .collect()
    }

    /// Members holding exactly the given authority
    pub fn users_with(&self, auth: Auth) -> Vec<Arc<User>> {
        self.members
            .lock()
            .values()
            .filter(|m| m.auth == auth)
            .map(|m| Arc::clone(&m.user))
            .collect()
    }

    pub fn admins(&self) -> Vec<Arc<User>> {
        self.users_with(Auth::Administrator)
    }

    pub fn owners(&self) -> Vec<Arc<User>> {
        self.users_with(Auth::RoomOwner)
    }

    pub fn moderators(&self) -> Vec<Arc<User>> {
        self.users_with(Auth::Moderator)
    }

    pub fn drivers(&self) -> Vec<Arc<User>> {
        self.users_with(Auth::Driver)
    }

    pub fn voiced(&self) -> Vec<Arc<User>> {
        self.users_with(Auth::Voiced)
    }

    pub fn user_count(&self) -> usize {
        self.members.lock().len()
    }

    /// Add a user (or update their authority)
    pub(crate) fn add_user(&self, user: Arc<User>, auth: Auth) {
        self.members.lock().insert(user.key(), Member { user, auth });
    }

    /// Remove a user, returning their authority if they were present
    pub(crate) fn remove_user(&self, user: &User) -> Option<Auth> {
        self.members.lock().remove(&user.key()).map(|m| m.auth)
    }

    pub(crate) fn clear_users(&self) {
        self.members.lock().clear();
    }

    /// Raw command that sets modchat in this room
    pub fn modchat_command(&self, level: &str) -> String {
        self.outgoing(&format!("/modchat {}", level))
    }
}

impl Sendable for Room {
    fn outgoing(&self, text: &str) -> String {
        format!("{}|{}", self.name, text)
    }
}

impl std::fmt::Display for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}
