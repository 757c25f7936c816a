//! Entity registries
//!
//! Memoizing caches for users and rooms. Lookups create on miss, and at
//! most one entity object ever exists per key.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::trace;

use crate::room::Room;
use crate::types::sanitize;
use crate::user::User;

/// Every user the bot knows about, keyed by identity
///
/// The bot's own user is held separately and returned for its identity,
/// so the session and the registry always agree on who "we" are.
#[derive(Debug)]
pub struct UserList {
    own: Arc<User>,
    // A plain RwLock rather than a sharded map: a rename touches two keys
    // and must look atomic to readers.
    cache: RwLock<HashMap<String, Arc<User>>>,
}

impl UserList {
    pub fn new(own: Arc<User>) -> Self {
        Self {
            own,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// The bot's own user
    pub fn own(&self) -> &Arc<User> {
        &self.own
    }

    pub fn is_own(&self, user: &User) -> bool {
        user.key() == self.own.key()
    }

    /// Find a user by display name or identity, creating it if unknown
    pub fn find_ensured(&self, name: &str) -> Arc<User> {
        let id = sanitize(name);
        if let Some(user) = self.lookup(&self.cache.read(), &id) {
            return user;
        }

        let mut cache = self.cache.write();
        if let Some(user) = self.lookup(&cache, &id) {
            return user;
        }
        trace!("New user '{}'", name);
        let user = Arc::new(User::new(name));
        cache.insert(id, Arc::clone(&user));
        user
    }

    /// Find a user by display name or identity
    pub fn find(&self, name: &str) -> Option<Arc<User>> {
        self.lookup(&self.cache.read(), &sanitize(name))
    }

    // Callers hold the cache lock, so the own identity can't change under us
    fn lookup(&self, cache: &HashMap<String, Arc<User>>, id: &str) -> Option<Arc<User>> {
        if id == self.own.id() {
            return Some(Arc::clone(&self.own));
        }
        cache.get(id).cloned()
    }

    /// Rename a user and rebind it from its previous identity to the new
    /// one. Lookups never see the new name without the new binding.
    pub fn rename(&self, user: &Arc<User>, new_name: &str) {
        let mut cache = self.cache.write();
        user.rename(new_name);

        if let Some(last_id) = user.last_id() {
            if cache.get(&last_id).is_some_and(|u| u.key() == user.key()) {
                cache.remove(&last_id);
            }
        }
        if !self.is_own(user) {
            cache.insert(user.id(), Arc::clone(user));
        }
    }

    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Every room the bot knows about, keyed by name
#[derive(Debug, Default)]
pub struct RoomList {
    cache: DashMap<String, Arc<Room>>,
}

impl RoomList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Find a room, creating it if unknown
    pub fn find_ensured(&self, name: &str) -> Arc<Room> {
        if let Some(room) = self.cache.get(name) {
            return Arc::clone(room.value());
        }
        Arc::clone(
            self.cache
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Room::new(name)))
                .value(),
        )
    }

    pub fn find(&self, name: &str) -> Option<Arc<Room>> {
        self.cache.get(name).map(|r| Arc::clone(r.value()))
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
