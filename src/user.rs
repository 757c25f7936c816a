//! User struct definition
//!
//! Represents a user known to the session, tracked by identity.

use parking_lot::RwLock;

use crate::target::Sendable;
use crate::types::{sanitize, UserKey};

#[derive(Debug, Clone)]
struct Names {
    name: String,
    id: String,
    last_name: Option<String>,
    last_id: Option<String>,
}

/// A user seen on the server
///
/// Users are shared as `Arc<User>`; the same object is handed out for
/// the same identity for the lifetime of the process, and a rename
/// mutates it in place.
#[derive(Debug)]
pub struct User {
    /// Stable key, unaffected by renames
    key: UserKey,
    names: RwLock<Names>,
}

impl User {
    /// Create a new user with the given display name
    pub fn new(name: &str) -> Self {
        Self {
            key: UserKey::new(),
            names: RwLock::new(Names {
                name: name.to_string(),
                id: sanitize(name),
                last_name: None,
                last_id: None,
            }),
        }
    }

    pub fn key(&self) -> UserKey {
        self.key
    }

    /// Current display name
    pub fn name(&self) -> String {
        self.names.read().name.clone()
    }

    /// Current identity
    pub fn id(&self) -> String {
        self.names.read().id.clone()
    }

    pub fn last_name(&self) -> Option<String> {
        self.names.read().last_name.clone()
    }

    pub fn last_id(&self) -> Option<String> {
        self.names.read().last_id.clone()
    }

    /// Change the display name, remembering the previous one.
    ///
    /// Only called through `UserList::rename`, which rebinds the identity
    /// under the same lock.
    pub(crate) fn rename(&self, new_name: &str) {
        let mut names = self.names.write();
        let old_name = std::mem::replace(&mut names.name, new_name.to_string());
        let old_id = std::mem::replace(&mut names.id, sanitize(new_name));
        names.last_name = Some(old_name);
        names.last_id = Some(old_id);
    }
}

impl Sendable for User {
    fn outgoing(&self, text: &str) -> String {
        format!("|/pm {}, {}", self.id(), text)
    }
}

impl std::fmt::Display for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_creation() {
        let user = User::new("Shy Imouto");

        assert_eq!(user.name(), "Shy Imouto");
        assert_eq!(user.id(), "shyimouto");
        assert!(user.last_name().is_none());
        assert!(user.last_id().is_none());
    }

    #[test]
    fn test_user_rename() {
        let user = User::new("Alice");
        let key = user.key();

        user.rename("Alice Two");

        assert_eq!(user.name(), "Alice Two");
        assert_eq!(user.id(), "alicetwo");
        assert_eq!(user.last_name().as_deref(), Some("Alice"));
        assert_eq!(user.last_id().as_deref(), Some("alice"));
        assert_eq!(user.key(), key);
    }

    #[test]
    fn test_user_outgoing_is_pm() {
        let user = User::new("Scott EH");
        assert_eq!(user.outgoing("party animal"), "|/pm scotteh, party animal");
    }
}
