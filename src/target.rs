//! Reply targets
//!
//! Rooms and users can both receive text; each knows how to wrap it
//! into the raw outbound command.

use std::sync::Arc;

use crate::room::Room;
use crate::user::User;

/// Something text can be sent to
pub trait Sendable {
    /// Build the raw protocol command that delivers `text` here
    fn outgoing(&self, text: &str) -> String;
}

/// A room or a user
#[derive(Debug, Clone)]
pub enum Target {
    Room(Arc<Room>),
    User(Arc<User>),
}

impl Target {
    pub fn name(&self) -> String {
        match self {
            Target::Room(room) => room.name().to_string(),
            Target::User(user) => user.name(),
        }
    }
}

impl Sendable for Target {
    fn outgoing(&self, text: &str) -> String {
        match self {
            Target::Room(room) => room.outgoing(text),
            Target::User(user) => user.outgoing(text),
        }
    }
}
