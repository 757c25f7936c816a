//! Wire protocol parsing
//!
//! Inbound data arrives as frames of newline-separated lines. A frame may
//! start with a `>ROOM` line, which applies to every line after it:
//!
//! ```text
//! >techcode
//! |users|3,#RO,@MOD,+VO
//! |:|1700000000
//! |c:|1700000001|+VO|ok
//! ```
//!
//! Each remaining `|COMMAND|PARAM|PARAM...` line is parsed independently
//! into a `Message`, resolving users and rooms through the registries.
//! Malformed lines degrade to absent fields; they never fail.

use std::sync::Arc;

use crate::event::Event;
use crate::registry::{RoomList, UserList};
use crate::room::Room;
use crate::target::Target;
use crate::types::{sanitize, split_auth, Auth};
use crate::user::User;

const ROOM_MARKER: char = '>';
const SEPARATOR: char = '|';

/// Command value for lines that carry no `|COMMAND|` field
pub const NO_COMMAND: &str = "none";

/// One protocol line together with the room prefix of its frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub room: Option<String>,
    pub line: String,
}

impl RawFrame {
    /// Split inbound data into per-line frames, dropping empty lines
    pub fn split(data: &str) -> Vec<RawFrame> {
        let mut lines = data.split('\n').peekable();
        let room = match lines.peek() {
            Some(first) if first.starts_with(ROOM_MARKER) => lines
                .next()
                .map(|l| l[ROOM_MARKER.len_utf8()..].trim_end_matches('\r').to_string())
                .filter(|name| !name.is_empty()),
            _ => None,
        };

        lines
            .map(|l| l.trim_end_matches('\r'))
            .filter(|l| !l.is_empty())
            .map(|line| RawFrame {
                room: room.clone(),
                line: line.to_string(),
            })
            .collect()
    }

    /// The line as the server sent it, room prefix included
    pub fn raw(&self) -> String {
        match &self.room {
            Some(room) => format!("{}{}\n{}", ROOM_MARKER, room, self.line),
            None => self.line.clone(),
        }
    }
}

/// A parsed inbound line
#[derive(Debug, Clone)]
pub struct Message {
    /// Original text, room prefix included
    pub raw: String,
    /// Lowercased protocol verb, or `none`
    pub command: String,
    /// Fields following the command
    pub params: Vec<String>,
    /// Server time, for commands containing `:`
    pub timestamp: Option<i64>,
    pub room: Option<Arc<Room>>,
    /// The acting user
    pub user: Option<Arc<User>>,
    /// The acting user's authority code
    pub auth: Option<Auth>,
    /// The acting user's display name as sent
    pub nick: Option<String>,
    /// Where a reply should go
    pub target: Option<Target>,
    /// Free-text payload of chat and private messages
    pub message: Option<String>,
    /// Derived event tags, in dispatch order
    pub events: Vec<Event>,
}

impl Message {
    /// Parse one frame
    pub fn parse(frame: &RawFrame, users: &UserList, rooms: &RoomList) -> Self {
        let fields: Vec<&str> = frame.line.split(SEPARATOR).collect();

        let (command, params) = if fields.len() < 2 {
            (NO_COMMAND.to_string(), vec![frame.line.clone()])
        } else {
            (
                fields[1].to_lowercase(),
                fields[2..].iter().map(|f| f.to_string()).collect(),
            )
        };

        let timestamp = if command.contains(':') {
            params.first().and_then(|p| p.trim().parse().ok())
        } else {
            None
        };

        let room = frame.room.as_deref().map(|name| rooms.find_ensured(name));
        let (user, auth, nick) = parse_user(&command, &params, users);

        let target = match command.as_str() {
            "pm" => user.clone().map(Target::User),
            _ => room.clone().map(Target::Room),
        };

        let message = match command.as_str() {
            "c:" | "pm" => join_tail(&params, 2),
            "c" => join_tail(&params, 1),
            NO_COMMAND => Some(frame.line.clone()),
            _ => None,
        };

        Self {
            raw: frame.raw(),
            command,
            params,
            timestamp,
            room,
            user,
            auth,
            nick,
            target,
            message,
            events: Vec::new(),
        }
    }

    pub fn has_event(&self, event: &Event) -> bool {
        self.events.contains(event)
    }

    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw.trim_end())
    }
}

/// Index of the `AUTH+NAME` field for commands that carry one
fn user_field(command: &str) -> Option<usize> {
    match command {
        "c:" => Some(1),
        "c" | "j" | "l" | "n" | "pm" => Some(0),
        _ => None,
    }
}

fn parse_user(
    command: &str,
    params: &[String],
    users: &UserList,
) -> (Option<Arc<User>>, Option<Auth>, Option<String>) {
    let Some((auth, nick)) = user_field(command)
        .and_then(|index| params.get(index))
        .and_then(|field| split_auth(field))
        .filter(|(_, nick)| !sanitize(nick).is_empty())
    else {
        return (None, None, None);
    };

    // A rename carries the previous identity; resolve the existing user
    // through it so the rename mutates that object instead of minting a
    // new one under the new name.
    let user = match command {
        "n" => params
            .get(1)
            .and_then(|old_id| users.find(old_id))
            .unwrap_or_else(|| users.find_ensured(nick)),
        _ => users.find_ensured(nick),
    };

    (Some(user), Some(auth), Some(nick.to_string()))
}

/// Rejoin everything from `start` on, keeping separators in the text
fn join_tail(params: &[String], start: usize) -> Option<String> {
    params.get(start..).filter(|tail| !tail.is_empty()).map(|tail| tail.join("|"))
}
