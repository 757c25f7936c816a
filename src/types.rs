//! Basic type definitions for the bot
//!
//! Provides newtype wrappers for type safety:
//! - `UserKey`: UUID-based key that stays stable across nickname changes
//! - `HandlerId`: UUID-based handle for unregistering handlers
//! - `Auth`: a user's single-character authority code within a room

use uuid::Uuid;

/// Normalize a display name into an identity.
///
/// Showdown names are case-insensitive and ignore anything that is not
/// an ASCII letter or digit.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Stable user key (newtype pattern)
///
/// Room membership is keyed by this rather than by identity, so a
/// rename never orphans a membership entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserKey(pub Uuid);

impl UserKey {
    /// Create a new random user key
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UserKey {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UserKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registered handler identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(pub Uuid);

impl HandlerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for HandlerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for HandlerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Authority code of a user within a room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Auth {
    Administrator,
    Leader,
    RoomOwner,
    Moderator,
    Driver,
    BattleParticipant,
    Voiced,
    Unvoiced,
    Muted,
    Locked,
    /// Any symbol the server introduces that we don't know about
    Other(char),
}

impl Auth {
    pub fn from_char(c: char) -> Self {
        match c {
            '~' => Auth::Administrator,
            '&' => Auth::Leader,
            '#' => Auth::RoomOwner,
            '@' => Auth::Moderator,
            '%' => Auth::Driver,
            '★' => Auth::BattleParticipant,
            '+' => Auth::Voiced,
            ' ' => Auth::Unvoiced,
            '!' => Auth::Muted,
            '‽' => Auth::Locked,
            other => Auth::Other(other),
        }
    }

    pub fn as_char(&self) -> char {
        match self {
            Auth::Administrator => '~',
            Auth::Leader => '&',
            Auth::RoomOwner => '#',
            Auth::Moderator => '@',
            Auth::Driver => '%',
            Auth::BattleParticipant => '★',
            Auth::Voiced => '+',
            Auth::Unvoiced => ' ',
            Auth::Muted => '!',
            Auth::Locked => '‽',
            Auth::Other(c) => *c,
        }
    }

    /// Human-readable tier name
    pub fn description(&self) -> &'static str {
        match self {
            Auth::Administrator => "administrator",
            Auth::Leader => "leader",
            Auth::RoomOwner => "room owner",
            Auth::Moderator => "moderator",
            Auth::Driver => "driver",
            Auth::BattleParticipant => "battle participant",
            Auth::Voiced => "voiced user",
            Auth::Unvoiced => "unvoiced user",
            Auth::Muted => "muted user",
            Auth::Locked => "locked user",
            Auth::Other(_) => "unknown",
        }
    }
}

impl std::fmt::Display for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// Split a protocol user field into its authority code and name.
///
/// Returns `None` for an empty field.
pub fn split_auth(field: &str) -> Option<(Auth, &str)> {
    let mut chars = field.chars();
    let auth = chars.next()?;
    Some((Auth::from_char(auth), chars.as_str()))
}
