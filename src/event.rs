//! Event tags
//!
//! Every parsed line carries an ordered list of tags. Handlers subscribe to
//! a tag and are dispatched by set membership.

use std::fmt;
use std::str::FromStr;

/// A dispatchable event
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Event {
    /// Every line
    Catchall,
    /// Logged in under a registered name
    Connect,
    /// Chat or private message with a payload
    Message,
    /// Private message
    Private,
    /// Tournament create/update/start
    Tour,
    /// The literal (lowercased) protocol command
    Command(String),
}

impl Event {
    pub fn command(name: &str) -> Self {
        Event::Command(name.to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        match self {
            Event::Catchall => "catchall",
            Event::Connect => "connect",
            Event::Message => "message",
            Event::Private => "private",
            Event::Tour => "tour",
            Event::Command(name) => name,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Event {
    type Err = std::convert::Infallible;

    /// Named tags map to their variants, anything else is a command tag
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "catchall" => Event::Catchall,
            "connect" => Event::Connect,
            "message" => Event::Message,
            "private" => Event::Private,
            "tour" => Event::Tour,
            other => Event::command(other),
        })
    }
}

impl From<&str> for Event {
    fn from(s: &str) -> Self {
        match s.parse() {
            Ok(event) => event,
            Err(never) => match never {},
        }
    }
}
