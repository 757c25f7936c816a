//! Bot configuration
//!
//! Deserialized from TOML; every option has a default so an empty file
//! (or no file at all) yields a usable configuration.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::BotError;

/// When to issue the configured room joins after connecting
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum JoinDelay {
    /// Join once the named event has been dispatched
    Event(String),
    /// Join after this many seconds
    Seconds(u64),
}

impl Default for JoinDelay {
    fn default() -> Self {
        JoinDelay::Seconds(0)
    }
}

/// Socket timeouts, in seconds
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub read: u64,
    pub connect: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            read: 240,
            connect: 10,
        }
    }
}

impl Timeouts {
    pub fn read(&self) -> Duration {
        Duration::from_secs(self.read)
    }

    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: String,
    pub port: u16,
    pub password: Option<String>,
    pub nick: String,
    pub messages_per_second: f64,
    /// Size of the server's own flood-control queue
    pub server_queue_size: usize,
    pub message_split_start: String,
    pub message_split_end: String,
    /// Upper bound on pieces a split reply may produce
    pub max_messages: Option<usize>,
    pub max_message_length: usize,
    /// Names of plugins to enable; empty enables every supplied plugin
    pub plugins: Vec<String>,
    pub rooms: Vec<String>,
    /// WHATWG encoding label
    pub encoding: String,
    pub reconnect: bool,
    /// Seconds
    pub max_reconnect_delay: u64,
    pub local_host: Option<String>,
    pub timeouts: Timeouts,
    pub delay_joins: JoinDelay,
    pub shared: HashMap<String, serde_json::Value>,
    pub avatar: Option<String>,
    pub leave_other_rooms: bool,
    /// Reject invalid usage (e.g. over-long nicks) instead of passing it on
    pub strict: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: "sim.smogon.com".to_string(),
            port: 8000,
            password: None,
            nick: "psbot".to_string(),
            messages_per_second: 3.0,
            server_queue_size: 300,
            message_split_start: "... ".to_string(),
            message_split_end: " ...".to_string(),
            max_messages: None,
            max_message_length: 300,
            plugins: Vec::new(),
            rooms: Vec::new(),
            encoding: "utf-8".to_string(),
            reconnect: true,
            max_reconnect_delay: 8,
            local_host: None,
            timeouts: Timeouts::default(),
            delay_joins: JoinDelay::default(),
            shared: HashMap::new(),
            avatar: None,
            leave_other_rooms: true,
            strict: false,
        }
    }
}

impl Config {
    /// Parse a configuration from TOML text
    pub fn from_toml(text: &str) -> Result<Self, BotError> {
        Ok(toml::from_str(text)?)
    }

    /// Load a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, BotError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// WebSocket endpoint of the configured server
    pub fn url(&self) -> String {
        format!("ws://{}:{}/showdown/websocket", self.server, self.port)
    }

    pub fn is_configured_room(&self, name: &str) -> bool {
        self.rooms.iter().any(|room| room == name)
    }
}
