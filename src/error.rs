//! Error types for the bot
//!
//! Defines the session-level error type.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

/// Session-level errors
///
/// Transport and protocol failures are logged and recovered from by the
/// session loops; usage errors (`NickTooLong`, `Pattern`) are returned to
/// the caller of the offending operation.
#[derive(Debug, Error)]
pub enum BotError {
    /// WebSocket protocol error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Login server request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration file could not be parsed
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// A handler pattern failed to compile
    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// Connecting took longer than the configured timeout
    #[error("Connection to {0} timed out")]
    ConnectTimeout(String),

    /// The transport was closed while writing
    #[error("Transport closed")]
    TransportClosed,

    /// Nickname exceeds the server limit (strict mode only)
    #[error("Nickname too long: {0}")]
    NickTooLong(String),
}
