//! Pokemon Showdown Chat Bot Library
//!
//! A persistent chat client for the Pokemon Showdown WebSocket protocol,
//! built on tokio and tokio-tungstenite.
//!
//! # Features
//! - Login handshake against the login server
//! - Room and user tracking from the server's membership lines
//! - Event dispatch to pattern-matched async handlers
//! - Rate-limited outgoing queue with a private-message lane
//! - Reconnection with exponential backoff
//! - Plugins, named locks and a shared key-value store
//!
//! # Architecture
//! - `Bot` is a cloneable handle over the whole session
//! - Each connection attempt is a `Connection`, which reads frames and
//!   applies them to the `UserList` and `RoomList` registries
//! - Outgoing commands go through the `OutgoingQueue`, drained by one
//!   sender task per connection
//! - Handlers run as their own tasks, so a slow or failing handler never
//!   holds up the read loop
//!
//! # Example
//! ```ignore
//! use showdown_bot::{Bot, Config, Event, Pattern};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bot = Bot::new(Config::load("psbot.toml")?);
//!
//!     bot.on(Event::Message, Pattern::literal("!ping"), vec![], |ctx| async move {
//!         ctx.reply("pong");
//!         Ok(())
//!     });
//!
//!     bot.start(Vec::new()).await?;
//!     Ok(())
//! }
//! ```

pub mod bot;
pub mod config;
pub mod connection;
pub mod encoding;
pub mod error;
pub mod event;
pub mod handler;
pub mod locks;
pub mod login;
pub mod message;
pub mod pattern;
pub mod plugin;
pub mod queue;
pub mod reconnect;
pub mod registry;
pub mod room;
pub mod target;
pub mod text;
pub mod transport;
pub mod types;
pub mod user;

#[cfg(test)]
mod testing;

// Re-export main types for convenience
pub use bot::{Bot, BotBuilder};
pub use config::{Config, JoinDelay, Timeouts};
pub use connection::{Connection, ConnectionState};
pub use error::BotError;
pub use event::Event;
pub use handler::{Handler, HandlerContext, HandlerResult, ReplyOptions};
pub use login::{HttpLogin, Login};
pub use message::{Message, RawFrame};
pub use pattern::Pattern;
pub use plugin::Plugin;
pub use room::Room;
pub use target::{Sendable, Target};
pub use transport::{Transport, WebSocketTransport};
pub use types::{Auth, HandlerId, UserKey};
pub use user::User;
