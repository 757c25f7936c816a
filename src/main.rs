//! Pokemon Showdown Chat Bot - Entry Point
//!
//! Loads the configuration and runs the bot until ctrl-c.

use std::env;
use std::path::Path;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use showdown_bot::{Bot, Config, Event, Pattern};

/// Default configuration file
const DEFAULT_CONFIG: &str = "psbot.toml";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=showdown_bot::incoming=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("showdown_bot=info")),
        )
        .init();

    let path = env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let config = if Path::new(&path).exists() {
        info!("Loading configuration from {}", path);
        Config::load(&path)?
    } else {
        warn!("{} not found, using the default configuration", path);
        Config::default()
    };

    let bot = Bot::new(config);

    bot.on(Event::Message, Pattern::literal("!ping"), vec![], |ctx| async move {
        ctx.reply("pong");
        Ok(())
    });

    let quitter = bot.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => quitter.quit(None),
            Err(e) => error!("Failed to listen for ctrl-c: {}", e),
        }
    });

    bot.start(Vec::new()).await?;
    Ok(())
}
