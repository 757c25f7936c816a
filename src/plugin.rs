//! Plugins
//!
//! A plugin is a named bundle of handlers registered together and
//! unregistered together.

use parking_lot::Mutex;
use tracing::info;

use crate::bot::Bot;
use crate::error::BotError;
use crate::types::HandlerId;

pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    /// Register this plugin's handlers, returning their ids
    fn register(&self, bot: &Bot) -> Result<Vec<HandlerId>, BotError>;
}

#[derive(Debug, Clone)]
struct Registration {
    name: String,
    handlers: Vec<HandlerId>,
}

/// Plugins currently registered with the bot
#[derive(Debug, Default)]
pub struct PluginList {
    registrations: Mutex<Vec<Registration>>,
}

impl PluginList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_plugin(&self, bot: &Bot, plugin: &dyn Plugin) -> Result<(), BotError> {
        let handlers = plugin.register(bot)?;
        info!("Registered plugin '{}' ({} handlers)", plugin.name(), handlers.len());
        self.registrations.lock().push(Registration {
            name: plugin.name().to_string(),
            handlers,
        });
        Ok(())
    }

    /// Register the plugins enabled by `enabled` (all of them when empty)
    pub fn register_plugins(
        &self,
        bot: &Bot,
        plugins: &[Box<dyn Plugin>],
        enabled: &[String],
    ) -> Result<(), BotError> {
        for plugin in plugins {
            if enabled.is_empty() || enabled.iter().any(|name| name == plugin.name()) {
                self.register_plugin(bot, plugin.as_ref())?;
            }
        }
        Ok(())
    }

    /// Unregister a plugin's handlers; false if it wasn't registered
    pub fn unregister_plugin(&self, bot: &Bot, name: &str) -> bool {
        let removed: Vec<Registration> = {
            let mut registrations = self.registrations.lock();
            let (removed, kept): (Vec<_>, Vec<_>) =
                registrations.drain(..).partition(|r| r.name == name);
            *registrations = kept;
            removed
        };
        for registration in &removed {
            for id in &registration.handlers {
                bot.off(*id);
            }
        }
        !removed.is_empty()
    }

    pub fn unregister_all(&self, bot: &Bot) {
        let registrations = std::mem::take(&mut *self.registrations.lock());
        for id in registrations.iter().flat_map(|r| &r.handlers) {
            bot.off(*id);
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.registrations.lock().iter().map(|r| r.name.clone()).collect()
    }
}
