//! Event handlers
//!
//! Handlers bind an event tag and a text pattern to an async callback.
//! Dispatch runs every matching handler as its own task: handlers may run
//! concurrently with each other and with themselves, and a slow or failing
//! handler never holds up the read loop. Use `Bot::synchronize` to guard
//! shared state.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::bot::Bot;
use crate::event::Event;
use crate::message::Message;
use crate::pattern::Pattern;
use crate::target::{Sendable, Target};
use crate::text::{split_message, truncate};
use crate::types::HandlerId;

/// Outcome of a handler invocation
pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

type Callback = Arc<dyn Fn(HandlerContext) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// A registered handler
pub struct Handler {
    pub id: HandlerId,
    pub event: Event,
    pub pattern: Pattern,
    /// Extra arguments handed to every invocation
    pub args: Vec<String>,
    /// Unregister on first match
    pub once: bool,
    callback: Callback,
}

impl Handler {
    pub fn new<F, Fut>(event: Event, pattern: Pattern, args: Vec<String>, callback: F) -> Self
    where
        F: Fn(HandlerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self {
            id: HandlerId::new(),
            event,
            pattern,
            args,
            once: false,
            callback: Arc::new(move |ctx| callback(ctx).boxed()),
        }
    }

    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler")
            .field("id", &self.id)
            .field("event", &self.event)
            .field("pattern", &self.pattern)
            .field("args", &self.args)
            .field("once", &self.once)
            .finish()
    }
}

/// Everything a handler invocation gets to work with
#[derive(Clone)]
pub struct HandlerContext {
    pub bot: Bot,
    pub message: Arc<Message>,
    /// The tag this invocation was dispatched for
    pub event: Event,
    /// Pattern capture groups
    pub captures: Vec<Option<String>>,
    /// The handler's configured extra arguments
    pub args: Vec<String>,
}

/// Options for `HandlerContext::reply_with`
#[derive(Debug, Clone)]
pub struct ReplyOptions {
    /// Prefix the reply with `(nick) ` whenever the message has a sender,
    /// in rooms as well as in private messages
    pub prefix: bool,
    /// Cut the reply to the maximum message length instead of splitting it
    pub truncate: bool,
    /// Send somewhere other than where the message came from
    pub target: Option<Target>,
}

impl Default for ReplyOptions {
    fn default() -> Self {
        Self {
            prefix: true,
            truncate: true,
            target: None,
        }
    }
}

impl HandlerContext {
    /// Capture group `index` (0 is the first group)
    pub fn capture(&self, index: usize) -> Option<&str> {
        self.captures.get(index).and_then(|c| c.as_deref())
    }

    /// Reply where the message came from, prefixed with the sender's nick
    pub fn reply(&self, text: &str) {
        self.reply_with(text, ReplyOptions::default());
    }

    pub fn reply_with(&self, text: &str, options: ReplyOptions) {
        let Some(target) = options.target.or_else(|| self.message.target.clone()) else {
            debug!("No reply target for '{}'", self.message);
            return;
        };

        let text = match (&self.message.nick, options.prefix) {
            (Some(nick), true) => format!("({}) {}", nick, text),
            _ => text.to_string(),
        };

        let config = self.bot.config();
        if options.truncate {
            self.bot
                .send(target.outgoing(truncate(&text, config.max_message_length)));
        } else {
            for piece in split_message(
                &text,
                config.max_message_length,
                &config.message_split_start,
                &config.message_split_end,
                config.max_messages,
            ) {
                self.bot.send(target.outgoing(&piece));
            }
        }
    }
}

/// Ordered collection of registered handlers
#[derive(Debug, Default)]
pub struct HandlerList {
    handlers: RwLock<Vec<Arc<Handler>>>,
}

impl HandlerList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handler: Handler) -> HandlerId {
        let id = handler.id;
        debug!("Registering handler {} for '{}'", id, handler.event);
        self.handlers.write().push(Arc::new(handler));
        id
    }

    /// Remove a handler; returns false if it was not registered
    pub fn unregister(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|h| h.id != id);
        handlers.len() != before
    }

    pub fn clear(&self) {
        self.handlers.write().clear();
    }

    /// Handlers registered for `event`, in registration order
    pub fn find(&self, event: &Event) -> Vec<Arc<Handler>> {
        self.handlers
            .read()
            .iter()
            .filter(|h| &h.event == event)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every handler for `event` whose pattern matches the message.
    ///
    /// Works over a snapshot, so handlers may (un)register handlers while
    /// a dispatch is in flight. Returns one task per invocation.
    pub fn dispatch(&self, bot: &Bot, event: &Event, message: &Arc<Message>) -> Vec<JoinHandle<()>> {
        let text = message.message.as_deref().unwrap_or("");
        let mut tasks = Vec::new();

        for handler in self.find(event) {
            let Some(captures) = handler.pattern.captures(text) else {
                continue;
            };
            // Only the invocation that actually removes a once-handler runs it
            if handler.once && !self.unregister(handler.id) {
                continue;
            }

            let ctx = HandlerContext {
                bot: bot.clone(),
                message: Arc::clone(message),
                event: event.clone(),
                captures,
                args: handler.args.clone(),
            };
            tasks.push(invoke(handler, ctx));
        }
        tasks
    }
}

/// Run one handler invocation, logging its failure or panic
fn invoke(handler: Arc<Handler>, ctx: HandlerContext) -> JoinHandle<()> {
    let raw = ctx.message.raw.clone();
    let callback = Arc::clone(&handler.callback);
    let inner = tokio::spawn(async move { callback(ctx).await });

    tokio::spawn(async move {
        match inner.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(
                handler = %handler.id,
                event = %handler.event,
                raw = %raw,
                "Handler failed: {}", e
            ),
            Err(e) => error!(
                handler = %handler.id,
                event = %handler.event,
                raw = %raw,
                "Handler panicked: {}", e
            ),
        }
    })
}
