//! Bot session
//!
//! `Bot` is a cheap, cloneable handle to the whole session: configuration,
//! registries, handlers, the outgoing queue and the reconnect loop. Handlers
//! receive a clone and use it to talk back to the server.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{Config, JoinDelay};
use crate::connection::{Connection, ConnectionState};
use crate::encoding::Codec;
use crate::error::BotError;
use crate::event::Event;
use crate::handler::{Handler, HandlerContext, HandlerList, HandlerResult};
use crate::locks::NamedLocks;
use crate::login::{HttpLogin, Login};
use crate::pattern::Pattern;
use crate::plugin::{Plugin, PluginList};
use crate::queue::OutgoingQueue;
use crate::reconnect::Backoff;
use crate::registry::{RoomList, UserList};
use crate::room::Room;
use crate::target::Sendable;
use crate::transport::{Transport, WebSocketTransport};
use crate::types::HandlerId;
use crate::user::User;

/// Longest nick the server accepts
pub const MAX_NICK_LENGTH: usize = 18;

/// The pending "join configured rooms" trigger of the current attempt
#[derive(Debug)]
enum JoinSchedule {
    Handler(HandlerId),
    Timer(JoinHandle<()>),
}

struct Inner {
    config: Config,
    codec: Codec,
    /// Name to log in as; starts as `config.nick`
    desired_nick: RwLock<String>,
    users: UserList,
    rooms: RoomList,
    handlers: HandlerList,
    locks: NamedLocks,
    plugins: PluginList,
    queue: Arc<OutgoingQueue>,
    /// Rooms the bot is in, in join order
    active_rooms: Mutex<Vec<Arc<Room>>>,
    shared: DashMap<String, serde_json::Value>,
    room_directory: RwLock<Option<serde_json::Value>>,
    state: Mutex<ConnectionState>,
    join_schedule: Mutex<Option<JoinSchedule>>,
    quitting: AtomicBool,
    quit_signal: Notify,
    transport: Arc<dyn Transport>,
    login: Arc<dyn Login>,
}

/// Handle to a bot session
#[derive(Clone)]
pub struct Bot {
    inner: Arc<Inner>,
}

/// Builder for `Bot`, for swapping out the transport or login provider
pub struct BotBuilder {
    config: Config,
    transport: Option<Arc<dyn Transport>>,
    login: Option<Arc<dyn Login>>,
}

impl BotBuilder {
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn login(mut self, login: Arc<dyn Login>) -> Self {
        self.login = Some(login);
        self
    }

    pub fn build(self) -> Bot {
        let config = self.config;
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(WebSocketTransport::new(config.local_host.clone())));
        let login = self.login.unwrap_or_else(|| Arc::new(HttpLogin::new()));
        let own = Arc::new(User::new(&config.nick));

        Bot {
            inner: Arc::new(Inner {
                codec: Codec::for_label(&config.encoding),
                desired_nick: RwLock::new(config.nick.clone()),
                users: UserList::new(own),
                rooms: RoomList::new(),
                handlers: HandlerList::new(),
                locks: NamedLocks::new(),
                plugins: PluginList::new(),
                queue: Arc::new(OutgoingQueue::new()),
                active_rooms: Mutex::new(Vec::new()),
                shared: config.shared.clone().into_iter().collect(),
                room_directory: RwLock::new(None),
                state: Mutex::new(ConnectionState::Disconnected),
                join_schedule: Mutex::new(None),
                quitting: AtomicBool::new(false),
                quit_signal: Notify::new(),
                transport,
                login,
                config,
            }),
        }
    }
}

impl Bot {
    pub fn builder(config: Config) -> BotBuilder {
        BotBuilder {
            config,
            transport: None,
            login: None,
        }
    }

    /// A bot talking WebSocket to the configured server
    pub fn new(config: Config) -> Self {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn codec(&self) -> Codec {
        self.inner.codec
    }

    pub fn users(&self) -> &UserList {
        &self.inner.users
    }

    pub fn rooms(&self) -> &RoomList {
        &self.inner.rooms
    }

    pub fn handlers(&self) -> &HandlerList {
        &self.inner.handlers
    }

    pub fn locks(&self) -> &NamedLocks {
        &self.inner.locks
    }

    pub fn plugins(&self) -> &PluginList {
        &self.inner.plugins
    }

    pub fn queue(&self) -> &Arc<OutgoingQueue> {
        &self.inner.queue
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    /// Key-value store shared by all plugins, seeded from `config.shared`
    pub fn shared(&self) -> &DashMap<String, serde_json::Value> {
        &self.inner.shared
    }

    /// The server's room directory, once a roomlist query was answered
    pub fn room_directory(&self) -> Option<serde_json::Value> {
        self.inner.room_directory.read().clone()
    }

    pub(crate) fn set_room_directory(&self, rooms: serde_json::Value) {
        *self.inner.room_directory.write() = Some(rooms);
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    pub(crate) fn set_connection_state(&self, state: ConnectionState) {
        debug!("Connection state: {:?}", state);
        *self.inner.state.lock() = state;
    }

    // Identity

    /// The bot's own user
    pub fn own_user(&self) -> &Arc<User> {
        self.inner.users.own()
    }

    pub fn nick(&self) -> String {
        self.own_user().name()
    }

    /// Name the bot logs in as
    pub fn desired_nick(&self) -> String {
        self.inner.desired_nick.read().clone()
    }

    /// Change nick.
    ///
    /// In strict mode, nicks over the server limit are rejected instead
    /// of being sent.
    pub fn set_nick(&self, new_nick: &str) -> Result<(), BotError> {
        if self.config().strict && new_nick.chars().count() > MAX_NICK_LENGTH {
            return Err(BotError::NickTooLong(new_nick.to_string()));
        }
        *self.inner.desired_nick.write() = new_nick.to_string();
        self.send(format!("|/nick {}", new_nick));
        Ok(())
    }

    /// Rename the bot's own user and keep the registry in step
    pub(crate) fn rename_own(&self, nick: &str) {
        let own = self.own_user();
        if own.name() != nick {
            self.inner.users.rename(own, nick);
        }
    }

    pub fn set_avatar(&self, avatar: &str) {
        self.send(format!("|/avatar {}", avatar));
    }

    // Handlers

    /// Register a handler for `event` whose pattern is matched against the
    /// message text. `args` are passed to every invocation.
    pub fn on<F, Fut>(
        &self,
        event: impl Into<Event>,
        pattern: Pattern,
        args: Vec<String>,
        callback: F,
    ) -> HandlerId
    where
        F: Fn(HandlerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.inner
            .handlers
            .register(Handler::new(event.into(), pattern, args, callback))
    }

    /// Like `on`, but the handler unregisters itself after its first match
    pub fn once<F, Fut>(&self, event: impl Into<Event>, pattern: Pattern, callback: F) -> HandlerId
    where
        F: Fn(HandlerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.inner
            .handlers
            .register(Handler::new(event.into(), pattern, Vec::new(), callback).once())
    }

    pub fn off(&self, id: HandlerId) -> bool {
        self.inner.handlers.unregister(id)
    }

    /// Run `body` while holding the lock named `name`
    pub async fn synchronize<F, Fut, T>(&self, name: &str, body: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.inner.locks.synchronize(name, body).await
    }

    // Sending

    /// Queue a raw protocol command
    pub fn send(&self, raw: impl Into<String>) {
        self.inner.queue.enqueue(raw);
    }

    /// Send text to a room or user
    pub fn say(&self, target: &impl Sendable, text: &str) {
        self.send(target.outgoing(text));
    }

    pub fn set_modchat(&self, room: &str, level: &str) {
        let room = self.inner.rooms.find_ensured(room);
        self.send(room.modchat_command(level));
    }

    // Rooms

    pub fn active_rooms(&self) -> Vec<Arc<Room>> {
        self.inner.active_rooms.lock().clone()
    }

    pub(crate) fn add_active_room(&self, room: &Arc<Room>) {
        let mut rooms = self.inner.active_rooms.lock();
        if !rooms.iter().any(|r| Arc::ptr_eq(r, room)) {
            rooms.push(Arc::clone(room));
        }
    }

    pub(crate) fn drop_active_room(&self, room: &Room) {
        self.inner
            .active_rooms
            .lock()
            .retain(|r| r.name() != room.name());
    }

    /// Join a room
    pub fn join(&self, name: &str) -> Arc<Room> {
        let room = self.inner.rooms.find_ensured(name);
        self.send(format!("|/join {}", room.name()));
        room.set_joined(true);
        self.add_active_room(&room);
        room
    }

    /// Leave a room, optionally saying something first
    pub fn leave(&self, name: &str, reason: Option<&str>) -> Arc<Room> {
        let room = self.inner.rooms.find_ensured(name);
        if let Some(reason) = reason {
            self.say(room.as_ref(), reason);
        }
        self.send(format!("|/leave {}", room.name()));
        room.set_joined(false);
        self.drop_active_room(&room);
        room
    }

    pub fn join_configured_rooms(&self) {
        for name in &self.config().rooms {
            self.join(name);
        }
    }

    // Lifecycle

    pub fn is_quitting(&self) -> bool {
        self.inner.quitting.load(Ordering::SeqCst)
    }

    /// Leave every room and log out. A live connection sends what is
    /// queued and closes; the reconnect loop stops afterwards.
    pub fn quit(&self, message: Option<&str>) {
        info!("Quitting");
        for room in self.active_rooms() {
            if let Some(message) = message {
                self.say(room.as_ref(), message);
            }
            self.send(format!("|/leave {}", room.name()));
        }
        self.send("|/logout");

        self.inner.quitting.store(true, Ordering::SeqCst);
        self.inner.quit_signal.notify_waiters();
    }

    /// Resolves once `quit` has been called, including before this call
    pub(crate) async fn quit_requested(&self) {
        let notified = self.inner.quit_signal.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_quitting() {
            return;
        }
        notified.await;
    }

    /// Register plugins and run the session until quit.
    ///
    /// Reconnects with exponential backoff when the connection drops,
    /// unless reconnecting is disabled.
    pub async fn start(&self, plugins: Vec<Box<dyn Plugin>>) -> Result<(), BotError> {
        self.inner
            .plugins
            .register_plugins(self, &plugins, &self.config().plugins)?;

        let mut backoff = Backoff::new(self.config().max_reconnect_delay);
        loop {
            self.inner.active_rooms.lock().clear();
            self.inner.queue.clear();
            self.arm_join_schedule();

            info!("Connecting to {}:{}...", self.config().server, self.config().port);
            let connected = Connection::new(self.clone()).run().await;

            if !self.config().reconnect || self.is_quitting() {
                break;
            }

            let wait = backoff.next_delay(connected);
            info!("Waiting {} seconds before reconnecting", wait.as_secs());
            self.wait_unless_quitting(wait).await;
            if self.is_quitting() {
                break;
            }
        }

        self.disarm_join_schedule();
        info!("Session ended");
        Ok(())
    }

    /// Sleep for `wait`, waking early on quit
    async fn wait_unless_quitting(&self, wait: Duration) {
        let deadline = Instant::now() + wait;
        while !self.is_quitting() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let tick = (deadline - now).min(Duration::from_secs(1));
            tokio::select! {
                _ = tokio::time::sleep(tick) => {}
                _ = self.quit_requested() => {}
            }
        }
    }

    /// Arm this attempt's deferred room joins, cancelling the previous one
    fn arm_join_schedule(&self) {
        self.disarm_join_schedule();

        let schedule = match &self.config().delay_joins {
            JoinDelay::Event(name) => {
                debug!("Joining rooms on '{}'", name);
                JoinSchedule::Handler(self.once(name.as_str(), Pattern::Any, |ctx| async move {
                    ctx.bot.join_configured_rooms();
                    Ok(())
                }))
            }
            JoinDelay::Seconds(secs) => {
                let bot = self.clone();
                let delay = Duration::from_secs(*secs);
                JoinSchedule::Timer(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    bot.join_configured_rooms();
                }))
            }
        };
        *self.inner.join_schedule.lock() = Some(schedule);
    }

    fn disarm_join_schedule(&self) {
        match self.inner.join_schedule.lock().take() {
            Some(JoinSchedule::Handler(id)) => {
                self.off(id);
            }
            Some(JoinSchedule::Timer(timer)) => timer.abort(),
            None => {}
        }
    }

    /// Exchange a login challenge for an assertion and claim our nick
    pub(crate) async fn authenticate(&self, challenge_key_id: String, challenge: String) {
        let nick = self.desired_nick();
        info!("Attempting to log in as {}...", nick);

        let result = self
            .inner
            .login
            .login(
                &nick,
                self.config().password.as_deref(),
                &challenge_key_id,
                &challenge,
            )
            .await;

        match result {
            Ok(Some(assertion)) => {
                self.rename_own(&nick);
                self.send(format!("|/trn {},0,{}", nick, assertion));
            }
            Ok(None) => warn!("Failed to receive login info."),
            Err(e) => warn!("Login request failed: {}", e),
        }
    }
}

impl std::fmt::Debug for Bot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bot").field("nick", &self.nick()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, ChannelTransport, ScriptedLogin};
    use crate::transport::Inbound;

    fn drain(bot: &Bot) -> Vec<String> {
        std::iter::from_fn(|| bot.queue().pop()).collect()
    }

    #[test]
    fn test_join_and_leave() {
        let bot = testing::bot();

        let room = bot.join("techcode");
        assert!(room.is_joined());
        assert_eq!(bot.active_rooms().len(), 1);
        bot.join("techcode");
        assert_eq!(bot.active_rooms().len(), 1);

        bot.leave("techcode", Some("bye"));
        assert!(!room.is_joined());
        assert!(bot.active_rooms().is_empty());

        assert_eq!(
            drain(&bot),
            vec!["|/join techcode", "|/join techcode", "techcode|bye", "|/leave techcode"]
        );
    }

    #[test]
    fn test_quit_leaves_rooms_and_logs_out() {
        let bot = testing::bot();
        bot.join("lobby");
        drain(&bot);

        bot.quit(Some("see you"));

        assert!(bot.is_quitting());
        assert_eq!(drain(&bot), vec!["lobby|see you", "|/leave lobby", "|/logout"]);
    }

    #[test]
    fn test_set_nick_strict_mode() {
        let bot = testing::bot_with(|c| c.strict = true);
        let long = "abcdefghijklmnopqrstuvwxyz";

        assert!(matches!(bot.set_nick(long), Err(BotError::NickTooLong(_))));
        assert!(bot.queue().is_empty());

        bot.set_nick("shorter").unwrap();
        assert_eq!(bot.desired_nick(), "shorter");
        assert_eq!(drain(&bot), vec!["|/nick shorter"]);

        let lenient = testing::bot();
        assert!(lenient.set_nick(long).is_ok());
    }

    #[test]
    fn test_rename_own_keeps_identity_lookup() {
        let bot = testing::bot();
        let own = Arc::clone(bot.own_user());

        bot.rename_own("Shiny Bot");

        assert_eq!(bot.nick(), "Shiny Bot");
        assert!(Arc::ptr_eq(&bot.users().find_ensured("shinybot"), &own));
        assert!(bot.users().find("psbot").is_none());
    }

    #[test]
    fn test_shared_store_is_seeded() {
        let bot = testing::bot_with(|c| {
            c.shared.insert("greeting".to_string(), serde_json::json!("hi"));
        });
        assert_eq!(*bot.shared().get("greeting").unwrap(), serde_json::json!("hi"));
        bot.shared().insert("count".to_string(), serde_json::json!(1));
        assert!(bot.shared().contains_key("count"));
    }

    #[tokio::test]
    async fn test_synchronize_through_bot() {
        let bot = testing::bot();
        let value = bot.synchronize("db", || async { 7 }).await;
        assert_eq!(value, 7);
        assert_eq!(bot.locks().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_backs_off_until_quit() {
        let transport = ChannelTransport::new();
        let bot = Bot::builder(Config::default())
            .transport(transport.clone())
            .login(ScriptedLogin::new(None))
            .build();

        let session = tokio::spawn({
            let bot = bot.clone();
            async move { bot.start(Vec::new()).await }
        });

        // Attempts at t = 0, 1, 3 and 7 seconds
        tokio::time::sleep(Duration::from_millis(7500)).await;
        assert_eq!(transport.attempts(), 4);
        assert_eq!(bot.connection_state(), ConnectionState::Disconnected);

        bot.quit(None);
        let result = tokio::time::timeout(Duration::from_secs(2), session).await;
        assert!(result.unwrap().unwrap().is_ok());
        assert_eq!(transport.attempts(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quit_while_connected_logs_out_and_ends_session() {
        let transport = ChannelTransport::new();
        let (server, mut client) = transport.script();
        let bot = Bot::builder(Config::default())
            .transport(transport.clone())
            .login(ScriptedLogin::new(None))
            .build();
        let session = tokio::spawn({
            let bot = bot.clone();
            async move { bot.start(Vec::new()).await }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(bot.connection_state(), ConnectionState::Connected);
        bot.join("lobby");
        assert_eq!(client.recv().await.as_deref(), Some("|/join lobby"));

        bot.quit(Some("bye"));
        assert_eq!(client.recv().await.as_deref(), Some("lobby|bye"));
        assert_eq!(client.recv().await.as_deref(), Some("|/leave lobby"));
        assert_eq!(client.recv().await.as_deref(), Some("|/logout"));

        // The server never closes the socket
        let result = tokio::time::timeout(Duration::from_secs(2), session).await;
        assert!(result.unwrap().unwrap().is_ok());
        assert_eq!(bot.connection_state(), ConnectionState::Disconnected);
        assert_eq!(transport.attempts(), 1);
        drop(server);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_logs_in_and_joins_on_connect() {
        let transport = ChannelTransport::new();
        let (server, mut client) = transport.script();
        let login = ScriptedLogin::new(Some("signed"));
        let mut config = Config::default();
        config.reconnect = false;
        config.rooms = vec!["lobby".to_string()];
        config.delay_joins = JoinDelay::Event("connect".to_string());

        let bot = Bot::builder(config)
            .transport(transport.clone())
            .login(login.clone())
            .build();
        let session = tokio::spawn({
            let bot = bot.clone();
            async move { bot.start(Vec::new()).await }
        });

        server
            .send(Inbound::Frame(b"|challstr|4|abcdef".to_vec()))
            .unwrap();
        assert_eq!(client.recv().await.as_deref(), Some("|/trn psbot,0,signed"));
        assert_eq!(login.calls(), vec![("psbot".to_string(), "4".to_string(), "abcdef".to_string())]);

        server
            .send(Inbound::Frame(b"|updateuser|psbot|1|1".to_vec()))
            .unwrap();
        // Once from the update itself, once from the "connect" trigger
        assert_eq!(client.recv().await.as_deref(), Some("|/join lobby"));
        assert_eq!(client.recv().await.as_deref(), Some("|/join lobby"));
        assert_eq!(bot.connection_state(), ConnectionState::Connected);
        assert!(bot.handlers().is_empty());

        server.send(Inbound::Closed(Some(1000))).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), session).await;
        assert!(result.unwrap().unwrap().is_ok());
        assert_eq!(bot.connection_state(), ConnectionState::Disconnected);
        assert_eq!(transport.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_join_fires_once_per_attempt() {
        let transport = ChannelTransport::new();
        let (server, mut client) = transport.script();
        let mut config = Config::default();
        config.reconnect = false;
        config.rooms = vec!["lobby".to_string()];
        config.delay_joins = JoinDelay::Seconds(3);

        let bot = Bot::builder(config)
            .transport(transport.clone())
            .login(ScriptedLogin::new(None))
            .build();
        let session = tokio::spawn({
            let bot = bot.clone();
            async move { bot.start(Vec::new()).await }
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(bot.active_rooms().is_empty());

        assert_eq!(client.recv().await.as_deref(), Some("|/join lobby"));
        assert_eq!(bot.active_rooms().len(), 1);

        server.send(Inbound::Closed(None)).unwrap();
        assert!(tokio::time::timeout(Duration::from_secs(5), session).await.is_ok());
    }
}
