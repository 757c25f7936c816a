//! A single connection to the server
//!
//! `Connection` owns one attempt: it opens the transport, starts the
//! outgoing sender, and reads frames until the socket closes, goes
//! quiet or the bot quits. Every inbound line is parsed, applied to the room and user
//! registries, tagged with events and dispatched to handlers.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::bot::Bot;
use crate::error::BotError;
use crate::event::Event;
use crate::message::{Message, RawFrame};
use crate::queue::RateLimiter;
use crate::room::Room;
use crate::transport::{FrameReader, Inbound};
use crate::types::{sanitize, split_auth};

const BANNED_MARKER: &str = " has banned you from the room ";
const BANNED_SUFFIX: &str = ".</p><p>To appeal the ban";

/// Delay before trying to get back into a room we were banned from
const BAN_REJOIN_DELAY: Duration = Duration::from_secs(1);

/// How long a quitting connection may spend sending what is queued
const QUIT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

/// Protocol commands with side effects on session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    LoginTime,
    Challenge,
    UpdateUser,
    Chat,
    TimedChat,
    Join,
    Leave,
    Rename,
    Init,
    Deinit,
    Users,
    Popup,
    PrivateMessage,
    Tournament,
    QueryResponse,
}

impl Command {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            ":" => Command::LoginTime,
            "challstr" => Command::Challenge,
            "updateuser" => Command::UpdateUser,
            "c" => Command::Chat,
            "c:" => Command::TimedChat,
            "j" => Command::Join,
            "l" => Command::Leave,
            "n" => Command::Rename,
            "init" => Command::Init,
            "deinit" => Command::Deinit,
            "users" => Command::Users,
            "popup" => Command::Popup,
            "pm" => Command::PrivateMessage,
            "tournament" => Command::Tournament,
            "queryresponse" => Command::QueryResponse,
            _ => return None,
        })
    }
}

pub struct Connection {
    bot: Bot,
    /// Server time of our login, from the `:` line
    login_time: Option<i64>,
    avatar_set: bool,
    /// Rooms we already asked to leave on this connection
    pending_leaves: HashSet<String>,
}

impl Connection {
    pub fn new(bot: Bot) -> Self {
        Self {
            bot,
            login_time: None,
            avatar_set: false,
            pending_leaves: HashSet::new(),
        }
    }

    /// Run the connection until it ends.
    ///
    /// Returns whether the transport was established at all, which the
    /// reconnect loop uses to reset its backoff.
    pub async fn run(mut self) -> bool {
        let config = self.bot.config();
        let url = config.url();
        let connect_timeout = config.timeouts.connect();
        let read_timeout = config.timeouts.read();
        let limiter = RateLimiter::new(config.messages_per_second, config.server_queue_size);

        self.bot.set_connection_state(ConnectionState::Connecting);
        info!("Connecting to the websocket at {}...", url);

        let connecting = self.bot.transport().connect(&url);
        let (writer, mut reader) = match tokio::time::timeout(connect_timeout, connecting).await {
            Ok(Ok(halves)) => halves,
            Ok(Err(e)) => {
                warn!("Failed to connect to the server: {}", e);
                self.bot.set_connection_state(ConnectionState::Disconnected);
                return false;
            }
            Err(_) => {
                warn!("{}", BotError::ConnectTimeout(url.clone()));
                self.bot.set_connection_state(ConnectionState::Disconnected);
                return false;
            }
        };

        self.bot.set_connection_state(ConnectionState::Connected);
        info!("Connection to the server successful");

        let mut sender = tokio::spawn(Arc::clone(self.bot.queue()).process(
            writer,
            self.bot.codec(),
            limiter,
        ));

        self.read_loop(reader.as_mut(), read_timeout).await;

        self.bot.set_connection_state(ConnectionState::Closing);
        if self.bot.is_quitting() {
            self.bot.queue().finish();
            if tokio::time::timeout(QUIT_DRAIN_TIMEOUT, &mut sender).await.is_err() {
                warn!("Outgoing queue not drained after {:?}, closing anyway", QUIT_DRAIN_TIMEOUT);
                sender.abort();
                let _ = sender.await;
            }
        } else {
            sender.abort();
            let _ = sender.await;
        }
        self.bot.set_connection_state(ConnectionState::Disconnected);
        true
    }

    async fn read_loop(&mut self, reader: &mut dyn FrameReader, read_timeout: Duration) {
        let bot = self.bot.clone();
        loop {
            let received = tokio::select! {
                received = tokio::time::timeout(read_timeout, reader.recv()) => received,
                _ = bot.quit_requested() => {
                    info!("Closing the connection on quit");
                    return;
                }
            };
            let inbound = match received {
                Ok(Ok(inbound)) => inbound,
                Ok(Err(e)) => {
                    error!("Connection error: {}", e);
                    return;
                }
                Err(_) => {
                    warn!("Nothing received for {:?}, dropping the connection", read_timeout);
                    return;
                }
            };

            match inbound {
                Inbound::Frame(data) => self.handle_data(&data),
                Inbound::Closed(code) => {
                    warn!("Socket connection closed. code={:?}", code);
                    return;
                }
            }
        }
    }

    /// Decode and handle one transport frame
    pub(crate) fn handle_data(&mut self, data: &[u8]) {
        let text = self.bot.codec().decode(data);
        for frame in RawFrame::split(&text) {
            self.handle_frame(&frame);
        }
    }

    /// Parse one line, apply its side effects and dispatch its events
    pub(crate) fn handle_frame(&mut self, frame: &RawFrame) -> Arc<Message> {
        let mut msg = Message::parse(frame, self.bot.users(), self.bot.rooms());
        if msg.command != "debug" {
            debug!(target: "showdown_bot::incoming", "{}", msg);
        }

        let mut events = vec![Event::Catchall];
        if let Some(command) = Command::from_name(&msg.command) {
            self.apply(command, &msg, &mut events);
        }
        events.push(Event::command(&msg.command));
        msg.events = events;

        let msg = Arc::new(msg);
        for event in &msg.events {
            self.bot.handlers().dispatch(&self.bot, event, &msg);
        }
        msg
    }

    fn apply(&mut self, command: Command, msg: &Message, events: &mut Vec<Event>) {
        match command {
            Command::LoginTime => self.login_time = msg.timestamp,
            Command::Challenge => self.on_challenge(msg),
            Command::UpdateUser => self.on_update_user(msg, events),
            Command::Chat => {
                if msg.message.is_some() && msg.param(0) != Some("~") {
                    events.push(Event::Message);
                }
            }
            Command::TimedChat => {
                // Backlog from before we logged in is not news
                if let (Some(login_time), Some(_), Some(timestamp)) =
                    (self.login_time, &msg.message, msg.timestamp)
                {
                    if timestamp >= login_time {
                        events.push(Event::Message);
                    }
                }
            }
            Command::Join => self.on_join(msg),
            Command::Leave => self.on_leave(msg),
            Command::Rename => self.on_rename(msg),
            Command::Init => {
                if let Some(room) = &msg.room {
                    room.set_joined(true);
                    self.bot.add_active_room(room);
                    self.enter_room(room);
                }
            }
            Command::Deinit => {
                if let Some(room) = &msg.room {
                    self.left_room(room);
                }
            }
            Command::Users => self.on_users(msg),
            Command::Popup => self.on_popup(msg),
            Command::PrivateMessage => {
                events.push(Event::Private);
                if msg.message.is_some() {
                    events.push(Event::Message);
                }
            }
            Command::Tournament => {
                if matches!(msg.param(0), Some("create" | "update" | "start")) {
                    events.push(Event::Tour);
                }
            }
            Command::QueryResponse => self.on_query_response(msg),
        }
    }

    fn on_challenge(&self, msg: &Message) {
        let (Some(key_id), Some(_)) = (msg.param(0), msg.param(1)) else {
            warn!("Malformed challenge: {}", msg);
            return;
        };
        let key_id = key_id.to_string();
        let challenge = msg.params[1..].join("|");

        let bot = self.bot.clone();
        tokio::spawn(async move { bot.authenticate(key_id, challenge).await });
    }

    fn on_update_user(&mut self, msg: &Message, events: &mut Vec<Event>) {
        match msg.param(1) {
            Some("1") => {
                events.push(Event::Connect);
                self.bot.join_configured_rooms();
            }
            Some("0") => {
                if let Some(avatar) = &self.bot.config().avatar {
                    if !self.avatar_set {
                        self.bot.set_avatar(avatar);
                    }
                }
                self.avatar_set = true;
            }
            _ => {}
        }
    }

    fn on_join(&mut self, msg: &Message) {
        let (Some(room), Some(user), Some(auth)) = (&msg.room, &msg.user, msg.auth) else {
            return;
        };
        room.add_user(Arc::clone(user), auth);

        if self.bot.users().is_own(user) {
            room.set_joined(true);
            self.bot.add_active_room(room);
            self.enter_room(room);
        }
    }

    fn on_leave(&mut self, msg: &Message) {
        let (Some(room), Some(user)) = (&msg.room, &msg.user) else {
            return;
        };
        room.remove_user(user);

        if self.bot.users().is_own(user) {
            self.left_room(room);
        }
    }

    fn on_rename(&self, msg: &Message) {
        let (Some(room), Some(user), Some(auth), Some(nick)) =
            (&msg.room, &msg.user, msg.auth, &msg.nick)
        else {
            return;
        };

        room.remove_user(user);
        if user.name() != *nick {
            self.bot.users().rename(user, nick);
        }
        room.add_user(Arc::clone(user), auth);
    }

    fn on_users(&self, msg: &Message) {
        let (Some(room), Some(list)) = (&msg.room, msg.param(0)) else {
            return;
        };

        room.clear_users();
        // First entry is the count
        for entry in list.split(',').skip(1) {
            let Some((auth, nick)) = split_auth(entry) else {
                continue;
            };
            // Away users carry an `@status` suffix
            let nick = nick.split_once('@').map_or(nick, |(nick, _)| nick);
            if sanitize(nick).is_empty() {
                continue;
            }
            room.add_user(self.bot.users().find_ensured(nick), auth);
        }
    }

    fn on_popup(&self, msg: &Message) {
        let text = msg.params.join("|");
        let Some((user, room)) = parse_ban(&text) else {
            return;
        };
        warn!("You have been banned from the room {} by user {}", room, user);

        // The server doesn't say when a ban is lifted; try once
        let bot = self.bot.clone();
        let room = room.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(BAN_REJOIN_DELAY).await;
            let known = bot
                .rooms()
                .find(&room)
                .or_else(|| bot.rooms().find(&sanitize(&room)));
            match known {
                Some(room) => {
                    bot.join(room.name());
                }
                None => debug!("Not rejoining unknown room {}", room),
            }
        });
    }

    fn on_query_response(&self, msg: &Message) {
        if msg.param(0) != Some("roomlist") {
            return;
        }
        let body = msg.params[1..].join("|");
        match serde_json::from_str::<serde_json::Value>(&body) {
            Ok(value) => {
                if let Some(rooms) = value.get("rooms").filter(|r| !r.is_null()) {
                    self.bot.set_room_directory(rooms.clone());
                }
            }
            Err(e) => warn!("Malformed room list: {}", e),
        }
    }

    /// We ended up in `room`; leave it if it isn't ours.
    ///
    /// Redirects land us in rooms we never asked for, so after leaving,
    /// every configured room is joined again. Each room is left at most
    /// once per connection, since a join answers with another `init`.
    fn enter_room(&mut self, room: &Arc<Room>) {
        let config = self.bot.config();
        if !config.leave_other_rooms || config.is_configured_room(room.name()) {
            return;
        }
        if !self.pending_leaves.insert(room.name().to_string()) {
            return;
        }

        info!("Leaving unconfigured room {}", room.name());
        self.bot.leave(room.name(), None);
        for name in &config.rooms {
            self.bot.join(name);
        }
    }

    fn left_room(&mut self, room: &Arc<Room>) {
        room.remove_user(self.bot.own_user());
        room.set_joined(false);
        self.bot.drop_active_room(room);
        self.pending_leaves.remove(room.name());
    }
}

/// Pull `(banned by, room)` out of a ban popup
fn parse_ban(text: &str) -> Option<(&str, &str)> {
    let (user, rest) = text.split_once(BANNED_MARKER)?;
    let room = rest.split_once(BANNED_SUFFIX).map_or(rest, |(room, _)| room);
    let room = room.trim_end_matches('.');
    if room.is_empty() {
        None
    } else {
        Some((user, room))
    }
}
