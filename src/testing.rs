//! In-memory transport and login for tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::bot::Bot;
use crate::config::Config;
use crate::error::BotError;
use crate::login::Login;
use crate::transport::{FrameReader, FrameWriter, Inbound, Transport};

/// A bot on the in-memory transport, nick `psbot`
pub fn bot() -> Bot {
    bot_with(|_| {})
}

pub fn bot_with(f: impl FnOnce(&mut Config)) -> Bot {
    let mut config = Config::default();
    f(&mut config);
    Bot::builder(config)
        .transport(ChannelTransport::new())
        .login(ScriptedLogin::new(Some("assertion")))
        .build()
}

pub fn bot_with_login(assertion: Option<&str>) -> Bot {
    Bot::builder(Config::default())
        .transport(ChannelTransport::new())
        .login(ScriptedLogin::new(assertion))
        .build()
}

struct ScriptedConnection {
    inbound: mpsc::UnboundedReceiver<Inbound>,
    outbound: mpsc::UnboundedSender<String>,
}

/// Hands out scripted connections in order; fails once they run out
#[derive(Default)]
pub struct ChannelTransport {
    connections: Mutex<VecDeque<ScriptedConnection>>,
    attempts: AtomicUsize,
}

impl ChannelTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a connection. Returns the server's ends: a sender for
    /// inbound frames and a receiver for what the bot wrote.
    pub fn script(&self) -> (mpsc::UnboundedSender<Inbound>, mpsc::UnboundedReceiver<String>) {
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        self.connections
            .lock()
            .push_back(ScriptedConnection { inbound, outbound });
        (inbound_tx, outbound_rx)
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn connect(
        &self,
        _url: &str,
    ) -> Result<(Box<dyn FrameWriter>, Box<dyn FrameReader>), BotError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let connection = self
            .connections
            .lock()
            .pop_front()
            .ok_or(BotError::TransportClosed)?;
        Ok((
            Box::new(ChannelWriter {
                tx: connection.outbound,
            }),
            Box::new(ChannelReader {
                rx: connection.inbound,
            }),
        ))
    }
}

struct ChannelWriter {
    tx: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl FrameWriter for ChannelWriter {
    async fn send(&mut self, data: Vec<u8>) -> Result<(), BotError> {
        self.tx
            .send(String::from_utf8_lossy(&data).into_owned())
            .map_err(|_| BotError::TransportClosed)
    }
}

struct ChannelReader {
    rx: mpsc::UnboundedReceiver<Inbound>,
}

#[async_trait]
impl FrameReader for ChannelReader {
    async fn recv(&mut self) -> Result<Inbound, BotError> {
        Ok(self.rx.recv().await.unwrap_or(Inbound::Closed(None)))
    }
}

/// Writer that records what it was given
pub struct RecordingWriter {
    sent: Arc<Mutex<Vec<String>>>,
    fail_on: Option<String>,
}

impl RecordingWriter {
    pub fn new() -> (Self, Arc<Mutex<Vec<String>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                sent: Arc::clone(&sent),
                fail_on: None,
            },
            sent,
        )
    }

    /// Like `new`, but writing `message` fails
    pub fn failing_on(message: &str) -> (Self, Arc<Mutex<Vec<String>>>) {
        let (mut writer, sent) = Self::new();
        writer.fail_on = Some(message.to_string());
        (writer, sent)
    }
}

#[async_trait]
impl FrameWriter for RecordingWriter {
    async fn send(&mut self, data: Vec<u8>) -> Result<(), BotError> {
        let text = String::from_utf8_lossy(&data).into_owned();
        if self.fail_on.as_deref() == Some(text.as_str()) {
            return Err(BotError::TransportClosed);
        }
        self.sent.lock().push(text);
        Ok(())
    }
}

/// Login that answers with a fixed assertion and records its calls
pub struct ScriptedLogin {
    assertion: Option<String>,
    calls: Mutex<Vec<(String, String, String)>>,
}

impl ScriptedLogin {
    pub fn new(assertion: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            assertion: assertion.map(String::from),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// `(name, challenge key id, challenge)` per call
    pub fn calls(&self) -> Vec<(String, String, String)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Login for ScriptedLogin {
    async fn login(
        &self,
        name: &str,
        _password: Option<&str>,
        challenge_key_id: &str,
        challenge: &str,
    ) -> Result<Option<String>, BotError> {
        self.calls.lock().push((
            name.to_string(),
            challenge_key_id.to_string(),
            challenge.to_string(),
        ));
        Ok(self.assertion.clone())
    }
}
