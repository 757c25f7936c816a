//! Transport abstraction
//!
//! The session only needs ordered, reliable frames in both directions.
//! `WebSocketTransport` provides them over tokio-tungstenite; tests plug in
//! an in-memory transport instead.

use std::net::SocketAddr;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{lookup_host, TcpSocket};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::debug;

use crate::error::BotError;

/// Something read off the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// One frame of data
    Frame(Vec<u8>),
    /// The connection is gone, with the close code if one was sent
    Closed(Option<u16>),
}

/// Write half of a connection
#[async_trait]
pub trait FrameWriter: Send {
    async fn send(&mut self, data: Vec<u8>) -> Result<(), BotError>;
}

/// Read half of a connection
#[async_trait]
pub trait FrameReader: Send {
    async fn recv(&mut self) -> Result<Inbound, BotError>;
}

/// Opens connections
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(
        &self,
        url: &str,
    ) -> Result<(Box<dyn FrameWriter>, Box<dyn FrameReader>), BotError>;
}

/// WebSocket transport, optionally bound to a local address
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransport {
    local_host: Option<String>,
}

impl WebSocketTransport {
    pub fn new(local_host: Option<String>) -> Self {
        Self { local_host }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(
        &self,
        url: &str,
    ) -> Result<(Box<dyn FrameWriter>, Box<dyn FrameReader>), BotError> {
        let Some(local_host) = &self.local_host else {
            let (ws_stream, _) = tokio_tungstenite::connect_async(url).await?;
            return Ok(halves(ws_stream));
        };

        let request = url.into_client_request()?;
        let host = request.uri().host().unwrap_or_default().to_string();
        let port = request.uri().port_u16().unwrap_or(80);

        let remote = first_addr((host.as_str(), port)).await?;
        let local = first_addr((local_host.as_str(), 0)).await?;
        debug!("Binding to {} before connecting to {}", local, remote);

        let socket = if remote.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.bind(local)?;
        let stream = socket.connect(remote).await?;

        let (ws_stream, _) = tokio_tungstenite::client_async(request, stream).await?;
        Ok(halves(ws_stream))
    }
}

async fn first_addr(host: (&str, u16)) -> Result<SocketAddr, BotError> {
    lookup_host(host).await?.next().ok_or_else(|| {
        BotError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("could not resolve {}", host.0),
        ))
    })
}

fn halves<S>(ws_stream: WebSocketStream<S>) -> (Box<dyn FrameWriter>, Box<dyn FrameReader>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, stream) = ws_stream.split();
    (Box::new(WsWriter { sink }), Box::new(WsReader { stream }))
}

struct WsWriter<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
}

#[async_trait]
impl<S> FrameWriter for WsWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&mut self, data: Vec<u8>) -> Result<(), BotError> {
        // Non-UTF-8 encodings can't travel as text frames
        let message = match String::from_utf8(data) {
            Ok(text) => Message::Text(text.into()),
            Err(e) => Message::Binary(e.into_bytes().into()),
        };
        self.sink.send(message).await?;
        Ok(())
    }
}

struct WsReader<S> {
    stream: SplitStream<WebSocketStream<S>>,
}

#[async_trait]
impl<S> FrameReader for WsReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn recv(&mut self) -> Result<Inbound, BotError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Inbound::Frame(text.as_bytes().to_vec())),
                Some(Ok(Message::Binary(data))) => return Ok(Inbound::Frame(data.to_vec())),
                Some(Ok(Message::Close(frame))) => {
                    return Ok(Inbound::Closed(frame.map(|f| u16::from(f.code))));
                }
                Some(Ok(_)) => {
                    // Ping/pong are answered by tungstenite
                }
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(Inbound::Closed(None)),
            }
        }
    }
}
