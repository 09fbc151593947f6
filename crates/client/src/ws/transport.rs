//! Publish/subscribe transport over a WebSocket, using tokio-tungstenite.
//!
//! [`Transport`] is the seam the reconnection controller talks to. The
//! production implementation speaks STOMP frames; tests plug in their own.

use async_trait::async_trait;
use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::frame::{self, Frame};
use super::TransportError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What the controller needs to open a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Full socket URL, e.g. `wss://campus.example.edu/ws`.
    pub url: String,
    /// Bearer credential of the signed-in user.
    pub token: String,
}

/// Events produced by an open session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Message {
        destination: String,
        subscription: Option<String>,
        body: String,
    },
    /// The session ended without an explicit close from our side.
    Closed { reason: String },
}

/// Opens transport sessions.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(
        &self,
        request: &ConnectRequest,
    ) -> Result<(Box<dyn TransportSession>, UnboundedReceiver<TransportEvent>), TransportError>;
}

/// An open session: subscription management and close.
#[async_trait]
pub trait TransportSession: Send {
    /// Register a subscription, returning its id.
    async fn subscribe(&mut self, destination: &str) -> Result<String, TransportError>;
    async fn unsubscribe(&mut self, subscription_id: &str) -> Result<(), TransportError>;
    /// Close the session. Must be safe to call on an already broken session.
    async fn close(&mut self);
}

/// STOMP over WebSocket.
#[derive(Debug, Clone, Default)]
pub struct StompTransport;

impl StompTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for StompTransport {
    async fn connect(
        &self,
        request: &ConnectRequest,
    ) -> Result<(Box<dyn TransportSession>, UnboundedReceiver<TransportEvent>), TransportError> {
        let host = url::Url::parse(&request.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| "localhost".to_string());

        let (ws_stream, _response) = connect_async(request.url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();

        let connect_frame = Frame::connect(&host, &request.token);
        write
            .send(Message::Text(connect_frame.encode().into()))
            .await
            .map_err(|e| TransportError::Handshake(e.to_string()))?;

        await_connected(&mut read).await?;
        crate::log_info!("STOMP session established with {}", host);

        let (events_tx, events_rx) = unbounded();
        let reader = tokio::spawn(read_loop(read, events_tx));

        let session = StompSession {
            write,
            reader: Some(reader),
            next_subscription: 0,
            closed: false,
        };
        Ok((Box::new(session), events_rx))
    }
}

/// Wait for the CONNECTED reply, skipping heart-beats.
async fn await_connected(read: &mut SplitStream<WsStream>) -> Result<(), TransportError> {
    while let Some(msg) = read.next().await {
        let msg = msg.map_err(|e| TransportError::Handshake(e.to_string()))?;
        let text = match msg {
            Message::Text(text) => text.to_string(),
            Message::Close(_) => break,
            _ => continue,
        };
        let Some(frame) = Frame::decode(&text)? else {
            continue;
        };
        return match frame.command.as_str() {
            frame::CONNECTED => Ok(()),
            frame::ERROR => Err(TransportError::Rejected(
                frame
                    .get("message")
                    .map(str::to_string)
                    .unwrap_or_else(|| frame.body.clone()),
            )),
            other => Err(TransportError::Protocol(format!(
                "expected CONNECTED, got {other}"
            ))),
        };
    }
    Err(TransportError::Closed)
}

async fn read_loop(mut read: SplitStream<WsStream>, events: UnboundedSender<TransportEvent>) {
    let reason = loop {
        let Some(msg_result) = read.next().await else {
            break "stream ended".to_string();
        };
        match msg_result {
            Ok(Message::Text(text)) => match Frame::decode(&text) {
                Ok(Some(frame)) => match frame.command.as_str() {
                    frame::MESSAGE => {
                        let event = TransportEvent::Message {
                            destination: frame.get("destination").unwrap_or_default().to_string(),
                            subscription: frame.get("subscription").map(str::to_string),
                            body: frame.body,
                        };
                        if events.unbounded_send(event).is_err() {
                            // Nobody is listening any more.
                            return;
                        }
                    }
                    frame::ERROR => {
                        break frame
                            .get("message")
                            .map(str::to_string)
                            .unwrap_or_else(|| "server sent ERROR".to_string());
                    }
                    other => crate::log_debug!("Ignoring STOMP {} frame", other),
                },
                Ok(None) => {}
                Err(e) => crate::log_warn!("Dropping undecodable frame: {}", e),
            },
            Ok(Message::Close(_)) => break "close frame received".to_string(),
            Ok(Message::Ping(data)) => {
                // Pong is handled automatically by tungstenite
                crate::log_debug!("Received ping: {:?}", data);
            }
            Ok(_) => {}
            Err(e) => break e.to_string(),
        }
    };
    crate::log_info!("Notification socket closed: {}", reason);
    let _ = events.unbounded_send(TransportEvent::Closed { reason });
}

struct StompSession {
    write: SplitSink<WsStream, Message>,
    reader: Option<JoinHandle<()>>,
    next_subscription: u32,
    closed: bool,
}

impl StompSession {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.write
            .send(Message::Text(frame.encode().into()))
            .await
            .map_err(|e| TransportError::Protocol(e.to_string()))
    }
}

#[async_trait]
impl TransportSession for StompSession {
    async fn subscribe(&mut self, destination: &str) -> Result<String, TransportError> {
        let id = format!("sub-{}", self.next_subscription);
        self.next_subscription += 1;
        self.send(Frame::subscribe(&id, destination)).await?;
        Ok(id)
    }

    async fn unsubscribe(&mut self, subscription_id: &str) -> Result<(), TransportError> {
        self.send(Frame::unsubscribe(subscription_id)).await
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.send(Frame::disconnect()).await {
            crate::log_debug!("DISCONNECT not delivered: {}", e);
        }
        let _ = self.write.close().await;
        self.closed = true;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

impl Drop for StompSession {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}
