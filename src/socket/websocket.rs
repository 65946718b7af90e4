//! Socket.IO WebSocket connection and frame handling

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use super::frame;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

pub struct EventSocket {
    stream: WsStream,
}

impl EventSocket {
    /// Connect to the socket.io WebSocket endpoint.
    ///
    /// Auth is sent afterwards in the namespace connect packet, not as headers.
    pub async fn connect(url: &Url) -> Result<Self> {
        tracing::info!("Connecting WebSocket to {}", url);

        let (stream, response) = connect_async(url.as_str())
            .await
            .context("WebSocket connection failed")?;

        tracing::info!("WebSocket connected (status={})", response.status());

        Ok(Self { stream })
    }

    /// Send a text frame.
    pub async fn send_text(&mut self, msg: &str) -> Result<()> {
        tracing::debug!("WS send: {}", frame::redacted(msg));
        self.stream
            .send(Message::Text(msg.to_string()))
            .await
            .context("Failed to send WebSocket message")
    }

    /// Receive the next text frame, ignoring WebSocket pings/pongs.
    ///
    /// Engine.IO pings (`2`) are answered with `3` here. The server closes
    /// the connection after `pingTimeout` without a pong. Events sent with
    /// an ack id (`42<id>[..]`) are acknowledged with `43<id>[]`, otherwise
    /// the server keeps waiting on the callback.
    pub async fn recv_frame(&mut self) -> Result<Option<String>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    tracing::debug!("WS recv: {}", text);

                    if text == "2" {
                        if let Err(e) = self.stream.send(Message::Text(frame::PONG.into())).await {
                            tracing::warn!("Failed to send Engine.IO pong: {:#}", e);
                        }
                    } else if let Some(ack_id) = frame::event_ack_id(&text) {
                        let ack = frame::ack_packet(ack_id);
                        tracing::debug!("Socket.IO ack: {}", ack);
                        if let Err(e) = self.stream.send(Message::Text(ack)).await {
                            tracing::warn!("Failed to send Socket.IO ack: {:#}", e);
                        }
                    }

                    return Ok(Some(text));
                }
                Some(Ok(Message::Ping(data))) => {
                    self.stream
                        .send(Message::Pong(data))
                        .await
                        .context("Failed to send pong")?;
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!("WebSocket closed: {:?}", frame);
                    return Ok(None);
                }
                Some(Ok(other)) => {
                    tracing::debug!("WS frame (ignored): {:?}", other);
                }
                Some(Err(e)) => {
                    return Err(e).context("WebSocket receive error");
                }
                None => {
                    return Ok(None);
                }
            }
        }
    }
}
