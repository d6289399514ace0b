/*
[INPUT]:  ConnectRequest (URL + headers) and connect timeout
[OUTPUT]: tokio-tungstenite backed Connection halves
[POS]:    WebSocket layer - production transport
[UPDATE]: When changing TLS, handshake or frame handling
*/

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use super::connection::{ConnectRequest, Connection, Connector, Frame, FrameSink, FrameStream};
use crate::error::{FeedError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens real WebSocket connections
#[derive(Debug, Clone)]
pub struct TungsteniteConnector {
    connect_timeout: Duration,
}

impl TungsteniteConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TungsteniteConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn open(&self, request: &ConnectRequest) -> Result<Connection> {
        let mut ws_request = request.url.as_str().into_client_request()?;
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| FeedError::Config(format!("invalid header name {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| FeedError::Config(format!("invalid header value for {name}: {e}")))?;
            ws_request.headers_mut().insert(name, value);
        }

        let (ws_stream, response) =
            tokio::time::timeout(self.connect_timeout, connect_async(ws_request))
                .await
                .map_err(|_| FeedError::Timeout {
                    duration: self.connect_timeout.as_secs(),
                })?
                .map_err(FeedError::from_handshake)?;
        debug!(url = %request.url, status = %response.status(), "ws handshake complete");

        let (write, read) = ws_stream.split();
        Ok(Connection::new(
            TungsteniteSink {
                write,
                closed: false,
            },
            TungsteniteStream { read },
        ))
    }
}

struct TungsteniteSink {
    write: SplitSink<WsStream, WsMessage>,
    closed: bool,
}

#[async_trait]
impl FrameSink for TungsteniteSink {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        if self.closed {
            return Err(FeedError::NotConnected);
        }
        let message = match frame {
            Frame::Text(text) => WsMessage::Text(text.into()),
            Frame::Binary(bytes) => WsMessage::Binary(bytes.into()),
        };
        self.write.send(message).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        // Peer may already be gone; a failed close frame is not an error here.
        let _ = self.write.send(WsMessage::Close(None)).await;
        let _ = self.write.close().await;
        Ok(())
    }
}

struct TungsteniteStream {
    read: SplitStream<WsStream>,
}

#[async_trait]
impl FrameStream for TungsteniteStream {
    async fn next_frame(&mut self) -> Option<Result<Frame>> {
        loop {
            match self.read.next().await? {
                Ok(WsMessage::Text(text)) => return Some(Ok(Frame::Text(text.to_string()))),
                Ok(WsMessage::Binary(bytes)) => return Some(Ok(Frame::Binary(bytes.to_vec()))),
                Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) | Ok(WsMessage::Frame(_)) => {}
                Ok(WsMessage::Close(frame)) => {
                    debug!(?frame, "ws close frame received");
                    return None;
                }
                Err(err) => return Some(Err(FeedError::WebSocket(err))),
            }
        }
    }
}
