/*
[INPUT]:  Endpoint URL and handshake headers
[OUTPUT]: One full-duplex frame channel split into sink and stream halves
[POS]:    WebSocket layer - transport-independent connection abstraction
[UPDATE]: When adding frame kinds or transport capabilities
*/

use async_trait::async_trait;

use crate::error::Result;

/// One inbound or outbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    pub fn text(value: impl Into<String>) -> Self {
        Frame::Text(value.into())
    }
}

/// Handshake parameters for opening a connection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

impl ConnectRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Outbound half of a connection
#[async_trait]
pub trait FrameSink: Send {
    /// Send one frame; fails once the connection is gone.
    async fn send(&mut self, frame: Frame) -> Result<()>;

    /// Close the connection. Closing twice is a no-op.
    async fn close(&mut self) -> Result<()>;
}

/// Inbound half of a connection
#[async_trait]
pub trait FrameStream: Send {
    /// Next frame. `None` when the remote closed cleanly, `Some(Err(_))`
    /// on an abnormal close.
    async fn next_frame(&mut self) -> Option<Result<Frame>>;
}

/// A live connection as returned by a [`Connector`]
pub struct Connection {
    pub sink: Box<dyn FrameSink>,
    pub stream: Box<dyn FrameStream>,
}

impl Connection {
    pub fn new(sink: impl FrameSink + 'static, stream: impl FrameStream + 'static) -> Self {
        Self {
            sink: Box::new(sink),
            stream: Box::new(stream),
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

/// Opens connections; one call per connection attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, request: &ConnectRequest) -> Result<Connection>;
}
