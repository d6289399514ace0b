/*
[INPUT]:  Session configuration, protocol adapters and subscription callbacks
[OUTPUT]: Reconnecting WebSocket sessions and their transport seams
[POS]:    WebSocket layer - connection, framing, registry and session engine
[UPDATE]: When adding transports or changing session lifecycle
*/

pub mod codec;
pub mod connection;
pub mod registry;
pub mod session;
pub mod transport;

pub use codec::{BinaryPayload, decode_binary, decode_frame};
pub use connection::{ConnectRequest, Connection, Connector, Frame, FrameSink, FrameStream};
pub use registry::{Callback, KeyList, Registry, Subscription, callback};
pub use session::{Session, SessionState};
pub use transport::TungsteniteConnector;
