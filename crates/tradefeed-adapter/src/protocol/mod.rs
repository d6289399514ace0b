/*
[INPUT]:  Subscription keys/params and parsed inbound messages
[OUTPUT]: Wire messages to send and routing decisions for the session
[POS]:    Protocol layer - extension points plugged into the session engine
[UPDATE]: When adding a wire protocol or changing routing
*/

pub mod pulse;
pub mod rpc;
pub mod topic;

use std::fmt;

use serde_json::Value;

use crate::error::Result;
use crate::ws::registry::Registry;

pub use pulse::{PULSE_KEY, PulseProtocol, PulseSession, default_user_state};
pub use rpc::{RpcProtocol, RpcSession, RpcUnsubscribe};
pub use topic::{
    Rule, TopicDialect, TopicParams, TopicProtocol, TopicSession, TopicUnsubscribe, default_rules,
};

/// What the session should do with one inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Invoke the callback registered under `key` with `payload`
    Deliver { key: String, payload: Value },
    /// Consumed by the protocol itself (acks, informational messages)
    Handled,
    /// Matched no known shape
    Unrouted(Value),
}

/// Protocol-specific behaviour of a session.
///
/// The session owns the connection, registry and reconnect loop; a protocol
/// only builds messages and classifies what comes back.
pub trait Protocol: Send + Sync + 'static {
    /// Parameters stored per subscription and replayed after reconnects
    type Params: Clone + fmt::Debug + Send + Sync + 'static;
    /// Extra arguments accepted by unsubscribe
    type Unsubscribe: fmt::Debug + Send + Sync;

    fn build_subscribe(&self, key: &str, params: &Self::Params) -> Result<Value>;

    fn build_unsubscribe(&self, key: &str, args: &Self::Unsubscribe) -> Result<Value>;

    /// Classify one parsed message. Runs with the registry locked and must
    /// not block.
    fn dispatch(&self, message: Value, registry: &Registry<Self::Params>) -> Dispatch;

    /// Local registry change for an unsubscribe; runs before the message is
    /// built and sent.
    fn forget(&self, registry: &mut Registry<Self::Params>, key: &str, _args: &Self::Unsubscribe) {
        registry.remove(key);
    }
}
