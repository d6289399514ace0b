/*
[INPUT]:  A userState filter document; decoded binary analytics frames
[OUTPUT]: The userState message on connect/replay; every frame routed to the pulse callback
[POS]:    Protocol layer - platform Pulse stream (MessagePack lists)
[UPDATE]: When the stream changes its configuration message or framing
*/

use serde_json::{Value, json};
use tracing::debug;

use super::{Dispatch, Protocol};
use crate::config::SessionConfig;
use crate::error::{FeedError, Result};
use crate::ws::registry::{Callback, Registry};
use crate::ws::session::Session;

/// Registry key of the single Pulse subscription
pub const PULSE_KEY: &str = "pulse";
pub const USER_STATE_TYPE: &str = "userState";

/// Filter document used when the caller supplies none: the three main
/// tables with no filters applied.
pub fn default_user_state() -> Value {
    json!({
        "type": USER_STATE_TYPE,
        "state": {
            "tables": {
                "newPairs": true,
                "finalStretch": true,
                "migrated": true,
            },
            "filters": {
                "newPairs": {},
                "finalStretch": {},
                "migrated": {},
            },
        },
    })
}

/// Pulse analytics stream.
///
/// The stream is configured by sending the stored `userState` document
/// and has no subscription ids or topics: every decoded frame, whatever
/// its shape, belongs to [`PULSE_KEY`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PulseProtocol;

impl PulseProtocol {
    pub fn new() -> Self {
        Self
    }
}

impl Protocol for PulseProtocol {
    /// The `userState` document sent on every connect
    type Params = Value;
    type Unsubscribe = ();

    fn build_subscribe(&self, key: &str, params: &Value) -> Result<Value> {
        if key != PULSE_KEY {
            return Err(FeedError::Protocol(format!(
                "pulse stream only accepts the {PULSE_KEY} subscription, got {key}"
            )));
        }
        Ok(params.clone())
    }

    fn build_unsubscribe(&self, key: &str, _args: &()) -> Result<Value> {
        Err(FeedError::Protocol(format!(
            "pulse stream has no unsubscribe message for {key}; close the session instead"
        )))
    }

    fn dispatch(&self, message: Value, registry: &Registry<Value>) -> Dispatch {
        if !registry.contains(PULSE_KEY) {
            debug!("pulse frame received before subscribing");
        }
        Dispatch::Deliver {
            key: PULSE_KEY.to_string(),
            payload: message,
        }
    }
}

/// Session on the Pulse analytics stream
pub type PulseSession = Session<PulseProtocol>;

impl Session<PulseProtocol> {
    /// Session against the platform's Pulse endpoint; attach an
    /// authenticator before connecting.
    pub fn axiom_pulse() -> Self {
        Session::new(SessionConfig::axiom_pulse(), PulseProtocol::new())
    }

    /// Send `user_state` (or the default filters) and route every frame to
    /// `callback`. The document is resent after each reconnect.
    pub async fn subscribe_pulse(&self, callback: Callback, user_state: Option<Value>) -> bool {
        let user_state = user_state.unwrap_or_else(default_user_state);
        self.subscribe_method(PULSE_KEY, callback, user_state).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::codec::decode_frame;
    use crate::ws::connection::Frame;
    use crate::ws::registry::callback;

    fn subscribed() -> Registry<Value> {
        let mut registry = Registry::new();
        registry.put(PULSE_KEY, callback(|_| async { Ok(()) }), default_user_state());
        registry
    }

    #[test]
    fn test_subscribe_sends_stored_user_state() {
        let state = json!({"type": "userState", "state": {"tables": {"newPairs": true}}});
        assert_eq!(PulseProtocol.build_subscribe(PULSE_KEY, &state).unwrap(), state);
        assert!(PulseProtocol.build_subscribe("new_pairs", &state).is_err());
    }

    #[test]
    fn test_default_user_state_enables_main_tables() {
        let state = default_user_state();
        assert_eq!(state["type"], "userState");
        assert_eq!(state["state"]["tables"]["migrated"], true);
    }

    #[test]
    fn test_msgpack_list_is_delivered() {
        let frame = rmp_serde::to_vec(&(1, ("mintA", 2.5))).unwrap();
        let message = decode_frame(Frame::Binary(frame)).unwrap();

        assert_eq!(
            PulseProtocol.dispatch(message, &subscribed()),
            Dispatch::Deliver {
                key: PULSE_KEY.to_string(),
                payload: json!([1, ["mintA", 2.5]]),
            }
        );
    }

    #[test]
    fn test_undecodable_bytes_are_delivered_as_base64() {
        let message = decode_frame(Frame::Binary(vec![0xc1, 0xff, 0xfe])).unwrap();
        match PulseProtocol.dispatch(message, &subscribed()) {
            Dispatch::Deliver { payload, .. } => {
                assert!(payload.as_str().unwrap().starts_with("base64:"));
            }
            other => panic!("unexpected dispatch: {other:?}"),
        }
    }

    #[test]
    fn test_unsubscribe_is_not_supported() {
        assert!(PulseProtocol.build_unsubscribe(PULSE_KEY, &()).is_err());
    }
}
