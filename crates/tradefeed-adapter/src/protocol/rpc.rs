/*
[INPUT]:  JSON-RPC subscribe methods with positional params; acks and notifications
[OUTPUT]: JSON-RPC 2.0 requests, subscription id bookkeeping, notification routing
[POS]:    Protocol layer - chain node pub/sub (account, program, signature, slot, root)
[UPDATE]: When adding subscription methods or changing id correlation
*/

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{Value, json};
use tracing::{error, info, warn};

use super::{Dispatch, Protocol};
use crate::config::SessionConfig;
use crate::error::{FeedError, Result};
use crate::ws::registry::{Callback, Registry};
use crate::ws::session::Session;

pub const JSONRPC_VERSION: &str = "2.0";

pub const ACCOUNT_SUBSCRIBE: &str = "accountSubscribe";
pub const PROGRAM_SUBSCRIBE: &str = "programSubscribe";
pub const SIGNATURE_SUBSCRIBE: &str = "signatureSubscribe";
pub const SLOT_SUBSCRIBE: &str = "slotSubscribe";
pub const ROOT_SUBSCRIBE: &str = "rootSubscribe";

pub const DEFAULT_COMMITMENT: &str = "confirmed";
pub const DEFAULT_ENCODING: &str = "jsonParsed";

const SUBSCRIBE_SUFFIX: &str = "Subscribe";
const UNSUBSCRIBE_SUFFIX: &str = "Unsubscribe";
const NOTIFICATION_SUFFIX: &str = "Notification";

/// Unsubscribe arguments; without an explicit id the one acknowledged for
/// the subscription is used, and with neither the request carries `null`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RpcUnsubscribe {
    pub subscription_id: Option<u64>,
}

impl RpcUnsubscribe {
    pub fn id(subscription_id: u64) -> Self {
        Self {
            subscription_id: Some(subscription_id),
        }
    }
}

#[derive(Debug, Default)]
struct Correlation {
    /// request id -> subscribe method awaiting its ack
    pending: HashMap<u64, String>,
    /// subscribe method -> server-assigned subscription id
    confirmed: HashMap<String, u64>,
}

/// JSON-RPC 2.0 pub/sub protocol.
///
/// Request ids start at 1 and only ever grow for the life of the session,
/// reconnects included.
#[derive(Debug)]
pub struct RpcProtocol {
    next_id: AtomicU64,
    correlation: Mutex<Correlation>,
}

impl Default for RpcProtocol {
    fn default() -> Self {
        Self::new()
    }
}

impl RpcProtocol {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            correlation: Mutex::new(Correlation::default()),
        }
    }

    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Server subscription id acknowledged for `method`
    pub fn subscription_id(&self, method: &str) -> Option<u64> {
        self.lock().confirmed.get(method).copied()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Correlation> {
        self.correlation.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn handle_ack(&self, request_id: Option<u64>, result: &Value) {
        let key = request_id.and_then(|id| self.lock().pending.remove(&id));
        match (result.as_u64(), key) {
            (Some(subscription_id), Some(key)) => {
                info!(request_id, subscription_id, %key, "rpc subscription confirmed");
                self.lock().confirmed.insert(key, subscription_id);
            }
            _ => info!(request_id, %result, "rpc request acknowledged"),
        }
    }
}

/// `accountUnsubscribe` for `accountSubscribe`
pub fn unsubscribe_method_for(method: &str) -> Result<String> {
    method
        .strip_suffix(SUBSCRIBE_SUFFIX)
        .map(|base| format!("{base}{UNSUBSCRIBE_SUFFIX}"))
        .ok_or_else(|| FeedError::Protocol(format!("{method} is not a subscribe method")))
}

/// `accountSubscribe` for `accountNotification`
pub fn subscribe_method_for(notification: &str) -> String {
    match notification.strip_suffix(NOTIFICATION_SUFFIX) {
        Some(base) => format!("{base}{SUBSCRIBE_SUFFIX}"),
        None => notification.to_string(),
    }
}

impl Protocol for RpcProtocol {
    /// Positional params of the subscribe request
    type Params = Vec<Value>;
    type Unsubscribe = RpcUnsubscribe;

    fn build_subscribe(&self, key: &str, params: &Vec<Value>) -> Result<Value> {
        let id = self.next_request_id();
        self.lock().pending.insert(id, key.to_string());
        Ok(json!({
            "jsonrpc": JSONRPC_VERSION,
            "id": id,
            "method": key,
            "params": params,
        }))
    }

    fn build_unsubscribe(&self, key: &str, args: &RpcUnsubscribe) -> Result<Value> {
        let method = unsubscribe_method_for(key)?;
        let confirmed = self.lock().confirmed.remove(key);
        // Sent even without a known id; the params then carry null.
        let subscription_id = args.subscription_id.or(confirmed);
        if subscription_id.is_none() {
            warn!(%key, "no subscription id acknowledged; sending unsubscribe without one");
        }

        Ok(json!({
            "jsonrpc": JSONRPC_VERSION,
            "id": self.next_request_id(),
            "method": method,
            "params": [subscription_id],
        }))
    }

    fn dispatch(&self, message: Value, _registry: &Registry<Vec<Value>>) -> Dispatch {
        let Some(fields) = message.as_object() else {
            return Dispatch::Unrouted(message);
        };

        if let (Some(result), Some(id)) = (fields.get("result"), fields.get("id")) {
            self.handle_ack(id.as_u64(), result);
            return Dispatch::Handled;
        }

        if let (Some(method), Some(params)) = (
            fields.get("method").and_then(Value::as_str),
            fields.get("params"),
        ) {
            return Dispatch::Deliver {
                key: subscribe_method_for(method),
                payload: params.clone(),
            };
        }

        if let Some(err) = fields.get("error") {
            let err = FeedError::Protocol(format!("rpc error response: {err}"));
            error!(id = ?fields.get("id"), error = %err, "rpc error");
            return Dispatch::Handled;
        }

        Dispatch::Unrouted(message)
    }
}

/// Session speaking JSON-RPC pub/sub
pub type RpcSession = Session<RpcProtocol>;

impl Session<RpcProtocol> {
    /// Session against the public mainnet node
    pub fn solana_mainnet() -> Self {
        Session::new(SessionConfig::solana_mainnet(), RpcProtocol::new())
    }

    pub async fn subscribe_account(
        &self,
        account: &str,
        commitment: &str,
        encoding: &str,
        callback: Callback,
    ) -> bool {
        let params = vec![
            json!(account),
            json!({ "commitment": commitment, "encoding": encoding }),
        ];
        self.subscribe_method(ACCOUNT_SUBSCRIBE, callback, params)
            .await
    }

    pub async fn subscribe_program(
        &self,
        program_id: &str,
        commitment: &str,
        encoding: &str,
        filters: Option<Vec<Value>>,
        callback: Callback,
    ) -> bool {
        let mut config = json!({ "commitment": commitment, "encoding": encoding });
        if let Some(filters) = filters {
            config["filters"] = Value::Array(filters);
        }
        self.subscribe_method(PROGRAM_SUBSCRIBE, callback, vec![json!(program_id), config])
            .await
    }

    pub async fn subscribe_signature(
        &self,
        signature: &str,
        commitment: &str,
        callback: Callback,
    ) -> bool {
        let params = vec![json!(signature), json!({ "commitment": commitment })];
        self.subscribe_method(SIGNATURE_SUBSCRIBE, callback, params)
            .await
    }

    pub async fn subscribe_slot(&self, callback: Callback) -> bool {
        self.subscribe_method(SLOT_SUBSCRIBE, callback, Vec::new())
            .await
    }

    pub async fn subscribe_root(&self, callback: Callback) -> bool {
        self.subscribe_method(ROOT_SUBSCRIBE, callback, Vec::new())
            .await
    }

    /// Server subscription id acknowledged for a subscribe method
    pub fn subscription_id(&self, method: &str) -> Option<u64> {
        self.protocol().subscription_id(method)
    }

    /// Unsubscribe using the acknowledged subscription id
    pub async fn unsubscribe(&self, method: &str) -> bool {
        self.unsubscribe_method(method, RpcUnsubscribe::default())
            .await
    }
}
