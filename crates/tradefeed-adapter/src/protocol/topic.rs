/*
[INPUT]:  Topic/room subscriptions with optional key lists; inbound event objects
[OUTPUT]: method/keys or join/leave messages; field-based routing to topics
[POS]:    Protocol layer - topic feeds (token launches, trades, platform rooms)
[UPDATE]: When the feed adds topics or changes event shapes
*/

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::info;

use super::{Dispatch, Protocol};
use crate::config::SessionConfig;
use crate::error::Result;
use crate::ws::registry::{Callback, KeyList, Registry};
use crate::ws::session::Session;

pub const TOPIC_NEW_TOKEN: &str = "subscribeNewToken";
pub const TOPIC_MIGRATION: &str = "subscribeMigration";
pub const TOPIC_ACCOUNT_TRADE: &str = "subscribeAccountTrade";
pub const TOPIC_TOKEN_TRADE: &str = "subscribeTokenTrade";

pub const ROOM_NEW_PAIRS: &str = "new_pairs";
pub const ROOM_MIGRATIONS: &str = "migrations";
pub const ROOM_SOL_PRICE: &str = "sol_price";
/// Per-token rooms are named `b-<address>`
pub const TOKEN_ROOM_PREFIX: &str = "b-";

const UNSUBSCRIBE_PREFIX: &str = "un";
/// Informational server messages carry this field and are only logged
const INFO_FIELD: &str = "message";
const ROOM_FIELD: &str = "room";

/// Wire shape of subscribe/unsubscribe messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicDialect {
    /// `{"method": "<topic>", "keys": [..]}`, unsubscribe via `un<topic>`
    #[default]
    MethodKeys,
    /// `{"action": "join" | "leave", "room": "<room>"}`
    RoomAction,
}

/// Key list attached to a topic subscription (mints, accounts)
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct TopicParams {
    #[serde(default)]
    pub keys: Vec<String>,
}

impl TopicParams {
    pub fn new(keys: Vec<String>) -> Self {
        Self { keys }
    }
}

impl KeyList for TopicParams {
    fn from_keys(keys: Vec<String>) -> Self {
        Self { keys }
    }

    fn keys(&self) -> &[String] {
        &self.keys
    }

    fn union(&mut self, addition: &[String]) -> usize {
        let before = self.keys.len();
        for key in addition {
            if !self.keys.contains(key) {
                self.keys.push(key.clone());
            }
        }
        self.keys.len() - before
    }

    fn subtract(&mut self, subset: &[String]) {
        self.keys.retain(|key| !subset.contains(key));
    }
}

/// Unsubscribe arguments. Empty `keys` drops the whole subscription;
/// otherwise only those keys are removed and the topic stays registered
/// until its list is empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicUnsubscribe {
    pub keys: Vec<String>,
}

impl TopicUnsubscribe {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn keys(keys: Vec<String>) -> Self {
        Self { keys }
    }
}

/// One routing rule; rules are evaluated in order and the first match wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    /// `room` field equal to a registered key routes to that key
    Room,
    /// Field present at all
    Present { field: String, topic: String },
    /// Field value is one of the keys tracked by `topic`
    Tracked { field: String, topic: String },
    /// Field equals a literal
    Equals {
        field: String,
        value: String,
        topic: String,
    },
}

impl Rule {
    pub fn present(field: &str, topic: &str) -> Self {
        Rule::Present {
            field: field.to_string(),
            topic: topic.to_string(),
        }
    }

    pub fn tracked(field: &str, topic: &str) -> Self {
        Rule::Tracked {
            field: field.to_string(),
            topic: topic.to_string(),
        }
    }

    pub fn equals(field: &str, value: &str, topic: &str) -> Self {
        Rule::Equals {
            field: field.to_string(),
            value: value.to_string(),
            topic: topic.to_string(),
        }
    }

    /// Topic this rule routes `message` to, if it matches
    pub fn classify(
        &self,
        message: &Map<String, Value>,
        registry: &Registry<TopicParams>,
    ) -> Option<String> {
        match self {
            Rule::Room => {
                let room = message.get(ROOM_FIELD)?.as_str()?;
                registry.contains(room).then(|| room.to_string())
            }
            Rule::Present { field, topic } => message.contains_key(field).then(|| topic.clone()),
            Rule::Tracked { field, topic } => {
                let value = message.get(field)?.as_str()?;
                registry
                    .params(topic)
                    .is_some_and(|params| params.contains_key(value))
                    .then(|| topic.clone())
            }
            Rule::Equals {
                field,
                value,
                topic,
            } => (message.get(field)?.as_str()? == value).then(|| topic.clone()),
        }
    }
}

/// Routing table for the token-launch feed and platform rooms, in priority
/// order: room match, new token, tracked mint trade, tracked account trade,
/// migration.
pub fn default_rules() -> Vec<Rule> {
    vec![
        Rule::Room,
        Rule::present("name", TOPIC_NEW_TOKEN),
        Rule::tracked("mint", TOPIC_TOKEN_TRADE),
        Rule::tracked("traderPublicKey", TOPIC_ACCOUNT_TRADE),
        Rule::equals("txType", "migrate", TOPIC_MIGRATION),
    ]
}

/// Topic/room protocol
#[derive(Debug, Clone)]
pub struct TopicProtocol {
    dialect: TopicDialect,
    rules: Vec<Rule>,
}

impl TopicProtocol {
    pub fn new(dialect: TopicDialect) -> Self {
        Self {
            dialect,
            rules: default_rules(),
        }
    }

    /// Replace the routing table
    pub fn with_rules(mut self, rules: Vec<Rule>) -> Self {
        self.rules = rules;
        self
    }

    pub fn dialect(&self) -> TopicDialect {
        self.dialect
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }
}

impl Default for TopicProtocol {
    fn default() -> Self {
        Self::new(TopicDialect::MethodKeys)
    }
}

impl Protocol for TopicProtocol {
    type Params = TopicParams;
    type Unsubscribe = TopicUnsubscribe;

    fn build_subscribe(&self, key: &str, params: &TopicParams) -> Result<Value> {
        Ok(match self.dialect {
            TopicDialect::MethodKeys => json!({ "method": key, "keys": params.keys }),
            TopicDialect::RoomAction => json!({ "action": "join", "room": key }),
        })
    }

    fn build_unsubscribe(&self, key: &str, args: &TopicUnsubscribe) -> Result<Value> {
        Ok(match self.dialect {
            TopicDialect::MethodKeys => json!({
                "method": format!("{UNSUBSCRIBE_PREFIX}{key}"),
                "keys": args.keys,
            }),
            TopicDialect::RoomAction => json!({ "action": "leave", "room": key }),
        })
    }

    fn dispatch(&self, message: Value, registry: &Registry<TopicParams>) -> Dispatch {
        let Some(fields) = message.as_object() else {
            return Dispatch::Unrouted(message);
        };

        if let Some(info) = fields.get(INFO_FIELD) {
            info!(message = %info, "feed message");
            return Dispatch::Handled;
        }

        match self.rules.iter().find_map(|rule| rule.classify(fields, registry)) {
            Some(key) => Dispatch::Deliver {
                key,
                payload: message,
            },
            None => Dispatch::Unrouted(message),
        }
    }

    fn forget(&self, registry: &mut Registry<TopicParams>, key: &str, args: &TopicUnsubscribe) {
        if args.keys.is_empty() {
            registry.remove(key);
            return;
        }
        if registry.remove_keys(key, &args.keys) == Some(0) {
            registry.remove(key);
        }
    }
}

/// Session speaking the topic/room protocol
pub type TopicSession = Session<TopicProtocol>;

impl Session<TopicProtocol> {
    /// Session for the token-launch feed
    pub fn pumpportal() -> Self {
        Session::new(SessionConfig::pumpportal(), TopicProtocol::new(TopicDialect::MethodKeys))
    }

    /// Session for platform rooms; attach an authenticator before connecting
    pub fn axiom() -> Self {
        Session::new(SessionConfig::axiom(), TopicProtocol::new(TopicDialect::RoomAction))
    }

    pub async fn subscribe_new_token(&self, callback: Callback) -> bool {
        self.subscribe_method(TOPIC_NEW_TOKEN, callback, TopicParams::default())
            .await
    }

    pub async fn subscribe_migration(&self, callback: Callback) -> bool {
        self.subscribe_method(TOPIC_MIGRATION, callback, TopicParams::default())
            .await
    }

    /// Trades for the given mints. Keys already tracked are kept.
    pub async fn subscribe_token_trade(&self, mints: Vec<String>, callback: Callback) -> bool {
        self.subscribe_tracked(TOPIC_TOKEN_TRADE, mints, callback).await
    }

    /// Trades by the given accounts. Keys already tracked are kept.
    pub async fn subscribe_account_trade(&self, accounts: Vec<String>, callback: Callback) -> bool {
        self.subscribe_tracked(TOPIC_ACCOUNT_TRADE, accounts, callback)
            .await
    }

    /// Track more mints on an existing token-trade subscription
    pub async fn watch_tokens(&self, mints: &[String]) -> bool {
        self.merge_params(TOPIC_TOKEN_TRADE, mints).await
    }

    /// Track more accounts on an existing account-trade subscription
    pub async fn watch_accounts(&self, accounts: &[String]) -> bool {
        self.merge_params(TOPIC_ACCOUNT_TRADE, accounts).await
    }

    pub async fn unsubscribe_new_token(&self) -> bool {
        self.unsubscribe_method(TOPIC_NEW_TOKEN, TopicUnsubscribe::all())
            .await
    }

    pub async fn unsubscribe_migration(&self) -> bool {
        self.unsubscribe_method(TOPIC_MIGRATION, TopicUnsubscribe::all())
            .await
    }

    /// Stop tracking some mints; an empty list drops the subscription
    pub async fn unsubscribe_token_trade(&self, mints: Vec<String>) -> bool {
        self.unsubscribe_method(TOPIC_TOKEN_TRADE, TopicUnsubscribe::keys(mints))
            .await
    }

    /// Stop tracking some accounts; an empty list drops the subscription
    pub async fn unsubscribe_account_trade(&self, accounts: Vec<String>) -> bool {
        self.unsubscribe_method(TOPIC_ACCOUNT_TRADE, TopicUnsubscribe::keys(accounts))
            .await
    }

    pub async fn subscribe_room(&self, room: &str, callback: Callback) -> bool {
        self.subscribe_method(room, callback, TopicParams::default())
            .await
    }

    pub async fn unsubscribe_room(&self, room: &str) -> bool {
        self.unsubscribe_method(room, TopicUnsubscribe::all()).await
    }

    pub async fn subscribe_new_pairs(&self, callback: Callback) -> bool {
        self.subscribe_room(ROOM_NEW_PAIRS, callback).await
    }

    pub async fn subscribe_migrations(&self, callback: Callback) -> bool {
        self.subscribe_room(ROOM_MIGRATIONS, callback).await
    }

    pub async fn subscribe_sol_price(&self, callback: Callback) -> bool {
        self.subscribe_room(ROOM_SOL_PRICE, callback).await
    }

    /// Real-time updates for one token, room `b-<address>`
    pub async fn subscribe_token_room(&self, address: &str, callback: Callback) -> bool {
        self.subscribe_room(&token_room(address), callback).await
    }

    async fn subscribe_tracked(&self, topic: &str, keys: Vec<String>, callback: Callback) -> bool {
        let mut params = self.params(topic).unwrap_or_default();
        params.union(&keys);
        self.subscribe_method(topic, callback, params).await
    }
}

pub fn token_room(address: &str) -> String {
    format!("{TOKEN_ROOM_PREFIX}{address}")
}
