/*
[INPUT]:  YAML configuration file
[OUTPUT]: Parsed monitor configuration (sessions, subscriptions, auth, alerts)
[POS]:    Configuration layer - session setup
[UPDATE]: When adding new configuration options
*/

use std::collections::HashSet;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tradefeed_adapter::SessionConfig;
use tradefeed_adapter::protocol::PULSE_KEY;

/// Top-level configuration for the feed monitor
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitorConfig {
    /// Sessions to run, one task each
    pub sessions: Vec<SessionSpec>,
    /// Static tokens for sessions with `authenticate: true`
    #[serde(default)]
    pub auth: Option<AuthConfig>,
    /// Webhook receiving disconnect/reconnect alerts
    #[serde(default)]
    pub webhook_url: Option<String>,
}

/// Wire protocol spoken by a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolKind {
    /// `method` + `keys` topics
    Topic,
    /// `join`/`leave` rooms
    Room,
    /// JSON-RPC 2.0 pub/sub
    Rpc,
    /// Binary analytics stream configured by a `userState` document
    Pulse,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionSpec {
    #[serde(flatten)]
    pub session: SessionConfig,
    pub protocol: ProtocolKind,
    #[serde(default)]
    pub authenticate: bool,
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionSpec>,
}

/// One initial subscription.
///
/// Topic and room sessions use `keys`; RPC sessions use positional `params`;
/// Pulse sessions take an optional `user_state` (defaults apply otherwise).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SubscriptionSpec {
    pub key: String,
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default)]
    pub params: Vec<Value>,
    #[serde(default)]
    pub user_state: Option<Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    pub access_token: String,
    pub refresh_token: String,
}

impl MonitorConfig {
    /// Load configuration from YAML file
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sessions.is_empty() {
            bail!("at least one session is required");
        }

        let mut names = HashSet::new();
        for spec in &self.sessions {
            let name = &spec.session.name;
            if !names.insert(name.as_str()) {
                bail!("duplicate session name: {name}");
            }
            if spec.authenticate && self.auth.is_none() {
                bail!("session {name} requires auth tokens but no auth section is configured");
            }
            for subscription in &spec.subscriptions {
                match spec.protocol {
                    ProtocolKind::Rpc if !subscription.keys.is_empty() => {
                        bail!("session {name}: rpc subscription {} takes params, not keys", subscription.key);
                    }
                    ProtocolKind::Topic | ProtocolKind::Room if !subscription.params.is_empty() => {
                        bail!("session {name}: subscription {} takes keys, not params", subscription.key);
                    }
                    ProtocolKind::Pulse if subscription.key != PULSE_KEY => {
                        bail!("session {name}: pulse sessions only accept the {PULSE_KEY} subscription");
                    }
                    _ => {}
                }
                if spec.protocol != ProtocolKind::Pulse && subscription.user_state.is_some() {
                    bail!("session {name}: user_state only applies to pulse sessions");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
sessions:
  - name: pumpportal
    url: wss://pumpportal.fun/api/data
    protocol: topic
    subscriptions:
      - key: subscribeNewToken
      - key: subscribeTokenTrade
        keys: [mintA, mintB]
  - name: solana
    url: wss://api.mainnet-beta.solana.com
    protocol: rpc
    reconnect:
      max_attempts: 3
      base_delay: 2
    subscriptions:
      - key: slotSubscribe
webhook_url: https://hooks.example.test/alerts
"#;

    #[test]
    fn test_parse_sample() {
        let config = MonitorConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.sessions.len(), 2);

        let topic = &config.sessions[0];
        assert_eq!(topic.protocol, ProtocolKind::Topic);
        assert_eq!(topic.session.reconnect.max_attempts, 5);
        assert_eq!(topic.subscriptions[1].keys, vec!["mintA", "mintB"]);

        let rpc = &config.sessions[1];
        assert_eq!(rpc.protocol, ProtocolKind::Rpc);
        assert_eq!(rpc.session.reconnect.max_attempts, 3);
        assert_eq!(rpc.session.reconnect.base_delay.as_secs(), 2);
        assert!(config.webhook_url.is_some());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let yaml = r#"
sessions:
  - { name: a, url: "wss://x.test", protocol: topic }
  - { name: a, url: "wss://y.test", protocol: room }
"#;
        let err = MonitorConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("duplicate session name"));
    }

    #[test]
    fn test_authenticate_requires_tokens() {
        let yaml = r#"
sessions:
  - { name: rooms, url: "wss://x.test", protocol: room, authenticate: true }
"#;
        assert!(MonitorConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_rpc_subscription_with_keys_rejected() {
        let yaml = r#"
sessions:
  - name: rpc
    url: "wss://x.test"
    protocol: rpc
    subscriptions:
      - { key: accountSubscribe, keys: [abc] }
"#;
        let err = MonitorConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("takes params"));
    }

    #[test]
    fn test_pulse_session_with_user_state() {
        let yaml = r#"
sessions:
  - name: pulse
    url: "wss://pulse.test/ws"
    protocol: pulse
    authenticate: true
    subscriptions:
      - key: pulse
        user_state: { type: userState, state: { tables: { newPairs: true } } }
auth: { access_token: a, refresh_token: r }
"#;
        let config = MonitorConfig::from_yaml(yaml).unwrap();
        let user_state = config.sessions[0].subscriptions[0].user_state.as_ref().unwrap();
        assert_eq!(user_state["type"], "userState");

        let wrong_key = yaml.replace("- key: pulse", "- key: new_pairs");
        assert!(MonitorConfig::from_yaml(&wrong_key).is_err());
    }

    #[test]
    fn test_empty_sessions_rejected() {
        assert!(MonitorConfig::from_yaml("sessions: []").is_err());
    }
}
