/*
[INPUT]:  Endpoint URLs, static handshake headers, timeouts, retry budget
[OUTPUT]: SessionConfig and ReconnectPolicy consumed by the session engine
[POS]:    Configuration layer - per-session connection settings
[UPDATE]: When adding connection options or changing reconnect defaults
*/

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Token-launch data feed
pub const PUMPPORTAL_WS_URL: &str = "wss://pumpportal.fun/api/data";
/// Public Solana mainnet RPC node
pub const SOLANA_MAINNET_WS_URL: &str = "wss://api.mainnet-beta.solana.com";
/// Trading platform room cluster
pub const AXIOM_WS_URL: &str = "wss://cluster3.axiom.trade/";
/// Trading platform backup cluster
pub const AXIOM_BACKUP_WS_URL: &str = "wss://cluster-usc2.axiom.trade/";
/// Trading platform binary analytics stream
pub const AXIOM_PULSE_WS_URL: &str = "wss://pulse2.axiom.trade/ws";

const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_BASE_DELAY_SECS: u64 = 5;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36 OPR/120.0.0.0";

/// Bounded retry budget for the reconnect protocol
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReconnectPolicy {
    /// Number of connection attempts per reconnect cycle
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for every later attempt
    #[serde(default = "default_base_delay", with = "duration_secs")]
    pub base_delay: Duration,
}

impl ReconnectPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// A policy that never retries; the session stops at the first drop.
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay before the given 1-based attempt.
    ///
    /// The first attempt is immediate, attempt `n > 1` waits
    /// `base_delay * 2^(n-2)`.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exp = (attempt - 2).min(31);
        self.base_delay.saturating_mul(1u32 << exp)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: default_base_delay(),
        }
    }
}

/// Cookie names carrying the access and refresh tokens during the handshake
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CookieNames {
    pub access: String,
    pub refresh: String,
}

impl Default for CookieNames {
    fn default() -> Self {
        Self {
            access: "auth-access-token".to_string(),
            refresh: "auth-refresh-token".to_string(),
        }
    }
}

/// Connection settings for one session
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// Name used in logs and notifications
    pub name: String,
    /// WebSocket endpoint
    pub url: String,
    /// Static identification headers sent with every handshake
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default = "default_connect_timeout", with = "duration_secs")]
    pub connect_timeout: Duration,
    #[serde(default)]
    pub cookie_names: CookieNames,
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
}

impl SessionConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            headers: Vec::new(),
            connect_timeout: default_connect_timeout(),
            cookie_names: CookieNames::default(),
            reconnect: ReconnectPolicy::default(),
        }
    }

    /// Token-launch feed, no authentication
    pub fn pumpportal() -> Self {
        Self::new("pumpportal", PUMPPORTAL_WS_URL)
    }

    /// Solana JSON-RPC subscriptions
    pub fn solana_mainnet() -> Self {
        Self::new("solana-rpc", SOLANA_MAINNET_WS_URL)
    }

    /// Trading platform rooms; requires cookie authentication
    pub fn axiom() -> Self {
        Self::new("axiom", AXIOM_WS_URL).with_browser_headers()
    }

    /// Trading platform Pulse stream; same handshake as the rooms
    pub fn axiom_pulse() -> Self {
        Self::new("axiom-pulse", AXIOM_PULSE_WS_URL).with_browser_headers()
    }

    fn with_browser_headers(self) -> Self {
        self.with_header("Origin", "https://axiom.trade")
            .with_header("Cache-Control", "no-cache")
            .with_header("Accept-Language", "en-US,en;q=0.9,es;q=0.8")
            .with_header("Pragma", "no-cache")
            .with_header("User-Agent", BROWSER_USER_AGENT)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_base_delay() -> Duration {
    Duration::from_secs(DEFAULT_BASE_DELAY_SECS)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS)
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
