/*
[INPUT]:  SessionConfig, a Protocol, a Connector, optional Authenticator/Notifier
[OUTPUT]: Long-running subscription session that survives connection loss
[POS]:    WebSocket layer - reconnecting session engine shared by all protocols
[UPDATE]: When changing connect/read/reconnect semantics or state reporting
*/

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::FutureExt;
use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::codec::{RAW_LOG_MAX_BYTES, decode_frame, truncate_for_log};
use super::connection::{ConnectRequest, Connector, Frame, FrameSink, FrameStream};
use super::registry::{Callback, KeyList, Registry};
use super::transport::TungsteniteConnector;
use crate::auth::Authenticator;
use crate::config::SessionConfig;
use crate::error::{FeedError, Result};
use crate::notify::{Notifier, TracingNotifier, notify_quietly};
use crate::protocol::{Dispatch, Protocol};

/// Lifecycle of a session as observed by callers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    /// Retry budget exhausted; only an explicit `connect()`/`start()` recovers
    Failed,
    /// Closed by the caller; terminal
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "Disconnected"),
            SessionState::Connecting => write!(f, "Connecting"),
            SessionState::Connected => write!(f, "Connected"),
            SessionState::Reconnecting { attempt } => write!(f, "Reconnecting (attempt {attempt})"),
            SessionState::Failed => write!(f, "Failed"),
            SessionState::Closed => write!(f, "Closed"),
        }
    }
}

/// Outbound half of the live connection, tagged with its generation
struct Link {
    generation: u64,
    sink: Box<dyn FrameSink>,
}

enum ReadExit {
    Closed,
    Dropped(String),
}

/// Resets the reconnecting flag even if the reconnect future is dropped.
struct ReconnectGuard<'a> {
    flag: &'a AtomicBool,
    session: &'a str,
    finished: bool,
}

/// Clears the read-loop flag when `start()` returns.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Drop for ReconnectGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!(session = %self.session, "reconnect cycle cancelled before completion");
        }
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// A single outbound WebSocket plus the subscriptions it must carry.
///
/// All methods take `&self`; wrap the session in an `Arc` to subscribe from
/// other tasks while [`Session::start`] drives the read loop.
pub struct Session<P: Protocol> {
    config: SessionConfig,
    protocol: P,
    connector: Arc<dyn Connector>,
    authenticator: Option<Arc<dyn Authenticator>>,
    notifier: Arc<dyn Notifier>,
    registry: Mutex<Registry<P::Params>>,
    link: tokio::sync::Mutex<Option<Link>>,
    stream: Mutex<Option<(u64, Box<dyn FrameStream>)>>,
    generation: AtomicU64,
    reconnecting: AtomicBool,
    running: AtomicBool,
    closed: CancellationToken,
    state: watch::Sender<SessionState>,
}

impl<P: Protocol> fmt::Debug for Session<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.config.name)
            .field("url", &self.config.url)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl<P: Protocol> Session<P> {
    /// Create a session that connects with tokio-tungstenite.
    pub fn new(config: SessionConfig, protocol: P) -> Self {
        let connector = Arc::new(TungsteniteConnector::new(config.connect_timeout));
        let (state, _rx) = watch::channel(SessionState::Disconnected);

        Self {
            config,
            protocol,
            connector,
            authenticator: None,
            notifier: Arc::new(TracingNotifier),
            registry: Mutex::new(Registry::new()),
            link: tokio::sync::Mutex::new(None),
            stream: Mutex::new(None),
            generation: AtomicU64::new(0),
            reconnecting: AtomicBool::new(false),
            running: AtomicBool::new(false),
            closed: CancellationToken::new(),
            state,
        }
    }

    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn protocol(&self) -> &P {
        &self.protocol
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Watch state transitions (e.g. to learn about `Failed`).
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub async fn is_connected(&self) -> bool {
        self.link.lock().await.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub fn is_reconnecting(&self) -> bool {
        self.reconnecting.load(Ordering::SeqCst)
    }

    /// Subscription keys in replay order
    pub fn subscription_keys(&self) -> Vec<String> {
        self.lock_registry().keys()
    }

    /// Stored params for a subscription
    pub fn params(&self, key: &str) -> Option<P::Params> {
        self.lock_registry().params(key).cloned()
    }

    /// Open the connection if there is none.
    ///
    /// Authentication problems return `false` without retrying; the caller
    /// must re-authenticate before calling again.
    pub async fn connect(&self) -> bool {
        if self.is_closed() {
            warn!(session = %self.config.name, "connect ignored: session closed");
            return false;
        }
        if self.is_connected().await {
            return true;
        }

        self.set_state(SessionState::Connecting);
        match self.establish_link().await {
            Ok(()) => {
                self.set_state(SessionState::Connected);
                info!(session = %self.config.name, url = %self.config.url, "ws connected");
                true
            }
            Err(err) => {
                if self.is_closed() {
                    return false;
                }
                self.log_connect_failure(&err);
                self.set_state(SessionState::Disconnected);
                false
            }
        }
    }

    /// Run the read loop until the session is closed or gives up reconnecting.
    ///
    /// Frames are dispatched one at a time in arrival order; callback and
    /// parse failures are logged and never end the loop.
    pub async fn start(&self) {
        if self.is_closed() {
            warn!(session = %self.config.name, "start ignored: session closed");
            return;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            warn!(session = %self.config.name, "start ignored: read loop already running");
            return;
        }
        let _running = RunningGuard(&self.running);
        if !self.is_connected().await && !self.connect_and_restore().await {
            error!(session = %self.config.name, "cannot start: connection failed");
            return;
        }

        loop {
            if self.is_closed() {
                break;
            }

            let Some((generation, stream)) = self.take_stream() else {
                if self.reconnect().await || self.has_stream() {
                    continue;
                }
                if self.is_reconnecting() {
                    self.wait_for_reconnect().await;
                    if self.state() == SessionState::Failed {
                        break;
                    }
                    continue;
                }
                break;
            };

            match self.read_loop(stream).await {
                ReadExit::Closed => break,
                ReadExit::Dropped(reason) => {
                    let current = self.release_link(generation).await;
                    if self.is_closed() {
                        break;
                    }
                    if current {
                        warn!(session = %self.config.name, %reason, "ws connection lost");
                        notify_quietly(
                            self.notifier.as_ref(),
                            &format!(
                                "WebSocket {} disconnected\nReason: {reason}\nStatus: attempting reconnection",
                                self.config.name
                            ),
                        )
                        .await;
                    }
                }
            }
        }

        info!(session = %self.config.name, state = %self.state(), "ws session stopped");
    }

    /// Close the connection and stop any reconnect in progress. Idempotent.
    pub async fn close(&self) {
        self.closed.cancel();
        drop(self.take_stream());

        let link = self.link.lock().await.take();
        if let Some(mut link) = link {
            if let Err(err) = link.sink.close().await {
                debug!(session = %self.config.name, error = %err, "ws close failed");
            }
            info!(session = %self.config.name, "ws connection closed");
        }
        self.set_state(SessionState::Closed);
    }

    /// Register `callback` under `key` and send the subscribe message.
    ///
    /// The subscription is recorded even when connecting or sending fails, so
    /// the next reconnect replays it.
    pub async fn subscribe_method(&self, key: &str, callback: Callback, params: P::Params) -> bool {
        if self.is_closed() {
            warn!(session = %self.config.name, key, "subscribe ignored: session closed");
            return false;
        }
        if self.is_reconnecting() {
            self.lock_registry().put(key, callback, params);
            info!(session = %self.config.name, key, "subscription recorded; replayed once reconnected");
            return false;
        }
        if !self.is_connected().await && !self.connect_and_restore().await {
            self.lock_registry().put(key, callback, params);
            warn!(session = %self.config.name, key, "subscription recorded but not sent: not connected");
            return false;
        }

        self.lock_registry().put(key, callback, params.clone());
        match self.send_subscribe(key, &params).await {
            Ok(()) => {
                info!(session = %self.config.name, key, ?params, "ws subscription sent");
                true
            }
            Err(err) => {
                error!(session = %self.config.name, key, error = %err, "ws subscribe failed");
                false
            }
        }
    }

    /// Forget `key` locally, then send the unsubscribe message.
    ///
    /// The local removal stands even if the send fails.
    pub async fn unsubscribe_method(&self, key: &str, args: P::Unsubscribe) -> bool {
        {
            let mut registry = self.lock_registry();
            self.protocol.forget(&mut registry, key, &args);
        }

        let sent = match self.protocol.build_unsubscribe(key, &args) {
            Ok(message) => self.send_message(&message).await,
            Err(err) => Err(err),
        };
        match sent {
            Ok(()) => {
                info!(session = %self.config.name, key, ?args, "ws unsubscribe sent");
                true
            }
            Err(err) => {
                error!(session = %self.config.name, key, error = %err, "ws unsubscribe failed");
                false
            }
        }
    }

    /// Add keys to an existing list-valued subscription and subscribe to
    /// just the additions. Replays after a reconnect carry the full list.
    pub async fn merge_params(&self, key: &str, addition: &[String]) -> bool
    where
        P::Params: KeyList,
    {
        if let Err(err) = self.lock_registry().merge_params(key, addition) {
            warn!(
                session = %self.config.name,
                key,
                error = %err,
                "cannot extend a subscription that was never created; subscribe first"
            );
            return false;
        }

        let params = P::Params::from_keys(addition.to_vec());
        match self.send_subscribe(key, &params).await {
            Ok(()) => {
                info!(session = %self.config.name, key, keys = ?addition, "ws subscription extended");
                true
            }
            Err(err) => {
                error!(session = %self.config.name, key, error = %err, "ws subscription extend failed");
                false
            }
        }
    }

    /// Re-establish the connection with bounded, backed-off retries and
    /// replay every registered subscription.
    ///
    /// Returns `false` immediately if another reconnect is already running.
    pub async fn reconnect(&self) -> bool {
        if self
            .reconnecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(session = %self.config.name, "reconnection already in progress");
            return false;
        }
        let mut guard = ReconnectGuard {
            flag: &self.reconnecting,
            session: &self.config.name,
            finished: false,
        };

        let policy = self.config.reconnect.clone();
        let mut attempted = 0;
        for attempt in 1..=policy.max_attempts {
            attempted = attempt;
            if self.is_closed() {
                info!(session = %self.config.name, attempt, "reconnect aborted: session closed");
                guard.finished = true;
                return false;
            }
            self.set_state(SessionState::Reconnecting { attempt });
            info!(
                session = %self.config.name,
                attempt,
                max_attempts = policy.max_attempts,
                "ws reconnection attempt"
            );

            let delay = policy.delay_before(attempt);
            if !delay.is_zero() {
                info!(
                    session = %self.config.name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "waiting before retry"
                );
                tokio::select! {
                    _ = self.closed.cancelled() => {
                        info!(session = %self.config.name, attempt, "reconnect aborted during backoff");
                        guard.finished = true;
                        return false;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            if self.is_closed() {
                guard.finished = true;
                return false;
            }

            self.release_current_link().await;
            if let Err(err) = self.establish_link().await {
                if self.is_closed() {
                    guard.finished = true;
                    return false;
                }
                self.log_connect_failure(&err);
                if err.is_retryable() {
                    continue;
                }
                warn!(
                    session = %self.config.name,
                    attempt,
                    error = %err,
                    "reconnect stopped: failure is not retryable"
                );
                break;
            }

            let restored = self.restore_subscriptions().await;
            self.set_state(SessionState::Connected);
            info!(session = %self.config.name, attempt, restored, "ws reconnected");
            notify_quietly(
                self.notifier.as_ref(),
                &format!(
                    "WebSocket {} reconnected\nStatus: restored after {attempt} attempt(s)",
                    self.config.name
                ),
            )
            .await;
            guard.finished = true;
            return true;
        }

        guard.finished = true;
        if self.is_closed() {
            return false;
        }
        error!(
            session = %self.config.name,
            attempted,
            max_attempts = policy.max_attempts,
            "ws failed to reconnect"
        );
        self.set_state(SessionState::Failed);
        notify_quietly(
            self.notifier.as_ref(),
            &format!(
                "WebSocket {} failed to reconnect after {attempted} attempts",
                self.config.name
            ),
        )
        .await;
        false
    }

    /// Serialize and send one message over the live connection.
    pub async fn send_message(&self, message: &Value) -> Result<()> {
        let text = serde_json::to_string(message)?;
        let mut link = self.link.lock().await;
        let link = link.as_mut().ok_or(FeedError::NotConnected)?;
        link.sink.send(Frame::Text(text)).await
    }

    async fn send_subscribe(&self, key: &str, params: &P::Params) -> Result<()> {
        let message = self.protocol.build_subscribe(key, params)?;
        self.send_message(&message).await
    }

    async fn connect_and_restore(&self) -> bool {
        if !self.connect().await {
            return false;
        }
        self.restore_subscriptions().await;
        true
    }

    async fn restore_subscriptions(&self) -> usize {
        let entries = self.lock_registry().snapshot();
        if entries.is_empty() {
            return 0;
        }

        info!(session = %self.config.name, count = entries.len(), "restoring subscriptions");
        let mut restored = 0;
        for (key, params) in entries {
            match self.send_subscribe(&key, &params).await {
                Ok(()) => {
                    restored += 1;
                    info!(session = %self.config.name, %key, "restored subscription");
                }
                Err(err) => {
                    error!(session = %self.config.name, %key, error = %err, "failed to restore subscription");
                }
            }
        }
        restored
    }

    async fn connect_request(&self) -> Result<ConnectRequest> {
        let mut headers = self.config.headers.clone();
        if let Some(authenticator) = &self.authenticator {
            if !authenticator.ensure_valid().await {
                return Err(FeedError::Authentication {
                    message: "unable to obtain valid tokens".to_string(),
                });
            }
            let tokens = authenticator
                .current_credentials()
                .ok_or_else(|| FeedError::Authentication {
                    message: "no authentication tokens available".to_string(),
                })?;
            headers.push((
                "Cookie".to_string(),
                tokens.cookie_header(&self.config.cookie_names),
            ));
        }

        Ok(ConnectRequest {
            url: self.config.url.clone(),
            headers,
        })
    }

    async fn establish_link(&self) -> Result<()> {
        let request = self.connect_request().await?;

        let mut link = self.link.lock().await;
        if link.is_some() {
            return Ok(());
        }
        if self.is_closed() {
            return Err(FeedError::SessionClosed);
        }

        info!(session = %self.config.name, url = %request.url, "connecting to ws");
        let mut connection = self.connector.open(&request).await?;
        if self.is_closed() {
            if let Err(err) = connection.sink.close().await {
                debug!(session = %self.config.name, error = %err, "ws close failed");
            }
            return Err(FeedError::SessionClosed);
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.lock_stream() = Some((generation, connection.stream));
        *link = Some(Link {
            generation,
            sink: connection.sink,
        });
        Ok(())
    }

    /// Drop the link if it is still the one with `generation`.
    /// Returns whether it was current.
    async fn release_link(&self, generation: u64) -> bool {
        let mut link = self.link.lock().await;
        if link.as_ref().map(|l| l.generation) != Some(generation) {
            return false;
        }
        if let Some(mut stale) = link.take() {
            let _ = stale.sink.close().await;
        }
        if !self.is_closed() {
            self.set_state(SessionState::Disconnected);
        }
        true
    }

    async fn release_current_link(&self) {
        drop(self.take_stream());
        let stale = self.link.lock().await.take();
        if let Some(mut stale) = stale {
            if let Err(err) = stale.sink.close().await {
                debug!(session = %self.config.name, error = %err, "stale ws close failed");
            }
        }
    }

    async fn read_loop(&self, mut stream: Box<dyn FrameStream>) -> ReadExit {
        loop {
            let next = tokio::select! {
                _ = self.closed.cancelled() => return ReadExit::Closed,
                next = stream.next_frame() => next,
            };

            match next {
                Some(Ok(frame)) => self.handle_frame(frame).await,
                Some(Err(err)) => return ReadExit::Dropped(err.to_string()),
                None => return ReadExit::Dropped("remote closed the connection".to_string()),
            }
        }
    }

    async fn handle_frame(&self, frame: Frame) {
        let message = match decode_frame(frame) {
            Ok(message) => message,
            Err(err) => {
                warn!(session = %self.config.name, error = %err, "ws message parse failed");
                return;
            }
        };

        let routed = {
            let registry = self.lock_registry();
            self.protocol.dispatch(message, &registry)
        };

        match routed {
            Dispatch::Deliver { key, payload } => {
                let callback = self.lock_registry().callback(&key);
                match callback {
                    Some(callback) => self.invoke(&key, callback, payload).await,
                    None => debug!(session = %self.config.name, %key, "no callback registered for subscription"),
                }
            }
            Dispatch::Handled => {}
            Dispatch::Unrouted(message) => {
                let preview = truncate_for_log(&message.to_string(), RAW_LOG_MAX_BYTES);
                debug!(session = %self.config.name, message = %preview, "ws message matched no subscription");
            }
        }
    }

    async fn invoke(&self, key: &str, callback: Callback, payload: Value) {
        let outcome = AssertUnwindSafe(async move { callback(payload).await })
            .catch_unwind()
            .await;

        let message = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(err)) => err.to_string(),
            Err(panic) => format!("panicked: {}", panic_message(panic.as_ref())),
        };
        let err = FeedError::Callback {
            key: key.to_string(),
            message,
        };
        error!(session = %self.config.name, error = %err, "subscription callback failed");
    }

    async fn wait_for_reconnect(&self) {
        let mut rx = self.state.subscribe();
        tokio::select! {
            _ = self.closed.cancelled() => {}
            _ = rx.wait_for(|state| !matches!(state, SessionState::Reconnecting { .. })) => {}
        }
    }

    fn log_connect_failure(&self, err: &FeedError) {
        if err.is_auth_error() {
            error!(
                session = %self.config.name,
                error = %err,
                "ws authentication failed - tokens invalid or expired, re-authenticate before reconnecting"
            );
        } else {
            error!(session = %self.config.name, error = %err, "ws connect failed");
        }
    }

    fn set_state(&self, state: SessionState) {
        self.state.send_replace(state);
    }

    fn take_stream(&self) -> Option<(u64, Box<dyn FrameStream>)> {
        self.lock_stream().take()
    }

    fn has_stream(&self) -> bool {
        self.lock_stream().is_some()
    }

    fn lock_registry(&self) -> MutexGuard<'_, Registry<P::Params>> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_stream(&self) -> MutexGuard<'_, Option<(u64, Box<dyn FrameStream>)>> {
        self.stream.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
