/*
[INPUT]:  MonitorConfig, optional Connector override, shutdown token
[OUTPUT]: One tokio task per session, payload logging, coordinated close
[POS]:    Execution layer - session supervision
[UPDATE]: When changing startup/shutdown guarantees or supervision semantics
*/

use std::sync::Arc;

use anyhow::{Context as _, Result};
use serde_json::Value;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tradefeed_adapter::protocol::{Protocol, TopicParams};
use tradefeed_adapter::ws::Connector;
use tradefeed_adapter::{
    AuthTokens,
    Authenticator,
    Callback,
    Notifier,
    PulseProtocol,
    PulseSession,
    RpcProtocol,
    RpcSession,
    Session,
    StaticAuthenticator,
    TopicDialect,
    TopicProtocol,
    TopicSession,
    TracingNotifier,
    WebhookNotifier,
    callback,
};

use crate::config::{MonitorConfig, ProtocolKind, SessionSpec, SubscriptionSpec};

const PAYLOAD_LOG_MAX_CHARS: usize = 512;

/// A configured session of either protocol
#[derive(Debug, Clone)]
pub enum FeedSession {
    Topic(Arc<TopicSession>),
    Rpc(Arc<RpcSession>),
    Pulse(Arc<PulseSession>),
}

impl FeedSession {
    pub fn name(&self) -> &str {
        match self {
            FeedSession::Topic(session) => session.name(),
            FeedSession::Rpc(session) => session.name(),
            FeedSession::Pulse(session) => session.name(),
        }
    }

    /// Send every configured subscription. Returns how many were sent;
    /// the rest stay registered and go out on the next connect.
    pub async fn subscribe_all(&self, subscriptions: &[SubscriptionSpec]) -> usize {
        let mut sent = 0;
        for subscription in subscriptions {
            let handler = log_payload(self.name(), &subscription.key);
            let ok = match self {
                FeedSession::Topic(session) => {
                    let params = TopicParams::new(subscription.keys.clone());
                    session
                        .subscribe_method(&subscription.key, handler, params)
                        .await
                }
                FeedSession::Rpc(session) => {
                    session
                        .subscribe_method(&subscription.key, handler, subscription.params.clone())
                        .await
                }
                FeedSession::Pulse(session) => {
                    session
                        .subscribe_pulse(handler, subscription.user_state.clone())
                        .await
                }
            };
            if ok {
                sent += 1;
            }
        }
        sent
    }

    pub async fn start(&self) {
        match self {
            FeedSession::Topic(session) => session.start().await,
            FeedSession::Rpc(session) => session.start().await,
            FeedSession::Pulse(session) => session.start().await,
        }
    }

    pub async fn close(&self) {
        match self {
            FeedSession::Topic(session) => session.close().await,
            FeedSession::Rpc(session) => session.close().await,
            FeedSession::Pulse(session) => session.close().await,
        }
    }
}

/// Runs every configured session until shutdown or until all have stopped.
pub struct Monitor {
    sessions: Vec<(FeedSession, Vec<SubscriptionSpec>)>,
    shutdown: CancellationToken,
}

impl Monitor {
    pub fn from_config(config: &MonitorConfig) -> Result<Self> {
        Self::build(config, None)
    }

    /// Build with every session dialing through `connector`
    pub fn with_connector(config: &MonitorConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        Self::build(config, Some(connector))
    }

    fn build(config: &MonitorConfig, connector: Option<Arc<dyn Connector>>) -> Result<Self> {
        let notifier: Arc<dyn Notifier> = match &config.webhook_url {
            Some(url) => Arc::new(WebhookNotifier::new(url).context("create webhook notifier")?),
            None => Arc::new(TracingNotifier),
        };
        let authenticator: Option<Arc<dyn Authenticator>> = config.auth.as_ref().map(|auth| {
            Arc::new(StaticAuthenticator::new(AuthTokens::new(
                auth.access_token.clone(),
                auth.refresh_token.clone(),
            ))) as Arc<dyn Authenticator>
        });

        let sessions = config
            .sessions
            .iter()
            .map(|spec| {
                let auth = if spec.authenticate {
                    authenticator.clone()
                } else {
                    None
                };
                let session = build_session(spec, auth, notifier.clone(), connector.clone());
                (session, spec.subscriptions.clone())
            })
            .collect();

        Ok(Self {
            sessions,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn sessions(&self) -> impl Iterator<Item = &FeedSession> {
        self.sessions.iter().map(|(session, _)| session)
    }

    /// Spawn one task per session and wait for shutdown or for every
    /// session to stop, then close them all.
    pub async fn run(&self) -> Result<()> {
        let mut tasks = JoinSet::new();
        for (session, subscriptions) in &self.sessions {
            let session = session.clone();
            let subscriptions = subscriptions.clone();
            tasks.spawn(async move {
                let sent = session.subscribe_all(&subscriptions).await;
                info!(
                    session = %session.name(),
                    sent,
                    configured = subscriptions.len(),
                    "initial subscriptions sent"
                );
                session.start().await;
                session.name().to_string()
            });
        }
        info!(session_count = self.sessions.len(), "sessions started");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("shutdown requested");
                    break;
                }
                joined = tasks.join_next() => match joined {
                    Some(Ok(name)) => warn!(session = %name, "session stopped"),
                    Some(Err(err)) => warn!(error = %err, "session task failed"),
                    None => {
                        info!("all sessions stopped");
                        break;
                    }
                },
            }
        }

        for (session, _) in &self.sessions {
            session.close().await;
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                warn!(error = %err, "session task failed during shutdown");
            }
        }
        info!("sessions shutdown complete");
        Ok(())
    }
}

fn build_session(
    spec: &SessionSpec,
    authenticator: Option<Arc<dyn Authenticator>>,
    notifier: Arc<dyn Notifier>,
    connector: Option<Arc<dyn Connector>>,
) -> FeedSession {
    let config = spec.session.clone();
    match spec.protocol {
        ProtocolKind::Topic => FeedSession::Topic(Arc::new(configure(
            Session::new(config, TopicProtocol::new(TopicDialect::MethodKeys)),
            authenticator,
            notifier,
            connector,
        ))),
        ProtocolKind::Room => FeedSession::Topic(Arc::new(configure(
            Session::new(config, TopicProtocol::new(TopicDialect::RoomAction)),
            authenticator,
            notifier,
            connector,
        ))),
        ProtocolKind::Rpc => FeedSession::Rpc(Arc::new(configure(
            Session::new(config, RpcProtocol::new()),
            authenticator,
            notifier,
            connector,
        ))),
        ProtocolKind::Pulse => FeedSession::Pulse(Arc::new(configure(
            Session::new(config, PulseProtocol::new()),
            authenticator,
            notifier,
            connector,
        ))),
    }
}

fn configure<P: Protocol>(
    mut session: Session<P>,
    authenticator: Option<Arc<dyn Authenticator>>,
    notifier: Arc<dyn Notifier>,
    connector: Option<Arc<dyn Connector>>,
) -> Session<P> {
    if let Some(authenticator) = authenticator {
        session = session.with_authenticator(authenticator);
    }
    if let Some(connector) = connector {
        session = session.with_connector(connector);
    }
    session.with_notifier(notifier)
}

/// Callback that logs each payload it receives
fn log_payload(session: &str, key: &str) -> Callback {
    let session = session.to_string();
    let key = key.to_string();
    callback(move |payload: Value| {
        let session = session.clone();
        let key = key.clone();
        async move {
            let text = payload.to_string();
            let preview: String = text.chars().take(PAYLOAD_LOG_MAX_CHARS).collect();
            info!(%session, %key, payload = %preview, "payload received");
            Ok(())
        }
    })
}
