/*
[INPUT]:  Scripted connection outcomes and remote-side frames
[OUTPUT]: In-memory Connector, remote handles and callback recorders
[POS]:    Test infrastructure - shared across all test modules
[UPDATE]: When adding new test patterns or fixtures
*/

//! Common test utilities for tradefeed-adapter tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Notify, mpsc};
use tokio::time::Instant;
use tradefeed_adapter::error::{FeedError, Result};
use tradefeed_adapter::ws::{ConnectRequest, Connection, Connector, Frame, FrameSink, FrameStream};
use tradefeed_adapter::{Callback, ReconnectPolicy, SessionConfig, callback};
use wiremock::MockServer;

/// Setup a mock HTTP server for testing
pub async fn setup_mock_server() -> MockServer {
    MockServer::start().await
}

/// Session config pointing nowhere in particular, with the default schedule
pub fn test_config(name: &str) -> SessionConfig {
    SessionConfig::new(name, "wss://feed.test/ws")
}

/// Config with a short retry budget for tests that do not care about backoff
pub fn fast_config(name: &str, attempts: u32) -> SessionConfig {
    test_config(name).with_reconnect(ReconnectPolicy::new(attempts, Duration::from_millis(10)))
}

enum Event {
    Frame(Frame),
    HangUp,
    Error(String),
}

enum Plan {
    Accept {
        tx: mpsc::UnboundedSender<Event>,
        rx: mpsc::UnboundedReceiver<Event>,
        shared: RemoteShared,
        gate: Option<Arc<Notify>>,
    },
    Refuse,
    RefuseAuth,
}

#[derive(Clone, Default)]
struct RemoteShared {
    sent: Arc<Mutex<Vec<String>>>,
    fail_sends: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

/// Server side of one scripted connection
#[derive(Clone)]
pub struct MockRemote {
    tx: mpsc::UnboundedSender<Event>,
    shared: RemoteShared,
}

impl MockRemote {
    pub fn push_text(&self, text: &str) {
        let _ = self.tx.send(Event::Frame(Frame::text(text)));
    }

    pub fn push_json(&self, value: Value) {
        self.push_text(&value.to_string());
    }

    pub fn push_binary(&self, bytes: Vec<u8>) {
        let _ = self.tx.send(Event::Frame(Frame::Binary(bytes)));
    }

    /// Clean close from the remote
    pub fn hang_up(&self) {
        let _ = self.tx.send(Event::HangUp);
    }

    /// Abnormal close from the remote
    pub fn fail(&self, reason: &str) {
        let _ = self.tx.send(Event::Error(reason.to_string()));
    }

    /// Make every later send on this connection fail
    pub fn fail_sends(&self) {
        self.shared.fail_sends.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Raw text frames the client sent on this connection
    pub fn sent(&self) -> Vec<String> {
        self.shared.sent.lock().unwrap().clone()
    }

    pub fn sent_json(&self) -> Vec<Value> {
        self.sent()
            .iter()
            .map(|text| serde_json::from_str(text).unwrap())
            .collect()
    }
}

struct MockSink {
    tx: mpsc::UnboundedSender<Event>,
    shared: RemoteShared,
}

#[async_trait]
impl FrameSink for MockSink {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(FeedError::NotConnected);
        }
        if self.shared.fail_sends.load(Ordering::SeqCst) {
            return Err(FeedError::Transport("send refused by mock".to_string()));
        }
        match frame {
            Frame::Text(text) => self.shared.sent.lock().unwrap().push(text),
            Frame::Binary(_) => {
                return Err(FeedError::Protocol("unexpected binary frame".to_string()));
            }
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if !self.shared.closed.swap(true, Ordering::SeqCst) {
            // A client-side close ends the inbound stream, like a close handshake.
            let _ = self.tx.send(Event::HangUp);
        }
        Ok(())
    }
}

struct MockStream {
    rx: mpsc::UnboundedReceiver<Event>,
}

#[async_trait]
impl FrameStream for MockStream {
    async fn next_frame(&mut self) -> Option<Result<Frame>> {
        match self.rx.recv().await? {
            Event::Frame(frame) => Some(Ok(frame)),
            Event::HangUp => None,
            Event::Error(reason) => Some(Err(FeedError::Transport(reason))),
        }
    }
}

/// Connector that replays a script of accept/refuse outcomes.
///
/// Opens beyond the end of the script are refused.
#[derive(Default)]
pub struct MockConnector {
    plan: Mutex<VecDeque<Plan>>,
    opens: Mutex<Vec<(Instant, ConnectRequest)>>,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Script the next open to succeed; returns its remote side.
    pub fn accept(&self) -> MockRemote {
        self.push_accept(None)
    }

    /// Script the next open to succeed only once the returned gate is
    /// notified; until then the handshake hangs.
    pub fn accept_gated(&self) -> (MockRemote, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        (self.push_accept(Some(gate.clone())), gate)
    }

    fn push_accept(&self, gate: Option<Arc<Notify>>) -> MockRemote {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = RemoteShared::default();
        self.plan
            .lock()
            .unwrap()
            .push_back(Plan::Accept {
                tx: tx.clone(),
                rx,
                shared: shared.clone(),
                gate,
            });
        MockRemote { tx, shared }
    }

    /// Script the next `count` opens to fail at the transport level
    pub fn refuse(&self, count: usize) {
        let mut plan = self.plan.lock().unwrap();
        for _ in 0..count {
            plan.push_back(Plan::Refuse);
        }
    }

    /// Script the next open to be rejected with 401
    pub fn refuse_auth(&self) {
        self.plan.lock().unwrap().push_back(Plan::RefuseAuth);
    }

    pub fn open_count(&self) -> usize {
        self.opens.lock().unwrap().len()
    }

    pub fn open_times(&self) -> Vec<Instant> {
        self.opens.lock().unwrap().iter().map(|(at, _)| *at).collect()
    }

    pub fn requests(&self) -> Vec<ConnectRequest> {
        self.opens
            .lock()
            .unwrap()
            .iter()
            .map(|(_, request)| request.clone())
            .collect()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, request: &ConnectRequest) -> Result<Connection> {
        self.opens
            .lock()
            .unwrap()
            .push((Instant::now(), request.clone()));

        let next = self.plan.lock().unwrap().pop_front();
        match next {
            Some(Plan::Accept {
                tx,
                rx,
                shared,
                gate,
            }) => {
                if let Some(gate) = gate {
                    gate.notified().await;
                }
                Ok(Connection::new(MockSink { tx, shared }, MockStream { rx }))
            }
            Some(Plan::RefuseAuth) => Err(FeedError::Authentication {
                message: "handshake rejected with status 401 Unauthorized".to_string(),
            }),
            Some(Plan::Refuse) | None => Err(FeedError::Transport("connection refused".to_string())),
        }
    }
}

/// Collects callback payloads in delivery order
#[derive(Clone)]
pub struct Recorder {
    tx: mpsc::UnboundedSender<(String, Value)>,
}

impl Recorder {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(String, Value)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Callback tagging each payload with `label`
    pub fn callback(&self, label: &str) -> Callback {
        let tx = self.tx.clone();
        let label = label.to_string();
        callback(move |payload| {
            let tx = tx.clone();
            let label = label.clone();
            async move {
                let _ = tx.send((label, payload));
                Ok(())
            }
        })
    }
}

/// Receive the next item or fail the test after a generous timeout
pub async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(600), rx.recv())
        .await
        .expect("timed out waiting for message")
        .expect("channel closed")
}

/// Callback that ignores its payload
pub fn noop() -> Callback {
    callback(|_| async { Ok(()) })
}
