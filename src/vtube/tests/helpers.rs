use crate::vtube::config::CredentialStore;
use crate::vtube::error::AvatarLinkError;
use crate::vtube::protocol;
use crate::vtube::session::Link;
use crate::vtube::transport::{AvatarTransport, Connector};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// ── Inbound message builders ────────────────────────────────

pub fn token_response(token: &str, approved: bool) -> Value {
    json!({
        "apiName": protocol::API_NAME,
        "apiVersion": protocol::API_VERSION,
        "messageType": protocol::AUTH_TOKEN_RESPONSE,
        "data": {
            "authenticationToken": token,
            "authenticationTokenApproved": approved
        }
    })
}

pub fn auth_response(authenticated: bool) -> Value {
    json!({
        "apiName": protocol::API_NAME,
        "apiVersion": protocol::API_VERSION,
        "messageType": protocol::AUTH_RESPONSE,
        "data": { "authenticated": authenticated, "reason": "test" }
    })
}

pub fn api_error(error_id: i64) -> Value {
    json!({
        "apiName": protocol::API_NAME,
        "apiVersion": protocol::API_VERSION,
        "messageType": protocol::API_ERROR,
        "data": { "errorID": error_id, "message": "test error" }
    })
}

pub fn other_message(message_type: &str) -> Value {
    json!({
        "apiName": protocol::API_NAME,
        "apiVersion": protocol::API_VERSION,
        "messageType": message_type,
        "data": {}
    })
}

// ── Scripted transport ──────────────────────────────────────

/// One inbound step of a scripted server.
#[derive(Debug, Clone)]
pub enum Step {
    Reply(Value),
    /// The server drops the connection.
    Drop,
}

/// Transport that replays a fixed inbound script and records every send.
///
/// Once the script is exhausted `recv` blocks until `close()`. A send that
/// starts while another send is still in progress is counted as an overlap
/// and rejected.
pub struct ScriptedTransport {
    inbound: Mutex<VecDeque<Step>>,
    sent: Mutex<Vec<Value>>,
    open: AtomicBool,
    closed: CancellationToken,
    in_flight: AtomicBool,
    overlaps: AtomicUsize,
    send_delay: Option<Duration>,
}

impl ScriptedTransport {
    pub fn new(replies: Vec<Value>) -> Arc<Self> {
        Self::with_steps(replies.into_iter().map(Step::Reply).collect(), None)
    }

    pub fn with_steps(steps: Vec<Step>, send_delay: Option<Duration>) -> Arc<Self> {
        Arc::new(Self {
            inbound: Mutex::new(steps.into()),
            sent: Mutex::new(Vec::new()),
            open: AtomicBool::new(true),
            closed: CancellationToken::new(),
            in_flight: AtomicBool::new(false),
            overlaps: AtomicUsize::new(0),
            send_delay,
        })
    }

    pub fn sent(&self) -> Vec<Value> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_types(&self) -> Vec<String> {
        self.sent()
            .iter()
            .map(|m| protocol::message_type(m).unwrap_or("").to_string())
            .collect()
    }

    pub fn count_sent(&self, message_type: &str) -> usize {
        self.sent_types().iter().filter(|t| *t == message_type).count()
    }

    pub fn sent_hotkeys(&self) -> Vec<String> {
        self.sent()
            .iter()
            .filter(|m| protocol::message_type(m) == Some(protocol::HOTKEY_TRIGGER_REQUEST))
            .map(|m| m["data"]["hotkeyID"].as_str().unwrap_or("").to_string())
            .collect()
    }

    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    pub fn was_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

#[async_trait]
impl AvatarTransport for ScriptedTransport {
    async fn send(&self, message: Value) -> Result<(), AvatarLinkError> {
        if !self.is_open() {
            return Err(AvatarLinkError::NotConnected);
        }
        if self.in_flight.swap(true, Ordering::SeqCst) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
            return Err(AvatarLinkError::Transport("overlapping send".to_string()));
        }
        if let Some(delay) = self.send_delay {
            tokio::time::sleep(delay).await;
        }
        self.sent.lock().unwrap().push(message);
        self.in_flight.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn recv(&self) -> Result<Value, AvatarLinkError> {
        let step = self.inbound.lock().unwrap().pop_front();
        match step {
            Some(Step::Reply(value)) => Ok(value),
            Some(Step::Drop) => {
                self.open.store(false, Ordering::SeqCst);
                Err(AvatarLinkError::Transport("connection reset".to_string()))
            }
            None => {
                self.closed.cancelled().await;
                Err(AvatarLinkError::Transport("connection closed".to_string()))
            }
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.closed.cancel();
    }
}

// ── Scripted connector ──────────────────────────────────────

/// Refuses the first `failures` attempts, then hands out the queued
/// transports in order (an empty scripted transport once they run out).
pub struct ScriptedConnector {
    failures: usize,
    transports: Mutex<VecDeque<Arc<ScriptedTransport>>>,
    attempts: Mutex<Vec<tokio::time::Instant>>,
}

impl ScriptedConnector {
    pub fn new(failures: usize, transports: Vec<Arc<ScriptedTransport>>) -> Arc<Self> {
        Arc::new(Self {
            failures,
            transports: Mutex::new(transports.into()),
            attempts: Mutex::new(Vec::new()),
        })
    }

    pub fn attempts(&self) -> Vec<tokio::time::Instant> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, _endpoint_uri: &str) -> Result<Arc<dyn AvatarTransport>, AvatarLinkError> {
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            attempts.push(tokio::time::Instant::now());
            attempts.len()
        };
        if attempt <= self.failures {
            return Err(AvatarLinkError::Transport("connection refused".to_string()));
        }
        let transport = self
            .transports
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ScriptedTransport::new(Vec::new()));
        Ok(transport)
    }
}

// ── Credential store ────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialOp {
    Store(String),
    Clear,
}

/// Credential store that records every write.
#[derive(Default)]
pub struct RecordingCredentialStore {
    token: Mutex<Option<String>>,
    ops: Mutex<Vec<CredentialOp>>,
}

impl RecordingCredentialStore {
    pub fn with_token(token: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            token: Mutex::new(token.map(str::to_string)),
            ops: Mutex::new(Vec::new()),
        })
    }

    pub fn ops(&self) -> Vec<CredentialOp> {
        self.ops.lock().unwrap().clone()
    }

    pub fn current(&self) -> Option<String> {
        self.token.lock().unwrap().clone()
    }
}

impl CredentialStore for RecordingCredentialStore {
    fn load(&self) -> Option<String> {
        self.current()
    }

    fn store(&self, token: &str) -> Result<(), AvatarLinkError> {
        *self.token.lock().unwrap() = Some(token.to_string());
        self.ops.lock().unwrap().push(CredentialOp::Store(token.to_string()));
        Ok(())
    }

    fn clear(&self) -> Result<(), AvatarLinkError> {
        *self.token.lock().unwrap() = None;
        self.ops.lock().unwrap().push(CredentialOp::Clear);
        Ok(())
    }
}

// ── Log capture ─────────────────────────────────────────────

/// Collects formatted tracing output so tests can count log lines.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    /// Route events from the current thread into this capture until the
    /// guard is dropped. Tasks spawned on a current-thread runtime are
    /// covered too.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .without_time()
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn count(&self, needle: &str) -> usize {
        let buf = self.0.lock().unwrap();
        String::from_utf8_lossy(&buf)
            .lines()
            .filter(|line| line.contains(needle))
            .count()
    }
}

impl std::io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

// ── Link setup ──────────────────────────────────────────────

pub const TEST_ENDPOINT: &str = "ws://127.0.0.1:8001";

/// A link in the `Open` state on `transport`, not yet authenticated.
pub fn open_link(transport: Arc<ScriptedTransport>) -> Arc<Link> {
    let link = Arc::new(Link::new(TEST_ENDPOINT));
    link.begin_connect();
    link.opened(transport);
    link
}

/// A link that has completed the handshake on `transport`.
pub fn authenticated_link(transport: Arc<ScriptedTransport>) -> Arc<Link> {
    let link = open_link(transport);
    link.authenticated("test-token".to_string()).unwrap();
    link
}

/// Yield until `cond` holds, advancing the (paused) clock in small steps.
pub async fn wait_until<F: Fn() -> bool>(cond: F) {
    for _ in 0..10_000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}
