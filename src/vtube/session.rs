//! Session state for one connection lifetime, plus the send permit that
//! serializes every write to the transport.

use super::error::AvatarLinkError;
use super::transport::AvatarTransport;
use serde_json::Value;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

/// One logical connection lifetime. Discarded on disconnect; the persisted
/// credential outlives it.
pub struct Session {
    pub endpoint_uri: String,
    pub state: ConnectionState,
    pub credential: Option<String>,
    pub authenticated: bool,
    transport: Option<Arc<dyn AvatarTransport>>,
}

impl Session {
    fn fresh(endpoint_uri: &str) -> Self {
        Self {
            endpoint_uri: endpoint_uri.to_string(),
            state: ConnectionState::Disconnected,
            credential: None,
            authenticated: false,
            transport: None,
        }
    }
}

/// Shared link state. Owned by the client; the dispatcher and the handshake
/// only reach the transport through it.
pub struct Link {
    session: RwLock<Session>,
    /// Held for every send, and by the handshake for a whole
    /// request/response pair.
    send_permit: Mutex<()>,
}

impl Link {
    pub fn new(endpoint_uri: &str) -> Self {
        Self {
            session: RwLock::new(Session::fresh(endpoint_uri)),
            send_permit: Mutex::new(()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Session> {
        self.session.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Session> {
        self.session.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> ConnectionState {
        self.read().state
    }

    pub fn is_authenticated(&self) -> bool {
        self.read().authenticated
    }

    pub fn credential(&self) -> Option<String> {
        self.read().credential.clone()
    }

    pub fn endpoint_uri(&self) -> String {
        self.read().endpoint_uri.clone()
    }

    // ── Transitions (owned by the connection task) ──────

    pub(crate) fn begin_connect(&self) {
        let mut session = self.write();
        let uri = session.endpoint_uri.clone();
        *session = Session::fresh(&uri);
        session.state = ConnectionState::Connecting;
    }

    pub(crate) fn opened(&self, transport: Arc<dyn AvatarTransport>) {
        let mut session = self.write();
        session.transport = Some(transport);
        session.state = ConnectionState::Open;
    }

    /// Record a successful handshake. Only valid while `Open`.
    pub(crate) fn authenticated(&self, credential: String) -> Result<(), AvatarLinkError> {
        let mut session = self.write();
        if session.state != ConnectionState::Open {
            return Err(AvatarLinkError::NotConnected);
        }
        session.credential = Some(credential);
        session.authenticated = true;
        Ok(())
    }

    /// Enter `Closing` and hand back the transport so the caller can close it
    /// outside the lock.
    pub(crate) fn closing(&self) -> Option<Arc<dyn AvatarTransport>> {
        let mut session = self.write();
        session.authenticated = false;
        if session.state != ConnectionState::Disconnected {
            session.state = ConnectionState::Closing;
        }
        session.transport.take()
    }

    /// Discard the session. A reconnect starts from a fresh one.
    pub(crate) fn disconnected(&self) {
        let mut session = self.write();
        let uri = session.endpoint_uri.clone();
        *session = Session::fresh(&uri);
    }

    // ── I/O ─────────────────────────────────────────────

    fn open_transport(&self) -> Result<Arc<dyn AvatarTransport>, AvatarLinkError> {
        let session = self.read();
        match (&session.state, &session.transport) {
            (ConnectionState::Open, Some(transport)) if transport.is_open() => Ok(transport.clone()),
            _ => Err(AvatarLinkError::NotConnected),
        }
    }

    /// Send one message on the current transport. Fails fast when the link
    /// is not `Open`.
    pub async fn send(&self, message: Value) -> Result<(), AvatarLinkError> {
        let transport = self.open_transport()?;
        let _permit = self.send_permit.lock().await;
        transport.send(message).await
    }

    /// Send a request and wait for the next inbound message, holding the
    /// permit for the whole pair.
    pub(crate) async fn exchange(
        &self,
        transport: &dyn AvatarTransport,
        request: Value,
    ) -> Result<Value, AvatarLinkError> {
        let _permit = self.send_permit.lock().await;
        transport.send(request).await?;
        transport.recv().await
    }

    /// Wait for the next inbound message of an ongoing exchange.
    pub(crate) async fn receive(&self, transport: &dyn AvatarTransport) -> Result<Value, AvatarLinkError> {
        let _permit = self.send_permit.lock().await;
        transport.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vtube::tests::helpers::ScriptedTransport;

    #[tokio::test]
    async fn send_fails_fast_when_not_open() {
        let link = Link::new("ws://localhost:8001");
        assert_eq!(
            link.send(serde_json::json!({})).await,
            Err(AvatarLinkError::NotConnected)
        );

        link.begin_connect();
        assert_eq!(link.state(), ConnectionState::Connecting);
        assert_eq!(
            link.send(serde_json::json!({})).await,
            Err(AvatarLinkError::NotConnected)
        );
    }

    #[tokio::test]
    async fn authenticated_requires_open() {
        let link = Link::new("ws://localhost:8001");
        assert!(link.authenticated("tok".to_string()).is_err());
        assert!(!link.is_authenticated());

        link.begin_connect();
        link.opened(ScriptedTransport::new(Vec::new()));
        link.authenticated("tok".to_string()).unwrap();
        assert!(link.is_authenticated());
        assert_eq!(link.credential().as_deref(), Some("tok"));
    }

    #[tokio::test]
    async fn disconnect_discards_session() {
        let link = Link::new("ws://localhost:8001");
        link.begin_connect();
        link.opened(ScriptedTransport::new(Vec::new()));
        link.authenticated("tok".to_string()).unwrap();

        assert!(link.closing().is_some());
        assert_eq!(link.state(), ConnectionState::Closing);
        assert!(!link.is_authenticated());

        link.disconnected();
        assert_eq!(link.state(), ConnectionState::Disconnected);
        assert_eq!(link.credential(), None);
        assert_eq!(link.endpoint_uri(), "ws://localhost:8001");
    }
}
