//! AvatarLinkClient: owns the VTube Studio connection lifecycle.
//!
//! A single connection task connects, authenticates, starts the idle cycle
//! and then reads inbound messages until the socket drops, at which point it
//! waits `reconnect_interval_secs` and starts over. `shutdown()` cancels the
//! whole thing.

use super::auth::Handshake;
use super::config::{CredentialStore, JsonCredentialStore, VTubeStudioConfig};
use super::dispatcher::TriggerDispatcher;
use super::error::AvatarLinkError;
use super::idle::{IdleDelay, IdleEmotePool, IdleScheduler};
use super::protocol::{InboundMessage, PluginInfo};
use super::session::{ConnectionState, Link};
use super::transport::{AvatarTransport, Connector, WebSocketConnector};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Clone)]
pub struct AvatarLinkClient {
    inner: Arc<Inner>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

struct Inner {
    config: VTubeStudioConfig,
    plugin: PluginInfo,
    link: Arc<Link>,
    dispatcher: Arc<TriggerDispatcher>,
    idle_pool: IdleEmotePool,
    credentials: Arc<dyn CredentialStore>,
    connector: Arc<dyn Connector>,
    cancel: CancellationToken,
}

/// Aborts the idle task when the session that started it ends.
struct IdleTask(JoinHandle<()>);

impl Drop for IdleTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl AvatarLinkClient {
    /// Build a client. Configuration errors are returned here, before any
    /// loop is entered.
    pub fn new(
        config: VTubeStudioConfig,
        credentials: Arc<dyn CredentialStore>,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, AvatarLinkError> {
        config.validate()?;

        let link = Arc::new(Link::new(&config.endpoint_uri()));
        let dispatcher = Arc::new(TriggerDispatcher::from_config(link.clone(), &config));
        let idle_pool = if config.idle_enabled {
            IdleEmotePool::new(config.idle_emotes.iter().cloned())
        } else {
            IdleEmotePool::default()
        };
        let plugin = PluginInfo {
            name: config.plugin_name.clone(),
            developer: config.plugin_developer.clone(),
        };

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                plugin,
                link,
                dispatcher,
                idle_pool,
                credentials,
                connector,
                cancel: CancellationToken::new(),
            }),
            task: Arc::new(Mutex::new(None)),
        })
    }

    /// Production wiring: WebSocket transport, token persisted back into the
    /// config file at `config_path`.
    pub fn from_config_file(config: VTubeStudioConfig, config_path: &Path) -> Result<Self, AvatarLinkError> {
        Self::new(
            config,
            Arc::new(JsonCredentialStore::new(config_path)),
            Arc::new(WebSocketConnector::default()),
        )
    }

    pub fn enabled(&self) -> bool {
        self.inner.config.enabled
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.link.state()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.link.is_authenticated()
    }

    pub fn dispatcher(&self) -> Arc<TriggerDispatcher> {
        self.inner.dispatcher.clone()
    }

    /// Whether the connection task is alive.
    pub async fn is_running(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Start the connection task. Returns immediately; connecting,
    /// authenticating and reconnecting all happen in the background.
    pub async fn connect(&self) -> Result<(), AvatarLinkError> {
        if !self.enabled() {
            info!("VTube Studio link disabled, not connecting");
            return Ok(());
        }
        if self.inner.cancel.is_cancelled() {
            return Err(AvatarLinkError::NotConnected);
        }

        let mut task = self.task.lock().await;
        if task.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            debug!("VTube Studio connection task already running");
            return Ok(());
        }

        info!(endpoint = %self.inner.config.endpoint_uri(), "Connecting to VTube Studio");
        let inner = self.inner.clone();
        *task = Some(tokio::spawn(async move { inner.run().await }));
        Ok(())
    }

    /// Stop reconnecting, stop the idle cycle and close the socket. The
    /// client cannot be reconnected afterwards.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!(error = %e, "VTube Studio connection task panicked");
                }
            }
        }
        // Covers the case where connect() was never called.
        if let Some(transport) = self.inner.link.closing() {
            transport.close().await;
        }
        self.inner.link.disconnected();
        info!("VTube Studio link shut down");
    }

    // ── Dispatcher hooks ────────────────────────────────

    pub fn set_current_emotion(&self, label: &str) {
        self.inner.dispatcher.set_current_emotion(label);
    }

    pub async fn play_idle(&self) -> Result<(), AvatarLinkError> {
        self.inner.dispatcher.play_idle().await
    }

    pub async fn play_thinking(&self) -> Result<(), AvatarLinkError> {
        self.inner.dispatcher.play_thinking().await
    }

    pub async fn play_speaking(&self) -> Result<(), AvatarLinkError> {
        self.inner.dispatcher.play_speaking().await
    }

    pub async fn play_emotion(&self, label: &str) -> Result<(), AvatarLinkError> {
        self.inner.dispatcher.play_emotion(label).await
    }
}

impl Inner {
    /// Reconnect loop. Retries forever at a fixed interval until cancelled.
    async fn run(self: Arc<Self>) {
        let uri = self.link.endpoint_uri();
        let mut attempt: u64 = 0;

        while !self.cancel.is_cancelled() {
            attempt += 1;
            self.link.begin_connect();

            let connected = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = self.connector.connect(&uri) => result,
            };

            match connected {
                Ok(transport) => {
                    attempt = 0;
                    self.link.opened(transport.clone());
                    info!(endpoint = %uri, "Connected to VTube Studio");

                    let ended = tokio::select! {
                        _ = self.cancel.cancelled() => None,
                        reason = self.run_session(transport.as_ref()) => Some(reason),
                    };

                    if let Some(transport) = self.link.closing() {
                        transport.close().await;
                    }
                    self.link.disconnected();

                    match ended {
                        None => break,
                        Some(reason) => {
                            warn!(error = %reason, "VTube Studio session ended, reconnecting");
                        }
                    }
                }
                Err(e) => {
                    self.link.disconnected();
                    warn!(
                        attempt,
                        error = %e,
                        retry_in_secs = self.config.reconnect_interval_secs,
                        "Failed to connect to VTube Studio"
                    );
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.reconnect_interval()) => {}
            }
        }

        debug!("VTube Studio connection loop stopped");
    }

    /// One connection lifetime: handshake, idle cycle, inbound reader.
    /// Returns why the session ended.
    async fn run_session(&self, transport: &dyn AvatarTransport) -> AvatarLinkError {
        let handshake = Handshake::new(
            &self.link,
            transport,
            self.credentials.as_ref(),
            &self.plugin,
            self.config.auth_poll_interval(),
        );

        let token = match handshake.run().await {
            Ok(token) => token,
            Err(e) => {
                if !e.is_connection_loss() {
                    error!(error = %e, "VTube Studio authentication aborted");
                }
                return e;
            }
        };

        if let Err(e) = self.link.authenticated(token) {
            return e;
        }
        info!("VTube Studio authenticated");

        let _idle = self.start_idle();

        loop {
            match transport.recv().await {
                Ok(message) => match InboundMessage::parse(&message) {
                    Ok(InboundMessage::ApiError { error_id, message }) => {
                        warn!(error_id, %message, "VTube Studio API error");
                    }
                    Ok(other) => debug!(?other, "VTube Studio message"),
                    Err(e) => warn!(error = %e, "Ignoring malformed VTube Studio message"),
                },
                Err(AvatarLinkError::Protocol(e)) => {
                    warn!(error = %e, "Ignoring malformed VTube Studio frame");
                }
                Err(e) => return e,
            }
        }
    }

    fn start_idle(&self) -> Option<IdleTask> {
        if !self.config.idle_enabled {
            return None;
        }
        let scheduler = IdleScheduler::new(
            self.dispatcher.clone(),
            self.idle_pool.clone(),
            IdleDelay::from_config(&self.config),
        );
        Some(IdleTask(scheduler.spawn(self.cancel.child_token())))
    }
}
