//! Authentication handshake.
//!
//! Flow: present the stored token if there is one; otherwise (or if it is
//! rejected) request a new token and wait, without a deadline, for the user
//! to approve the plugin inside VTube Studio. The candidate token is
//! persisted as soon as it is seen so a restart during the approval wait
//! does not lose it.
//!
//! A stored token is only discarded on an explicit `authenticated: false`.
//! An `APIError` reply leaves it in place and the same token is presented
//! again after the poll interval.

use super::config::CredentialStore;
use super::error::AvatarLinkError;
use super::protocol::{self, InboundMessage, PluginInfo};
use super::session::Link;
use super::transport::AvatarTransport;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Outcome of presenting a token with an `AuthenticationRequest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Presentation {
    Accepted,
    Rejected,
    /// VTube Studio answered with an `APIError`; the token was not judged.
    Retry,
}

pub struct Handshake<'a> {
    link: &'a Link,
    transport: &'a dyn AvatarTransport,
    credentials: &'a dyn CredentialStore,
    plugin: &'a PluginInfo,
    poll_interval: Duration,
}

impl<'a> Handshake<'a> {
    pub fn new(
        link: &'a Link,
        transport: &'a dyn AvatarTransport,
        credentials: &'a dyn CredentialStore,
        plugin: &'a PluginInfo,
        poll_interval: Duration,
    ) -> Self {
        Self {
            link,
            transport,
            credentials,
            plugin,
            poll_interval,
        }
    }

    /// Run the handshake to completion. Returns the accepted token.
    ///
    /// Any malformed response aborts with `Protocol`; the caller drops the
    /// connection and the next attempt starts over from the stored token.
    pub async fn run(&self) -> Result<String, AvatarLinkError> {
        if let Some(token) = self.credentials.load() {
            info!("Presenting stored VTube Studio token");
            loop {
                match self.present(&token).await? {
                    Presentation::Accepted => {
                        info!("Stored VTube Studio token accepted");
                        return Ok(token);
                    }
                    Presentation::Rejected => {
                        warn!("Stored VTube Studio token rejected, requesting a new one");
                        self.forget_token();
                        break;
                    }
                    Presentation::Retry => {
                        tokio::time::sleep(self.poll_interval).await;
                    }
                }
            }
        }

        self.request_new_token().await
    }

    /// Send an `AuthenticationRequest` and classify the answer.
    async fn present(&self, token: &str) -> Result<Presentation, AvatarLinkError> {
        let response = self
            .link
            .exchange(self.transport, protocol::auth_request(self.plugin, token))
            .await?;

        match InboundMessage::parse(&response)? {
            InboundMessage::AuthResponse {
                authenticated,
                reason,
            } => {
                if authenticated {
                    Ok(Presentation::Accepted)
                } else {
                    debug!(reason = reason.as_deref().unwrap_or(""), "token not accepted");
                    Ok(Presentation::Rejected)
                }
            }
            msg if msg.is_auth_pending() => {
                info!("Authentication already pending in VTube Studio, waiting");
                Ok(Presentation::Retry)
            }
            InboundMessage::ApiError { error_id, message } => {
                warn!(error_id, %message, "VTube Studio API error while presenting token, retrying");
                Ok(Presentation::Retry)
            }
            other => Err(AvatarLinkError::Protocol(format!(
                "unexpected response to {}: {:?}",
                protocol::AUTH_REQUEST,
                other
            ))),
        }
    }

    /// Approval-wait loop.
    async fn request_new_token(&self) -> Result<String, AvatarLinkError> {
        info!("Requesting VTube Studio token, approve the plugin in VTube Studio");

        let mut candidate: Option<String> = None;
        let mut next_request: Option<Value> = Some(protocol::token_request(self.plugin));

        loop {
            let response = match next_request.take() {
                Some(request) => self.link.exchange(self.transport, request).await?,
                None => self.link.receive(self.transport).await?,
            };

            let mut poll_again = true;
            match InboundMessage::parse(&response)? {
                InboundMessage::TokenResponse { token, approved } => {
                    if candidate.is_none() {
                        if let Some(token) = token {
                            self.adopt(&token);
                            candidate = Some(token);
                        }
                    }
                    if approved {
                        let token = candidate.clone().ok_or_else(|| {
                            AvatarLinkError::Protocol("token approved but none was issued".to_string())
                        })?;
                        info!("VTube Studio token approved");
                        match self.present(&token).await? {
                            Presentation::Accepted => return Ok(token),
                            Presentation::Rejected => {
                                self.forget_token();
                                return Err(AvatarLinkError::AuthenticationRejected);
                            }
                            Presentation::Retry => {}
                        }
                    } else {
                        debug!("Token not yet approved");
                    }
                }
                InboundMessage::AuthResponse {
                    authenticated: true,
                    ..
                } => {
                    let token = candidate.ok_or_else(|| {
                        AvatarLinkError::Protocol("authenticated without a token".to_string())
                    })?;
                    info!("VTube Studio token approved");
                    return Ok(token);
                }
                InboundMessage::AuthResponse { .. } => {
                    debug!("Token not yet approved");
                }
                msg if msg.is_auth_pending() => {
                    info!("Authentication already pending in VTube Studio, waiting");
                }
                InboundMessage::ApiError { error_id, message } => {
                    warn!(error_id, %message, "VTube Studio API error during authentication, retrying");
                }
                InboundMessage::Other { message_type } => {
                    warn!(%message_type, "Unrecognized message during authentication");
                    poll_again = false;
                }
            }

            if poll_again {
                next_request = Some(match candidate.as_deref() {
                    Some(token) => protocol::auth_request(self.plugin, token),
                    None => protocol::token_request(self.plugin),
                });
                tokio::time::sleep(self.poll_interval).await;
            }
        }
    }

    fn adopt(&self, token: &str) {
        info!("Received VTube Studio token, persisting it");
        if let Err(e) = self.credentials.store(token) {
            error!(error = %e, "Failed to persist VTube Studio token");
        }
    }

    fn forget_token(&self) {
        if let Err(e) = self.credentials.clear() {
            error!(error = %e, "Failed to clear VTube Studio token");
        }
    }
}
