//! Error types for the VTube Studio link.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AvatarLinkError {
    /// The transport is not in the `Open` state.
    #[error("VTube Studio link is not connected")]
    NotConnected,

    /// The session has not completed the authentication handshake.
    #[error("VTube Studio session is not authenticated")]
    NotAuthenticated,

    /// Socket refused, closed or failed mid-frame.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A message arrived that could not be parsed as an API envelope.
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The endpoint refused the credential we presented.
    #[error("Authentication rejected by VTube Studio")]
    AuthenticationRejected,

    #[error("Credential store error: {0}")]
    Credential(String),
}

impl AvatarLinkError {
    /// Errors that end the current connection and send the client back to
    /// the reconnect loop.
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::NotConnected)
    }
}

impl From<serde_json::Error> for AvatarLinkError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for AvatarLinkError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
