//! VTube Studio avatar link.
//!
//! Connects to the VTube Studio public API over WebSocket, authenticates as a
//! plugin, and fires hotkeys in response to chat activity and on an idle
//! timer.

pub mod auth;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod idle;
pub mod protocol;
pub mod session;
pub mod transport;

#[cfg(test)]
mod tests;

pub use client::AvatarLinkClient;
pub use config::{CredentialStore, JsonCredentialStore, MemoryCredentialStore, VTubeStudioConfig};
pub use dispatcher::TriggerDispatcher;
pub use error::AvatarLinkError;
pub use session::ConnectionState;
