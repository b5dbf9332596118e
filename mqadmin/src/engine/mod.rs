//! Adapter seam to the broker engine.
//!
//! The engine owns the wire protocol, session state and message fan-out;
//! this module only defines the contract the lifecycle manager drives it
//! through: asynchronous start/stop, live client enumeration, per-client
//! disconnect, and the observer interface events flow back on.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::utils::Timestamp;

pub mod inproc;

/// Engine-native record for one connected client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineClient {
    pub id: String,
    pub endpoint: Option<String>,
    pub connected_at: Timestamp,
    pub protocol_version: String,
}

/// Reason code forwarded to the engine when a client is disconnected
/// server-side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    NormalDisconnection,
    KeepAliveTimeout,
    ProtocolError,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::NormalDisconnection => write!(f, "normal disconnection"),
            DisconnectReason::KeepAliveTimeout => write!(f, "keep-alive timeout"),
            DisconnectReason::ProtocolError => write!(f, "protocol error"),
        }
    }
}

/// Verdict of the connect-authentication hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthResult {
    Allow,
    BadUsernameOrPassword,
    NotAuthorized,
}

/// Engine startup options, derived from the configuration snapshot held at
/// start time. A configuration update while the engine is running does not
/// reach into these; it is picked up by the next start.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub laddr: SocketAddr,
    pub backlog: u32,
    pub timeout: Duration,
    pub authenticate: bool,
}

/// Observer interface the lifecycle manager implements.
///
/// One `Arc<dyn EngineEvents>` is handed to the engine at start and released
/// when the engine stops, so no callback can fire into a torn-down manager.
/// The engine invokes these from its own I/O tasks, without coordination
/// with administrative callers.
#[async_trait]
pub trait EngineEvents: Sync + Send {
    ///Connection established, after a successful handshake
    async fn client_connected(&self, client: &EngineClient);

    ///Transport connection closed
    async fn client_disconnected(&self, client_id: &str, reason: &str);

    ///Publish message observed; pass-through only, must not mutate the message
    async fn message_publish(&self, client_id: &str, topic: &str);

    ///Authenticate a connecting client; only consulted when
    ///[`EngineOptions::authenticate`] is set
    async fn client_authenticate(
        &self,
        client_id: &str,
        username: Option<&str>,
        password: Option<&str>,
    ) -> AuthResult;
}

/// The broker engine contract.
///
/// Errors are the engine's native ones; the lifecycle manager wraps them into
/// its own taxonomy at the boundary.
#[async_trait]
pub trait Engine: Sync + Send {
    /// Start serving and register the event observer.
    async fn start(&self, events: Arc<dyn EngineEvents>) -> anyhow::Result<()>;

    /// Stop serving and release the event observer.
    async fn stop(&self) -> anyhow::Result<()>;

    /// Enumerate the currently connected clients.
    async fn clients(&self) -> anyhow::Result<Vec<EngineClient>>;

    /// Disconnect one client; removal is confirmed asynchronously through
    /// [`EngineEvents::client_disconnected`].
    async fn disconnect(&self, client_id: &str, reason: DisconnectReason) -> anyhow::Result<()>;
}

/// Builds one engine instance per successful start.
pub trait EngineFactory: Sync + Send {
    fn build(&self, opts: EngineOptions) -> anyhow::Result<Arc<dyn Engine>>;
}
