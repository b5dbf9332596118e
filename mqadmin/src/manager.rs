//! Broker lifecycle management.
//!
//! [`BrokerManager`] owns the single engine instance, the held
//! configuration, the started-at timestamp and the connected-client
//! counter, and presents consistent point-in-time snapshots to callers
//! invoked concurrently from the control API.
//!
//! ## Concurrency Model
//! - All reads and writes of {engine handle, configuration, started-at} go
//!   through one exclusive state lock, held only for in-memory field access.
//! - Start/stop transitions are serialized by a separate async guard so a
//!   slow engine startup never blocks status or configuration reads, and two
//!   racing starts can never produce two live engine instances.
//! - The connected-client counter is a lock-free atomic, updated from the
//!   engine's own notification tasks without contending with the state lock.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::ops::Deref;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::config::{AuthCredentials, BrokerConfig};
use crate::engine::{
    AuthResult, DisconnectReason, Engine, EngineClient, EngineEvents, EngineFactory, EngineOptions,
};
use crate::error::{AdminError, Result};
use crate::utils::{format_timestamp, timestamp_secs, Counter, Timestamp};

/// Read-only status projection, computed fresh on each query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerStatus {
    pub is_running: bool,
    pub started_at: Option<Timestamp>,
    pub connected_clients: usize,
    pub port: u16,
    //Seconds since start, present only while running.
    pub uptime: Option<u64>,
}

impl BrokerStatus {
    #[inline]
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "is_running": self.is_running,
            "started_at": self.started_at.map(format_timestamp),
            "connected_clients": self.connected_clients,
            "port": self.port,
            "uptime": self.uptime,
        })
    }
}

/// One currently connected client, as reported by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectedClient {
    pub client_id: String,
    pub endpoint: Option<String>,
    pub connected_at: Timestamp,
    pub protocol_version: String,
}

impl From<EngineClient> for ConnectedClient {
    fn from(c: EngineClient) -> Self {
        Self {
            client_id: c.id,
            endpoint: c.endpoint,
            connected_at: c.connected_at,
            protocol_version: c.protocol_version,
        }
    }
}

impl ConnectedClient {
    #[inline]
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "client_id": self.client_id,
            "endpoint": self.endpoint,
            "connected_at": format_timestamp(self.connected_at),
            "protocol_version": self.protocol_version,
        })
    }
}

struct State {
    engine: Option<Arc<dyn Engine>>,
    config: BrokerConfig,
    started_at: Option<Timestamp>,
}

#[derive(Clone)]
pub struct BrokerManager {
    inner: Arc<BrokerManagerInner>,
}

pub struct BrokerManagerInner {
    host: IpAddr,
    auth: Option<AuthCredentials>,
    factory: Box<dyn EngineFactory>,
    state: RwLock<State>,
    transition: tokio::sync::Mutex<()>,
    connected: Counter,
}

impl Deref for BrokerManager {
    type Target = BrokerManagerInner;
    #[inline]
    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl fmt::Debug for BrokerManager {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "BrokerManager ...")?;
        Ok(())
    }
}

impl BrokerManager {
    pub fn new(
        host: IpAddr,
        config: BrokerConfig,
        auth: Option<AuthCredentials>,
        factory: Box<dyn EngineFactory>,
    ) -> Self {
        BrokerManager {
            inner: Arc::new(BrokerManagerInner {
                host,
                auth,
                factory,
                state: RwLock::new(State { engine: None, config, started_at: None }),
                transition: tokio::sync::Mutex::new(()),
                connected: Counter::new(),
            }),
        }
    }

    /// Momentary consistent snapshot of the running flag, start timestamp,
    /// client count and configured port. Never fails, never suspends.
    pub fn status(&self) -> BrokerStatus {
        let state = self.state.read();
        let started_at = state.started_at;
        BrokerStatus {
            is_running: state.engine.is_some(),
            started_at,
            connected_clients: self.connected.count().max(0) as usize,
            port: state.config.port,
            uptime: started_at.map(|t| (timestamp_secs() - t).max(0) as u64),
        }
    }

    /// Currently held configuration, by value.
    pub fn configuration(&self) -> BrokerConfig {
        self.state.read().config.clone()
    }

    /// Replace the held configuration wholesale. Does not affect a running
    /// engine; the new values are picked up by the next start.
    pub fn update_configuration(&self, config: BrokerConfig) -> Result<()> {
        config.validate()?;
        let port = config.port;
        self.state.write().config = config;
        log::info!("broker configuration updated, port: {port}");
        Ok(())
    }

    /// Live client enumeration from the engine; an empty list when stopped.
    pub async fn connected_clients(&self) -> Result<Vec<ConnectedClient>> {
        let engine = { self.state.read().engine.clone() };
        let Some(engine) = engine else {
            return Ok(Vec::new());
        };
        let clients = engine.clients().await.map_err(AdminError::Engine)?;
        Ok(clients.into_iter().map(ConnectedClient::from).collect())
    }

    /// Start the broker engine with the held configuration.
    ///
    /// Idempotent: a start while already running is a warning-level no-op.
    /// On failure or cancellation the new engine instance is discarded and
    /// the manager stays stopped.
    pub async fn start(&self, cancel: &CancellationToken) -> Result<()> {
        let _transition = self.transition.lock().await;

        let opts = {
            let state = self.state.read();
            if state.engine.is_some() {
                log::warn!("broker is already running");
                return Ok(());
            }
            self.engine_options(&state.config)
        };
        let port = opts.laddr.port();

        log::info!("starting broker on port {port}...");

        let engine = self.factory.build(opts).map_err(AdminError::StartFailed)?;
        let events: Arc<dyn EngineEvents> = Arc::new(self.clone());

        let started = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                log::warn!("broker start cancelled");
                return Err(AdminError::Cancelled);
            }
            r = engine.start(events) => r,
        };

        match started {
            Ok(()) => {
                {
                    let mut state = self.state.write();
                    state.engine = Some(engine);
                    state.started_at = Some(timestamp_secs());
                }
                self.connected.current_set(0);
                log::info!("broker started successfully on port {port}");
                Ok(())
            }
            Err(e) => {
                log::error!("broker start failed, {e:?}");
                Err(AdminError::StartFailed(e))
            }
        }
    }

    /// Stop the broker engine.
    ///
    /// Idempotent: a stop while already stopped is a warning-level no-op.
    /// The engine reference is dropped whether the shutdown was graceful or
    /// abrupt; the client counter is reset by the next successful start, as
    /// no further notifications arrive from a stopped engine.
    pub async fn stop(&self, cancel: &CancellationToken) -> Result<()> {
        let _transition = self.transition.lock().await;

        let engine = { self.state.read().engine.clone() };
        let Some(engine) = engine else {
            log::warn!("broker is not running");
            return Ok(());
        };

        log::info!("stopping broker...");

        let stopped = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AdminError::Cancelled),
            r = engine.stop() => r.map_err(AdminError::StopFailed),
        };

        {
            let mut state = self.state.write();
            state.engine = None;
            state.started_at = None;
        }

        match stopped {
            Ok(()) => {
                log::info!("broker stopped successfully");
                Ok(())
            }
            Err(AdminError::Cancelled) => {
                log::warn!("broker stop cancelled");
                Err(AdminError::Cancelled)
            }
            Err(e) => {
                log::error!("broker stop failed, {e:?}");
                Err(e)
            }
        }
    }

    /// Ask the engine to drop one client with a normal-disconnection reason
    /// code. Fire-and-forget: the removal is confirmed asynchronously by the
    /// disconnect notification, which adjusts the counter.
    pub async fn disconnect_client(&self, client_id: &str) -> Result<()> {
        if client_id.trim().is_empty() {
            return Err(AdminError::InvalidClientId);
        }

        let engine = { self.state.read().engine.clone() };
        let Some(engine) = engine else {
            return Err(AdminError::NotRunning);
        };

        engine
            .disconnect(client_id, DisconnectReason::NormalDisconnection)
            .await
            .map_err(AdminError::Engine)?;
        log::info!("client {client_id} disconnected by administrator");
        Ok(())
    }

    #[inline]
    fn is_running(&self) -> bool {
        self.state.read().engine.is_some()
    }

    #[inline]
    fn engine_options(&self, config: &BrokerConfig) -> EngineOptions {
        EngineOptions {
            laddr: SocketAddr::new(self.host, config.port),
            backlog: config.max_pending_connections,
            timeout: config.timeout(),
            authenticate: config.enable_authentication,
        }
    }
}

#[async_trait]
impl EngineEvents for BrokerManager {
    async fn client_connected(&self, client: &EngineClient) {
        //Notifications from an engine that is no longer the live instance
        //are dropped.
        if !self.is_running() {
            log::debug!("connect notification for {} ignored, broker is stopped", client.id);
            return;
        }
        self.connected.inc();
        log::info!(
            "client connected: {} from {} using protocol {}",
            client.id,
            client.endpoint.as_deref().unwrap_or("[unknown]"),
            client.protocol_version
        );
    }

    async fn client_disconnected(&self, client_id: &str, reason: &str) {
        if !self.is_running() {
            log::debug!("disconnect notification for {client_id} ignored, broker is stopped");
            return;
        }
        self.connected.dec();
        log::info!("client disconnected: {client_id}, reason: {reason}");
    }

    async fn message_publish(&self, client_id: &str, topic: &str) {
        if self.state.read().config.enable_verbose_logging {
            log::debug!("message published by {client_id} to topic {topic}");
        }
    }

    async fn client_authenticate(
        &self,
        client_id: &str,
        username: Option<&str>,
        password: Option<&str>,
    ) -> AuthResult {
        let (Some(username), Some(password)) = (username, password) else {
            log::warn!("client {client_id} authentication failed, missing credentials");
            return AuthResult::BadUsernameOrPassword;
        };
        if username.is_empty() || password.is_empty() {
            log::warn!("client {client_id} authentication failed, missing credentials");
            return AuthResult::BadUsernameOrPassword;
        }

        match self.auth.as_ref() {
            //No credential store configured, any non-empty pair passes.
            None => {
                log::info!("client {client_id} authenticated successfully");
                AuthResult::Allow
            }
            Some(creds) if creds.username != username => {
                log::warn!("client {client_id} authentication failed, unknown user {username}");
                AuthResult::NotAuthorized
            }
            Some(creds) if creds.password != password => {
                log::warn!("client {client_id} authentication failed, bad password for {username}");
                AuthResult::BadUsernameOrPassword
            }
            Some(_) => {
                log::info!("client {client_id} authenticated successfully");
                AuthResult::Allow
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use anyhow::anyhow;
    use parking_lot::Mutex;

    use super::*;
    use crate::engine::inproc::{InprocEngine, InprocEngineFactory};

    const LOCALHOST: IpAddr = IpAddr::V4(std::net::Ipv4Addr::LOCALHOST);

    fn config(port: u16) -> BrokerConfig {
        BrokerConfig { port, ..Default::default() }
    }

    fn manager(port: u16) -> BrokerManager {
        BrokerManager::new(LOCALHOST, config(port), None, Box::new(InprocEngineFactory::new()))
    }

    fn engine_client(id: &str) -> EngineClient {
        EngineClient {
            id: id.into(),
            endpoint: Some("127.0.0.1:50000".into()),
            connected_at: timestamp_secs(),
            protocol_version: "V5".into(),
        }
    }

    struct FailEngineFactory;

    impl EngineFactory for FailEngineFactory {
        fn build(&self, _opts: EngineOptions) -> anyhow::Result<Arc<dyn Engine>> {
            Err(anyhow!("engine unavailable"))
        }
    }

    /// Counts builds and keeps a handle to the last engine so tests can
    /// drive attachments through it.
    #[derive(Default)]
    struct TrackingFactory {
        builds: Arc<AtomicUsize>,
        last: Arc<Mutex<Option<Arc<InprocEngine>>>>,
    }

    impl EngineFactory for TrackingFactory {
        fn build(&self, opts: EngineOptions) -> anyhow::Result<Arc<dyn Engine>> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            let engine = Arc::new(InprocEngine::new(opts));
            *self.last.lock() = Some(engine.clone());
            Ok(engine)
        }
    }

    fn tracking_manager(port: u16, auth: Option<AuthCredentials>) -> (BrokerManager, Arc<AtomicUsize>, Arc<Mutex<Option<Arc<InprocEngine>>>>) {
        let factory = TrackingFactory::default();
        let builds = factory.builds.clone();
        let last = factory.last.clone();
        let mgr = BrokerManager::new(LOCALHOST, config(port), auth, Box::new(factory));
        (mgr, builds, last)
    }

    #[tokio::test]
    async fn test_status_before_start() {
        let mgr = manager(27401);
        let status = mgr.status();
        assert!(!status.is_running);
        assert!(status.started_at.is_none());
        assert!(status.uptime.is_none());
        assert_eq!(status.connected_clients, 0);
        assert_eq!(status.port, 27401);
    }

    #[tokio::test]
    async fn test_update_configuration_rejects_invalid_port() {
        let mgr = manager(27402);
        let held = mgr.configuration();

        let bad = BrokerConfig { port: 0, ..Default::default() };
        assert!(matches!(mgr.update_configuration(bad), Err(AdminError::InvalidConfiguration(_))));
        //A rejected update must not alter the held configuration.
        assert_eq!(mgr.configuration(), held);
    }

    #[tokio::test]
    async fn test_update_and_get_configuration_round_trip() {
        let mgr = manager(27403);
        let cfg = BrokerConfig {
            port: 2883,
            max_pending_connections: 256,
            enable_authentication: true,
            enable_verbose_logging: true,
            communication_timeout: 60,
        };
        mgr.update_configuration(cfg.clone()).unwrap();
        assert_eq!(mgr.configuration(), cfg);
    }

    #[tokio::test]
    async fn test_start_and_stop_update_status() {
        let mgr = manager(27404);
        let cancel = CancellationToken::new();

        mgr.start(&cancel).await.unwrap();
        let status = mgr.status();
        assert!(status.is_running);
        assert!(status.started_at.is_some());
        assert!(status.uptime.is_some());

        mgr.stop(&cancel).await.unwrap();
        let status = mgr.status();
        assert!(!status.is_running);
        assert!(status.started_at.is_none());
        assert!(status.uptime.is_none());
    }

    #[tokio::test]
    async fn test_double_start_keeps_single_engine() {
        let (mgr, builds, _) = tracking_manager(27405, None);
        let cancel = CancellationToken::new();

        mgr.start(&cancel).await.unwrap();
        let first_started_at = mgr.status().started_at;

        tokio::time::sleep(Duration::from_millis(1100)).await;
        mgr.start(&cancel).await.unwrap();

        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(mgr.status().started_at, first_started_at);
        mgr.stop(&cancel).await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_starts_keep_single_engine() {
        let (mgr, builds, _) = tracking_manager(27420, None);
        let cancel = CancellationToken::new();

        let (a, b) = tokio::join!(mgr.start(&cancel), mgr.start(&cancel));
        a.unwrap();
        b.unwrap();

        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(mgr.status().is_running);
        mgr.stop(&cancel).await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_when_stopped_is_noop() {
        let mgr = manager(27406);
        mgr.stop(&CancellationToken::new()).await.unwrap();
        assert!(!mgr.status().is_running);
    }

    #[tokio::test]
    async fn test_disconnect_client_validation() {
        let mgr = manager(27407);
        assert!(matches!(mgr.disconnect_client("").await, Err(AdminError::InvalidClientId)));
        assert!(matches!(mgr.disconnect_client("   ").await, Err(AdminError::InvalidClientId)));
        assert!(matches!(mgr.disconnect_client("x").await, Err(AdminError::NotRunning)));
    }

    #[tokio::test]
    async fn test_counter_tracks_notifications() {
        let mgr = manager(27408);
        let cancel = CancellationToken::new();
        mgr.start(&cancel).await.unwrap();

        for i in 0..3 {
            mgr.client_connected(&engine_client(&format!("dev-{i:02}"))).await;
        }
        assert_eq!(mgr.status().connected_clients, 3);

        mgr.client_disconnected("dev-00", "normal disconnection").await;
        mgr.client_disconnected("dev-01", "normal disconnection").await;
        assert_eq!(mgr.status().connected_clients, 1);

        //Duplicate or out-of-order notifications can never drive the count
        //negative.
        mgr.client_disconnected("dev-02", "normal disconnection").await;
        mgr.client_disconnected("dev-02", "normal disconnection").await;
        mgr.client_disconnected("dev-02", "normal disconnection").await;
        assert_eq!(mgr.status().connected_clients, 0);

        mgr.stop(&cancel).await.unwrap();
    }

    #[tokio::test]
    async fn test_notifications_while_stopped_are_ignored() {
        let mgr = manager(27409);
        mgr.client_connected(&engine_client("late-01")).await;
        mgr.client_disconnected("late-01", "normal disconnection").await;
        assert_eq!(mgr.status().connected_clients, 0);
    }

    #[tokio::test]
    async fn test_clients_empty_when_stopped() {
        let mgr = manager(27410);
        assert!(mgr.connected_clients().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_start_failure_leaves_stopped() {
        let mgr = BrokerManager::new(LOCALHOST, config(27411), None, Box::new(FailEngineFactory));
        let cancel = CancellationToken::new();
        assert!(matches!(mgr.start(&cancel).await, Err(AdminError::StartFailed(_))));
        let status = mgr.status();
        assert!(!status.is_running);
        assert!(status.started_at.is_none());
    }

    #[tokio::test]
    async fn test_start_failure_on_port_conflict() {
        let cancel = CancellationToken::new();
        let first = manager(27412);
        first.start(&cancel).await.unwrap();

        let second = manager(27412);
        assert!(matches!(second.start(&cancel).await, Err(AdminError::StartFailed(_))));
        assert!(!second.status().is_running);

        first.stop(&cancel).await.unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_start_stays_stopped() {
        let mgr = manager(27413);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(mgr.start(&cancel).await, Err(AdminError::Cancelled)));
        assert!(!mgr.status().is_running);
    }

    #[tokio::test]
    async fn test_configuration_update_does_not_touch_running_engine() {
        let (mgr, builds, _) = tracking_manager(27414, None);
        let cancel = CancellationToken::new();
        mgr.start(&cancel).await.unwrap();

        mgr.update_configuration(config(27415)).unwrap();
        let status = mgr.status();
        assert!(status.is_running);
        assert_eq!(status.port, 27415);
        assert_eq!(builds.load(Ordering::SeqCst), 1);

        //The new port is bound by the next start.
        mgr.stop(&cancel).await.unwrap();
        mgr.start(&cancel).await.unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 2);
        mgr.stop(&cancel).await.unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_client_forwards_to_engine() {
        let (mgr, _, last) = tracking_manager(27416, None);
        let cancel = CancellationToken::new();
        mgr.start(&cancel).await.unwrap();

        let engine = last.lock().clone().unwrap();
        engine.attach("dev-01", None, "V5", None, None).await.unwrap();
        assert_eq!(mgr.status().connected_clients, 1);

        mgr.disconnect_client("dev-01").await.unwrap();
        assert!(mgr.connected_clients().await.unwrap().is_empty());
        assert_eq!(mgr.status().connected_clients, 0);

        //Unknown client ids surface the engine's native error.
        assert!(matches!(mgr.disconnect_client("dev-01").await, Err(AdminError::Engine(_))));

        mgr.stop(&cancel).await.unwrap();
    }

    #[tokio::test]
    async fn test_authenticate_verdicts() {
        let auth = AuthCredentials { username: "admin".into(), password: "secret".into() };
        let (mgr, _, _) = tracking_manager(27417, Some(auth));

        assert_eq!(mgr.client_authenticate("c1", None, None).await, AuthResult::BadUsernameOrPassword);
        assert_eq!(mgr.client_authenticate("c1", Some(""), Some("")).await, AuthResult::BadUsernameOrPassword);
        assert_eq!(
            mgr.client_authenticate("c1", Some("intruder"), Some("secret")).await,
            AuthResult::NotAuthorized
        );
        assert_eq!(
            mgr.client_authenticate("c1", Some("admin"), Some("wrong")).await,
            AuthResult::BadUsernameOrPassword
        );
        assert_eq!(mgr.client_authenticate("c1", Some("admin"), Some("secret")).await, AuthResult::Allow);
    }

    #[tokio::test]
    async fn test_authenticate_without_credential_store() {
        let mgr = manager(27418);
        assert_eq!(mgr.client_authenticate("c1", Some("any"), Some("pair")).await, AuthResult::Allow);
        assert_eq!(mgr.client_authenticate("c1", None, Some("pair")).await, AuthResult::BadUsernameOrPassword);
    }

    #[tokio::test]
    async fn test_full_scenario() {
        let (mgr, _, last) = tracking_manager(27419, None);
        let cancel = CancellationToken::new();

        mgr.start(&cancel).await.unwrap();
        assert!(mgr.status().is_running);

        let engine = last.lock().clone().unwrap();
        engine.attach("dev-01", Some("127.0.0.1:51000".into()), "V5", None, None).await.unwrap();
        assert_eq!(mgr.status().connected_clients, 1);

        let clients = mgr.connected_clients().await.unwrap();
        assert_eq!(clients.len(), 1);
        assert_eq!(clients[0].client_id, "dev-01");
        assert_eq!(clients[0].protocol_version, "V5");

        engine.detach("dev-01", "normal disconnection").await;
        assert_eq!(mgr.status().connected_clients, 0);

        mgr.stop(&cancel).await.unwrap();
        assert!(!mgr.status().is_running);
    }
}
