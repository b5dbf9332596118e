//! In-process broker engine.
//!
//! Used by the bundled `mqadmind` binary and by tests. It owns the
//! configured listener address while running (so starting surfaces real
//! bind failures and no other process can claim the port), and keeps a
//! registry of in-process client attachments. Wire-protocol sessions are
//! out of scope here; deployments that need network MQTT supply their own
//! [`Engine`] through [`EngineFactory`].

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpListener;

use crate::engine::{AuthResult, DisconnectReason, Engine, EngineClient, EngineEvents, EngineFactory, EngineOptions};
use crate::utils::timestamp_secs;

#[derive(Debug, Default)]
pub struct InprocEngineFactory {}

impl InprocEngineFactory {
    #[inline]
    pub fn new() -> Self {
        Self {}
    }
}

impl EngineFactory for InprocEngineFactory {
    fn build(&self, opts: EngineOptions) -> anyhow::Result<Arc<dyn Engine>> {
        Ok(Arc::new(InprocEngine::new(opts)))
    }
}

pub struct InprocEngine {
    opts: EngineOptions,
    listener: Mutex<Option<TcpListener>>,
    events: RwLock<Option<Arc<dyn EngineEvents>>>,
    clients: DashMap<String, EngineClient>,
}

impl InprocEngine {
    #[inline]
    pub fn new(opts: EngineOptions) -> Self {
        Self { opts, listener: Mutex::new(None), events: RwLock::new(None), clients: DashMap::default() }
    }

    fn bind(laddr: SocketAddr, backlog: i32) -> anyhow::Result<TcpListener> {
        use socket2::{Domain, SockAddr, Socket, Type};
        let builder = Socket::new(Domain::for_address(laddr), Type::STREAM, None)?;
        builder.set_nonblocking(true)?;
        #[cfg(unix)]
        builder.set_reuse_address(true)?;
        builder.bind(&SockAddr::from(laddr))?;
        builder.listen(backlog)?;
        let listener = TcpListener::from_std(std::net::TcpListener::from(builder))?;
        Ok(listener)
    }

    #[inline]
    fn observer(&self) -> Option<Arc<dyn EngineEvents>> {
        self.events.read().clone()
    }

    /// Attach an in-process client, running the authenticate hook first when
    /// authentication is enabled. On a verdict other than
    /// [`AuthResult::Allow`] the client is not registered.
    pub async fn attach(
        &self,
        client_id: &str,
        endpoint: Option<String>,
        protocol_version: &str,
        username: Option<&str>,
        password: Option<&str>,
    ) -> anyhow::Result<AuthResult> {
        let events = self.observer().ok_or_else(|| anyhow!("engine is not started"))?;

        if self.opts.authenticate {
            let verdict = events.client_authenticate(client_id, username, password).await;
            if verdict != AuthResult::Allow {
                return Ok(verdict);
            }
        }

        let client = EngineClient {
            id: client_id.into(),
            endpoint,
            connected_at: timestamp_secs(),
            protocol_version: protocol_version.into(),
        };
        self.clients.insert(client.id.clone(), client.clone());
        events.client_connected(&client).await;
        Ok(AuthResult::Allow)
    }

    /// Detach an in-process client; returns false when the client is not
    /// attached.
    pub async fn detach(&self, client_id: &str, reason: &str) -> bool {
        if let Some((_, client)) = self.clients.remove(client_id) {
            if let Some(events) = self.observer() {
                events.client_disconnected(&client.id, reason).await;
            }
            true
        } else {
            false
        }
    }

    /// Announce a publish from an attached client toward the observer;
    /// observation only, the message itself is not touched.
    pub async fn publish(&self, client_id: &str, topic: &str) -> anyhow::Result<()> {
        let events = self.observer().ok_or_else(|| anyhow!("engine is not started"))?;
        events.message_publish(client_id, topic).await;
        Ok(())
    }
}

#[async_trait]
impl Engine for InprocEngine {
    async fn start(&self, events: Arc<dyn EngineEvents>) -> anyhow::Result<()> {
        {
            let listener = self.listener.lock();
            if listener.is_some() {
                return Err(anyhow!("engine already started"));
            }
        }

        let listener = Self::bind(self.opts.laddr, self.opts.backlog as i32)?;
        log::debug!("engine listening on {}", self.opts.laddr);

        *self.events.write() = Some(events);
        *self.listener.lock() = Some(listener);
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.listener.lock().take();
        self.events.write().take();
        self.clients.clear();
        Ok(())
    }

    async fn clients(&self) -> anyhow::Result<Vec<EngineClient>> {
        Ok(self.clients.iter().map(|item| item.value().clone()).collect())
    }

    async fn disconnect(&self, client_id: &str, reason: DisconnectReason) -> anyhow::Result<()> {
        if self.detach(client_id, &reason.to_string()).await {
            Ok(())
        } else {
            Err(anyhow!("client not found: {}", client_id))
        }
    }
}
