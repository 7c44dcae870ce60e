//! Connection Manager Implementation

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::net::{lookup_host, TcpListener};
use tracing::{debug, error, info};

use crate::config::Config;
use crate::error::StartupError;
use crate::relay::{HookChain, RelayEngine};

/// Resolve `host:port` to its first socket address
pub async fn resolve(role: &'static str, addr: &str) -> Result<SocketAddr, StartupError> {
    let mut addrs = lookup_host(addr).await.map_err(|e| StartupError::Resolve {
        role,
        addr: addr.to_string(),
        reason: e.to_string(),
    })?;
    addrs.next().ok_or_else(|| StartupError::Resolve {
        role,
        addr: addr.to_string(),
        reason: "no addresses returned".to_string(),
    })
}

/// Owns the listening socket and spawns one relay engine per connection
pub struct ConnectionManager {
    listener: TcpListener,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    buffer_size: usize,
    nodelay: bool,
    hooks: Arc<HookChain>,
    active_connections: Arc<AtomicUsize>,
    total_connections: AtomicUsize,
}

impl ConnectionManager {
    /// Resolve both endpoints and bind the listener
    pub async fn bind(config: &Config, hooks: HookChain) -> Result<Self, StartupError> {
        let listen_addr = resolve("local", &config.relay.listen_addr).await?;
        let remote_addr = resolve("remote", &config.relay.remote_addr).await?;

        info!("Binding TCP listener to {}", listen_addr);
        let listener = TcpListener::bind(listen_addr)
            .await
            .map_err(|source| StartupError::Bind {
                addr: listen_addr,
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| StartupError::Bind {
            addr: listen_addr,
            source,
        })?;

        Ok(Self {
            listener,
            local_addr,
            remote_addr,
            buffer_size: config.relay.buffer_size,
            nodelay: config.relay.nodelay,
            hooks: Arc::new(hooks),
            active_connections: Arc::new(AtomicUsize::new(0)),
            total_connections: AtomicUsize::new(0),
        })
    }

    /// Address the listener is actually bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Engines currently running
    pub fn get_active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Shared counter of running engines, usable after `run` consumes the manager
    pub fn active_connections_handle(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.active_connections)
    }

    /// Accept connections until `shutdown` resolves
    pub async fn run<S>(self, shutdown: S)
    where
        S: Future<Output = ()>,
    {
        info!(from = %self.local_addr, to = %self.remote_addr, "Starting mitm");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping connection acceptance");
                    break;
                }
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, peer)) => self.spawn_engine(stream, peer),
                        Err(e) => error!("Failed to accept connection: {}", e),
                    }
                }
            }
        }

        let remaining = self.get_active_connections();
        if remaining > 0 {
            info!("{} relay sessions still active, leaving them to finish", remaining);
        }
    }

    fn spawn_engine(&self, stream: tokio::net::TcpStream, peer: SocketAddr) {
        let connection_no = self.total_connections.fetch_add(1, Ordering::Relaxed) + 1;
        debug!("Accepted connection #{} from {}", connection_no, peer);

        if self.nodelay {
            if let Err(e) = stream.set_nodelay(true) {
                debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
            }
        }

        let engine = RelayEngine::new(stream, self.local_addr, self.remote_addr)
            .with_buffer_size(self.buffer_size)
            .with_nodelay(self.nodelay)
            .with_hooks(Arc::clone(&self.hooks));
        let session = engine.session();
        let active = Arc::clone(&self.active_connections);

        active.fetch_add(1, Ordering::Relaxed);
        tokio::spawn(async move {
            // The engine has already logged how it ended.
            if let Err(e) = engine.start().await {
                debug!(session_id = %session.session_id, peer = %peer, "Relay ended: {}", e);
            }
            active.fetch_sub(1, Ordering::Relaxed);
        });
    }
}
