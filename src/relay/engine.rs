//! Relay Engine

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::pump::Pump;
use super::signal::{self, ShutdownSignal};
use super::{Direction, HookChain, RelaySession};
use crate::error::RelayError;

/// Default maximum chunk size read in one go.
pub const DEFAULT_BUFFER_SIZE: usize = 0xFFFF;

/// Relays one accepted connection to the remote endpoint.
///
/// Construction does no I/O. [`RelayEngine::start`] dials the remote, pumps
/// both directions until the first failure on either side, closes both
/// connections and returns that failure.
pub struct RelayEngine<L> {
    local: L,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    buffer_size: usize,
    nodelay: bool,
    hooks: Arc<HookChain>,
    session: Arc<RelaySession>,
}

impl<L> RelayEngine<L>
where
    L: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Take ownership of an accepted connection. It is closed when `start`
    /// returns, on every path.
    pub fn new(local: L, local_addr: SocketAddr, remote_addr: SocketAddr) -> Self {
        let session_id = format!("relay_{}", Uuid::new_v4().simple());
        Self {
            local,
            local_addr,
            remote_addr,
            buffer_size: DEFAULT_BUFFER_SIZE,
            nodelay: false,
            hooks: Arc::new(HookChain::new()),
            session: Arc::new(RelaySession::new(session_id, local_addr, remote_addr)),
        }
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<HookChain>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Set TCP_NODELAY on the dialed remote connection.
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Shared byte counters; stays readable after `start` returns.
    pub fn session(&self) -> Arc<RelaySession> {
        Arc::clone(&self.session)
    }

    /// Dial the remote, relay until either side fails, then close both ends.
    ///
    /// Always returns the first failure: a dial error, or the first stream
    /// fault (including a clean close) from either pump.
    pub async fn start(self) -> Result<(), RelayError> {
        let Self {
            local,
            local_addr,
            remote_addr,
            buffer_size,
            nodelay,
            hooks,
            session,
        } = self;

        let remote = match TcpStream::connect(remote_addr).await {
            Ok(remote) => remote,
            Err(source) => {
                error!(to = %remote_addr, error = %source, "Remote connection failed");
                drop(local);
                return Err(RelayError::Dial {
                    addr: remote_addr,
                    source,
                });
            }
        };
        if nodelay {
            if let Err(e) = remote.set_nodelay(true) {
                debug!("Failed to set TCP_NODELAY on {}: {}", remote_addr, e);
            }
        }

        info!(
            session_id = %session.session_id,
            from = %local_addr,
            to = %remote_addr,
            "Opened connection"
        );

        let (signal, waiter) = signal::channel();
        let (local_read, local_write) = tokio::io::split(local);
        let (remote_read, remote_write) = remote.into_split();

        // Dropping the set aborts both pumps, which drops every stream half.
        let mut pumps = PumpSet::default();
        pumps.spawn(
            Pump::new(local_read, remote_write, Direction::Local, buffer_size, Arc::clone(&hooks))
                .with_session(Arc::clone(&session)),
            signal.clone(),
        );
        pumps.spawn(
            Pump::new(remote_read, local_write, Direction::Remote, buffer_size, hooks)
                .with_session(Arc::clone(&session)),
            signal,
        );

        let failure = waiter.wait().await;
        match &failure {
            e if e.is_clean_close() => debug!(session_id = %session.session_id, "{}", e),
            e => warn!(session_id = %session.session_id, error = %e, "Relay stream failed"),
        }

        pumps.shutdown().await;
        session.log_stats();

        Err(failure)
    }
}

/// The two running pumps of an engine.
#[derive(Default)]
struct PumpSet {
    handles: Vec<JoinHandle<()>>,
}

impl PumpSet {
    fn spawn<R, W>(&mut self, pump: Pump<R, W>, signal: ShutdownSignal)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let guard = signal.guard(pump.direction());
        self.handles.push(tokio::spawn(async move {
            let failure = pump.run().await;
            guard.report(failure);
        }));
    }

    /// Abort both pumps and wait until their stream halves are dropped.
    async fn shutdown(mut self) {
        for handle in &self.handles {
            handle.abort();
        }
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    warn!("Relay pump panicked: {}", e);
                }
            }
        }
    }
}

impl Drop for PumpSet {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}
