//! Relay Session

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

use super::Direction;

/// Byte accounting for one engine
#[derive(Debug)]
pub struct RelaySession {
    pub session_id: String,
    pub local_addr: SocketAddr,
    pub remote_addr: SocketAddr,
    pub start_time: Instant,
    bytes_up: AtomicU64,
    bytes_down: AtomicU64,
}

impl RelaySession {
    /// Create a new relay session
    pub fn new(session_id: String, local_addr: SocketAddr, remote_addr: SocketAddr) -> Self {
        debug!("Creating relay session: {} ({} -> {})", session_id, local_addr, remote_addr);

        Self {
            session_id,
            local_addr,
            remote_addr,
            start_time: Instant::now(),
            bytes_up: AtomicU64::new(0),
            bytes_down: AtomicU64::new(0),
        }
    }

    /// Bytes written to the remote (local -> remote)
    pub fn bytes_up(&self) -> u64 {
        self.bytes_up.load(Ordering::Relaxed)
    }

    /// Bytes written back to the local peer (remote -> local)
    pub fn bytes_down(&self) -> u64 {
        self.bytes_down.load(Ordering::Relaxed)
    }

    pub fn total_bytes(&self) -> u64 {
        self.bytes_up() + self.bytes_down()
    }

    pub fn duration(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    /// Count bytes forwarded by the pump reading from `direction`
    pub fn record(&self, direction: Direction, bytes: usize) {
        let counter = match direction {
            Direction::Local => &self.bytes_up,
            Direction::Remote => &self.bytes_down,
        };
        counter.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Log the closing summary
    pub fn log_stats(&self) {
        info!(
            session_id = %self.session_id,
            from = %self.local_addr,
            to = %self.remote_addr,
            duration_ms = self.duration().as_millis() as u64,
            bytes_up = self.bytes_up(),
            bytes_down = self.bytes_down(),
            "Closed connection"
        );
    }
}
