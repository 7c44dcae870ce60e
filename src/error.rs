//! Error Types

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

use crate::relay::Direction;

/// Terminating result of a single relay engine.
#[derive(Debug, Error)]
pub enum RelayError {
    /* ───────────── Dial ───────────── */
    #[error("failed to connect to remote {addr}: {source}")]
    Dial {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /* ───────────── Stream faults ───────────── */
    #[error("{direction} stream closed")]
    Closed { direction: Direction },

    #[error("read failed on {direction} stream: {source}")]
    Read {
        direction: Direction,
        #[source]
        source: io::Error,
    },

    #[error("write failed on {direction} stream: {source}")]
    Write {
        direction: Direction,
        #[source]
        source: io::Error,
    },

    /* ───────────── Task ───────────── */
    #[error("{direction} pump stopped without reporting")]
    Aborted { direction: Direction },

    #[error("relay pumps stopped without reporting")]
    Interrupted,
}

impl RelayError {
    /// True when the engine ended because a peer closed its side normally.
    pub fn is_clean_close(&self) -> bool {
        matches!(self, RelayError::Closed { .. })
    }

    /// Direction of the pump that produced this error, if any.
    pub fn direction(&self) -> Option<Direction> {
        match self {
            RelayError::Dial { .. } | RelayError::Interrupted => None,
            RelayError::Closed { direction }
            | RelayError::Read { direction, .. }
            | RelayError::Write { direction, .. }
            | RelayError::Aborted { direction } => Some(*direction),
        }
    }
}

/// Fatal errors raised before the accept loop starts.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to resolve {role} address {addr:?}: {reason}")]
    Resolve {
        role: &'static str,
        addr: String,
        reason: String,
    },

    #[error("failed to open local port {addr} to listen: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to open log file {path:?}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
