//! mitm-relay
//!
//! Transparent TCP relay that sits between a client and a target server and
//! exposes synchronous hooks for observing and rewriting the traffic in both
//! directions.

pub mod config;
pub mod connection;
pub mod error;
pub mod relay;
pub mod shutdown;

pub use config::Config;
pub use connection::ConnectionManager;
pub use error::{RelayError, StartupError};
pub use relay::{Direction, HookChain, RelayEngine};
pub use shutdown::ShutdownTrigger;

/// Common error type for configuration and process plumbing
pub type Result<T> = anyhow::Result<T>;
