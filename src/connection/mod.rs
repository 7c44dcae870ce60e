//! Connection Management Module
//!
//! Listener, accept loop and per-connection engine spawning.

pub mod manager;

pub use manager::{resolve, ConnectionManager};
