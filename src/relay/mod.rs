//! Data Relay Module
//!
//! Per-connection relay engine, its two directional pumps, and the hooks
//! they run on every chunk.

pub mod engine;
pub mod hooks;
pub mod pump;
pub mod session;
pub mod signal;

pub use engine::{RelayEngine, DEFAULT_BUFFER_SIZE};
pub use hooks::{ChunkFormat, Direction, HookChain, LogObserver, Observer, ReplaceTransformer, Transformer};
pub use pump::Pump;
pub use session::RelaySession;
pub use signal::{ShutdownSignal, ShutdownWaiter};
