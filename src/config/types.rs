//! Configuration Types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::relay::{ChunkFormat, DEFAULT_BUFFER_SIZE};

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub relay: RelayConfig,
    pub hooks: HookConfig,
}

/// Listener, target and engine settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RelayConfig {
    pub listen_addr: String,
    pub remote_addr: String,
    pub log_file: PathBuf,
    pub buffer_size: usize,
    pub nodelay: bool,
}

/// Hooks attached to every engine
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HookConfig {
    /// Log every chunk in both directions
    pub log_chunks: bool,
    pub format: ChunkFormat,
    pub replace: Vec<ReplaceRule>,
}

/// Byte substitution applied to each chunk
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReplaceRule {
    pub from: String,
    pub to: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:3000".to_string(),
            remote_addr: "0.0.0.0:3000".to_string(),
            log_file: PathBuf::from("mitm.log"),
            buffer_size: DEFAULT_BUFFER_SIZE,
            nodelay: true,
        }
    }
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            log_chunks: true,
            format: ChunkFormat::Text,
            replace: vec![],
        }
    }
}
