//! Interception Hooks
//!
//! Observers see every chunk before it is forwarded; transformers may replace
//! it. Both run inline on the pump task of the direction they intercept, so a
//! slow hook stalls only that direction.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Origin of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Read from the accepted connection, headed to the remote.
    Local,
    /// Read from the remote connection, headed back to the local peer.
    Remote,
}

impl Direction {
    pub fn is_from_local(self) -> bool {
        self == Direction::Local
    }

    /// Label used in chunk logs.
    pub fn label(self) -> &'static str {
        match self {
            Direction::Local => "sent",
            Direction::Remote => "recv",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Local => f.write_str("local"),
            Direction::Remote => f.write_str("remote"),
        }
    }
}

/// Side-effect-only view of traffic.
pub trait Observer: Send + Sync {
    fn observe(&self, chunk: &[u8], direction: Direction);
}

/// Rewrites a chunk before it is written to the peer.
///
/// There is no error channel: a transformer that cannot handle a chunk must
/// hand it back unchanged.
pub trait Transformer: Send + Sync {
    fn transform(&self, chunk: Bytes, direction: Direction) -> Bytes;
}

impl<F> Observer for F
where
    F: Fn(&[u8], Direction) + Send + Sync,
{
    fn observe(&self, chunk: &[u8], direction: Direction) {
        self(chunk, direction)
    }
}

impl<F> Transformer for F
where
    F: Fn(Bytes, Direction) -> Bytes + Send + Sync,
{
    fn transform(&self, chunk: Bytes, direction: Direction) -> Bytes {
        self(chunk, direction)
    }
}

/// Hooks shared by every pump of every engine it is given to: any number of
/// observers and at most one transformer, so every hook call sees a chunk
/// exactly as it was read.
#[derive(Clone, Default)]
pub struct HookChain {
    observers: Vec<Arc<dyn Observer>>,
    transformer: Option<Arc<dyn Transformer>>,
}

impl HookChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_observer(mut self, observer: impl Observer + 'static) -> Self {
        self.observers.push(Arc::new(observer));
        self
    }

    /// Set the transformer, replacing any previous one.
    pub fn with_transformer(mut self, transformer: impl Transformer + 'static) -> Self {
        self.transformer = Some(Arc::new(transformer));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty() && self.transformer.is_none()
    }

    /// Run observers in order, then the transformer, on the chunk as read.
    pub fn apply(&self, chunk: Bytes, direction: Direction) -> Bytes {
        for observer in &self.observers {
            observer.observe(&chunk, direction);
        }
        match &self.transformer {
            Some(transformer) => transformer.transform(chunk, direction),
            None => chunk,
        }
    }
}

impl fmt::Debug for HookChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookChain")
            .field("observers", &self.observers.len())
            .field("transformer", &self.transformer.is_some())
            .finish()
    }
}

/// How [`LogObserver`] renders chunk contents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ChunkFormat {
    /// Lossy UTF-8.
    #[default]
    Text,
    /// Lowercase hex, no separators.
    Hex,
}

/// Logs every chunk at `info` with its direction.
#[derive(Debug, Clone, Default)]
pub struct LogObserver {
    format: ChunkFormat,
}

impl LogObserver {
    pub fn new(format: ChunkFormat) -> Self {
        Self { format }
    }

    pub fn render(&self, chunk: &[u8]) -> String {
        match self.format {
            ChunkFormat::Text => String::from_utf8_lossy(chunk).into_owned(),
            ChunkFormat::Hex => chunk.iter().map(|b| format!("{:02x}", b)).collect(),
        }
    }
}

impl Observer for LogObserver {
    fn observe(&self, chunk: &[u8], direction: Direction) {
        info!(dir = direction.label(), len = chunk.len(), "{}", self.render(chunk));
    }
}

/// Rewrites byte patterns inside a single chunk.
///
/// All rules are applied in one left-to-right pass: at each position the
/// first rule whose pattern matches wins, and replaced output is never
/// rescanned. Occurrences split across two reads are left alone.
#[derive(Debug, Clone)]
pub struct ReplaceTransformer {
    rules: Vec<(Vec<u8>, Vec<u8>)>,
    direction: Option<Direction>,
}

impl ReplaceTransformer {
    pub fn new(from: impl Into<Vec<u8>>, to: impl Into<Vec<u8>>) -> Self {
        Self {
            rules: Vec::new(),
            direction: None,
        }
        .rule(from, to)
    }

    /// Add another pattern. Empty patterns are ignored.
    pub fn rule(mut self, from: impl Into<Vec<u8>>, to: impl Into<Vec<u8>>) -> Self {
        let from = from.into();
        if !from.is_empty() {
            self.rules.push((from, to.into()));
        }
        self
    }

    /// Restrict the rewrite to chunks travelling in one direction.
    pub fn only(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }

    fn match_at(&self, rest: &[u8]) -> Option<&(Vec<u8>, Vec<u8>)> {
        self.rules.iter().find(|(from, _)| rest.starts_with(from))
    }
}

impl Transformer for ReplaceTransformer {
    fn transform(&self, chunk: Bytes, direction: Direction) -> Bytes {
        if self.rules.is_empty() || self.direction.is_some_and(|d| d != direction) {
            return chunk;
        }
        let Some(first) = (0..chunk.len()).find(|&i| self.match_at(&chunk[i..]).is_some()) else {
            return chunk;
        };

        let mut out = Vec::with_capacity(chunk.len());
        out.extend_from_slice(&chunk[..first]);
        let mut i = first;
        while i < chunk.len() {
            match self.match_at(&chunk[i..]) {
                Some((from, to)) => {
                    out.extend_from_slice(to);
                    i += from.len();
                }
                None => {
                    out.push(chunk[i]);
                    i += 1;
                }
            }
        }
        Bytes::from(out)
    }
}
