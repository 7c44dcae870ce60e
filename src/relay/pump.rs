//! Directional Pump

use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use super::{Direction, HookChain, RelaySession};
use crate::error::RelayError;

/// Copies chunks from one stream to another, running hooks on each chunk.
pub struct Pump<R, W> {
    src: R,
    dst: W,
    direction: Direction,
    buffer_size: usize,
    hooks: Arc<HookChain>,
    session: Option<Arc<RelaySession>>,
}

impl<R, W> Pump<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// `direction` is the origin of everything read from `src`.
    pub fn new(src: R, dst: W, direction: Direction, buffer_size: usize, hooks: Arc<HookChain>) -> Self {
        Self {
            src,
            dst,
            direction,
            buffer_size: buffer_size.max(1),
            hooks,
            session: None,
        }
    }

    pub fn with_session(mut self, session: Arc<RelaySession>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Run until the first read or write failure, which is returned.
    /// End of stream counts as a failure.
    pub async fn run(mut self) -> RelayError {
        let mut buf = BytesMut::with_capacity(self.buffer_size);

        loop {
            // Reclaims the previous chunk's allocation once it has been dropped.
            buf.resize(self.buffer_size, 0);
            let n = match self.src.read(&mut buf[..]).await {
                Ok(0) => return RelayError::Closed { direction: self.direction },
                Ok(n) => n,
                Err(source) => {
                    return RelayError::Read {
                        direction: self.direction,
                        source,
                    }
                }
            };
            buf.truncate(n);
            let chunk = buf.split().freeze();
            trace!(dir = self.direction.label(), len = n, "Read chunk");

            let chunk = self.hooks.apply(chunk, self.direction);

            if let Err(source) = self.dst.write_all(&chunk).await {
                return RelayError::Write {
                    direction: self.direction,
                    source,
                };
            }
            if let Some(session) = &self.session {
                session.record(self.direction, chunk.len());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::{ReplaceTransformer, Transformer};
    use bytes::Bytes;
    use std::io;
    use std::sync::Mutex;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_copies_until_end_of_stream() {
        let src = Builder::new().read(b"PING\n").read(b"again").build();
        let dst = Builder::new().write(b"PING\n").write(b"again").build();

        let error = Pump::new(src, dst, Direction::Local, 1024, Arc::new(HookChain::new()))
            .run()
            .await;
        assert!(matches!(error, RelayError::Closed { direction: Direction::Local }));
    }

    #[tokio::test]
    async fn test_transformer_rewrites_output() {
        let src = Builder::new().read(b"hello").build();
        let dst = Builder::new().write(b"HELLO").build();
        let hooks = HookChain::new()
            .with_transformer(|chunk: Bytes, _dir: Direction| Bytes::from(chunk.to_ascii_uppercase()));

        let error = Pump::new(src, dst, Direction::Remote, 1024, Arc::new(hooks))
            .run()
            .await;
        assert!(error.is_clean_close());
    }

    #[tokio::test]
    async fn test_chunks_never_exceed_buffer_size() {
        let src = Builder::new().read(b"0123456789").build();
        let dst = Builder::new().write(b"0123").write(b"4567").write(b"89").build();
        let sizes = Arc::new(Mutex::new(Vec::new()));
        let sizes_hook = Arc::clone(&sizes);
        let hooks = HookChain::new().with_observer(move |chunk: &[u8], _dir: Direction| {
            sizes_hook.lock().unwrap().push(chunk.len());
        });

        Pump::new(src, dst, Direction::Local, 4, Arc::new(hooks)).run().await;
        assert_eq!(*sizes.lock().unwrap(), vec![4, 4, 2]);
    }

    #[tokio::test]
    async fn test_growing_rewrite_keeps_hook_input_bounded() {
        let src = Builder::new().read(b"aaaabb").build();
        let dst = Builder::new().write(b"aaaaaaaa").write(b"bbbbbbbb").build();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let observed = Arc::clone(&seen);
        let transformed = Arc::clone(&seen);
        let replace = ReplaceTransformer::new("a", "aa").rule("b", "bbbb");
        let hooks = HookChain::new()
            .with_observer(move |chunk: &[u8], _dir: Direction| {
                observed.lock().unwrap().push(chunk.len());
            })
            .with_transformer(move |chunk: Bytes, dir: Direction| {
                transformed.lock().unwrap().push(chunk.len());
                replace.transform(chunk, dir)
            });

        let error = Pump::new(src, dst, Direction::Local, 4, Arc::new(hooks)).run().await;
        assert!(error.is_clean_close());
        assert_eq!(*seen.lock().unwrap(), vec![4, 4, 2, 2]);
    }

    #[tokio::test]
    async fn test_read_error_is_reported() {
        let src = Builder::new()
            .read(b"abc")
            .read_error(io::Error::from(io::ErrorKind::ConnectionReset))
            .build();
        let dst = Builder::new().write(b"abc").build();

        let error = Pump::new(src, dst, Direction::Remote, 64, Arc::new(HookChain::new()))
            .run()
            .await;
        match error {
            RelayError::Read { direction, source } => {
                assert_eq!(direction, Direction::Remote);
                assert_eq!(source.kind(), io::ErrorKind::ConnectionReset);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_write_error_is_reported() {
        let src = Builder::new().read(b"abc").build();
        let dst = Builder::new()
            .write_error(io::Error::from(io::ErrorKind::BrokenPipe))
            .build();

        let error = Pump::new(src, dst, Direction::Local, 64, Arc::new(HookChain::new()))
            .run()
            .await;
        assert!(matches!(error, RelayError::Write { direction: Direction::Local, .. }));
    }

    #[tokio::test]
    async fn test_session_counts_written_bytes() {
        let session = Arc::new(RelaySession::new(
            "s".to_string(),
            "127.0.0.1:1".parse().unwrap(),
            "127.0.0.1:2".parse().unwrap(),
        ));
        let src = Builder::new().read(b"ab").build();
        let dst = Builder::new().write(b"abab").build();
        let hooks = HookChain::new().with_transformer(|chunk: Bytes, _dir: Direction| {
            Bytes::from([&chunk[..], &chunk[..]].concat())
        });

        Pump::new(src, dst, Direction::Remote, 64, Arc::new(hooks))
            .with_session(Arc::clone(&session))
            .run()
            .await;
        assert_eq!(session.bytes_down(), 4);
        assert_eq!(session.bytes_up(), 0);
    }
}
