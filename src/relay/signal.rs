//! One-shot shutdown signal shared by the two pumps of an engine.

use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tracing::debug;

use super::Direction;
use crate::error::RelayError;

/// Write side of the signal. Clones share the same single slot.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    slot: Arc<Mutex<Option<oneshot::Sender<RelayError>>>>,
}

/// Read side, held by the engine while its pumps run.
#[derive(Debug)]
pub struct ShutdownWaiter {
    rx: oneshot::Receiver<RelayError>,
}

/// Create a connected signal/waiter pair.
pub fn channel() -> (ShutdownSignal, ShutdownWaiter) {
    let (tx, rx) = oneshot::channel();
    (
        ShutdownSignal {
            slot: Arc::new(Mutex::new(Some(tx))),
        },
        ShutdownWaiter { rx },
    )
}

impl ShutdownSignal {
    /// Deliver the terminating error. Only the first call delivers; the rest
    /// are dropped and `false` is returned.
    pub fn report(&self, error: RelayError) -> bool {
        let sender = match self.slot.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match sender {
            Some(tx) => {
                // The waiter may already be gone if the engine future was dropped.
                let _ = tx.send(error);
                true
            }
            None => {
                debug!(error = %error, "Discarding failure after shutdown was already reported");
                false
            }
        }
    }

    pub fn is_reported(&self) -> bool {
        match self.slot.lock() {
            Ok(slot) => slot.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }

    /// Guard that reports [`RelayError::Aborted`] if dropped before
    /// [`ReportGuard::report`] is called, e.g. when a hook panics.
    pub fn guard(&self, direction: Direction) -> ReportGuard {
        ReportGuard {
            signal: Some(self.clone()),
            direction,
        }
    }
}

impl ShutdownWaiter {
    /// Block until the first failure is reported.
    pub async fn wait(self) -> RelayError {
        match self.rx.await {
            Ok(error) => error,
            // Every sender is gone without a report, so no pump can be named.
            Err(_) => RelayError::Interrupted,
        }
    }
}

#[derive(Debug)]
pub struct ReportGuard {
    signal: Option<ShutdownSignal>,
    direction: Direction,
}

impl ReportGuard {
    pub fn report(mut self, error: RelayError) -> bool {
        match self.signal.take() {
            Some(signal) => signal.report(error),
            None => false,
        }
    }
}

impl Drop for ReportGuard {
    fn drop(&mut self) {
        if let Some(signal) = self.signal.take() {
            if !signal.is_reported() {
                signal.report(RelayError::Aborted {
                    direction: self.direction,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_first_report_wins() {
        let (signal, waiter) = channel();
        assert!(!signal.is_reported());

        assert!(signal.report(RelayError::Closed { direction: Direction::Remote }));
        assert!(!signal.report(RelayError::Closed { direction: Direction::Local }));
        assert!(signal.is_reported());

        let error = waiter.wait().await;
        assert_eq!(error.direction(), Some(Direction::Remote));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reports_deliver_once() {
        for _ in 0..50 {
            let (signal, waiter) = channel();
            let delivered = Arc::new(AtomicUsize::new(0));

            let mut handles = Vec::new();
            for direction in [Direction::Local, Direction::Remote, Direction::Local, Direction::Remote] {
                let signal = signal.clone();
                let delivered = Arc::clone(&delivered);
                handles.push(tokio::spawn(async move {
                    if signal.report(RelayError::Closed { direction }) {
                        delivered.fetch_add(1, Ordering::SeqCst);
                    }
                }));
            }
            for handle in handles {
                handle.await.unwrap();
            }

            assert_eq!(delivered.load(Ordering::SeqCst), 1);
            assert!(waiter.wait().await.is_clean_close());
        }
    }

    #[tokio::test]
    async fn test_dropped_guard_reports_abort() {
        let (signal, waiter) = channel();
        let guard = signal.guard(Direction::Remote);
        drop(guard);

        let error = waiter.wait().await;
        assert!(matches!(error, RelayError::Aborted { direction: Direction::Remote }));
    }

    #[tokio::test]
    async fn test_guard_report_disarms() {
        let (signal, waiter) = channel();
        let guard = signal.guard(Direction::Local);
        assert!(guard.report(RelayError::Closed { direction: Direction::Local }));
        assert!(waiter.wait().await.is_clean_close());
    }

    #[tokio::test]
    async fn test_waiter_does_not_hang_without_senders() {
        let (signal, waiter) = channel();
        drop(signal);
        let error = waiter.wait().await;
        assert!(matches!(error, RelayError::Interrupted));
        assert!(error.direction().is_none());
    }
}
