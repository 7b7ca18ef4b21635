//! One-shot deadline timer feeding the orchestrator's event queue.
//!
//! The connect watchdog is armed when a connection attempt is issued and
//! disarmed as soon as the attempt resolves. If the deadline fires first,
//! the configured message is delivered through the queue like any other
//! event and the attempt is judged on the next tick.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// A single-slot deadline timer.
///
/// At most one deadline is pending at a time. Arming while already armed is
/// a contract violation and panics.
#[derive(Debug)]
pub(crate) struct Watchdog<M> {
    tx: mpsc::UnboundedSender<M>,
    pending: Option<CancellationToken>,
}

impl<M: Send + 'static> Watchdog<M> {
    pub(crate) fn new(tx: mpsc::UnboundedSender<M>) -> Self {
        Self { tx, pending: None }
    }

    /// Arm the timer. After `duration` elapses, `message` is delivered to
    /// the queue unless [`disarm`](Self::disarm) is called first.
    ///
    /// # Panics
    ///
    /// Panics if the timer is already armed.
    pub(crate) fn arm(&mut self, duration: Duration, message: M) {
        assert!(self.pending.is_none(), "watchdog armed twice");
        trace!(?duration, "watchdog armed");
        let token = CancellationToken::new();
        let guard = token.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = guard.cancelled() => {}
                _ = tokio::time::sleep(duration) => {
                    let _ = tx.send(message);
                }
            }
        });
        self.pending = Some(token);
    }

    /// Cancel the pending deadline, if any. Idempotent.
    pub(crate) fn disarm(&mut self) {
        if let Some(token) = self.pending.take() {
            trace!("watchdog disarmed");
            token.cancel();
        }
    }

    /// Whether a deadline is currently pending.
    #[cfg(test)]
    pub(crate) fn is_armed(&self) -> bool {
        self.pending.is_some()
    }
}

impl<M> Drop for Watchdog<M> {
    fn drop(&mut self) {
        if let Some(token) = self.pending.take() {
            token.cancel();
        }
    }
}
