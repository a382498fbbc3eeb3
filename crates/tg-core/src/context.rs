//! Per-session lifetime signal.
//!
//! The enclosing terminal session owns a [`SessionContext`] and cancels it
//! when the user disconnects. Everything the broker waits on is raced
//! against that signal.

use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

/// Returned by [`SessionContext::guard`] when the session ended first.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("session cancelled")]
pub struct Cancelled;

/// Cancellation handle for one interactive session.
///
/// Clones share the same signal.
#[derive(Debug, Clone)]
pub struct SessionContext {
    id: Uuid,
    cancel_tx: Arc<watch::Sender<bool>>,
    cancel_rx: watch::Receiver<bool>,
}

impl SessionContext {
    pub fn new() -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        Self {
            id: Uuid::new_v4(),
            cancel_tx: Arc::new(cancel_tx),
            cancel_rx,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Signals every waiter of this session to unwind.
    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    /// Returns a receiver that flips to `true` on cancellation.
    pub fn cancel_receiver(&self) -> watch::Receiver<bool> {
        self.cancel_rx.clone()
    }

    /// Resolves once the session is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.cancel_rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Runs `fut` unless the session is cancelled first.
    ///
    /// On cancellation `fut` is dropped before it completes.
    pub async fn guard<F>(&self, fut: F) -> Result<F::Output, Cancelled>
    where
        F: Future,
    {
        if self.is_cancelled() {
            return Err(Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(Cancelled),
            output = fut => Ok(output),
        }
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}
