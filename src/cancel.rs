//! Run-scoped cancellation
//!
//! A [`RunContext`] carries an explicit cancel flag and an optional absolute
//! deadline. It is cloned into every host runner and module invocation, and
//! every blocking point (retry waits, connection attempts, remote command
//! waits) checks or awaits it.
//!
//! # Example
//!
//! ```
//! use fleetrun::cancel::{CancelReason, RunContext};
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let ctx = RunContext::with_timeout(Duration::from_secs(600));
//! assert!(ctx.sleep(Duration::from_millis(1)).await.is_ok());
//!
//! ctx.cancel();
//! assert_eq!(ctx.reason(), Some(CancelReason::Cancelled));
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;

/// Why a run context stopped
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    #[error("run cancelled")]
    Cancelled,
    #[error("run deadline exceeded")]
    DeadlineExceeded,
}

#[derive(Debug)]
struct Inner {
    cancel_tx: watch::Sender<bool>,
    deadline: Option<Instant>,
}

/// Cancellation token with an optional deadline, shared by clone
#[derive(Debug, Clone)]
pub struct RunContext {
    inner: Arc<Inner>,
}

impl RunContext {
    /// Context that only ends on an explicit [`RunContext::cancel`]
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Context whose deadline is `timeout` from now
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::build(Some(Instant::now() + timeout))
    }

    /// Context with an absolute deadline
    pub fn with_deadline(deadline: Instant) -> Self {
        Self::build(Some(deadline))
    }

    fn build(deadline: Option<Instant>) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                cancel_tx,
                deadline,
            }),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Cancel the run. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancel_tx.send_replace(true);
    }

    /// Reason the context ended, or `None` while it is still live
    pub fn reason(&self) -> Option<CancelReason> {
        if *self.inner.cancel_tx.borrow() {
            return Some(CancelReason::Cancelled);
        }
        match self.inner.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(CancelReason::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.reason().is_some()
    }

    /// Resolves once the context is cancelled or its deadline passes
    pub async fn cancelled(&self) {
        let mut cancel_rx = self.inner.cancel_tx.subscribe();
        let flag = async move {
            loop {
                if *cancel_rx.borrow_and_update() {
                    return;
                }
                if cancel_rx.changed().await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
        };

        match self.inner.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = flag => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => flag.await,
        }
    }

    /// Sleep for `duration` unless the context ends first
    pub async fn sleep(&self, duration: Duration) -> Result<(), CancelReason> {
        if let Some(reason) = self.reason() {
            return Err(reason);
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.cancelled() => Err(self.reason().unwrap_or(CancelReason::Cancelled)),
        }
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}
