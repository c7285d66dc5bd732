//! Cooperative cancellation for in-flight analyses.
//!
//! A [`CancelToken`] combines an explicit cancel switch with an optional
//! deadline. The pipeline checks it before every model call and races each
//! call against it, so a cancelled request stops at the next suspension
//! point and reports [`crate::AnalysisError::Cancelled`]. Partial state is
//! dropped with the request; nothing is persisted.
//!
//! Clones share the same switch: cancel one and every clone observes it.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
    deadline: Option<Instant>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// A token that is only cancelled explicitly.
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
            deadline: None,
        }
    }

    /// A token that also expires at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            ..Self::new()
        }
    }

    /// A token that expires `timeout` from now.
    pub fn with_timeout(timeout: std::time::Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// Cancel every request observing this token (or a clone of it).
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// `true` once cancelled or past the deadline.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolves when the token is cancelled or the deadline passes.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        let explicit = async move {
            loop {
                if *rx.borrow_and_update() {
                    return;
                }
                // The sender lives as long as any token clone does.
                if rx.changed().await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
        };
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = explicit => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => explicit.await,
        }
    }
}
