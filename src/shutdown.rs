//! Cooperative run cancellation.
//!
//! One token per run, held by the driver and cloned into every worker.
//! Workers check it between remote calls and at every rate-limit
//! admission; in-flight I/O is allowed to complete so no dangling
//! remote state is left behind.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

/// Cloneable cancellation handle.
#[derive(Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    /// Trigger cancellation. Idempotent: repeat triggers are no-ops.
    pub fn cancel(&self) {
        if !*self.tx.borrow() {
            info!("run cancellation requested");
            let _ = self.tx.send(true);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation is triggered.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());

        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());

        // An already-cancelled token resolves immediately.
        token.cancelled().await;
    }

    #[tokio::test]
    async fn clones_observe_cancellation() {
        let token = CancelToken::new();
        let clone = token.clone();

        let waiter = tokio::spawn(async move { clone.cancelled().await });
        token.cancel();
        waiter.await.unwrap();
    }
}
