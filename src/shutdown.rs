//! Graceful shutdown coordination.
//!
//! A [`ShutdownCoordinator`] is shared between the crawl controller, the
//! asset pipeline and the signal handler. Once shutdown is requested the
//! controller stops dispatching new work; tasks already in flight finish and
//! every object they persist is written whole or not at all.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;
use tracing::{error, warn};

/// Shared handle to a shutdown coordinator.
pub type SharedShutdown = Arc<ShutdownCoordinator>;

/// Coordinates graceful shutdown across async tasks.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    is_shutdown: AtomicBool,
    notify: Notify,
}

impl ShutdownCoordinator {
    /// Create a new coordinator.
    pub fn new() -> Self {
        Self {
            is_shutdown: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Create a new shared coordinator wrapped in [`Arc`].
    pub fn shared() -> SharedShutdown {
        Arc::new(Self::new())
    }

    /// Request shutdown. Notifies all registered waiters exactly once.
    pub fn request_shutdown(&self) {
        if !self.is_shutdown.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    /// Whether shutdown has been requested.
    pub fn is_shutdown_requested(&self) -> bool {
        self.is_shutdown.load(Ordering::SeqCst)
    }

    /// Wait until shutdown is requested. Returns immediately if already set.
    pub async fn wait_for_shutdown(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent request is not missed.
        notified.as_mut().enable();
        if self.is_shutdown_requested() {
            return;
        }
        notified.await;
    }

    /// Request shutdown when the process receives Ctrl+C.
    pub fn install_ctrl_c_handler(self: &Arc<Self>) {
        let shutdown = Arc::clone(self);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    warn!("Interrupt received, finishing in-flight work");
                    shutdown.request_shutdown();
                }
                Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_returns_after_request() {
        let shutdown = ShutdownCoordinator::shared();
        let waiter = {
            let shutdown = Arc::clone(&shutdown);
            tokio::spawn(async move { shutdown.wait_for_shutdown().await })
        };

        shutdown.request_shutdown();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
        assert!(shutdown.is_shutdown_requested());
    }

    #[tokio::test]
    async fn test_wait_after_request_is_immediate() {
        let shutdown = ShutdownCoordinator::new();
        shutdown.request_shutdown();
        shutdown.request_shutdown();
        shutdown.wait_for_shutdown().await;
    }
}
