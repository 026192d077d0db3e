//! Cancellation signaling.
//!
//! A [`ShutdownCoordinator`] is observed at every engine suspension point:
//! rate-limiter waits, retry sleeps, and in-flight HTTP I/O. Requesting
//! shutdown interrupts those within one round-trip; the pagination driver
//! then decides whether a resumable partial cache entry can be written
//! before the cancellation propagates.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tokio::sync::Notify;

/// Shared handle to a shutdown coordinator.
pub type SharedShutdown = Arc<ShutdownCoordinator>;

static GLOBAL_SHUTDOWN: OnceCell<SharedShutdown> = OnceCell::new();

/// Register a process-wide shutdown handle (e.g. wired to Ctrl+C).
pub fn set_global_shutdown(handle: SharedShutdown) {
    let _ = GLOBAL_SHUTDOWN.set(handle);
}

/// The registered process-wide handle, if any.
pub fn get_global_shutdown() -> Option<SharedShutdown> {
    GLOBAL_SHUTDOWN.get().cloned()
}

/// Cooperative cancellation flag with wakeup notification.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    requested: AtomicBool,
    notify: Notify,
}

impl ShutdownCoordinator {
    /// Create an un-triggered coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shared coordinator.
    pub fn shared() -> SharedShutdown {
        Arc::new(Self::new())
    }

    /// Request cancellation; waiters are woken exactly once.
    pub fn request_shutdown(&self) {
        if !self.requested.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    /// Whether cancellation has been requested.
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Suspend until cancellation is requested; immediate if already set.
    pub async fn wait(&self) {
        let mut notified = std::pin::pin!(self.notify.notified());
        // Register interest before the flag check so a request landing in
        // between cannot be missed.
        notified.as_mut().enable();
        if self.is_requested() {
            return;
        }
        notified.await;
    }
}
