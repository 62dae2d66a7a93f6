//! Handles for background watch tasks

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;

use tokio_util::sync::CancellationToken;

type Cleanup = Box<dyn FnOnce() + Send>;

/// Handle to a background monitor. Dropping it (or calling
/// [cancel](WatchGuard::cancel)) stops delivery; [detach](WatchGuard::detach)
/// leaves the monitor running for the life of the client instead.
pub struct WatchGuard {
    token: CancellationToken,
    cleanup: StdMutex<Option<Cleanup>>,
    detached: AtomicBool,
}

impl std::fmt::Debug for WatchGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchGuard")
            .field("detached", &self.detached.load(Ordering::Relaxed))
            .finish()
    }
}

impl WatchGuard {
    pub(crate) fn new(token: CancellationToken) -> WatchGuard {
        WatchGuard {
            token,
            cleanup: StdMutex::new(None),
            detached: AtomicBool::new(false),
        }
    }

    pub(crate) fn with_cleanup(
        token: CancellationToken,
        cleanup: impl FnOnce() + Send + 'static,
    ) -> WatchGuard {
        WatchGuard {
            token,
            cleanup: StdMutex::new(Some(Box::new(cleanup))),
            detached: AtomicBool::new(false),
        }
    }

    /// Guard over nothing; cancelling it is a no-op.
    pub fn noop() -> WatchGuard {
        WatchGuard::new(CancellationToken::new())
    }

    /// One guard over many; cancelling the composite cancels every child.
    pub fn merge(guards: Vec<WatchGuard>) -> WatchGuard {
        for guard in &guards {
            guard.detach();
        }
        WatchGuard::with_cleanup(CancellationToken::new(), move || {
            for guard in &guards {
                guard.cancel();
            }
        })
    }

    /// Stop the background monitor. Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
        let cleanup = self
            .cleanup
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .take();
        if let Some(cleanup) = cleanup {
            cleanup();
        }
    }

    /// Keep the monitor running after this guard is dropped.
    pub fn detach(&self) {
        self.detached.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub(crate) fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        if !self.detached.load(Ordering::SeqCst) {
            self.cancel();
        }
    }
}
