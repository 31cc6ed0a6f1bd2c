//! Resource coordination between the background workers.
//!
//! Transcode and generation work raise a shared [`YieldSignal`] while they
//! run; the thumbnail crawler waits for it to drop back to zero before each
//! item. The signal is a counter, so two raisers never lower each other's
//! claim, and each raise is an RAII [`YieldGuard`].

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Granularity at which blocking waits re-check for shutdown.
const WAIT_SLICE: Duration = Duration::from_millis(200);

/// Counted "higher-priority work is running" signal.
#[derive(Default)]
pub struct YieldSignal {
    raised: Mutex<usize>,
    lowered: Condvar,
}

impl YieldSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal until the returned guard is dropped. Never blocks
    /// beyond the internal lock, so async code may call it.
    pub fn raise(self: &Arc<Self>) -> YieldGuard {
        *self.raised.lock() += 1;
        YieldGuard {
            signal: Arc::clone(self),
        }
    }

    fn lower(&self) {
        let mut raised = self.raised.lock();
        *raised = raised.saturating_sub(1);
        if *raised == 0 {
            self.lowered.notify_all();
        }
    }

    pub fn is_raised(&self) -> bool {
        *self.raised.lock() > 0
    }

    /// Number of outstanding raises.
    pub fn raise_count(&self) -> usize {
        *self.raised.lock()
    }

    /// Block until no raise is outstanding.
    ///
    /// Returns `false` if `shutdown` fired first.
    pub fn wait_lowered(&self, shutdown: &CancellationToken) -> bool {
        let mut raised = self.raised.lock();
        while *raised > 0 {
            if shutdown.is_cancelled() {
                return false;
            }
            self.lowered.wait_for(&mut raised, WAIT_SLICE);
        }
        !shutdown.is_cancelled()
    }
}

/// A single outstanding raise of a [`YieldSignal`].
#[must_use = "the signal is lowered as soon as the guard is dropped"]
pub struct YieldGuard {
    signal: Arc<YieldSignal>,
}

impl Drop for YieldGuard {
    fn drop(&mut self) {
        self.signal.lower();
    }
}

impl std::fmt::Debug for YieldGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YieldGuard").finish_non_exhaustive()
    }
}

/// Sleep on a worker thread for `duration`, waking early on shutdown.
///
/// Returns `false` if shutdown was requested.
pub fn sleep_unless_cancelled(shutdown: &CancellationToken, duration: Duration) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if shutdown.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(WAIT_SLICE));
    }
}
