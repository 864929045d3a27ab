//! Cross-thread interruption of a running query.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

/// Thread-safe handle for interrupting an engine from another thread.
///
/// The worker holds the engine lock for the whole duration of a query, so
/// interruption cannot go through the engine itself. A handle is cloned
/// out of the engine once and then used by stop requests.
///
/// An interrupt only has an effect while a query is armed (between
/// [`InterruptHandle::arm`] and the next arm). Interrupting an idle engine
/// is a no-op.
#[derive(Debug, Clone, Default)]
pub struct InterruptHandle {
    inner: Arc<InterruptState>,
}

#[derive(Debug, Default)]
struct InterruptState {
    /// Interruption was requested for the armed query.
    requested: AtomicBool,
    /// The engine is blocked waiting for the armed query's prompt.
    busy: AtomicBool,
    /// Process group to signal; 0 when no process is running.
    pgid: AtomicI32,
}

impl InterruptHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interrupt the running query.
    ///
    /// Returns whether a signal was delivered. When the engine has not yet
    /// started waiting, the request is remembered and the engine gives up
    /// on the query before sending it.
    pub fn interrupt(&self) -> bool {
        self.inner.requested.store(true, Ordering::SeqCst);
        if self.inner.busy.load(Ordering::SeqCst) {
            self.signal()
        } else {
            false
        }
    }

    /// Whether the armed query was interrupted.
    pub fn is_requested(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    /// Forget earlier requests. Called when a new query becomes active.
    pub(crate) fn arm(&self) {
        self.inner.requested.store(false, Ordering::SeqCst);
    }

    /// Mark the engine as blocked on the prompt.
    ///
    /// Returns `false` (and stays idle) if an interrupt already arrived.
    pub(crate) fn begin(&self) -> bool {
        self.inner.busy.store(true, Ordering::SeqCst);
        if self.inner.requested.load(Ordering::SeqCst) {
            self.inner.busy.store(false, Ordering::SeqCst);
            return false;
        }
        true
    }

    pub(crate) fn end(&self) {
        self.inner.busy.store(false, Ordering::SeqCst);
    }

    pub(crate) fn set_process_group(&self, pgid: Option<u32>) {
        let pgid = pgid.and_then(|p| i32::try_from(p).ok()).unwrap_or(0);
        self.inner.pgid.store(pgid, Ordering::SeqCst);
    }

    /// Send SIGINT to the engine's process group.
    pub(crate) fn signal(&self) -> bool {
        #[cfg(unix)]
        {
            self.send(libc::SIGINT)
        }

        #[cfg(not(unix))]
        {
            tracing::warn!("Interrupting engines is not supported on this platform");
            false
        }
    }

    /// Kill the engine's whole process group.
    ///
    /// Used when an interrupted engine does not come back.
    pub(crate) fn kill(&self) -> bool {
        #[cfg(unix)]
        {
            self.send(libc::SIGKILL)
        }

        #[cfg(not(unix))]
        {
            false
        }
    }

    #[cfg(unix)]
    fn send(&self, signal: libc::c_int) -> bool {
        let pgid = self.inner.pgid.load(Ordering::SeqCst);
        if pgid <= 0 {
            return false;
        }

        // The engine runs in its own group; signal the whole group so
        // children of a wrapper shell are reached too.
        let rc = unsafe { libc::kill(-pgid, signal) };
        if rc != 0 {
            tracing::debug!(
                "Failed to signal process group {}: {}",
                pgid,
                std::io::Error::last_os_error()
            );
            return false;
        }
        true
    }
}
