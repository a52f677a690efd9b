//! Background thread plumbing shared by the indexer loop and the job worker.
//!
//! A loop waits on its [`ShutdownSignal`] between units of work, so a stop
//! request wakes it immediately instead of after a full sleep.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// How long `shutdown` waits for a loop to finish its current unit of work.
pub const DEFAULT_STOP_WAIT: Duration = Duration::from_secs(5);

/// Poll granularity while waiting for a thread to finish.
const JOIN_POLL: Duration = Duration::from_millis(20);

#[derive(Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    fn flag(&self) -> MutexGuard<'_, bool> {
        match self.inner.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn trigger(&self) {
        *self.flag() = true;
        self.inner.1.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *self.flag()
    }

    /// Sleep for up to `timeout`. Returns `true` if shutdown was requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut stopped = self.flag();
        while !*stopped {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            stopped = match self.inner.1.wait_timeout(stopped, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }
}

/// Handle for one named background thread.
///
/// Supports graceful shutdown via `shutdown()` or automatic cleanup on `Drop`.
pub struct BackgroundHandle {
    name: &'static str,
    signal: ShutdownSignal,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundHandle {
    pub fn spawn<F>(name: &'static str, body: F) -> std::io::Result<Self>
    where
        F: FnOnce(ShutdownSignal) + Send + 'static,
    {
        let signal = ShutdownSignal::new();
        let thread_signal = signal.clone();
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(thread_signal))?;
        tracing::info!(thread = name, "Background thread started");
        Ok(Self {
            name,
            signal,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }

    /// Signal the loop and wait up to `wait` for it to exit.
    ///
    /// Returns `true` once the thread has been joined. A thread still busy
    /// after `wait` (for instance inside a tool subprocess) is detached and
    /// exits on its own when that call returns.
    pub fn shutdown(&mut self, wait: Duration) -> bool {
        self.signal.trigger();
        let Some(handle) = self.handle.take() else {
            return true;
        };

        let deadline = Instant::now() + wait;
        while !handle.is_finished() && Instant::now() < deadline {
            std::thread::sleep(JOIN_POLL);
        }

        if handle.is_finished() {
            if handle.join().is_err() {
                tracing::error!(thread = self.name, "Background thread panicked");
            }
            tracing::info!(thread = self.name, "Background thread stopped");
            true
        } else {
            tracing::warn!(thread = self.name, "Background thread still busy after stop request, detaching");
            false
        }
    }
}

impl Drop for BackgroundHandle {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.shutdown(DEFAULT_STOP_WAIT);
        }
    }
}

/// Run one unit of loop work, turning a panic into its message so the
/// loop can record it and keep going.
pub fn catch_panic<T>(work: impl FnOnce() -> T) -> Result<T, String> {
    panic::catch_unwind(AssertUnwindSafe(work)).map_err(panic_message)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
