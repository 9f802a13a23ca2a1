// Single-timer async debouncer.
//
// `schedule` cancels whatever is pending and arms a fresh timer. Only the
// last action scheduled in a quiet window runs, exactly once. An action that
// has started running is never aborted by a later `schedule` or `cancel`.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::trace;

/// Coalescing window for watcher events.
pub const WATCH_DEBOUNCE_MS: u64 = 100;
/// Default autosave delay.
pub const DEFAULT_AUTOSAVE_MS: u64 = 400;
const MIN_AUTOSAVE_MS: u64 = 50;
const MAX_AUTOSAVE_MS: u64 = 10_000;

/// Debounce window configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceConfig {
    pub window: Duration,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self { window: Duration::from_millis(DEFAULT_AUTOSAVE_MS) }
    }
}

impl DebounceConfig {
    /// Window in milliseconds, clamped to [50, 10000].
    pub fn with_millis(ms: u64) -> Self {
        let clamped = ms.clamp(MIN_AUTOSAVE_MS, MAX_AUTOSAVE_MS);
        Self { window: Duration::from_millis(clamped) }
    }
}

#[derive(Default)]
struct Pending {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

#[derive(Clone, Default)]
pub struct Debouncer {
    inner: Arc<Mutex<Pending>>,
}

impl Debouncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel any pending action and arm `action` to run after `delay`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule<F, Fut>(&self, delay: Duration, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut pending = lock(&self.inner);
        pending.generation = pending.generation.wrapping_add(1);
        let generation = pending.generation;
        if let Some(previous) = pending.handle.take() {
            previous.abort();
        }

        let inner = Arc::clone(&self.inner);
        pending.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut pending = lock(&inner);
                if pending.generation != generation {
                    return;
                }
                // Detach before running so a later schedule cannot abort us mid-action.
                pending.handle = None;
            }
            trace!(generation, "debounced action firing");
            action().await;
        }));
    }

    /// Cancel the pending action, if any.
    pub fn cancel(&self) {
        let mut pending = lock(&self.inner);
        pending.generation = pending.generation.wrapping_add(1);
        if let Some(handle) = pending.handle.take() {
            handle.abort();
        }
    }

    /// True while an action is armed and has not started.
    pub fn is_pending(&self) -> bool {
        lock(&self.inner).handle.is_some()
    }
}

impl std::fmt::Debug for Debouncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debouncer").field("pending", &self.is_pending()).finish()
    }
}

fn lock(inner: &Mutex<Pending>) -> MutexGuard<'_, Pending> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
