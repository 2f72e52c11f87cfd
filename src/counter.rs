use std::{fmt, sync::Arc, time::Duration};

use crate::sync::{Condvar, Mutex};

/// Counts tasks that have not finished yet.
///
/// A task registers itself with [`CompletionCounter::enter`] *before* it is launched and moves the
/// returned [`Done`] guard into the task. The guard decrements the counter when it is dropped,
/// which also happens while the task unwinds from a panic, so an orchestrator blocked in
/// [`CompletionCounter::wait`] cannot be left hanging by a task that died.
///
/// # Examples
///
/// ```
/// use std::thread;
/// use sluiceway::CompletionCounter;
///
/// let counter = CompletionCounter::new();
/// for _ in 0..4 {
///     let done = counter.enter();
///     thread::spawn(move || {
///         let _done = done;
///         // <work>
///     });
/// }
/// counter.wait();
/// assert_eq!(counter.pending(), 0);
/// ```
#[derive(Clone)]
pub struct CompletionCounter {
    shared: Arc<Shared>,
}

struct Shared {
    pending: Mutex<usize>,
    condvar: Condvar,
}

impl CompletionCounter {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                pending: Mutex::new(0),
                condvar: Condvar::new(),
            }),
        }
    }

    /// Registers one more pending task and returns the guard that marks it as finished.
    pub fn enter(&self) -> Done {
        *self.shared.pending.lock() += 1;
        Done {
            shared: self.shared.clone(),
        }
    }

    /// Returns the number of outstanding [`Done`] guards.
    pub fn pending(&self) -> usize {
        *self.shared.pending.lock()
    }

    /// Blocks until every [`Done`] guard handed out by this counter has been dropped.
    ///
    /// Returns immediately if nothing is pending.
    pub fn wait(&self) {
        drop(
            self.shared
                .condvar
                .wait_while(self.shared.pending.lock(), |pending| *pending != 0),
        );
    }

    /// Like [`CompletionCounter::wait`], but gives up after `timeout`.
    ///
    /// Returns `true` if the count reached zero.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (guard, timed_out) = self.shared.condvar.wait_timeout_while(
            self.shared.pending.lock(),
            timeout,
            |pending| *pending != 0,
        );
        !timed_out || *guard == 0
    }
}

impl Default for CompletionCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CompletionCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionCounter")
            .field("pending", &self.pending())
            .finish()
    }
}

/// Marks one task registered with [`CompletionCounter::enter`] as finished when dropped.
#[must_use = "dropping `Done` immediately marks the task as finished"]
pub struct Done {
    shared: Arc<Shared>,
}

impl Drop for Done {
    fn drop(&mut self) {
        let mut pending = self.shared.pending.lock();
        *pending -= 1;
        if *pending == 0 {
            self.shared.condvar.notify_all();
        }
    }
}

impl fmt::Debug for Done {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Done").finish_non_exhaustive()
    }
}
