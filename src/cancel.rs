//! Cooperative cancellation.
//!
//! A [`CancellationSignal`] is a flag that can be set exactly once and read from any number of
//! threads. Long-running tasks poll it at the top of their processing loop (or race it against a
//! blocking conduit operation, see [`Consumer::recv_or_cancelled`]) and exit once it has fired.
//! Nothing is ever interrupted from the outside: work that a task has already started runs to
//! completion.
//!
//! [`Consumer::recv_or_cancelled`]: crate::Consumer::recv_or_cancelled

use std::{
    fmt, mem,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
    time::{Duration, Instant},
};

use crossbeam_channel::{select, Receiver, Sender};

use crate::sync::Mutex;

/// Message type of the sentinel channel. Nothing is ever sent on it.
pub(crate) enum Never {}

/// A shared, fire-once stop signal.
///
/// Cloning a [`CancellationSignal`] yields another handle to the *same* signal: firing any clone
/// fires all of them. Use [`CancellationSignal::child`] to derive a signal that can be fired
/// independently of its parent.
///
/// # Examples
///
/// ```
/// use std::thread;
/// use sluiceway::CancellationSignal;
///
/// let signal = CancellationSignal::new();
/// let task = {
///     let signal = signal.clone();
///     thread::spawn(move || {
///         let mut iterations = 0u64;
///         while !signal.is_fired() {
///             iterations += 1;
///         }
///         iterations
///     })
/// };
///
/// signal.fire();
/// signal.fire(); // no further effect
/// task.join().unwrap();
/// ```
#[derive(Clone)]
pub struct CancellationSignal {
    shared: Arc<Shared>,
}

struct Shared {
    fired: AtomicBool,
    /// Dropped when the signal fires. This disconnects `closed` and wakes up every thread that is
    /// blocked in a `select` involving it.
    sender: Mutex<Option<Sender<Never>>>,
    closed: Receiver<Never>,
    /// The signal counts as fired once this instant has passed.
    deadline: Option<Instant>,
    children: Mutex<Vec<Weak<Shared>>>,
}

impl Shared {
    fn new(deadline: Option<Instant>) -> Arc<Self> {
        let (sender, closed) = crossbeam_channel::bounded(0);
        Arc::new(Self {
            fired: AtomicBool::new(false),
            sender: Mutex::new(Some(sender)),
            closed,
            deadline,
            children: Mutex::new(Vec::new()),
        })
    }

    fn fire(&self) {
        if self.fired.swap(true, Ordering::SeqCst) {
            return;
        }

        drop(self.sender.lock().take());

        // Children registered after this point observe `fired` and fire themselves.
        let children = mem::take(&mut *self.children.lock());
        for child in children {
            if let Some(child) = child.upgrade() {
                child.fire();
            }
        }
    }

    fn is_fired(&self) -> bool {
        if self.fired.load(Ordering::SeqCst) {
            return true;
        }
        match self.deadline {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }
}

impl CancellationSignal {
    /// Creates a signal that has not fired yet.
    pub fn new() -> Self {
        Self {
            shared: Shared::new(None),
        }
    }

    /// Creates a signal that fires on its own once `timeout` has elapsed.
    ///
    /// Racing a conduit operation against such a signal is how a timeout is layered onto any of
    /// the primitives in this crate.
    ///
    /// A `timeout` too large to be represented as an [`Instant`] never fires on its own.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            shared: Shared::new(Instant::now().checked_add(timeout)),
        }
    }

    /// Creates a signal that fires on its own once `deadline` has passed.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            shared: Shared::new(Some(deadline)),
        }
    }

    /// Derives a child signal.
    ///
    /// The child fires when `self` fires (or has already fired), and inherits `self`'s deadline.
    /// Firing the child has no effect on `self`.
    pub fn child(&self) -> Self {
        let shared = Shared::new(self.shared.deadline);
        let mut children = self.shared.children.lock();
        if self.shared.fired.load(Ordering::SeqCst) {
            drop(children);
            shared.fire();
        } else {
            children.retain(|child| child.strong_count() != 0);
            children.push(Arc::downgrade(&shared));
        }
        Self { shared }
    }

    /// Fires the signal.
    ///
    /// Idempotent: only the first call has an effect. Every thread currently blocked on this signal
    /// (or on a child of it) is woken up.
    pub fn fire(&self) {
        self.shared.fire();
    }

    /// Returns whether the signal has fired, or its deadline has passed.
    ///
    /// Never blocks.
    pub fn is_fired(&self) -> bool {
        self.shared.is_fired()
    }

    /// Returns the instant at which this signal fires on its own, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.shared.deadline
    }

    /// Blocks the calling thread until the signal fires.
    pub fn wait(&self) {
        if self.is_fired() {
            return;
        }
        let timer = self.timer();
        select! {
            recv(self.shared.closed) -> _ => {}
            recv(timer) -> _ => {}
        }
    }

    /// Blocks until the signal fires or `timeout` elapses, whichever comes first.
    ///
    /// Returns `true` if the signal has fired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_fired() {
            return true;
        }
        let timer = self.timer();
        select! {
            recv(self.shared.closed) -> _ => true,
            recv(timer) -> _ => true,
            default(timeout) => self.is_fired(),
        }
    }

    /// The sentinel receiver. It disconnects when the signal fires.
    pub(crate) fn closed(&self) -> &Receiver<Never> {
        &self.shared.closed
    }

    /// A fresh receiver that becomes ready at the deadline.
    ///
    /// Each `select` needs its own: a timer channel delivers a single message.
    pub(crate) fn timer(&self) -> Receiver<Instant> {
        match self.shared.deadline {
            Some(deadline) => crossbeam_channel::at(deadline),
            None => crossbeam_channel::never(),
        }
    }
}

impl Default for CancellationSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancellationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationSignal")
            .field("fired", &self.is_fired())
            .field("deadline", &self.shared.deadline)
            .finish_non_exhaustive()
    }
}

/// An error returned by blocking operations that were stopped by a [`CancellationSignal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation cancelled")]
pub struct Cancelled;

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn fire_is_idempotent() {
        let signal = CancellationSignal::new();
        let other = signal.clone();
        assert!(!signal.is_fired());
        assert!(!other.is_fired());

        other.fire();
        assert!(signal.is_fired());
        signal.fire();
        other.fire();
        assert!(signal.is_fired());
        assert!(other.is_fired());
    }

    #[test]
    fn tight_loop_stops_after_fire() {
        let signal = CancellationSignal::new();
        let tasks = (0..4)
            .map(|_| {
                let signal = signal.clone();
                thread::spawn(move || {
                    let mut iterations = 0u64;
                    while !signal.is_fired() {
                        iterations += 1;
                        thread::yield_now();
                    }
                    iterations
                })
            })
            .collect::<Vec<_>>();

        thread::sleep(Duration::from_millis(10));
        for _ in 0..3 {
            signal.fire();
        }
        for task in tasks {
            task.join().unwrap();
        }
        assert!(signal.is_fired());
    }

    #[test]
    fn wait_wakes_up_on_fire() {
        let signal = CancellationSignal::new();
        let waiter = {
            let signal = signal.clone();
            thread::spawn(move || signal.wait())
        };
        thread::sleep(Duration::from_millis(10));
        signal.fire();
        waiter.join().unwrap();
    }

    #[test]
    fn wait_timeout_without_fire() {
        let signal = CancellationSignal::new();
        assert!(!signal.wait_timeout(Duration::from_millis(10)));
        signal.fire();
        assert!(signal.wait_timeout(Duration::from_secs(10)));
    }

    #[test]
    fn child_follows_parent() {
        let parent = CancellationSignal::new();
        let child = parent.child();
        let grandchild = child.child();

        child.fire();
        assert!(child.is_fired());
        assert!(grandchild.is_fired());
        assert!(!parent.is_fired());

        let sibling = parent.child();
        parent.fire();
        assert!(sibling.is_fired());

        // Born after the parent fired.
        assert!(parent.child().is_fired());
    }

    #[test]
    fn child_wait_wakes_up_on_parent_fire() {
        let parent = CancellationSignal::new();
        let child = parent.child();
        let waiter = thread::spawn(move || child.wait());
        thread::sleep(Duration::from_millis(10));
        parent.fire();
        waiter.join().unwrap();
    }

    #[test]
    fn fires_at_deadline() {
        let timeout = Duration::from_millis(30);
        let start = Instant::now();
        let signal = CancellationSignal::with_timeout(timeout);
        let child = signal.child();
        assert!(!signal.is_fired());
        assert_eq!(child.deadline(), signal.deadline());

        child.wait();
        assert!(start.elapsed() >= timeout);
        assert!(signal.is_fired());
        assert!(child.is_fired());
    }

    #[test]
    fn huge_timeout_never_fires() {
        let signal = CancellationSignal::with_timeout(Duration::MAX);
        assert_eq!(signal.deadline(), None);
        assert!(!signal.wait_timeout(Duration::from_millis(10)));
        assert!(!signal.child().is_fired());
        signal.fire();
        assert!(signal.is_fired());
    }

    #[test]
    fn signal_is_send_sync() {
        assert_send_sync::<CancellationSignal>();
    }
}
