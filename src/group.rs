use std::{
    fmt, io,
    panic::resume_unwind,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};

use crate::{conduit, CancellationSignal, Consumer, Producer};

/// A builder object that can be used to configure a [`TaskGroup`].
#[derive(Clone, Default)]
pub struct TaskGroupBuilder {
    name: Option<String>,
    capacity: Option<usize>,
    parent: Option<CancellationSignal>,
}

impl TaskGroupBuilder {
    /// Sets the base name of the threads spawned by the [`TaskGroup`].
    ///
    /// Each thread is named according to this base name and the operation that spawned it, for
    /// example `ingest-stage1`. Operations running several threads append the thread's index, as
    /// in `ingest-pool0-3`. Named threads also log when they start and exit.
    pub fn name<N: Into<String>>(self, name: N) -> Self {
        Self {
            name: Some(name.into()),
            ..self
        }
    }

    /// Bounds every conduit created by the [`TaskGroup`] to `capacity` items.
    ///
    /// By default, conduits are unbounded. With a bound, a task that outpaces its consumer blocks
    /// instead of buffering without limit.
    #[inline]
    pub fn capacity(self, capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..self
        }
    }

    /// Makes the group's [`CancellationSignal`] a child of `parent`.
    ///
    /// Firing `parent` then cancels the group's tasks, while dropping the group only fires the
    /// group's own signal.
    pub fn cancellation(self, parent: &CancellationSignal) -> Self {
        Self {
            parent: Some(parent.clone()),
            ..self
        }
    }

    pub fn build(self) -> TaskGroup {
        let cancel = match &self.parent {
            Some(parent) => parent.child(),
            None => CancellationSignal::new(),
        };
        TaskGroup {
            name: self.name,
            capacity: self.capacity,
            cancel,
            handles: Vec::new(),
            panicked: Arc::new(AtomicBool::new(false)),
            next_op: 0,
        }
    }
}

/// An owned set of tasks, each running on its own thread.
///
/// Every orchestration operation ([`TaskGroup::worker_pool`], [`TaskGroup::stage`],
/// [`TaskGroup::fan_out`], [`TaskGroup::fan_in`], [`TaskGroup::broadcast`], ...) spawns its tasks
/// into a [`TaskGroup`] and returns the conduits its caller reads from. The group keeps the threads.
///
/// This type enforces structured concurrency: when it's dropped, its [`CancellationSignal`] is
/// fired and every thread is joined. If a thread has panicked, the panic is forwarded to the thread
/// dropping the [`TaskGroup`]. To let the tasks run to completion instead, call
/// [`TaskGroup::join`].
pub struct TaskGroup {
    name: Option<String>,
    capacity: Option<usize>,
    cancel: CancellationSignal,
    handles: Vec<JoinHandle<()>>,
    /// Set to `true` when any task panics.
    panicked: Arc<AtomicBool>,
    next_op: usize,
}

impl Drop for TaskGroup {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            self.cancel.fire();
            if let Some(name) = &self.name {
                log::debug!("task group '{name}' cancelled");
            }
        }

        self.wait_for_exit();
    }
}

impl Default for TaskGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskGroup {
    /// Creates an unnamed group whose conduits are unbounded.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Returns a builder that can be used to configure a [`TaskGroup`].
    #[inline]
    pub fn builder() -> TaskGroupBuilder {
        TaskGroupBuilder::default()
    }

    /// Returns the signal that stops this group's tasks.
    ///
    /// Firing it (or any clone of it) makes every task exit at its next loop iteration. Items that
    /// a task was blocked on delivering when the signal fired are dropped.
    pub fn cancellation(&self) -> &CancellationSignal {
        &self.cancel
    }

    /// Creates a conduit with the group's configured capacity.
    pub fn conduit<T>(&self) -> (Producer<T>, Consumer<T>) {
        conduit::with_capacity(self.capacity)
    }

    /// Spawns a free-form task into the group.
    ///
    /// `task` is handed the group's [`CancellationSignal`] and is expected to poll it (or race its
    /// blocking operations against it), so that dropping the group does not block forever.
    pub fn spawn<F>(&mut self, task: F) -> io::Result<()>
    where
        F: FnOnce(CancellationSignal) + Send + 'static,
    {
        let label = self.next_label("task");
        let cancel = self.cancel.clone();
        self.spawn_labeled(label, move || task(cancel))
    }

    /// Returns the number of threads spawned into this group that have not been joined yet.
    pub fn task_count(&self) -> usize {
        self.handles.len()
    }

    /// Returns whether any task in this group has panicked so far.
    pub fn has_panicked(&self) -> bool {
        self.panicked.load(Ordering::Relaxed)
    }

    /// Waits for every task to finish on its own, without cancelling anything.
    ///
    /// Tasks finish once their input conduits are closed and drained, so this blocks forever if an
    /// input is never closed, or if a bounded output is never read from.
    ///
    /// If a task has panicked, the panic is propagated to the caller.
    pub fn join(mut self) {
        self.wait_for_exit();
        if let Some(name) = &self.name {
            log::debug!("task group '{name}' joined");
        }
    }

    /// Fires the group's [`CancellationSignal`] and waits for every task to exit.
    ///
    /// If a task has panicked, the panic is propagated to the caller.
    pub fn cancel(self) {
        self.cancel.fire();
        drop(self);
    }

    /// Returns a fresh label like `pool3` for the next operation spawned into this group.
    pub(crate) fn next_label(&mut self, op: &str) -> String {
        let label = format!("{op}{}", self.next_op);
        self.next_op += 1;
        label
    }

    /// Spawns `f` on a new thread owned by this group.
    pub(crate) fn spawn_labeled<F>(&mut self, label: String, f: F) -> io::Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let name = self.name.as_ref().map(|group| format!("{group}-{label}"));
        let mut builder = thread::Builder::new();
        if let Some(name) = name.clone() {
            builder = builder.name(name);
        }
        let panicked = self.panicked.clone();
        let handle = builder.spawn(move || {
            let guard = ExitGuard { name, panicked };
            if let Some(name) = &guard.name {
                log::trace!("task '{name}' starting");
            }
            f();
        })?;
        self.handles.push(handle);
        Ok(())
    }

    fn wait_for_exit(&mut self) {
        // Wait for all threads to exit and propagate a panic if one of them panicked.
        let mut payload = None;
        for handle in self.handles.drain(..) {
            if let Err(pl) = handle.join() {
                payload.get_or_insert(pl);
            }
        }
        if let Some(payload) = payload {
            if !thread::panicking() {
                resume_unwind(payload);
            }
        }
    }
}

impl fmt::Debug for TaskGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskGroup")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("tasks", &self.handles.len())
            .field("cancelled", &self.cancel.is_fired())
            .finish_non_exhaustive()
    }
}

/// Runs on every exit path of a task thread, including unwinding.
struct ExitGuard {
    name: Option<String>,
    panicked: Arc<AtomicBool>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            self.panicked.store(true, Ordering::Relaxed);
            if let Some(name) = &self.name {
                log::error!("task '{name}' panicked");
            }
        } else if let Some(name) = &self.name {
            log::trace!("task '{name}' exiting");
        }
    }
}
