//! Single-threaded pipeline stages.
//!
//! Each stage is one task reading from one conduit and writing to another. Chaining stages gives a
//! pipeline in which every stage runs concurrently with the others, while the order of items is
//! preserved end to end (unlike [`TaskGroup::worker_pool`] and [`TaskGroup::fan_out`]).
//!
//! ```
//! use sluiceway::TaskGroup;
//!
//! let mut group = TaskGroup::new();
//! let numbers = group.source(1..=5).unwrap();
//! let squares = group.stage(numbers, |n: u64| n * n).unwrap();
//! let odd = group.filter(squares, |n| n % 2 == 1).unwrap();
//!
//! assert_eq!(odd.into_iter().collect::<Vec<_>>(), [1, 9, 25]);
//! group.join();
//! ```

use std::io;

use crate::{Consumer, TaskGroup};

impl TaskGroup {
    /// Spawns a task that enqueues every item of `items`, then closes the returned conduit.
    pub fn source<I>(&mut self, items: I) -> io::Result<Consumer<I::Item>>
    where
        I: IntoIterator,
        I::IntoIter: Send + 'static,
        I::Item: Send + 'static,
    {
        let label = self.next_label("source");
        let (mut output, consumer) = self.conduit();
        let cancel = self.cancellation().clone();
        let items = items.into_iter();
        self.spawn_labeled(label, move || {
            for item in items {
                if output.send_or_cancelled(item, &cancel).is_err() {
                    break;
                }
            }
            output.close();
        })?;
        Ok(consumer)
    }

    /// Spawns a stage that applies `transform` to every item of `input`, in order.
    ///
    /// The returned conduit is closed once `input` is closed and drained.
    pub fn stage<T, U, F>(
        &mut self,
        input: Consumer<T>,
        mut transform: F,
    ) -> io::Result<Consumer<U>>
    where
        T: Send + 'static,
        U: Send + 'static,
        F: FnMut(T) -> U + Send + 'static,
    {
        self.spawn_stage("stage", input, move |item| Some(transform(item)))
    }

    /// Spawns a stage that forwards only the items of `input` matching `predicate`, in order.
    pub fn filter<T, F>(&mut self, input: Consumer<T>, mut predicate: F) -> io::Result<Consumer<T>>
    where
        T: Send + 'static,
        F: FnMut(&T) -> bool + Send + 'static,
    {
        self.spawn_stage("filter", input, move |item| {
            if predicate(&item) {
                Some(item)
            } else {
                None
            }
        })
    }

    fn spawn_stage<T, U, F>(
        &mut self,
        op: &str,
        input: Consumer<T>,
        mut process: F,
    ) -> io::Result<Consumer<U>>
    where
        T: Send + 'static,
        U: Send + 'static,
        F: FnMut(T) -> Option<U> + Send + 'static,
    {
        let label = self.next_label(op);
        let (mut output, consumer) = self.conduit();
        let cancel = self.cancellation().clone();
        self.spawn_labeled(label, move || {
            while let Ok(item) = input.recv_or_cancelled(&cancel) {
                let Some(item) = process(item) else {
                    continue;
                };
                if output.send_or_cancelled(item, &cancel).is_err() {
                    break;
                }
            }
            output.close();
        })?;
        Ok(consumer)
    }
}
