//! Fan-out across parallel workers, and fan-in back into a single conduit.
//!
//! ```
//! use std::collections::BTreeSet;
//! use sluiceway::TaskGroup;
//!
//! let mut group = TaskGroup::new();
//! let input = group.source(1..=6u32).unwrap();
//! let squares = group.fan_out(input, 3, |n| n * n).unwrap();
//! let merged = group.fan_in(squares).unwrap();
//!
//! let results = merged.into_iter().collect::<BTreeSet<_>>();
//! assert_eq!(results, BTreeSet::from([1, 4, 9, 16, 25, 36]));
//! group.join();
//! ```

use std::{io, sync::Arc};

use crate::{CompletionCounter, Consumer, TaskGroup};

impl TaskGroup {
    /// Spawns `workers` tasks that share `input`, each writing to a conduit of its own.
    ///
    /// Every item of `input` is received by exactly one worker; which one is unspecified. Worker
    /// `i` applies `transform` and enqueues the result into the `i`-th returned conduit, which it
    /// closes once `input` is closed and drained.
    ///
    /// # Panics
    ///
    /// This method will panic if `workers` is 0.
    pub fn fan_out<T, U, F>(
        &mut self,
        input: Consumer<T>,
        workers: usize,
        transform: F,
    ) -> io::Result<Vec<Consumer<U>>>
    where
        T: Send + 'static,
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        assert_ne!(workers, 0, "worker count must be at least 1");

        let label = self.next_label("fanout");
        let transform = Arc::new(transform);
        let mut outputs = Vec::with_capacity(workers);
        for i in 0..workers {
            let (mut output, consumer) = self.conduit();
            let input = input.clone();
            let transform = transform.clone();
            let cancel = self.cancellation().clone();
            self.spawn_labeled(format!("{label}-{i}"), move || {
                while let Ok(item) = input.recv_or_cancelled(&cancel) {
                    if output.send_or_cancelled(transform(item), &cancel).is_err() {
                        break;
                    }
                }
                output.close();
            })?;
            outputs.push(consumer);
        }
        Ok(outputs)
    }

    /// Merges `inputs` into a single conduit.
    ///
    /// One forwarding task per input copies its items into the returned conduit, which is closed
    /// once every input is closed and drained. Items from the same input keep their relative order;
    /// how items from different inputs interleave is unspecified.
    ///
    /// With no inputs at all, the returned conduit is closed right away.
    pub fn fan_in<T, I>(&mut self, inputs: I) -> io::Result<Consumer<T>>
    where
        T: Send + 'static,
        I: IntoIterator<Item = Consumer<T>>,
    {
        let label = self.next_label("fanin");
        let (mut output, consumer) = self.conduit();
        let counter = CompletionCounter::new();
        for (i, input) in inputs.into_iter().enumerate() {
            let done = counter.enter();
            let output = output.share();
            let cancel = self.cancellation().clone();
            self.spawn_labeled(format!("{label}-{i}"), move || {
                let _done = done;
                let output = output;
                while let Ok(item) = input.recv_or_cancelled(&cancel) {
                    if output.send_or_cancelled(item, &cancel).is_err() {
                        break;
                    }
                }
            })?;
        }

        self.spawn_labeled(format!("{label}-close"), move || {
            counter.wait();
            output.close();
            log::debug!("fan-in '{label}' finished, output closed");
        })?;

        Ok(consumer)
    }
}
