//! Broadcasting every item to every subscriber.

use std::io;

use crate::{conduit::Interrupted, Consumer, TaskGroup};

impl TaskGroup {
    /// Spawns a dispatcher that copies every item of `input` to each of `subscribers` new conduits.
    ///
    /// Each subscriber receives every item, in the order of `input`. The returned conduits are all
    /// closed once `input` is closed and drained.
    ///
    /// Delivery is coupled: the dispatcher hands an item to every subscriber before it takes the
    /// next one, so with a bounded capacity the slowest subscriber sets the pace for all of them.
    /// A subscriber whose [`Consumer`] is dropped stops receiving, and no longer holds up the rest.
    /// Once every subscriber is gone, the dispatcher exits without draining `input`.
    ///
    /// # Panics
    ///
    /// This method will panic if `subscribers` is 0.
    ///
    /// # Examples
    ///
    /// ```
    /// use sluiceway::TaskGroup;
    ///
    /// let mut group = TaskGroup::new();
    /// let events = group.source(["start", "stop"]).unwrap();
    /// let subscribers = group.broadcast(events, 2).unwrap();
    ///
    /// for subscriber in subscribers {
    ///     assert_eq!(subscriber.into_iter().collect::<Vec<_>>(), ["start", "stop"]);
    /// }
    /// group.join();
    /// ```
    pub fn broadcast<T>(
        &mut self,
        input: Consumer<T>,
        subscribers: usize,
    ) -> io::Result<Vec<Consumer<T>>>
    where
        T: Clone + Send + 'static,
    {
        assert_ne!(subscribers, 0, "subscriber count must be at least 1");

        let label = self.next_label("broadcast");
        let (mut outputs, consumers): (Vec<_>, Vec<_>) =
            (0..subscribers).map(|_| self.conduit()).unzip();
        let cancel = self.cancellation().clone();
        self.spawn_labeled(label.clone(), move || {
            'items: while let Ok(item) = input.recv_or_cancelled(&cancel) {
                let mut i = 0;
                while i < outputs.len() {
                    match outputs[i].send_or_cancelled(item.clone(), &cancel) {
                        Ok(()) => i += 1,
                        Err(Interrupted::Closed) => {
                            log::debug!("broadcast '{label}' lost a subscriber");
                            outputs.swap_remove(i);
                        }
                        Err(Interrupted::Cancelled) => break 'items,
                    }
                }
                if outputs.is_empty() {
                    log::debug!("broadcast '{label}' has no subscribers left");
                    break;
                }
            }
            for output in &mut outputs {
                output.close();
            }
        })?;

        Ok(consumers)
    }
}
