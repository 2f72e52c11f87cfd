//! Thread-based worker pools, pipelines, fan-out/fan-in and broadcast over closable conduits.
//!
//! (this library runs a bounded number of OS threads that process in-memory data; if you're
//! looking for running large numbers of I/O tasks concurrently, you're probably better served by
//! an `async` runtime)
//!
//! # Overview
//!
//! The building blocks are [`conduit`]s, [`TaskGroup`]s and [`CancellationSignal`]s.
//!
//! ## Conduits
//!
//! A conduit is a typed FIFO queue with two ends: a [`Producer`] that writes to it and is the only
//! handle that can close it, and any number of [`Consumer`]s that read from it. Items enqueued
//! before the conduit is closed are always delivered; a consumer that has drained a closed conduit
//! gets [`conduit::Closed`] instead of blocking. Every task in this library follows the same
//! discipline: it closes the conduits it writes to when it exits, and never closes the ones it
//! reads from. Closing the inputs of a processing graph therefore shuts down every task in it, one
//! after the other.
//!
//! ## Task groups
//!
//! [`TaskGroup`] enforces *structured concurrency*: every thread spawned by one of its operations
//! is owned by the group. When the group is dropped, its [`CancellationSignal`] fires, and every
//! thread is joined. If a thread has panicked, the panic is forwarded to the thread dropping (or
//! joining) the group, as if it had performed the computation directly.
//!
//! The group's operations each take input [`Consumer`]s and return output [`Consumer`]s:
//!
//! - [`TaskGroup::worker_pool`] processes jobs on N workers (unordered).
//! - [`TaskGroup::stage`] and [`TaskGroup::filter`] form ordered pipelines, fed by
//!   [`TaskGroup::source`].
//! - [`TaskGroup::fan_out`] splits work across workers that each own an output, and
//!   [`TaskGroup::fan_in`] merges conduits back together.
//! - [`TaskGroup::broadcast`] copies every item to every subscriber.
//!
//! ## Cancellation and pacing
//!
//! [`CancellationSignal`] is a fire-once flag that tasks poll, or race their conduit operations
//! against. [`RateLimiter`] and [`Pacer`] gate units of work in time.
//!
//! # Usage
//!
//! A three-stage pipeline. Order is preserved:
//!
//! ```
//! use sluiceway::TaskGroup;
//!
//! let mut group = TaskGroup::new();
//! let input = group.source([1, 2, 3, 4, 5]).unwrap();
//! let added = group.stage(input, |n: i32| n + 1).unwrap();
//! let doubled = group.stage(added, |n| n * 2).unwrap();
//! let output = group.stage(doubled, |n| n - 3).unwrap();
//!
//! assert_eq!(output.into_iter().collect::<Vec<_>>(), [1, 3, 5, 7, 9]);
//! group.join();
//! ```
//!
//! A worker pool fed from the calling thread, with a bounded job queue:
//!
//! ```
//! use sluiceway::{conduit, TaskGroup};
//!
//! let mut group = TaskGroup::builder().name("hash").capacity(4).build();
//! let (jobs, queue) = conduit::bounded(4);
//! let digests = group
//!     .worker_pool(queue, 4, |line: String| line.bytes().map(u64::from).sum::<u64>())
//!     .unwrap();
//!
//! let feeder = std::thread::spawn(move || {
//!     for line in ["ab", "cd", "ef"] {
//!         jobs.send(line.to_string()).unwrap();
//!     }
//! });
//!
//! let mut digests = digests.into_iter().collect::<Vec<_>>();
//! digests.sort();
//! assert_eq!(digests, [195, 199, 203]);
//! feeder.join().unwrap();
//! group.join();
//! ```
//!
//! Dropping the group instead of joining it stops everything, even if inputs are still open:
//!
//! ```
//! use sluiceway::{conduit, TaskGroup};
//!
//! let mut group = TaskGroup::new();
//! let (_jobs, queue) = conduit::unbounded::<u32>();
//! let results = group.worker_pool(queue, 2, |job| job).unwrap();
//!
//! drop(group);
//! assert!(results.recv().is_err());
//! ```

pub mod conduit;

mod broadcast;
mod cancel;
mod counter;
mod fan;
mod group;
mod limiter;
mod pipeline;
mod pool;
mod sync;

pub use cancel::{CancellationSignal, Cancelled};
pub use conduit::{Consumer, Producer};
pub use counter::{CompletionCounter, Done};
pub use group::{TaskGroup, TaskGroupBuilder};
pub use limiter::{Pacer, RateLimiter};
pub use pool::JobFailed;
