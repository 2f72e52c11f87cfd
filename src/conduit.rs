//! Typed, closable FIFO queues connecting tasks.
//!
//! A conduit has two ends. The [`Producer`] is the single owner responsible for closing it; the
//! [`Consumer`] can be cloned freely and every clone competes for the same items (each item is
//! delivered to exactly one of them).
//!
//! Closing is always done by the producer side, either explicitly via [`Producer::close`] or by
//! dropping the [`Producer`]. Items enqueued before the conduit was closed are still delivered in
//! order; once they have been drained, [`Consumer::recv`] returns [`Closed`] instead of blocking.
//!
//! ```
//! use sluiceway::conduit::{self, Closed};
//!
//! let (mut producer, consumer) = conduit::bounded(2);
//! producer.send(1).unwrap();
//! producer.send(2).unwrap();
//! producer.close();
//! producer.close(); // closing again does nothing
//!
//! assert_eq!(consumer.recv(), Ok(1));
//! assert_eq!(consumer.recv(), Ok(2));
//! assert_eq!(consumer.recv(), Err(Closed));
//! ```

use std::{error::Error, fmt, time::Duration};

use crossbeam_channel::{select, Receiver, Sender};

use crate::CancellationSignal;

/// Creates a conduit that holds at most `capacity` items.
///
/// Once the conduit is full, [`Producer::send`] blocks until a consumer makes room. A capacity of
/// 0 creates a rendezvous conduit, where every send waits for a matching receive.
pub fn bounded<T>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    let (sender, receiver) = crossbeam_channel::bounded(capacity);
    (
        Producer {
            sender: Some(sender),
        },
        Consumer { receiver },
    )
}

/// Creates a conduit without a size limit. [`Producer::send`] never blocks.
pub fn unbounded<T>() -> (Producer<T>, Consumer<T>) {
    let (sender, receiver) = crossbeam_channel::unbounded();
    (
        Producer {
            sender: Some(sender),
        },
        Consumer { receiver },
    )
}

pub(crate) fn with_capacity<T>(capacity: Option<usize>) -> (Producer<T>, Consumer<T>) {
    match capacity {
        Some(capacity) => bounded(capacity),
        None => unbounded(),
    }
}

/// The writing end of a conduit.
///
/// There is exactly one [`Producer`] per conduit, and it is the only handle that can close it.
/// Dropping the [`Producer`] closes the conduit.
pub struct Producer<T> {
    sender: Option<Sender<T>>,
}

impl<T> Producer<T> {
    /// Enqueues `value`, blocking while a bounded conduit is full.
    ///
    /// Fails with the value handed back if this producer has been closed, or if every [`Consumer`]
    /// has been dropped.
    pub fn send(&self, value: T) -> Result<(), SendError<T>> {
        match &self.sender {
            Some(sender) => sender
                .send(value)
                .map_err(|err| SendError(err.into_inner())),
            None => Err(SendError(value)),
        }
    }

    /// Enqueues `value` if that can be done without blocking.
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        let Some(sender) = &self.sender else {
            return Err(TrySendError::Closed(value));
        };
        sender.try_send(value).map_err(|err| match err {
            crossbeam_channel::TrySendError::Full(value) => TrySendError::Full(value),
            crossbeam_channel::TrySendError::Disconnected(value) => TrySendError::Closed(value),
        })
    }

    /// Enqueues `value` unless `signal` fires first.
    ///
    /// If the signal has already fired, nothing is enqueued. When the send is abandoned, `value` is
    /// dropped.
    pub fn send_or_cancelled(
        &self,
        value: T,
        signal: &CancellationSignal,
    ) -> Result<(), Interrupted> {
        let Some(sender) = &self.sender else {
            return Err(Interrupted::Closed);
        };
        if signal.is_fired() {
            return Err(Interrupted::Cancelled);
        }

        let timer = signal.timer();
        select! {
            send(sender, value) -> res => res.map_err(|_| Interrupted::Closed),
            recv(signal.closed()) -> _ => Err(Interrupted::Cancelled),
            recv(timer) -> _ => Err(Interrupted::Cancelled),
        }
    }

    /// Closes the conduit.
    ///
    /// Consumers still receive every item that was enqueued before this call. Closing an already
    /// closed conduit does nothing.
    pub fn close(&mut self) {
        self.sender = None;
    }

    /// Returns whether [`Producer::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.sender.is_none()
    }

    /// Returns the number of items currently queued, or 0 once this producer is closed.
    pub fn len(&self) -> usize {
        self.sender.as_ref().map_or(0, |sender| sender.len())
    }

    /// Returns whether no items are currently queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the capacity of the conduit, or [`None`] if it is unbounded.
    ///
    /// A closed producer no longer knows its conduit and also returns [`None`].
    pub fn capacity(&self) -> Option<usize> {
        self.sender.as_ref().and_then(|sender| sender.capacity())
    }

    /// Creates another writing handle for a task that feeds this conduit on the owner's behalf.
    ///
    /// The conduit only closes once the owner and every shared handle have closed. Orchestrators
    /// hand these to their workers and close the owning handle after the workers are done.
    pub(crate) fn share(&self) -> Producer<T> {
        Producer {
            sender: self.sender.clone(),
        }
    }
}

impl<T> fmt::Debug for Producer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// The reading end of a conduit.
///
/// [`Consumer`]s can be cloned. Clones share the queue: every item is received by exactly one of
/// them.
pub struct Consumer<T> {
    receiver: Receiver<T>,
}

impl<T> Clone for Consumer<T> {
    fn clone(&self) -> Self {
        Self {
            receiver: self.receiver.clone(),
        }
    }
}

impl<T> Consumer<T> {
    /// Dequeues the next item, blocking until one is available.
    ///
    /// Returns [`Closed`] once the conduit has been closed and every item has been received.
    pub fn recv(&self) -> Result<T, Closed> {
        self.receiver.recv().map_err(|_| Closed)
    }

    /// Dequeues the next item if one is available right now.
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        self.receiver.try_recv().map_err(|err| match err {
            crossbeam_channel::TryRecvError::Empty => TryRecvError::Empty,
            crossbeam_channel::TryRecvError::Disconnected => TryRecvError::Closed,
        })
    }

    /// Dequeues the next item, waiting at most `timeout` for one to arrive.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout).map_err(|err| match err {
            crossbeam_channel::RecvTimeoutError::Timeout => RecvTimeoutError::Timeout,
            crossbeam_channel::RecvTimeoutError::Disconnected => RecvTimeoutError::Closed,
        })
    }

    /// Dequeues the next item unless `signal` fires first.
    ///
    /// If the signal has already fired, no item is dequeued, even if one is available.
    pub fn recv_or_cancelled(&self, signal: &CancellationSignal) -> Result<T, Interrupted> {
        if signal.is_fired() {
            return Err(Interrupted::Cancelled);
        }

        let timer = signal.timer();
        select! {
            recv(self.receiver) -> msg => msg.map_err(|_| Interrupted::Closed),
            recv(signal.closed()) -> _ => Err(Interrupted::Cancelled),
            recv(timer) -> _ => Err(Interrupted::Cancelled),
        }
    }

    /// Returns a blocking iterator that ends once the conduit is closed and drained.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            inner: self.receiver.iter(),
        }
    }

    /// Returns an iterator over the items that are available without blocking.
    pub fn try_iter(&self) -> TryIter<'_, T> {
        TryIter {
            inner: self.receiver.try_iter(),
        }
    }

    /// Returns the number of items currently queued.
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// Returns whether no items are currently queued.
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Returns the capacity of the conduit, or [`None`] if it is unbounded.
    pub fn capacity(&self) -> Option<usize> {
        self.receiver.capacity()
    }
}

impl<T> fmt::Debug for Consumer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish_non_exhaustive()
    }
}

impl<T> IntoIterator for Consumer<T> {
    type Item = T;
    type IntoIter = IntoIter<T>;

    fn into_iter(self) -> IntoIter<T> {
        IntoIter {
            inner: self.receiver.into_iter(),
        }
    }
}

impl<'a, T> IntoIterator for &'a Consumer<T> {
    type Item = T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Iter<'a, T> {
        self.iter()
    }
}

/// A blocking iterator over a borrowed [`Consumer`].
pub struct Iter<'a, T> {
    inner: crossbeam_channel::Iter<'a, T>,
}

impl<T> Iterator for Iter<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.inner.next()
    }
}

/// A non-blocking iterator over a borrowed [`Consumer`].
pub struct TryIter<'a, T> {
    inner: crossbeam_channel::TryIter<'a, T>,
}

impl<T> Iterator for TryIter<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.inner.next()
    }
}

/// A blocking iterator that owns its [`Consumer`].
pub struct IntoIter<T> {
    inner: crossbeam_channel::IntoIter<T>,
}

impl<T> Iterator for IntoIter<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.inner.next()
    }
}

/// Returned by [`Consumer::recv`] once the conduit is closed and drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("receiving on a closed and drained conduit")]
pub struct Closed;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TryRecvError {
    #[error("receiving on an empty conduit")]
    Empty,
    #[error("receiving on a closed and drained conduit")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RecvTimeoutError {
    #[error("timed out waiting on a conduit")]
    Timeout,
    #[error("receiving on a closed and drained conduit")]
    Closed,
}

/// Returned by the `*_or_cancelled` operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Interrupted {
    /// The conduit is closed (and drained, when receiving).
    #[error("conduit is closed")]
    Closed,
    /// The [`CancellationSignal`] fired.
    #[error("operation cancelled")]
    Cancelled,
}

/// Returned by [`Producer::send`] when the conduit is closed. Contains the value that could not be
/// sent.
#[derive(PartialEq, Eq, Clone, Copy)]
pub struct SendError<T>(pub T);

impl<T> SendError<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendError").finish_non_exhaustive()
    }
}

impl<T> fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("sending on a closed conduit")
    }
}

impl<T> Error for SendError<T> {}

/// Returned by [`Producer::try_send`]. Contains the value that could not be sent.
#[derive(PartialEq, Eq, Clone, Copy)]
pub enum TrySendError<T> {
    Full(T),
    Closed(T),
}

impl<T> TrySendError<T> {
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(value) | Self::Closed(value) => value,
        }
    }
}

impl<T> fmt::Debug for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(_) => f.write_str("Full(..)"),
            Self::Closed(_) => f.write_str("Closed(..)"),
        }
    }
}

impl<T> fmt::Display for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(_) => f.write_str("sending on a full conduit"),
            Self::Closed(_) => f.write_str("sending on a closed conduit"),
        }
    }
}

impl<T> Error for TrySendError<T> {}
