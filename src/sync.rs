//! Locks that do not poison themselves.
//!
//! Poisoning is the wrong behavior for this crate. A [`Done`][crate::Done] guard decrements its
//! [`CompletionCounter`][crate::CompletionCounter] while the task owning it is unwinding, and with
//! [`std::sync::Mutex`] that would poison the counter's lock and turn every later `wait` into a
//! knock-on panic. The panic that actually matters is already propagated to the owner of the
//! [`TaskGroup`][crate::TaskGroup], so the poison flag carries no information here.
//!
//! Only the handful of operations the crate needs are mirrored.

use std::{
    ops::{Deref, DerefMut},
    sync,
    time::Duration,
};

#[derive(Debug, Default)]
pub struct Mutex<T: ?Sized> {
    inner: sync::Mutex<T>,
}

impl<T> Mutex<T> {
    pub const fn new(t: T) -> Mutex<T> {
        Self {
            inner: sync::Mutex::new(t),
        }
    }
}

impl<T: ?Sized> Mutex<T> {
    pub fn lock(&self) -> MutexGuard<'_, T> {
        let guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        };

        MutexGuard { inner: guard }
    }
}

#[derive(Debug)]
pub struct MutexGuard<'a, T: ?Sized + 'a> {
    inner: sync::MutexGuard<'a, T>,
}

impl<'a, T: ?Sized + 'a> Deref for MutexGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<'a, T: ?Sized + 'a> DerefMut for MutexGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

#[derive(Debug, Default)]
pub struct Condvar {
    inner: sync::Condvar,
}

impl Condvar {
    pub const fn new() -> Condvar {
        Self {
            inner: sync::Condvar::new(),
        }
    }

    pub fn wait_while<'a, T, F>(&self, guard: MutexGuard<'a, T>, condition: F) -> MutexGuard<'a, T>
    where
        F: FnMut(&mut T) -> bool,
    {
        let guard = match self.inner.wait_while(guard.inner, condition) {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        };
        MutexGuard { inner: guard }
    }

    /// Returns the guard and whether the wait ended because `dur` elapsed.
    pub fn wait_timeout_while<'a, T, F>(
        &self,
        guard: MutexGuard<'a, T>,
        dur: Duration,
        condition: F,
    ) -> (MutexGuard<'a, T>, bool)
    where
        F: FnMut(&mut T) -> bool,
    {
        let (guard, timeout) = match self.inner.wait_timeout_while(guard.inner, dur, condition) {
            Ok(out) => out,
            Err(poison) => poison.into_inner(),
        };
        (MutexGuard { inner: guard }, timeout.timed_out())
    }

    pub fn notify_all(&self) {
        self.inner.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use std::{panic::resume_unwind, sync::Arc, thread};

    use super::*;

    #[test]
    fn lock_survives_panicking_holder() {
        let mutex = Arc::new(Mutex::new(0));
        let mutex2 = mutex.clone();
        thread::spawn(move || {
            let mut guard = mutex2.lock();
            *guard += 1;
            resume_unwind(Box::new("holder panic"));
        })
        .join()
        .unwrap_err();

        assert_eq!(*mutex.lock(), 1);
    }

    #[test]
    fn wait_timeout_reports_timeout() {
        let mutex = Mutex::new(false);
        let condvar = Condvar::new();
        let (guard, timed_out) =
            condvar.wait_timeout_while(mutex.lock(), Duration::from_millis(10), |ready| !*ready);
        assert!(timed_out);
        assert!(!*guard);
    }

    #[test]
    fn wait_while_wakes_on_notify() {
        let shared = Arc::new((Mutex::new(false), Condvar::new()));
        let shared2 = shared.clone();
        let handle = thread::spawn(move || {
            *shared2.0.lock() = true;
            shared2.1.notify_all();
        });

        let guard = shared.1.wait_while(shared.0.lock(), |ready| !*ready);
        assert!(*guard);
        drop(guard);
        handle.join().unwrap();
    }
}
