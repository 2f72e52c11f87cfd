//! Pacing gates for rate-limited work.
//!
//! [`RateLimiter`] is a fixed-window counter: at most `capacity` acquisitions succeed per window,
//! and the allowance is reset in full once the window is over. Bursts of up to `capacity` are
//! possible right at a window boundary.
//!
//! [`Pacer`] spaces out units of work by a fixed interval instead, one per tick.

use std::{
    fmt, thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{select, Receiver};

use crate::{sync::Mutex, Cancelled, CancellationSignal};

/// A fixed-window rate limiter that can be shared between threads.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use sluiceway::RateLimiter;
///
/// let limiter = RateLimiter::new(3, Duration::from_secs(60));
/// let permitted = (0..10).filter(|_| limiter.acquire()).count();
/// assert_eq!(permitted, 3);
/// ```
pub struct RateLimiter {
    capacity: u32,
    window: Duration,
    state: Mutex<Window>,
}

struct Window {
    tokens: u32,
    start: Instant,
}

impl Window {
    /// Starts a new window with a full allowance if the current one is over.
    fn refill(&mut self, now: Instant, capacity: u32, window: Duration) {
        if now.saturating_duration_since(self.start) >= window {
            self.tokens = capacity;
            self.start = now;
        }
    }
}

impl RateLimiter {
    /// Creates a limiter that permits `capacity` acquisitions per `window`.
    ///
    /// The first window starts now, with a full allowance.
    ///
    /// # Panics
    ///
    /// This method will panic if `capacity` is 0.
    pub fn new(capacity: u32, window: Duration) -> Self {
        assert_ne!(capacity, 0, "capacity must be at least 1");
        Self {
            capacity,
            window,
            state: Mutex::new(Window {
                tokens: capacity,
                start: Instant::now(),
            }),
        }
    }

    /// Attempts to take one token.
    ///
    /// Returns `true` if the unit of work is permitted. Never blocks beyond the internal lock.
    pub fn acquire(&self) -> bool {
        self.try_acquire().is_ok()
    }

    /// Blocks until a token is available, then takes it.
    pub fn block(&self) {
        while let Err(wait) = self.try_acquire() {
            thread::sleep(wait);
        }
    }

    /// Blocks until a token is available and takes it, unless `signal` fires first.
    pub fn block_or_cancelled(&self, signal: &CancellationSignal) -> Result<(), Cancelled> {
        loop {
            if signal.is_fired() {
                return Err(Cancelled);
            }
            match self.try_acquire() {
                Ok(()) => return Ok(()),
                Err(wait) => {
                    if signal.wait_timeout(wait) {
                        return Err(Cancelled);
                    }
                }
            }
        }
    }

    /// Returns the number of tokens left in the current window.
    pub fn available(&self) -> u32 {
        let mut state = self.state.lock();
        state.refill(Instant::now(), self.capacity, self.window);
        state.tokens
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Takes a token, or returns how long it is until the current window ends.
    fn try_acquire(&self) -> Result<(), Duration> {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.refill(now, self.capacity, self.window);
        if state.tokens == 0 {
            let elapsed = now.saturating_duration_since(state.start);
            return Err(self.window.saturating_sub(elapsed));
        }
        state.tokens -= 1;
        Ok(())
    }
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("capacity", &self.capacity)
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}

/// Releases one unit of work per `interval`.
///
/// Ticks that nobody waits for are not accumulated beyond one, so a caller that falls behind does
/// not get a burst afterwards.
///
/// ```
/// use std::time::{Duration, Instant};
/// use sluiceway::Pacer;
///
/// let interval = Duration::from_millis(5);
/// let start = Instant::now();
/// let pacer = Pacer::new(interval);
/// for _request in 0..3 {
///     pacer.wait();
/// }
/// assert!(start.elapsed() >= interval * 3);
/// ```
pub struct Pacer {
    interval: Duration,
    ticks: Receiver<Instant>,
}

impl Pacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            ticks: crossbeam_channel::tick(interval),
        }
    }

    /// Blocks until the next tick and returns the instant it was scheduled for.
    pub fn wait(&self) -> Instant {
        match self.ticks.recv() {
            Ok(instant) => instant,
            Err(_) => unreachable!("tick channels never disconnect"),
        }
    }

    /// Like [`Pacer::wait`], but returns early if `signal` fires.
    pub fn wait_or_cancelled(&self, signal: &CancellationSignal) -> Result<Instant, Cancelled> {
        if signal.is_fired() {
            return Err(Cancelled);
        }
        let timer = signal.timer();
        select! {
            recv(self.ticks) -> instant => match instant {
                Ok(instant) => Ok(instant),
                Err(_) => unreachable!("tick channels never disconnect"),
            },
            recv(signal.closed()) -> _ => Err(Cancelled),
            recv(timer) -> _ => Err(Cancelled),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl fmt::Debug for Pacer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pacer")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;

    #[test]
    fn at_most_capacity_per_window() {
        let window = Duration::from_millis(200);
        let limiter = RateLimiter::new(3, window);
        let permitted = (0..10).filter(|_| limiter.acquire()).count();
        assert_eq!(permitted, 3);
        assert_eq!(limiter.available(), 0);

        thread::sleep(window);
        assert_eq!(limiter.available(), 3);
        let permitted = (0..10).filter(|_| limiter.acquire()).count();
        assert_eq!(permitted, 3);
    }

    #[test]
    fn concurrent_acquire_respects_capacity() {
        let limiter = Arc::new(RateLimiter::new(5, Duration::from_secs(60)));
        let permitted = Arc::new(AtomicUsize::new(0));
        let handles = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                let permitted = permitted.clone();
                thread::spawn(move || {
                    for _ in 0..10 {
                        if limiter.acquire() {
                            permitted.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(permitted.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn block_waits_for_next_window() {
        let window = Duration::from_millis(50);
        let start = Instant::now();
        let limiter = RateLimiter::new(2, window);
        for _ in 0..3 {
            limiter.block();
        }
        assert!(start.elapsed() >= window);
    }

    #[test]
    fn block_or_cancelled_gives_up() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let signal = CancellationSignal::new();
        assert_eq!(limiter.block_or_cancelled(&signal), Ok(()));

        let timeout = CancellationSignal::with_timeout(Duration::from_millis(20));
        assert_eq!(limiter.block_or_cancelled(&timeout), Err(Cancelled));

        signal.fire();
        assert_eq!(limiter.block_or_cancelled(&signal), Err(Cancelled));
    }

    #[test]
    #[should_panic(expected = "capacity must be at least 1")]
    fn zero_capacity_panics() {
        RateLimiter::new(0, Duration::from_secs(1));
    }

    #[test]
    fn pacer_spaces_out_work() {
        let interval = Duration::from_millis(10);
        let start = Instant::now();
        let pacer = Pacer::new(interval);
        let first = pacer.wait();
        let second = pacer.wait();
        assert!(second - first >= interval);
        assert!(start.elapsed() >= interval * 2);
        assert_eq!(pacer.interval(), interval);
    }

    #[test]
    fn pacer_wait_or_cancelled() {
        let pacer = Pacer::new(Duration::from_secs(60));
        let signal = CancellationSignal::new();
        signal.fire();
        assert_eq!(pacer.wait_or_cancelled(&signal), Err(Cancelled));

        let timeout = CancellationSignal::with_timeout(Duration::from_millis(10));
        assert_eq!(pacer.wait_or_cancelled(&timeout), Err(Cancelled));
    }
}
