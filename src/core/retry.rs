use std::time::{Duration, Instant};

/// Default pause between two attempts while waiting for a card
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Time source used by blocking retry loops
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

/// Wall-clock time and `std::thread::sleep`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Fixed-interval retry bounded by a deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Run `attempt` until it succeeds or the deadline passes.
    ///
    /// The first attempt always happens, even with a zero timeout. After a
    /// failure the loop sleeps for the interval (cut short at the deadline)
    /// and tries again; a failure at or past the deadline is returned as is.
    /// A timeout too large to represent as an `Instant` never expires.
    pub fn run<T, E>(
        &self,
        clock: &dyn Clock,
        mut attempt: impl FnMut() -> Result<T, E>,
    ) -> Result<T, E> {
        let deadline = clock.now().checked_add(self.timeout);
        let mut attempts = 0u32;

        loop {
            attempts = attempts.saturating_add(1);
            let err = match attempt() {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let pause = match deadline {
                Some(deadline) => {
                    let now = clock.now();
                    if now >= deadline {
                        log::debug!("Giving up after {} attempt(s)", attempts);
                        return Err(err);
                    }
                    self.interval.min(deadline - now)
                }
                None => self.interval,
            };

            clock.sleep(pause);
        }
    }
}
