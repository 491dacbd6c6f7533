//! The wait strategy shared by every acquisition loop in the crate: spin with a pause hint for
//! `spin_retries` rounds, then sleep for `backoff`, forever. There is no timeout.

use crate::config::{self, Config};
use std::{hint, thread, time::Duration};

#[derive(Debug)]
pub struct Backoff {
    spins:        u32,
    spin_retries: u32,
    sleep:        Duration,
}

impl Backoff {
    /// A backoff tuned by the global configuration.
    #[inline]
    pub fn new() -> Self {
        Backoff::with_config(config::global())
    }

    #[inline]
    pub fn with_config(config: &Config) -> Self {
        Backoff {
            spins:        0,
            spin_retries: config.spin_retries,
            sleep:        config.backoff,
        }
    }

    /// Waits a little. Each call spins once until the retry budget is used up; every call after
    /// that sleeps and starts a fresh budget.
    #[inline]
    pub fn snooze(&mut self) {
        if likely!(self.spins < self.spin_retries) {
            self.spins += 1;
            hint::spin_loop();
        } else {
            self.spins = 0;
            thread::sleep(self.sleep);
        }
    }
}

/// Spins until `ready` returns `Some`, backing off between attempts.
#[inline]
pub fn spin_until<T>(mut ready: impl FnMut() -> Option<T>) -> T {
    if let Some(t) = ready() {
        return t;
    }
    spin_until_slow(ready)
}

#[inline(never)]
#[cold]
fn spin_until_slow<T>(mut ready: impl FnMut() -> Option<T>) -> T {
    let mut backoff = Backoff::new();
    loop {
        backoff.snooze();
        if let Some(t) = ready() {
            return t;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Instant;

    #[test]
    fn sleeps_after_spin_budget() {
        let config = Config::default()
            .with_spin_retries(3)
            .with_backoff(Duration::from_millis(20));
        let mut backoff = Backoff::with_config(&config);
        let start = Instant::now();
        for _ in 0..3 {
            backoff.snooze();
        }
        assert!(start.elapsed() < Duration::from_millis(20));
        backoff.snooze();
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert_eq!(backoff.spins, 0);
    }

    #[test]
    fn spin_until_returns_first_ready_value() {
        let mut tries = 0;
        let value = spin_until(|| {
            tries += 1;
            if tries == 5 {
                Some(tries * 10)
            } else {
                None
            }
        });
        assert_eq!(value, 50);
    }
}
