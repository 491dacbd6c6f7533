//! Wrap-around counters.
//!
//! Epoch values only ever move forward, but the counter behind them is allowed to wrap. [`Serial`]
//! compares two values by their distance rather than their magnitude, so `a < b` holds as long as
//! `b` was produced fewer than `2^63` increments after `a`.

use core::{
    cmp::Ordering,
    fmt::{self, Display, Formatter},
};

/// A wrap-safe, monotonically advancing counter value.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct Serial(u64);

impl Serial {
    /// The value preceding the first one a counter hands out.
    pub const ZERO: Serial = Serial(0);

    #[inline]
    pub const fn new(value: u64) -> Self {
        Serial(value)
    }

    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// The value `n` increments later.
    #[inline]
    pub const fn add(self, n: u64) -> Self {
        Serial(self.0.wrapping_add(n))
    }

    /// The value `n` increments earlier.
    #[inline]
    pub const fn sub(self, n: u64) -> Self {
        Serial(self.0.wrapping_sub(n))
    }

    /// The next value.
    #[inline]
    pub const fn next(self) -> Self {
        self.add(1)
    }

    /// Signed distance from `earlier` to `self`.
    #[inline]
    pub const fn distance_from(self, earlier: Serial) -> i64 {
        self.0.wrapping_sub(earlier.0) as i64
    }
}

impl PartialOrd for Serial {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Serial {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance_from(*other).cmp(&0)
    }
}

impl Display for Serial {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl From<u64> for Serial {
    #[inline]
    fn from(value: u64) -> Self {
        Serial(value)
    }
}
