//! RAII guards shared by every lock in the crate.
//!
//! A guard binds a lock, the per-acquisition token the lock hands out (the queue node for queue
//! locks), and for writers the version to publish on release. Guards are movable but never
//! copyable, and changing modes consumes the old guard:
//!
//! ```
//! use lockwood::OptimisticLock;
//!
//! let lock = OptimisticLock::new();
//! let six = lock.lock_six();
//! let mut x = six.upgrade();
//! x.set_version(x.version() + 10);
//! let six = x.downgrade();
//! drop(six);
//! assert_eq!(lock.get_version().version(), 10);
//! ```

use core::{
    fmt::{self, Debug, Formatter},
    mem::ManuallyDrop,
    sync::atomic::{self, Ordering::SeqCst},
};

/// The raw protocol behind a multi-mode (S, SIX, X) lock.
///
/// # Safety
///
/// Implementors must grant X to at most one caller at a time, never grant X while S or SIX is
/// held, and never grant two SIX at once. `unlock_*`, `upgrade` and `downgrade` may only be called
/// with a token returned by the matching acquisition.
pub unsafe trait RawModeLock {
    /// Per-acquisition state handed back on release.
    type Token: Copy;

    /// Blocks until S is granted.
    fn raw_lock_s(&self) -> Self::Token;

    /// Blocks until SIX is granted.
    fn raw_lock_six(&self) -> Self::Token;

    /// Blocks until X is granted.
    fn raw_lock_x(&self) -> Self::Token;

    /// Releases S.
    unsafe fn raw_unlock_s(&self, token: Self::Token);

    /// Releases SIX.
    unsafe fn raw_unlock_six(&self, token: Self::Token);

    /// Releases X, publishing `version`.
    unsafe fn raw_unlock_x(&self, token: Self::Token, version: u64);

    /// Turns a held SIX into X, waiting for S holders to leave.
    unsafe fn raw_upgrade(&self, token: Self::Token) -> Self::Token;

    /// Turns a held X into SIX, publishing `version`.
    unsafe fn raw_downgrade(&self, token: Self::Token, version: u64) -> Self::Token;

    /// The version currently stored in the lock. Only stable while the caller holds the lock.
    fn raw_version(&self) -> u64;

    /// The version a writer that acquired at `version` publishes by default.
    #[inline]
    fn next_version(version: u64) -> u64 {
        version.wrapping_add(1)
    }
}

/// Locks whose version can be read without acquiring them.
///
/// # Safety
///
/// The version must change whenever an X critical section that could have modified protected
/// data completes, and `raw_load_version` must never return a version while X is held.
pub unsafe trait RawOptimisticLock: RawModeLock {
    /// Bits of the version the lock stores; versions wrap inside this mask.
    const VERSION_MASK: u64;

    /// The current version, or `None` while X is held.
    fn raw_load_version(&self) -> Option<u64>;

    /// A version a reader may start from. Waits while X is held.
    fn raw_stable_version(&self) -> u64;

    /// Acquires S if the version is still `version`.
    fn raw_try_lock_s_at(&self, version: u64) -> Option<Self::Token>;

    /// Acquires SIX if the version is still `version`.
    fn raw_try_lock_six_at(&self, version: u64) -> Option<Self::Token>;

    /// Acquires X if the version is still `version`.
    fn raw_try_lock_x_at(&self, version: u64) -> Option<Self::Token>;
}

/// Shared ownership of a lock.
#[must_use = "if unused the lock is released immediately"]
pub struct SGuard<'a, L: RawModeLock> {
    lock:  &'a L,
    token: L::Token,
}

impl<'a, L: RawModeLock> SGuard<'a, L> {
    /// Wraps a token returned by `raw_lock_s`.
    ///
    /// # Safety
    ///
    /// `token` must come from a successful S acquisition of `lock` that nothing else will release.
    #[inline]
    pub unsafe fn from_raw(lock: &'a L, token: L::Token) -> Self {
        SGuard { lock, token }
    }

    /// The version of the lock. Stable for the lifetime of the guard.
    #[inline]
    pub fn version(&self) -> u64 {
        self.lock.raw_version()
    }
}

impl<L: RawModeLock> Drop for SGuard<'_, L> {
    #[inline]
    fn drop(&mut self) {
        unsafe { self.lock.raw_unlock_s(self.token) }
    }
}

impl<L: RawModeLock> Debug for SGuard<'_, L> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.pad("SGuard { .. }")
    }
}

/// Shared-with-intent-exclusive ownership of a lock.
#[must_use = "if unused the lock is released immediately"]
pub struct SixGuard<'a, L: RawModeLock> {
    lock:    &'a L,
    token:   L::Token,
    version: u64,
}

impl<'a, L: RawModeLock> SixGuard<'a, L> {
    /// Wraps a token returned by `raw_lock_six`.
    ///
    /// # Safety
    ///
    /// `token` must come from a successful SIX acquisition of `lock` that nothing else will
    /// release.
    #[inline]
    pub unsafe fn from_raw(lock: &'a L, token: L::Token) -> Self {
        SixGuard {
            lock,
            token,
            version: lock.raw_version(),
        }
    }

    /// The version observed at acquisition. No writer can change it while SIX is held.
    #[inline]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Upgrades to X, waiting for S holders to leave.
    #[inline]
    pub fn upgrade(self) -> XGuard<'a, L> {
        let this = ManuallyDrop::new(self);
        unsafe {
            let token = this.lock.raw_upgrade(this.token);
            XGuard::with_version(this.lock, token, this.version)
        }
    }
}

impl<L: RawModeLock> Drop for SixGuard<'_, L> {
    #[inline]
    fn drop(&mut self) {
        unsafe { self.lock.raw_unlock_six(self.token) }
    }
}

impl<L: RawModeLock> Debug for SixGuard<'_, L> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("SixGuard")
            .field("version", &self.version)
            .finish()
    }
}

/// Exclusive ownership of a lock.
///
/// On release the lock's version becomes [`new_version`](XGuard::new_version), which defaults to
/// the acquired version plus one.
#[must_use = "if unused the lock is released immediately"]
pub struct XGuard<'a, L: RawModeLock> {
    lock:        &'a L,
    token:       L::Token,
    version:     u64,
    new_version: u64,
}

impl<'a, L: RawModeLock> XGuard<'a, L> {
    /// Wraps a token returned by `raw_lock_x`.
    ///
    /// # Safety
    ///
    /// `token` must come from a successful X acquisition of `lock` that nothing else will release.
    #[inline]
    pub unsafe fn from_raw(lock: &'a L, token: L::Token) -> Self {
        XGuard::with_version(lock, token, lock.raw_version())
    }

    #[inline]
    unsafe fn with_version(lock: &'a L, token: L::Token, version: u64) -> Self {
        XGuard {
            lock,
            token,
            version,
            new_version: L::next_version(version),
        }
    }

    /// The version observed at acquisition.
    #[inline]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// The version that will be published on release.
    #[inline]
    pub fn new_version(&self) -> u64 {
        self.new_version
    }

    /// Chooses the version published on release, letting the version double as a caller defined
    /// generation or dirty counter. Optimistic readers only notice a change if the published
    /// value differs from [`version`](XGuard::version) under their mask.
    #[inline]
    pub fn set_version(&mut self, version: u64) {
        self.new_version = version
    }

    /// Downgrades to SIX, publishing the new version. Never blocks.
    #[inline]
    pub fn downgrade(self) -> SixGuard<'a, L> {
        let this = ManuallyDrop::new(self);
        unsafe {
            let token = this.lock.raw_downgrade(this.token, this.new_version);
            SixGuard::from_raw(this.lock, token)
        }
    }
}

impl<L: RawModeLock> Drop for XGuard<'_, L> {
    #[inline]
    fn drop(&mut self) {
        unsafe { self.lock.raw_unlock_x(self.token, self.new_version) }
    }
}

impl<L: RawModeLock> Debug for XGuard<'_, L> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("XGuard")
            .field("version", &self.version)
            .field("new_version", &self.new_version)
            .finish()
    }
}

/// A version snapshot for lock-free reading.
///
/// Read the protected data, then call [`verify_version`](OptGuard::verify_version). A failed
/// verification refreshes the snapshot so the caller can simply retry its reads. After
/// `max_retries` consecutive failures the guard takes a real S lock instead, after which
/// verification always succeeds: optimistic reading degrades to pessimistic reading rather than
/// starving under write contention.
#[must_use = "an optimistic read must be verified"]
pub struct OptGuard<'a, L: RawOptimisticLock> {
    lock:     &'a L,
    version:  u64,
    failures: u32,
    shared:   Option<L::Token>,
}

impl<'a, L: RawOptimisticLock> OptGuard<'a, L> {
    /// Takes a snapshot of `lock`'s version, waiting while X is held.
    #[inline]
    pub fn new(lock: &'a L) -> Self {
        OptGuard {
            lock,
            version: lock.raw_stable_version(),
            failures: 0,
            shared: None,
        }
    }

    /// The version this guard validates against.
    #[inline]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// True once the guard fell back to holding S.
    #[inline]
    pub fn is_pessimistic(&self) -> bool {
        self.shared.is_some()
    }

    #[inline]
    fn matches(&self, mask: u64) -> bool {
        // orders the caller's data reads before the version re-read
        atomic::fence(SeqCst);
        match self.lock.raw_load_version() {
            Some(current) => current & mask == self.version & mask,
            None => false,
        }
    }

    /// Returns true if the version is unchanged under `mask` since the snapshot.
    ///
    /// On failure the snapshot is refreshed, or, after `max_retries` consecutive failures, the
    /// guard acquires S. Either way the caller should re-read and verify again.
    #[inline]
    pub fn verify_version(&mut self, mask: u64, max_retries: u32) -> bool {
        if self.shared.is_some() || self.matches(mask) {
            self.failures = 0;
            return true;
        }
        self.verify_failed(max_retries);
        false
    }

    #[inline(never)]
    #[cold]
    fn verify_failed(&mut self, max_retries: u32) {
        self.failures += 1;
        if self.failures >= max_retries {
            let token = self.lock.raw_lock_s();
            self.shared = Some(token);
            self.version = self.lock.raw_version();
        } else {
            self.version = self.lock.raw_stable_version();
        }
    }

    /// Single shot check without refresh or fallback.
    #[inline]
    pub fn immediate_verify(&self, mask: u64) -> bool {
        self.shared.is_some() || self.matches(mask)
    }

    /// Escalates to S if nothing was written since the snapshot.
    #[inline]
    pub fn try_upgrade_s(self) -> Option<SGuard<'a, L>> {
        let mut this = ManuallyDrop::new(self);
        let token = match this.shared.take() {
            Some(token) => Some(token),
            None => this.lock.raw_try_lock_s_at(this.version),
        };
        token.map(|token| unsafe { SGuard::from_raw(this.lock, token) })
    }

    /// Escalates to SIX if nothing was written since the snapshot.
    #[inline]
    pub fn try_upgrade_six(self) -> Option<SixGuard<'a, L>> {
        let (lock, version) = self.release();
        lock.raw_try_lock_six_at(version)
            .map(|token| unsafe { SixGuard::from_raw(lock, token) })
    }

    /// Escalates to X if nothing was written since the snapshot.
    #[inline]
    pub fn try_upgrade_x(self) -> Option<XGuard<'a, L>> {
        let (lock, version) = self.release();
        lock.raw_try_lock_x_at(version)
            .map(|token| unsafe { XGuard::from_raw(lock, token) })
    }

    #[inline]
    fn release(self) -> (&'a L, u64) {
        let mut this = ManuallyDrop::new(self);
        if let Some(token) = this.shared.take() {
            unsafe { this.lock.raw_unlock_s(token) }
        }
        (this.lock, this.version)
    }
}

impl<L: RawOptimisticLock> Drop for OptGuard<'_, L> {
    #[inline]
    fn drop(&mut self) {
        if let Some(token) = self.shared.take() {
            unsafe { self.lock.raw_unlock_s(token) }
        }
    }
}

impl<L: RawOptimisticLock> Debug for OptGuard<'_, L> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptGuard")
            .field("version", &self.version)
            .field("pessimistic", &self.shared.is_some())
            .finish()
    }
}

/// Adds the guard returning acquisition methods to a [`RawModeLock`].
macro_rules! mode_lock_api {
    ($lock:ty) => {
        impl $lock {
            /// Blocks until S is granted.
            #[inline]
            pub fn lock_s(&self) -> $crate::guard::SGuard<'_, Self> {
                let token = $crate::guard::RawModeLock::raw_lock_s(self);
                unsafe { $crate::guard::SGuard::from_raw(self, token) }
            }

            /// Blocks until SIX is granted.
            #[inline]
            pub fn lock_six(&self) -> $crate::guard::SixGuard<'_, Self> {
                let token = $crate::guard::RawModeLock::raw_lock_six(self);
                unsafe { $crate::guard::SixGuard::from_raw(self, token) }
            }

            /// Blocks until X is granted.
            #[inline]
            pub fn lock_x(&self) -> $crate::guard::XGuard<'_, Self> {
                let token = $crate::guard::RawModeLock::raw_lock_x(self);
                unsafe { $crate::guard::XGuard::from_raw(self, token) }
            }
        }
    };
}

/// Adds the version based methods to a [`RawOptimisticLock`].
macro_rules! optimistic_lock_api {
    ($lock:ty) => {
        impl $lock {
            /// Mask covering every version bit this lock stores.
            pub const VERSION_MASK: u64 = <Self as $crate::guard::RawOptimisticLock>::VERSION_MASK;

            /// Snapshots the version for an optimistic read. Waits only while X is held.
            #[inline]
            pub fn get_version(&self) -> $crate::guard::OptGuard<'_, Self> {
                $crate::guard::OptGuard::new(self)
            }

            /// Acquires S unless the version moved away from `version`.
            #[inline]
            pub fn try_lock_s_at(&self, version: u64) -> Option<$crate::guard::SGuard<'_, Self>> {
                $crate::guard::RawOptimisticLock::raw_try_lock_s_at(self, version)
                    .map(|token| unsafe { $crate::guard::SGuard::from_raw(self, token) })
            }

            /// Acquires SIX unless the version moved away from `version`.
            #[inline]
            pub fn try_lock_six_at(
                &self,
                version: u64,
            ) -> Option<$crate::guard::SixGuard<'_, Self>> {
                $crate::guard::RawOptimisticLock::raw_try_lock_six_at(self, version)
                    .map(|token| unsafe { $crate::guard::SixGuard::from_raw(self, token) })
            }

            /// Acquires X unless the version moved away from `version`.
            #[inline]
            pub fn try_lock_x_at(&self, version: u64) -> Option<$crate::guard::XGuard<'_, Self>> {
                $crate::guard::RawOptimisticLock::raw_try_lock_x_at(self, version)
                    .map(|token| unsafe { $crate::guard::XGuard::from_raw(self, token) })
            }
        }
    };
}
