//! Single word spinning locks with S, SIX and X modes.
//!
//! [`PessimisticLock`] and [`OptimisticLock`] keep their whole state (reader count, SIX bit, X bit
//! and version) in one `AtomicU64` and have no wait queue: waiters spin with a pause hint, then
//! sleep a fixed backoff interval, indefinitely. There is no fairness between waiters.
//!
//! Both locks share the same state machine:
//!
//! ```text
//! Free -> S(n) -> Free
//! Free -> SIX -> X -> Free        (SIX -> X waits for S holders to leave)
//! X -> SIX                        (never blocks)
//! ```
//!
//! Every completed X section publishes a new version. Only [`OptimisticLock`] lets readers look at
//! that version without locking.

use crate::{
    guard::{RawModeLock, RawOptimisticLock},
    internal::{backoff, state::LockState},
};
use core::{
    fmt::{self, Debug, Formatter},
    sync::atomic::{
        self, AtomicU64,
        Ordering::{Acquire, Relaxed, Release},
    },
};
use lock_api::{
    GuardSend, RawRwLock, RawRwLockDowngrade, RawRwLockUpgrade, RawRwLockUpgradeDowngrade,
};

/// The shared single word state machine.
pub(crate) struct RawLock {
    state: AtomicU64,
}

impl Debug for RawLock {
    #[inline(never)]
    #[cold]
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = self.load(Relaxed);
        f.debug_struct("RawLock")
            .field("shared", &s.shared)
            .field("six", &s.six)
            .field("exclusive", &s.exclusive)
            .field("version", &s.version)
            .finish()
    }
}

impl RawLock {
    #[inline]
    pub const fn new() -> Self {
        RawLock {
            state: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn load(&self, o: atomic::Ordering) -> LockState {
        LockState::decode(self.state.load(o))
    }

    /// One attempt at moving the state along `admit`. Returns true on success.
    #[inline]
    fn try_transition(&self, admit: impl Fn(LockState) -> Option<LockState>) -> bool {
        let current = self.state.load(Relaxed);
        match admit(LockState::decode(current)) {
            Some(next) => self
                .state
                .compare_exchange(current, next.encode(), Acquire, Relaxed)
                .is_ok(),
            None => false,
        }
    }

    /// Spins until `admit` accepts the state and the CAS lands.
    #[inline]
    fn transition(&self, admit: impl Fn(LockState) -> Option<LockState> + Copy) {
        if likely!(self.try_transition(admit)) {
            return;
        }
        backoff::spin_until(|| if self.try_transition(admit) { Some(()) } else { None })
    }

    /// Releasing update; the caller holds a mode that makes the update valid.
    #[inline]
    fn release(&self, update: impl Fn(LockState) -> LockState) {
        let _ = self.state.fetch_update(Release, Relaxed, |word| {
            Some(update(LockState::decode(word)).encode())
        });
    }

    #[inline]
    fn admit_s(s: LockState) -> Option<LockState> {
        if s.can_share() {
            Some(LockState {
                shared: s.shared + 1,
                ..s
            })
        } else {
            None
        }
    }

    #[inline]
    fn admit_six(s: LockState) -> Option<LockState> {
        if s.can_six() {
            Some(LockState { six: true, ..s })
        } else {
            None
        }
    }

    #[inline]
    fn admit_x(s: LockState) -> Option<LockState> {
        if s.is_free() {
            Some(LockState {
                exclusive: true,
                ..s
            })
        } else {
            None
        }
    }

    #[inline]
    fn admit_upgrade(s: LockState) -> Option<LockState> {
        debug_assert!(s.six, "upgrade without holding SIX");
        if s.shared == 0 {
            Some(LockState {
                six: false,
                exclusive: true,
                ..s
            })
        } else {
            None
        }
    }

    /// Orders the writer's data stores after the X bit for optimistic readers.
    #[inline]
    fn x_acquired(&self) {
        atomic::fence(Release)
    }

    #[inline]
    pub fn lock_s(&self) {
        self.transition(RawLock::admit_s)
    }

    #[inline]
    pub fn try_lock_s(&self) -> bool {
        self.try_transition(RawLock::admit_s)
    }

    #[inline]
    pub fn unlock_s(&self) {
        self.release(|s| {
            debug_assert!(s.shared > 0, "attempt to unlock an unlocked S");
            LockState {
                shared: s.shared - 1,
                ..s
            }
        })
    }

    #[inline]
    pub fn lock_six(&self) {
        self.transition(RawLock::admit_six)
    }

    #[inline]
    pub fn try_lock_six(&self) -> bool {
        self.try_transition(RawLock::admit_six)
    }

    #[inline]
    pub fn unlock_six(&self) {
        self.release(|s| {
            debug_assert!(s.six, "attempt to unlock an unlocked SIX");
            LockState { six: false, ..s }
        })
    }

    #[inline]
    pub fn lock_x(&self) {
        self.transition(RawLock::admit_x);
        self.x_acquired()
    }

    #[inline]
    pub fn try_lock_x(&self) -> bool {
        let locked = self.try_transition(RawLock::admit_x);
        if locked {
            self.x_acquired()
        }
        locked
    }

    /// Clears X and publishes `version`. Nobody else can touch the word while X is held, so this
    /// is a plain store.
    #[inline]
    pub fn unlock_x(&self, version: u32) {
        debug_assert!(
            self.load(Relaxed).exclusive,
            "attempt to unlock an unlocked X"
        );
        self.state.store(
            LockState {
                version,
                ..LockState::default()
            }
            .encode(),
            Release,
        )
    }

    /// Spins until every S holder left, then swaps SIX for X.
    #[inline]
    pub fn upgrade(&self) {
        self.transition(RawLock::admit_upgrade);
        self.x_acquired()
    }

    #[inline]
    pub fn try_upgrade(&self) -> bool {
        let upgraded = self.try_transition(RawLock::admit_upgrade);
        if upgraded {
            self.x_acquired()
        }
        upgraded
    }

    /// X -> SIX. No waiters to notify since there is no queue.
    #[inline]
    pub fn downgrade_to_six(&self, version: u32) {
        debug_assert!(self.load(Relaxed).exclusive, "downgrade without holding X");
        self.state.store(
            LockState {
                six: true,
                version,
                ..LockState::default()
            }
            .encode(),
            Release,
        )
    }

    /// X -> S.
    #[inline]
    pub fn downgrade_to_s(&self, version: u32) {
        debug_assert!(self.load(Relaxed).exclusive, "downgrade without holding X");
        self.state.store(
            LockState {
                shared: 1,
                version,
                ..LockState::default()
            }
            .encode(),
            Release,
        )
    }

    /// SIX -> S.
    #[inline]
    pub fn downgrade_six_to_s(&self) {
        self.release(|s| {
            debug_assert!(s.six, "downgrade without holding SIX");
            LockState {
                six: false,
                shared: s.shared + 1,
                ..s
            }
        })
    }

    #[inline]
    pub fn version(&self) -> u32 {
        self.load(Acquire).version
    }

    /// The version, unless X is held.
    #[inline]
    pub fn load_version(&self) -> Option<u32> {
        let s = self.load(Acquire);
        if s.exclusive {
            None
        } else {
            Some(s.version)
        }
    }

    /// Admission only while the version is still `version`. X being held counts as a change, since
    /// the writer is about to publish a new version.
    #[inline]
    fn try_transition_at(
        &self,
        version: u32,
        admit: impl Fn(LockState) -> Option<LockState> + Copy,
    ) -> bool {
        backoff::spin_until(|| {
            let current = self.state.load(Relaxed);
            let s = LockState::decode(current);
            if s.version != version || s.exclusive {
                return Some(false);
            }
            let next = admit(s)?;
            self.state
                .compare_exchange_weak(current, next.encode(), Acquire, Relaxed)
                .ok()
                .map(|_| true)
        })
    }

    #[inline]
    pub fn try_lock_s_at(&self, version: u32) -> bool {
        self.try_transition_at(version, RawLock::admit_s)
    }

    #[inline]
    pub fn try_lock_six_at(&self, version: u32) -> bool {
        self.try_transition_at(version, RawLock::admit_six)
    }

    #[inline]
    pub fn try_lock_x_at(&self, version: u32) -> bool {
        let locked = self.try_transition_at(version, RawLock::admit_x);
        if locked {
            self.x_acquired()
        }
        locked
    }
}

macro_rules! raw_lock_impl {
    ($lock:ty) => {
        unsafe impl RawModeLock for $lock {
            type Token = ();

            #[inline]
            fn raw_lock_s(&self) {
                self.raw.lock_s()
            }

            #[inline]
            fn raw_lock_six(&self) {
                self.raw.lock_six()
            }

            #[inline]
            fn raw_lock_x(&self) {
                self.raw.lock_x()
            }

            #[inline]
            unsafe fn raw_unlock_s(&self, _: ()) {
                self.raw.unlock_s()
            }

            #[inline]
            unsafe fn raw_unlock_six(&self, _: ()) {
                self.raw.unlock_six()
            }

            #[inline]
            unsafe fn raw_unlock_x(&self, _: (), version: u64) {
                self.raw.unlock_x(version as u32)
            }

            #[inline]
            unsafe fn raw_upgrade(&self, _: ()) {
                self.raw.upgrade()
            }

            #[inline]
            unsafe fn raw_downgrade(&self, _: (), version: u64) {
                self.raw.downgrade_to_six(version as u32)
            }

            #[inline]
            fn raw_version(&self) -> u64 {
                self.raw.version() as u64
            }

            #[inline]
            fn next_version(version: u64) -> u64 {
                (version as u32).wrapping_add(1) as u64
            }
        }

        impl $lock {
            /// Creates an unlocked lock at version zero.
            #[inline]
            pub const fn new() -> Self {
                Self { raw: RawLock::new() }
            }

            /// Acquires S if it is available right now.
            #[inline]
            pub fn try_lock_s(&self) -> Option<$crate::guard::SGuard<'_, Self>> {
                if self.raw.try_lock_s() {
                    Some(unsafe { $crate::guard::SGuard::from_raw(self, ()) })
                } else {
                    None
                }
            }

            /// Acquires SIX if it is available right now.
            #[inline]
            pub fn try_lock_six(&self) -> Option<$crate::guard::SixGuard<'_, Self>> {
                if self.raw.try_lock_six() {
                    Some(unsafe { $crate::guard::SixGuard::from_raw(self, ()) })
                } else {
                    None
                }
            }

            /// Acquires X if it is available right now.
            #[inline]
            pub fn try_lock_x(&self) -> Option<$crate::guard::XGuard<'_, Self>> {
                if self.raw.try_lock_x() {
                    Some(unsafe { $crate::guard::XGuard::from_raw(self, ()) })
                } else {
                    None
                }
            }
        }

        impl Default for $lock {
            #[inline]
            fn default() -> Self {
                Self::new()
            }
        }

        mode_lock_api!($lock);
    };
}

/// A spinning S/SIX/X lock.
///
/// Also usable through `lock_api` as [`PessimisticRwLock`], with SIX as the upgradable mode.
#[derive(Debug)]
pub struct PessimisticLock {
    raw: RawLock,
}

raw_lock_impl!(PessimisticLock);

/// A [`PessimisticLock`] that also hands out version snapshots for lock-free reads.
#[derive(Debug)]
pub struct OptimisticLock {
    raw: RawLock,
}

raw_lock_impl!(OptimisticLock);

unsafe impl RawOptimisticLock for OptimisticLock {
    const VERSION_MASK: u64 = u32::MAX as u64;

    #[inline]
    fn raw_load_version(&self) -> Option<u64> {
        self.raw.load_version().map(u64::from)
    }

    #[inline]
    fn raw_stable_version(&self) -> u64 {
        backoff::spin_until(|| self.raw.load_version()) as u64
    }

    #[inline]
    fn raw_try_lock_s_at(&self, version: u64) -> Option<()> {
        bool_to_token(self.raw.try_lock_s_at(version as u32))
    }

    #[inline]
    fn raw_try_lock_six_at(&self, version: u64) -> Option<()> {
        bool_to_token(self.raw.try_lock_six_at(version as u32))
    }

    #[inline]
    fn raw_try_lock_x_at(&self, version: u64) -> Option<()> {
        bool_to_token(self.raw.try_lock_x_at(version as u32))
    }
}

optimistic_lock_api!(OptimisticLock);

#[inline]
fn bool_to_token(locked: bool) -> Option<()> {
    if locked {
        Some(())
    } else {
        None
    }
}

unsafe impl RawRwLock for PessimisticLock {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: PessimisticLock = PessimisticLock::new();
    type GuardMarker = GuardSend;

    #[inline]
    fn lock_shared(&self) {
        self.raw.lock_s()
    }

    #[inline]
    fn try_lock_shared(&self) -> bool {
        self.raw.try_lock_s()
    }

    #[inline]
    unsafe fn unlock_shared(&self) {
        self.raw.unlock_s()
    }

    #[inline]
    fn lock_exclusive(&self) {
        self.raw.lock_x()
    }

    #[inline]
    fn try_lock_exclusive(&self) -> bool {
        self.raw.try_lock_x()
    }

    #[inline]
    unsafe fn unlock_exclusive(&self) {
        self.raw.unlock_x(self.raw.version().wrapping_add(1))
    }
}

unsafe impl RawRwLockUpgrade for PessimisticLock {
    #[inline]
    fn lock_upgradable(&self) {
        self.raw.lock_six()
    }

    #[inline]
    fn try_lock_upgradable(&self) -> bool {
        self.raw.try_lock_six()
    }

    #[inline]
    unsafe fn unlock_upgradable(&self) {
        self.raw.unlock_six()
    }

    #[inline]
    unsafe fn upgrade(&self) {
        self.raw.upgrade()
    }

    #[inline]
    unsafe fn try_upgrade(&self) -> bool {
        self.raw.try_upgrade()
    }
}

unsafe impl RawRwLockDowngrade for PessimisticLock {
    #[inline]
    unsafe fn downgrade(&self) {
        self.raw.downgrade_to_s(self.raw.version().wrapping_add(1))
    }
}

unsafe impl RawRwLockUpgradeDowngrade for PessimisticLock {
    #[inline]
    unsafe fn downgrade_upgradable(&self) {
        self.raw.downgrade_six_to_s()
    }

    #[inline]
    unsafe fn downgrade_to_upgradable(&self) {
        self.raw.downgrade_to_six(self.raw.version().wrapping_add(1))
    }
}

/// A data carrying reader-writer lock on top of [`PessimisticLock`].
pub type PessimisticRwLock<T> = lock_api::RwLock<PessimisticLock, T>;

#[cfg(test)]
mod test {
    use super::*;
    use crate::guard::OptGuard;
    use crossbeam_utils::thread;
    use std::{
        cell::UnsafeCell,
        sync::atomic::{AtomicBool, AtomicUsize, Ordering::SeqCst},
        time::Duration,
    };

    fn send_sync<T: Send + Sync>() {}

    #[test]
    fn is_send_sync() {
        send_sync::<PessimisticLock>();
        send_sync::<OptimisticLock>();
    }

    #[test]
    fn shared_holders_coexist_with_six() {
        let lock = PessimisticLock::new();
        let a = lock.lock_s();
        let b = lock.lock_s();
        let six = lock.lock_six();
        assert!(lock.try_lock_six().is_none());
        assert!(lock.try_lock_x().is_none());
        let c = lock.try_lock_s().unwrap();
        drop((a, b, c));
        let x = six.upgrade();
        assert!(lock.try_lock_s().is_none());
        drop(x);
        assert!(lock.try_lock_x().is_some());
    }

    #[test]
    fn upgrade_waits_for_readers() {
        let lock = OptimisticLock::new();
        let upgraded = AtomicBool::new(false);
        let reader = lock.lock_s();
        thread::scope(|s| {
            s.spawn(|_| {
                let six = lock.lock_six();
                let _x = six.upgrade();
                upgraded.store(true, SeqCst);
            });
            std::thread::sleep(Duration::from_millis(50));
            assert!(!upgraded.load(SeqCst));
            drop(reader);
        })
        .unwrap();
        assert!(upgraded.load(SeqCst));
        assert_eq!(lock.get_version().version(), 1);
    }

    #[test]
    fn versions_advance_once_per_x_section() {
        let lock = OptimisticLock::new();
        let mut last = lock.get_version().version();
        for _ in 0..100 {
            drop(lock.lock_x());
            let now = lock.get_version().version();
            assert_eq!(now, last + 1);
            last = now;
        }
        // S and SIX sections leave the version alone
        drop(lock.lock_s());
        drop(lock.lock_six());
        assert_eq!(lock.get_version().version(), last);
    }

    #[test]
    fn downgrade_publishes_version_and_keeps_six() {
        let lock = OptimisticLock::new();
        let x = lock.lock_x();
        let six = x.downgrade();
        assert_eq!(six.version(), 1);
        assert!(lock.try_lock_s().is_some());
        assert!(lock.try_lock_six().is_none());
        let snapshot = lock.get_version();
        assert_eq!(snapshot.version(), 1);
        drop(six);
    }

    #[test]
    fn set_version_chooses_published_value() {
        let lock = OptimisticLock::new();
        let mut x = lock.lock_x();
        assert_eq!(x.new_version(), 1);
        x.set_version(0x1234);
        drop(x);
        assert_eq!(lock.get_version().version(), 0x1234);

        // wraps inside the 32 bit version field
        let mut x = lock.lock_x();
        x.set_version(u32::MAX as u64);
        drop(x);
        let x = lock.lock_x();
        assert_eq!(x.new_version(), 0);
    }

    #[test]
    fn verification_detects_writers() {
        let lock = OptimisticLock::new();
        let mut snapshot = lock.get_version();
        assert!(snapshot.immediate_verify(!0));
        drop(lock.lock_x());
        assert!(!snapshot.immediate_verify(!0));
        // refreshed after the failure
        assert!(!snapshot.verify_version(!0, 8));
        assert!(snapshot.verify_version(!0, 8));
        assert!(!snapshot.is_pessimistic());
    }

    #[test]
    fn masked_verification_ignores_low_bits() {
        let lock = OptimisticLock::new();
        let snapshot = lock.get_version();
        let mut x = lock.lock_x();
        x.set_version(1);
        drop(x);
        assert!(snapshot.immediate_verify(!1));
        assert!(!snapshot.immediate_verify(!0));
    }

    #[test]
    fn verification_falls_back_to_shared_lock() {
        let lock = OptimisticLock::new();
        let mut snapshot = lock.get_version();
        for _ in 0..2 {
            drop(lock.lock_x());
            assert!(!snapshot.verify_version(!0, 2));
        }
        assert!(snapshot.is_pessimistic());
        // writers are now excluded, so verification always holds
        assert!(lock.try_lock_x().is_none());
        assert!(snapshot.verify_version(!0, 2));
        drop(snapshot);
        assert!(lock.try_lock_x().is_some());
    }

    #[test]
    fn conditional_acquire_fails_after_change() {
        let lock = OptimisticLock::new();
        let version = lock.get_version().version();
        assert!(lock.try_lock_s_at(version).is_some());
        assert!(lock.try_lock_six_at(version).is_some());
        drop(lock.lock_x());
        assert!(lock.try_lock_s_at(version).is_none());
        assert!(lock.try_lock_six_at(version).is_none());
        assert!(lock.try_lock_x_at(version).is_none());
        let version = lock.get_version().version();
        let x = lock.try_lock_x_at(version).unwrap();
        assert!(lock.try_lock_s_at(version).is_none());
        drop(x);
    }

    #[test]
    fn optimistic_escalation() {
        let lock = OptimisticLock::new();
        let snapshot = lock.get_version();
        let x = snapshot.try_upgrade_x().unwrap();
        assert_eq!(x.version(), 0);
        drop(x);

        let stale = OptGuard::new(&lock);
        drop(lock.lock_x());
        assert!(stale.try_upgrade_six().is_none());
        assert!(lock.try_lock_six().is_some());
    }

    struct Shared(UnsafeCell<usize>);
    unsafe impl Sync for Shared {}

    #[test]
    fn counter_under_contention() {
        const THREAD_COUNT: usize = 8;
        const ITER_COUNT: usize = 2_000;
        let lock = PessimisticLock::new();
        let counter = Shared(UnsafeCell::new(0));
        let holders = AtomicUsize::new(0);

        let first = lock.lock_x();
        thread::scope(|s| {
            for _ in 0..THREAD_COUNT {
                s.spawn(|_| {
                    for _ in 0..ITER_COUNT {
                        let _x = lock.lock_x();
                        assert_eq!(holders.fetch_add(1, SeqCst), 0);
                        unsafe { *counter.0.get() += 1 };
                        holders.fetch_sub(1, SeqCst);
                    }
                });
            }
            std::thread::sleep(Duration::from_millis(10));
            drop(first);
        })
        .unwrap();
        assert_eq!(unsafe { *counter.0.get() }, THREAD_COUNT * ITER_COUNT);
    }

    #[test]
    fn lock_api_integration() {
        let lock = PessimisticRwLock::new(vec![1, 2, 3]);
        {
            let a = lock.read();
            let b = lock.read();
            assert_eq!(a.len() + b.len(), 6);
        }
        let upgradable = lock.upgradable_read();
        assert!(lock.try_read().is_some());
        let mut write = lock_api::RwLockUpgradableReadGuard::upgrade(upgradable);
        write.push(4);
        let read = lock_api::RwLockWriteGuard::downgrade(write);
        assert_eq!(*read, vec![1, 2, 3, 4]);
        assert!(lock.try_write().is_none());
        drop(read);
        assert_eq!(lock.into_inner().len(), 4);
    }
}
