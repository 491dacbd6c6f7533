//! FIFO queue locks with S, SIX and X modes.
//!
//! Waiters append themselves to a virtual linked list of [`QueueNode`](crate::queue_node::QueueNode)s
//! by swapping their node id into the tail field of the lock word, link themselves behind their
//! predecessor and then spin on their own node until the predecessor grants them the head of the
//! queue. Only the head of the queue ever touches the mode bits, so waiters never fight over the
//! lock word and the lock is granted in the order the tail swaps succeeded.
//!
//! Once at the head:
//!
//! - S and SIX wait for a compatible mode, take it and immediately pass the head on, so S and SIX
//!   holders never block readers queued behind them.
//! - X waits for every other holder to leave and keeps the head until it releases, so nothing queued
//!   behind a writer moves.
//!
//! Three flavours differ only in where they keep the version:
//!
//! | lock                 | version                                   | optimistic reads |
//! |----------------------|-------------------------------------------|------------------|
//! | [`McsLock`]          | none                                      | no               |
//! | [`OptMcsLock`]       | a second word, 63 bits                    | yes              |
//! | [`CompactQueueLock`] | inside the lock word, 31 bits             | yes              |
//!
//! The optimistic flavours keep an opportunistic read bit in the lock word. X and SIX requests clear
//! it when they queue up, and whoever empties the queue sets it again. While it is set and no writer
//! holds the lock, [`get_version`](CompactQueueLock::get_version) reads the version without queueing.
//! Otherwise it queues up as a reader to get a stable version.
//!
//! Queueing needs a thread slot. A thread that can't get one panics like
//! [`thread_slot::current`](crate::thread_slot::current) instead of waiting for a node forever.

use crate::{
    guard::{RawModeLock, RawOptimisticLock},
    internal::{
        backoff,
        state::{QueueState, QUEUE_INIT, QUEUE_SHARED_MAX, QUEUE_VERSION_MASK},
    },
    queue_node::{self, NodeId, QueueNodePool},
};
use std::{
    fmt::{self, Debug, Formatter},
    sync::atomic::{
        self, AtomicU64,
        Ordering::{self, AcqRel, Acquire, Relaxed, Release},
    },
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Mode {
    S,
    Six,
    X,
}

/// Where a queue lock keeps its version.
pub(crate) trait VersionStore: Default {
    /// Bits of the version that are stored.
    const MASK: u64;

    /// The version, as of `state`. Stable only while the lock is held.
    fn current(&self, state: QueueState) -> u64;

    /// Called right after X was granted.
    fn begin_write(&self);

    /// Called before the lock word transition that releases X.
    fn publish(&self, version: u64);

    /// Applies `version` to the lock word transition that releases X.
    fn stamp(&self, state: QueueState, version: u64) -> QueueState;

    /// The version, unless a writer is active.
    fn observe(&self, state: QueueState) -> Option<u64>;
}

/// No version at all.
#[derive(Debug, Default)]
pub(crate) struct NoVersion;

impl VersionStore for NoVersion {
    const MASK: u64 = 0;

    #[inline]
    fn current(&self, _: QueueState) -> u64 {
        0
    }

    #[inline]
    fn begin_write(&self) {}

    #[inline]
    fn publish(&self, _: u64) {}

    #[inline]
    fn stamp(&self, state: QueueState, _: u64) -> QueueState {
        state
    }

    #[inline]
    fn observe(&self, state: QueueState) -> Option<u64> {
        if state.exclusive {
            None
        } else {
            Some(0)
        }
    }
}

const WRITING: u64 = 1;

/// Version in its own word, shifted left by one. The low bit is set while a writer is active.
#[derive(Debug, Default)]
pub(crate) struct SplitVersion {
    word: AtomicU64,
}

impl VersionStore for SplitVersion {
    const MASK: u64 = !0 >> 1;

    #[inline]
    fn current(&self, _: QueueState) -> u64 {
        self.word.load(Acquire) >> 1
    }

    #[inline]
    fn begin_write(&self) {
        let _ = self.word.fetch_or(WRITING, Relaxed);
        // the writer's data stores may not become visible before the writing bit
        atomic::fence(Release)
    }

    #[inline]
    fn publish(&self, version: u64) {
        self.word.store((version & Self::MASK) << 1, Release)
    }

    #[inline]
    fn stamp(&self, state: QueueState, _: u64) -> QueueState {
        state
    }

    #[inline]
    fn observe(&self, state: QueueState) -> Option<u64> {
        if state.exclusive {
            return None;
        }
        let word = self.word.load(Acquire);
        if word & WRITING != 0 {
            None
        } else {
            Some(word >> 1)
        }
    }
}

/// Version inside the lock word.
#[derive(Debug, Default)]
pub(crate) struct InlineVersion;

impl VersionStore for InlineVersion {
    const MASK: u64 = QUEUE_VERSION_MASK;

    #[inline]
    fn current(&self, state: QueueState) -> u64 {
        state.version
    }

    #[inline]
    fn begin_write(&self) {
        atomic::fence(Release)
    }

    #[inline]
    fn publish(&self, _: u64) {}

    #[inline]
    fn stamp(&self, state: QueueState, version: u64) -> QueueState {
        QueueState {
            version: version & Self::MASK,
            ..state
        }
    }

    #[inline]
    fn observe(&self, state: QueueState) -> Option<u64> {
        if state.exclusive {
            None
        } else {
            Some(state.version)
        }
    }
}

/// The queue protocol shared by the three queue locks.
pub(crate) struct RawQueueLock<V> {
    state:    AtomicU64,
    versions: V,
    pool:     &'static QueueNodePool,
}

impl<V: VersionStore> Debug for RawQueueLock<V> {
    #[inline(never)]
    #[cold]
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = self.load(Relaxed);
        f.debug_struct("RawQueueLock")
            .field("tail", &s.tail)
            .field("shared", &s.shared)
            .field("six", &s.six)
            .field("exclusive", &s.exclusive)
            .field("opread", &s.opread)
            .field("version", &self.versions.current(s))
            .finish()
    }
}

impl<V: VersionStore> RawQueueLock<V> {
    pub fn with_pool(pool: &'static QueueNodePool) -> Self {
        RawQueueLock {
            state: AtomicU64::new(QUEUE_INIT),
            versions: V::default(),
            pool,
        }
    }

    #[inline]
    pub fn load(&self, o: Ordering) -> QueueState {
        QueueState::decode(self.state.load(o))
    }

    #[inline]
    fn update(
        &self,
        success: Ordering,
        mut f: impl FnMut(QueueState) -> Option<QueueState>,
    ) -> Result<QueueState, QueueState> {
        self.state
            .fetch_update(success, Relaxed, |word| {
                f(QueueState::decode(word)).map(QueueState::encode)
            })
            .map(QueueState::decode)
            .map_err(QueueState::decode)
    }

    /// Spins until `admit` accepts the state and the transition lands.
    #[inline]
    fn spin_update(&self, admit: impl Fn(QueueState) -> Option<QueueState> + Copy) {
        backoff::spin_until(|| self.update(Acquire, admit).ok().map(drop))
    }

    /// Joins the queue and waits until this thread's node is the head.
    fn enqueue(&self, mode: Mode) -> NodeId {
        let id = self.pool.acquire();
        let prev = match self.update(AcqRel, |s| {
            Some(QueueState {
                tail: Some(id),
                opread: s.opread && mode == Mode::S,
                ..s
            })
        }) {
            Ok(prev) | Err(prev) => prev,
        };
        if let Some(pred) = prev.tail {
            // the predecessor can't leave before it sees this link
            self.pool.node(pred).set_next(id);
            let node = self.pool.node(id);
            if unlikely!(!node.is_granted()) {
                backoff::spin_until(|| if node.is_granted() { Some(()) } else { None })
            }
        }
        id
    }

    /// Hands the head of the queue to the successor of `id`, or empties the queue, then frees `id`.
    fn pass_on(&self, id: NodeId) {
        let node = self.pool.node(id);
        let successor = backoff::spin_until(|| {
            if let Some(next) = node.next() {
                return Some(Some(next));
            }
            let emptied = self.update(AcqRel, |s| {
                if s.tail == Some(id) {
                    Some(QueueState {
                        tail: None,
                        opread: true,
                        ..s
                    })
                } else {
                    None
                }
            });
            // a failed swap means a successor is between its tail swap and its link
            emptied.ok().map(|_| None)
        });
        if let Some(next) = successor {
            // ownership of the head moves to `next`; neither node is touched by us afterwards
            self.pool.node(next).grant();
        }
        self.pool.release(id)
    }

    #[inline]
    fn admit_s(s: QueueState) -> Option<QueueState> {
        if !s.exclusive && s.shared < QUEUE_SHARED_MAX {
            Some(QueueState {
                shared: s.shared + 1,
                ..s
            })
        } else {
            None
        }
    }

    #[inline]
    fn admit_six(s: QueueState) -> Option<QueueState> {
        if !s.exclusive && !s.six {
            Some(QueueState { six: true, ..s })
        } else {
            None
        }
    }

    #[inline]
    fn admit_x(s: QueueState) -> Option<QueueState> {
        if !s.exclusive && !s.six && s.shared == 0 {
            Some(QueueState {
                exclusive: true,
                ..s
            })
        } else {
            None
        }
    }

    #[inline]
    fn admit_upgrade(s: QueueState) -> Option<QueueState> {
        debug_assert!(s.six, "upgrade without holding SIX");
        if s.shared == 0 {
            Some(QueueState {
                six: false,
                exclusive: true,
                ..s
            })
        } else {
            None
        }
    }

    pub fn lock_s(&self) -> Option<NodeId> {
        let id = self.enqueue(Mode::S);
        self.spin_update(Self::admit_s);
        self.pass_on(id);
        None
    }

    pub fn lock_six(&self) -> Option<NodeId> {
        let id = self.enqueue(Mode::Six);
        self.spin_update(Self::admit_six);
        self.pass_on(id);
        None
    }

    /// The returned node stays at the head of the queue until X is released or downgraded.
    pub fn lock_x(&self) -> Option<NodeId> {
        let id = self.enqueue(Mode::X);
        self.spin_update(Self::admit_x);
        self.versions.begin_write();
        Some(id)
    }

    pub fn unlock_s(&self) {
        let _ = self.update(Release, |s| {
            debug_assert!(s.shared > 0, "attempt to unlock an unlocked S");
            Some(QueueState {
                shared: s.shared - 1,
                ..s
            })
        });
    }

    pub fn unlock_six(&self) {
        let _ = self.update(Release, |s| {
            debug_assert!(s.six, "attempt to unlock an unlocked SIX");
            Some(QueueState { six: false, ..s })
        });
    }

    pub fn unlock_x(&self, head: Option<NodeId>, version: u64) {
        self.versions.publish(version);
        let _ = self.update(Release, |s| {
            debug_assert!(s.exclusive, "attempt to unlock an unlocked X");
            Some(self.versions.stamp(
                QueueState {
                    exclusive: false,
                    ..s
                },
                version,
            ))
        });
        if let Some(id) = head {
            self.pass_on(id)
        }
    }

    /// SIX -> X. A SIX holder is not at the head of the queue, so the result holds no node.
    pub fn upgrade(&self) -> Option<NodeId> {
        self.spin_update(Self::admit_upgrade);
        self.versions.begin_write();
        None
    }

    /// X -> SIX, letting everything queued behind the writer move on.
    pub fn downgrade(&self, head: Option<NodeId>, version: u64) -> Option<NodeId> {
        self.versions.publish(version);
        let _ = self.update(Release, |s| {
            debug_assert!(s.exclusive, "downgrade without holding X");
            Some(self.versions.stamp(
                QueueState {
                    exclusive: false,
                    six: true,
                    ..s
                },
                version,
            ))
        });
        if let Some(id) = head {
            self.pass_on(id)
        }
        None
    }

    #[inline]
    pub fn version(&self) -> u64 {
        self.versions.current(self.load(Acquire))
    }

    #[inline]
    pub fn load_version(&self) -> Option<u64> {
        self.versions.observe(self.load(Acquire))
    }

    /// A version no writer is working on. Reads the version directly if opportunistic reads are
    /// enabled, otherwise queues up as a reader.
    pub fn stable_version(&self) -> u64 {
        let s = self.load(Acquire);
        if likely!(s.opread) {
            if let Some(version) = self.versions.observe(s) {
                return version;
            }
        }
        self.stable_version_slow()
    }

    #[inline(never)]
    #[cold]
    fn stable_version_slow(&self) -> u64 {
        let token = self.lock_s();
        let version = self.version();
        debug_assert!(token.is_none());
        self.unlock_s();
        version
    }

    fn lock_at(&self, version: u64, mode: Mode) -> Option<Option<NodeId>> {
        if self.load_version() != Some(version) {
            return None;
        }
        let token = match mode {
            Mode::S => self.lock_s(),
            Mode::Six => self.lock_six(),
            Mode::X => self.lock_x(),
        };
        if likely!(self.version() == version) {
            return Some(token);
        }
        match mode {
            Mode::S => self.unlock_s(),
            Mode::Six => self.unlock_six(),
            Mode::X => self.unlock_x(token, self.version()),
        }
        None
    }

    #[inline]
    pub fn try_lock_s_at(&self, version: u64) -> Option<Option<NodeId>> {
        self.lock_at(version, Mode::S)
    }

    #[inline]
    pub fn try_lock_six_at(&self, version: u64) -> Option<Option<NodeId>> {
        self.lock_at(version, Mode::Six)
    }

    #[inline]
    pub fn try_lock_x_at(&self, version: u64) -> Option<Option<NodeId>> {
        self.lock_at(version, Mode::X)
    }
}

macro_rules! queue_lock {
    ($(#[$attr:meta])* $lock:ident, $versions:ty) => {
        $(#[$attr])*
        pub struct $lock {
            raw: RawQueueLock<$versions>,
        }

        impl $lock {
            /// Creates an unlocked lock drawing its queue nodes from the global pool.
            #[inline]
            pub fn new() -> Self {
                $lock::with_pool(queue_node::global())
            }

            /// Creates an unlocked lock drawing its queue nodes from `pool`.
            #[inline]
            pub fn with_pool(pool: &'static QueueNodePool) -> Self {
                $lock {
                    raw: RawQueueLock::with_pool(pool),
                }
            }
        }

        impl Default for $lock {
            #[inline]
            fn default() -> Self {
                $lock::new()
            }
        }

        impl Debug for $lock {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                f.debug_tuple(stringify!($lock)).field(&self.raw).finish()
            }
        }

        unsafe impl RawModeLock for $lock {
            type Token = Option<NodeId>;

            #[inline]
            fn raw_lock_s(&self) -> Option<NodeId> {
                self.raw.lock_s()
            }

            #[inline]
            fn raw_lock_six(&self) -> Option<NodeId> {
                self.raw.lock_six()
            }

            #[inline]
            fn raw_lock_x(&self) -> Option<NodeId> {
                self.raw.lock_x()
            }

            #[inline]
            unsafe fn raw_unlock_s(&self, _: Option<NodeId>) {
                self.raw.unlock_s()
            }

            #[inline]
            unsafe fn raw_unlock_six(&self, _: Option<NodeId>) {
                self.raw.unlock_six()
            }

            #[inline]
            unsafe fn raw_unlock_x(&self, head: Option<NodeId>, version: u64) {
                self.raw.unlock_x(head, version)
            }

            #[inline]
            unsafe fn raw_upgrade(&self, _: Option<NodeId>) -> Option<NodeId> {
                self.raw.upgrade()
            }

            #[inline]
            unsafe fn raw_downgrade(&self, head: Option<NodeId>, version: u64) -> Option<NodeId> {
                self.raw.downgrade(head, version)
            }

            #[inline]
            fn raw_version(&self) -> u64 {
                self.raw.version()
            }

            #[inline]
            fn next_version(version: u64) -> u64 {
                version.wrapping_add(1) & <$versions as VersionStore>::MASK
            }
        }

        mode_lock_api!($lock);
    };
}

macro_rules! optimistic_queue_lock {
    ($lock:ident, $versions:ty) => {
        unsafe impl RawOptimisticLock for $lock {
            const VERSION_MASK: u64 = <$versions as VersionStore>::MASK;

            #[inline]
            fn raw_load_version(&self) -> Option<u64> {
                self.raw.load_version()
            }

            #[inline]
            fn raw_stable_version(&self) -> u64 {
                self.raw.stable_version()
            }

            #[inline]
            fn raw_try_lock_s_at(&self, version: u64) -> Option<Option<NodeId>> {
                self.raw.try_lock_s_at(version)
            }

            #[inline]
            fn raw_try_lock_six_at(&self, version: u64) -> Option<Option<NodeId>> {
                self.raw.try_lock_six_at(version)
            }

            #[inline]
            fn raw_try_lock_x_at(&self, version: u64) -> Option<Option<NodeId>> {
                self.raw.try_lock_x_at(version)
            }
        }

        optimistic_lock_api!($lock);
    };
}

queue_lock! {
    /// A FIFO S/SIX/X queue lock without a version.
    McsLock, NoVersion
}

queue_lock! {
    /// A FIFO S/SIX/X queue lock with optimistic reads and a 63 bit version kept beside the lock
    /// word.
    OptMcsLock, SplitVersion
}

optimistic_queue_lock!(OptMcsLock, SplitVersion);

queue_lock! {
    /// A FIFO S/SIX/X queue lock with optimistic reads, packed into a single 64 bit word. The
    /// version is 31 bits wide and wraps.
    CompactQueueLock, InlineVersion
}

optimistic_queue_lock!(CompactQueueLock, InlineVersion);

#[cfg(test)]
mod test {
    use super::*;
    use crate::guard::{SixGuard, XGuard};
    use crossbeam_utils::thread;
    use parking_lot::Mutex;
    use std::{
        sync::atomic::{AtomicBool, Ordering::SeqCst},
        time::Duration,
    };

    trait Probe: RawModeLock + Sync {
        fn probe(&self) -> QueueState;
    }

    macro_rules! probe {
        ($($lock:ident),*) => {$(
            impl Probe for $lock {
                fn probe(&self) -> QueueState {
                    self.raw.load(SeqCst)
                }
            }
        )*};
    }

    probe!(McsLock, OptMcsLock, CompactQueueLock);

    fn lock_x<L: RawModeLock>(lock: &L) -> XGuard<'_, L> {
        unsafe { XGuard::from_raw(lock, lock.raw_lock_x()) }
    }

    fn lock_six<L: RawModeLock>(lock: &L) -> SixGuard<'_, L> {
        unsafe { SixGuard::from_raw(lock, lock.raw_lock_six()) }
    }

    fn wait_for(mut done: impl FnMut() -> bool) {
        while !done() {
            std::thread::yield_now()
        }
    }

    fn grants_in_queue_order<L: Probe>(lock: &L) {
        const WAITERS: usize = 8;
        let order = Mutex::new(Vec::new());
        let head = lock_x(lock);
        thread::scope(|s| {
            for i in 0..WAITERS {
                let before = lock.probe().tail;
                let order = &order;
                s.spawn(move |_| {
                    let _x = lock_x(lock);
                    order.lock().push(i);
                });
                // waiter `i` swapped itself in as the tail
                wait_for(|| lock.probe().tail != before);
            }
            drop(head);
        })
        .unwrap();
        assert_eq!(*order.lock(), (0..WAITERS).collect::<Vec<_>>());
        assert_eq!(lock.probe().tail, None);
    }

    #[test]
    fn fifo_mcs() {
        grants_in_queue_order(&McsLock::new())
    }

    #[test]
    fn fifo_opt_mcs() {
        grants_in_queue_order(&OptMcsLock::new())
    }

    #[test]
    fn fifo_compact() {
        grants_in_queue_order(&CompactQueueLock::new())
    }

    fn six_admits_readers<L: Probe>(lock: &L)
    where
        L::Token: Send,
    {
        let six = lock_six(lock);
        // SIX passed the head on
        assert_eq!(lock.probe().tail, None);
        let token = lock.raw_lock_s();
        assert_eq!(lock.probe().shared, 1);
        unsafe { lock.raw_unlock_s(token) };

        let upgraded = AtomicBool::new(false);
        let reader = lock.raw_lock_s();
        thread::scope(|s| {
            s.spawn(|_| {
                let x = six.upgrade();
                upgraded.store(true, SeqCst);
                drop(x);
            });
            std::thread::sleep(Duration::from_millis(20));
            assert!(!upgraded.load(SeqCst));
            unsafe { lock.raw_unlock_s(reader) };
        })
        .unwrap();
        assert!(upgraded.load(SeqCst));
        let end = lock.probe();
        assert_eq!(end.tail, None);
        assert_eq!(end.shared, 0);
        assert!(!end.six && !end.exclusive);
    }

    #[test]
    fn six_admits_readers_all() {
        six_admits_readers(&McsLock::new());
        six_admits_readers(&OptMcsLock::new());
        six_admits_readers(&CompactQueueLock::new());
    }

    #[test]
    fn writer_blocks_queue_until_downgrade() {
        let lock = CompactQueueLock::new();
        let x = lock.lock_x();
        let writer = lock.raw.load(SeqCst).tail;
        let entered = AtomicBool::new(false);
        thread::scope(|s| {
            s.spawn(|_| {
                let _s = lock.lock_s();
                entered.store(true, SeqCst);
            });
            wait_for(|| lock.raw.load(SeqCst).tail != writer);
            std::thread::sleep(Duration::from_millis(20));
            assert!(!entered.load(SeqCst));
            let six = x.downgrade();
            wait_for(|| entered.load(SeqCst));
            assert_eq!(six.version(), 1);
        })
        .unwrap();
    }

    #[test]
    fn opportunistic_read_bit() {
        let lock = CompactQueueLock::new();
        assert!(lock.raw.load(SeqCst).opread);
        let x = lock.lock_x();
        assert!(!lock.raw.load(SeqCst).opread);
        assert_eq!(lock.raw.load_version(), None);
        drop(x);
        assert!(lock.raw.load(SeqCst).opread);

        // SIX clears the bit when it queues and sets it again once the queue is empty
        let six = lock.lock_six();
        assert!(lock.raw.load(SeqCst).opread);
        assert_eq!(lock.get_version().version(), 1);
        drop(six);

        // a plain reader leaves the bit alone
        let s = lock.lock_s();
        assert!(lock.raw.load(SeqCst).opread);
        drop(s);
    }

    #[test]
    fn get_version_waits_for_writer() {
        let lock = OptMcsLock::new();
        let mut x = lock.lock_x();
        x.set_version(41);
        let seen = thread::scope(|s| {
            let reader = s.spawn(|_| lock.get_version().version());
            std::thread::sleep(Duration::from_millis(20));
            drop(x);
            reader.join().unwrap()
        })
        .unwrap();
        assert_eq!(seen, 41);
    }

    #[test]
    fn verification_sees_writers() {
        let lock = OptMcsLock::new();
        let mut snapshot = lock.get_version();
        assert!(snapshot.immediate_verify(!0));
        let x = lock.lock_x();
        assert!(!snapshot.immediate_verify(!0));
        drop(x);
        assert!(!snapshot.verify_version(!0, 4));
        assert!(snapshot.verify_version(!0, 4));
        assert_eq!(snapshot.version(), 1);
    }

    #[test]
    fn compact_version_wraps() {
        let lock = CompactQueueLock::new();
        let mut x = lock.lock_x();
        x.set_version(CompactQueueLock::VERSION_MASK);
        drop(x);
        assert_eq!(
            lock.get_version().version(),
            CompactQueueLock::VERSION_MASK
        );
        let x = lock.lock_x();
        assert_eq!(x.new_version(), 0);
        drop(x);
        assert_eq!(lock.get_version().version(), 0);
        // the flags survive the wrap
        assert!(lock.raw.load(SeqCst).opread);
        assert!(!lock.raw.load(SeqCst).exclusive);
    }

    #[test]
    fn conditional_acquire() {
        let lock = CompactQueueLock::new();
        let version = lock.get_version().version();
        assert!(lock.try_lock_six_at(version).is_some());
        let x = lock.try_lock_x_at(version).unwrap();
        assert!(lock.try_lock_s_at(version).is_none());
        drop(x);
        assert!(lock.try_lock_s_at(version).is_none());
        assert!(lock.try_lock_x_at(version + 1).is_some());
        assert_eq!(lock.get_version().version(), version + 2);
        assert!(lock.try_lock_six_at(version + 1).is_none());
    }

    #[test]
    fn mcs_has_no_version() {
        let lock = McsLock::new();
        let x = lock.lock_x();
        assert_eq!(x.new_version(), 0);
        drop(x);
        assert_eq!(lock.lock_s().version(), 0);
    }

    #[test]
    fn private_pool() {
        let pool: &'static QueueNodePool = Box::leak(Box::new(QueueNodePool::new(2).unwrap()));
        let lock = McsLock::with_pool(pool);
        let x = lock.lock_x();
        assert_eq!(pool.available(), 1);
        drop(x);
        assert_eq!(pool.available(), 2);
        let _s = lock.lock_s();
        assert_eq!(pool.available(), 2);
    }
}
