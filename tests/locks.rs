mod locks {
    use crossbeam_utils::thread;
    use lockwood::{
        guard::{RawModeLock, RawOptimisticLock, SGuard, SixGuard, XGuard},
        CompactQueueLock, McsLock, OptGuard, OptMcsLock, OptimisticLock, PessimisticLock,
    };
    use rand::{thread_rng, Rng};
    use std::{
        cell::UnsafeCell,
        sync::atomic::{
            AtomicBool, AtomicU64, AtomicUsize,
            Ordering::{Relaxed, SeqCst},
        },
        time::Duration,
    };

    struct Counter(UnsafeCell<usize>);
    unsafe impl Sync for Counter {}

    fn lock_s<L: RawModeLock>(lock: &L) -> SGuard<'_, L> {
        unsafe { SGuard::from_raw(lock, lock.raw_lock_s()) }
    }

    fn lock_six<L: RawModeLock>(lock: &L) -> SixGuard<'_, L> {
        unsafe { SixGuard::from_raw(lock, lock.raw_lock_six()) }
    }

    fn lock_x<L: RawModeLock>(lock: &L) -> XGuard<'_, L> {
        unsafe { XGuard::from_raw(lock, lock.raw_lock_x()) }
    }

    /// A holds X while N threads queue up to increment a shared counter K times each.
    fn counter_is_exact<L: RawModeLock + Sync>(lock: L) {
        const THREAD_COUNT: usize = 8;
        const ITER_COUNT: usize = 1_000;
        let counter = Counter(UnsafeCell::new(0));

        let first = lock_x(&lock);
        thread::scope(|s| {
            for _ in 0..THREAD_COUNT {
                s.spawn(|_| {
                    for _ in 0..ITER_COUNT {
                        let _x = lock_x(&lock);
                        unsafe { *counter.0.get() += 1 };
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
    fn counter_pessimistic() {
        counter_is_exact(PessimisticLock::new())
    }

    #[test]
    fn counter_optimistic() {
        counter_is_exact(OptimisticLock::new())
    }

    #[test]
    fn counter_mcs() {
        counter_is_exact(McsLock::new())
    }

    #[test]
    fn counter_opt_mcs() {
        counter_is_exact(OptMcsLock::new())
    }

    #[test]
    fn counter_compact() {
        counter_is_exact(CompactQueueLock::new())
    }

    /// Every mode mix at once: holders count themselves in and check they are compatible.
    fn modes_are_exclusive<L: RawModeLock + Sync>(lock: L) {
        const THREAD_COUNT: usize = 6;
        const ITER_COUNT: usize = 500;
        let readers = AtomicUsize::new(0);
        let intents = AtomicUsize::new(0);
        let writers = AtomicUsize::new(0);

        thread::scope(|s| {
            for _ in 0..THREAD_COUNT {
                s.spawn(|_| {
                    let mut rng = thread_rng();
                    for _ in 0..ITER_COUNT {
                        match rng.gen_range(0..4) {
                            0 | 1 => {
                                let _s = lock_s(&lock);
                                readers.fetch_add(1, SeqCst);
                                assert_eq!(writers.load(SeqCst), 0);
                                readers.fetch_sub(1, SeqCst);
                            }
                            2 => {
                                let six = lock_six(&lock);
                                assert_eq!(intents.fetch_add(1, SeqCst), 0);
                                assert_eq!(writers.load(SeqCst), 0);
                                intents.fetch_sub(1, SeqCst);
                                if rng.gen() {
                                    let _x = six.upgrade();
                                    assert_eq!(writers.fetch_add(1, SeqCst), 0);
                                    assert_eq!(readers.load(SeqCst), 0);
                                    writers.fetch_sub(1, SeqCst);
                                }
                            }
                            _ => {
                                let x = lock_x(&lock);
                                assert_eq!(writers.fetch_add(1, SeqCst), 0);
                                assert_eq!(readers.load(SeqCst), 0);
                                assert_eq!(intents.load(SeqCst), 0);
                                writers.fetch_sub(1, SeqCst);
                                let _six = x.downgrade();
                                assert_eq!(intents.fetch_add(1, SeqCst), 0);
                                intents.fetch_sub(1, SeqCst);
                            }
                        }
                    }
                });
            }
        })
        .unwrap();
    }

    #[test]
    fn modes_pessimistic() {
        modes_are_exclusive(PessimisticLock::new())
    }

    #[test]
    fn modes_mcs() {
        modes_are_exclusive(McsLock::new())
    }

    #[test]
    fn modes_opt_mcs() {
        modes_are_exclusive(OptMcsLock::new())
    }

    #[test]
    fn modes_compact() {
        modes_are_exclusive(CompactQueueLock::new())
    }

    /// Writers keep two words equal; a verified optimistic read must never see them differ.
    fn optimistic_reads_are_consistent<L: RawOptimisticLock + Sync>(lock: L) {
        const READ_COUNT: usize = 20_000;
        let left = AtomicU64::new(0);
        let right = AtomicU64::new(0);
        let done = AtomicBool::new(false);
        let last_version = AtomicU64::new(0);

        thread::scope(|s| {
            s.spawn(|_| {
                while !done.load(Relaxed) {
                    let x = lock_x(&lock);
                    let next = left.load(Relaxed) + 1;
                    left.store(next, Relaxed);
                    right.store(next, Relaxed);
                    last_version.store(x.new_version(), Relaxed);
                }
            });
            for _ in 0..2 {
                s.spawn(|_| {
                    for _ in 0..READ_COUNT {
                        let mut read = OptGuard::new(&lock);
                        loop {
                            let l = left.load(Relaxed);
                            let r = right.load(Relaxed);
                            if read.verify_version(L::VERSION_MASK, 16) {
                                assert_eq!(l, r);
                                break;
                            }
                        }
                    }
                    done.store(true, Relaxed);
                });
            }
        })
        .unwrap();

        // versions moved once per write
        let version = OptGuard::new(&lock).version();
        assert_eq!(version, last_version.load(Relaxed));
        assert_eq!(version, left.load(Relaxed) & L::VERSION_MASK);
    }

    #[test]
    fn consistent_optimistic() {
        optimistic_reads_are_consistent(OptimisticLock::new())
    }

    #[test]
    fn consistent_opt_mcs() {
        optimistic_reads_are_consistent(OptMcsLock::new())
    }

    #[test]
    fn consistent_compact() {
        optimistic_reads_are_consistent(CompactQueueLock::new())
    }

    #[test]
    fn version_is_monotonic_under_contention() {
        let lock = CompactQueueLock::new();
        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|_| {
                    for _ in 0..500 {
                        let x = lock.lock_x();
                        assert_eq!(x.new_version(), x.version() + 1);
                    }
                });
            }
            s.spawn(|_| {
                let mut last = lock.get_version().version();
                for _ in 0..2_000 {
                    let now = lock.get_version().version();
                    assert!(now >= last);
                    last = now;
                }
            });
        })
        .unwrap();
        assert_eq!(lock.get_version().version(), 2_000);
    }
}
