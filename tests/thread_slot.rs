mod thread_slot {
    use crossbeam_utils::thread;
    use lockwood::{config, thread_slot, Config};
    use std::{collections::HashSet, sync::Barrier};

    const MAX_THREADS: usize = 32;

    #[test]
    fn ids_cover_range_and_are_reused() {
        Config::default()
            .with_max_threads(MAX_THREADS)
            .with_max_queue_nodes(MAX_THREADS * 4)
            .install()
            .unwrap();
        assert_eq!(config::global().max_threads, MAX_THREADS);

        // the test harness thread holds no slot; each batch fills the allocator exactly
        for _batch in 0..2 {
            let barrier = Barrier::new(MAX_THREADS);
            let ids = thread::scope(|s| {
                let handles: Vec<_> = (0..MAX_THREADS)
                    .map(|_| {
                        let barrier = &barrier;
                        s.spawn(move |_| {
                            let id = thread_slot::thread_id();
                            barrier.wait();
                            id
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|h| h.join().unwrap())
                    .collect::<HashSet<_>>()
            })
            .unwrap();
            assert_eq!(ids, (0..MAX_THREADS).collect::<HashSet<_>>());
            assert_eq!(thread_slot::global().reserved(), 0);
        }

        // one more than the capacity can't all be served at once
        let barrier = Barrier::new(MAX_THREADS + 1);
        let failures = thread::scope(|s| {
            let handles: Vec<_> = (0..=MAX_THREADS)
                .map(|i| {
                    let barrier = &barrier;
                    s.spawn(move |_| {
                        if i == MAX_THREADS {
                            // wait until every other thread holds its slot
                            while thread_slot::global().reserved() < MAX_THREADS {
                                std::thread::yield_now();
                            }
                            let failed = thread_slot::try_current().is_err();
                            barrier.wait();
                            failed
                        } else {
                            let _id = thread_slot::thread_id();
                            barrier.wait();
                            false
                        }
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|failed| *failed)
                .count()
        })
        .unwrap();
        assert_eq!(failures, 1);
    }
}
