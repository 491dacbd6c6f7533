//! Epoch based reclamation support.
//!
//! The [`EpochManager`] owns a global epoch counter and one [`Epoch`] record per thread slot. A
//! background thread advances the counter on a fixed interval and publishes the minimum epoch any
//! thread is still protecting.
//!
//! - A reader pins the current epoch with an [`EpochGuard`] before it dereferences anything that a
//!   concurrent writer might unlink.
//! - A writer that unlinks an object while the global epoch is `e` may free it once
//!   [`EpochManager::min_epoch`] is greater than `e`. Tracking retired objects is up to the caller.
//!
//! ```
//! use lockwood::{config, EpochManager};
//! use std::time::Duration;
//!
//! let config = config::global()
//!     .clone()
//!     .with_epoch_interval(Duration::from_secs(60));
//! let manager = EpochManager::new(&config).unwrap();
//! let retired_at = manager.current_epoch();
//! {
//!     let guard = manager.create_epoch_guard();
//!     manager.advance_now();
//!     // the guard still protects `retired_at`
//!     assert!(guard.epoch() >= retired_at);
//!     assert!(!manager.is_safe_to_reclaim(retired_at));
//! }
//! manager.advance_now();
//! manager.advance_now();
//! assert!(manager.is_safe_to_reclaim(retired_at));
//! ```

use crate::{
    config::{Config, ConfigError},
    serial::Serial,
    thread_slot::{self, HeartBeat, ThreadSlot},
};
use crossbeam_utils::CachePadded;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::{
    fmt::{self, Debug, Formatter},
    io,
    sync::{
        atomic::{
            AtomicU32, AtomicU64, AtomicUsize,
            Ordering::{Acquire, Relaxed, Release, SeqCst},
        },
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

/// An `Epoch` holds this value while its thread protects nothing. It is conveniently greater than
/// every epoch the clock hands out.
const INACTIVE_EPOCH: u64 = !0;

/// The first value of the global epoch.
const FIRST: Serial = Serial::ZERO.next();

/// Errors returned when starting an [`EpochManager`].
#[derive(Debug, thiserror::Error)]
pub enum EpochError {
    /// The configuration can't serve the thread slot allocator.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The background thread could not be started.
    #[error("failed to spawn the epoch advancer: {0}")]
    Spawn(#[from] io::Error),
}

/// The global epoch counter. Only ever moved by the advancer.
#[derive(Debug)]
pub struct EpochClock(CachePadded<AtomicU64>);

impl EpochClock {
    fn new() -> Self {
        EpochClock(CachePadded::new(AtomicU64::new(FIRST.get())))
    }

    /// Returns the current epoch.
    #[inline]
    pub fn now(&self) -> Serial {
        Serial::new(self.0.load(SeqCst))
    }

    #[inline]
    fn set(&self, epoch: Serial) {
        self.0.store(epoch.get(), SeqCst)
    }
}

/// The protection record of one thread slot.
///
/// Only the thread that owns the slot enters and leaves; the advancer reads the record and clears
/// it if the owner died without leaving.
pub struct Epoch {
    entered: AtomicU64,
    depth:   AtomicU32,
    /// `HeartBeat::lease_key` of `owner`, readable without the mutex.
    bound:   AtomicUsize,
    owner:   Mutex<Option<HeartBeat>>,
}

impl Debug for Epoch {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Epoch")
            .field("entered", &self.entered())
            .field("depth", &self.depth.load(Relaxed))
            .finish()
    }
}

impl Epoch {
    fn new() -> Self {
        Epoch {
            entered: AtomicU64::new(INACTIVE_EPOCH),
            depth:   AtomicU32::new(0),
            bound:   AtomicUsize::new(0),
            owner:   Mutex::new(None),
        }
    }

    /// The protected epoch, or `None` if the record is not entered.
    #[inline]
    pub fn entered(&self) -> Option<Serial> {
        match self.entered.load(Acquire) {
            INACTIVE_EPOCH => None,
            e => Some(Serial::new(e)),
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.entered().is_some()
    }

    #[inline(never)]
    #[cold]
    fn bind(&self, owner: &HeartBeat) {
        let mut bound = self.owner.lock();
        // a previous owner that died inside an epoch left its nesting behind
        self.depth.store(0, Relaxed);
        self.entered.store(INACTIVE_EPOCH, Relaxed);
        self.bound.store(owner.lease_key(), Relaxed);
        *bound = Some(owner.clone());
    }

    /// Protects the current epoch of `clock` on behalf of `owner` and returns it. Nested calls
    /// keep protecting the epoch of the outermost call.
    ///
    /// Only the thread holding the slot lease `owner` observes may call this.
    pub fn enter_epoch(&self, clock: &EpochClock, owner: &HeartBeat) -> Serial {
        if unlikely!(self.bound.load(Relaxed) != owner.lease_key()) {
            self.bind(owner)
        }
        let depth = self.depth.load(Relaxed);
        self.depth.store(depth + 1, Relaxed);
        if depth > 0 {
            return Serial::new(self.entered.load(Relaxed));
        }
        loop {
            let epoch = clock.now();
            self.entered.store(epoch.get(), SeqCst);
            // if the clock moved, an advance might have scanned this record before the store and
            // published a minimum above `epoch`
            if likely!(clock.now() == epoch) {
                return epoch;
            }
        }
    }

    /// Undoes one `enter_epoch`. The outermost call stops protecting anything.
    pub fn leave_epoch(&self) {
        let depth = self.depth.load(Relaxed);
        debug_assert!(depth > 0, "attempt to leave an epoch that was never entered");
        self.depth.store(depth - 1, Relaxed);
        if depth == 1 {
            self.entered.store(INACTIVE_EPOCH, Release)
        }
    }

    /// The epoch this record protects as seen by the advancer. A record whose owner is gone is
    /// cleared instead.
    fn protected(&self, slot: usize) -> Option<Serial> {
        // binding takes the same lock, so a new owner can't enter between the check and the clear
        let owner = self.owner.lock();
        let entered = self.entered.load(SeqCst);
        if entered == INACTIVE_EPOCH {
            return None;
        }
        match &*owner {
            Some(beat) if !beat.is_alive() => {
                tracing::warn!(
                    slot,
                    epoch = entered,
                    "clearing epoch protection left behind by an exited thread"
                );
                self.entered.store(INACTIVE_EPOCH, SeqCst);
                None
            }
            _ => Some(Serial::new(entered)),
        }
    }
}

/// Protects the epoch that was current when the guard was created.
///
/// Holding a guard keeps the calling thread's slot leased. Guards can't leave their thread.
#[must_use = "if unused the epoch is left immediately"]
pub struct EpochGuard<'a> {
    record: &'a Epoch,
    epoch:  Serial,
    _slot:  ThreadSlot,
}

impl Debug for EpochGuard<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("EpochGuard")
            .field("epoch", &self.epoch)
            .finish()
    }
}

impl EpochGuard<'_> {
    /// The protected epoch.
    #[inline]
    pub fn epoch(&self) -> Serial {
        self.epoch
    }
}

impl Drop for EpochGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        self.record.leave_epoch()
    }
}

type Advancer = Box<dyn Fn(Serial) -> Serial + Send + Sync>;

struct Shared {
    clock:    EpochClock,
    min:      CachePadded<AtomicU64>,
    records:  Box<[CachePadded<Epoch>]>,
    advancer: Advancer,
    /// Serializes advances, keeping a single writer of `clock` and `min`.
    step:     Mutex<()>,
}

impl Shared {
    fn advance(&self) -> Serial {
        let _step = self.step.lock();
        let current = self.clock.now();
        let min = self
            .records
            .iter()
            .enumerate()
            .filter_map(|(slot, record)| record.protected(slot))
            .min()
            .unwrap_or_else(|| current.sub(1));
        let next = (self.advancer)(current);
        debug_assert!(next > current, "epoch advancer moved the clock backwards");
        self.clock.set(next);
        if min > Serial::new(self.min.load(Relaxed)) {
            self.min.store(min.get(), Release);
        }
        tracing::trace!(epoch = %next, min = %min, "advanced epoch");
        next
    }
}

struct Stop {
    stopped: Mutex<bool>,
    wake:    Condvar,
}

/// Owns the global epoch, the per-thread records and the background advancer.
pub struct EpochManager {
    shared: Arc<Shared>,
    stop:   Arc<Stop>,
    thread: Option<JoinHandle<()>>,
}

impl Debug for EpochManager {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("EpochManager")
            .field("current_epoch", &self.current_epoch())
            .field("min_epoch", &self.min_epoch())
            .field("threads", &self.shared.records.len())
            .finish()
    }
}

impl EpochManager {
    /// Starts a manager that advances the epoch by one every `config.epoch_interval`.
    ///
    /// # Errors
    ///
    /// Fails if `config.max_threads` is below the capacity of the global thread slot allocator,
    /// or if the background thread can't be spawned.
    pub fn new(config: &Config) -> Result<Self, EpochError> {
        EpochManager::with_advancer(config, Serial::next)
    }

    /// Like [`new`](EpochManager::new), but the background thread moves the epoch with
    /// `advancer`, which must return a value after its argument.
    pub fn with_advancer<F>(config: &Config, advancer: F) -> Result<Self, EpochError>
    where
        F: Fn(Serial) -> Serial + Send + Sync + 'static,
    {
        config.validate()?;
        let allocator = thread_slot::global().capacity();
        if config.max_threads < allocator {
            return Err(ConfigError::ThreadCapacity {
                manager: config.max_threads,
                allocator,
            }
            .into());
        }
        let shared = Arc::new(Shared {
            clock:    EpochClock::new(),
            min:      CachePadded::new(AtomicU64::new(Serial::ZERO.get())),
            records:  (0..config.max_threads)
                .map(|_| CachePadded::new(Epoch::new()))
                .collect(),
            advancer: Box::new(advancer),
            step:     Mutex::new(()),
        });
        let stop = Arc::new(Stop {
            stopped: Mutex::new(false),
            wake:    Condvar::new(),
        });
        let thread = spawn_advancer(
            Arc::clone(&shared),
            Arc::clone(&stop),
            config.epoch_interval,
        )?;
        Ok(EpochManager {
            shared,
            stop,
            thread: Some(thread),
        })
    }

    /// The global epoch.
    #[inline]
    pub fn current_epoch(&self) -> Serial {
        self.shared.clock.now()
    }

    /// The smallest epoch that may still be protected. Never decreases.
    #[inline]
    pub fn min_epoch(&self) -> Serial {
        Serial::new(self.shared.min.load(Acquire))
    }

    /// True if an object retired while the global epoch was `retired_at` may be freed.
    #[inline]
    pub fn is_safe_to_reclaim(&self, retired_at: Serial) -> bool {
        self.min_epoch() > retired_at
    }

    /// The global epoch counter.
    #[inline]
    pub fn clock(&self) -> &EpochClock {
        &self.shared.clock
    }

    /// The record of thread slot `slot`.
    #[inline]
    pub fn epoch(&self, slot: usize) -> Option<&Epoch> {
        self.shared.records.get(slot).map(|record| &**record)
    }

    /// Runs one advance on the calling thread and returns the new epoch.
    #[inline]
    pub fn advance_now(&self) -> Serial {
        self.shared.advance()
    }

    /// Protects the current epoch until the returned guard is dropped.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread can't get a thread slot.
    #[inline]
    pub fn create_epoch_guard(&self) -> EpochGuard<'_> {
        let slot = thread_slot::current();
        let record = &*self.shared.records[slot.id()];
        let epoch = record.enter_epoch(&self.shared.clock, slot.heartbeat_ref());
        EpochGuard {
            record,
            epoch,
            _slot: slot,
        }
    }
}

fn spawn_advancer(
    shared: Arc<Shared>,
    stop: Arc<Stop>,
    interval: Duration,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("lockwood-epoch".to_owned())
        .spawn(move || {
            tracing::debug!(?interval, "epoch advancer started");
            let mut stopped = stop.stopped.lock();
            while !*stopped {
                let _ = stop.wake.wait_for(&mut stopped, interval);
                if !*stopped {
                    let _ = MutexGuard::unlocked(&mut stopped, || shared.advance());
                }
            }
            tracing::debug!(epoch = %shared.clock.now(), "epoch advancer stopped");
        })
}

impl Drop for EpochManager {
    fn drop(&mut self) {
        *self.stop.stopped.lock() = true;
        let _ = self.stop.wake.notify_all();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("epoch advancer panicked");
            }
        }
    }
}
