//! Small, stable integer ids for threads.
//!
//! Every thread that touches a primitive of this crate leases a slot id in `[0, max_threads)` from
//! the global [`SlotAllocator`]. The id indexes fixed size per-thread arrays (epoch records, the
//! queue node cache). The lease lives in thread local storage and is released when that storage is
//! torn down, after which the id may be handed to another thread.
//!
//! Long lived structures that want to know whether the thread owning a slot is still around hold a
//! [`HeartBeat`]. A heartbeat never keeps the thread's slot alive, it only observes it.

use crate::config;
use lazy_static::lazy_static;
use std::{
    cell::RefCell,
    fmt::{self, Debug, Formatter},
    rc::Rc,
    sync::{
        atomic::{
            AtomicBool, AtomicU64, AtomicUsize,
            Ordering::{AcqRel, Acquire, Relaxed, Release},
        },
        Arc,
    },
    thread,
};

const BITS: usize = 64;

/// Error returned when every slot is leased.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("all {capacity} thread slots are in use")]
pub struct SlotsExhausted {
    /// Capacity of the allocator that ran dry.
    pub capacity: usize,
}

/// A fixed capacity reservation bitmap for slot ids.
pub struct SlotAllocator {
    words:    Box<[AtomicU64]>,
    capacity: usize,
}

impl Debug for SlotAllocator {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotAllocator")
            .field("capacity", &self.capacity)
            .field("reserved", &self.reserved())
            .finish()
    }
}

impl SlotAllocator {
    /// Creates an allocator handing out ids in `[0, capacity)`.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "a `SlotAllocator` needs at least one slot");
        let words = (0..(capacity + BITS - 1) / BITS)
            .map(|_| AtomicU64::new(0))
            .collect();
        SlotAllocator { words, capacity }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of slots currently leased.
    pub fn reserved(&self) -> usize {
        self.words
            .iter()
            .map(|w| w.load(Relaxed).count_ones() as usize)
            .sum()
    }

    /// Reserves a free slot, linear probing from `hint % capacity`.
    pub fn reserve(&self, hint: usize) -> Result<usize, SlotsExhausted> {
        let start = hint % self.capacity;
        for offset in 0..self.capacity {
            let id = (start + offset) % self.capacity;
            let word = &self.words[id / BITS];
            let bit = 1 << (id % BITS);
            // read before the rmw to keep probing from bouncing cache lines
            if word.load(Relaxed) & bit == 0 && word.fetch_or(bit, AcqRel) & bit == 0 {
                return Ok(id);
            }
        }
        Err(SlotsExhausted {
            capacity: self.capacity,
        })
    }

    /// Returns `id` to the allocator. Everything the previous owner published before this call is
    /// visible to the next thread that reserves `id`.
    pub fn release(&self, id: usize) {
        debug_assert!(id < self.capacity, "slot id out of range");
        let bit = 1 << (id % BITS);
        let _prev = self.words[id / BITS].fetch_and(!bit, Release);
        debug_assert!(_prev & bit != 0, "double release of thread slot {}", id);
    }

    /// Leases a slot that is released when the returned value is dropped.
    pub fn lease(&self, hint: usize) -> Result<SlotLease<'_>, SlotsExhausted> {
        let id = self.reserve(hint)?;
        Ok(SlotLease {
            allocator: self,
            beat:      HeartBeat {
                alive: Arc::new(AtomicBool::new(true)),
                slot:  id,
            },
        })
    }
}

/// Ownership of one slot id.
pub struct SlotLease<'a> {
    allocator: &'a SlotAllocator,
    beat:      HeartBeat,
}

impl Debug for SlotLease<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotLease").field("id", &self.id()).finish()
    }
}

impl SlotLease<'_> {
    #[inline]
    pub fn id(&self) -> usize {
        self.beat.slot
    }

    /// A liveness token for this lease.
    #[inline]
    pub fn heartbeat(&self) -> HeartBeat {
        self.beat.clone()
    }

    /// Borrows the liveness token without cloning it.
    #[inline]
    pub fn heartbeat_ref(&self) -> &HeartBeat {
        &self.beat
    }
}

impl Drop for SlotLease<'_> {
    #[inline]
    fn drop(&mut self) {
        // must be observable before the id can be reserved again
        self.beat.alive.store(false, Release);
        self.allocator.release(self.id());
    }
}

/// Observes whether the owner of a slot lease is still alive.
#[derive(Clone)]
pub struct HeartBeat {
    alive: Arc<AtomicBool>,
    slot:  usize,
}

impl Debug for HeartBeat {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeartBeat")
            .field("slot", &self.slot)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl HeartBeat {
    /// Returns false once the lease this heartbeat was taken from has been released.
    #[inline]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Acquire)
    }

    /// The slot id of the observed lease.
    #[inline]
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Returns true if both heartbeats observe the same lease.
    #[inline]
    pub fn same_lease(&self, other: &HeartBeat) -> bool {
        Arc::ptr_eq(&self.alive, &other.alive)
    }

    /// Identifies the observed lease for as long as any heartbeat of it exists.
    #[inline]
    pub(crate) fn lease_key(&self) -> usize {
        Arc::as_ptr(&self.alive) as usize
    }
}

lazy_static! {
    static ref SLOTS: SlotAllocator = SlotAllocator::new(config::global().max_threads);
}

/// The process-wide allocator, sized by [`Config::max_threads`](crate::config::Config).
#[inline]
pub fn global() -> &'static SlotAllocator {
    &SLOTS
}

/// A handle to the calling thread's slot lease.
///
/// Handles are reference counted; the slot is released once the thread local handle and every
/// clone of it (for example one held by an `EpochGuard`) are gone. A `ThreadSlot` can't leave its
/// thread.
#[derive(Clone)]
pub struct ThreadSlot {
    lease: Rc<SlotLease<'static>>,
}

impl Debug for ThreadSlot {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadSlot").field("id", &self.id()).finish()
    }
}

impl ThreadSlot {
    #[inline(never)]
    #[cold]
    fn reserve(hint: usize) -> Result<Self, SlotsExhausted> {
        global().lease(hint).map(|lease| ThreadSlot {
            lease: Rc::new(lease),
        })
    }

    #[inline]
    pub fn id(&self) -> usize {
        self.lease.id()
    }

    #[inline]
    pub fn heartbeat(&self) -> HeartBeat {
        self.lease.heartbeat()
    }

    /// Borrows the liveness token without cloning it.
    #[inline]
    pub fn heartbeat_ref(&self) -> &HeartBeat {
        self.lease.heartbeat_ref()
    }
}

thread_local! {
    static CURRENT: RefCell<Option<ThreadSlot>> = RefCell::new(None);
}

#[inline(never)]
#[cold]
fn thread_hint() -> usize {
    fxhash::hash(&thread::current().id())
}

/// Hint used when thread local storage is already gone and `thread::current` may be too.
#[inline(never)]
#[cold]
fn teardown_hint() -> usize {
    static NEXT: AtomicUsize = AtomicUsize::new(0);
    NEXT.fetch_add(1, Relaxed)
}

/// Returns a handle to the calling thread's slot, leasing one on first use.
///
/// If the thread local storage of the calling thread has already been destroyed (the call comes
/// from another thread local's destructor), a temporary lease is returned which is released as
/// soon as the handle is dropped.
///
/// # Errors
///
/// Returns [`SlotsExhausted`] if every slot is leased by another thread.
pub fn try_current() -> Result<ThreadSlot, SlotsExhausted> {
    let local = CURRENT.try_with(|cell| {
        if let Some(slot) = &*cell.borrow() {
            return Ok(slot.clone());
        }
        let slot = ThreadSlot::reserve(thread_hint())?;
        *cell.borrow_mut() = Some(slot.clone());
        Ok(slot)
    });
    match local {
        Ok(result) => result,
        Err(_) => ThreadSlot::reserve(teardown_hint()),
    }
}

/// Returns a handle to the calling thread's slot.
///
/// # Panics
///
/// Panics if more than `max_threads` threads hold slots at once.
#[inline]
pub fn current() -> ThreadSlot {
    match try_current() {
        Ok(slot) => slot,
        Err(e) => panic!("{}; raise `Config::max_threads`", e),
    }
}

/// This thread's slot id.
#[inline]
pub fn thread_id() -> usize {
    current().id()
}

/// A liveness token for this thread's slot.
#[inline]
pub fn heartbeat() -> HeartBeat {
    current().heartbeat()
}
