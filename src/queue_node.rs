//! Queue nodes for the queue locks.
//!
//! Waiters of a queue lock form a singly linked list through [`QueueNode`]s. Nodes live in a fixed
//! arena, the [`QueueNodePool`], and link to each other by [`NodeId`] rather than by pointer, so a
//! lock word only needs room for a small integer to name its tail.
//!
//! A node is owned by one thread for the duration of one acquisition. Two fields of it are written
//! by other threads:
//!
//! - `next`, written once by the successor after it swapped itself in as the tail.
//! - `granted`, written once by the predecessor when it hands the queue over.
//!
//! The global pool keeps a small per-thread cache of ids so most acquisitions never touch the
//! shared bitmap.

use crate::{
    config::{self, ConfigError, MAX_QUEUE_NODES_LIMIT},
    internal::backoff::Backoff,
    thread_slot::{self, ThreadSlot},
};
use crossbeam_utils::CachePadded;
use lazy_static::lazy_static;
use std::{
    cell::RefCell,
    fmt::{self, Debug, Formatter},
    sync::atomic::{
        AtomicBool, AtomicU32, AtomicU64,
        Ordering::{AcqRel, Acquire, Relaxed, Release},
    },
};

const BITS: usize = 64;

/// Upper bound on the number of ids a thread keeps cached.
const CACHE_MAX: usize = 8;

/// Index of a node inside its pool.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    #[inline]
    pub const fn new(id: u32) -> Self {
        NodeId(id)
    }

    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }

    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// One waiter of a queue lock.
#[derive(Debug, Default)]
pub struct QueueNode {
    /// Successor id plus one, zero while no successor linked itself.
    next:    AtomicU32,
    granted: AtomicBool,
}

impl QueueNode {
    /// Prepares the node for a new acquisition. Only called by the owning thread before the node
    /// is published as a tail.
    #[inline]
    pub fn reset(&self) {
        self.next.store(0, Relaxed);
        self.granted.store(false, Relaxed);
    }

    /// The successor, if one linked itself.
    #[inline]
    pub fn next(&self) -> Option<NodeId> {
        match self.next.load(Acquire) {
            0 => None,
            n => Some(NodeId(n - 1)),
        }
    }

    /// Links `successor` behind this node. Called by the successor.
    #[inline]
    pub fn set_next(&self, successor: NodeId) {
        debug_assert!(self.next.load(Relaxed) == 0, "queue node linked twice");
        self.next.store(successor.0 + 1, Release)
    }

    /// True once the predecessor handed the queue to this node.
    #[inline]
    pub fn is_granted(&self) -> bool {
        self.granted.load(Acquire)
    }

    /// Hands the queue to this node. Called by the predecessor; after this call the predecessor
    /// must not touch this node again.
    #[inline]
    pub fn grant(&self) {
        self.granted.store(true, Release)
    }
}

/// A fixed size arena of queue nodes with a bitmap allocator.
pub struct QueueNodePool {
    nodes:       Box<[CachePadded<QueueNode>]>,
    words:       Box<[AtomicU64]>,
    cache_limit: usize,
}

impl Debug for QueueNodePool {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueNodePool")
            .field("capacity", &self.capacity())
            .field("available", &self.available())
            .finish()
    }
}

impl QueueNodePool {
    fn build(capacity: usize, cache_limit: usize) -> Self {
        let nodes = (0..capacity)
            .map(|_| CachePadded::new(QueueNode::default()))
            .collect();
        let words = (0..(capacity + BITS - 1) / BITS)
            .map(|_| AtomicU64::new(0))
            .collect();
        QueueNodePool {
            nodes,
            words,
            cache_limit,
        }
    }

    /// Creates an uncached pool of `capacity` nodes.
    ///
    /// # Errors
    ///
    /// Fails unless `capacity` is in `1..=MAX_QUEUE_NODES_LIMIT`.
    pub fn new(capacity: usize) -> Result<Self, ConfigError> {
        if capacity == 0 || capacity > MAX_QUEUE_NODES_LIMIT {
            return Err(ConfigError::OutOfRange {
                key:   "max_queue_nodes",
                value: capacity as u64,
                min:   1,
                max:   MAX_QUEUE_NODES_LIMIT as u64,
            });
        }
        Ok(QueueNodePool::build(capacity, 0))
    }

    /// Creates a pool that must serve `threads` threads, each waiting on one lock at a time.
    ///
    /// # Errors
    ///
    /// Fails with [`ConfigError::PoolTooSmall`] if `capacity < threads`.
    pub fn for_threads(capacity: usize, threads: usize) -> Result<Self, ConfigError> {
        if capacity < threads {
            return Err(ConfigError::PoolTooSmall {
                nodes: capacity,
                threads,
            });
        }
        QueueNodePool::new(capacity)
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.nodes.len()
    }

    /// Number of ids free in the bitmap. Ids cached by threads count as taken.
    pub fn available(&self) -> usize {
        self.capacity()
            - self
                .words
                .iter()
                .map(|w| w.load(Relaxed).count_ones() as usize)
                .sum::<usize>()
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> &QueueNode {
        &self.nodes[id.index()]
    }

    #[inline]
    fn is_global(&self) -> bool {
        self.cache_limit > 0
    }

    fn reserve(&self, hint: usize) -> Option<NodeId> {
        let capacity = self.capacity();
        let start = hint % capacity;
        for offset in 0..capacity {
            let id = (start + offset) % capacity;
            let word = &self.words[id / BITS];
            let bit = 1 << (id % BITS);
            if word.load(Relaxed) & bit == 0 && word.fetch_or(bit, AcqRel) & bit == 0 {
                return Some(NodeId(id as u32));
            }
        }
        None
    }

    fn unreserve(&self, id: NodeId) {
        let bit = 1 << (id.index() % BITS);
        let _prev = self.words[id.index() / BITS].fetch_and(!bit, Release);
        debug_assert!(_prev & bit != 0, "double free of queue node {}", id.0);
    }

    /// Takes a node id without waiting, preferring this thread's cache.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread can't get a thread slot.
    pub fn try_acquire(&self) -> Option<NodeId> {
        let from_cache = LOCAL.try_with(|local| {
            let mut local = local.borrow_mut();
            let hint = local.hint();
            if self.is_global() {
                if let Some(id) = local.ids.pop() {
                    return Some(id);
                }
            }
            self.reserve(hint)
        });
        let id = match from_cache {
            Ok(id) => id,
            Err(_) => self.reserve(0),
        };
        if let Some(id) = id {
            self.node(id).reset();
        }
        id
    }

    /// Takes a node id, waiting for one to be released if the pool is exhausted.
    #[inline]
    pub fn acquire(&self) -> NodeId {
        match self.try_acquire() {
            Some(id) => id,
            None => self.acquire_slow(),
        }
    }

    #[inline(never)]
    #[cold]
    fn acquire_slow(&self) -> NodeId {
        tracing::warn!(
            capacity = self.capacity(),
            "queue node pool exhausted, waiting for a node"
        );
        let mut backoff = Backoff::new();
        loop {
            backoff.snooze();
            if let Some(id) = self.try_acquire() {
                return id;
            }
        }
    }

    /// Returns `id` to the pool. No other thread may still reference the node.
    pub fn release(&self, id: NodeId) {
        debug_assert!(id.index() < self.capacity(), "queue node id out of range");
        if self.is_global() {
            let cached = LOCAL.try_with(|local| {
                let mut local = local.borrow_mut();
                if local.slot.is_some() && local.ids.len() < self.cache_limit {
                    local.ids.push(id);
                    true
                } else {
                    false
                }
            });
            if let Ok(true) = cached {
                return;
            }
        }
        self.unreserve(id)
    }
}

/// The per-thread node cache of the global pool.
///
/// Only a thread holding a slot may cache ids, and the cache keeps that slot leased, so at most
/// `max_threads` caches of `cache_limit` ids exist at once.
struct LocalNodes {
    ids:  Vec<NodeId>,
    slot: Option<ThreadSlot>,
}

impl LocalNodes {
    #[inline]
    fn hint(&mut self) -> usize {
        self.slot.get_or_insert_with(thread_slot::current).id() * CACHE_MAX
    }
}

impl Drop for LocalNodes {
    fn drop(&mut self) {
        for id in self.ids.drain(..) {
            global().unreserve(id)
        }
    }
}

thread_local! {
    static LOCAL: RefCell<LocalNodes> = RefCell::new(LocalNodes {
        ids:  Vec::new(),
        slot: None,
    });
}

lazy_static! {
    static ref GLOBAL: QueueNodePool = {
        let config = config::global();
        // caches alone can never drain the pool
        let cache_limit = (config.max_queue_nodes / config.max_threads).max(1).min(CACHE_MAX);
        QueueNodePool::build(config.max_queue_nodes, cache_limit)
    };
}

/// The pool used by queue locks that were not given one, sized by
/// [`Config::max_queue_nodes`](crate::config::Config).
#[inline]
pub fn global() -> &'static QueueNodePool {
    &GLOBAL
}
