//! Locks and epochs for concurrent index structures.
//!
//! `lockwood` supplies the synchronization a B-tree or hash table needs for fine grained per-node
//! locking with lock-free optimistic reads, and the epoch tracking needed to free nodes that such
//! readers may still be looking at.
//!
//! # Examples
//!
//! Reading optimistically, falling back to a shared lock if writers keep getting in the way:
//! ```
//! use lockwood::OptimisticLock;
//! use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
//!
//! static LOCK: OptimisticLock = OptimisticLock::new();
//! static VALUE: AtomicU64 = AtomicU64::new(0);
//!
//! {
//!     let _x = LOCK.lock_x();
//!     VALUE.store(42, Relaxed);
//! }
//!
//! let mut read = LOCK.get_version();
//! let value = loop {
//!     let value = VALUE.load(Relaxed);
//!     if read.verify_version(!0, 8) {
//!         break value;
//!     }
//! };
//! assert_eq!(value, 42);
//! ```
//!
//! Queue locks grant the lock in arrival order:
//! ```
//! use lockwood::CompactQueueLock;
//!
//! let lock = CompactQueueLock::new();
//! let six = lock.lock_six();
//! let reader = lock.lock_s(); // S and SIX are compatible
//! drop(reader);
//! let x = six.upgrade();
//! assert_eq!(x.new_version(), 1);
//! ```
//!
//! # Features
//!
//! * Three lock modes everywhere: shared (S), shared with intent to go exclusive (SIX) and
//!   exclusive (X). Changing modes consumes the old guard.
//! * Single word spinning locks: [`PessimisticLock`], and [`OptimisticLock`] with versions.
//!   [`PessimisticRwLock`] wraps the former in a `lock_api` data lock.
//! * FIFO queue locks: [`McsLock`], [`OptMcsLock`] and [`CompactQueueLock`], drawing their queue
//!   nodes from a [`QueueNodePool`](queue_node::QueueNodePool).
//! * Epoch based reclamation support through [`EpochManager`].
//!
//! Every primitive is tuned by the process-wide [`Config`], which must be installed before the
//! first use if the defaults (and `LOCKWOOD_*` environment overrides) don't fit.
//!
//! None of the locks are reentrant.

#![warn(macro_use_extern_crate)]
#![warn(missing_debug_implementations)]
#![warn(unused_lifetimes)]
#![cfg_attr(not(test), warn(unused_results))]
#![deny(rust_2018_compatibility)]
#![deny(rust_2018_idioms)]
#![deny(unused_must_use)]

#[macro_use]
mod internal;

pub mod config;
pub mod serial;
pub mod thread_slot;

pub mod queue_node;

#[macro_use]
pub mod guard;

pub mod epoch;
pub mod lock;
pub mod queue_lock;

pub use config::{Config, ConfigError};
pub use epoch::{Epoch, EpochError, EpochGuard, EpochManager};
pub use guard::{OptGuard, SGuard, SixGuard, XGuard};
pub use lock::{OptimisticLock, PessimisticLock, PessimisticRwLock};
pub use queue_lock::{CompactQueueLock, McsLock, OptMcsLock};
pub use serial::Serial;
