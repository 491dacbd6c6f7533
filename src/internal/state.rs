//! Bit layouts of the lock state words.
//!
//! Every lock keeps its state in one `AtomicU64`. The layouts are private to the crate; the rest of
//! the code only ever looks at a word through [`LockState`] or [`QueueState`], which decode it into
//! named fields and encode it back.
//!
//! Single word locks (`PessimisticLock`, `OptimisticLock`):
//!
//! ```text
//!  63                               32 31 30 29                           0
//! +-----------------------------------+--+--+------------------------------+
//! |              version              |X |SIX|        shared count         |
//! +-----------------------------------+--+--+------------------------------+
//! ```
//!
//! Queue locks (`McsLock`, `OptMcsLock`, `CompactQueueLock`):
//!
//! ```text
//!  63                             33 32 31 30 29            16 15            0
//! +---------------------------------+--+--+--+----------------+--------------+
//! |             version             |OR|X |SIX|  shared count  |  tail + 1    |
//! +---------------------------------+--+--+--+----------------+--------------+
//! ```
//!
//! `OR` is the opportunistic read bit. A tail of zero means no thread is queued.

use crate::queue_node::NodeId;

const SHARED_BITS: u32 = 30;
const SHARED_MASK: u64 = (1 << SHARED_BITS) - 1;
const SIX_BIT: u64 = 1 << 30;
const X_BIT: u64 = 1 << 31;
const VERSION_SHIFT: u32 = 32;

/// Largest reader count a single word lock can hold.
pub const SHARED_MAX: u32 = SHARED_MASK as u32;

const TAIL_BITS: u32 = 16;
const TAIL_MASK: u64 = (1 << TAIL_BITS) - 1;
const QUEUE_SHARED_SHIFT: u32 = TAIL_BITS;
const QUEUE_SHARED_BITS: u32 = 14;
const QUEUE_SHARED_MASK: u64 = ((1 << QUEUE_SHARED_BITS) - 1) << QUEUE_SHARED_SHIFT;
const OPREAD_BIT: u64 = 1 << 32;
const QUEUE_VERSION_SHIFT: u32 = 33;

/// Largest reader count a queue lock can hold.
pub const QUEUE_SHARED_MAX: u32 = (1 << QUEUE_SHARED_BITS) - 1;

/// Number of distinct node ids the tail field can name (zero is reserved for "empty").
pub const TAIL_MAX: u32 = TAIL_MASK as u32;

/// A free queue lock word: nobody queued, optimistic reads enabled, version zero.
pub const QUEUE_INIT: u64 = OPREAD_BIT;

/// Mask of the version bits that fit in a queue lock word.
pub const QUEUE_VERSION_MASK: u64 = (1 << (64 - QUEUE_VERSION_SHIFT)) - 1;

/// Decoded single word lock state.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct LockState {
    pub shared:    u32,
    pub six:       bool,
    pub exclusive: bool,
    pub version:   u32,
}

impl LockState {
    #[inline]
    pub const fn decode(word: u64) -> Self {
        LockState {
            shared:    (word & SHARED_MASK) as u32,
            six:       word & SIX_BIT != 0,
            exclusive: word & X_BIT != 0,
            version:   (word >> VERSION_SHIFT) as u32,
        }
    }

    #[inline]
    pub fn encode(self) -> u64 {
        debug_assert!(self.shared <= SHARED_MAX, "reader count overflow");
        debug_assert!(
            !(self.six && self.exclusive),
            "SIX and X may not be held at the same time"
        );
        debug_assert!(
            !(self.exclusive && self.shared > 0),
            "S may not be held while X is held"
        );
        (self.shared as u64 & SHARED_MASK)
            | if self.six { SIX_BIT } else { 0 }
            | if self.exclusive { X_BIT } else { 0 }
            | (self.version as u64) << VERSION_SHIFT
    }

    #[inline]
    pub fn is_free(self) -> bool {
        self.shared == 0 && !self.six && !self.exclusive
    }

    /// S is compatible with everything but X.
    #[inline]
    pub fn can_share(self) -> bool {
        !self.exclusive && self.shared < SHARED_MAX
    }

    /// SIX is compatible with S only.
    #[inline]
    pub fn can_six(self) -> bool {
        !self.exclusive && !self.six
    }
}

/// Decoded queue lock state.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct QueueState {
    pub tail:      Option<NodeId>,
    pub shared:    u32,
    pub six:       bool,
    pub exclusive: bool,
    pub opread:    bool,
    pub version:   u64,
}

impl QueueState {
    #[inline]
    pub fn decode(word: u64) -> Self {
        let tail = (word & TAIL_MASK) as u32;
        QueueState {
            tail:      if tail == 0 {
                None
            } else {
                Some(NodeId::new(tail - 1))
            },
            shared:    ((word & QUEUE_SHARED_MASK) >> QUEUE_SHARED_SHIFT) as u32,
            six:       word & SIX_BIT != 0,
            exclusive: word & X_BIT != 0,
            opread:    word & OPREAD_BIT != 0,
            version:   word >> QUEUE_VERSION_SHIFT,
        }
    }

    #[inline]
    pub fn encode(self) -> u64 {
        debug_assert!(self.shared <= QUEUE_SHARED_MAX, "reader count overflow");
        debug_assert!(
            !(self.six && self.exclusive),
            "SIX and X may not be held at the same time"
        );
        debug_assert!(
            !(self.exclusive && self.shared > 0),
            "S may not be held while X is held"
        );
        let tail = match self.tail {
            Some(id) => {
                debug_assert!(id.get() < TAIL_MAX, "node id does not fit the tail field");
                id.get() as u64 + 1
            }
            None => 0,
        };
        tail | ((self.shared as u64) << QUEUE_SHARED_SHIFT) & QUEUE_SHARED_MASK
            | if self.six { SIX_BIT } else { 0 }
            | if self.exclusive { X_BIT } else { 0 }
            | if self.opread { OPREAD_BIT } else { 0 }
            | (self.version & QUEUE_VERSION_MASK) << QUEUE_VERSION_SHIFT
    }
}
