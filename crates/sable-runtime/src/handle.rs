//! Generation-tagged handles.

use std::fmt;

/// An opaque identifier for a heap object owned by a [`ManagedArena`].
///
/// A handle encodes a table index and a generation. Dereferencing a handle
/// whose generation has been bumped (because the slot was recycled) yields
/// null rather than stale data, which rules out the ABA problem on slot
/// reuse.
///
/// Holding a handle does not keep its object alive; only pins do.
///
/// [`ManagedArena`]: crate::ManagedArena
#[derive(Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct Handle(u64);

impl Handle {
    /// The null handle. Allocation failures and invalid lookups return this.
    pub const NULL: Handle = Handle(0);

    /// True for the null handle.
    #[inline]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// The raw 64-bit value, for the C ABI.
    #[inline]
    pub fn to_raw(self) -> u64 {
        self.0
    }

    /// Rebuild a handle from its raw value.
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Handle(raw)
    }

    /// Generations start at 1, so a packed handle is never all-zero.
    #[inline]
    pub(crate) fn pack(index: u32, generation: u32) -> Self {
        Handle(u64::from(generation) << 32 | u64::from(index))
    }

    #[inline]
    pub(crate) fn index(self) -> u32 {
        self.0 as u32
    }

    #[inline]
    pub(crate) fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "Handle(NULL)")
        } else {
            write!(f, "Handle({}@g{})", self.index(), self.generation())
        }
    }
}
