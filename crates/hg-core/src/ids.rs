//! Store slot identifiers shared by nodes, curves and areas.

use core::fmt;
use core::num::NonZeroU32;

/// Slot of one entity in a graph's node, curve or area store.
///
/// An `Id` only means something inside the graph that issued it; freed slots
/// are reused, so an `Id` kept past a `remove_*` may name a different entity.
/// Stored as `index + 1` so `Option<Id>` (e.g. a bank's river link) stays
/// four bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Id(NonZeroU32);

impl Id {
    /// Largest slot index a store can hand out.
    pub const MAX_INDEX: u32 = u32::MAX - 1;

    /// Id of slot `index`. `index` must not exceed [`Id::MAX_INDEX`].
    pub fn from_index(index: u32) -> Self {
        debug_assert!(index <= Self::MAX_INDEX);
        Self(NonZeroU32::MIN.saturating_add(index))
    }

    /// Id of a `Vec` slot position, or `None` past [`Id::MAX_INDEX`].
    pub fn try_from_usize(index: usize) -> Option<Self> {
        u32::try_from(index)
            .ok()
            .filter(|&i| i <= Self::MAX_INDEX)
            .map(Self::from_index)
    }

    pub fn index(self) -> u32 {
        self.0.get() - 1
    }

    /// Position in the store's slot vector.
    pub fn slot(self) -> usize {
        self.index() as usize
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.index())
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.index())
    }
}

pub type NodeId = Id;
pub type CurveId = Id;
pub type AreaId = Id;
