//! A fixed-width bitset of member slots.
//!
//! # Design
//!
//! Every member (process or scheduler) owns a stable slot id in
//! `0..MAX_MEMBER_SLOTS`. A `MemberMask` holds one bit per slot, so the
//! rendezvous bookkeeping (required masks, arrived flags, pending deltas) is
//! plain word algebra: contributing is an OR, satisfaction is a subset test,
//! removal is an AND-NOT.
//!
//! Processes and schedulers use separate masks; a slot id is only meaningful
//! together with the member kind.
use serde::Serialize;
use std::fmt;

use crate::def::MAX_MEMBER_SLOTS;

#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct MemberMask(u64);

const _: () = assert!(MAX_MEMBER_SLOTS <= u64::BITS as usize);

impl MemberMask {
    pub const EMPTY: MemberMask = MemberMask(0);

    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Mask holding the single bit of `slot`.
    pub fn single(slot: usize) -> Self {
        assert!(slot < MAX_MEMBER_SLOTS, "slot {} out of range", slot);
        Self(1u64 << slot)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub fn set(&mut self, slot: usize) {
        self.0 |= Self::single(slot).0;
    }

    pub fn clear(&mut self, slot: usize) {
        self.0 &= !Self::single(slot).0;
    }

    pub fn test(self, slot: usize) -> bool {
        slot < MAX_MEMBER_SLOTS && (self.0 >> slot) & 1 != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn count(self) -> u32 {
        self.0.count_ones()
    }

    pub const fn union(self, other: MemberMask) -> MemberMask {
        MemberMask(self.0 | other.0)
    }

    pub const fn intersection(self, other: MemberMask) -> MemberMask {
        MemberMask(self.0 & other.0)
    }

    pub const fn difference(self, other: MemberMask) -> MemberMask {
        MemberMask(self.0 & !other.0)
    }

    /// True when every bit of `self` is also set in `other`.
    pub const fn is_subset_of(self, other: MemberMask) -> bool {
        self.0 & !other.0 == 0
    }

    /// Iterates the set slots in ascending order.
    pub fn iter(self) -> impl Iterator<Item = usize> {
        let mut rest = self.0;
        std::iter::from_fn(move || {
            if rest == 0 {
                return None;
            }
            let slot = rest.trailing_zeros() as usize;
            rest &= rest - 1;
            Some(slot)
        })
    }
}

impl std::ops::BitOrAssign for MemberMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for MemberMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemberMask({:#018x})", self.0)
    }
}

impl fmt::Display for MemberMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}
