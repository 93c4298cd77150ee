//! Utility types for the barrier subsystem.
//!
//! - [`mask::MemberMask`]: bitset keyed by member slot id
//! - [`bitmap::SlotBitmap`]: lock-free slot id allocator

pub mod bitmap;
pub mod mask;
