use std::sync::atomic::{AtomicU64, Ordering};

use crate::def::MAX_MEMBER_SLOTS;

/// Lock-free allocator of member slot ids.
///
/// One word holds the whole slot space; acquiring a slot claims the lowest
/// clear bit with a CAS loop, so concurrent registrations never hand out the
/// same id twice.
pub struct SlotBitmap {
    word: AtomicU64,
    size: usize,
}

impl SlotBitmap {
    pub fn new(size: usize) -> Self {
        assert!(size <= MAX_MEMBER_SLOTS, "slot bitmap too large: {}", size);
        Self {
            word: AtomicU64::new(0),
            size,
        }
    }

    pub fn try_acquire(&self) -> Option<usize> {
        let mut current = self.word.load(Ordering::Relaxed);
        loop {
            let slot = (!current).trailing_zeros() as usize;
            if slot >= self.size {
                return None;
            }
            let new = current | (1u64 << slot);
            match self
                .word
                .compare_exchange_weak(current, new, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Some(slot),
                Err(actual) => {
                    current = actual;
                    std::hint::spin_loop();
                }
            }
        }
    }

    pub fn release(&self, slot: usize) {
        assert!(slot < self.size);
        self.word.fetch_and(!(1u64 << slot), Ordering::SeqCst);
    }

    pub fn is_set(&self, slot: usize) -> bool {
        assert!(slot < self.size);
        self.word.load(Ordering::Relaxed) & (1u64 << slot) != 0
    }

    pub fn in_use(&self) -> usize {
        self.word.load(Ordering::Relaxed).count_ones() as usize
    }

    pub fn capacity(&self) -> usize {
        self.size
    }
}
