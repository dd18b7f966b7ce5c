//! Fixed-slot ring index
//!
//! Tracks which slot of a queue's storage is the head and how many are
//! occupied. Storage itself lives in the kernel heap; this type only hands
//! out slot numbers. Unlike a lock-free SPSC ring it needs no reserved
//! slot: every kernel access happens inside a critical section, so a
//! length counter distinguishes full from empty.
//!
//! Author: Moroya Sakamoto

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRing {
    /// Slot holding the oldest item
    head: usize,
    len: usize,
    capacity: usize,
}

impl SlotRing {
    pub const fn new(capacity: usize) -> Self {
        Self { head: 0, len: 0, capacity }
    }

    /// Claim the slot behind the newest item
    ///
    /// Returns `None` if the ring is full.
    pub fn push_back(&mut self) -> Option<usize> {
        if self.is_full() {
            return None;
        }
        let slot = (self.head + self.len) % self.capacity;
        self.len += 1;
        Some(slot)
    }

    /// Claim the slot in front of the oldest item
    pub fn push_front(&mut self) -> Option<usize> {
        if self.is_full() {
            return None;
        }
        self.head = (self.head + self.capacity - 1) % self.capacity;
        self.len += 1;
        Some(self.head)
    }

    /// Release the oldest slot, returning it for reading
    pub fn pop_front(&mut self) -> Option<usize> {
        if self.is_empty() {
            return None;
        }
        let slot = self.head;
        self.head = (self.head + 1) % self.capacity;
        self.len -= 1;
        Some(slot)
    }

    /// Oldest slot, without releasing it
    pub fn front(&self) -> Option<usize> {
        if self.is_empty() {
            None
        } else {
            Some(self.head)
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Free slots
    pub fn spaces(&self) -> usize {
        self.capacity - self.len
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }
}
