//! Kernel heap — first-fit allocator over a fixed byte arena
//!
//! Backs task stacks and queue storage. Blocks are handed out as
//! offset/length pairs into the arena; the free list is kept sorted by
//! offset and neighbours are merged on release so the arena does not
//! fragment into unusable slivers.
//!
//! Allocation failure is reported as `None`. The kernel turns that into
//! [`KernelError::AllocationFailed`](crate::KernelError) and calls the
//! port's allocation-failure hook; the heap itself never aborts.
//!
//! Author: Moroya Sakamoto

use heapless::Vec;

use crate::config::{MAX_QUEUES, MAX_TASKS};

/// Allocation granularity
const ALIGN: usize = 8;

/// Upper bound on free fragments: one more than live allocations
const MAX_FREE_BLOCKS: usize = MAX_TASKS + MAX_QUEUES + 1;

/// A region of the heap arena
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    offset: usize,
    len: usize,
}

impl Block {
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn end(&self) -> usize {
        self.offset + self.len
    }
}

/// Fixed-size heap of `N` bytes
pub struct Heap<const N: usize> {
    memory: [u8; N],
    free: Vec<Block, MAX_FREE_BLOCKS>,
    initialised: bool,
    free_bytes: usize,
    min_ever_free: usize,
}

impl<const N: usize> Heap<N> {
    pub const fn new() -> Self {
        Self {
            memory: [0u8; N],
            free: Vec::new(),
            initialised: false,
            free_bytes: N,
            min_ever_free: N,
        }
    }

    /// The free list is built on first use so `new` stays `const`
    fn init(&mut self) {
        if !self.initialised {
            let _ = self.free.push(Block { offset: 0, len: N });
            self.initialised = true;
        }
    }

    /// Allocate at least `size` bytes
    pub fn allocate(&mut self, size: usize) -> Option<Block> {
        self.init();
        if size == 0 || size > N {
            return None;
        }
        let size = (size + ALIGN - 1) & !(ALIGN - 1);

        let idx = self.free.iter().position(|b| b.len >= size)?;
        let candidate = self.free[idx];
        let block = if candidate.len - size >= ALIGN {
            self.free[idx] = Block {
                offset: candidate.offset + size,
                len: candidate.len - size,
            };
            Block { offset: candidate.offset, len: size }
        } else {
            self.free.remove(idx);
            candidate
        };

        self.free_bytes -= block.len;
        self.min_ever_free = self.min_ever_free.min(self.free_bytes);
        Some(block)
    }

    /// Return a block obtained from [`allocate`](Self::allocate)
    pub fn free(&mut self, block: Block) {
        if block.is_empty() || block.end() > N {
            return;
        }
        let idx = self
            .free
            .iter()
            .position(|b| b.offset > block.offset)
            .unwrap_or(self.free.len());

        // Merge with the following fragment
        let mut merged = block;
        if idx < self.free.len() && merged.end() == self.free[idx].offset {
            merged.len += self.free[idx].len;
            self.free.remove(idx);
        }
        // Merge with the preceding fragment
        if idx > 0 && self.free[idx - 1].end() == merged.offset {
            self.free[idx - 1].len += merged.len;
        } else if self.free.insert(idx, merged).is_err() {
            // Bounded by live allocations; unreachable with the table sizes
            log::warn!("heap: free list full, {} bytes leaked", merged.len);
            return;
        }
        self.free_bytes += block.len;
    }

    pub fn bytes(&self, block: Block) -> &[u8] {
        &self.memory[block.offset..block.end()]
    }

    pub fn bytes_mut(&mut self, block: Block) -> &mut [u8] {
        &mut self.memory[block.offset..block.end()]
    }

    pub fn free_bytes(&self) -> usize {
        self.free_bytes
    }

    /// Low-water mark of free bytes since boot
    pub fn minimum_ever_free(&self) -> usize {
        self.min_ever_free
    }

    pub fn capacity(&self) -> usize {
        N
    }
}

impl<const N: usize> Default for Heap<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_rounds_up() {
        let mut heap = Heap::<256>::new();
        let block = heap.allocate(10).unwrap();
        assert_eq!(block.offset(), 0);
        assert_eq!(block.len(), 16);
        assert_eq!(heap.free_bytes(), 240);
    }

    #[test]
    fn test_exhaustion_returns_none() {
        let mut heap = Heap::<64>::new();
        assert!(heap.allocate(48).is_some());
        assert!(heap.allocate(32).is_none());
        assert!(heap.allocate(0).is_none());
        assert!(heap.allocate(16).is_some());
        assert_eq!(heap.free_bytes(), 0);
    }

    #[test]
    fn test_free_coalesces() {
        let mut heap = Heap::<128>::new();
        let a = heap.allocate(32).unwrap();
        let b = heap.allocate(32).unwrap();
        let c = heap.allocate(32).unwrap();
        heap.free(a);
        heap.free(c);
        // a and the tail are separate fragments, neither fits 96 bytes
        assert!(heap.allocate(96).is_none());
        heap.free(b);
        let all = heap.allocate(128).unwrap();
        assert_eq!(all.offset(), 0);
        assert_eq!(heap.free_bytes(), 0);
    }

    #[test]
    fn test_first_fit_reuses_hole() {
        let mut heap = Heap::<128>::new();
        let a = heap.allocate(32).unwrap();
        let _b = heap.allocate(32).unwrap();
        heap.free(a);
        let c = heap.allocate(24).unwrap();
        assert_eq!(c.offset(), 0);
    }

    #[test]
    fn test_minimum_ever_free() {
        let mut heap = Heap::<128>::new();
        let a = heap.allocate(64).unwrap();
        heap.free(a);
        assert_eq!(heap.free_bytes(), 128);
        assert_eq!(heap.minimum_ever_free(), 64);
    }

    #[test]
    fn test_block_bytes() {
        let mut heap = Heap::<64>::new();
        let a = heap.allocate(8).unwrap();
        heap.bytes_mut(a).copy_from_slice(&[7u8; 8]);
        assert_eq!(heap.bytes(a), &[7u8; 8]);
    }
}
