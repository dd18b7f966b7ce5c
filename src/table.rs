//! Generational object table
//!
//! Every kernel object lives in a fixed array slot. Handles carry the
//! slot index plus the slot's generation at insertion time, so a handle
//! to a deleted object is rejected even after the slot is reused.
//!
//! Kernel-internal lists hold plain indices and index the table directly;
//! an index naming a vacant slot is a broken kernel invariant.
//!
//! Author: Moroya Sakamoto

use core::ops::{Index, IndexMut};

/// Slot index plus generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawHandle {
    index: u16,
    generation: u16,
}

impl RawHandle {
    pub(crate) const fn new(index: usize, generation: u16) -> Self {
        Self { index: index as u16, generation }
    }

    pub fn index(&self) -> usize {
        self.index as usize
    }

    pub fn generation(&self) -> u16 {
        self.generation
    }
}

pub struct Table<T, const N: usize> {
    slots: [Option<T>; N],
    generations: [u16; N],
    len: usize,
}

impl<T, const N: usize> Table<T, N> {
    pub const fn new() -> Self {
        Self {
            slots: [const { None }; N],
            generations: [0; N],
            len: 0,
        }
    }

    /// Store `value` in the first vacant slot
    pub fn insert(&mut self, value: T) -> Result<RawHandle, T> {
        match self.slots.iter().position(Option::is_none) {
            Some(index) => {
                self.slots[index] = Some(value);
                self.len += 1;
                Ok(RawHandle::new(index, self.generations[index]))
            }
            None => Err(value),
        }
    }

    /// Resolve a handle to its slot index if it is still live
    pub fn resolve(&self, handle: RawHandle) -> Option<usize> {
        let index = handle.index();
        if index < N && self.generations[index] == handle.generation && self.slots[index].is_some() {
            Some(index)
        } else {
            None
        }
    }

    pub fn get(&self, handle: RawHandle) -> Option<&T> {
        self.resolve(handle).and_then(|i| self.slots[i].as_ref())
    }

    pub fn get_mut(&mut self, handle: RawHandle) -> Option<&mut T> {
        let index = self.resolve(handle)?;
        self.slots[index].as_mut()
    }

    /// Slot access by index, for kernel-internal references
    pub fn at(&self, index: usize) -> Option<&T> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn at_mut(&mut self, index: usize) -> Option<&mut T> {
        self.slots.get_mut(index).and_then(Option::as_mut)
    }

    /// Current handle for an occupied slot
    pub fn handle_of(&self, index: usize) -> RawHandle {
        RawHandle::new(index, self.generations[index])
    }

    /// Vacate a slot and retire its generation
    pub fn remove_at(&mut self, index: usize) -> Option<T> {
        let value = self.slots.get_mut(index)?.take()?;
        self.generations[index] = self.generations[index].wrapping_add(1);
        self.len -= 1;
        Some(value)
    }

    pub fn remove(&mut self, handle: RawHandle) -> Option<T> {
        let index = self.resolve(handle)?;
        self.remove_at(index)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == N
    }

    /// Occupied slots in index order
    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|v| (i, v)))
    }
}

impl<T, const N: usize> Index<usize> for Table<T, N> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        match self.slots[index].as_ref() {
            Some(v) => v,
            None => panic!("kernel table: slot {index} is vacant"),
        }
    }
}

impl<T, const N: usize> IndexMut<usize> for Table<T, N> {
    fn index_mut(&mut self, index: usize) -> &mut T {
        match self.slots[index].as_mut() {
            Some(v) => v,
            None => panic!("kernel table: slot {index} is vacant"),
        }
    }
}

impl<T, const N: usize> Default for Table<T, N> {
    fn default() -> Self {
        Self::new()
    }
}
