// SPDX-License-Identifier: MPL-2.0

//! An id allocator implemented by the bitmap.
//!
//! Besides single ids, the allocator hands out naturally aligned regions of
//! `2^order` consecutive ids, which is what interrupt vector windows need.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

use core::{fmt::Debug, ops::Range};

use bitvec::prelude::BitVec;

/// An id allocator implemented by the bitmap.
/// The true bit implies that the id is allocated, and vice versa.
#[derive(Clone)]
pub struct IdAlloc {
    bitset: BitVec<u8>,
    first_available_id: usize,
}

impl IdAlloc {
    /// Constructs a new id allocator with a maximum capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut bitset = BitVec::with_capacity(capacity);
        bitset.resize(capacity, false);
        Self {
            bitset,
            first_available_id: 0,
        }
    }

    /// Allocates and returns a new `id`.
    ///
    /// If allocation is not possible, it returns `None`.
    pub fn alloc(&mut self) -> Option<usize> {
        if self.first_available_id < self.bitset.len() {
            let id = self.first_available_id;
            self.bitset.set(id, true);
            self.first_available_id = (id + 1..self.bitset.len())
                .find(|&i| !self.bitset[i])
                .unwrap_or(self.bitset.len());
            Some(id)
        } else {
            None
        }
    }

    /// Allocates `count` consecutive ids.
    ///
    /// Returns `None` if `count` is zero or no free range is long enough.
    pub fn alloc_consecutive(&mut self, count: usize) -> Option<Range<usize>> {
        if count == 0 {
            return None;
        }

        let mut start = self.first_available_id;
        while start + count <= self.bitset.len() {
            match (start..start + count).find(|&i| self.bitset[i]) {
                Some(used) => start = used + 1,
                None => {
                    self.mark_range(start..start + count);
                    return Some(start..start + count);
                }
            }
        }
        None
    }

    /// Allocates a specific `id`.
    ///
    /// Returns `None` if the id is out of range or already allocated.
    pub fn alloc_specific(&mut self, id: usize) -> Option<usize> {
        if id >= self.bitset.len() || self.bitset[id] {
            return None;
        }
        self.bitset.set(id, true);
        if id == self.first_available_id {
            self.first_available_id = (id + 1..self.bitset.len())
                .find(|&i| !self.bitset[i])
                .unwrap_or(self.bitset.len());
        }
        Some(id)
    }

    /// Allocates a free region of `2^order` ids whose start is aligned to
    /// `2^order`, returning the first id of the region.
    ///
    /// Regions are scanned from the lowest id; a region that does not fit
    /// entirely within the capacity is never returned.
    pub fn alloc_region(&mut self, order: u32) -> Option<usize> {
        let size = 1usize.checked_shl(order)?;
        let mut start = 0;
        while start + size <= self.bitset.len() {
            if self.bitset[start..start + size].not_any() {
                self.mark_range(start..start + size);
                return Some(start);
            }
            start += size;
        }
        None
    }

    /// Releases a region previously returned by [`Self::alloc_region`].
    ///
    /// # Panics
    ///
    /// If the region goes beyond the capacity of the allocator.
    pub fn release_region(&mut self, start: usize, order: u32) {
        let size = 1usize << order;
        self.free_consecutive(start..start + size);
    }

    /// Frees the allocated `id`.
    ///
    /// This panics if the id is out of bounds.
    pub fn free(&mut self, id: usize) {
        debug_assert!(self.is_allocated(id));

        self.bitset.set(id, false);
        if id < self.first_available_id {
            self.first_available_id = id;
        }
    }

    /// Frees the allocated consecutive range of ids.
    ///
    /// # Panics
    ///
    /// If the range is out of bounds.
    pub fn free_consecutive(&mut self, range: Range<usize>) {
        if range.is_empty() {
            return;
        }
        let start = range.start;
        self.bitset[range].fill(false);
        if start < self.first_available_id {
            self.first_available_id = start;
        }
    }

    /// Returns true if the `id` is allocated.
    ///
    /// # Panics
    ///
    /// If the `id` is out of bounds.
    pub fn is_allocated(&self, id: usize) -> bool {
        self.bitset[id]
    }

    /// Returns the number of ids that are still free.
    pub fn num_free(&self) -> usize {
        self.bitset.count_zeros()
    }

    /// Returns the capacity of the allocator.
    pub fn capacity(&self) -> usize {
        self.bitset.len()
    }

    fn mark_range(&mut self, range: Range<usize>) {
        let end = range.end;
        let covers_first = range.contains(&self.first_available_id);
        self.bitset[range].fill(true);
        if covers_first {
            self.first_available_id = (end..self.bitset.len())
                .find(|&i| !self.bitset[i])
                .unwrap_or(self.bitset.len());
        }
    }
}

impl Debug for IdAlloc {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IdAlloc")
            .field("len", &self.bitset.len())
            .field("first_available_id", &self.first_available_id)
            .finish()
    }
}
