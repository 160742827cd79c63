// SPDX-License-Identifier: MPL-2.0

use core::ptr::NonNull;

use volatile::VolatilePtr;

use super::Mmio;

/// A memory-mapped register window accessed with volatile loads and stores.
#[derive(Debug)]
pub struct IoMem {
    base: usize,
    len: usize,
}

impl IoMem {
    /// Creates a window over `len` bytes at virtual address `base`.
    ///
    /// # Safety
    ///
    /// `base..base + len` must be mapped device memory that stays valid for
    /// the lifetime of the window, and nothing else may treat it as memory.
    pub unsafe fn new(base: usize, len: usize) -> Self {
        Self { base, len }
    }

    /// Returns the length of the window in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the window is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn ptr<T>(&self, offset: usize) -> VolatilePtr<'_, T> {
        assert!(offset + size_of::<T>() <= self.len);
        assert!(offset % align_of::<T>() == 0);
        let addr = (self.base + offset) as *mut T;
        // SAFETY: The address is in bounds and aligned, and the window is
        // valid device memory by the contract of `IoMem::new`.
        unsafe { VolatilePtr::new(NonNull::new_unchecked(addr)) }
    }
}

impl Mmio for IoMem {
    fn read_w(&self, offset: usize) -> u32 {
        self.ptr::<u32>(offset).read()
    }

    fn read_d(&self, offset: usize) -> u64 {
        self.ptr::<u64>(offset).read()
    }

    fn write_b(&self, offset: usize, val: u8) {
        self.ptr::<u8>(offset).write(val);
    }

    fn write_w(&self, offset: usize, val: u32) {
        self.ptr::<u32>(offset).write(val);
    }

    fn write_d(&self, offset: usize, val: u64) {
        self.ptr::<u64>(offset).write(val);
    }
}
