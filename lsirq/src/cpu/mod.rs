// SPDX-License-Identifier: MPL-2.0

//! CPU-related definitions.
//!
//! Two id spaces coexist: the logical [`CpuId`] used by the rest of the
//! kernel, and the physical [`HwCpuId`] the hardware addresses cores by.
//! [`CpuTopology`] owns the mapping between them.

pub mod set;
mod topology;

pub use set::{AtomicCpuSet, CpuSet};
pub use topology::{CpuState, CpuTopology};

/// The maximum number of logical CPUs.
pub const NR_CPUS: usize = 64;
/// The maximum number of physical core ids.
pub const MAX_HW_CPUS: usize = 64;
/// The maximum number of NUMA nodes.
pub const MAX_NUMNODES: usize = 16;

/// The logical ID of a CPU in the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CpuId(u32);

impl CpuId {
    /// Returns the CPU ID of the bootstrap processor (BSP).
    pub const fn bsp() -> Self {
        CpuId(0)
    }

    /// Creates a CPU ID without checking the range.
    ///
    /// # Safety
    ///
    /// `raw` must be less than [`NR_CPUS`].
    pub const unsafe fn new_unchecked(raw: u32) -> Self {
        CpuId(raw)
    }

    /// Converts the CPU ID to an `usize`.
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Converts the CPU ID to an `u32`.
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl TryFrom<usize> for CpuId {
    type Error = &'static str;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        if value < NR_CPUS {
            Ok(CpuId(value as u32))
        } else {
            Err("The given CPU ID is out of range")
        }
    }
}

impl core::fmt::Display for CpuId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The physical ID of a core, as used by IOCSR ports and chipset registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HwCpuId(u32);

impl HwCpuId {
    /// Creates a physical core ID.
    pub const fn new(raw: u32) -> Self {
        HwCpuId(raw)
    }

    /// Converts the ID to an `u32`.
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Converts the ID to an `usize`.
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl core::fmt::Display for HwCpuId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
