// SPDX-License-Identifier: MPL-2.0

//! Hardware register access.
//!
//! Every driver in this crate reaches the hardware through the traits of this
//! module, so that the same code runs against a real machine
//! (`arch::NativePlatform`) and against the register simulator in [`sim`].
//!
//! Two register spaces exist on Loongson machines:
//!
//!  - the IOCSR space, private to each core but able to forward requests to
//!    other cores and nodes through the `ANY_SEND`, `IPI_SEND` and
//!    `MAIL_SEND` ports;
//!  - memory-mapped chipset windows (LIOINTC, PCH-PIC, HT vectors and the
//!    legacy IPI banks).

mod io_mem;
pub mod regs;
pub mod sim;

pub use self::io_mem::IoMem;
use crate::prelude::*;

/// Accessors of the IOCSR space of the executing core.
pub trait IoCsr: Send + Sync {
    /// Reads a 32-bit register.
    fn read_w(&self, reg: usize) -> u32;
    /// Reads a 64-bit register.
    fn read_d(&self, reg: usize) -> u64;
    /// Writes an 8-bit register.
    fn write_b(&self, reg: usize, val: u8);
    /// Writes a 16-bit register.
    fn write_h(&self, reg: usize, val: u16);
    /// Writes a 32-bit register.
    fn write_w(&self, reg: usize, val: u32);
    /// Writes a 64-bit register.
    fn write_d(&self, reg: usize, val: u64);
}

/// Accessors of a memory-mapped register window.
///
/// Offsets are relative to the start of the window.
pub trait Mmio: Send + Sync {
    /// Reads a 32-bit register.
    fn read_w(&self, offset: usize) -> u32;
    /// Reads a 64-bit register.
    fn read_d(&self, offset: usize) -> u64;
    /// Writes an 8-bit register.
    fn write_b(&self, offset: usize, val: u8);
    /// Writes a 32-bit register.
    fn write_w(&self, offset: usize, val: u32);
    /// Writes a 64-bit register.
    fn write_d(&self, offset: usize, val: u64);
}

/// Core-level control registers of the executing core.
pub trait CoreCsr: Send + Sync {
    /// Returns the physical id of the executing core.
    fn cpuid(&self) -> u32;
    /// Returns the processor identification word.
    fn prid(&self) -> u32;
    /// Reads the exception configuration register.
    fn ecfg(&self) -> u32;
    /// Writes the exception configuration register.
    fn set_ecfg(&self, val: u32);
    /// Flushes every TLB entry of the executing core.
    fn flush_tlb_local(&self);
}

/// The set of hardware accessors a machine provides.
pub trait Platform: Send + Sync {
    /// Returns the IOCSR space of the executing core.
    fn iocsr(&self) -> &dyn IoCsr;
    /// Returns the control registers of the executing core.
    fn core(&self) -> &dyn CoreCsr;
    /// Maps a chipset register window at `paddr` of `len` bytes.
    fn map_mmio(&self, paddr: u64, len: usize) -> Result<Arc<dyn Mmio>>;

    /// Returns the physical id of the executing core.
    fn current_hw_cpu(&self) -> HwCpuId {
        HwCpuId::new(self.core().cpuid())
    }
}
