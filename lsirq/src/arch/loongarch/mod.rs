// SPDX-License-Identifier: MPL-2.0

//! LoongArch CPU-local operations and the native hardware accessors.

mod csr;
mod iocsr;

pub use self::{csr::NativeCoreCsr, iocsr::NativeIoCsr};

use crate::{
    Error,
    io::{CoreCsr, IoCsr, IoMem, Mmio, Platform},
    prelude::*,
};

pub(crate) mod irq {
    pub(crate) fn is_local_enabled() -> bool {
        loongArch64::register::crmd::read().ie()
    }

    pub(crate) fn enable_local() {
        loongArch64::register::crmd::set_ie(true);
    }

    pub(crate) fn disable_local() {
        loongArch64::register::crmd::set_ie(false);
    }
}

/// The uncached direct-mapped window through which chipset registers are
/// reached.
pub const UNCACHED_WINDOW: u64 = 0x8000_0000_0000_0000;

/// The platform of a real LoongArch machine.
pub struct NativePlatform {
    iocsr: NativeIoCsr,
    core: NativeCoreCsr,
}

impl NativePlatform {
    /// Creates the accessor set of the running machine.
    pub const fn new() -> Self {
        Self {
            iocsr: NativeIoCsr,
            core: NativeCoreCsr,
        }
    }
}

impl Default for NativePlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for NativePlatform {
    fn iocsr(&self) -> &dyn IoCsr {
        &self.iocsr
    }

    fn core(&self) -> &dyn CoreCsr {
        &self.core
    }

    fn map_mmio(&self, paddr: u64, len: usize) -> Result<Arc<dyn Mmio>> {
        if paddr == 0 || len == 0 {
            return Err(Error::InvalidArgs);
        }
        // SAFETY: Chipset register windows are reserved for MMIO and are
        // only reached through the uncached window.
        let io_mem = unsafe { IoMem::new((UNCACHED_WINDOW | paddr) as usize, len) };
        Ok(Arc::new(io_mem))
    }
}
