// SPDX-License-Identifier: MPL-2.0

use core::arch::asm;

use crate::io::CoreCsr;

/// The core-level CSRs of the executing core.
pub struct NativeCoreCsr;

impl CoreCsr for NativeCoreCsr {
    fn cpuid(&self) -> u32 {
        let val: usize;
        // SAFETY: Reading CSR.CPUID has no side effects.
        unsafe {
            asm!("csrrd {}, 0x20", out(reg) val, options(nomem, nostack));
        }
        (val & 0x1ff) as u32
    }

    fn prid(&self) -> u32 {
        let val: usize;
        // SAFETY: CPUCFG word 0 holds the processor id and is read-only.
        unsafe {
            asm!("cpucfg {}, $zero", out(reg) val, options(nomem, nostack));
        }
        val as u32
    }

    fn ecfg(&self) -> u32 {
        let val: usize;
        // SAFETY: Reading CSR.ECFG has no side effects.
        unsafe {
            asm!("csrrd {}, 0x4", out(reg) val, options(nomem, nostack));
        }
        val as u32
    }

    fn set_ecfg(&self, val: u32) {
        let mut val = val as usize;
        // SAFETY: The caller only changes the local interrupt line enables
        // and the vector spacing of its own core.
        unsafe {
            asm!("csrwr {}, 0x4", inout(reg) val, options(nostack));
        }
        let _ = val;
    }

    fn flush_tlb_local(&self) {
        // SAFETY: Invalidating every TLB entry of the local core is always safe.
        unsafe {
            asm!("invtlb 0, $zero, $zero");
        }
    }
}
