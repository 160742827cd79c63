// SPDX-License-Identifier: MPL-2.0

use loongArch64::iocsr::{
    iocsr_read_d, iocsr_read_w, iocsr_write_b, iocsr_write_d, iocsr_write_h, iocsr_write_w,
};

use crate::io::IoCsr;

/// The IOCSR space of the executing core.
pub struct NativeIoCsr;

impl IoCsr for NativeIoCsr {
    fn read_w(&self, reg: usize) -> u32 {
        iocsr_read_w(reg)
    }

    fn read_d(&self, reg: usize) -> u64 {
        iocsr_read_d(reg)
    }

    fn write_b(&self, reg: usize, val: u8) {
        iocsr_write_b(reg, val);
    }

    fn write_h(&self, reg: usize, val: u16) {
        iocsr_write_h(reg, val);
    }

    fn write_w(&self, reg: usize, val: u32) {
        iocsr_write_w(reg, val);
    }

    fn write_d(&self, reg: usize, val: u64) {
        iocsr_write_d(reg, val);
    }
}
