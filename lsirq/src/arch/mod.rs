// SPDX-License-Identifier: MPL-2.0

//! Platform-specific code.
//!
//! On LoongArch the real CSR/IOCSR accessors are used. On every other target
//! (host builds and tests) the local IRQ state is emulated and hardware is
//! reached through [`crate::io::sim`].

cfg_if::cfg_if! {
    if #[cfg(target_arch = "loongarch64")] {
        mod loongarch;
        pub use self::loongarch::*;
    } else {
        mod host;
        pub use self::host::*;
    }
}

/// Hints the CPU that it is spinning in a polling loop.
#[inline]
pub fn cpu_relax() {
    core::hint::spin_loop();
}
