// SPDX-License-Identifier: MPL-2.0

//! The boot-time configuration consumed by the interrupt and SMP layers.
//!
//! Firmware parsing happens elsewhere. What reaches this crate is a
//! [`SysConf`] describing the processor topology, the chipset addresses and
//! the capabilities that select between the hardware variants, plus the
//! kernel command line.

pub mod kcmdline;

use bitflags::bitflags;

bitflags! {
    /// Optional processor features that change how the hardware is driven.
    pub struct CpuFeatures: u32 {
        /// IPIs and mailboxes are reached through IOCSR ports.
        const CSR_IPI = 1 << 0;
        /// The extended I/O interrupt controller is present.
        const EXTIOI  = 1 << 1;
        /// The MSI window spans 256 vectors instead of 128.
        const MSI256  = 1 << 2;
    }
}

bitflags! {
    /// Firmware-reported errata workarounds.
    pub struct Workarounds: u32 {
        /// Core clocks must not be gated on CPU hotplug.
        const CPU_HOTPLUG = 1 << 0;
    }
}

/// How south-bridge interrupts reach the processor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteModel {
    /// Through HyperTransport interrupt lines and the HT vector controller.
    Line,
    /// Through the extended I/O interrupt controller.
    Ext,
}

/// The boot parameter interface version of the firmware.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum BpiVersion {
    /// Version 1: CPUs come from the MADT, interrupt controllers are built in.
    V1,
    /// Version 2 and later: interrupt controllers are described by the MADT.
    V2,
}

/// Default physical base of the PCH register block.
pub const LS7A_PCH_REG_BASE: u64 = 0x1000_0000;
/// Default physical base of the LIOINTC.
pub const LIOINTC_DEFAULT_PHYS_BASE: u64 = 0x1fe0_1400;
/// Default first GSI of the first PCH-PIC.
pub const LOONGSON_PCH_IRQ_BASE: u32 = 64;
/// Default physical base of the HT vector registers of HT controller 1.
pub const HTVEC_DEFAULT_PHYS_BASE: u64 = 0x0efd_fb00_0080;

/// The platform configuration.
#[derive(Clone, Debug)]
pub struct SysConf {
    /// Physical id of the boot CPU.
    pub boot_cpu_id: u32,
    /// Number of cores on each NUMA node.
    pub cores_per_node: u32,
    /// Number of cores in each package.
    pub cores_per_package: u32,
    /// Number of CPUs the firmware reports present.
    pub nr_cpus: u32,
    /// Physical ids that must never be brought up.
    pub reserved_cpus_mask: u16,
    /// Firmware interface version.
    pub bpi_version: BpiVersion,
    /// Target address of MSI writes.
    pub msi_address: u64,
    /// Physical base of the PCH register block.
    pub pch_reg_base: u64,
    /// Physical base of the LIOINTC.
    pub liointc_base: u64,
    /// Physical base of the HT vector registers.
    pub htvec_base: u64,
    /// Processor features.
    pub features: CpuFeatures,
    /// Errata workarounds.
    pub workarounds: Workarounds,
    /// South-bridge interrupt route model.
    pub route_model: RouteModel,
}

impl SysConf {
    /// Returns the MSI message address split into its high and low halves.
    pub fn msi_address_parts(&self) -> (u32, u32) {
        ((self.msi_address >> 32) as u32, self.msi_address as u32)
    }
}

impl Default for SysConf {
    /// A single-node 3A5000 with an LS7A bridge.
    fn default() -> Self {
        Self {
            boot_cpu_id: 0,
            cores_per_node: 4,
            cores_per_package: 4,
            nr_cpus: 4,
            reserved_cpus_mask: 0xfff0,
            bpi_version: BpiVersion::V1,
            msi_address: 0x2ff0_0000,
            pch_reg_base: LS7A_PCH_REG_BASE,
            liointc_base: LIOINTC_DEFAULT_PHYS_BASE,
            htvec_base: HTVEC_DEFAULT_PHYS_BASE,
            features: CpuFeatures::CSR_IPI | CpuFeatures::EXTIOI,
            workarounds: Workarounds::empty(),
            route_model: RouteModel::Ext,
        }
    }
}
