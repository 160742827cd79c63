// SPDX-License-Identifier: MPL-2.0

//! Inter-processor interrupts and mailboxes.
//!
//! Each core has a 32-bit IPI status register, where every bit is a pending
//! action, and four 64-bit mailbox slots. Two register interfaces exist: the
//! IOCSR ports of newer processors ([`CsrIpi`]) and memory-mapped register
//! banks ([`LegacyIpi`]). One of them is chosen when SMP is set up and used
//! for everything afterwards.

mod csr;
mod legacy;

use bitflags::bitflags;

pub use self::{
    csr::CsrIpi,
    legacy::{LEGACY_IPI_BASE, LegacyIpi, legacy_bank_base},
};
use crate::{boot::CpuFeatures, io::Platform, prelude::*};

bitflags! {
    /// The actions an IPI carries.
    pub struct IpiAction: u32 {
        /// Run the scheduler.
        const RESCHEDULE    = 1 << 0;
        /// Drain the inter-processor call queue.
        const CALL_FUNCTION = 1 << 1;
    }
}

/// IRQ numbers sent over IPIs start at this status bit.
pub const IPI_IRQ_OFFSET: u32 = 6;

/// The mailbox slot that receives the entry point of a secondary CPU. The
/// secondary starts fetching once it becomes nonzero.
pub const MAILBOX_PC: usize = 0;

/// A register interface to the IPI and mailbox hardware.
///
/// Each status bit written with [`Self::write_action`] is seen exactly once
/// by [`Self::read_clear`] on the destination.
pub trait IpiTransport: Send + Sync {
    /// The name shown in diagnostics.
    fn name(&self) -> &'static str;

    /// Enables every IPI bit of the executing core, whose id is `hw`.
    fn enable(&self, hw: HwCpuId);

    /// Posts the bits of `action` to core `hw`.
    fn write_action(&self, hw: HwCpuId, action: u32);

    /// Fetches and clears the pending bits of the executing core, whose id
    /// is `hw`.
    fn read_clear(&self, hw: HwCpuId) -> u32;

    /// Writes `data` into mailbox slot `slot` of core `hw`.
    ///
    /// Blocks until the hardware has taken the write.
    fn mail_send(&self, hw: HwCpuId, slot: usize, data: u64);

    /// Reads mailbox slot `slot` of the executing core, whose id is `hw`.
    fn mailbox(&self, hw: HwCpuId, slot: usize) -> u64;

    /// Clears the entry point slot of the executing core, whose id is `hw`.
    fn clear_mailbox(&self, hw: HwCpuId);
}

/// Selects the transport for a processor with `features`.
///
/// `cpus` are the physical ids the legacy banks are mapped for.
pub fn select(
    platform: Arc<dyn Platform>,
    features: CpuFeatures,
    cpus: impl IntoIterator<Item = HwCpuId>,
) -> Result<Arc<dyn IpiTransport>> {
    if features.contains(CpuFeatures::CSR_IPI) {
        Ok(Arc::new(CsrIpi::new(platform)))
    } else {
        Ok(Arc::new(LegacyIpi::new(platform.as_ref(), cpus)?))
    }
}
