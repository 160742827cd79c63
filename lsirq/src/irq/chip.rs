// SPDX-License-Identifier: MPL-2.0

use super::{IrqDataRef, Trigger};
use crate::{Error, prelude::*};

/// An MSI message: the address a device writes to and the data it writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MsiMsg {
    /// High 32 bits of the target address.
    pub address_hi: u32,
    /// Low 32 bits of the target address.
    pub address_lo: u32,
    /// The payload.
    pub data: u32,
}

/// The operations of an interrupt controller on one of its lines.
///
/// Every method receives the hierarchy level that belongs to the chip, from
/// which the hardware line number and the parent levels can be reached.
/// Chips that have nothing to do for an operation keep the default.
pub trait IrqChip: Send + Sync {
    /// The name shown in diagnostics.
    fn name(&self) -> &'static str;

    /// Masks the line.
    fn mask(&self, _data: &IrqDataRef<'_>) {}

    /// Unmasks the line.
    fn unmask(&self, _data: &IrqDataRef<'_>) {}

    /// Acknowledges the line.
    fn ack(&self, _data: &IrqDataRef<'_>) {}

    /// Masks and then acknowledges the line.
    fn mask_ack(&self, data: &IrqDataRef<'_>) {
        self.mask(data);
        self.ack(data);
    }

    /// Configures the trigger of the line.
    fn set_type(&self, _data: &IrqDataRef<'_>, _trigger: Trigger) -> Result<()> {
        Ok(())
    }

    /// Routes the line to `mask`, returning the CPUs that will actually
    /// receive it.
    fn set_affinity(&self, _data: &IrqDataRef<'_>, _mask: &CpuSet, _force: bool) -> Result<CpuSet> {
        Err(Error::NotSupported)
    }

    /// Returns the MSI message that raises this line.
    fn compose_msi_msg(&self, _data: &IrqDataRef<'_>) -> Option<MsiMsg> {
        None
    }

    /// Called for active lines when the executing CPU goes offline.
    fn cpu_offline(&self, _data: &IrqDataRef<'_>) {}
}
