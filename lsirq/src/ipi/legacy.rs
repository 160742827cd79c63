// SPDX-License-Identifier: MPL-2.0

use alloc::collections::BTreeMap;

use log::{trace, warn};

use super::{IpiTransport, MAILBOX_PC};
use crate::{
    Error,
    io::{Mmio, Platform},
    prelude::*,
};

/// Physical base of the IPI banks of core group 0.
pub const LEGACY_IPI_BASE: u64 = 0x1fe0_1000;
/// The legacy banks serve at most this many cores.
pub const LEGACY_IPI_MAX_CPUS: u32 = 16;

const CORES_PER_GROUP: u32 = 4;
const GROUP_SHIFT: u32 = 44;
const BANK_STRIDE: u64 = 0x100;
const BANK_SIZE: usize = 0x40;

const STATUS0: usize = 0x00;
const EN0: usize = 0x04;
const SET0: usize = 0x08;
const CLEAR0: usize = 0x0c;
const BUF: usize = 0x20;

/// Returns the physical base of the IPI bank of core `hw`.
pub const fn legacy_bank_base(hw: HwCpuId) -> u64 {
    let group = (hw.as_u32() / CORES_PER_GROUP) as u64;
    let core = (hw.as_u32() % CORES_PER_GROUP) as u64;
    LEGACY_IPI_BASE | group << GROUP_SHIFT | core * BANK_STRIDE
}

/// IPIs and mailboxes through the memory-mapped per-core register banks.
pub struct LegacyIpi {
    banks: BTreeMap<u32, Arc<dyn Mmio>>,
}

impl LegacyIpi {
    /// Maps the banks of the cores `cpus`.
    pub fn new(platform: &dyn Platform, cpus: impl IntoIterator<Item = HwCpuId>) -> Result<Self> {
        let mut banks = BTreeMap::new();
        for hw in cpus {
            if hw.as_u32() >= LEGACY_IPI_MAX_CPUS {
                warn!("ipi: core {} has no legacy IPI bank", hw.as_u32());
                return Err(Error::InvalidArgs);
            }
            banks.insert(hw.as_u32(), platform.map_mmio(legacy_bank_base(hw), BANK_SIZE)?);
        }
        Ok(Self { banks })
    }

    fn bank(&self, hw: HwCpuId) -> Option<&Arc<dyn Mmio>> {
        let bank = self.banks.get(&hw.as_u32());
        if bank.is_none() {
            warn!("ipi: no bank mapped for core {}", hw.as_u32());
        }
        bank
    }
}

impl IpiTransport for LegacyIpi {
    fn name(&self) -> &'static str {
        "legacy"
    }

    fn enable(&self, hw: HwCpuId) {
        if let Some(bank) = self.bank(hw) {
            bank.write_w(EN0, u32::MAX);
        }
    }

    fn write_action(&self, hw: HwCpuId, action: u32) {
        if let Some(bank) = self.bank(hw) {
            bank.write_w(SET0, action);
            trace!("ipi: sent to core {}", hw.as_u32());
        }
    }

    fn read_clear(&self, hw: HwCpuId) -> u32 {
        let Some(bank) = self.bank(hw) else {
            return 0;
        };
        let action = bank.read_w(STATUS0);
        bank.write_w(CLEAR0, action);
        action
    }

    fn mail_send(&self, hw: HwCpuId, slot: usize, data: u64) {
        if let Some(bank) = self.bank(hw) {
            bank.write_d(BUF + slot * 8, data);
        }
    }

    fn mailbox(&self, hw: HwCpuId, slot: usize) -> u64 {
        self.bank(hw).map_or(0, |bank| bank.read_d(BUF + slot * 8))
    }

    fn clear_mailbox(&self, hw: HwCpuId) {
        if let Some(bank) = self.bank(hw) {
            bank.write_d(BUF + MAILBOX_PC * 8, 0);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::io::sim::SimBoard;

    fn hw(id: u32) -> HwCpuId {
        HwCpuId::new(id)
    }

    #[test]
    fn banks_are_grouped_by_four() {
        assert_eq!(legacy_bank_base(hw(0)), 0x1fe0_1000);
        assert_eq!(legacy_bank_base(hw(3)), 0x1fe0_1300);
        assert_eq!(legacy_bank_base(hw(6)), 0x1000_1fe0_1200);
    }

    #[test]
    fn actions_travel_through_the_banks() {
        let board = SimBoard::new(8, 4);
        let bank = board.window(legacy_bank_base(hw(5)), BANK_SIZE);
        bank.model_set_clear(SET0, CLEAR0, STATUS0);
        let ipi = LegacyIpi::new(&board, (0..8).map(hw)).unwrap();

        ipi.write_action(hw(5), 0b10);
        ipi.write_action(hw(5), 0b01);
        assert_eq!(bank.peek(STATUS0, 4), 0b11);
        assert_eq!(ipi.read_clear(hw(5)), 0b11);
        assert_eq!(bank.peek(STATUS0, 4), 0);

        ipi.enable(hw(5));
        assert_eq!(bank.peek(EN0, 4), u32::MAX as u64);
        ipi.mail_send(hw(5), 3, 0xdead_beef);
        assert_eq!(bank.peek(BUF + 24, 8), 0xdead_beef);
        assert_eq!(ipi.mailbox(hw(5), 3), 0xdead_beef);
    }

    #[test]
    fn cores_beyond_the_banks_are_refused() {
        let board = SimBoard::new(32, 4);
        assert!(LegacyIpi::new(&board, (0..32).map(hw)).is_err());
    }
}
