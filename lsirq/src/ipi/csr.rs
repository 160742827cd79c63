// SPDX-License-Identifier: MPL-2.0

use core::sync::atomic::{Ordering, fence};

use log::trace;

use super::{IpiTransport, MAILBOX_PC};
use crate::{
    io::{
        Platform,
        regs::{
            IPI_CLEAR, IPI_EN, IPI_SEND, IPI_STATUS, MAIL_BUF0, MAIL_SEND, MAIL_SEND_BOX_SHIFT,
            MAIL_SEND_BUF_SHIFT, MAIL_SEND_H32_MASK, SEND_BLOCKING, SEND_CPU_SHIFT,
        },
    },
    prelude::*,
};

/// IPIs and mailboxes through the IOCSR ports.
pub struct CsrIpi {
    platform: Arc<dyn Platform>,
}

impl CsrIpi {
    /// Creates the transport.
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        Self { platform }
    }
}

impl IpiTransport for CsrIpi {
    fn name(&self) -> &'static str {
        "csr"
    }

    fn enable(&self, _hw: HwCpuId) {
        self.platform.iocsr().write_w(IPI_EN, u32::MAX);
    }

    fn write_action(&self, hw: HwCpuId, action: u32) {
        let iocsr = self.platform.iocsr();
        let mut action = action;
        // One request per bit.
        while action != 0 {
            let bit = action.trailing_zeros();
            let val = SEND_BLOCKING as u32 | bit | hw.as_u32() << SEND_CPU_SHIFT;
            iocsr.write_w(IPI_SEND, val);
            action &= !(1 << bit);
        }
        trace!("ipi: sent to core {}", hw.as_u32());
    }

    fn read_clear(&self, _hw: HwCpuId) -> u32 {
        let iocsr = self.platform.iocsr();
        let action = iocsr.read_w(IPI_STATUS);
        iocsr.write_w(IPI_CLEAR, action);
        fence(Ordering::SeqCst);
        action
    }

    fn mail_send(&self, hw: HwCpuId, slot: usize, data: u64) {
        let iocsr = self.platform.iocsr();
        let cpu = (hw.as_u32() as u64) << SEND_CPU_SHIFT;

        // Each slot is two 32-bit boxes; the high half goes first.
        let high_box = ((slot as u64) << 1) + 1;
        let val = SEND_BLOCKING | high_box << MAIL_SEND_BOX_SHIFT | cpu | (data & MAIL_SEND_H32_MASK);
        iocsr.write_d(MAIL_SEND, val);

        let low_box = (slot as u64) << 1;
        let val = SEND_BLOCKING | low_box << MAIL_SEND_BOX_SHIFT | cpu | data << MAIL_SEND_BUF_SHIFT;
        iocsr.write_d(MAIL_SEND, val);
    }

    fn mailbox(&self, _hw: HwCpuId, slot: usize) -> u64 {
        self.platform.iocsr().read_d(MAIL_BUF0 + slot * 8)
    }

    fn clear_mailbox(&self, _hw: HwCpuId) {
        self.platform.iocsr().write_d(MAIL_BUF0 + MAILBOX_PC * 8, 0);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::io::{regs::PortRequest, sim::SimBoard};

    fn transport() -> (SimBoard, CsrIpi) {
        let board = SimBoard::new(4, 4);
        let ipi = CsrIpi::new(Arc::new(board.clone()));
        (board, ipi)
    }

    #[test]
    fn every_action_bit_is_a_separate_send() {
        let (board, ipi) = transport();
        ipi.write_action(HwCpuId::new(2), 0b1000_0011);

        let sends: Vec<_> = board
            .iocsr_writes_to(IPI_SEND)
            .iter()
            .map(|w| PortRequest::decode(IPI_SEND, w.val))
            .map(|req| (req.cpu, req.addr))
            .collect();
        assert_eq!(sends, [(2, 0), (2, 1), (2, 7)]);
        assert_eq!(board.ipi_status(2), 0b1000_0011);
        assert_eq!(board.ipi_status(0), 0);
    }

    #[test]
    fn read_clear_takes_each_bit_once() {
        let (board, ipi) = transport();
        ipi.write_action(HwCpuId::new(1), 0b11);
        board.switch_to(1);
        assert_eq!(ipi.read_clear(HwCpuId::new(1)), 0b11);
        assert_eq!(ipi.read_clear(HwCpuId::new(1)), 0);
    }

    #[test]
    fn mail_is_sent_high_half_first() {
        let (board, ipi) = transport();
        ipi.mail_send(HwCpuId::new(3), 2, 0x9000_0000_0020_1000);

        let boxes: Vec<_> = board
            .iocsr_writes_to(MAIL_SEND)
            .iter()
            .map(|w| PortRequest::decode(MAIL_SEND, w.val))
            .map(|req| (req.cpu, req.mailbox, req.data))
            .collect();
        assert_eq!(boxes, [(3, 5, 0x9000_0000), (3, 4, 0x0020_1000)]);
        assert!(board.iocsr_writes_to(MAIL_SEND).iter().all(|w| w.val & SEND_BLOCKING != 0));
        assert_eq!(board.mailbox(3, 2), 0x9000_0000_0020_1000);

        board.switch_to(3);
        assert_eq!(ipi.mailbox(HwCpuId::new(3), 2), 0x9000_0000_0020_1000);
        ipi.mail_send(HwCpuId::new(3), 0, 0x9000_0000_0040_0000);
        ipi.clear_mailbox(HwCpuId::new(3));
        assert_eq!(board.mailbox(3, 0), 0);
    }
}
