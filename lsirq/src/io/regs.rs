// SPDX-License-Identifier: MPL-2.0

//! IOCSR register map of Loongson 3-series processors.
//!
//! Reference: <https://loongson.github.io/LoongArch-Documentation/Loongson-3A5000-usermanual-EN.html>

use bit_field::BitField;

use super::IoCsr;

/// Other function configuration register.
pub const OTHER_FUNC: usize = 0x420;
/// Enables extended I/O interrupts in [`OTHER_FUNC`].
pub const OTHER_FUNC_EXT_INT_EN: u64 = 1 << 48;

/// Per-core IPI status register; reading it returns the pending actions.
pub const IPI_STATUS: usize = 0x1000;
/// Per-core IPI enable register.
pub const IPI_EN: usize = 0x1004;
/// Per-core IPI set register.
pub const IPI_SET: usize = 0x1008;
/// Per-core IPI clear register, write one to clear.
pub const IPI_CLEAR: usize = 0x100c;
/// First per-core mailbox buffer. Slot `n` lives at `MAIL_BUF0 + n * 8`.
pub const MAIL_BUF0: usize = 0x1020;
/// Number of 64-bit mailbox slots per core.
pub const MAIL_SLOTS: usize = 4;

/// Port that raises one IPI vector on any core.
pub const IPI_SEND: usize = 0x1040;
/// Port that writes 32 bits into a mailbox of any core.
pub const MAIL_SEND: usize = 0x1048;
/// Port that writes bytes of a register on any node.
pub const ANY_SEND: usize = 0x1158;

/// Requests sent to a port wait until the destination has taken them.
pub const SEND_BLOCKING: u64 = 1 << 31;
/// Shift of the destination core id in a port request.
pub const SEND_CPU_SHIFT: usize = 16;
/// Shift of the mailbox box number in a `MAIL_SEND` request.
pub const MAIL_SEND_BOX_SHIFT: usize = 2;
/// Shift of the payload in a `MAIL_SEND` request.
pub const MAIL_SEND_BUF_SHIFT: usize = 32;
/// Mask of the payload in the high-half `MAIL_SEND` request.
pub const MAIL_SEND_H32_MASK: u64 = 0xffff_ffff_0000_0000;
/// Shift of the byte mask in an `ANY_SEND` request.
pub const ANY_SEND_MASK_SHIFT: usize = 27;
/// Shift of the payload in an `ANY_SEND` request.
pub const ANY_SEND_DATA_SHIFT: usize = 32;

/// EXTIOI node type (node map) registers, eight 32-bit words.
pub const EXTIOI_NODEMAP_BASE: usize = 0x14a0;
/// EXTIOI pin routing registers, eight bytes.
pub const EXTIOI_IPMAP_BASE: usize = 0x14c0;
/// EXTIOI enable registers, 256 bits.
pub const EXTIOI_EN_BASE: usize = 0x1600;
/// EXTIOI bounce registers, 256 bits.
pub const EXTIOI_BOUNCE_BASE: usize = 0x1680;
/// Per-core EXTIOI status registers, four 64-bit words, write one to clear.
pub const EXTIOI_ISR_BASE: usize = 0x1800;
/// EXTIOI per-vector route registers, one byte per vector.
pub const EXTIOI_ROUTE_BASE: usize = 0x1c00;

/// Fields of a decoded port request.
///
/// Used by the simulator and by tests to interpret captured port writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PortRequest {
    /// Destination core.
    pub cpu: u32,
    /// Low 16 bits: register address (`ANY_SEND`) or vector (`IPI_SEND`).
    pub addr: u32,
    /// Box number of a `MAIL_SEND` request.
    pub mailbox: u32,
    /// Byte mask of an `ANY_SEND` request, a set bit leaves the byte alone.
    pub byte_mask: u32,
    /// Payload.
    pub data: u32,
}

impl PortRequest {
    /// Decodes a request written to `port`.
    pub fn decode(port: usize, val: u64) -> Self {
        Self {
            cpu: val.get_bits(SEND_CPU_SHIFT..SEND_CPU_SHIFT + 10) as u32,
            addr: match port {
                IPI_SEND => val.get_bits(0..5) as u32,
                _ => val.get_bits(0..16) as u32,
            },
            mailbox: val.get_bits(MAIL_SEND_BOX_SHIFT..MAIL_SEND_BOX_SHIFT + 3) as u32,
            byte_mask: val.get_bits(ANY_SEND_MASK_SHIFT..ANY_SEND_MASK_SHIFT + 4) as u32,
            data: val.get_bits(32..64) as u32,
        }
    }
}

/// Writes `data` into the register at `addr` on the node of core `cpu`.
///
/// Bytes whose bit is set in `byte_mask` are left unchanged. The request
/// blocks until the destination has taken it; a destination that never
/// answers hangs the caller.
pub fn any_send(iocsr: &dyn IoCsr, addr: usize, data: u32, byte_mask: u32, cpu: u32) {
    let mut val = SEND_BLOCKING | addr as u64;
    val |= (cpu as u64) << SEND_CPU_SHIFT;
    val |= ((byte_mask & 0xf) as u64) << ANY_SEND_MASK_SHIFT;
    val |= (data as u64) << ANY_SEND_DATA_SHIFT;
    iocsr.write_d(ANY_SEND, val);
}
