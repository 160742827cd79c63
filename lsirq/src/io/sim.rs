// SPDX-License-Identifier: MPL-2.0

//! A register-level simulator of a Loongson machine.
//!
//! The simulator models the IOCSR space of every core (node-wide registers
//! are shared by the cores of a node, IPI and EXTIOI status registers are
//! private to each core), the `ANY_SEND`, `IPI_SEND` and `MAIL_SEND` ports,
//! the core control registers, and memory-mapped chipset windows. Every
//! register write is recorded in order so that tests can check write
//! sequences as well as final register state.
//!
//! The core that "executes" accesses made through [`Platform::iocsr`] and
//! [`Platform::core`] is selected with [`SimBoard::switch_to`].

use alloc::collections::BTreeMap;
use core::sync::atomic::{AtomicU32, Ordering};

use spin::Mutex;

use super::{CoreCsr, IoCsr, Mmio, Platform, regs};
use crate::prelude::*;

/// Where a recorded write went.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target {
    /// The IOCSR space, issued by the given core.
    IoCsr {
        /// The issuing core.
        core: u32,
    },
    /// A memory-mapped window.
    Mmio {
        /// Physical base of the window.
        window: u64,
    },
}

/// A recorded register write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IoWrite {
    /// Where the write went.
    pub target: Target,
    /// The register offset.
    pub reg: usize,
    /// The access width in bytes.
    pub width: usize,
    /// The written value.
    pub val: u64,
}

#[derive(Default)]
struct RegFile {
    bytes: BTreeMap<usize, u8>,
}

impl RegFile {
    fn read(&self, reg: usize, width: usize) -> u64 {
        (0..width).fold(0u64, |acc, i| {
            let byte = self.bytes.get(&(reg + i)).copied().unwrap_or(0);
            acc | (byte as u64) << (i * 8)
        })
    }

    fn write(&mut self, reg: usize, width: usize, val: u64) {
        for i in 0..width {
            self.bytes.insert(reg + i, (val >> (i * 8)) as u8);
        }
    }
}

#[derive(Default)]
struct CoreState {
    regs: RegFile,
    ecfg: u32,
    tlb_flushes: u32,
}

fn is_core_private(reg: usize) -> bool {
    (regs::IPI_STATUS..regs::IPI_SEND).contains(&reg)
        || (regs::EXTIOI_ISR_BASE..regs::EXTIOI_ISR_BASE + 0x20).contains(&reg)
}

struct SimState {
    cores_per_node: u32,
    current: AtomicU32,
    prid: AtomicU32,
    nodes: Vec<Mutex<RegFile>>,
    cores: Vec<Mutex<CoreState>>,
    windows: Mutex<BTreeMap<u64, Arc<SimMmio>>>,
    log: Arc<Mutex<Vec<IoWrite>>>,
}

/// A simulated machine.
#[derive(Clone)]
pub struct SimBoard {
    state: Arc<SimState>,
}

impl SimBoard {
    /// Creates a machine with `nr_cores` cores, `cores_per_node` on each node.
    pub fn new(nr_cores: u32, cores_per_node: u32) -> Self {
        assert!(cores_per_node > 0 && nr_cores > 0);
        let nr_nodes = nr_cores.div_ceil(cores_per_node);
        let state = SimState {
            cores_per_node,
            current: AtomicU32::new(0),
            prid: AtomicU32::new(0),
            nodes: (0..nr_nodes).map(|_| Mutex::new(RegFile::default())).collect(),
            cores: (0..nr_cores)
                .map(|_| Mutex::new(CoreState::default()))
                .collect(),
            windows: Mutex::new(BTreeMap::new()),
            log: Arc::new(Mutex::new(Vec::new())),
        };
        Self {
            state: Arc::new(state),
        }
    }

    /// Makes the following accesses execute on core `core`.
    pub fn switch_to(&self, core: u32) {
        assert!((core as usize) < self.state.cores.len());
        self.state.current.store(core, Ordering::Relaxed);
    }

    /// Returns the core that currently executes.
    pub fn current(&self) -> u32 {
        self.state.current.load(Ordering::Relaxed)
    }

    /// Sets the processor identification word of every core.
    pub fn set_prid(&self, prid: u32) {
        self.state.prid.store(prid, Ordering::Relaxed);
    }

    /// Reads a node-wide IOCSR register.
    pub fn node_read(&self, node: u32, reg: usize, width: usize) -> u64 {
        self.state.nodes[node as usize].lock().read(reg, width)
    }

    /// Reads a core-private IOCSR register.
    pub fn core_read(&self, core: u32, reg: usize, width: usize) -> u64 {
        self.state.cores[core as usize].lock().regs.read(reg, width)
    }

    /// Writes a core-private register without side effects or recording.
    pub fn core_poke(&self, core: u32, reg: usize, width: usize, val: u64) {
        self.state.cores[core as usize]
            .lock()
            .regs
            .write(reg, width, val);
    }

    /// Latches EXTIOI vector `vector` as pending on core `core`.
    pub fn raise_extioi(&self, core: u32, vector: usize) {
        let reg = regs::EXTIOI_ISR_BASE + (vector / 64) * 8;
        let mut state = self.state.cores[core as usize].lock();
        let val = state.regs.read(reg, 8) | 1 << (vector % 64);
        state.regs.write(reg, 8, val);
    }

    /// Returns the pending IPI actions of core `core`.
    pub fn ipi_status(&self, core: u32) -> u32 {
        self.core_read(core, regs::IPI_STATUS, 4) as u32
    }

    /// Returns mailbox slot `slot` of core `core`.
    pub fn mailbox(&self, core: u32, slot: usize) -> u64 {
        self.core_read(core, regs::MAIL_BUF0 + slot * 8, 8)
    }

    /// Returns the exception configuration register of core `core`.
    pub fn ecfg(&self, core: u32) -> u32 {
        self.state.cores[core as usize].lock().ecfg
    }

    /// Returns how many local TLB flushes core `core` performed.
    pub fn tlb_flushes(&self, core: u32) -> u32 {
        self.state.cores[core as usize].lock().tlb_flushes
    }

    /// Returns the memory-mapped window at `paddr`, creating it if needed.
    pub fn window(&self, paddr: u64, len: usize) -> Arc<SimMmio> {
        self.state
            .windows
            .lock()
            .entry(paddr)
            .or_insert_with(|| {
                Arc::new(SimMmio {
                    paddr,
                    len,
                    regs: Mutex::new(RegFile::default()),
                    set_clear: Mutex::new(Vec::new()),
                    write_one_clear: Mutex::new(Vec::new()),
                    log: self.state.log.clone(),
                })
            })
            .clone()
    }

    /// Returns every recorded write in issue order.
    pub fn writes(&self) -> Vec<IoWrite> {
        self.state.log.lock().clone()
    }

    /// Returns the recorded IOCSR writes to register `reg`.
    pub fn iocsr_writes_to(&self, reg: usize) -> Vec<IoWrite> {
        self.writes()
            .into_iter()
            .filter(|w| matches!(w.target, Target::IoCsr { .. }) && w.reg == reg)
            .collect()
    }

    /// Forgets every recorded write.
    pub fn clear_writes(&self) {
        self.state.log.lock().clear();
    }

    fn node_of(&self, core: u32) -> usize {
        (core / self.state.cores_per_node) as usize
    }

    fn record(&self, reg: usize, width: usize, val: u64) {
        self.state.log.lock().push(IoWrite {
            target: Target::IoCsr {
                core: self.current(),
            },
            reg,
            width,
            val,
        });
    }

    fn iocsr_read(&self, reg: usize, width: usize) -> u64 {
        let core = self.current();
        if is_core_private(reg) {
            self.core_read(core, reg, width)
        } else {
            self.node_read(self.node_of(core) as u32, reg, width)
        }
    }

    fn iocsr_write(&self, reg: usize, width: usize, val: u64) {
        self.record(reg, width, val);

        let core = self.current();
        match reg {
            regs::ANY_SEND => {
                let req = regs::PortRequest::decode(reg, val);
                let mut node = self.state.nodes[self.node_of(req.cpu)].lock();
                for i in 0..4 {
                    if req.byte_mask & (1 << i) == 0 {
                        let byte = (req.data >> (i * 8)) as u64 & 0xff;
                        node.write(req.addr as usize + i, 1, byte);
                    }
                }
            }
            regs::IPI_SEND => {
                let req = regs::PortRequest::decode(reg, val);
                let mut dest = self.state.cores[req.cpu as usize].lock();
                let status = dest.regs.read(regs::IPI_STATUS, 4) | 1 << req.addr;
                dest.regs.write(regs::IPI_STATUS, 4, status);
            }
            regs::MAIL_SEND => {
                let req = regs::PortRequest::decode(reg, val);
                let buf = regs::MAIL_BUF0 + req.mailbox as usize * 4;
                self.state.cores[req.cpu as usize]
                    .lock()
                    .regs
                    .write(buf, 4, req.data as u64);
            }
            regs::IPI_SET | regs::IPI_CLEAR => {
                let mut state = self.state.cores[core as usize].lock();
                let status = state.regs.read(regs::IPI_STATUS, 4);
                let status = if reg == regs::IPI_SET {
                    status | val
                } else {
                    status & !val
                };
                state.regs.write(regs::IPI_STATUS, 4, status);
            }
            _ if (regs::EXTIOI_ISR_BASE..regs::EXTIOI_ISR_BASE + 0x20).contains(&reg) => {
                let mut state = self.state.cores[core as usize].lock();
                let pending = state.regs.read(reg, width) & !val;
                state.regs.write(reg, width, pending);
            }
            _ if is_core_private(reg) => {
                self.state.cores[core as usize]
                    .lock()
                    .regs
                    .write(reg, width, val);
            }
            _ => {
                self.state.nodes[self.node_of(core)]
                    .lock()
                    .write(reg, width, val);
            }
        }
    }
}

impl IoCsr for SimBoard {
    fn read_w(&self, reg: usize) -> u32 {
        self.iocsr_read(reg, 4) as u32
    }

    fn read_d(&self, reg: usize) -> u64 {
        self.iocsr_read(reg, 8)
    }

    fn write_b(&self, reg: usize, val: u8) {
        self.iocsr_write(reg, 1, val as u64);
    }

    fn write_h(&self, reg: usize, val: u16) {
        self.iocsr_write(reg, 2, val as u64);
    }

    fn write_w(&self, reg: usize, val: u32) {
        self.iocsr_write(reg, 4, val as u64);
    }

    fn write_d(&self, reg: usize, val: u64) {
        self.iocsr_write(reg, 8, val);
    }
}

impl CoreCsr for SimBoard {
    fn cpuid(&self) -> u32 {
        self.current()
    }

    fn prid(&self) -> u32 {
        self.state.prid.load(Ordering::Relaxed)
    }

    fn ecfg(&self) -> u32 {
        self.state.cores[self.current() as usize].lock().ecfg
    }

    fn set_ecfg(&self, val: u32) {
        self.state.cores[self.current() as usize].lock().ecfg = val;
    }

    fn flush_tlb_local(&self) {
        self.state.cores[self.current() as usize].lock().tlb_flushes += 1;
    }
}

impl Platform for SimBoard {
    fn iocsr(&self) -> &dyn IoCsr {
        self
    }

    fn core(&self) -> &dyn CoreCsr {
        self
    }

    fn map_mmio(&self, paddr: u64, len: usize) -> Result<Arc<dyn Mmio>> {
        if paddr == 0 || len == 0 {
            return Err(crate::Error::InvalidArgs);
        }
        Ok(self.window(paddr, len))
    }
}

/// A simulated memory-mapped register window.
pub struct SimMmio {
    paddr: u64,
    len: usize,
    regs: Mutex<RegFile>,
    set_clear: Mutex<Vec<(usize, usize, usize)>>,
    write_one_clear: Mutex<Vec<usize>>,
    log: Arc<Mutex<Vec<IoWrite>>>,
}

impl SimMmio {
    /// Makes 32-bit writes to `set` OR into `target` and writes to `clear`
    /// clear the written bits of `target`.
    pub fn model_set_clear(&self, set: usize, clear: usize, target: usize) {
        self.set_clear.lock().push((set, clear, target));
    }

    /// Makes writes to `offset` clear the written bits.
    pub fn model_write_one_clear(&self, offset: usize) {
        self.write_one_clear.lock().push(offset);
    }

    /// Reads a register without recording.
    pub fn peek(&self, offset: usize, width: usize) -> u64 {
        self.regs.lock().read(offset, width)
    }

    /// Writes a register without side effects or recording.
    pub fn poke(&self, offset: usize, width: usize, val: u64) {
        self.regs.lock().write(offset, width, val);
    }

    /// Returns the physical base of the window.
    pub fn paddr(&self) -> u64 {
        self.paddr
    }

    fn write(&self, offset: usize, width: usize, val: u64) {
        assert!(offset + width <= self.len, "write beyond the window");
        self.log.lock().push(IoWrite {
            target: Target::Mmio { window: self.paddr },
            reg: offset,
            width,
            val,
        });

        let mut regs = self.regs.lock();
        for &(set, clear, target) in self.set_clear.lock().iter() {
            if offset == set || offset == clear {
                let old = regs.read(target, 4);
                let new = if offset == set { old | val } else { old & !val };
                regs.write(target, 4, new);
                return;
            }
        }
        if self.write_one_clear.lock().contains(&offset) {
            let pending = regs.read(offset, width) & !val;
            regs.write(offset, width, pending);
            return;
        }
        regs.write(offset, width, val);
    }
}

impl Mmio for SimMmio {
    fn read_w(&self, offset: usize) -> u32 {
        self.peek(offset, 4) as u32
    }

    fn read_d(&self, offset: usize) -> u64 {
        self.peek(offset, 8)
    }

    fn write_b(&self, offset: usize, val: u8) {
        self.write(offset, 1, val as u64);
    }

    fn write_w(&self, offset: usize, val: u32) {
        self.write(offset, 4, val as u64);
    }

    fn write_d(&self, offset: usize, val: u64) {
        self.write(offset, 8, val);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn any_send_writes_selected_bytes_on_the_target_node() {
        let board = SimBoard::new(8, 4);
        board.switch_to(0);
        regs::any_send(&board, regs::EXTIOI_ROUTE_BASE, 0xaabb_ccdd, 0b1101, 4);
        // Only byte 1 is written, and only on node 1.
        assert_eq!(board.node_read(1, regs::EXTIOI_ROUTE_BASE, 4), 0x0000_cc00);
        assert_eq!(board.node_read(0, regs::EXTIOI_ROUTE_BASE, 4), 0);
    }

    #[test]
    fn ports_reach_other_cores() {
        let board = SimBoard::new(4, 4);
        board.switch_to(0);
        board.write_w(regs::IPI_SEND, (regs::SEND_BLOCKING as u32) | 1 | 2 << 16);
        assert_eq!(board.ipi_status(2), 0b10);

        board.switch_to(2);
        assert_eq!(board.read_w(regs::IPI_STATUS), 0b10);
        board.write_w(regs::IPI_CLEAR, 0b10);
        assert_eq!(board.ipi_status(2), 0);
    }

    #[test]
    fn isr_is_write_one_to_clear() {
        let board = SimBoard::new(1, 1);
        board.raise_extioi(0, 3);
        board.raise_extioi(0, 70);
        board.write_d(regs::EXTIOI_ISR_BASE, 1 << 3);
        assert_eq!(board.read_d(regs::EXTIOI_ISR_BASE), 0);
        assert_eq!(board.read_d(regs::EXTIOI_ISR_BASE + 8), 1 << 6);
    }

    #[test]
    fn mmio_set_clear_model() {
        let board = SimBoard::new(1, 1);
        let window = board.window(0x1fe0_1400, 0x80);
        window.model_set_clear(0x28, 0x2c, 0x24);
        window.write_w(0x28, 0b1010);
        window.write_w(0x2c, 0b0010);
        assert_eq!(window.read_w(0x24), 0b1000);
        assert_eq!(board.writes().len(), 2);
    }
}
