// SPDX-License-Identifier: MPL-2.0

//! The HyperTransport vector controller.
//!
//! In the line route model, south-bridge interrupts arrive as HT interrupt
//! messages and are latched in up to eight 32-bit status registers, each
//! signalled through its own LIOINTC line. Status bits are write-one-to-clear.

use log::{info, warn};

use crate::{
    Error,
    io::{Mmio, Platform},
    irq::{
        ChainedHandler, FlowHandler, FwNode, FwSpec, HwIrq, IrqChip, IrqCore, IrqDataRef, IrqDesc,
        IrqDomain, IrqDomainOps,
    },
    prelude::*,
    sync::SpinLock,
};

/// Maximum number of status registers, and of parent lines.
pub const HTVEC_MAX_PARENT_IRQ: usize = 8;
/// Vectors per status register.
pub const VEC_COUNT_PER_REG: usize = 32;
/// Size of the register window.
pub const HTVEC_MEM_SIZE: usize = 0x40;
/// The LIOINTC line of the first status register.
pub const HTVEC_FIRST_LIOINTC_LINE: HwIrq = 24;

const HTVEC_EN_OFF: usize = 0x20;

const fn isr_reg(idx: usize) -> usize {
    idx * 4
}

const fn en_reg(idx: usize) -> usize {
    HTVEC_EN_OFF + idx * 4
}

/// A HT vector controller.
pub struct Htvec {
    regs: Arc<dyn Mmio>,
    num_parents: usize,
    en_cache: SpinLock<[u32; HTVEC_MAX_PARENT_IRQ]>,
}

impl Htvec {
    /// Returns the number of vectors.
    pub fn num_vectors(&self) -> usize {
        self.num_parents * VEC_COUNT_PER_REG
    }

    fn set_enabled(&self, vector: HwIrq, enabled: bool) {
        let idx = vector as usize / VEC_COUNT_PER_REG;
        let bit = 1u32 << (vector as usize % VEC_COUNT_PER_REG);
        let mut en = self.en_cache.lock_irq_disabled();
        if enabled {
            en[idx] |= bit;
        } else {
            en[idx] &= !bit;
        }
        self.regs.write_w(en_reg(idx), en[idx]);
    }

    fn reset(&self) {
        let en = self.en_cache.lock_irq_disabled();
        for idx in 0..self.num_parents {
            self.regs.write_w(en_reg(idx), en[idx]);
            self.regs.write_w(isr_reg(idx), u32::MAX);
        }
    }
}

impl IrqChip for Htvec {
    fn name(&self) -> &'static str {
        "htvec"
    }

    fn mask(&self, data: &IrqDataRef<'_>) {
        self.set_enabled(data.hwirq(), false);
    }

    fn unmask(&self, data: &IrqDataRef<'_>) {
        self.set_enabled(data.hwirq(), true);
    }
}

struct HtvecOps {
    chip: Arc<Htvec>,
}

impl IrqDomainOps for HtvecOps {
    fn alloc(
        &self,
        core: &IrqCore,
        domain: &Arc<IrqDomain>,
        virq: Virq,
        nr_irqs: u32,
        spec: &FwSpec,
    ) -> Result<()> {
        let (hwirq, _) = self.translate(spec)?;
        if (hwirq + nr_irqs) as usize > self.chip.num_vectors() {
            return Err(Error::InvalidArgs);
        }
        for i in 0..nr_irqs {
            core.set_info(domain, virq + i, hwirq + i, self.chip.clone(), FlowHandler::Edge)?;
        }
        Ok(())
    }
}

struct HtvecCascade {
    chip: Arc<Htvec>,
    domain: Arc<IrqDomain>,
}

impl ChainedHandler for HtvecCascade {
    fn handle(&self, core: &IrqCore, desc: &IrqDesc) {
        let _chained = desc.chained_enter();

        let mut handled = false;
        for idx in 0..self.chip.num_parents {
            let mut pending = self.chip.regs.read_w(isr_reg(idx));
            self.chip.regs.write_w(isr_reg(idx), pending);
            while pending != 0 {
                let bit = pending.trailing_zeros();
                let vector = (idx * VEC_COUNT_PER_REG) as u32 + bit;
                if let Err(err) = core.handle_domain_irq(&self.domain, vector) {
                    warn!("htvec: vector {} not handled: {:?}", vector, err);
                }
                pending &= !(1 << bit);
                handled = true;
            }
        }

        if !handled {
            core.note_spurious();
        }
    }
}

/// Firmware identity of the HT vector domain at `base`.
pub const fn fwnode(base: u64) -> FwNode {
    FwNode::Address(base)
}

/// Initializes the controller at `base`, cascaded from `num_parents`
/// consecutive lines of the LIOINTC starting at line 24.
pub fn init(
    core: &IrqCore,
    platform: &dyn Platform,
    liointc_domain: &Arc<IrqDomain>,
    base: u64,
    num_parents: usize,
) -> Result<Arc<IrqDomain>> {
    if num_parents == 0 || num_parents > HTVEC_MAX_PARENT_IRQ {
        return Err(Error::InvalidArgs);
    }

    let chip = Arc::new(Htvec {
        regs: platform.map_mmio(base, HTVEC_MEM_SIZE)?,
        num_parents,
        en_cache: SpinLock::new([0; HTVEC_MAX_PARENT_IRQ]),
    });
    chip.reset();

    let domain = core.create_linear_domain(
        "HTVEC",
        fwnode(base),
        chip.num_vectors(),
        None,
        Arc::new(HtvecOps { chip: chip.clone() }),
    )?;

    for idx in 0..num_parents {
        let line = HTVEC_FIRST_LIOINTC_LINE + idx as HwIrq;
        let virq = core.create_mapping(liointc_domain, &FwSpec::one(line))?;
        core.set_chained_handler(
            virq,
            Arc::new(HtvecCascade {
                chip: chip.clone(),
                domain: domain.clone(),
            }),
        )?;
    }

    info!("htvec: {} vectors at {:#x}", chip.num_vectors(), base);
    Ok(domain)
}

#[cfg(test)]
mod test {
    use core::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::{
        boot::RouteModel,
        io::sim::SimBoard,
        irqchip::{cpu_intc, liointc},
    };

    const LIOINTC_BASE: u64 = 0x1fe0_1400;
    const BASE: u64 = 0x0efd_fb00_0080;

    #[test]
    fn vectors_dispatch_through_liointc_lines() {
        let board = SimBoard::new(1, 1);
        let window = board.window(BASE, HTVEC_MEM_SIZE);
        for idx in 0..2 {
            window.model_write_one_clear(isr_reg(idx));
        }
        let lio_window = board.window(LIOINTC_BASE, liointc::LIOINTC_MEM_SIZE);

        let core = IrqCore::new();
        let cpu = cpu_intc::init(&core, Arc::new(board.clone())).unwrap();
        let (_, lio) = liointc::init(
            &core,
            &board,
            &cpu,
            LIOINTC_BASE,
            &liointc::DEFAULT_PARENTS,
            RouteModel::Line,
        )
        .unwrap();
        let domain = init(&core, &board, &lio, BASE, 2).unwrap();
        assert_eq!(domain.size(), 64);
        assert_eq!(init(&core, &board, &lio, BASE + 0x100, 9), Err(Error::InvalidArgs));

        let hits = Arc::new(AtomicU32::new(0));
        let virq = core.create_mapping(&domain, &FwSpec::one(37)).unwrap();
        let counter = hits.clone();
        core.request_irq(virq, "dev", move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        })
        .unwrap();
        assert_eq!(window.peek(en_reg(1), 4), 1 << 5);

        window.poke(isr_reg(1), 4, 1 << 5);
        // Line 25 of the LIOINTC carries the second status register.
        lio_window.poke(0x40, 4, 1 << 25);
        let bridge = core.find_mapping(&cpu, cpu_intc::LOONGSON_BRIDGE_IRQ).unwrap();
        core.generic_handle_irq(bridge).unwrap();

        assert_eq!(hits.load(Ordering::Relaxed), 1);
        assert_eq!(window.peek(isr_reg(1), 4), 0);
    }
}
