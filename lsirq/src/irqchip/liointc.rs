// SPDX-License-Identifier: MPL-2.0

//! The local I/O interrupt controller (LIOINTC).
//!
//! 32 level-triggered lines share one status register. Each line has a
//! route byte selecting the core interrupt pin (high nibble) and the core
//! (low nibble) it is delivered to. The route bytes are computed once and
//! kept so that resume can write them back unchanged.

use log::{info, warn};

use super::cpu_intc::{INT_HWI0, LOONGSON_BRIDGE_IRQ};
use crate::{
    boot::RouteModel,
    io::{Mmio, Platform},
    irq::{
        ChainedHandler, FlowHandler, FwNode, FwSpec, HwIrq, IrqChip, IrqCore, IrqDataRef, IrqDesc,
        IrqDomain, IrqDomainOps,
    },
    pm::SyscoreOps,
    prelude::*,
    sync::SpinLock,
};

/// Number of lines.
pub const LIOINTC_NUM_LINES: usize = 32;
/// Size of the register window.
pub const LIOINTC_MEM_SIZE: usize = 0x80;

const LIOINTC_REG_INTC_STATUS: usize = 0x40;
const LIOINTC_REG_INTC_EN_STATUS: usize = 0x24;
const LIOINTC_REG_INTC_ENABLE: usize = 0x28;
const LIOINTC_REG_INTC_DISABLE: usize = 0x2c;
const LIOINTC_REG_INTC_EDGE: usize = 0x38;

const LIOINTC_SHIFT_INTX: u8 = 4;
// Every line is delivered to core 0.
const LIOINTC_ROUTE_CORE0: u8 = 1;

/// Lines delivered through the first parent pin.
pub const LIOINTC_VECS_TO_IP2: u32 = 0x00ff_fffe;
/// Lines delivered through the second parent pin.
pub const LIOINTC_VECS_TO_IP3: u32 = 0xff00_0000;

/// A core interrupt pin the controller drives, and the lines it carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LiointcParent {
    /// The core interrupt line.
    pub line: HwIrq,
    /// The lines routed to it.
    pub int_map: u32,
}

/// The two parent pins of the default wiring.
pub const DEFAULT_PARENTS: [LiointcParent; 2] = [
    LiointcParent {
        line: INT_HWI0,
        int_map: LIOINTC_VECS_TO_IP2,
    },
    LiointcParent {
        line: LOONGSON_BRIDGE_IRQ,
        int_map: LIOINTC_VECS_TO_IP3,
    },
];

/// A LIOINTC instance.
pub struct Liointc {
    regs: Arc<dyn Mmio>,
    map_cache: [u8; LIOINTC_NUM_LINES],
    mask_cache: SpinLock<u32>,
}

impl Liointc {
    fn new(regs: Arc<dyn Mmio>, parents: &[LiointcParent]) -> Self {
        let mut map_cache = [0u8; LIOINTC_NUM_LINES];
        for parent in parents {
            let Some(pin) = parent.line.checked_sub(INT_HWI0).filter(|pin| *pin < 4) else {
                warn!("liointc: parent line {} is not a hardware pin", parent.line);
                continue;
            };
            for (line, route) in map_cache.iter_mut().enumerate() {
                if parent.int_map & (1 << line) != 0 {
                    *route = (1 << pin) << LIOINTC_SHIFT_INTX;
                }
            }
        }
        for route in map_cache.iter_mut() {
            *route |= LIOINTC_ROUTE_CORE0;
        }
        Self {
            regs,
            map_cache,
            mask_cache: SpinLock::new(0),
        }
    }

    /// Returns the route byte of `line`.
    pub fn route_of(&self, line: usize) -> u8 {
        self.map_cache[line]
    }

    /// Returns the lines software has enabled.
    pub fn enabled_lines(&self) -> u32 {
        *self.mask_cache.lock_irq_disabled()
    }

    /// Returns the enable state latched by the hardware.
    pub fn hw_enabled_lines(&self) -> u32 {
        self.regs.read_w(LIOINTC_REG_INTC_EN_STATUS)
    }

    fn write_routes(&self) {
        for (line, route) in self.map_cache.iter().enumerate() {
            self.regs.write_b(line, *route);
        }
    }

    fn reset(&self) {
        self.regs.write_w(LIOINTC_REG_INTC_DISABLE, u32::MAX);
        // All lines are level triggered.
        self.regs.write_w(LIOINTC_REG_INTC_EDGE, 0);
        self.write_routes();
    }

    fn disable_line(&self, line: HwIrq) {
        let mut mask_cache = self.mask_cache.lock_irq_disabled();
        self.regs.write_w(LIOINTC_REG_INTC_DISABLE, 1 << line);
        *mask_cache &= !(1 << line);
    }

    fn enable_line(&self, line: HwIrq) {
        let mut mask_cache = self.mask_cache.lock_irq_disabled();
        self.regs.write_w(LIOINTC_REG_INTC_ENABLE, 1 << line);
        *mask_cache |= 1 << line;
    }
}

impl IrqChip for Liointc {
    fn name(&self) -> &'static str {
        "LIOINTC"
    }

    fn mask(&self, data: &IrqDataRef<'_>) {
        self.disable_line(data.hwirq());
    }

    fn unmask(&self, data: &IrqDataRef<'_>) {
        self.enable_line(data.hwirq());
    }

    fn mask_ack(&self, data: &IrqDataRef<'_>) {
        self.disable_line(data.hwirq());
    }
}

impl SyscoreOps for Liointc {
    fn name(&self) -> &'static str {
        "liointc"
    }

    fn resume(&self) {
        let mask_cache = self.mask_cache.lock_irq_disabled();
        self.regs.write_w(LIOINTC_REG_INTC_DISABLE, u32::MAX);
        self.write_routes();
        self.regs.write_w(LIOINTC_REG_INTC_ENABLE, *mask_cache);
    }
}

struct LiointcOps {
    chip: Arc<Liointc>,
}

impl IrqDomainOps for LiointcOps {
    fn alloc(
        &self,
        core: &IrqCore,
        domain: &Arc<IrqDomain>,
        virq: Virq,
        nr_irqs: u32,
        spec: &FwSpec,
    ) -> Result<()> {
        let (hwirq, _) = self.translate(spec)?;
        if (hwirq + nr_irqs) as usize > LIOINTC_NUM_LINES {
            return Err(crate::Error::InvalidArgs);
        }
        for i in 0..nr_irqs {
            core.set_info(domain, virq + i, hwirq + i, self.chip.clone(), FlowHandler::Level)?;
        }
        Ok(())
    }
}

struct LiointcCascade {
    chip: Arc<Liointc>,
    domain: Arc<IrqDomain>,
}

impl ChainedHandler for LiointcCascade {
    fn handle(&self, core: &IrqCore, desc: &IrqDesc) {
        let _chained = desc.chained_enter();

        let mut pending = self.chip.regs.read_w(LIOINTC_REG_INTC_STATUS);
        while pending != 0 {
            let line = pending.trailing_zeros();
            if let Err(err) = core.handle_domain_irq(&self.domain, line) {
                warn!("liointc: line {} not handled: {:?}", line, err);
            }
            pending &= !(1 << line);
        }
    }
}

/// Initializes the LIOINTC at `base` and cascades it from the core
/// interrupt lines of `parents`.
///
/// The bridge pin is left alone in the extended route model, where it
/// belongs to the EXTIOI.
pub fn init(
    core: &IrqCore,
    platform: &dyn Platform,
    parent_domain: &Arc<IrqDomain>,
    base: u64,
    parents: &[LiointcParent],
    model: RouteModel,
) -> Result<(Arc<Liointc>, Arc<IrqDomain>)> {
    let regs = platform.map_mmio(base, LIOINTC_MEM_SIZE)?;
    let chip = Arc::new(Liointc::new(regs, parents));
    chip.reset();

    let domain = core.create_linear_domain(
        "LIOINTC",
        FwNode::Address(base),
        LIOINTC_NUM_LINES,
        None,
        Arc::new(LiointcOps { chip: chip.clone() }),
    )?;

    for parent in parents {
        if parent.line == LOONGSON_BRIDGE_IRQ && model == RouteModel::Ext {
            continue;
        }
        let virq = core.create_mapping(parent_domain, &FwSpec::one(parent.line))?;
        core.set_chained_handler(
            virq,
            Arc::new(LiointcCascade {
                chip: chip.clone(),
                domain: domain.clone(),
            }),
        )?;
    }

    info!("liointc: {} lines at {:#x}", LIOINTC_NUM_LINES, base);
    Ok((chip, domain))
}
