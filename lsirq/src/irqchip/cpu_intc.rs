// SPDX-License-Identifier: MPL-2.0

//! The core interrupt controller.
//!
//! Each core has 13 interrupt lines whose enable bits live in the `LIE`
//! field of the ECFG register. The lines are per-CPU: masking a line only
//! affects the executing core.

use crate::{
    Error,
    io::Platform,
    irq::{FlowHandler, FwNode, FwSpec, HwIrq, IrqChip, IrqCore, IrqDataRef, IrqDomain, IrqDomainOps},
    prelude::*,
};

/// Software interrupt 0.
pub const INT_SWI0: HwIrq = 0;
/// Software interrupt 1.
pub const INT_SWI1: HwIrq = 1;
/// Hardware interrupt 0, wired to the LIOINTC.
pub const INT_HWI0: HwIrq = 2;
/// Hardware interrupt 1, wired to the bridge (EXTIOI or HT) output.
pub const INT_HWI1: HwIrq = 3;
/// Hardware interrupt 7.
pub const INT_HWI7: HwIrq = 9;
/// Performance counter overflow.
pub const INT_PCOV: HwIrq = 10;
/// Constant timer.
pub const INT_TIMER: HwIrq = 11;
/// Inter-processor interrupt.
pub const INT_IPI: HwIrq = 12;

/// The LIOINTC parent pin.
pub const LOONGSON_LINTC_IRQ: HwIrq = INT_HWI0;
/// The bridge parent pin.
pub const LOONGSON_BRIDGE_IRQ: HwIrq = INT_HWI1;

/// Number of core interrupt lines.
pub const NR_CPU_LINES: usize = 13;
/// Mask of the line-enable field of ECFG.
pub const ECFG_LIE_MASK: u32 = (1 << NR_CPU_LINES) - 1;

/// Firmware identity of the core interrupt controller domain.
pub const CPU_INTC_FWNODE: FwNode = FwNode::Named("cpuintc");

/// The ECFG line-enable bit of `line`.
pub const fn ecfg_bit(line: HwIrq) -> u32 {
    1 << line
}

/// Line enable and disable through ECFG.
pub struct CpuIntc {
    platform: Arc<dyn Platform>,
}

impl CpuIntc {
    fn set_line(&self, line: HwIrq, enabled: bool) {
        let core = self.platform.core();
        let ecfg = core.ecfg();
        let ecfg = if enabled {
            ecfg | ecfg_bit(line)
        } else {
            ecfg & !ecfg_bit(line)
        };
        core.set_ecfg(ecfg);
    }
}

impl IrqChip for CpuIntc {
    fn name(&self) -> &'static str {
        "CPUINTC"
    }

    fn mask(&self, data: &IrqDataRef<'_>) {
        self.set_line(data.hwirq(), false);
    }

    fn unmask(&self, data: &IrqDataRef<'_>) {
        self.set_line(data.hwirq(), true);
    }

    // Each core routes its own lines, there is nothing to program.
    fn set_affinity(&self, _data: &IrqDataRef<'_>, mask: &CpuSet, _force: bool) -> Result<CpuSet> {
        Ok(mask.clone())
    }
}

struct CpuIntcOps {
    chip: Arc<CpuIntc>,
}

impl IrqDomainOps for CpuIntcOps {
    fn alloc(
        &self,
        core: &IrqCore,
        domain: &Arc<IrqDomain>,
        virq: Virq,
        nr_irqs: u32,
        spec: &FwSpec,
    ) -> Result<()> {
        let (hwirq, _) = self.translate(spec)?;
        if (hwirq + nr_irqs) as usize > NR_CPU_LINES {
            return Err(Error::InvalidArgs);
        }
        for i in 0..nr_irqs {
            core.set_info(domain, virq + i, hwirq + i, self.chip.clone(), FlowHandler::PerCpu)?;
        }
        Ok(())
    }
}

/// Creates the root domain of the core lines.
pub fn init(core: &IrqCore, platform: Arc<dyn Platform>) -> Result<Arc<IrqDomain>> {
    let chip = Arc::new(CpuIntc { platform });
    core.create_linear_domain(
        "CPUINTC",
        CPU_INTC_FWNODE,
        NR_CPU_LINES,
        None,
        Arc::new(CpuIntcOps { chip }),
    )
}
