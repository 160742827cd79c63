// SPDX-License-Identifier: MPL-2.0

//! The PCH-PIC, the pin-based interrupt controller of the south bridge.
//!
//! Each input pin is turned into a HyperTransport interrupt message whose
//! vector is programmed per pin. The PIC is thus a hierarchical child of
//! whichever controller receives those vectors: the EXTIOI in the extended
//! route model, the HT vector controller otherwise.
//!
//! Several PICs may be present. [`PchPicTable`] records them and hands each
//! one a window of GSIs and a window of parent vectors. The vectors past
//! the last PIC are left to MSIs.

use core::sync::atomic::{AtomicU32, Ordering};

use bit_field::BitField;
use log::{info, warn};

use crate::{
    Error,
    io::{Mmio, Platform},
    irq::{FlowHandler, FwNode, FwSpec, HwIrq, IrqChip, IrqCore, IrqDataRef, IrqDomain, IrqDomainOps, Trigger},
    prelude::*,
    sync::{RwLock, SpinLock},
};

/// Maximum number of PICs.
pub const MAX_PCH_PICS: usize = 4;
/// Size of the register window of one PIC.
pub const PCH_PIC_SIZE: usize = 0x400;

const PCH_PIC_MASK: usize = 0x20;
const PCH_PIC_HTMSI_EN: usize = 0x40;
const PCH_PIC_EDGE: usize = 0x60;
const PCH_PIC_CLR: usize = 0x80;
const PCH_PIC_AUTO0: usize = 0xc0;
const PCH_PIC_AUTO1: usize = 0xe0;
const PCH_PIC_ROUTE: usize = 0x100;
const PCH_PIC_HTVEC: usize = 0x200;
const PCH_PIC_POL: usize = 0x3e0;

// The route value selecting HT interrupt line 0.
const PCH_PIC_ROUTE_HT0: u8 = 1;

/// A registered PIC.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PchPicConfig {
    /// Firmware id.
    pub id: u32,
    /// Physical base of the register window.
    pub address: u64,
    /// Hardware version.
    pub version: u32,
    /// First GSI served.
    pub gsi_base: u32,
    /// Last GSI served.
    pub gsi_end: u32,
    /// Parent vector of pin 0.
    pub vec_base: u32,
}

impl PchPicConfig {
    /// Returns the number of pins.
    pub fn num_pins(&self) -> u32 {
        self.gsi_end - self.gsi_base + 1
    }

    /// Returns true if `gsi` is one of the pins.
    pub fn covers(&self, gsi: u32) -> bool {
        (self.gsi_base..=self.gsi_end).contains(&gsi)
    }

    /// Returns the firmware identity of the PIC's domain.
    pub fn fwnode(&self) -> FwNode {
        FwNode::Address(self.address)
    }
}

/// The table of registered PICs.
pub struct PchPicTable {
    pics: RwLock<Vec<PchPicConfig>>,
    msi_irqbase: AtomicU32,
}

impl PchPicTable {
    /// Creates an empty table. Vectors are handed out from 0.
    pub const fn new() -> Self {
        Self {
            pics: RwLock::new(Vec::new()),
            msi_irqbase: AtomicU32::new(0),
        }
    }

    /// Registers the PIC at `address`, serving GSIs from `gsi_base`.
    ///
    /// The number of pins is read from the PIC. Returns the table index.
    pub fn register(&self, platform: &dyn Platform, id: u32, address: u64, gsi_base: u32) -> Result<usize> {
        let mut pics = self.pics.write();
        if pics.len() >= MAX_PCH_PICS {
            warn!("pch-pic: max # of PCH_PICs ({}) exceeded, skipping", MAX_PCH_PICS);
            return Err(Error::NotEnoughResources);
        }
        if address == 0 {
            warn!("pch-pic: unsupported address 0x0");
            return Err(Error::InvalidArgs);
        }

        let regs = platform.map_mmio(address, PCH_PIC_SIZE)?;
        let id_reg = regs.read_d(0);
        let entries = id_reg.get_bits(48..56) as u32 + 1;
        let version = id_reg.get_bits(8..16) as u32;
        let gsi_end = gsi_base + entries - 1;
        if pics.iter().any(|pic| pic.gsi_base <= gsi_end && gsi_base <= pic.gsi_end) {
            warn!("pch-pic: GSIs {}-{} overlap a registered PIC", gsi_base, gsi_end);
            return Err(Error::Busy);
        }

        let vec_base = self.msi_irqbase.fetch_add(entries, Ordering::Relaxed);
        let idx = pics.len();
        pics.push(PchPicConfig {
            id,
            address,
            version,
            gsi_base,
            gsi_end,
            vec_base,
        });

        info!(
            "PCH_PIC[{}]: pch_pic_id {}, version {}, address {:#x}, IRQ {}-{}",
            idx, id, version, address, gsi_base, gsi_end
        );
        Ok(idx)
    }

    /// Returns the index of the PIC serving `gsi`.
    pub fn find(&self, gsi: u32) -> Option<usize> {
        self.pics.read().iter().position(|pic| pic.covers(gsi))
    }

    /// Returns the PIC at `idx`.
    pub fn get(&self, idx: usize) -> Option<PchPicConfig> {
        self.pics.read().get(idx).cloned()
    }

    /// Returns every registered PIC in registration order.
    pub fn all(&self) -> Vec<PchPicConfig> {
        self.pics.read().clone()
    }

    /// Returns the number of registered PICs.
    pub fn len(&self) -> usize {
        self.pics.read().len()
    }

    /// Returns true if no PIC is registered.
    pub fn is_empty(&self) -> bool {
        self.pics.read().is_empty()
    }

    /// Returns the first parent vector not used by a PIC.
    pub fn msi_irqbase(&self) -> u32 {
        self.msi_irqbase.load(Ordering::Relaxed)
    }
}

impl Default for PchPicTable {
    fn default() -> Self {
        Self::new()
    }
}

/// A PIC driver instance.
pub struct PchPic {
    regs: Arc<dyn Mmio>,
    vec_base: u32,
    num_pins: u32,
    lock: SpinLock<()>,
}

fn bit_reg(base: usize, pin: HwIrq) -> (usize, u32) {
    (base + (pin as usize / 32) * 4, 1 << (pin % 32))
}

impl PchPic {
    fn update_bit(&self, base: usize, pin: HwIrq, set: bool) {
        let (reg, bit) = bit_reg(base, pin);
        let _guard = self.lock.lock_irq_disabled();
        let val = self.regs.read_w(reg);
        let val = if set { val | bit } else { val & !bit };
        self.regs.write_w(reg, val);
    }

    fn reset(&self) {
        for pin in 0..self.num_pins as usize {
            // Pin i raises parent vector vec_base + i.
            self.regs.write_b(PCH_PIC_HTVEC + pin, (self.vec_base as usize + pin) as u8);
            self.regs.write_b(PCH_PIC_ROUTE + pin, PCH_PIC_ROUTE_HT0);
        }
        for i in 0..2 {
            self.regs.write_w(PCH_PIC_MASK + 4 * i, u32::MAX);
            self.regs.write_w(PCH_PIC_CLR + 4 * i, u32::MAX);
            self.regs.write_w(PCH_PIC_AUTO0 + 4 * i, 0);
            self.regs.write_w(PCH_PIC_AUTO1 + 4 * i, 0);
            self.regs.write_w(PCH_PIC_HTMSI_EN + 4 * i, u32::MAX);
        }
    }
}

impl IrqChip for PchPic {
    fn name(&self) -> &'static str {
        "PCH-PIC"
    }

    fn mask(&self, data: &IrqDataRef<'_>) {
        self.update_bit(PCH_PIC_MASK, data.hwirq(), true);
        data.mask_parent();
    }

    fn unmask(&self, data: &IrqDataRef<'_>) {
        data.unmask_parent();
        self.update_bit(PCH_PIC_MASK, data.hwirq(), false);
    }

    fn ack(&self, data: &IrqDataRef<'_>) {
        let (reg, bit) = bit_reg(PCH_PIC_EDGE, data.hwirq());
        if self.regs.read_w(reg) & bit != 0 {
            let _guard = self.lock.lock_irq_disabled();
            let (clr, bit) = bit_reg(PCH_PIC_CLR, data.hwirq());
            self.regs.write_w(clr, bit);
        }
        data.ack_parent();
    }

    fn set_type(&self, data: &IrqDataRef<'_>, trigger: Trigger) -> Result<()> {
        let pin = data.hwirq();
        let (edge, high) = match trigger {
            Trigger::EdgeRising => (true, true),
            Trigger::EdgeFalling => (true, false),
            Trigger::LevelHigh => (false, true),
            Trigger::LevelLow => (false, false),
            Trigger::None => return Ok(()),
        };
        self.update_bit(PCH_PIC_EDGE, pin, edge);
        // A set polarity bit means active low.
        self.update_bit(PCH_PIC_POL, pin, !high);
        Ok(())
    }

    fn set_affinity(&self, data: &IrqDataRef<'_>, mask: &CpuSet, force: bool) -> Result<CpuSet> {
        data.set_affinity_parent(mask, force)
    }
}

struct PchPicOps {
    chip: Arc<PchPic>,
}

impl IrqDomainOps for PchPicOps {
    fn alloc(
        &self,
        core: &IrqCore,
        domain: &Arc<IrqDomain>,
        virq: Virq,
        nr_irqs: u32,
        spec: &FwSpec,
    ) -> Result<()> {
        let (pin, _) = self.translate(spec)?;
        if pin + nr_irqs > self.chip.num_pins {
            return Err(Error::InvalidArgs);
        }
        for i in 0..nr_irqs {
            let parent_spec = FwSpec::one(self.chip.vec_base + pin + i);
            core.alloc_irqs_parent(domain, virq + i, 1, &parent_spec)?;
            core.set_info(domain, virq + i, pin + i, self.chip.clone(), FlowHandler::Level)?;
        }
        Ok(())
    }

    fn free(&self, core: &IrqCore, domain: &Arc<IrqDomain>, virq: Virq, nr_irqs: u32) {
        core.free_irqs_parent(domain, virq, nr_irqs);
        core.reset_irq_data(domain, virq, nr_irqs);
    }
}

/// Initializes the PIC described by `config` below `parent`.
pub fn init(core: &IrqCore, platform: &dyn Platform, parent: &Arc<IrqDomain>, config: &PchPicConfig) -> Result<Arc<IrqDomain>> {
    let chip = Arc::new(PchPic {
        regs: platform.map_mmio(config.address, PCH_PIC_SIZE)?,
        vec_base: config.vec_base,
        num_pins: config.num_pins(),
        lock: SpinLock::new(()),
    });
    chip.reset();

    core.create_linear_domain(
        "PCH-PIC",
        config.fwnode(),
        config.num_pins() as usize,
        Some(parent),
        Arc::new(PchPicOps { chip }),
    )
}
