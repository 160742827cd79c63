// SPDX-License-Identifier: MPL-2.0

use core::{
    fmt,
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
};

use smallvec::SmallVec;

use super::{HwIrq, IrqChip, IrqCore, IrqDomain, MsiMsg, Virq};
use crate::{
    Error,
    prelude::*,
    sync::{RwLock, SpinLock},
};

/// One level of the hierarchy of a virtual IRQ: what the IRQ is called in
/// one domain and which chip drives it there.
#[derive(Clone)]
pub struct IrqData {
    pub(super) domain: Arc<IrqDomain>,
    pub(super) hwirq: HwIrq,
    pub(super) chip: Option<Arc<dyn IrqChip>>,
}

impl IrqData {
    pub(super) fn empty(domain: Arc<IrqDomain>) -> Self {
        Self {
            domain,
            hwirq: 0,
            chip: None,
        }
    }
}

/// A borrowed view of one hierarchy level and the levels above it.
#[derive(Clone, Copy)]
pub struct IrqDataRef<'a> {
    virq: Virq,
    level: &'a IrqData,
    parents: &'a [IrqData],
}

impl<'a> IrqDataRef<'a> {
    /// Views the outermost level of `levels`.
    pub(super) fn new(virq: Virq, levels: &'a [IrqData]) -> Option<Self> {
        let (level, parents) = levels.split_first()?;
        Some(Self {
            virq,
            level,
            parents,
        })
    }

    /// Returns the virtual IRQ number.
    pub fn virq(&self) -> Virq {
        self.virq
    }

    /// Returns the hardware interrupt number at this level.
    pub fn hwirq(&self) -> HwIrq {
        self.level.hwirq
    }

    /// Returns the domain of this level.
    pub fn domain(&self) -> &'a Arc<IrqDomain> {
        &self.level.domain
    }

    /// Returns the chip of this level.
    pub fn chip(&self) -> Option<&'a Arc<dyn IrqChip>> {
        self.level.chip.as_ref()
    }

    /// Returns the next level towards the root.
    pub fn parent(&self) -> Option<IrqDataRef<'a>> {
        IrqDataRef::new(self.virq, self.parents)
    }

    /// Masks the line at this level.
    pub fn mask(&self) {
        if let Some(chip) = self.chip() {
            chip.mask(self);
        }
    }

    /// Unmasks the line at this level.
    pub fn unmask(&self) {
        if let Some(chip) = self.chip() {
            chip.unmask(self);
        }
    }

    /// Acknowledges the line at this level.
    pub fn ack(&self) {
        if let Some(chip) = self.chip() {
            chip.ack(self);
        }
    }

    /// Masks and acknowledges the line at this level.
    pub fn mask_ack(&self) {
        if let Some(chip) = self.chip() {
            chip.mask_ack(self);
        }
    }

    /// Routes the line at this level.
    pub fn set_affinity(&self, mask: &CpuSet, force: bool) -> Result<CpuSet> {
        match self.chip() {
            Some(chip) => chip.set_affinity(self, mask, force),
            None => Err(Error::NotSupported),
        }
    }

    /// Masks the line at the parent level.
    pub fn mask_parent(&self) {
        if let Some(parent) = self.parent() {
            parent.mask();
        }
    }

    /// Unmasks the line at the parent level.
    pub fn unmask_parent(&self) {
        if let Some(parent) = self.parent() {
            parent.unmask();
        }
    }

    /// Acknowledges the line at the parent level.
    pub fn ack_parent(&self) {
        if let Some(parent) = self.parent() {
            parent.ack();
        }
    }

    /// Routes the line at the parent level.
    pub fn set_affinity_parent(&self, mask: &CpuSet, force: bool) -> Result<CpuSet> {
        self.parent()
            .ok_or(Error::NotSupported)?
            .set_affinity(mask, force)
    }

    /// Returns the MSI message of the first level, from this one upwards,
    /// that can compose one.
    pub fn compose_msi_msg(&self) -> Option<MsiMsg> {
        let mut next = Some(*self);
        while let Some(data) = next {
            if let Some(msg) = data.chip().and_then(|chip| chip.compose_msi_msg(&data)) {
                return Some(msg);
            }
            next = data.parent();
        }
        None
    }
}

/// A handler that demultiplexes a cascaded controller.
pub trait ChainedHandler: Send + Sync {
    /// Handles one interrupt of the parent line `desc`.
    fn handle(&self, core: &IrqCore, desc: &IrqDesc);
}

/// The flow handler of a virtual IRQ.
#[derive(Clone, Default)]
pub enum FlowHandler {
    /// Nothing is expected on the line.
    #[default]
    Bad,
    /// Level triggered: masked and acknowledged while handled.
    Level,
    /// Edge triggered: acknowledged before handling.
    Edge,
    /// Banked per CPU: acknowledged, never masked.
    PerCpu,
    /// Actions only, the chip needs no care.
    Simple,
    /// A cascade: the handler dispatches the interrupts of a child controller.
    Chained(Arc<dyn ChainedHandler>),
}

impl fmt::Debug for FlowHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bad => "Bad",
            Self::Level => "Level",
            Self::Edge => "Edge",
            Self::PerCpu => "PerCpu",
            Self::Simple => "Simple",
            Self::Chained(_) => "Chained",
        };
        f.write_str(name)
    }
}

/// A handler of a device interrupt.
pub type IrqHandler = dyn Fn(Virq) + Send + Sync;

pub(super) struct IrqAction {
    pub(super) name: &'static str,
    pub(super) handler: Arc<IrqHandler>,
}

/// The descriptor of a virtual IRQ.
pub struct IrqDesc {
    virq: Virq,
    levels: RwLock<SmallVec<[IrqData; 3]>>,
    pub(super) flow: RwLock<FlowHandler>,
    pub(super) actions: RwLock<Vec<IrqAction>>,
    affinity: SpinLock<CpuSet>,
    effective: SpinLock<CpuSet>,
    masked: AtomicBool,
    count: AtomicU64,
}

impl IrqDesc {
    pub(super) fn new(virq: Virq, levels: SmallVec<[IrqData; 3]>) -> Self {
        Self {
            virq,
            levels: RwLock::new(levels),
            flow: RwLock::new(FlowHandler::Bad),
            actions: RwLock::new(Vec::new()),
            affinity: SpinLock::new(CpuSet::from(CpuId::bsp())),
            effective: SpinLock::new(CpuSet::from(CpuId::bsp())),
            masked: AtomicBool::new(true),
            count: AtomicU64::new(0),
        }
    }

    /// Returns the virtual IRQ number.
    pub fn virq(&self) -> Virq {
        self.virq
    }

    /// Returns how many times the IRQ has been handled.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub(super) fn inc_count(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the CPUs the IRQ was last asked to be routed to.
    pub fn affinity(&self) -> CpuSet {
        self.affinity.lock_irq_disabled().clone()
    }

    /// Returns the CPUs the hardware actually routes the IRQ to.
    pub fn effective_affinity(&self) -> CpuSet {
        self.effective.lock_irq_disabled().clone()
    }

    pub fn update_affinity(&self, requested: &CpuSet, effective: CpuSet) {
        *self.affinity.lock_irq_disabled() = requested.clone();
        *self.effective.lock_irq_disabled() = effective;
    }

    /// Returns the flow handler.
    pub fn flow(&self) -> FlowHandler {
        self.flow.read().clone()
    }

    /// Returns true if the IRQ has a usable flow handler.
    pub fn is_active(&self) -> bool {
        !matches!(*self.flow.read(), FlowHandler::Bad)
    }

    /// Returns true if the IRQ is masked at its outermost chip.
    pub fn is_masked(&self) -> bool {
        self.masked.load(Ordering::Relaxed)
    }

    /// Runs `f` on the outermost level.
    pub fn with_top<R>(&self, f: impl FnOnce(IrqDataRef<'_>) -> R) -> Option<R> {
        let levels = self.levels.read();
        IrqDataRef::new(self.virq, &levels).map(f)
    }

    /// Runs `f` on the level that belongs to `domain`.
    pub fn with_level<R>(&self, domain: &IrqDomain, f: impl FnOnce(IrqDataRef<'_>) -> R) -> Option<R> {
        let levels = self.levels.read();
        let idx = levels
            .iter()
            .position(|level| core::ptr::eq(Arc::as_ptr(&level.domain), domain))?;
        IrqDataRef::new(self.virq, &levels[idx..]).map(f)
    }

    /// Returns the hardware number of the IRQ in `domain`.
    pub fn hwirq_in(&self, domain: &IrqDomain) -> Option<HwIrq> {
        self.with_level(domain, |data| data.hwirq())
    }

    pub(super) fn levels_mut(&self) -> crate::sync::RwLockWriteGuard<'_, SmallVec<[IrqData; 3]>> {
        self.levels.write()
    }

    pub(super) fn snapshot(&self) -> SmallVec<[IrqData; 3]> {
        self.levels.read().clone()
    }

    /// Masks the IRQ at its outermost chip.
    pub fn mask(&self) {
        self.masked.store(true, Ordering::Relaxed);
        self.with_top(|top| top.mask());
    }

    /// Unmasks the IRQ at its outermost chip.
    pub fn unmask(&self) {
        self.masked.store(false, Ordering::Relaxed);
        self.with_top(|top| top.unmask());
    }

    /// Acknowledges the IRQ at its outermost chip.
    pub fn ack(&self) {
        self.with_top(|top| top.ack());
    }

    /// Masks and acknowledges the IRQ at its outermost chip.
    pub fn mask_ack(&self) {
        self.with_top(|top| top.mask_ack());
    }

    /// Enters the handling of a cascaded interrupt on this parent line.
    ///
    /// The line is masked and acknowledged until the guard is dropped.
    pub fn chained_enter(&self) -> ChainedIrqGuard<'_> {
        self.with_top(|top| top.mask_ack());
        ChainedIrqGuard { desc: self }
    }
}

impl fmt::Debug for IrqDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IrqDesc")
            .field("virq", &self.virq)
            .field("flow", &*self.flow.read())
            .field("count", &self.count())
            .finish_non_exhaustive()
    }
}

/// The guard of a cascaded interrupt being handled.
#[must_use]
pub struct ChainedIrqGuard<'a> {
    desc: &'a IrqDesc,
}

impl Drop for ChainedIrqGuard<'_> {
    fn drop(&mut self) {
        self.desc.with_top(|top| top.unmask());
    }
}
