// SPDX-License-Identifier: MPL-2.0

use core::{
    fmt,
    sync::atomic::{AtomicU32, Ordering},
};

use smallvec::SmallVec;

use super::{IrqCore, Virq};
use crate::{Error, prelude::*};

/// A hardware interrupt number, local to one domain.
pub type HwIrq = u32;

/// The identity of an interrupt domain.
///
/// Controllers name their parents by the identity of the parent domain, so
/// that a domain can be looked up without holding a reference to it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FwNode {
    /// A controller without a register window of its own.
    Named(&'static str),
    /// A controller identified by its register base.
    Address(u64),
}

/// A firmware description of one interrupt of a domain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FwSpec {
    params: SmallVec<[u32; 3]>,
}

impl FwSpec {
    /// A specifier holding only the hardware interrupt number.
    pub fn one(hwirq: HwIrq) -> Self {
        Self {
            params: SmallVec::from_slice(&[hwirq]),
        }
    }

    /// A specifier holding the hardware interrupt number and a trigger.
    pub fn two(hwirq: HwIrq, trigger: Trigger) -> Self {
        Self {
            params: SmallVec::from_slice(&[hwirq, trigger as u32]),
        }
    }

    /// Returns parameter `idx`.
    pub fn param(&self, idx: usize) -> Option<u32> {
        self.params.get(idx).copied()
    }

    /// Returns the number of parameters.
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Returns true if there is no parameter.
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

/// The trigger of an interrupt line, numbered like the firmware cells.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u32)]
pub enum Trigger {
    /// Left as configured.
    #[default]
    None = 0,
    /// Rising edge.
    EdgeRising = 1,
    /// Falling edge.
    EdgeFalling = 2,
    /// Active high level.
    LevelHigh = 4,
    /// Active low level.
    LevelLow = 8,
}

impl Trigger {
    /// Decodes a firmware trigger cell. Unknown values mean [`Trigger::None`].
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Self::EdgeRising,
            2 => Self::EdgeFalling,
            4 => Self::LevelHigh,
            8 => Self::LevelLow,
            _ => Self::None,
        }
    }

    /// Returns true for edge triggers.
    pub fn is_edge(self) -> bool {
        matches!(self, Self::EdgeRising | Self::EdgeFalling)
    }

    /// Returns true for level triggers.
    pub fn is_level(self) -> bool {
        matches!(self, Self::LevelHigh | Self::LevelLow)
    }
}

/// The controller-specific part of a domain.
pub trait IrqDomainOps: Send + Sync {
    /// Decodes `spec` into a hardware interrupt number and a trigger.
    fn translate(&self, spec: &FwSpec) -> Result<(HwIrq, Trigger)> {
        let hwirq = spec.param(0).ok_or(Error::InvalidArgs)?;
        let trigger = spec.param(1).map_or(Trigger::None, Trigger::from_raw);
        Ok((hwirq, trigger))
    }

    /// Sets up `virq..virq + nr_irqs` at this level of the hierarchy.
    ///
    /// Implementations allocate their parents first with
    /// [`IrqCore::alloc_irqs_parent`] and then fill in their own level with
    /// [`IrqCore::set_info`] or [`IrqCore::set_hwirq_and_chip`]. On failure
    /// every parent allocated so far must be released again.
    fn alloc(
        &self,
        core: &IrqCore,
        domain: &Arc<IrqDomain>,
        virq: Virq,
        nr_irqs: u32,
        spec: &FwSpec,
    ) -> Result<()>;

    /// Tears down what [`Self::alloc`] set up.
    fn free(&self, core: &IrqCore, domain: &Arc<IrqDomain>, virq: Virq, nr_irqs: u32) {
        core.reset_irq_data(domain, virq, nr_irqs);
    }
}

/// An interrupt domain: a hardware interrupt number space with a linear
/// reverse map to virtual IRQ numbers.
///
/// A child domain only holds a weak reference to its parent. Domains are
/// owned by the [`IrqCore`] that created them.
pub struct IrqDomain {
    name: &'static str,
    fwnode: FwNode,
    revmap: Box<[AtomicU32]>,
    parent: Option<Weak<IrqDomain>>,
    ops: Arc<dyn IrqDomainOps>,
}

impl IrqDomain {
    pub(super) fn new(
        name: &'static str,
        fwnode: FwNode,
        size: usize,
        parent: Option<&Arc<IrqDomain>>,
        ops: Arc<dyn IrqDomainOps>,
    ) -> Self {
        Self {
            name,
            fwnode,
            revmap: (0..size).map(|_| AtomicU32::new(0)).collect(),
            parent: parent.map(Arc::downgrade),
            ops,
        }
    }

    /// Returns the name of the domain.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the identity of the domain.
    pub fn fwnode(&self) -> &FwNode {
        &self.fwnode
    }

    /// Returns the number of hardware interrupts of the domain.
    pub fn size(&self) -> usize {
        self.revmap.len()
    }

    /// Returns the parent domain.
    pub fn parent(&self) -> Option<Arc<IrqDomain>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// Returns the controller operations.
    pub fn ops(&self) -> &Arc<dyn IrqDomainOps> {
        &self.ops
    }

    /// Returns the virtual IRQ mapped to `hwirq`.
    pub fn find_mapping(&self, hwirq: HwIrq) -> Option<Virq> {
        match self.revmap.get(hwirq as usize)?.load(Ordering::Acquire) {
            0 => None,
            virq => Some(virq),
        }
    }

    pub(super) fn insert_mapping(&self, hwirq: HwIrq, virq: Virq) {
        if let Some(slot) = self.revmap.get(hwirq as usize) {
            slot.store(virq, Ordering::Release);
        }
    }

    pub(super) fn remove_mapping(&self, hwirq: HwIrq, virq: Virq) {
        if let Some(slot) = self.revmap.get(hwirq as usize) {
            let _ = slot.compare_exchange(virq, 0, Ordering::AcqRel, Ordering::Relaxed);
        }
    }

    /// Returns the chain of domains from this one up to the root.
    pub(super) fn hierarchy(self: &Arc<Self>) -> SmallVec<[Arc<IrqDomain>; 3]> {
        let mut chain = SmallVec::new();
        let mut next = Some(self.clone());
        while let Some(domain) = next {
            next = domain.parent();
            chain.push(domain);
        }
        chain
    }
}

impl fmt::Debug for IrqDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IrqDomain")
            .field("name", &self.name)
            .field("fwnode", &self.fwnode)
            .field("size", &self.revmap.len())
            .finish_non_exhaustive()
    }
}
