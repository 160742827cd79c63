// SPDX-License-Identifier: MPL-2.0

use alloc::collections::BTreeMap;
use core::sync::atomic::{AtomicU64, Ordering};

use id_alloc::IdAlloc;
use log::{debug, warn};
use smallvec::SmallVec;

use super::{
    FlowHandler, FwNode, FwSpec, HwIrq, IrqChip, IrqData, IrqDataRef, IrqDesc, IrqDomain,
    IrqDomainOps, MsiMsg, Trigger, Virq, desc::IrqAction, disable_local,
};
use crate::{
    Error,
    prelude::*,
    sync::{Mutex, RwLock, SpinLock},
};

/// The size of the virtual IRQ number space. Number 0 is never handed out.
pub const NR_IRQS: usize = 1024;

/// The generic interrupt layer: virtual IRQ numbers, descriptors and
/// domains.
///
/// Controller drivers are clients of this type. They create their domains
/// here, fill in their level of each IRQ from their [`IrqDomainOps`] and
/// feed pending hardware interrupts back through [`Self::handle_domain_irq`].
pub struct IrqCore {
    virqs: SpinLock<IdAlloc>,
    descs: RwLock<BTreeMap<Virq, Arc<IrqDesc>>>,
    domains: RwLock<Vec<Arc<IrqDomain>>>,
    mapping_lock: Mutex<()>,
    spurious: AtomicU64,
}

impl IrqCore {
    /// Creates an empty interrupt layer.
    pub fn new() -> Self {
        let mut virqs = IdAlloc::with_capacity(NR_IRQS);
        let _ = virqs.alloc_specific(0);
        Self {
            virqs: SpinLock::new(virqs),
            descs: RwLock::new(BTreeMap::new()),
            domains: RwLock::new(Vec::new()),
            mapping_lock: Mutex::new(()),
            spurious: AtomicU64::new(0),
        }
    }

    /// Creates a domain of `size` hardware interrupts.
    ///
    /// Fails with [`Error::Busy`] if a domain with the same identity exists.
    pub fn create_linear_domain(
        &self,
        name: &'static str,
        fwnode: FwNode,
        size: usize,
        parent: Option<&Arc<IrqDomain>>,
        ops: Arc<dyn IrqDomainOps>,
    ) -> Result<Arc<IrqDomain>> {
        let mut domains = self.domains.write();
        if domains.iter().any(|domain| *domain.fwnode() == fwnode) {
            return Err(Error::Busy);
        }
        let domain = Arc::new(IrqDomain::new(name, fwnode, size, parent, ops));
        domains.push(domain.clone());
        debug!("irq: created domain {} with {} lines", name, size);
        Ok(domain)
    }

    /// Returns the domain with identity `fwnode`.
    pub fn find_domain(&self, fwnode: &FwNode) -> Option<Arc<IrqDomain>> {
        self.domains
            .read()
            .iter()
            .find(|domain| domain.fwnode() == fwnode)
            .cloned()
    }

    /// Returns the descriptor of `virq`.
    pub fn desc(&self, virq: Virq) -> Option<Arc<IrqDesc>> {
        self.descs.read().get(&virq).cloned()
    }

    /// Allocates `nr_irqs` consecutive virtual IRQs in `domain` and its
    /// ancestors, returning the first one.
    pub fn alloc_irqs(&self, domain: &Arc<IrqDomain>, nr_irqs: u32, spec: &FwSpec) -> Result<Virq> {
        let range = self
            .virqs
            .lock_irq_disabled()
            .alloc_consecutive(nr_irqs as usize)
            .ok_or(Error::NotEnoughResources)?;
        let first = range.start as Virq;

        let hierarchy = domain.hierarchy();
        {
            let _irq_guard = disable_local();
            let mut descs = self.descs.write();
            for virq in range.clone() {
                let levels = hierarchy
                    .iter()
                    .map(|domain| IrqData::empty(domain.clone()))
                    .collect();
                let virq = virq as Virq;
                descs.insert(virq, Arc::new(IrqDesc::new(virq, levels)));
            }
        }

        if let Err(err) = domain.ops().alloc(self, domain, first, nr_irqs, spec) {
            self.release_descs(first, nr_irqs);
            return Err(err);
        }

        for virq in first..first + nr_irqs {
            let Some(desc) = self.desc(virq) else {
                continue;
            };
            for level in desc.snapshot().iter() {
                level.domain.insert_mapping(level.hwirq, virq);
            }
        }
        Ok(first)
    }

    /// Allocates the parent levels of `virq..virq + nr_irqs`.
    pub fn alloc_irqs_parent(
        &self,
        domain: &Arc<IrqDomain>,
        virq: Virq,
        nr_irqs: u32,
        spec: &FwSpec,
    ) -> Result<()> {
        let parent = domain.parent().ok_or(Error::InvalidArgs)?;
        parent.ops().alloc(self, &parent, virq, nr_irqs, spec)
    }

    /// Frees virtual IRQs allocated by [`Self::alloc_irqs`].
    pub fn free_irqs(&self, virq: Virq, nr_irqs: u32) {
        let Some(domain) = self
            .desc(virq)
            .and_then(|desc| desc.with_top(|top| top.domain().clone()))
        else {
            return;
        };

        for virq in virq..virq + nr_irqs {
            if let Some(desc) = self.desc(virq) {
                for level in desc.snapshot().iter() {
                    level.domain.remove_mapping(level.hwirq, virq);
                }
                desc.mask();
            }
        }
        domain.ops().free(self, &domain, virq, nr_irqs);
        self.release_descs(virq, nr_irqs);
    }

    /// Frees the parent levels of `virq..virq + nr_irqs`.
    pub fn free_irqs_parent(&self, domain: &Arc<IrqDomain>, virq: Virq, nr_irqs: u32) {
        if let Some(parent) = domain.parent() {
            parent.ops().free(self, &parent, virq, nr_irqs);
        }
    }

    fn release_descs(&self, first: Virq, nr_irqs: u32) {
        {
            let _irq_guard = disable_local();
            let mut descs = self.descs.write();
            for virq in first..first + nr_irqs {
                descs.remove(&virq);
            }
        }
        let start = first as usize;
        self.virqs
            .lock_irq_disabled()
            .free_consecutive(start..start + nr_irqs as usize);
    }

    /// Sets the hardware number and the chip of `virq` at the level of `domain`.
    pub fn set_hwirq_and_chip(
        &self,
        domain: &Arc<IrqDomain>,
        virq: Virq,
        hwirq: HwIrq,
        chip: Arc<dyn IrqChip>,
    ) -> Result<()> {
        let desc = self.desc(virq).ok_or(Error::InvalidArgs)?;
        let mut levels = desc.levels_mut();
        let level = levels
            .iter_mut()
            .find(|level| Arc::ptr_eq(&level.domain, domain))
            .ok_or(Error::InvalidArgs)?;
        level.hwirq = hwirq;
        level.chip = Some(chip);
        Ok(())
    }

    /// Like [`Self::set_hwirq_and_chip`], and also installs the flow handler.
    pub fn set_info(
        &self,
        domain: &Arc<IrqDomain>,
        virq: Virq,
        hwirq: HwIrq,
        chip: Arc<dyn IrqChip>,
        flow: FlowHandler,
    ) -> Result<()> {
        self.set_hwirq_and_chip(domain, virq, hwirq, chip)?;
        self.set_flow(virq, flow)
    }

    /// Clears the level of `domain` for `virq..virq + nr_irqs`.
    pub fn reset_irq_data(&self, domain: &Arc<IrqDomain>, virq: Virq, nr_irqs: u32) {
        for virq in virq..virq + nr_irqs {
            let Some(desc) = self.desc(virq) else {
                continue;
            };
            let mut levels = desc.levels_mut();
            if let Some(level) = levels
                .iter_mut()
                .find(|level| Arc::ptr_eq(&level.domain, domain))
            {
                level.hwirq = 0;
                level.chip = None;
            }
        }
    }

    /// Maps the interrupt described by `spec` in `domain`, reusing an
    /// existing mapping.
    pub fn create_mapping(&self, domain: &Arc<IrqDomain>, spec: &FwSpec) -> Result<Virq> {
        let _guard = self.mapping_lock.lock();
        let (hwirq, trigger) = domain.ops().translate(spec)?;
        if let Some(virq) = domain.find_mapping(hwirq) {
            return Ok(virq);
        }

        let virq = self.alloc_irqs(domain, 1, spec)?;
        if trigger != Trigger::None {
            if let Err(err) = self.set_type(virq, trigger) {
                warn!("irq: cannot set trigger of irq {}: {}", virq, err);
            }
        }
        Ok(virq)
    }

    /// Returns the virtual IRQ of `hwirq` in `domain`.
    pub fn find_mapping(&self, domain: &IrqDomain, hwirq: HwIrq) -> Option<Virq> {
        domain.find_mapping(hwirq)
    }

    /// Installs the flow handler of `virq`.
    pub fn set_flow(&self, virq: Virq, flow: FlowHandler) -> Result<()> {
        let desc = self.desc(virq).ok_or(Error::InvalidArgs)?;
        *desc.flow.write() = flow;
        Ok(())
    }

    /// Installs a cascade handler on the parent line `virq` and unmasks it.
    pub fn set_chained_handler(&self, virq: Virq, handler: Arc<dyn super::ChainedHandler>) -> Result<()> {
        let desc = self.desc(virq).ok_or(Error::InvalidArgs)?;
        *desc.flow.write() = FlowHandler::Chained(handler);
        desc.unmask();
        Ok(())
    }

    /// Adds a device handler to `virq`. The first handler unmasks the line.
    pub fn request_irq<F>(&self, virq: Virq, name: &'static str, handler: F) -> Result<()>
    where
        F: Fn(Virq) + Send + Sync + 'static,
    {
        let desc = self.desc(virq).ok_or(Error::InvalidArgs)?;
        if matches!(desc.flow(), FlowHandler::Chained(_)) {
            return Err(Error::Busy);
        }

        let first = {
            let mut actions = desc.actions.write();
            actions.push(IrqAction {
                name,
                handler: Arc::new(handler),
            });
            actions.len() == 1
        };
        if first {
            desc.unmask();
        }
        Ok(())
    }

    /// Removes the handler `name` from `virq`. The last one masks the line.
    pub fn free_irq(&self, virq: Virq, name: &'static str) -> Result<()> {
        let desc = self.desc(virq).ok_or(Error::InvalidArgs)?;
        let now_empty = {
            let mut actions = desc.actions.write();
            let idx = actions
                .iter()
                .position(|action| action.name == name)
                .ok_or(Error::InvalidArgs)?;
            actions.remove(idx);
            actions.is_empty()
        };
        if now_empty {
            desc.mask();
        }
        Ok(())
    }

    /// Configures the trigger of `virq`, switching between the level and
    /// edge flows accordingly.
    pub fn set_type(&self, virq: Virq, trigger: Trigger) -> Result<()> {
        let desc = self.desc(virq).ok_or(Error::InvalidArgs)?;
        desc.with_top(|top| match top.chip() {
            Some(chip) => chip.set_type(&top, trigger),
            None => Ok(()),
        })
        .ok_or(Error::InvalidArgs)??;

        let mut flow = desc.flow.write();
        if matches!(*flow, FlowHandler::Level | FlowHandler::Edge) {
            if trigger.is_edge() {
                *flow = FlowHandler::Edge;
            } else if trigger.is_level() {
                *flow = FlowHandler::Level;
            }
        }
        Ok(())
    }

    /// Routes `virq` to `mask`.
    ///
    /// On failure nothing changes, neither in hardware nor in the recorded
    /// affinity.
    pub fn set_affinity(&self, virq: Virq, mask: &CpuSet, force: bool) -> Result<()> {
        let desc = self.desc(virq).ok_or(Error::InvalidArgs)?;
        let effective = desc
            .with_top(|top| top.set_affinity(mask, force))
            .ok_or(Error::InvalidArgs)??;
        desc.update_affinity(mask, effective);
        Ok(())
    }

    /// Returns the MSI message that raises `virq`.
    pub fn compose_msi_msg(&self, virq: Virq) -> Option<MsiMsg> {
        self.desc(virq)?.with_top(|top| top.compose_msi_msg())?
    }

    /// Returns every IRQ that has a flow handler, in ascending order.
    pub fn active_irqs(&self) -> Vec<Arc<IrqDesc>> {
        self.descs
            .read()
            .values()
            .filter(|desc| desc.is_active())
            .cloned()
            .collect()
    }

    /// Tells the chips of all active IRQs that the executing CPU goes
    /// offline.
    pub fn cpu_offline(&self) {
        for desc in self.active_irqs() {
            desc.with_top(|top| {
                if let Some(chip) = top.chip() {
                    chip.cpu_offline(&top);
                }
            });
        }
    }

    /// Counts an interrupt nobody claimed.
    pub fn note_spurious(&self) {
        self.spurious.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns how many interrupts nobody claimed.
    pub fn spurious_count(&self) -> u64 {
        self.spurious.load(Ordering::Relaxed)
    }

    /// Dispatches the hardware interrupt `hwirq` of `domain`.
    pub fn handle_domain_irq(&self, domain: &IrqDomain, hwirq: HwIrq) -> Result<()> {
        match domain.find_mapping(hwirq) {
            Some(virq) => self.generic_handle_irq(virq),
            None => {
                self.note_spurious();
                Err(Error::NoDevice)
            }
        }
    }

    /// Runs the flow handler of `virq`.
    pub fn generic_handle_irq(&self, virq: Virq) -> Result<()> {
        let desc = self.desc(virq).ok_or(Error::InvalidArgs)?;
        let flow = desc.flow();
        match flow {
            FlowHandler::Bad => {
                desc.inc_count();
                self.note_spurious();
                warn!("irq: unexpected irq {}", virq);
            }
            FlowHandler::Chained(handler) => {
                desc.inc_count();
                handler.handle(self, &desc);
            }
            FlowHandler::Level => self.handle_level(&desc),
            FlowHandler::Edge => self.handle_edge(&desc),
            FlowHandler::PerCpu => {
                desc.inc_count();
                desc.ack();
                self.run_actions(&desc);
            }
            FlowHandler::Simple => {
                desc.inc_count();
                self.run_actions(&desc);
            }
        }
        Ok(())
    }

    fn handle_level(&self, desc: &IrqDesc) {
        let levels = desc.snapshot();
        let Some(top) = IrqDataRef::new(desc.virq(), &levels) else {
            return;
        };
        top.mask_ack();
        desc.inc_count();
        if self.run_actions(desc) && !desc.is_masked() {
            top.unmask();
        }
    }

    fn handle_edge(&self, desc: &IrqDesc) {
        let levels = desc.snapshot();
        let Some(top) = IrqDataRef::new(desc.virq(), &levels) else {
            return;
        };
        desc.inc_count();
        if desc.is_masked() {
            top.mask_ack();
            self.note_spurious();
            return;
        }
        top.ack();
        self.run_actions(desc);
    }

    fn run_actions(&self, desc: &IrqDesc) -> bool {
        let handlers: SmallVec<[Arc<super::IrqHandler>; 2]> = desc
            .actions
            .read()
            .iter()
            .map(|action| action.handler.clone())
            .collect();
        if handlers.is_empty() {
            self.note_spurious();
            return false;
        }
        for handler in handlers {
            handler(desc.virq());
        }
        true
    }
}

impl Default for IrqCore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use core::sync::atomic::AtomicU32;

    use super::*;

    #[derive(Default)]
    struct CountingChip {
        masks: AtomicU32,
        unmasks: AtomicU32,
        acks: AtomicU32,
    }

    impl IrqChip for CountingChip {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn mask(&self, _data: &IrqDataRef<'_>) {
            self.masks.fetch_add(1, Ordering::Relaxed);
        }

        fn unmask(&self, _data: &IrqDataRef<'_>) {
            self.unmasks.fetch_add(1, Ordering::Relaxed);
        }

        fn ack(&self, _data: &IrqDataRef<'_>) {
            self.acks.fetch_add(1, Ordering::Relaxed);
        }

        fn set_affinity(&self, data: &IrqDataRef<'_>, mask: &CpuSet, _force: bool) -> Result<CpuSet> {
            if data.hwirq() == 13 {
                return Err(Error::InvalidArgs);
            }
            Ok(mask.clone())
        }
    }

    struct RootOps(Arc<CountingChip>);

    impl IrqDomainOps for RootOps {
        fn alloc(
            &self,
            core: &IrqCore,
            domain: &Arc<IrqDomain>,
            virq: Virq,
            nr_irqs: u32,
            spec: &FwSpec,
        ) -> Result<()> {
            let (hwirq, _) = self.translate(spec)?;
            for i in 0..nr_irqs {
                core.set_info(domain, virq + i, hwirq + i, self.0.clone(), FlowHandler::Level)?;
            }
            Ok(())
        }
    }

    struct ChildChip;

    impl IrqChip for ChildChip {
        fn name(&self) -> &'static str {
            "child"
        }

        fn mask(&self, data: &IrqDataRef<'_>) {
            data.mask_parent();
        }

        fn set_affinity(&self, data: &IrqDataRef<'_>, mask: &CpuSet, force: bool) -> Result<CpuSet> {
            data.set_affinity_parent(mask, force)
        }
    }

    struct ChildOps;

    impl IrqDomainOps for ChildOps {
        fn alloc(
            &self,
            core: &IrqCore,
            domain: &Arc<IrqDomain>,
            virq: Virq,
            nr_irqs: u32,
            spec: &FwSpec,
        ) -> Result<()> {
            let (hwirq, _) = self.translate(spec)?;
            core.alloc_irqs_parent(domain, virq, nr_irqs, &FwSpec::one(hwirq + 10))?;
            for i in 0..nr_irqs {
                core.set_info(domain, virq + i, hwirq + i, Arc::new(ChildChip), FlowHandler::Edge)?;
            }
            Ok(())
        }

        fn free(&self, core: &IrqCore, domain: &Arc<IrqDomain>, virq: Virq, nr_irqs: u32) {
            core.free_irqs_parent(domain, virq, nr_irqs);
            core.reset_irq_data(domain, virq, nr_irqs);
        }
    }

    fn two_level() -> (IrqCore, Arc<CountingChip>, Arc<IrqDomain>, Arc<IrqDomain>) {
        let core = IrqCore::new();
        let chip = Arc::new(CountingChip::default());
        let root = core
            .create_linear_domain("root", FwNode::Named("root"), 32, None, Arc::new(RootOps(chip.clone())))
            .unwrap();
        let child = core
            .create_linear_domain("child", FwNode::Named("child"), 16, Some(&root), Arc::new(ChildOps))
            .unwrap();
        (core, chip, root, child)
    }

    #[test]
    fn mapping_is_created_once() {
        let (core, _, root, _) = two_level();
        let virq = core.create_mapping(&root, &FwSpec::one(3)).unwrap();
        assert_ne!(virq, 0);
        assert_eq!(core.create_mapping(&root, &FwSpec::one(3)), Ok(virq));
        assert_eq!(core.find_mapping(&root, 3), Some(virq));
        assert_eq!(
            core.create_linear_domain("root", FwNode::Named("root"), 1, None, Arc::new(ChildOps))
                .unwrap_err(),
            Error::Busy
        );
    }

    #[test]
    fn hierarchical_allocation_maps_every_level() {
        let (core, chip, root, child) = two_level();
        let virq = core.alloc_irqs(&child, 2, &FwSpec::one(4)).unwrap();
        assert_eq!(core.find_mapping(&child, 5), Some(virq + 1));
        assert_eq!(core.find_mapping(&root, 15), Some(virq + 1));

        let desc = core.desc(virq).unwrap();
        assert_eq!(desc.hwirq_in(&root), Some(14));
        desc.mask();
        assert_eq!(chip.masks.load(Ordering::Relaxed), 1);

        core.free_irqs(virq, 2);
        assert_eq!(core.find_mapping(&child, 4), None);
        assert_eq!(core.find_mapping(&root, 14), None);
        assert!(core.desc(virq).is_none());
    }

    #[test]
    fn level_flow_masks_around_the_handler() {
        let (core, chip, root, _) = two_level();
        let virq = core.create_mapping(&root, &FwSpec::one(1)).unwrap();
        let hits = Arc::new(AtomicU32::new(0));
        let counter = hits.clone();
        core.request_irq(virq, "dev", move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        })
        .unwrap();
        assert_eq!(chip.unmasks.load(Ordering::Relaxed), 1);

        core.handle_domain_irq(&root, 1).unwrap();
        assert_eq!(hits.load(Ordering::Relaxed), 1);
        assert_eq!(chip.masks.load(Ordering::Relaxed), 1);
        assert_eq!(chip.acks.load(Ordering::Relaxed), 1);
        assert_eq!(chip.unmasks.load(Ordering::Relaxed), 2);
        assert_eq!(core.desc(virq).unwrap().count(), 1);

        assert_eq!(core.handle_domain_irq(&root, 2), Err(Error::NoDevice));
        assert_eq!(core.spurious_count(), 1);
    }

    #[test]
    fn failed_affinity_keeps_the_previous_one() {
        let (core, _, _, child) = two_level();
        let virq = core.alloc_irqs(&child, 4, &FwSpec::one(0)).unwrap();
        let cpus = CpuSet::from_mask(0b110);

        core.set_affinity(virq, &cpus, false).unwrap();
        assert_eq!(core.desc(virq).unwrap().effective_affinity(), cpus);

        // Root hwirq 13 refuses any affinity.
        let refused = virq + 3;
        assert_eq!(core.set_affinity(refused, &cpus, false), Err(Error::InvalidArgs));
        assert_eq!(
            core.desc(refused).unwrap().affinity(),
            CpuSet::from(CpuId::bsp())
        );
    }
}
