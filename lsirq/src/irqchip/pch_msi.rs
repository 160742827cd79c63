// SPDX-License-Identifier: MPL-2.0

//! The PCH-MSI controller.
//!
//! MSIs are writes of a vector number to a fixed address, which the bridge
//! turns into a vector of its parent controller (EXTIOI, or the HT vector
//! controller in the line route model). The vectors available to MSIs form
//! a window `[start, start + count)` of the parent's vectors.
//!
//! Three domains are stacked:
//!
//!  - the PCI-MSI domain, which devices allocate from;
//!  - the middle domain, owning the window and allocating from it in
//!    naturally aligned power-of-two regions (multi-vector MSI needs them);
//!  - the parent domain.

use id_alloc::IdAlloc;
use log::debug;

use crate::{
    Error,
    irq::{FwNode, FwSpec, HwIrq, IrqChip, IrqCore, IrqDataRef, IrqDomain, IrqDomainOps, MsiMsg},
    prelude::*,
    sync::Mutex,
};

/// Firmware identity of the PCI-MSI domain.
pub const PCI_MSI_FWNODE: FwNode = FwNode::Named("pci-msi");

/// The MSI vector window and its allocator.
pub struct PchMsi {
    msg_address: u64,
    irq_first: u32,
    num_irqs: u32,
    ext: bool,
    msi_map: Mutex<IdAlloc>,
}

fn count_order(num: u32) -> u32 {
    num.next_power_of_two().trailing_zeros()
}

impl PchMsi {
    /// Returns the first vector of the window.
    pub fn irq_first(&self) -> u32 {
        self.irq_first
    }

    /// Returns the size of the window.
    pub fn num_irqs(&self) -> u32 {
        self.num_irqs
    }

    /// Returns true if the parent is the EXTIOI.
    pub fn is_ext(&self) -> bool {
        self.ext
    }

    /// Returns the number of free vectors.
    pub fn num_free(&self) -> usize {
        self.msi_map.lock().num_free()
    }

    fn allocate_hwirq(&self, num_req: u32) -> Result<HwIrq> {
        let first = self
            .msi_map
            .lock()
            .alloc_region(count_order(num_req))
            .ok_or(Error::NoSpace)?;
        Ok(self.irq_first + first as u32)
    }

    fn free_hwirq(&self, hwirq: HwIrq, num_req: u32) {
        let first = (hwirq - self.irq_first) as usize;
        self.msi_map.lock().release_region(first, count_order(num_req));
    }

    fn compose(&self, hwirq: HwIrq) -> MsiMsg {
        MsiMsg {
            address_hi: (self.msg_address >> 32) as u32,
            address_lo: self.msg_address as u32,
            data: hwirq,
        }
    }
}

struct MiddleChip {
    msi: Arc<PchMsi>,
}

impl IrqChip for MiddleChip {
    fn name(&self) -> &'static str {
        "PCH MSI"
    }

    fn mask(&self, data: &IrqDataRef<'_>) {
        data.mask_parent();
    }

    fn unmask(&self, data: &IrqDataRef<'_>) {
        data.unmask_parent();
    }

    fn ack(&self, data: &IrqDataRef<'_>) {
        data.ack_parent();
    }

    fn set_affinity(&self, data: &IrqDataRef<'_>, mask: &CpuSet, force: bool) -> Result<CpuSet> {
        data.set_affinity_parent(mask, force)
    }

    fn compose_msi_msg(&self, data: &IrqDataRef<'_>) -> Option<MsiMsg> {
        Some(self.msi.compose(data.hwirq()))
    }
}

struct MiddleOps {
    msi: Arc<PchMsi>,
    chip: Arc<MiddleChip>,
}

impl IrqDomainOps for MiddleOps {
    fn alloc(
        &self,
        core: &IrqCore,
        domain: &Arc<IrqDomain>,
        virq: Virq,
        nr_irqs: u32,
        _spec: &FwSpec,
    ) -> Result<()> {
        let hwirq = self.msi.allocate_hwirq(nr_irqs)?;
        for i in 0..nr_irqs {
            if let Err(err) = core.alloc_irqs_parent(domain, virq + i, 1, &FwSpec::one(hwirq + i)) {
                self.msi.free_hwirq(hwirq, nr_irqs);
                core.free_irqs_parent(domain, virq, i);
                return Err(err);
            }
            if let Err(err) = core.set_hwirq_and_chip(domain, virq + i, hwirq + i, self.chip.clone()) {
                self.msi.free_hwirq(hwirq, nr_irqs);
                core.free_irqs_parent(domain, virq, i + 1);
                return Err(err);
            }
        }
        debug!("pch-msi: vectors {}..{} for irq {}", hwirq, hwirq + nr_irqs, virq);
        Ok(())
    }

    fn free(&self, core: &IrqCore, domain: &Arc<IrqDomain>, virq: Virq, nr_irqs: u32) {
        let hwirq = core.desc(virq).and_then(|desc| desc.hwirq_in(domain));
        core.free_irqs_parent(domain, virq, nr_irqs);
        if let Some(hwirq) = hwirq {
            self.msi.free_hwirq(hwirq, nr_irqs);
        }
        core.reset_irq_data(domain, virq, nr_irqs);
    }
}

struct PciMsiChip {
    name: &'static str,
}

impl IrqChip for PciMsiChip {
    fn name(&self) -> &'static str {
        self.name
    }

    fn mask(&self, data: &IrqDataRef<'_>) {
        data.mask_parent();
    }

    fn unmask(&self, data: &IrqDataRef<'_>) {
        data.unmask_parent();
    }

    fn ack(&self, data: &IrqDataRef<'_>) {
        data.ack_parent();
    }

    fn set_affinity(&self, data: &IrqDataRef<'_>, mask: &CpuSet, force: bool) -> Result<CpuSet> {
        data.set_affinity_parent(mask, force)
    }
}

struct PciMsiOps {
    chip: Arc<PciMsiChip>,
}

impl IrqDomainOps for PciMsiOps {
    fn alloc(
        &self,
        core: &IrqCore,
        domain: &Arc<IrqDomain>,
        virq: Virq,
        nr_irqs: u32,
        spec: &FwSpec,
    ) -> Result<()> {
        let (hwirq, _) = self.translate(spec)?;
        core.alloc_irqs_parent(domain, virq, nr_irqs, spec)?;
        for i in 0..nr_irqs {
            if let Err(err) = core.set_hwirq_and_chip(domain, virq + i, hwirq + i, self.chip.clone()) {
                core.free_irqs_parent(domain, virq, nr_irqs);
                return Err(err);
            }
        }
        Ok(())
    }

    fn free(&self, core: &IrqCore, domain: &Arc<IrqDomain>, virq: Virq, nr_irqs: u32) {
        core.free_irqs_parent(domain, virq, nr_irqs);
        core.reset_irq_data(domain, virq, nr_irqs);
    }
}

/// The domains of an initialized PCH-MSI.
#[derive(Clone)]
pub struct PchMsiDomains {
    /// The vector window.
    pub msi: Arc<PchMsi>,
    /// The domain owning the window.
    pub middle: Arc<IrqDomain>,
    /// The domain PCI devices allocate from.
    pub pci: Arc<IrqDomain>,
}

/// Creates the PCH-MSI domains on top of `parent`.
///
/// `fwnode` identifies the middle domain. The window covers parent vectors
/// `start..start + count`; `ext` tells whether `parent` is the EXTIOI.
pub fn init(
    core: &IrqCore,
    parent: &Arc<IrqDomain>,
    fwnode: FwNode,
    msg_address: u64,
    ext: bool,
    start: u32,
    count: u32,
) -> Result<PchMsiDomains> {
    if count == 0 || (start + count) as usize > parent.size() {
        return Err(Error::InvalidArgs);
    }

    debug!("pch-msi: registering {} MSIs, starting at {}", count, start);
    let msi = Arc::new(PchMsi {
        msg_address,
        irq_first: start,
        num_irqs: count,
        ext,
        msi_map: Mutex::new(IdAlloc::with_capacity(count as usize)),
    });

    let middle = core.create_linear_domain(
        "PCH MSI",
        fwnode,
        (start + count) as usize,
        Some(parent),
        Arc::new(MiddleOps {
            msi: msi.clone(),
            chip: Arc::new(MiddleChip { msi: msi.clone() }),
        }),
    )?;

    let name = if ext { "PCH-MSI-EXT" } else { "PCH-MSI-HT" };
    // PCI-level numbers are sparse (requester id and vector index), so
    // lookups never go through this domain's reverse map.
    let pci = core.create_linear_domain(
        name,
        PCI_MSI_FWNODE,
        0,
        Some(&middle),
        Arc::new(PciMsiOps {
            chip: Arc::new(PciMsiChip { name }),
        }),
    )?;

    Ok(PchMsiDomains { msi, middle, pci })
}

#[cfg(test)]
mod test {
    use core::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::{
        boot::SysConf,
        cpu::CpuTopology,
        io::{Platform, sim::SimBoard},
        irq::FlowHandler,
        irqchip::{cpu_intc, eiointc},
    };

    const MSG_ADDRESS: u64 = 0x2ff0_0000;

    // A parent that refuses vector 77.
    struct FussyParent;

    impl IrqDomainOps for FussyParent {
        fn alloc(
            &self,
            core: &IrqCore,
            domain: &Arc<IrqDomain>,
            virq: Virq,
            nr_irqs: u32,
            spec: &FwSpec,
        ) -> Result<()> {
            let (hwirq, _) = self.translate(spec)?;
            if hwirq == 77 {
                return Err(Error::NoMemory);
            }
            for i in 0..nr_irqs {
                core.set_info(domain, virq + i, hwirq + i, Arc::new(PciMsiChip { name: "fussy" }), FlowHandler::Edge)?;
            }
            Ok(())
        }
    }

    fn extioi_msi(start: u32, count: u32) -> (SimBoard, Arc<IrqCore>, Arc<IrqDomain>, Arc<IrqDomain>, PchMsiDomains) {
        let board = SimBoard::new(4, 4);
        let topology = Arc::new(CpuTopology::new(&SysConf::default()));
        topology.build_from_reserved();
        let core = Arc::new(IrqCore::new());
        let platform: Arc<dyn Platform> = Arc::new(board.clone());
        let cpu = cpu_intc::init(&core, platform.clone()).unwrap();
        let (_, extioi) = eiointc::init(&core, platform, topology, &cpu).unwrap();
        let domains = init(&core, &extioi, FwNode::Address(MSG_ADDRESS), MSG_ADDRESS, true, start, count).unwrap();
        (board, core, cpu, extioi, domains)
    }

    #[test]
    fn vectors_come_from_the_window_and_compose_their_number() {
        let (_board, core, _, extioi, domains) = extioi_msi(64, 192);
        let virq = core.alloc_irqs(&domains.pci, 4, &FwSpec::one(0x100 << 11)).unwrap();

        for i in 0..4 {
            let msg = core.compose_msi_msg(virq + i).unwrap();
            assert_eq!(msg.address_hi, 0);
            assert_eq!(msg.address_lo, MSG_ADDRESS as u32);
            assert_eq!(msg.data, 64 + i);
            assert_eq!(core.find_mapping(&extioi, 64 + i), Some(virq + i));
        }
        assert_eq!(domains.pci.name(), "PCH-MSI-EXT");
        assert_eq!(domains.msi.num_free(), 188);
    }

    #[test]
    fn regions_are_power_of_two_aligned() {
        let (_board, core, _, _, domains) = extioi_msi(64, 64);
        let one = core.alloc_irqs(&domains.pci, 1, &FwSpec::one(0)).unwrap();
        let three = core.alloc_irqs(&domains.pci, 3, &FwSpec::one(1 << 11)).unwrap();
        assert_eq!(core.compose_msi_msg(one).unwrap().data, 64);
        // Three vectors take an aligned region of four.
        assert_eq!(core.compose_msi_msg(three).unwrap().data, 68);
        assert_eq!(domains.msi.num_free(), 64 - 1 - 4);
    }

    #[test]
    fn allocate_and_free_leave_no_vector_behind() {
        let (_board, core, _, extioi, domains) = extioi_msi(64, 128);
        let before = domains.msi.num_free();
        let mut virqs = Vec::new();
        for (dev, nr) in [1u32, 2, 8, 1, 32].into_iter().enumerate() {
            let virq = core
                .alloc_irqs(&domains.pci, nr, &FwSpec::one((dev as u32) << 11))
                .unwrap();
            virqs.push((virq, nr));
        }
        for (virq, nr) in virqs.into_iter().rev() {
            core.free_irqs(virq, nr);
        }
        assert_eq!(domains.msi.num_free(), before);
        assert_eq!(core.find_mapping(&extioi, 64), None);
    }

    #[test]
    fn window_exhaustion_is_no_space() {
        let (_board, core, _, _, domains) = extioi_msi(64, 8);
        core.alloc_irqs(&domains.pci, 8, &FwSpec::one(0)).unwrap();
        assert_eq!(
            core.alloc_irqs(&domains.pci, 1, &FwSpec::one(1 << 11)),
            Err(Error::NoSpace)
        );
    }

    #[test]
    fn parent_failure_unwinds_the_partial_allocation() {
        let core = IrqCore::new();
        let parent = core
            .create_linear_domain("fussy", FwNode::Named("fussy"), 128, None, Arc::new(FussyParent))
            .unwrap();
        let domains = init(&core, &parent, FwNode::Named("msintc"), MSG_ADDRESS, false, 72, 16).unwrap();
        assert_eq!(domains.pci.name(), "PCH-MSI-HT");

        // 72..80 contains the refused vector 77.
        assert_eq!(
            core.alloc_irqs(&domains.pci, 8, &FwSpec::one(0)),
            Err(Error::NoMemory)
        );
        assert_eq!(domains.msi.num_free(), 16);
        for hwirq in 72..77 {
            assert_eq!(core.find_mapping(&parent, hwirq), None);
        }

        // A smaller region stays clear of the refused vector.
        let virq = core.alloc_irqs(&domains.pci, 4, &FwSpec::one(0)).unwrap();
        assert_eq!(core.compose_msi_msg(virq).unwrap().data, 72);
    }

    #[test]
    fn msi_dispatch_reaches_the_device_handler() {
        let (board, core, cpu, _, domains) = extioi_msi(64, 192);
        let virq = core.alloc_irqs(&domains.pci, 1, &FwSpec::one(0)).unwrap();
        let hits = Arc::new(AtomicU32::new(0));
        let counter = hits.clone();
        core.request_irq(virq, "nvme", move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        })
        .unwrap();

        let vector = core.compose_msi_msg(virq).unwrap().data;
        board.raise_extioi(0, vector as usize);
        core.handle_domain_irq(&cpu, cpu_intc::LOONGSON_BRIDGE_IRQ).unwrap();
        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }
}
