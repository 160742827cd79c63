// SPDX-License-Identifier: MPL-2.0

//! The extended I/O interrupt controller (EXTIOI).
//!
//! 256 vectors, reported to every core through four 64-bit status
//! registers and cascaded from the bridge pin of the core interrupt
//! controller. The controller registers are node-wide; registers of other
//! nodes are written through the `ANY_SEND` port.
//!
//! Each vector has a route byte: the low nibble is a bitmap of cores within
//! the node, the high nibble a bitmap of nodes. Node 0 forwards to every
//! target node, so its entry carries the union of the target nodes while
//! every other node only names itself.
//!
//! The enable state is mirrored in software. The mirror is authoritative:
//! resume writes it back without looking at the hardware.

use log::{info, warn};

use super::cpu_intc::LOONGSON_BRIDGE_IRQ;
use crate::{
    Error,
    cpu::{CpuTopology, MAX_NUMNODES},
    io::{
        Platform,
        regs::{
            EXTIOI_BOUNCE_BASE, EXTIOI_EN_BASE, EXTIOI_IPMAP_BASE, EXTIOI_ISR_BASE,
            EXTIOI_NODEMAP_BASE, EXTIOI_ROUTE_BASE, OTHER_FUNC, OTHER_FUNC_EXT_INT_EN, any_send,
        },
    },
    irq::{
        ChainedHandler, FlowHandler, FwNode, FwSpec, HwIrq, IrqChip, IrqCore, IrqDataRef, IrqDesc,
        IrqDomain, IrqDomainOps, Trigger,
    },
    pm::SyscoreOps,
    prelude::*,
    sync::{Once, SpinLock},
};

/// Number of vectors.
pub const EXTIOI_IRQS: usize = 256;
/// Number of 32-bit enable words.
pub const EXTIOI_EN_WORDS: usize = EXTIOI_IRQS / 32;
const EXTIOI_ISR_REGS: usize = EXTIOI_IRQS / 64;

/// Firmware identity of the EXTIOI domain.
pub const EXTIOI_FWNODE: FwNode = FwNode::Named("eiointc");

/// The extended I/O interrupt controller.
pub struct Eiointc {
    platform: Arc<dyn Platform>,
    topology: Arc<CpuTopology>,
    irq_core: Arc<IrqCore>,
    // The enable mirror. Holding the lock also serializes route changes.
    affinity_lock: SpinLock<[u32; EXTIOI_EN_WORDS]>,
    domain: Once<Weak<IrqDomain>>,
}

impl Eiointc {
    /// Creates the controller. Nothing touches the hardware until
    /// [`Self::init_node`].
    pub fn new(platform: Arc<dyn Platform>, topology: Arc<CpuTopology>, irq_core: Arc<IrqCore>) -> Self {
        Self {
            platform,
            topology,
            irq_core,
            affinity_lock: SpinLock::new([0; EXTIOI_EN_WORDS]),
            domain: Once::new(),
        }
    }

    /// Returns a copy of the enable mirror.
    pub fn enable_mirror(&self) -> [u32; EXTIOI_EN_WORDS] {
        *self.affinity_lock.lock_irq_disabled()
    }

    fn domain(&self) -> Option<Arc<IrqDomain>> {
        self.domain.get().and_then(Weak::upgrade)
    }

    /// Programs the controller of the executing core's node.
    ///
    /// Runs on every core that comes up; only the first core of a node
    /// writes the node-wide registers. On the boot CPU the enable mirror is
    /// reset to all-enabled first.
    pub fn init_node(&self) {
        let hw = self.platform.current_hw_cpu();
        let mut en = self.affinity_lock.lock_irq_disabled();
        if hw == self.topology.boot_hw_cpu() {
            *en = [u32::MAX; EXTIOI_EN_WORDS];
        }
        if hw.as_u32() % self.topology.cores_per_node() != 0 {
            return;
        }

        let iocsr = self.platform.iocsr();
        let other = iocsr.read_d(OTHER_FUNC);
        iocsr.write_d(OTHER_FUNC, other | OTHER_FUNC_EXT_INT_EN);

        // Node type j is the pair of nodes 2j and 2j+1.
        for j in 0..8u32 {
            let data = ((j << 1) + 1) << 16 | j << 1;
            iocsr.write_w(EXTIOI_NODEMAP_BASE + j as usize * 4, data);
        }
        // Every vector group goes to core pin INT1.
        for j in 0..2 {
            iocsr.write_w(EXTIOI_IPMAP_BASE + j * 4, 0x0202_0202);
        }
        // Default route: core 0 of node 0.
        for j in 0..EXTIOI_IRQS / 4 {
            iocsr.write_w(EXTIOI_ROUTE_BASE + j * 4, 0x1111_1111);
        }
        for (j, word) in en.iter().enumerate() {
            iocsr.write_w(EXTIOI_BOUNCE_BASE + j * 4, u32::MAX);
            iocsr.write_w(EXTIOI_EN_BASE + j * 4, *word);
        }
    }

    /// Routes `vector` to the online CPUs of `affinity`.
    ///
    /// The vector is disabled on every node while its route changes and
    /// enabled again afterwards. Returns the CPUs the vector now reaches.
    /// Fails with [`Error::InvalidArgs`], before any register write, if
    /// `affinity` has no online CPU.
    pub fn set_vector_affinity(&self, vector: HwIrq, affinity: &CpuSet) -> Result<CpuSet> {
        if vector as usize >= EXTIOI_IRQS {
            return Err(Error::InvalidArgs);
        }

        let en = self.affinity_lock.lock_irq_disabled();
        let target = affinity.intersection(&self.topology.online_cpus());
        if target.is_empty() {
            return Err(Error::InvalidArgs);
        }

        let iocsr = self.platform.iocsr();
        let word = (vector >> 5) as usize;
        let bit = 1u32 << (vector & 0x1f);
        let en_reg = EXTIOI_EN_BASE + word * 4;
        let nodes = self.topology.online_nodes();
        let cores_per_node = self.topology.cores_per_node();

        for node in nodes.iter() {
            any_send(iocsr, en_reg, en[word] & !bit, 0, node * cores_per_node);
        }
        self.set_route(vector, &target, &nodes);
        for node in nodes.iter() {
            any_send(iocsr, en_reg, en[word], 0, node * cores_per_node);
        }

        Ok(target)
    }

    fn set_route(&self, vector: HwIrq, affinity: &CpuSet, nodes: &[u32]) {
        let cores_per_node = self.topology.cores_per_node();
        let pos_off = (vector & !3) as usize;
        let data_byte = vector & 3;
        let data_mask = !(1u32 << data_byte) & 0xf;

        let mut node_map = 0u32;
        let mut core_map = [0u32; MAX_NUMNODES];
        for cpu in affinity.iter() {
            let Some(hw) = self.topology.logical_to_hw(cpu) else {
                continue;
            };
            let node = (hw.as_u32() / cores_per_node) as usize;
            if node >= MAX_NUMNODES {
                continue;
            }
            node_map |= 1 << node;
            core_map[node] |= 1 << (hw.as_u32() % cores_per_node);
        }

        for &node in nodes {
            let Some(cores) = core_map.get(node as usize) else {
                continue;
            };
            let route_node = if node == 0 { node_map } else { 1 << node };
            let route = (cores | route_node << 4) & 0xff;
            any_send(
                self.platform.iocsr(),
                EXTIOI_ROUTE_BASE + pos_off,
                route << (data_byte * 8),
                data_mask,
                node * cores_per_node,
            );
        }
    }
}

impl IrqChip for Eiointc {
    fn name(&self) -> &'static str {
        "EIOINTC"
    }

    fn set_affinity(&self, data: &IrqDataRef<'_>, mask: &CpuSet, _force: bool) -> Result<CpuSet> {
        self.set_vector_affinity(data.hwirq(), mask)
    }
}

impl SyscoreOps for Eiointc {
    fn name(&self) -> &'static str {
        "eiointc"
    }

    fn resume(&self) {
        self.init_node();

        let Some(domain) = self.domain() else {
            return;
        };
        for desc in self.irq_core.active_irqs() {
            let Some(vector) = desc.hwirq_in(&domain) else {
                continue;
            };
            let affinity = desc.affinity();
            match self.set_vector_affinity(vector, &affinity) {
                Ok(effective) => desc.update_affinity(&affinity, effective),
                Err(err) => warn!("eiointc: cannot restore vector {}: {}", vector, err),
            }
        }
    }
}

struct EiointcOps {
    chip: Arc<Eiointc>,
}

impl IrqDomainOps for EiointcOps {
    fn translate(&self, spec: &FwSpec) -> Result<(HwIrq, Trigger)> {
        let hwirq = spec.param(0).ok_or(Error::InvalidArgs)?;
        Ok((hwirq, Trigger::None))
    }

    fn alloc(
        &self,
        core: &IrqCore,
        domain: &Arc<IrqDomain>,
        virq: Virq,
        nr_irqs: u32,
        spec: &FwSpec,
    ) -> Result<()> {
        let (hwirq, _) = self.translate(spec)?;
        if (hwirq + nr_irqs) as usize > EXTIOI_IRQS {
            return Err(Error::InvalidArgs);
        }
        for i in 0..nr_irqs {
            core.set_info(domain, virq + i, hwirq + i, self.chip.clone(), FlowHandler::Edge)?;
        }
        Ok(())
    }

    fn free(&self, core: &IrqCore, domain: &Arc<IrqDomain>, virq: Virq, nr_irqs: u32) {
        core.reset_irq_data(domain, virq, nr_irqs);
        for i in 0..nr_irqs {
            let _ = core.set_flow(virq + i, FlowHandler::Bad);
        }
    }
}

struct EiointcCascade {
    platform: Arc<dyn Platform>,
    domain: Arc<IrqDomain>,
}

impl ChainedHandler for EiointcCascade {
    fn handle(&self, core: &IrqCore, desc: &IrqDesc) {
        let _chained = desc.chained_enter();
        let iocsr = self.platform.iocsr();

        let mut handled = false;
        for i in 0..EXTIOI_ISR_REGS {
            let reg = EXTIOI_ISR_BASE + i * 8;
            let mut pending = iocsr.read_d(reg);
            // Acknowledge before scanning so that a new assertion is kept.
            iocsr.write_d(reg, pending);
            while pending != 0 {
                let bit = pending.trailing_zeros();
                let vector = bit + 64 * i as u32;
                if let Err(err) = core.handle_domain_irq(&self.domain, vector) {
                    warn!("eiointc: vector {} not handled: {:?}", vector, err);
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

/// Initializes the EXTIOI of the boot node and cascades it from the bridge
/// pin of `parent_domain`.
pub fn init(
    core: &Arc<IrqCore>,
    platform: Arc<dyn Platform>,
    topology: Arc<CpuTopology>,
    parent_domain: &Arc<IrqDomain>,
) -> Result<(Arc<Eiointc>, Arc<IrqDomain>)> {
    init_on_line(core, platform, topology, parent_domain, LOONGSON_BRIDGE_IRQ)
}

/// Like [`init`], but cascades from the core line `parent_line`.
pub fn init_on_line(
    core: &Arc<IrqCore>,
    platform: Arc<dyn Platform>,
    topology: Arc<CpuTopology>,
    parent_domain: &Arc<IrqDomain>,
    parent_line: HwIrq,
) -> Result<(Arc<Eiointc>, Arc<IrqDomain>)> {
    let chip = Arc::new(Eiointc::new(platform.clone(), topology, core.clone()));
    chip.init_node();

    let domain = core.create_linear_domain(
        "EIOINTC",
        EXTIOI_FWNODE,
        EXTIOI_IRQS,
        None,
        Arc::new(EiointcOps { chip: chip.clone() }),
    )?;
    chip.domain.call_once(|| Arc::downgrade(&domain));

    let parent = core.create_mapping(parent_domain, &FwSpec::one(parent_line))?;
    core.set_chained_handler(
        parent,
        Arc::new(EiointcCascade {
            platform,
            domain: domain.clone(),
        }),
    )?;

    info!("eiointc: {} vectors, cascaded from core line {}", EXTIOI_IRQS, parent_line);
    Ok((chip, domain))
}
