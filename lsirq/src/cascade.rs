// SPDX-License-Identifier: MPL-2.0

//! Assembly of the interrupt controller cascade.
//!
//! Two layouts exist. In the extended one the EXTIOI collects every
//! south-bridge vector on the bridge pin of the cores:
//!
//! ```text
//! CPU-INTC <- LIOINTC
//!          <- EXTIOI <- PCH-MSI
//!                    <- PCH-PIC
//! ```
//!
//! In the legacy one the vectors travel over HyperTransport lines into the
//! HT vector controller, itself chained from LIOINTC lines 24 to 31:
//!
//! ```text
//! CPU-INTC <- LIOINTC <- HTVEC <- PCH-MSI
//!                              <- PCH-PIC
//! ```
//!
//! The layout is either the built-in default or read from the MADT.
//! Either way the controllers are set up parents first.

use log::{error, info, warn};
use smallvec::SmallVec;

use crate::{
    Error,
    acpi::{
        Acpi,
        madt::{Madt, MadtEntry, MadtType},
    },
    boot::{BpiVersion, CpuFeatures, LOONGSON_PCH_IRQ_BASE, RouteModel, SysConf},
    cpu::CpuTopology,
    io::Platform,
    irq::{FwNode, HwIrq, IrqCore, IrqDomain},
    irqchip::{
        cpu_intc::{
            self, ECFG_LIE_MASK, INT_HWI0, INT_HWI1, INT_IPI, INT_PCOV, INT_TIMER, NR_CPU_LINES,
            ecfg_bit,
        },
        eiointc::{self, Eiointc},
        htvec::{self, HTVEC_MAX_PARENT_IRQ},
        liointc::{self, DEFAULT_PARENTS, Liointc, LiointcParent},
        pch_msi::{self, PchMsiDomains},
        pch_pic::{self, MAX_PCH_PICS, PchPicTable},
    },
    pm::{SyscoreOps, SyscoreRegistry},
    prelude::*,
    sync::{Once, RwLock},
};

/// The vectors of the south bridge without the 256-vector MSI extension.
const MSI_VECTORS: u32 = 128;
/// The vectors of the south bridge with it.
const MSI_VECTORS_EXT: u32 = 256;

/// The shape of the cascade.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CascadeKind {
    /// Bridge vectors arrive through the HT vector controller.
    Legacy,
    /// Bridge vectors arrive through the EXTIOI.
    Extended,
}

impl CascadeKind {
    /// Selects the shape for the machine described by `conf`.
    pub fn select(conf: &SysConf) -> Self {
        if conf.features.contains(CpuFeatures::EXTIOI) && conf.route_model == RouteModel::Ext {
            Self::Extended
        } else {
            Self::Legacy
        }
    }

    /// Returns the route model the controllers are programmed for.
    pub fn route_model(self) -> RouteModel {
        match self {
            Self::Legacy => RouteModel::Line,
            Self::Extended => RouteModel::Ext,
        }
    }
}

/// Exception codes of the interrupt vectors, one per core line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum ExcCode {
    /// The LIOINTC pin.
    Ip0 = EXCCODE_INT_START + INT_HWI0,
    /// The bridge pin.
    Ip1 = EXCCODE_INT_START + INT_HWI1,
    /// Performance counter overflow.
    Pc = EXCCODE_INT_START + INT_PCOV,
    /// The constant timer.
    Timer = EXCCODE_INT_START + INT_TIMER,
    /// Inter-processor interrupts.
    Ipi = EXCCODE_INT_START + INT_IPI,
}

/// The exception code of core line 0.
pub const EXCCODE_INT_START: u32 = 64;

impl ExcCode {
    fn line(self) -> HwIrq {
        self as u32 - EXCCODE_INT_START
    }
}

/// A vectored interrupt handler.
pub type VectorHandler = Arc<dyn Fn() + Send + Sync>;

/// The handlers of the interrupt exception codes.
pub struct VectorTable {
    handlers: RwLock<[Option<VectorHandler>; NR_CPU_LINES]>,
}

impl VectorTable {
    /// Creates a table with no handler.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(core::array::from_fn(|_| None)),
        }
    }

    /// Installs the handler of `code`.
    ///
    /// Fails with [`Error::Busy`] if one is installed already.
    pub fn set(&self, code: ExcCode, handler: VectorHandler) -> Result<()> {
        let mut handlers = self.handlers.write();
        let slot = &mut handlers[code.line() as usize];
        if slot.is_some() {
            return Err(Error::Busy);
        }
        *slot = Some(handler);
        Ok(())
    }

    /// Runs the handler of exception code `code`.
    pub fn dispatch(&self, code: u32) -> Result<()> {
        let handler = code
            .checked_sub(EXCCODE_INT_START)
            .and_then(|line| self.handlers.read().get(line as usize).cloned().flatten())
            .ok_or(Error::NoDevice)?;
        handler();
        Ok(())
    }
}

impl Default for VectorTable {
    fn default() -> Self {
        Self::new()
    }
}

/// The interrupt controllers of the machine.
pub struct Cascade {
    core: Arc<IrqCore>,
    platform: Arc<dyn Platform>,
    topology: Arc<CpuTopology>,
    conf: SysConf,
    kind: CascadeKind,
    pics: PchPicTable,
    cpu: Once<Arc<IrqDomain>>,
    liointc: Once<(Arc<Liointc>, Arc<IrqDomain>)>,
    eiointc: Once<(Arc<Eiointc>, Arc<IrqDomain>)>,
    htvec: Once<Arc<IrqDomain>>,
    msi: Once<PchMsiDomains>,
}

impl Cascade {
    /// Creates an empty cascade.
    pub fn new(
        core: Arc<IrqCore>,
        platform: Arc<dyn Platform>,
        topology: Arc<CpuTopology>,
        conf: &SysConf,
    ) -> Self {
        Self {
            core,
            platform,
            topology,
            conf: conf.clone(),
            kind: CascadeKind::select(conf),
            pics: PchPicTable::new(),
            cpu: Once::new(),
            liointc: Once::new(),
            eiointc: Once::new(),
            htvec: Once::new(),
            msi: Once::new(),
        }
    }

    /// Returns the IRQ core the controllers live in.
    pub fn core(&self) -> &Arc<IrqCore> {
        &self.core
    }

    /// Returns the shape of the cascade.
    pub fn kind(&self) -> CascadeKind {
        self.kind
    }

    /// Returns the registered PCH-PICs.
    pub fn pch_pics(&self) -> &PchPicTable {
        &self.pics
    }

    /// Registers the PCH-PIC at `address`, serving GSIs from `gsi_base`.
    pub fn register_pch_pic(&self, id: u32, address: u64, gsi_base: u32) -> Result<usize> {
        self.pics.register(self.platform.as_ref(), id, address, gsi_base)
    }

    /// Returns the domain of the core interrupt lines.
    pub fn cpu_domain(&self) -> Option<&Arc<IrqDomain>> {
        self.cpu.get()
    }

    /// Returns the LIOINTC domain.
    pub fn liointc_domain(&self) -> Option<&Arc<IrqDomain>> {
        self.liointc.get().map(|(_, domain)| domain)
    }

    /// Returns the EXTIOI chip, if the extended cascade is in use.
    pub fn eiointc(&self) -> Option<&Arc<Eiointc>> {
        self.eiointc.get().map(|(chip, _)| chip)
    }

    /// Returns the EXTIOI domain.
    pub fn eiointc_domain(&self) -> Option<&Arc<IrqDomain>> {
        self.eiointc.get().map(|(_, domain)| domain)
    }

    /// Returns the HT vector domain of the legacy cascade.
    pub fn htvec_domain(&self) -> Option<&Arc<IrqDomain>> {
        self.htvec.get()
    }

    /// Returns the PCH-MSI domains.
    pub fn msi(&self) -> Option<&PchMsiDomains> {
        self.msi.get()
    }

    /// Returns the domain PCI devices allocate MSIs from.
    pub fn pci_msi_domain(&self) -> Option<&Arc<IrqDomain>> {
        self.msi.get().map(|msi| &msi.pci)
    }

    /// Returns the domain of the PCH-PIC serving `gsi`.
    pub fn pch_domain_of(&self, gsi: u32) -> Option<(Arc<IrqDomain>, u32)> {
        let config = self.pics.get(self.pics.find(gsi)?)?;
        let domain = self.core.find_domain(&config.fwnode())?;
        Some((domain, gsi - config.gsi_base))
    }

    // The controller south-bridge vectors arrive at.
    fn bridge_domain(&self) -> Result<Arc<IrqDomain>> {
        self.eiointc_domain()
            .or_else(|| self.htvec_domain())
            .cloned()
            .ok_or(Error::NoDevice)
    }

    /// Masks every core line, then builds the cascade.
    pub fn arch_init_irq(&self, acpi: &Acpi, madt: Option<&Madt<'_>>) -> Result<()> {
        let csr = self.platform.core();
        csr.set_ecfg(csr.ecfg() & !ECFG_LIE_MASK);
        self.setup_irq(acpi, madt)
    }

    /// Builds the cascade.
    ///
    /// Without ACPI the first PCH-PIC sits at its default address. Firmware
    /// newer than the first boot interface describes the controllers in
    /// the MADT; otherwise the built-in layout is used.
    pub fn setup_irq(&self, acpi: &Acpi, madt: Option<&Madt<'_>>) -> Result<()> {
        if acpi.is_disabled() {
            if let Err(err) = self.register_pch_pic(0, self.conf.pch_reg_base, LOONGSON_PCH_IRQ_BASE) {
                warn!("irq: default PCH-PIC not registered: {}", err);
            }
            return self.init_default();
        }

        match (self.conf.bpi_version, madt) {
            (BpiVersion::V1, _) => self.init_default(),
            (_, Some(madt)) => self.init_from_madt(madt),
            (_, None) => {
                error!("irq: no MADT to describe the interrupt controllers");
                Err(Error::NoDevice)
            }
        }
    }

    /// Builds the built-in layout.
    pub fn init_default(&self) -> Result<()> {
        let cpu = self.init_cpu_intc()?;
        self.init_liointc(self.conf.liointc_base, &DEFAULT_PARENTS, &cpu)?;

        let start = self.pics.msi_irqbase();
        let vectors = if self.conf.features.contains(CpuFeatures::MSI256) {
            MSI_VECTORS_EXT
        } else {
            MSI_VECTORS
        };
        let count = vectors.checked_sub(start).ok_or(Error::NoSpace)?;

        match self.kind {
            CascadeKind::Extended => {
                info!("Support EXT interrupt.");
                self.init_eiointc(&cpu, INT_HWI1)?;
            }
            CascadeKind::Legacy => {
                self.init_htvec(self.conf.htvec_base, HTVEC_MAX_PARENT_IRQ)?;
            }
        }
        self.init_msi(self.conf.msi_address, start, count)?;
        self.init_pch_pics()
    }

    /// Builds the layout the MADT describes.
    ///
    /// Controllers are set up by subtable type, parents first. The PCH-PICs
    /// must have been registered beforehand.
    pub fn init_from_madt(&self, madt: &Madt<'_>) -> Result<()> {
        let cpu = self.init_cpu_intc()?;

        for entry in madt.collect(MadtType::LioPic, 1)? {
            let MadtEntry::LioPic(lio) = entry else {
                continue;
            };
            let parents: SmallVec<[LiointcParent; 2]> = lio
                .cascade
                .iter()
                .zip(lio.cascade_map.iter())
                .filter(|(line, _)| **line != 0)
                .map(|(line, map)| LiointcParent {
                    line: *line as HwIrq,
                    int_map: map.get(),
                })
                .collect();
            self.init_liointc(lio.address.get(), &parents, &cpu)?;
        }

        for entry in madt.collect(MadtType::HtPic, 1)? {
            let MadtEntry::HtPic(ht) = entry else {
                continue;
            };
            let num_parents = ht.cascade.iter().filter(|line| **line != 0).count();
            self.init_htvec(ht.address.get(), num_parents)?;
        }

        for entry in madt.collect(MadtType::EioPic, 1)? {
            let MadtEntry::EioPic(eio) = entry else {
                continue;
            };
            self.init_eiointc(&cpu, eio.cascade as HwIrq)?;
        }

        for entry in madt.collect(MadtType::MsiPic, 1)? {
            let MadtEntry::MsiPic(msi) = entry else {
                continue;
            };
            self.init_msi(msi.msg_address.get(), msi.start.get(), msi.count.get())?;
        }

        if madt.collect(MadtType::BioPic, MAX_PCH_PICS)?.is_empty() {
            warn!("irq: the MADT describes no PCH-PIC");
        }
        self.init_pch_pics()
    }

    fn init_cpu_intc(&self) -> Result<Arc<IrqDomain>> {
        let domain = cpu_intc::init(&self.core, self.platform.clone())?;
        Ok(self.cpu.call_once(|| domain).clone())
    }

    fn init_liointc(&self, base: u64, parents: &[LiointcParent], cpu: &Arc<IrqDomain>) -> Result<()> {
        let pair = liointc::init(
            &self.core,
            self.platform.as_ref(),
            cpu,
            base,
            parents,
            self.kind.route_model(),
        )?;
        self.liointc.call_once(|| pair);
        Ok(())
    }

    fn init_htvec(&self, base: u64, num_parents: usize) -> Result<()> {
        let liointc = self.liointc_domain().ok_or(Error::NoDevice)?;
        let domain = htvec::init(&self.core, self.platform.as_ref(), liointc, base, num_parents)?;
        self.htvec.call_once(|| domain);
        Ok(())
    }

    fn init_eiointc(&self, cpu: &Arc<IrqDomain>, line: HwIrq) -> Result<()> {
        let pair = eiointc::init_on_line(
            &self.core,
            self.platform.clone(),
            self.topology.clone(),
            cpu,
            line,
        )?;
        self.eiointc.call_once(|| pair);
        Ok(())
    }

    fn init_msi(&self, msg_address: u64, start: u32, count: u32) -> Result<()> {
        let parent = self.bridge_domain()?;
        let ext = self.eiointc.get().is_some();
        let domains = pch_msi::init(
            &self.core,
            &parent,
            FwNode::Address(msg_address),
            msg_address,
            ext,
            start,
            count,
        )?;
        self.msi.call_once(|| domains);
        Ok(())
    }

    fn init_pch_pics(&self) -> Result<()> {
        let parent = self.bridge_domain()?;
        for config in self.pics.all() {
            pch_pic::init(&self.core, self.platform.as_ref(), &parent, &config)?;
        }
        Ok(())
    }

    /// Installs the interrupt vectors and unmasks the lines they serve.
    ///
    /// The LIOINTC, bridge and timer lines enter the core domain; `ipi` and
    /// `pmu` handle the IPI and performance counter vectors.
    pub fn install_vectors(&self, table: &VectorTable, ipi: VectorHandler, pmu: VectorHandler) -> Result<()> {
        info!("Setting up vectored interrupts");
        let cpu = self.cpu.get().ok_or(Error::NoDevice)?;

        for code in [ExcCode::Ip0, ExcCode::Ip1, ExcCode::Timer] {
            let core = self.core.clone();
            let domain = cpu.clone();
            table.set(
                code,
                Arc::new(move || {
                    if let Err(err) = core.handle_domain_irq(&domain, code.line()) {
                        warn!("irq: core line {} not handled: {:?}", code.line(), err);
                    }
                }),
            )?;
        }
        table.set(ExcCode::Pc, pmu)?;
        table.set(ExcCode::Ipi, ipi)?;

        let csr = self.platform.core();
        let lines = [INT_HWI0, INT_HWI1, INT_IPI, INT_PCOV];
        csr.set_ecfg(lines.into_iter().fold(csr.ecfg(), |ecfg, line| ecfg | ecfg_bit(line)));
        Ok(())
    }

    /// Registers the controllers that lose state across system sleep.
    pub fn register_syscore(&self, registry: &SyscoreRegistry) {
        if let Some((chip, _)) = self.liointc.get() {
            registry.register(chip.clone() as Arc<dyn SyscoreOps>);
        }
        if let Some((chip, _)) = self.eiointc.get() {
            registry.register(chip.clone() as Arc<dyn SyscoreOps>);
        }
    }
}
