// SPDX-License-Identifier: MPL-2.0

//! Interrupt and inter-processor interrupt support for LoongArch machines
//! with Loongson chipsets.
//!
//! The crate builds the interrupt controller cascade of the machine (core
//! lines, LIOINTC, EXTIOI or the HT vector controller, PCH-PIC and
//! PCH-MSI), brings secondary CPUs up and down through the IPI mailboxes,
//! and consumes the LoongArch subtables of the ACPI MADT.
//!
//! [`init`] runs everything in boot order on the boot CPU. The kernel then
//! forwards interrupt exceptions to [`Machine::handle_exception`].
#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod acpi;
pub mod arch;
pub mod boot;
pub mod cascade;
pub mod console;
pub mod cpu;
mod error;
pub mod io;
pub mod ipi;
pub mod irq;
pub mod irqchip;
pub mod logger;
pub mod msi;
pub mod pm;
pub mod prelude;
pub mod smp;
pub mod sync;

use log::{error, info, warn};

pub use self::{error::Error, prelude::Result};
use self::{
    acpi::{Acpi, gsi, madt::Madt},
    boot::{SysConf, kcmdline::KCmdlineArg},
    cascade::{Cascade, VectorTable},
    cpu::CpuTopology,
    io::Platform,
    irq::IrqCore,
    msi::{MsiAllocation, MsiKind},
    pm::{SyscoreOps, SyscoreRegistry},
    prelude::*,
    smp::Loongson3Smp,
    sync::Once,
};

/// The interrupt and SMP state of the machine.
pub struct Machine {
    conf: SysConf,
    cmdline: KCmdlineArg,
    topology: Arc<CpuTopology>,
    irq_core: Arc<IrqCore>,
    acpi: Acpi,
    cascade: Cascade,
    smp: Arc<Loongson3Smp>,
    syscore: SyscoreRegistry,
    vectors: VectorTable,
    pmu: Arc<Once<fn()>>,
}

impl Machine {
    /// Brings the interrupt system up on the boot CPU.
    ///
    /// `madt` is the raw MADT, if the firmware provides one. The order is:
    /// the logger, the MADT pass, the CPU maps and IPIs, the cascade, the
    /// vectors, and last the sleep hooks.
    ///
    /// # Errors
    ///
    /// A controller that cannot be set up, such as a domain whose creation
    /// fails, aborts the boot with its error. Nothing panics here.
    pub fn new(
        platform: Arc<dyn Platform>,
        conf: SysConf,
        cmdline: KCmdlineArg,
        madt: Option<&[u8]>,
    ) -> Result<Self> {
        logger::init(&cmdline);

        let acpi = Acpi::new(&cmdline);
        let topology = Arc::new(CpuTopology::new(&conf));
        let irq_core = Arc::new(IrqCore::new());
        let cascade = Cascade::new(irq_core.clone(), platform.clone(), topology.clone(), &conf);

        let madt = match madt {
            Some(table) if !acpi.is_disabled() => match Madt::new(table) {
                Ok(madt) => Some(madt),
                Err(err) => {
                    error!("ACPI: unusable MADT ({}), disabling ACPI", err);
                    acpi.disable();
                    None
                }
            },
            _ => None,
        };
        if let Some(madt) = &madt {
            let processed = acpi.process_madt(
                madt,
                conf.bpi_version,
                &topology,
                cascade.pch_pics(),
                platform.as_ref(),
            );
            if processed.is_err() {
                info!("ACPI: CPU maps come from the boot parameters");
            }
        }

        let smp = Arc::new(Loongson3Smp::new(
            platform.clone(),
            topology.clone(),
            irq_core.clone(),
            &conf,
        ));
        smp.smp_setup()?;
        smp.prepare_cpus();

        let madt = madt.filter(|_| !acpi.is_disabled());
        cascade.arch_init_irq(&acpi, madt.as_ref())?;
        if let Some(eiointc) = cascade.eiointc() {
            smp.attach_eiointc(eiointc.clone());
        }

        let vectors = VectorTable::new();
        let pmu: Arc<Once<fn()>> = Arc::new(Once::new());
        let ipi = {
            let smp = smp.clone();
            let irq_core = irq_core.clone();
            Arc::new(move || {
                let mut irqs = smp.ipi_interrupt();
                while irqs != 0 {
                    let irq = irqs.trailing_zeros();
                    irqs &= !(1 << irq);
                    if let Err(err) = irq_core.generic_handle_irq(irq) {
                        warn!("ipi: carried IRQ {} not handled: {:?}", irq, err);
                    }
                }
            })
        };
        let pmu_handler = {
            let pmu = pmu.clone();
            Arc::new(move || {
                if let Some(hook) = pmu.get() {
                    hook();
                }
            })
        };
        cascade.install_vectors(&vectors, ipi, pmu_handler)?;

        let syscore = SyscoreRegistry::new();
        syscore.register(smp.clone() as Arc<dyn SyscoreOps>);
        cascade.register_syscore(&syscore);

        info!(
            "lsirq: {:?} cascade, {} CPU(s) possible",
            cascade.kind(),
            topology.possible_cpus().count()
        );
        Ok(Self {
            conf,
            cmdline,
            topology,
            irq_core,
            acpi,
            cascade,
            smp,
            syscore,
            vectors,
            pmu,
        })
    }

    /// Returns the platform configuration.
    pub fn conf(&self) -> &SysConf {
        &self.conf
    }

    /// Returns the kernel command line.
    pub fn cmdline(&self) -> &KCmdlineArg {
        &self.cmdline
    }

    /// Returns the CPU topology.
    pub fn topology(&self) -> &Arc<CpuTopology> {
        &self.topology
    }

    /// Returns the IRQ core.
    pub fn irq_core(&self) -> &Arc<IrqCore> {
        &self.irq_core
    }

    /// Returns the ACPI state.
    pub fn acpi(&self) -> &Acpi {
        &self.acpi
    }

    /// Returns the interrupt controllers.
    pub fn cascade(&self) -> &Cascade {
        &self.cascade
    }

    /// Returns the SMP operations.
    pub fn smp(&self) -> &Arc<Loongson3Smp> {
        &self.smp
    }

    /// Returns the sleep hooks.
    pub fn syscore(&self) -> &SyscoreRegistry {
        &self.syscore
    }

    /// Registers the performance counter overflow handler.
    pub fn register_pmu_hook(&self, hook: fn()) {
        self.pmu.call_once(|| hook);
    }

    /// Handles the interrupt exception `code` on the executing CPU.
    pub fn handle_exception(&self, code: u32) -> Result<()> {
        self.vectors.dispatch(code)
    }

    /// Maps `gsi` to a virtual IRQ, returning -1 on failure.
    pub fn register_gsi(&self, gsi: u32) -> i32 {
        gsi::register_gsi(&self.cascade, gsi)
    }

    /// Maps a hot-added processor.
    pub fn acpi_map_cpu(&self, hw: HwCpuId) -> Result<CpuId> {
        self.acpi.map_cpu(&self.topology, hw)
    }

    /// Forgets a hot-removed processor.
    pub fn acpi_unmap_cpu(&self, cpu: CpuId) {
        self.acpi.unmap_cpu(&self.topology, cpu);
    }

    /// Allocates `nvec` MSI or MSI-X vectors for the PCI device
    /// `requester_id`.
    pub fn arch_setup_msi_irqs(&self, requester_id: u16, kind: MsiKind, nvec: u32) -> Result<MsiAllocation> {
        msi::setup_msi_irqs(
            &self.irq_core,
            self.cascade.pci_msi_domain(),
            self.cmdline.msix_enabled(),
            requester_id,
            kind,
            nvec,
        )
    }

    /// Releases an MSI vector.
    pub fn arch_teardown_msi_irq(&self, virq: Virq) {
        msi::teardown_msi_irq(&self.irq_core, virq);
    }

    /// Saves controller state before system sleep.
    pub fn suspend(&self) -> Result<()> {
        self.syscore.suspend()
    }

    /// Restores controller state after system sleep.
    pub fn resume(&self) {
        self.syscore.resume();
    }
}

static MACHINE: Once<Machine> = Once::new();

/// Brings the interrupt system up. Only the first call has an effect.
pub fn init(
    platform: Arc<dyn Platform>,
    conf: SysConf,
    cmdline: KCmdlineArg,
    madt: Option<&[u8]>,
) -> Result<&'static Machine> {
    MACHINE.try_call_once(|| Machine::new(platform, conf, cmdline, madt))
}

/// Returns the machine set up by [`init`].
pub fn machine() -> Option<&'static Machine> {
    MACHINE.get()
}
