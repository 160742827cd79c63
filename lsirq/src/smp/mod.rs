// SPDX-License-Identifier: MPL-2.0

//! Symmetric multiprocessing on Loongson-3 processors.
//!
//! Secondary cores sit in firmware polling mailbox slot 0 of their IPI
//! hardware. The boot CPU wakes one up by filling in the start arguments,
//! the entry point last. Once running, cores signal each other through the
//! IPI status bits (see [`IpiAction`]).

mod call;
mod hotplug;

use core::sync::atomic::{Ordering, fence};

use log::{debug, info, warn};

pub use self::hotplug::{ClockGate, CpuHotplug};
use self::call::CallQueues;
use crate::{
    Error,
    boot::{CpuFeatures, SysConf, Workarounds},
    cpu::{CpuState, CpuTopology},
    io::Platform,
    ipi::{self, IPI_IRQ_OFFSET, IpiAction, IpiTransport, MAILBOX_PC},
    irq::{IrqCore, disable_local},
    irqchip::{
        cpu_intc::{ECFG_LIE_MASK, INT_HWI0, INT_HWI1, INT_IPI, INT_TIMER, ecfg_bit},
        eiointc::Eiointc,
    },
    pm::SyscoreOps,
    prelude::*,
    sync::Once,
};

/// Mailbox slots of the start arguments.
const MAILBOX_SP: usize = 1;
const MAILBOX_TP: usize = 2;
const MAILBOX_ARG: usize = 3;

/// The register state a secondary CPU starts with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StartArgs {
    /// The entry point.
    pub pc: u64,
    /// The stack pointer.
    pub sp: u64,
    /// The thread pointer.
    pub tp: u64,
}

/// The SMP operations of Loongson-3 machines.
pub struct Loongson3Smp {
    platform: Arc<dyn Platform>,
    topology: Arc<CpuTopology>,
    irq_core: Arc<IrqCore>,
    features: CpuFeatures,
    workarounds: Workarounds,
    ipi: Once<Arc<dyn IpiTransport>>,
    eiointc: Once<Arc<Eiointc>>,
    reschedule: Once<fn()>,
    calls: CallQueues,
}

impl Loongson3Smp {
    /// Creates the SMP operations. Nothing is usable before
    /// [`Self::smp_setup`].
    pub fn new(
        platform: Arc<dyn Platform>,
        topology: Arc<CpuTopology>,
        irq_core: Arc<IrqCore>,
        conf: &SysConf,
    ) -> Self {
        Self {
            platform,
            topology,
            irq_core,
            features: conf.features,
            workarounds: conf.workarounds,
            ipi: Once::new(),
            eiointc: Once::new(),
            reschedule: Once::new(),
            calls: CallQueues::new(),
        }
    }

    /// Returns the CPU topology.
    pub fn topology(&self) -> &Arc<CpuTopology> {
        &self.topology
    }

    /// Returns the selected IPI transport.
    pub fn transport(&self) -> Option<&Arc<dyn IpiTransport>> {
        self.ipi.get()
    }

    /// Hands over the EXTIOI that secondary CPUs program for their node.
    pub fn attach_eiointc(&self, eiointc: Arc<Eiointc>) {
        self.eiointc.call_once(|| eiointc);
    }

    /// Registers the function a `RESCHEDULE` IPI runs.
    pub fn register_reschedule_hook(&self, hook: fn()) {
        self.reschedule.call_once(|| hook);
    }

    /// Returns the logical id of the executing CPU.
    pub fn current_cpu(&self) -> Option<CpuId> {
        self.topology.hw_to_logical(self.platform.current_hw_cpu())
    }

    /// Builds the CPU maps, selects the IPI transport and prepares the
    /// mailboxes. Runs once on the boot CPU.
    pub fn smp_setup(&self) -> Result<()> {
        let num = self.topology.build_from_reserved();
        let mapped: Vec<HwCpuId> = (0..num)
            .filter_map(|id| CpuId::try_from(id).ok())
            .filter_map(|cpu| self.topology.logical_to_hw(cpu))
            .collect();

        let transport = ipi::select(self.platform.clone(), self.features, mapped.iter().copied())?;
        debug!("smp: using the {} IPI transport", transport.name());
        let transport = self.ipi.call_once(|| transport);

        let boot_hw = self
            .topology
            .logical_to_hw(CpuId::bsp())
            .ok_or(Error::NoDevice)?;
        transport.enable(boot_hw);
        for hw in mapped {
            transport.mail_send(hw, MAILBOX_PC, 0);
        }

        self.topology.set_core_package(CpuId::bsp());
        Ok(())
    }

    /// Marks the firmware-reported CPUs present and the boot CPU online.
    pub fn prepare_cpus(&self) {
        for id in 0..self.topology.nr_cpus() as usize {
            if let Ok(cpu) = CpuId::try_from(id) {
                self.topology.set_present(cpu, true);
            }
        }
        if let Some(cpu) = self.current_cpu() {
            self.topology.set_state(cpu, CpuState::Online);
            self.topology.set_online(cpu, true);
        }
    }

    /// Starts `cpu` with the register state `args`.
    ///
    /// The entry point is written last: the secondary starts fetching as
    /// soon as it becomes nonzero.
    pub fn boot_secondary(&self, cpu: CpuId, args: &StartArgs) -> Result<()> {
        let transport = self.ipi.get().ok_or(Error::NoDevice)?;
        let hw = self.topology.logical_to_hw(cpu).ok_or(Error::InvalidArgs)?;

        info!("Booting CPU#{}...", cpu);
        debug!(
            "CPU#{}, func_pc={:#x}, sp={:#x}, tp={:#x}",
            cpu, args.pc, args.sp, args.tp
        );

        transport.mail_send(hw, MAILBOX_ARG, 0);
        transport.mail_send(hw, MAILBOX_TP, args.tp);
        transport.mail_send(hw, MAILBOX_SP, args.sp);
        transport.mail_send(hw, MAILBOX_PC, args.pc);
        Ok(())
    }

    /// Early setup on a secondary CPU: interrupt lines, IPIs and its node's
    /// EXTIOI. Local interrupts stay disabled.
    pub fn init_secondary(&self) -> Result<()> {
        let hw = self.platform.current_hw_cpu();
        let cpu = self.topology.hw_to_logical(hw).ok_or(Error::NoDevice)?;
        let transport = self.ipi.get().ok_or(Error::NoDevice)?;

        let core = self.platform.core();
        let imask = ecfg_bit(INT_TIMER) | ecfg_bit(INT_IPI) | ecfg_bit(INT_HWI1) | ecfg_bit(INT_HWI0);
        core.set_ecfg(core.ecfg() & !ECFG_LIE_MASK | imask);

        transport.enable(hw);

        self.topology.set_state(cpu, CpuState::Online);
        self.topology.set_core_package(cpu);

        if self.features.contains(CpuFeatures::EXTIOI) {
            match self.eiointc.get() {
                Some(eiointc) => eiointc.init_node(),
                None => warn!("smp: CPU#{} found no EXTIOI to set up", cpu),
            }
        }
        Ok(())
    }

    /// Last step of bringing up a secondary CPU: interrupts on, and the
    /// entry point consumed.
    pub fn smp_finish(&self) {
        crate::arch::irq::enable_local();

        let hw = self.platform.current_hw_cpu();
        if let Some(transport) = self.ipi.get() {
            transport.clear_mailbox(hw);
        }
        if let Some(cpu) = self.topology.hw_to_logical(hw) {
            info!("CPU#{} finished", cpu);
        }
    }

    /// Sends `action` to `cpu`.
    pub fn send_ipi_single(&self, cpu: CpuId, action: IpiAction) {
        self.send_raw(cpu, action.bits());
    }

    /// Sends `action` to every CPU of `mask`.
    pub fn send_ipi_mask(&self, mask: &CpuSet, action: IpiAction) {
        for cpu in mask.iter() {
            self.send_raw(cpu, action.bits());
        }
    }

    /// Raises the IRQ bits `irqs` on `cpu`, carried above the IPI actions.
    pub fn send_irq_by_ipi(&self, cpu: CpuId, irqs: u32) {
        self.send_raw(cpu, irqs << IPI_IRQ_OFFSET);
    }

    fn send_raw(&self, cpu: CpuId, bits: u32) {
        let (Some(transport), Some(hw)) = (self.ipi.get(), self.topology.logical_to_hw(cpu)) else {
            warn!("smp: cannot signal CPU#{}", cpu);
            return;
        };
        transport.write_action(hw, bits);
    }

    /// Handles the IPI line on the executing CPU.
    ///
    /// Returns the IRQ bits that were carried above the actions.
    pub fn ipi_interrupt(&self) -> u32 {
        let Some(transport) = self.ipi.get() else {
            return 0;
        };
        let hw = self.platform.current_hw_cpu();
        let bits = transport.read_clear(hw);
        let action = IpiAction::from_bits_truncate(bits);

        if action.contains(IpiAction::RESCHEDULE) {
            if let Some(hook) = self.reschedule.get() {
                hook();
            }
        }
        if action.contains(IpiAction::CALL_FUNCTION) {
            if let Some(cpu) = self.topology.hw_to_logical(hw) {
                let _irq_guard = disable_local();
                self.calls.drain(cpu);
            }
        }
        bits >> IPI_IRQ_OFFSET
    }

    /// Runs `f` on every CPU of `targets`.
    ///
    /// Other CPUs run `f` from their IPI handler, asynchronously. If the
    /// executing CPU is a target, `f` runs on it before this returns.
    pub fn inter_processor_call(&self, targets: &CpuSet, f: fn()) {
        let irq_guard = disable_local();
        let this_cpu = self.current_cpu();

        let mut call_on_self = false;
        for cpu in targets.iter() {
            if Some(cpu) == this_cpu {
                call_on_self = true;
                continue;
            }
            self.calls.push(cpu, f);
        }
        for cpu in targets.iter() {
            if Some(cpu) != this_cpu {
                self.send_ipi_single(cpu, IpiAction::CALL_FUNCTION);
            }
        }
        drop(irq_guard);

        if call_on_self {
            f();
        }
    }

    /// Waits until `cpu` has parked itself.
    ///
    /// There is no timeout: a CPU that never parks hangs the caller.
    pub fn cpu_die(&self, cpu: CpuId) {
        while self.topology.state(cpu) != CpuState::Dead {
            crate::arch::cpu_relax();
        }
        fence(Ordering::SeqCst);
    }

    /// Parks the executing CPU, which has gone offline, until it is started
    /// again, and returns its new start arguments.
    pub fn play_dead(&self) -> Result<StartArgs> {
        let hw = self.platform.current_hw_cpu();
        let cpu = self.topology.hw_to_logical(hw).ok_or(Error::NoDevice)?;
        let transport = self.ipi.get().ok_or(Error::NoDevice)?;

        fence(Ordering::SeqCst);
        self.topology.set_state(cpu, CpuState::Dead);

        let pc = loop {
            let pc = transport.mailbox(hw, MAILBOX_PC);
            if pc != 0 {
                break pc;
            }
            crate::arch::cpu_relax();
        };
        Ok(StartArgs {
            pc,
            sp: transport.mailbox(hw, MAILBOX_SP),
            tp: transport.mailbox(hw, MAILBOX_TP),
        })
    }
}

/// Re-enables the IPIs of the boot CPU on wake-up, before the secondary
/// CPUs come back.
impl SyscoreOps for Loongson3Smp {
    fn name(&self) -> &'static str {
        "ipi"
    }

    fn resume(&self) {
        let (Some(transport), Some(hw)) = (self.ipi.get(), self.topology.logical_to_hw(CpuId::bsp())) else {
            return;
        };
        transport.enable(hw);
    }
}
