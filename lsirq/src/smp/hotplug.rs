// SPDX-License-Identifier: MPL-2.0

//! CPU hotplug.

use log::{debug, info};

use super::Loongson3Smp;
use crate::{
    Error,
    boot::Workarounds,
    irq::disable_local,
    irqchip::cpu_intc::ECFG_LIE_MASK,
    prelude::*,
};

/// Low byte of PRID on 3A R1 parts.
pub const PRID_REV_LOONGSON3A_R1: u32 = 0x05;
const PRID_REV_MASK: u32 = 0xff;

const CHIPCFG_BASE: u64 = 0x1fe0_0180;
const FREQCTRL_BASE: u64 = 0x1fe0_01d0;
const PACKAGE_SHIFT: u32 = 44;

/// The generic hotplug state machine, driving CPUs up and down.
pub trait CpuHotplug {
    /// Brings `cpu` online.
    fn cpu_up(&self, cpu: CpuId) -> Result<()>;
    /// Takes `cpu` offline.
    fn cpu_down(&self, cpu: CpuId) -> Result<()>;
}

/// How the clock of a core is gated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClockGate {
    /// Bit `12 + core` of the package's CHIPCFG register (3A R1).
    ChipCfg,
    /// Bit `core * 4 + 3` of the package's FREQCTRL register.
    FreqCtrl,
    /// Core clocks are left running.
    Never,
}

impl ClockGate {
    /// Selects the gate of a processor with identification word `prid`.
    pub fn new(prid: u32, workarounds: Workarounds) -> Self {
        if prid & PRID_REV_MASK == PRID_REV_LOONGSON3A_R1 {
            Self::ChipCfg
        } else if workarounds.contains(Workarounds::CPU_HOTPLUG) {
            Self::Never
        } else {
            Self::FreqCtrl
        }
    }

    /// Returns the register and the bit that gate `core` of `package`.
    pub fn reg_and_bit(self, package: u32, core: u32) -> Option<(u64, u32)> {
        let package = (package as u64) << PACKAGE_SHIFT;
        match self {
            Self::ChipCfg => Some((CHIPCFG_BASE | package, 12 + core)),
            Self::FreqCtrl => Some((FREQCTRL_BASE | package, core * 4 + 3)),
            Self::Never => None,
        }
    }
}

impl Loongson3Smp {
    /// Takes the executing CPU out of service.
    ///
    /// The boot CPU cannot go offline.
    pub fn cpu_disable(&self) -> Result<()> {
        let cpu = self.current_cpu().ok_or(Error::NoDevice)?;
        if cpu == CpuId::bsp() {
            return Err(Error::Busy);
        }

        self.topology.set_online(cpu, false);
        self.topology.calculate_foreign_map();
        {
            let _irq_guard = disable_local();
            self.fixup_irqs();
        }
        self.platform.core().flush_tlb_local();
        info!("CPU#{} is offline", cpu);
        Ok(())
    }

    /// Moves every active IRQ that only targets offline CPUs to the online
    /// CPUs, then masks the core lines of the executing CPU.
    pub fn fixup_irqs(&self) {
        let online = self.topology.online_cpus();
        for desc in self.irq_core.active_irqs() {
            let mut affinity = desc.affinity();
            if !affinity.intersects(&online) {
                affinity = online.clone();
            }
            if let Err(err) = self.irq_core.set_affinity(desc.virq(), &affinity, true) {
                debug!("smp: irq {} keeps its route: {}", desc.virq(), err);
            }
        }
        self.irq_core.cpu_offline();

        let core = self.platform.core();
        core.set_ecfg(core.ecfg() & !ECFG_LIE_MASK);
    }

    /// Ungates the clock of `cpu` before it comes up.
    pub fn enable_clock(&self, cpu: CpuId) -> Result<()> {
        self.update_clock(cpu, true)
    }

    /// Gates the clock of `cpu` after it went down.
    pub fn disable_clock(&self, cpu: CpuId) -> Result<()> {
        self.update_clock(cpu, false)
    }

    fn update_clock(&self, cpu: CpuId, enable: bool) -> Result<()> {
        let gate = ClockGate::new(self.platform.core().prid(), self.workarounds);
        let core_id = self.topology.core_id(cpu);
        let package = self.topology.package_id(cpu);
        let Some((paddr, bit)) = gate.reg_and_bit(package, core_id) else {
            return Ok(());
        };

        let reg = self.platform.map_mmio(paddr, core::mem::size_of::<u32>())?;
        let val = reg.read_w(0);
        let val = if enable { val | 1 << bit } else { val & !(1 << bit) };
        reg.write_w(0, val);
        Ok(())
    }

    /// Brings every possible but offline CPU up and down again, which parks
    /// it with its clock gated.
    pub fn disable_unused_cpus(&self, hotplug: &dyn CpuHotplug) -> Result<()> {
        let online = self.topology.online_cpus();
        let unused: Vec<CpuId> = self
            .topology
            .possible_cpus()
            .iter()
            .filter(|cpu| !online.contains(*cpu))
            .collect();

        for &cpu in &unused {
            hotplug.cpu_up(cpu)?;
        }
        for &cpu in &unused {
            hotplug.cpu_down(cpu)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use core::cell::RefCell;

    use super::*;
    use crate::{
        boot::{CpuFeatures, SysConf},
        cpu::CpuTopology,
        io::{Platform, sim::SimBoard},
        irq::{FwSpec, IrqCore},
        irqchip::{cpu_intc, eiointc},
    };

    fn cpu(id: usize) -> CpuId {
        CpuId::try_from(id).unwrap()
    }

    struct Fixture {
        board: SimBoard,
        core: Arc<IrqCore>,
        smp: Loongson3Smp,
        extioi: Arc<crate::irq::IrqDomain>,
    }

    fn fixture(conf: SysConf) -> Fixture {
        let board = SimBoard::new(4, 4);
        let platform: Arc<dyn Platform> = Arc::new(board.clone());
        let topology = Arc::new(CpuTopology::new(&conf));
        let core = Arc::new(IrqCore::new());
        let smp = Loongson3Smp::new(platform.clone(), topology.clone(), core.clone(), &conf);
        smp.smp_setup().unwrap();
        smp.prepare_cpus();
        for id in 1..4 {
            topology.set_online(cpu(id), true);
            topology.set_core_package(cpu(id));
        }
        let cpu_domain = cpu_intc::init(&core, platform.clone()).unwrap();
        let (_, extioi) = eiointc::init(&core, platform, topology, &cpu_domain).unwrap();
        Fixture {
            board,
            core,
            smp,
            extioi,
        }
    }

    fn csr_conf() -> SysConf {
        SysConf {
            features: CpuFeatures::CSR_IPI,
            ..SysConf::default()
        }
    }

    #[test]
    fn boot_cpu_cannot_go_offline() {
        let f = fixture(csr_conf());
        assert_eq!(f.smp.cpu_disable(), Err(Error::Busy));
        assert!(f.smp.topology().is_online(CpuId::bsp()));
    }

    #[test]
    fn offline_moves_stranded_irqs_to_online_cpus() {
        let f = fixture(csr_conf());
        let stranded = f.core.create_mapping(&f.extioi, &FwSpec::one(9)).unwrap();
        let shared = f.core.create_mapping(&f.extioi, &FwSpec::one(10)).unwrap();
        for virq in [stranded, shared] {
            f.core.request_irq(virq, "dev", |_| {}).unwrap();
        }
        f.core.set_affinity(stranded, &CpuSet::from(cpu(3)), false).unwrap();
        f.core
            .set_affinity(shared, &CpuSet::from_iter([cpu(2), cpu(3)]), false)
            .unwrap();

        f.board.switch_to(3);
        f.smp.cpu_disable().unwrap();

        let topology = f.smp.topology();
        assert!(!topology.is_online(cpu(3)));
        let online = topology.online_cpus();
        let desc = f.core.desc(stranded).unwrap();
        assert_eq!(desc.affinity(), online);
        assert_eq!(desc.effective_affinity(), online);
        let desc = f.core.desc(shared).unwrap();
        assert_eq!(desc.effective_affinity(), CpuSet::from(cpu(2)));

        assert_eq!(f.board.ecfg(3) & ECFG_LIE_MASK, 0);
        assert_eq!(f.board.tlb_flushes(3), 1);
        assert!(topology.foreign_cpus(cpu(3)).is_empty());
    }

    #[test]
    fn clock_gate_follows_the_processor_revision() {
        assert_eq!(ClockGate::new(0x0014_c005, Workarounds::empty()), ClockGate::ChipCfg);
        assert_eq!(ClockGate::new(0x0014_c011, Workarounds::empty()), ClockGate::FreqCtrl);
        assert_eq!(ClockGate::new(0x0014_c011, Workarounds::CPU_HOTPLUG), ClockGate::Never);
        // The R1 gate ignores the workaround.
        assert_eq!(ClockGate::new(0x0014_c005, Workarounds::CPU_HOTPLUG), ClockGate::ChipCfg);

        assert_eq!(ClockGate::ChipCfg.reg_and_bit(1, 2), Some((0x1000_1fe0_0180, 14)));
        assert_eq!(ClockGate::FreqCtrl.reg_and_bit(0, 3), Some((0x1fe0_01d0, 15)));
        assert_eq!(ClockGate::Never.reg_and_bit(0, 3), None);
    }

    #[test]
    fn clock_bits_toggle_per_core() {
        let f = fixture(csr_conf());
        let freqctrl = f.board.window(FREQCTRL_BASE, 4);
        freqctrl.poke(0, 4, 0xffff);

        f.smp.disable_clock(cpu(2)).unwrap();
        assert_eq!(freqctrl.peek(0, 4), 0xffff & !(1 << 11));
        f.smp.enable_clock(cpu(2)).unwrap();
        assert_eq!(freqctrl.peek(0, 4), 0xffff);

        f.board.set_prid(0x0014_c005);
        let chipcfg = f.board.window(CHIPCFG_BASE, 4);
        f.smp.enable_clock(cpu(1)).unwrap();
        assert_eq!(chipcfg.peek(0, 4), 1 << 13);
    }

    #[test]
    fn workaround_leaves_clocks_alone() {
        let conf = SysConf {
            workarounds: Workarounds::CPU_HOTPLUG,
            ..csr_conf()
        };
        let f = fixture(conf);
        f.board.clear_writes();
        f.smp.disable_clock(cpu(1)).unwrap();
        assert!(f.board.writes().is_empty());
    }

    struct Recorder {
        log: RefCell<Vec<(bool, CpuId)>>,
    }

    impl CpuHotplug for Recorder {
        fn cpu_up(&self, cpu: CpuId) -> Result<()> {
            self.log.borrow_mut().push((true, cpu));
            Ok(())
        }

        fn cpu_down(&self, cpu: CpuId) -> Result<()> {
            self.log.borrow_mut().push((false, cpu));
            Ok(())
        }
    }

    #[test]
    fn unused_cpus_go_up_then_down() {
        let f = fixture(csr_conf());
        let topology = f.smp.topology();
        topology.set_online(cpu(2), false);
        topology.set_online(cpu(3), false);

        let recorder = Recorder {
            log: RefCell::new(Vec::new()),
        };
        f.smp.disable_unused_cpus(&recorder).unwrap();
        assert_eq!(
            recorder.log.into_inner(),
            [(true, cpu(2)), (true, cpu(3)), (false, cpu(2)), (false, cpu(3))]
        );
    }
}
