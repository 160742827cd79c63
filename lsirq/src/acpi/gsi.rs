// SPDX-License-Identifier: MPL-2.0

//! Global System Interrupt (GSI) translation.
//!
//! GSIs `0..=31` are the lines of the LIOINTC. From 64 on, each PCH-PIC
//! serves a window of GSIs starting at its base.

use log::debug;

use crate::{
    Error,
    boot::LOONGSON_PCH_IRQ_BASE,
    cascade::Cascade,
    irq::FwSpec,
    irqchip::liointc::LIOINTC_NUM_LINES,
    prelude::*,
};

/// The first GSI of the CPU-local range.
pub const GSI_MIN_CPU_IRQ: u32 = 0;
/// The last GSI of the CPU-local range.
pub const GSI_MAX_CPU_IRQ: u32 = LIOINTC_NUM_LINES as u32 - 1;
/// The first GSI of the PCH-PICs.
pub const GSI_MIN_PCH_IRQ: u32 = LOONGSON_PCH_IRQ_BASE;

/// Maps `gsi` to a virtual IRQ.
///
/// A GSI whose PCH-PIC has no domain yet is returned unchanged.
pub fn map_gsi(cascade: &Cascade, gsi: u32) -> Result<Virq> {
    let core = cascade.core();

    if (GSI_MIN_CPU_IRQ..=GSI_MAX_CPU_IRQ).contains(&gsi) {
        let domain = cascade.liointc_domain().ok_or(Error::NoDevice)?;
        return core.create_mapping(domain, &FwSpec::one(gsi));
    }

    if gsi >= GSI_MIN_PCH_IRQ && cascade.pch_pics().find(gsi).is_some() {
        return match cascade.pch_domain_of(gsi) {
            Some((domain, pin)) => core.create_mapping(&domain, &FwSpec::one(pin)),
            None => Ok(gsi),
        };
    }

    debug!("acpi: GSI {} has no controller", gsi);
    Err(Error::InvalidArgs)
}

/// Registers `gsi`, returning its virtual IRQ or -1.
pub fn register_gsi(cascade: &Cascade, gsi: u32) -> i32 {
    map_gsi(cascade, gsi).map_or(-1, |virq| virq as i32)
}

/// Returns the virtual IRQ of `gsi`, or -1.
pub fn gsi_to_irq(cascade: &Cascade, gsi: u32) -> i32 {
    register_gsi(cascade, gsi)
}

/// Releases `gsi`. Mappings are kept for the lifetime of the system.
pub fn unregister_gsi(_gsi: u32) {}

/// Returns the GSI of ISA IRQ `isa_irq`, which is the same number.
pub fn isa_irq_to_gsi(isa_irq: u32) -> u32 {
    isa_irq
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        acpi::Acpi,
        boot::{SysConf, kcmdline::KCmdlineArg},
        cpu::CpuTopology,
        io::sim::SimBoard,
        irq::IrqCore,
        irqchip::pch_pic::PCH_PIC_SIZE,
    };

    fn cascade() -> Cascade {
        let conf = SysConf::default();
        let board = SimBoard::new(4, 4);
        board.window(conf.pch_reg_base, PCH_PIC_SIZE).poke(0, 8, 63 << 48);
        let topology = Arc::new(CpuTopology::new(&conf));
        topology.build_from_reserved();
        topology.set_online(CpuId::bsp(), true);
        Cascade::new(Arc::new(IrqCore::new()), Arc::new(board), topology, &conf)
    }

    #[test]
    fn pch_gsis_resolve_to_their_pin() {
        let cascade = cascade();
        cascade
            .setup_irq(&Acpi::new(&KCmdlineArg::from("acpi=off")), None)
            .unwrap();

        let irq = register_gsi(&cascade, 64 + 5);
        assert!(irq >= 0);
        let (domain, pin) = cascade.pch_domain_of(64 + 5).unwrap();
        assert_eq!(pin, 5);
        assert_eq!(cascade.core().find_mapping(&domain, 5), Some(irq as Virq));
        // The mapping is reused.
        assert_eq!(gsi_to_irq(&cascade, 64 + 5), irq);
    }

    #[test]
    fn local_gsis_map_to_liointc_lines() {
        let cascade = cascade();
        cascade
            .setup_irq(&Acpi::new(&KCmdlineArg::from("acpi=off")), None)
            .unwrap();

        let irq = register_gsi(&cascade, 10);
        assert!(irq >= 0);
        let liointc = cascade.liointc_domain().unwrap();
        assert_eq!(cascade.core().find_mapping(liointc, 10), Some(irq as Virq));
    }

    #[test]
    fn gsis_outside_every_window_fail() {
        let cascade = cascade();
        cascade
            .setup_irq(&Acpi::new(&KCmdlineArg::from("acpi=off")), None)
            .unwrap();
        assert_eq!(register_gsi(&cascade, 63), -1);
        assert_eq!(register_gsi(&cascade, 32), -1);
        assert_eq!(register_gsi(&cascade, 64 + 64), -1);
    }

    #[test]
    fn registered_pic_without_domain_passes_the_gsi_through() {
        let cascade = cascade();
        cascade.register_pch_pic(0, SysConf::default().pch_reg_base, 64).unwrap();
        assert_eq!(map_gsi(&cascade, 70), Ok(70));
        assert_eq!(map_gsi(&cascade, 3), Err(Error::NoDevice));
    }

    #[test]
    fn isa_irqs_are_gsis() {
        assert_eq!(isa_irq_to_gsi(4), 4);
        unregister_gsi(4);
    }
}
