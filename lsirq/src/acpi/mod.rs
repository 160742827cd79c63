// SPDX-License-Identifier: MPL-2.0

//! ACPI support: the MADT pass of early boot, GSI translation and CPU
//! hot-add and removal.
//!
//! Table discovery is left to the kernel, which hands the raw MADT to
//! [`Acpi::process_madt`].

pub mod gsi;
pub mod madt;

use core::sync::atomic::{AtomicBool, Ordering};

use log::{error, info, warn};

use self::madt::{ACPI_MADT_ENABLED, Madt, MadtEntry, MadtType};
use crate::{
    Error,
    boot::{BpiVersion, kcmdline::KCmdlineArg},
    cpu::CpuTopology,
    io::Platform,
    irqchip::pch_pic::{MAX_PCH_PICS, PchPicTable},
    prelude::*,
};

/// At most this many processor subtables are parsed.
pub const MAX_CORE_PIC: usize = 256;
/// The reserved mask before any processor subtable is parsed.
const ALL_RESERVED: u16 = 0xffff;

/// The ACPI state of the machine.
#[derive(Debug)]
pub struct Acpi {
    disabled: AtomicBool,
}

impl Acpi {
    /// Creates the state, disabled if the command line says `acpi=off`.
    pub fn new(cmdline: &KCmdlineArg) -> Self {
        Self {
            disabled: AtomicBool::new(cmdline.acpi_disabled()),
        }
    }

    /// Returns true if ACPI must not be used.
    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Relaxed)
    }

    /// Stops using ACPI.
    pub fn disable(&self) {
        self.disabled.store(true, Ordering::Relaxed);
    }

    /// Consumes the MADT during early boot.
    ///
    /// With the first version of the boot interface the CPU maps are rebuilt
    /// from the processor subtables. The PCH-PICs are registered in `pics`
    /// afterwards. An invalid processor subtable disables ACPI and leaves
    /// the CPUs to the boot parameters.
    pub fn process_madt(
        &self,
        madt: &Madt<'_>,
        bpi: BpiVersion,
        topology: &CpuTopology,
        pics: &PchPicTable,
        platform: &dyn Platform,
    ) -> Result<()> {
        if self.is_disabled() {
            return Err(Error::NotSupported);
        }

        if bpi > BpiVersion::V1 {
            parse_bio_pics(madt, pics, platform);
            return Ok(());
        }

        let reserved = topology.reserved_mask();
        topology.reset_maps();
        topology.set_reserved_mask(ALL_RESERVED);
        if let Err(err) = parse_core_pics(madt, topology) {
            error!("ACPI: Invalid BIOS MADT, disabling ACPI");
            self.disable();
            // The boot parameters describe the CPUs instead.
            topology.reset_maps();
            topology.set_reserved_mask(reserved);
            return Err(err);
        }
        parse_bio_pics(madt, pics, platform);
        topology.set_nr_cpus(topology.num_processors());
        Ok(())
    }

    /// Maps a hot-added processor, returning its logical id.
    pub fn map_cpu(&self, topology: &CpuTopology, hw: HwCpuId) -> Result<CpuId> {
        topology.set_processor_mask(hw, true).inspect_err(|_| {
            info!("ACPI: Unable to map lapic to logical cpu number");
        })
    }

    /// Forgets a hot-removed processor.
    pub fn unmap_cpu(&self, topology: &CpuTopology, cpu: CpuId) {
        topology.unmap_cpu(cpu);
        info!("cpu{} hot remove!", cpu);
    }
}

fn parse_core_pics(madt: &Madt<'_>, topology: &CpuTopology) -> Result<()> {
    for entry in madt.collect(MadtType::CorePic, MAX_CORE_PIC)? {
        let MadtEntry::CorePic(core) = entry else {
            continue;
        };
        let hw = HwCpuId::new(core.core_id.get());
        let enabled = core.flags.get() & ACPI_MADT_ENABLED != 0;
        if let Err(err) = topology.set_processor_mask(hw, enabled) {
            warn!("ACPI: processor {:#x} ignored: {}", hw.as_u32(), err);
        }
    }
    Ok(())
}

fn parse_bio_pics(madt: &Madt<'_>, pics: &PchPicTable, platform: &dyn Platform) {
    let entries = match madt.collect(MadtType::BioPic, MAX_PCH_PICS) {
        Ok(entries) => entries,
        Err(err) => {
            error!("ACPI: Error parsing PCH_PIC entry: {}", err);
            return;
        }
    };
    if entries.is_empty() {
        error!("ACPI: No PCH_PIC entries present");
        return;
    }

    for entry in entries {
        let MadtEntry::BioPic(bio) = entry else {
            continue;
        };
        // Failures are logged by the table and only skip this PIC.
        let _ = pics.register(
            platform,
            bio.id.get() as u32,
            bio.address.get(),
            bio.gsi_base.get() as u32,
        );
    }
}

#[cfg(test)]
mod test {
    use super::{madt::build::MadtBuilder, *};
    use crate::{boot::SysConf, io::sim::SimBoard, irqchip::pch_pic::PCH_PIC_SIZE};

    const PIC0: u64 = 0x1000_0000;

    fn cpu(id: usize) -> CpuId {
        CpuId::try_from(id).unwrap()
    }

    fn fixture() -> (SimBoard, Acpi, CpuTopology, PchPicTable) {
        let board = SimBoard::new(8, 4);
        board.window(PIC0, PCH_PIC_SIZE).poke(0, 8, 63 << 48);
        let conf = SysConf {
            boot_cpu_id: 1,
            nr_cpus: 8,
            ..SysConf::default()
        };
        let acpi = Acpi::new(&KCmdlineArg::from(""));
        (board, acpi, CpuTopology::new(&conf), PchPicTable::new())
    }

    #[test]
    fn processors_and_pics_come_from_the_madt() {
        let (board, acpi, topology, pics) = fixture();
        let table = MadtBuilder::new()
            .core_pic(0, ACPI_MADT_ENABLED)
            .core_pic(1, ACPI_MADT_ENABLED)
            .core_pic(2, 0)
            .core_pic(3, ACPI_MADT_ENABLED)
            .bio_pic(PIC0, 0, 64)
            .finish();
        let madt = Madt::new(&table).unwrap();

        acpi.process_madt(&madt, BpiVersion::V1, &topology, &pics, &board).unwrap();

        // The boot CPU is logical CPU 0 whatever its position in the table.
        assert_eq!(topology.logical_to_hw(cpu(0)), Some(HwCpuId::new(1)));
        assert_eq!(topology.hw_to_logical(HwCpuId::new(0)), Some(cpu(1)));
        assert_eq!(topology.num_processors(), 3);
        assert_eq!(topology.nr_cpus(), 3);
        assert_eq!(topology.reserved_mask(), 0xffff & !0b1011);
        assert!(topology.possible_cpus().count() >= 3);
        assert!(!acpi.is_disabled());

        assert_eq!(pics.len(), 1);
        assert_eq!(pics.find(64 + 63), Some(0));
    }

    #[test]
    fn invalid_processor_entry_disables_acpi() {
        let (board, acpi, topology, pics) = fixture();
        let table = MadtBuilder::new()
            .core_pic(0, ACPI_MADT_ENABLED)
            .raw(MadtType::CorePic as u8, &[1, 1, 0])
            .bio_pic(PIC0, 0, 64)
            .finish();
        let madt = Madt::new(&table).unwrap();

        assert_eq!(
            acpi.process_madt(&madt, BpiVersion::V1, &topology, &pics, &board),
            Err(Error::InvalidArgs)
        );
        assert!(acpi.is_disabled());
        assert!(pics.is_empty());
        assert_eq!(topology.reserved_mask(), SysConf::default().reserved_cpus_mask);
        assert_eq!(topology.nr_cpus(), 8);
        assert_eq!(topology.num_processors(), 0);
    }

    #[test]
    fn later_interfaces_keep_the_boot_cpu_maps() {
        let (board, acpi, topology, pics) = fixture();
        let table = MadtBuilder::new().bio_pic(PIC0, 0, 64).finish();
        let madt = Madt::new(&table).unwrap();

        acpi.process_madt(&madt, BpiVersion::V2, &topology, &pics, &board).unwrap();
        assert_eq!(topology.nr_cpus(), 8);
        assert_eq!(topology.reserved_mask(), SysConf::default().reserved_cpus_mask);
        assert_eq!(pics.len(), 1);
    }

    #[test]
    fn acpi_off_skips_the_madt() {
        let (board, _, topology, pics) = fixture();
        let acpi = Acpi::new(&KCmdlineArg::from("acpi=off"));
        let table = MadtBuilder::new().bio_pic(PIC0, 0, 64).finish();
        let madt = Madt::new(&table).unwrap();
        assert_eq!(
            acpi.process_madt(&madt, BpiVersion::V1, &topology, &pics, &board),
            Err(Error::NotSupported)
        );
        assert!(pics.is_empty());
    }

    #[test]
    fn hot_added_cpu_takes_the_first_free_id() {
        let (board, acpi, topology, pics) = fixture();
        let table = MadtBuilder::new()
            .core_pic(1, ACPI_MADT_ENABLED)
            .core_pic(0, ACPI_MADT_ENABLED)
            .finish();
        let madt = Madt::new(&table).unwrap();
        acpi.process_madt(&madt, BpiVersion::V1, &topology, &pics, &board).unwrap();

        let added = acpi.map_cpu(&topology, HwCpuId::new(5)).unwrap();
        assert_eq!(added, cpu(2));
        assert_eq!(topology.num_processors(), 3);
        assert!(topology.present_cpus().contains(added));

        acpi.unmap_cpu(&topology, added);
        assert_eq!(topology.num_processors(), 2);
        assert!(!topology.present_cpus().contains(added));
        assert!(acpi.map_cpu(&topology, HwCpuId::new(4096)).is_err());
    }
}
