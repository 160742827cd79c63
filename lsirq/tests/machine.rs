// SPDX-License-Identifier: MPL-2.0

//! Boots the whole interrupt system on the simulator and drives it the way
//! a kernel does.

use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

use lsirq::{
    Error, Machine,
    acpi::madt::{ACPI_MADT_ENABLED, MADT_HEADER_LEN, MadtType},
    boot::{SysConf, kcmdline::KCmdlineArg},
    cascade::{CascadeKind, ExcCode},
    cpu::{CpuId, HwCpuId},
    io::{regs::IPI_EN, sim::SimBoard},
    ipi::IpiAction,
    irqchip::{eiointc::EXTIOI_FWNODE, pch_pic::PCH_PIC_SIZE},
    msi::{MsiAllocation, MsiKind},
    prelude::CpuSet,
    smp::StartArgs,
};

const PIC0: u64 = 0x1000_0000;

fn subtable(kind: MadtType, body: &[u8]) -> Vec<u8> {
    let mut bytes = vec![kind as u8, (body.len() + 2) as u8];
    bytes.extend_from_slice(body);
    bytes
}

fn core_pic(core_id: u32) -> Vec<u8> {
    let mut body = vec![1];
    body.extend_from_slice(&core_id.to_le_bytes());
    body.extend_from_slice(&core_id.to_le_bytes());
    body.extend_from_slice(&ACPI_MADT_ENABLED.to_le_bytes());
    subtable(MadtType::CorePic, &body)
}

fn bio_pic(address: u64, gsi_base: u16) -> Vec<u8> {
    let mut body = vec![1];
    body.extend_from_slice(&address.to_le_bytes());
    body.extend_from_slice(&(PCH_PIC_SIZE as u16).to_le_bytes());
    body.extend_from_slice(&0u16.to_le_bytes());
    body.extend_from_slice(&gsi_base.to_le_bytes());
    subtable(MadtType::BioPic, &body)
}

fn madt(subtables: &[Vec<u8>]) -> Vec<u8> {
    let mut table = vec![0u8; MADT_HEADER_LEN];
    table[..4].copy_from_slice(b"APIC");
    for entry in subtables {
        table.extend_from_slice(entry);
    }
    let len = table.len() as u32;
    table[4..8].copy_from_slice(&len.to_le_bytes());
    table
}

fn cpu(id: usize) -> CpuId {
    CpuId::try_from(id).unwrap()
}

fn boot_with(cmdline: &str, table: Option<&[u8]>) -> (SimBoard, Machine) {
    boot_on(SimBoard::new(4, 4), cmdline, table)
}

fn boot_on(board: SimBoard, cmdline: &str, table: Option<&[u8]>) -> (SimBoard, Machine) {
    // 64 pins.
    board.window(PIC0, PCH_PIC_SIZE).poke(0, 8, 63 << 48);
    let machine = Machine::new(
        Arc::new(board.clone()),
        SysConf::default(),
        KCmdlineArg::from(cmdline),
        table,
    )
    .unwrap();
    (board, machine)
}

fn boot() -> (SimBoard, Machine) {
    let table = madt(&[core_pic(0), core_pic(1), core_pic(2), core_pic(3), bio_pic(PIC0, 64)]);
    boot_with("", Some(&table))
}

fn counting_handler(machine: &Machine, virq: u32) -> Arc<AtomicU32> {
    let hits = Arc::new(AtomicU32::new(0));
    let counter = hits.clone();
    machine
        .irq_core()
        .request_irq(virq, "dev", move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        })
        .unwrap();
    hits
}

#[test]
fn boot_builds_the_extended_cascade() {
    let (_, machine) = boot();
    assert_eq!(machine.cascade().kind(), CascadeKind::Extended);
    assert!(machine.irq_core().find_domain(&EXTIOI_FWNODE).is_some());
    assert_eq!(machine.topology().possible_cpus().count(), 4);
    assert_eq!(machine.topology().num_processors(), 4);
    assert!(machine.topology().is_online(CpuId::bsp()));
    assert_eq!(machine.cascade().pch_pics().len(), 1);
    // IPI, LIOINTC and EXTIOI.
    assert_eq!(machine.syscore().len(), 3);
}

#[test]
fn pch_pic_interrupt_reaches_its_handler() {
    let (board, machine) = boot();
    let virq = machine.register_gsi(64 + 5);
    assert!(virq >= 0);
    let hits = counting_handler(&machine, virq as u32);

    board.raise_extioi(0, 5);
    machine.handle_exception(ExcCode::Ip1 as u32).unwrap();
    assert_eq!(hits.load(Ordering::Relaxed), 1);

    assert_eq!(machine.register_gsi(63), -1);
}

#[test]
fn msi_vectors_come_after_the_pic_window() {
    let (_, machine) = boot();
    let MsiAllocation::Allocated(vectors) = machine
        .arch_setup_msi_irqs(0x0100, MsiKind::MsiX, 2)
        .unwrap()
    else {
        panic!("MSI-X allocation asked for a retry");
    };
    assert_eq!(vectors.len(), 2);
    for vector in &vectors {
        assert!((64..128).contains(&vector.msg.data));
        assert_eq!(vector.msg.address_lo, 0x2ff0_0000);
    }

    assert_eq!(
        machine.arch_setup_msi_irqs(0x0108, MsiKind::Msi, 4),
        Ok(MsiAllocation::RetryWith(1))
    );

    for vector in vectors {
        machine.arch_teardown_msi_irq(vector.virq);
    }
    assert_eq!(machine.cascade().msi().unwrap().msi.num_free(), 64);
}

#[test]
fn msix_can_be_turned_off() {
    let table = madt(&[core_pic(0), bio_pic(PIC0, 64)]);
    let (_, machine) = boot_with("msix=0", Some(&table));
    assert_eq!(
        machine.arch_setup_msi_irqs(0x0100, MsiKind::MsiX, 1),
        Err(Error::NoSpace)
    );
}

#[test]
fn offline_cpu_hands_its_irqs_over() {
    let (board, machine) = boot();
    let topology = machine.topology();
    for id in 1..4 {
        topology.set_online(cpu(id), true);
        topology.set_core_package(cpu(id));
    }
    let virq = machine.register_gsi(64 + 9) as u32;
    counting_handler(&machine, virq);
    machine
        .irq_core()
        .set_affinity(virq, &CpuSet::from(cpu(3)), false)
        .unwrap();

    board.switch_to(3);
    machine.smp().cpu_disable().unwrap();
    board.switch_to(0);

    let desc = machine.irq_core().desc(virq).unwrap();
    assert!(!desc.effective_affinity().contains(cpu(3)));
    assert!(!desc.effective_affinity().is_empty());
}

static RESCHEDULES: AtomicU32 = AtomicU32::new(0);

fn reschedule() {
    RESCHEDULES.fetch_add(1, Ordering::Relaxed);
}

#[test]
fn ipi_vector_runs_the_actions() {
    let (_, machine) = boot();
    machine.smp().register_reschedule_hook(reschedule);

    let before = RESCHEDULES.load(Ordering::Relaxed);
    machine.smp().send_ipi_single(CpuId::bsp(), IpiAction::RESCHEDULE);
    machine.handle_exception(ExcCode::Ipi as u32).unwrap();
    assert_eq!(RESCHEDULES.load(Ordering::Relaxed), before + 1);
}

#[test]
fn resume_restores_the_boot_cpu_ipis() {
    let (board, machine) = boot();
    machine.suspend().unwrap();
    board.core_poke(0, IPI_EN, 4, 0);
    machine.resume();
    assert_eq!(board.core_read(0, IPI_EN, 4), u32::MAX as u64);
}

#[test]
fn acpi_off_falls_back_to_the_default_pic() {
    let table = madt(&[core_pic(0), bio_pic(0x1002_0000, 200)]);
    let (_, machine) = boot_with("acpi=off", Some(&table));
    assert!(machine.acpi().is_disabled());
    let pic = machine.cascade().pch_pics().get(0).unwrap();
    assert_eq!((pic.address, pic.gsi_base), (PIC0, 64));
    assert!(machine.register_gsi(64) >= 0);
}

#[test]
fn invalid_madt_disables_acpi_but_still_boots() {
    let table = madt(&[core_pic(0), subtable(MadtType::CorePic, &[1, 0])]);
    let (_, machine) = boot_with("", Some(&table));
    assert!(machine.acpi().is_disabled());
    // The boot parameters still describe four CPUs.
    assert_eq!(machine.topology().possible_cpus().count(), 4);
    assert!(machine.register_gsi(64 + 1) >= 0);
}

#[test]
fn hot_added_cpu_is_mapped_and_removed() {
    let (_, machine) = boot();
    let before = machine.topology().num_processors();
    machine.topology().unmap_cpu(cpu(3));
    let added = machine.acpi_map_cpu(HwCpuId::new(3)).unwrap();
    assert_eq!(added, cpu(3));
    assert_eq!(machine.topology().num_processors(), before);

    machine.acpi_unmap_cpu(added);
    assert!(!machine.topology().present_cpus().contains(added));
}

#[test]
fn sparse_core_ids_all_come_up() {
    let table = madt(&[core_pic(0), core_pic(1), core_pic(4), core_pic(5), bio_pic(PIC0, 64)]);
    let (board, machine) = boot_on(SimBoard::new(8, 4), "", Some(&table));
    let topology = machine.topology();
    assert_eq!(topology.possible_cpus().count(), 4);
    for (id, hw) in [0, 1, 4, 5].into_iter().enumerate() {
        assert_eq!(topology.hw_to_logical(HwCpuId::new(hw)), Some(cpu(id)));
    }

    let args = StartArgs {
        pc: 0x9000_0000_0020_0000,
        ..StartArgs::default()
    };
    machine.smp().boot_secondary(cpu(3), &args).unwrap();
    assert_eq!(board.mailbox(5, 0), args.pc);
}
