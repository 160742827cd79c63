// SPDX-License-Identifier: MPL-2.0

//! The logical/physical CPU maps and the CPU masks built on them.

use core::sync::atomic::{AtomicI32, AtomicU8, AtomicU16, AtomicU32, Ordering};

use log::info;
use smallvec::SmallVec;

use super::{AtomicCpuSet, CpuId, CpuSet, HwCpuId, MAX_HW_CPUS, MAX_NUMNODES, NR_CPUS};
use crate::{Error, boot::SysConf, prelude::*, sync::SpinLock};

const UNMAPPED: i32 = -1;

/// The life-cycle state of a CPU as seen by the hotplug paths.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum CpuState {
    /// Not running, or being brought up.
    Offline = 0,
    /// Running and taking interrupts.
    Online = 1,
    /// Parked after going offline.
    Dead = 2,
}

impl CpuState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Online,
            2 => Self::Dead,
            _ => Self::Offline,
        }
    }
}

/// Process-wide CPU topology.
///
/// The two maps form a partial bijection between logical and physical ids.
/// Physical ids in the reserved mask never get a logical id. The maps are
/// written during boot and by the hotplug paths, which are serialized by
/// `map_lock`; readers use the atomics directly.
pub struct CpuTopology {
    cores_per_node: u32,
    cores_per_package: u32,
    boot_hw_cpu: HwCpuId,
    nr_cpus: AtomicU32,
    reserved: AtomicU16,
    num_processors: AtomicU32,
    number_map: [AtomicI32; MAX_HW_CPUS],
    logical_map: [AtomicI32; NR_CPUS],
    states: [AtomicU8; NR_CPUS],
    core_ids: [AtomicU32; NR_CPUS],
    package_ids: [AtomicU32; NR_CPUS],
    possible: AtomicCpuSet,
    present: AtomicCpuSet,
    online: AtomicCpuSet,
    foreign: SpinLock<Vec<CpuSet>>,
    map_lock: SpinLock<()>,
}

impl CpuTopology {
    /// Creates an empty topology for the machine described by `conf`.
    pub fn new(conf: &SysConf) -> Self {
        Self {
            cores_per_node: conf.cores_per_node.max(1),
            cores_per_package: conf.cores_per_package.max(1),
            boot_hw_cpu: HwCpuId::new(conf.boot_cpu_id),
            nr_cpus: AtomicU32::new(conf.nr_cpus),
            reserved: AtomicU16::new(conf.reserved_cpus_mask),
            num_processors: AtomicU32::new(0),
            number_map: core::array::from_fn(|_| AtomicI32::new(UNMAPPED)),
            logical_map: core::array::from_fn(|_| AtomicI32::new(UNMAPPED)),
            states: core::array::from_fn(|_| AtomicU8::new(CpuState::Offline as u8)),
            core_ids: core::array::from_fn(|_| AtomicU32::new(0)),
            package_ids: core::array::from_fn(|_| AtomicU32::new(0)),
            possible: AtomicCpuSet::default(),
            present: AtomicCpuSet::default(),
            online: AtomicCpuSet::default(),
            foreign: SpinLock::new(vec![CpuSet::new_empty(); NR_CPUS]),
            map_lock: SpinLock::new(()),
        }
    }

    /// Returns the number of cores on each node.
    pub fn cores_per_node(&self) -> u32 {
        self.cores_per_node
    }

    /// Returns the physical id of the boot CPU.
    pub fn boot_hw_cpu(&self) -> HwCpuId {
        self.boot_hw_cpu
    }

    /// Returns the number of CPUs the maps are built for.
    pub fn nr_cpus(&self) -> u32 {
        self.nr_cpus.load(Ordering::Relaxed)
    }

    /// Overrides the number of CPUs, as firmware tables do.
    pub fn set_nr_cpus(&self, nr_cpus: u32) {
        self.nr_cpus.store(nr_cpus, Ordering::Relaxed);
    }

    /// Returns the mask of physical ids that must not be brought up.
    pub fn reserved_mask(&self) -> u16 {
        self.reserved.load(Ordering::Relaxed)
    }

    /// Replaces the reserved mask.
    pub fn set_reserved_mask(&self, mask: u16) {
        self.reserved.store(mask, Ordering::Relaxed);
    }

    /// Returns how many processors the firmware has enabled.
    pub fn num_processors(&self) -> u32 {
        self.num_processors.load(Ordering::Relaxed)
    }

    /// Unmaps every CPU and forgets the possible and present masks.
    pub fn reset_maps(&self) {
        let _guard = self.map_lock.lock_irq_disabled();
        for entry in self.number_map.iter().chain(self.logical_map.iter()) {
            entry.store(UNMAPPED, Ordering::Relaxed);
        }
        let empty = CpuSet::new_empty();
        self.possible.store(&empty, Ordering::Relaxed);
        self.present.store(&empty, Ordering::Relaxed);
        self.num_processors.store(0, Ordering::Relaxed);
    }

    /// Builds the maps from the reserved mask.
    ///
    /// Every physical id the reserved mask covers is scanned in order.
    /// Unreserved ones get consecutive logical ids and become possible,
    /// until `nr_cpus` CPUs are mapped. Returns the number of mapped CPUs.
    pub fn build_from_reserved(&self) -> usize {
        let _guard = self.map_lock.lock_irq_disabled();
        let reserved = self.reserved_mask();
        let nr_cpus = (self.nr_cpus() as usize).min(NR_CPUS);

        for entry in self.number_map.iter().chain(self.logical_map.iter()) {
            entry.store(UNMAPPED, Ordering::Relaxed);
        }

        let mut num = 0;
        for hw in 0..u16::BITS as usize {
            if num >= nr_cpus {
                break;
            }
            if reserved & (1 << hw) != 0 {
                continue;
            }
            self.number_map[hw].store(num as i32, Ordering::Relaxed);
            self.logical_map[num].store(hw as i32, Ordering::Relaxed);
            // SAFETY: `num` is less than `nr_cpus`, which is at most `NR_CPUS`.
            let cpu = unsafe { CpuId::new_unchecked(num as u32) };
            self.possible.add(cpu, Ordering::Relaxed);
            num += 1;
        }

        info!("Detected {} available CPU(s)", num);
        num
    }

    /// Assigns a logical id to the firmware-reported processor `hw`.
    ///
    /// A processor that is mapped already keeps its logical id. Otherwise
    /// the boot CPU becomes logical CPU 0, and other processors take the
    /// lowest logical id that is neither present nor mapped. Enabled
    /// processors become present and are removed from the reserved mask.
    pub fn set_processor_mask(&self, hw: HwCpuId, enabled: bool) -> Result<CpuId> {
        if hw.as_usize() >= MAX_HW_CPUS {
            return Err(Error::InvalidArgs);
        }

        let _guard = self.map_lock.lock_irq_disabled();
        let cpu = match self.mapped_logical(hw) {
            Some(cpu) => cpu,
            None if hw == self.boot_hw_cpu => CpuId::bsp(),
            None => {
                let present = self.present.load(Ordering::Relaxed);
                (1..NR_CPUS)
                    .filter_map(|id| CpuId::try_from(id).ok())
                    .find(|cpu| {
                        !present.contains(*cpu)
                            && self.logical_map[cpu.as_usize()].load(Ordering::Relaxed)
                                == UNMAPPED
                    })
                    .ok_or(Error::NotEnoughResources)?
            }
        };

        // Logical CPU 0 may belong to another processor when the boot CPU
        // was reserved.
        let stale = self.logical_map[cpu.as_usize()].load(Ordering::Relaxed);
        if stale != UNMAPPED && stale != hw.as_u32() as i32 {
            self.number_map[stale as usize].store(UNMAPPED, Ordering::Relaxed);
        }

        self.number_map[hw.as_usize()].store(cpu.as_u32() as i32, Ordering::Relaxed);
        self.logical_map[cpu.as_usize()].store(hw.as_u32() as i32, Ordering::Relaxed);
        self.possible.add(cpu, Ordering::Relaxed);
        if enabled {
            if !self.present.contains(cpu, Ordering::Relaxed) {
                self.present.add(cpu, Ordering::Relaxed);
                self.num_processors.fetch_add(1, Ordering::Relaxed);
            }
            if hw.as_u32() < u16::BITS {
                self.reserved
                    .fetch_and(!(1 << hw.as_u32()), Ordering::Relaxed);
            }
        }
        Ok(cpu)
    }

    fn mapped_logical(&self, hw: HwCpuId) -> Option<CpuId> {
        let cpu = self.number_map[hw.as_usize()].load(Ordering::Relaxed);
        if cpu == UNMAPPED {
            return None;
        }
        let cpu = CpuId::try_from(cpu as usize).ok()?;
        (self.logical_map[cpu.as_usize()].load(Ordering::Relaxed) == hw.as_u32() as i32)
            .then_some(cpu)
    }

    /// Removes a hot-unplugged processor from the present mask.
    pub fn unmap_cpu(&self, cpu: CpuId) {
        let _guard = self.map_lock.lock_irq_disabled();
        if self.present.contains(cpu, Ordering::Relaxed) {
            self.present.remove(cpu, Ordering::Relaxed);
            let _ = self
                .num_processors
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |num| {
                    num.checked_sub(1)
                });
        }
    }

    /// Returns the physical id of logical CPU `cpu`.
    pub fn logical_to_hw(&self, cpu: CpuId) -> Option<HwCpuId> {
        match self.logical_map[cpu.as_usize()].load(Ordering::Relaxed) {
            UNMAPPED => None,
            hw => Some(HwCpuId::new(hw as u32)),
        }
    }

    /// Returns the logical id of physical core `hw`.
    pub fn hw_to_logical(&self, hw: HwCpuId) -> Option<CpuId> {
        let entry = self.number_map.get(hw.as_usize())?;
        match entry.load(Ordering::Relaxed) {
            UNMAPPED => None,
            cpu => CpuId::try_from(cpu as usize).ok(),
        }
    }

    /// Returns the node of physical core `hw`.
    pub fn node_of_hw(&self, hw: HwCpuId) -> u32 {
        hw.as_u32() / self.cores_per_node
    }

    /// Returns the node of logical CPU `cpu`, or node 0 for unmapped CPUs.
    pub fn node_of(&self, cpu: CpuId) -> u32 {
        self.logical_to_hw(cpu)
            .map_or(0, |hw| self.node_of_hw(hw))
    }

    /// Returns the nodes that have at least one possible CPU, ascending.
    pub fn online_nodes(&self) -> SmallVec<[u32; 4]> {
        let mut nodes: u32 = 0;
        for cpu in self.possible_cpus().iter() {
            let node = self.node_of(cpu);
            if (node as usize) < MAX_NUMNODES {
                nodes |= 1 << node;
            }
        }
        (0..MAX_NUMNODES as u32)
            .filter(|node| nodes & (1 << node) != 0)
            .collect()
    }

    /// Returns the possible CPUs.
    pub fn possible_cpus(&self) -> CpuSet {
        self.possible.load(Ordering::Relaxed)
    }

    /// Returns the present CPUs.
    pub fn present_cpus(&self) -> CpuSet {
        self.present.load(Ordering::Relaxed)
    }

    /// Returns the online CPUs.
    pub fn online_cpus(&self) -> CpuSet {
        self.online.load(Ordering::Acquire)
    }

    /// Returns whether `cpu` is online.
    pub fn is_online(&self, cpu: CpuId) -> bool {
        self.online.contains(cpu, Ordering::Acquire)
    }

    /// Adds `cpu` to or removes it from the present mask.
    pub fn set_present(&self, cpu: CpuId, present: bool) {
        if present {
            self.present.add(cpu, Ordering::Relaxed);
        } else {
            self.present.remove(cpu, Ordering::Relaxed);
        }
    }

    /// Adds `cpu` to or removes it from the online mask.
    pub fn set_online(&self, cpu: CpuId, online: bool) {
        if online {
            self.online.add(cpu, Ordering::Release);
        } else {
            self.online.remove(cpu, Ordering::Release);
        }
    }

    /// Returns the hotplug state of `cpu`.
    pub fn state(&self, cpu: CpuId) -> CpuState {
        CpuState::from_raw(self.states[cpu.as_usize()].load(Ordering::Acquire))
    }

    /// Publishes the hotplug state of `cpu`.
    pub fn set_state(&self, cpu: CpuId, state: CpuState) {
        self.states[cpu.as_usize()].store(state as u8, Ordering::Release);
    }

    /// Records the core and package ids of `cpu` from its physical id.
    pub fn set_core_package(&self, cpu: CpuId) {
        let Some(hw) = self.logical_to_hw(cpu) else {
            return;
        };
        let hw = hw.as_u32();
        self.core_ids[cpu.as_usize()].store(hw % self.cores_per_package, Ordering::Relaxed);
        self.package_ids[cpu.as_usize()].store(hw / self.cores_per_package, Ordering::Relaxed);
    }

    /// Returns the core id of `cpu` within its package.
    pub fn core_id(&self, cpu: CpuId) -> u32 {
        self.core_ids[cpu.as_usize()].load(Ordering::Relaxed)
    }

    /// Returns the package id of `cpu`.
    pub fn package_id(&self, cpu: CpuId) -> u32 {
        self.package_ids[cpu.as_usize()].load(Ordering::Relaxed)
    }

    /// Recomputes, for every online CPU, the online CPUs of other packages.
    ///
    /// Cross calls target the foreign CPUs of the caller.
    pub fn calculate_foreign_map(&self) {
        let online = self.online_cpus();
        let mut foreign = self.foreign.lock_irq_disabled();
        foreign.iter_mut().for_each(CpuSet::clear);
        for cpu in online.iter() {
            let package = self.package_id(cpu);
            foreign[cpu.as_usize()] = online
                .iter()
                .filter(|other| self.package_id(*other) != package)
                .collect();
        }
    }

    /// Returns the foreign CPUs of `cpu`.
    pub fn foreign_cpus(&self, cpu: CpuId) -> CpuSet {
        self.foreign.lock_irq_disabled()[cpu.as_usize()].clone()
    }
}
