// SPDX-License-Identifier: MPL-2.0

//! This module contains the implementation of the CPU set and atomic CPU set.

use core::sync::atomic::{AtomicU64, Ordering};

use smallvec::SmallVec;

use super::{CpuId, NR_CPUS};

/// A subset of all CPUs in the system.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CpuSet {
    // A bitset representing the CPUs in the system.
    bits: SmallVec<[InnerPart; NR_PARTS_NO_ALLOC]>,
}

type InnerPart = u64;

const BITS_PER_PART: usize = InnerPart::BITS as usize;
const NR_PARTS_NO_ALLOC: usize = 2;
const NR_PARTS: usize = NR_CPUS.div_ceil(BITS_PER_PART);

const fn part_idx(cpu_id: CpuId) -> usize {
    cpu_id.as_usize() / BITS_PER_PART
}

const fn bit_idx(cpu_id: CpuId) -> usize {
    cpu_id.as_usize() % BITS_PER_PART
}

impl CpuSet {
    /// Creates a new `CpuSet` with no CPUs in the system.
    pub fn new_empty() -> Self {
        let mut bits = SmallVec::with_capacity(NR_PARTS);
        bits.resize(NR_PARTS, 0);
        Self { bits }
    }

    /// Creates a set from the low bits of `mask`, bit `n` standing for CPU `n`.
    pub fn from_mask(mask: u64) -> Self {
        let mut set = Self::new_empty();
        set.bits[0] = mask;
        set
    }

    /// Adds a CPU to the set.
    pub fn add(&mut self, cpu_id: CpuId) {
        let part_idx = part_idx(cpu_id);
        let bit_idx = bit_idx(cpu_id);
        if part_idx >= self.bits.len() {
            self.bits.resize(part_idx + 1, 0);
        }
        self.bits[part_idx] |= 1 << bit_idx;
    }

    /// Removes a CPU from the set.
    pub fn remove(&mut self, cpu_id: CpuId) {
        let part_idx = part_idx(cpu_id);
        let bit_idx = bit_idx(cpu_id);
        if part_idx < self.bits.len() {
            self.bits[part_idx] &= !(1 << bit_idx);
        }
    }

    /// Returns true if the set contains the specified CPU.
    pub fn contains(&self, cpu_id: CpuId) -> bool {
        let part_idx = part_idx(cpu_id);
        let bit_idx = bit_idx(cpu_id);
        part_idx < self.bits.len() && (self.bits[part_idx] & (1 << bit_idx)) != 0
    }

    /// Returns the number of CPUs in the set.
    pub fn count(&self) -> usize {
        self.bits
            .iter()
            .map(|part| part.count_ones() as usize)
            .sum()
    }

    /// Returns true if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|part| *part == 0)
    }

    /// Returns true if the two sets share at least one CPU.
    pub fn intersects(&self, other: &CpuSet) -> bool {
        self.bits
            .iter()
            .zip(other.bits.iter())
            .any(|(a, b)| a & b != 0)
    }

    /// Returns the CPUs present in both sets.
    pub fn intersection(&self, other: &CpuSet) -> CpuSet {
        let bits = self
            .bits
            .iter()
            .enumerate()
            .map(|(idx, part)| part & other.bits.get(idx).copied().unwrap_or(0))
            .collect();
        CpuSet { bits }
    }

    /// Returns the lowest CPU of the set.
    pub fn first(&self) -> Option<CpuId> {
        self.iter().next()
    }

    /// Removes all CPUs from the set.
    pub fn clear(&mut self) {
        self.bits.fill(0);
    }

    /// Iterates over the CPUs in the set.
    ///
    /// The order of the iteration is guaranteed to be in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = CpuId> + '_ {
        self.bits.iter().enumerate().flat_map(|(part_idx, &part)| {
            (0..BITS_PER_PART).filter_map(move |bit_idx| {
                if (part & (1 << bit_idx)) != 0 {
                    let raw_id = part_idx * BITS_PER_PART + bit_idx;
                    // SAFETY: all bit 1s in the bitmap must be a valid CPU ID.
                    Some(unsafe { CpuId::new_unchecked(raw_id as u32) })
                } else {
                    None
                }
            })
        })
    }
}

impl From<CpuId> for CpuSet {
    fn from(cpu_id: CpuId) -> Self {
        let mut set = Self::new_empty();
        set.add(cpu_id);
        set
    }
}

impl FromIterator<CpuId> for CpuSet {
    fn from_iter<I: IntoIterator<Item = CpuId>>(iter: I) -> Self {
        let mut set = Self::new_empty();
        for cpu_id in iter {
            set.add(cpu_id);
        }
        set
    }
}

/// A subset of all CPUs in the system with atomic operations.
///
/// It provides atomic operations for each CPU in the system. When the
/// operation contains multiple CPUs, the ordering is not guaranteed.
#[derive(Debug)]
pub struct AtomicCpuSet {
    bits: SmallVec<[AtomicInnerPart; NR_PARTS_NO_ALLOC]>,
}

type AtomicInnerPart = AtomicU64;

impl AtomicCpuSet {
    /// Creates a new `AtomicCpuSet` with an initial value.
    pub fn new(value: CpuSet) -> Self {
        let bits = value.bits.into_iter().map(AtomicU64::new).collect();
        Self { bits }
    }

    /// Loads the value of the set with the given ordering.
    ///
    /// This operation is not atomic. When racing with a [`Self::store`]
    /// operation, this load may return a set that contains a portion of the
    /// new value and a portion of the old value. Load on each specific
    /// word is atomic, and follows the specified ordering.
    pub fn load(&self, ordering: Ordering) -> CpuSet {
        let bits = self.bits.iter().map(|part| part.load(ordering)).collect();
        CpuSet { bits }
    }

    /// Stores a new value to the set with the given ordering.
    ///
    /// This operation is not atomic. When racing with a [`Self::load`]
    /// operation, that load may return a set that contains a portion of the
    /// new value and a portion of the old value. Store on each specific
    /// word is atomic, and follows the specified ordering.
    pub fn store(&self, value: &CpuSet, ordering: Ordering) {
        for (part, new_part) in self.bits.iter().zip(value.bits.iter()) {
            part.store(*new_part, ordering);
        }
    }

    /// Atomically adds a CPU with the given ordering.
    pub fn add(&self, cpu_id: CpuId, ordering: Ordering) {
        let part_idx = part_idx(cpu_id);
        let bit_idx = bit_idx(cpu_id);
        if part_idx < self.bits.len() {
            self.bits[part_idx].fetch_or(1 << bit_idx, ordering);
        }
    }

    /// Atomically removes a CPU with the given ordering.
    pub fn remove(&self, cpu_id: CpuId, ordering: Ordering) {
        let part_idx = part_idx(cpu_id);
        let bit_idx = bit_idx(cpu_id);
        if part_idx < self.bits.len() {
            self.bits[part_idx].fetch_and(!(1 << bit_idx), ordering);
        }
    }

    /// Atomically checks if the set contains the specified CPU.
    pub fn contains(&self, cpu_id: CpuId, ordering: Ordering) -> bool {
        let part_idx = part_idx(cpu_id);
        let bit_idx = bit_idx(cpu_id);
        part_idx < self.bits.len() && (self.bits[part_idx].load(ordering) & (1 << bit_idx)) != 0
    }
}

impl Default for AtomicCpuSet {
    fn default() -> Self {
        Self::new(CpuSet::new_empty())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn cpu(id: usize) -> CpuId {
        CpuId::try_from(id).unwrap()
    }

    #[test]
    fn add_remove_iterate() {
        let mut set = CpuSet::new_empty();
        assert!(set.is_empty());
        set.add(cpu(5));
        set.add(cpu(0));
        set.add(cpu(63));
        assert_eq!(set.count(), 3);
        assert_eq!(set.iter().collect::<Vec<_>>(), [cpu(0), cpu(5), cpu(63)]);
        set.remove(cpu(5));
        assert!(!set.contains(cpu(5)));
        assert_eq!(set.first(), Some(cpu(0)));
    }

    #[test]
    fn intersection_and_intersects() {
        let a = CpuSet::from_mask(0b0111);
        let b = CpuSet::from_mask(0b1100);
        assert!(a.intersects(&b));
        assert_eq!(a.intersection(&b), CpuSet::from(cpu(2)));
        assert!(!CpuSet::from(cpu(7)).intersects(&a));
    }

    #[test]
    fn atomic_set_operations() {
        let set = AtomicCpuSet::default();
        set.add(cpu(1), Ordering::Relaxed);
        set.add(cpu(3), Ordering::Relaxed);
        assert!(set.contains(cpu(3), Ordering::Relaxed));
        set.remove(cpu(3), Ordering::Relaxed);
        assert_eq!(set.load(Ordering::Relaxed), CpuSet::from(cpu(1)));
        set.store(&CpuSet::from_mask(0b110), Ordering::Relaxed);
        assert_eq!(set.load(Ordering::Relaxed).count(), 2);
    }
}
