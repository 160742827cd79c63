// SPDX-License-Identifier: MPL-2.0

use alloc::collections::VecDeque;

use log::trace;

use crate::{cpu::NR_CPUS, prelude::*, sync::SpinLock};

/// Per-CPU queues of functions to run in the `CALL_FUNCTION` IPI handler.
pub(super) struct CallQueues {
    queues: Box<[SpinLock<VecDeque<fn()>>]>,
}

impl CallQueues {
    pub(super) fn new() -> Self {
        Self {
            queues: (0..NR_CPUS).map(|_| SpinLock::new(VecDeque::new())).collect(),
        }
    }

    pub(super) fn push(&self, cpu: CpuId, f: fn()) {
        self.queues[cpu.as_usize()].lock_irq_disabled().push_back(f);
    }

    /// Runs every queued function of `cpu`, returning how many ran.
    pub(super) fn drain(&self, cpu: CpuId) -> usize {
        let mut ran = 0;
        loop {
            // The lock is not held while `f` runs, so `f` may queue more work.
            let Some(f) = self.queues[cpu.as_usize()].lock_irq_disabled().pop_front() else {
                break;
            };
            trace!("Performing inter-processor call to {:#?} on CPU {}", f, cpu);
            f();
            ran += 1;
        }
        ran
    }

    pub(super) fn len(&self, cpu: CpuId) -> usize {
        self.queues[cpu.as_usize()].lock_irq_disabled().len()
    }
}

#[cfg(test)]
mod test {
    use core::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    static RUNS: AtomicU32 = AtomicU32::new(0);

    fn bump() {
        RUNS.fetch_add(1, Ordering::Relaxed);
    }

    #[test]
    fn queued_calls_run_once_in_order() {
        let queues = CallQueues::new();
        let cpu = CpuId::try_from(3).unwrap();
        queues.push(cpu, bump);
        queues.push(cpu, bump);
        assert_eq!(queues.len(cpu), 2);
        assert_eq!(queues.len(CpuId::bsp()), 0);

        let before = RUNS.load(Ordering::Relaxed);
        assert_eq!(queues.drain(cpu), 2);
        assert_eq!(queues.drain(cpu), 0);
        assert_eq!(RUNS.load(Ordering::Relaxed), before + 2);
    }
}
