// SPDX-License-Identifier: MPL-2.0

//! Host stand-ins for the CPU-local operations.

/// Local IRQ control emulated with a flag.
///
/// Unit tests run on many threads at once, so each test thread gets its own
/// flag there.
pub mod irq {
    #[cfg(not(test))]
    mod flag {
        use core::sync::atomic::{AtomicBool, Ordering};

        static LOCAL_IRQ_ENABLED: AtomicBool = AtomicBool::new(true);

        pub(super) fn get() -> bool {
            LOCAL_IRQ_ENABLED.load(Ordering::Relaxed)
        }

        pub(super) fn set(enabled: bool) {
            LOCAL_IRQ_ENABLED.store(enabled, Ordering::Relaxed);
        }
    }

    #[cfg(test)]
    mod flag {
        use core::cell::Cell;

        std::thread_local! {
            static LOCAL_IRQ_ENABLED: Cell<bool> = const { Cell::new(true) };
        }

        pub(super) fn get() -> bool {
            LOCAL_IRQ_ENABLED.with(Cell::get)
        }

        pub(super) fn set(enabled: bool) {
            LOCAL_IRQ_ENABLED.with(|flag| flag.set(enabled));
        }
    }

    pub(crate) fn is_local_enabled() -> bool {
        flag::get()
    }

    pub(crate) fn enable_local() {
        flag::set(true);
    }

    pub(crate) fn disable_local() {
        flag::set(false);
    }
}
