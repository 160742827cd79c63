// SPDX-License-Identifier: MPL-2.0

use core::marker::PhantomData;

use crate::arch::irq;

/// Disables all IRQs on the current CPU (i.e., locally).
///
/// This function returns a guard object, which will automatically enable local IRQs again when
/// it is dropped. This function works correctly even when it is called in a _nested_ way.
/// The local IRQs shall only be re-enabled when the most outer guard is dropped.
///
/// This function can play nicely with [`SpinLock`] as the type uses this function internally.
/// One can invoke this function even after acquiring a spin lock. And the reversed order is also ok.
///
/// [`SpinLock`]: crate::sync::SpinLock
///
/// # Example
///
/// ```rust
/// use lsirq::irq;
///
/// {
///     let _guard = irq::disable_local();
///     // Do something with IRQs disabled.
/// }
/// ```
pub fn disable_local() -> DisabledLocalIrqGuard {
    DisabledLocalIrqGuard::new()
}

/// A guard for disabled local IRQs.
#[clippy::has_significant_drop]
#[must_use]
pub struct DisabledLocalIrqGuard {
    was_enabled: bool,
    // The guard must be dropped on the CPU that created it.
    _not_send: PhantomData<*mut ()>,
}

impl DisabledLocalIrqGuard {
    fn new() -> Self {
        let was_enabled = irq::is_local_enabled();
        if was_enabled {
            irq::disable_local();
        }
        Self {
            was_enabled,
            _not_send: PhantomData,
        }
    }
}

impl Drop for DisabledLocalIrqGuard {
    fn drop(&mut self) {
        if self.was_enabled {
            irq::enable_local();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn nested_guards_restore_on_outermost_drop() {
        assert!(irq::is_local_enabled());
        let outer = disable_local();
        {
            let _inner = disable_local();
            assert!(!irq::is_local_enabled());
        }
        assert!(!irq::is_local_enabled());
        drop(outer);
        assert!(irq::is_local_enabled());
    }
}
