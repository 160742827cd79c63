// SPDX-License-Identifier: MPL-2.0

use core::{
    cell::UnsafeCell,
    fmt,
    marker::PhantomData,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, Ordering},
};

use crate::irq::{DisabledLocalIrqGuard, disable_local};

/// A spin lock.
///
/// Locks taken from interrupt handlers must be acquired with
/// [`lock_irq_disabled`] everywhere, otherwise a handler may spin forever on
/// a lock held by the code it interrupted.
///
/// [`lock_irq_disabled`]: Self::lock_irq_disabled
pub struct SpinLock<T: ?Sized> {
    lock: AtomicBool,
    val: UnsafeCell<T>,
}

impl<T> SpinLock<T> {
    /// Creates a new spin lock.
    pub const fn new(val: T) -> Self {
        Self {
            lock: AtomicBool::new(false),
            val: UnsafeCell::new(val),
        }
    }
}

impl<T: ?Sized> SpinLock<T> {
    /// Acquires the spin lock with disabling the local IRQs. This is the most secure
    /// locking way.
    ///
    /// This method runs in a busy loop until the lock can be acquired.
    /// After acquiring the spin lock, all interrupts are disabled.
    pub fn lock_irq_disabled(&self) -> SpinLockGuard<'_, T> {
        let guard = disable_local();
        self.acquire_lock();
        SpinLockGuard {
            lock: self,
            _irq_guard: Some(guard),
            _not_send: PhantomData,
        }
    }

    /// Tries acquiring the spin lock immedidately with disabling the local IRQs.
    pub fn try_lock_irq_disabled(&self) -> Option<SpinLockGuard<'_, T>> {
        let irq_guard = disable_local();
        if self.try_acquire_lock() {
            return Some(SpinLockGuard {
                lock: self,
                _irq_guard: Some(irq_guard),
                _not_send: PhantomData,
            });
        }
        None
    }

    /// Acquires the spin lock without disabling local IRQs.
    ///
    /// Prefer this over [`lock_irq_disabled`] only when the lock is never
    /// taken in interrupt context.
    ///
    /// [`lock_irq_disabled`]: Self::lock_irq_disabled
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        self.acquire_lock();
        SpinLockGuard {
            lock: self,
            _irq_guard: None,
            _not_send: PhantomData,
        }
    }

    /// Tries acquiring the spin lock immedidately without disabling the local IRQs.
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        if self.try_acquire_lock() {
            return Some(SpinLockGuard {
                lock: self,
                _irq_guard: None,
                _not_send: PhantomData,
            });
        }
        None
    }

    /// Returns a mutable reference to the inner data.
    ///
    /// No locking is needed since the borrow is exclusive.
    pub fn get_mut(&mut self) -> &mut T {
        self.val.get_mut()
    }

    /// Acquires the spin lock, otherwise busy waiting
    fn acquire_lock(&self) {
        while !self.try_acquire_lock() {
            core::hint::spin_loop();
        }
    }

    fn try_acquire_lock(&self) -> bool {
        self.lock
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    fn release_lock(&self) {
        self.lock.store(false, Ordering::Release);
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for SpinLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.try_lock() {
            Some(guard) => f.debug_tuple("SpinLock").field(&&*guard).finish(),
            None => f.write_str("SpinLock(<locked>)"),
        }
    }
}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

// SAFETY: Only a single lock holder is permitted to access the inner data of Spinlock.
unsafe impl<T: ?Sized + Send> Send for SpinLock<T> {}
// SAFETY: Same as above.
unsafe impl<T: ?Sized + Send> Sync for SpinLock<T> {}

/// The guard of a spin lock.
///
/// If the lock was taken with IRQs disabled, the previous IRQ state is
/// restored after the lock is released.
#[clippy::has_significant_drop]
#[must_use]
pub struct SpinLockGuard<'a, T: ?Sized> {
    lock: &'a SpinLock<T>,
    // Dropped after `Drop::drop` releases the lock.
    _irq_guard: Option<DisabledLocalIrqGuard>,
    _not_send: PhantomData<*mut ()>,
}

impl<T: ?Sized> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: The guard proves the lock is held.
        unsafe { &*self.lock.val.get() }
    }
}

impl<T: ?Sized> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: The guard proves the lock is held exclusively.
        unsafe { &mut *self.lock.val.get() }
    }
}

impl<T: ?Sized> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release_lock();
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for SpinLockGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

// SAFETY: `SpinLockGuard` can be shared between threads on the same CPU.
unsafe impl<T: ?Sized + Sync> Sync for SpinLockGuard<'_, T> {}
