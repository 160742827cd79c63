// SPDX-License-Identifier: MPL-2.0

//! Useful synchronization primitives.

mod spin;

pub use ::spin::{Mutex, MutexGuard, Once, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub use self::spin::{SpinLock, SpinLockGuard};
