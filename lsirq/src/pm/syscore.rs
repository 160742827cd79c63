// SPDX-License-Identifier: MPL-2.0

use log::{debug, warn};

use crate::{prelude::*, sync::RwLock};

/// Hooks run on the last core standing, with interrupts disabled, around a
/// system sleep.
pub trait SyscoreOps: Send + Sync {
    /// A name for diagnostics.
    fn name(&self) -> &'static str;

    /// Saves state before the system sleeps.
    fn suspend(&self) -> Result<()> {
        Ok(())
    }

    /// Restores the hardware after the system wakes.
    fn resume(&self) {}
}

/// The ordered list of [`SyscoreOps`].
///
/// Suspend runs the hooks in reverse registration order and resume runs
/// them in registration order, so that a controller is always suspended
/// before the controllers it depends on and resumed after them.
pub struct SyscoreRegistry {
    ops: RwLock<Vec<Arc<dyn SyscoreOps>>>,
}

impl SyscoreRegistry {
    /// Creates an empty registry.
    pub const fn new() -> Self {
        Self {
            ops: RwLock::new(Vec::new()),
        }
    }

    /// Appends `ops`.
    pub fn register(&self, ops: Arc<dyn SyscoreOps>) {
        debug!("syscore: registered {}", ops.name());
        self.ops.write().push(ops);
    }

    /// Removes every hook registered under `name`.
    pub fn unregister(&self, name: &str) {
        self.ops.write().retain(|ops| ops.name() != name);
    }

    /// Returns the number of registered hooks.
    pub fn len(&self) -> usize {
        self.ops.read().len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.ops.read().is_empty()
    }

    /// Runs the suspend hooks.
    ///
    /// If a hook fails, the hooks that already suspended are resumed and
    /// the error is returned.
    pub fn suspend(&self) -> Result<()> {
        let ops = self.ops.read().clone();
        for (idx, hook) in ops.iter().enumerate().rev() {
            if let Err(err) = hook.suspend() {
                warn!("syscore: {} failed to suspend: {}", hook.name(), err);
                for suspended in &ops[idx + 1..] {
                    suspended.resume();
                }
                return Err(err);
            }
        }
        Ok(())
    }

    /// Runs the resume hooks.
    pub fn resume(&self) {
        let ops = self.ops.read().clone();
        for hook in ops.iter() {
            hook.resume();
        }
    }
}

impl Default for SyscoreRegistry {
    fn default() -> Self {
        Self::new()
    }
}
