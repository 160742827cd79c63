// SPDX-License-Identifier: MPL-2.0

//! System sleep support.

mod syscore;

pub use self::syscore::{SyscoreOps, SyscoreRegistry};
