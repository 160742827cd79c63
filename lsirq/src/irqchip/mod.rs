// SPDX-License-Identifier: MPL-2.0

//! Drivers of the interrupt controllers.
//!
//! Each driver exposes an `init` function that programs the controller,
//! creates its domain in the [`IrqCore`](crate::irq::IrqCore) and hooks it
//! to its parent. [`crate::cascade`] decides which of them run and in
//! which order.

pub mod cpu_intc;
pub mod eiointc;
pub mod htvec;
pub mod liointc;
pub mod pch_msi;
pub mod pch_pic;
