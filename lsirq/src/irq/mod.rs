// SPDX-License-Identifier: MPL-2.0

//! Handling of Interrupt ReQuests (IRQs).
//!
//! # Domains and hierarchies
//!
//! Every interrupt controller owns an [`IrqDomain`]: the space of its
//! hardware interrupt numbers. A device interrupt travels through a chain of
//! controllers before it reaches the CPU, so a virtual IRQ ([`Virq`]) has
//! one level per domain on that chain, outermost first. Each level records
//! the hardware number of the IRQ in that domain and the [`IrqChip`] that
//! drives it there. Chips forward operations they cannot perform to the
//! level above (see [`IrqDataRef::mask_parent`] and friends).
//!
//! Controllers that are not hierarchical children of another controller,
//! but hang off one of its lines, install a [`ChainedHandler`] on that
//! line instead.
//!
//! # Flow
//!
//! A hardware event enters through [`IrqCore::handle_domain_irq`], which
//! maps it to a virtual IRQ and runs the [`FlowHandler`] of its descriptor.
//! Level-triggered lines are masked while the handlers run, edge-triggered
//! lines are only acknowledged.

mod chip;
mod desc;
mod domain;
mod guard;
mod manager;

pub use self::{
    chip::{IrqChip, MsiMsg},
    desc::{ChainedHandler, ChainedIrqGuard, FlowHandler, IrqData, IrqDataRef, IrqDesc, IrqHandler},
    domain::{FwNode, FwSpec, HwIrq, IrqDomain, IrqDomainOps, Trigger},
    guard::{DisabledLocalIrqGuard, disable_local},
    manager::{IrqCore, NR_IRQS},
};

/// A virtual IRQ number.
pub type Virq = u32;
