// SPDX-License-Identifier: MPL-2.0

//! The PCI MSI hooks.
//!
//! The PCI layer asks for vectors here when it enables MSI or MSI-X on a
//! device and programs the returned messages into the device itself.

use log::{debug, warn};

use crate::{
    Error,
    irq::{FwSpec, HwIrq, IrqCore, IrqDomain, MsiMsg},
    prelude::*,
};

/// The vector index bits of a PCI-level MSI number; the requester id sits
/// above them.
const MSI_INDEX_BITS: u32 = 11;

/// The kind of message-signalled interrupts a device uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MsiKind {
    /// Plain MSI.
    Msi,
    /// MSI-X.
    MsiX,
}

/// One allocated vector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MsiVector {
    /// The virtual IRQ delivering the vector.
    pub virq: Virq,
    /// The message to program into the device.
    pub msg: MsiMsg,
}

/// The outcome of [`setup_msi_irqs`].
#[derive(Debug, PartialEq, Eq)]
pub enum MsiAllocation {
    /// The vectors were allocated.
    Allocated(Vec<MsiVector>),
    /// The request cannot be served as is; the caller may retry with this
    /// many vectors.
    RetryWith(u32),
}

const fn msi_hwirq(requester_id: u16, index: u32) -> HwIrq {
    (requester_id as u32) << MSI_INDEX_BITS | index
}

/// Allocates `nvec` vectors for the device `requester_id`.
///
/// `domain` is the PCI-MSI domain, if one was set up.
pub fn setup_msi_irqs(
    core: &IrqCore,
    domain: Option<&Arc<IrqDomain>>,
    msix_enabled: bool,
    requester_id: u16,
    kind: MsiKind,
    nvec: u32,
) -> Result<MsiAllocation> {
    if kind == MsiKind::MsiX && !msix_enabled {
        return Err(Error::NoSpace);
    }
    if nvec == 0 || nvec as usize >= 1 << MSI_INDEX_BITS {
        return Err(Error::InvalidArgs);
    }
    if kind == MsiKind::Msi && nvec > 1 {
        return Ok(MsiAllocation::RetryWith(1));
    }
    let domain = domain.ok_or(Error::NotSupported)?;

    let mut vectors = Vec::with_capacity(nvec as usize);
    for index in 0..nvec {
        let allocated = core
            .alloc_irqs(domain, 1, &FwSpec::one(msi_hwirq(requester_id, index)))
            .and_then(|virq| match core.compose_msi_msg(virq) {
                Some(msg) => Ok(MsiVector { virq, msg }),
                None => {
                    core.free_irqs(virq, 1);
                    Err(Error::NoDevice)
                }
            });
        match allocated {
            Ok(vector) => vectors.push(vector),
            Err(err) => {
                warn!(
                    "msi: device {:#06x} failed at vector {} of {}: {}",
                    requester_id, index, nvec, err
                );
                for vector in vectors {
                    teardown_msi_irq(core, vector.virq);
                }
                return Err(err);
            }
        }
    }

    debug!("msi: device {:#06x} got {} vectors", requester_id, nvec);
    Ok(MsiAllocation::Allocated(vectors))
}

/// Releases a vector returned by [`setup_msi_irqs`].
pub fn teardown_msi_irq(core: &IrqCore, virq: Virq) {
    core.free_irqs(virq, 1);
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        boot::SysConf,
        cpu::CpuTopology,
        io::{Platform, sim::SimBoard},
        irq::FwNode,
        irqchip::{cpu_intc, eiointc, pch_msi},
    };

    fn msi_domains(count: u32) -> (Arc<IrqCore>, pch_msi::PchMsiDomains) {
        let board = SimBoard::new(4, 4);
        let topology = Arc::new(CpuTopology::new(&SysConf::default()));
        topology.build_from_reserved();
        let core = Arc::new(IrqCore::new());
        let platform: Arc<dyn Platform> = Arc::new(board);
        let cpu = cpu_intc::init(&core, platform.clone()).unwrap();
        let (_, extioi) = eiointc::init(&core, platform, topology, &cpu).unwrap();
        let domains =
            pch_msi::init(&core, &extioi, FwNode::Address(0x2ff0_0000), 0x2ff0_0000, true, 64, count)
                .unwrap();
        (core, domains)
    }

    fn vectors(allocation: MsiAllocation) -> Vec<MsiVector> {
        match allocation {
            MsiAllocation::Allocated(vectors) => vectors,
            MsiAllocation::RetryWith(n) => panic!("asked to retry with {n}"),
        }
    }

    #[test]
    fn msix_vectors_get_distinct_messages() {
        let (core, domains) = msi_domains(192);
        let got = vectors(
            setup_msi_irqs(&core, Some(&domains.pci), true, 0x0100, MsiKind::MsiX, 3).unwrap(),
        );
        let data: Vec<_> = got.iter().map(|v| v.msg.data).collect();
        assert_eq!(data, [64, 65, 66]);
        assert!(got.iter().all(|v| v.msg.address_lo == 0x2ff0_0000));

        for vector in got {
            teardown_msi_irq(&core, vector.virq);
        }
        assert_eq!(domains.msi.num_free(), 192);
    }

    #[test]
    fn msix_disabled_on_the_command_line_is_no_space() {
        let (core, domains) = msi_domains(192);
        assert_eq!(
            setup_msi_irqs(&core, Some(&domains.pci), false, 0, MsiKind::MsiX, 1),
            Err(Error::NoSpace)
        );
        // Plain MSI is unaffected.
        assert!(setup_msi_irqs(&core, Some(&domains.pci), false, 0, MsiKind::Msi, 1).is_ok());
    }

    #[test]
    fn multi_vector_msi_is_retried_with_one() {
        let (core, domains) = msi_domains(192);
        assert_eq!(
            setup_msi_irqs(&core, Some(&domains.pci), true, 0, MsiKind::Msi, 4),
            Ok(MsiAllocation::RetryWith(1))
        );
        assert_eq!(
            setup_msi_irqs(&core, None, true, 0, MsiKind::Msi, 1),
            Err(Error::NotSupported)
        );
    }

    #[test]
    fn exhaustion_releases_the_vectors_already_taken() {
        let (core, domains) = msi_domains(4);
        assert_eq!(
            setup_msi_irqs(&core, Some(&domains.pci), true, 7, MsiKind::MsiX, 6),
            Err(Error::NoSpace)
        );
        assert_eq!(domains.msi.num_free(), 4);
    }
}
