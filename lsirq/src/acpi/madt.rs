// SPDX-License-Identifier: MPL-2.0

//! The LoongArch subtables of the Multiple APIC Description Table.
//!
//! Each subtable starts with a one-byte type and a one-byte length. An
//! entry whose length is shorter than its structure, or which runs past the
//! end of the table, is invalid and stops the walk.

use core::mem::size_of;

use log::warn;
use zerocopy::{
    FromBytes, Immutable, KnownLayout, Unaligned,
    byteorder::little_endian::{U16, U32, U64},
};

use crate::{Error, prelude::*};

/// The length of the MADT up to its first subtable: the common table
/// header, the local controller address and the flags.
pub const MADT_HEADER_LEN: usize = 44;
const SIGNATURE: &[u8; 4] = b"APIC";
const LENGTH_OFFSET: usize = 4;

/// Set in [`CorePic::flags`] for processors that may be brought up.
pub const ACPI_MADT_ENABLED: u32 = 1;

/// Types of the subtables.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MadtType {
    CorePic = 17,
    LioPic = 18,
    HtPic = 19,
    EioPic = 20,
    MsiPic = 21,
    BioPic = 22,
}

/// The header shared by all subtables.
#[derive(Clone, Copy, Debug, FromBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct SubtableHeader {
    pub kind: u8,
    pub length: u8,
}

/// A processor core.
#[derive(Clone, Copy, Debug, FromBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct CorePic {
    pub header: SubtableHeader,
    pub version: u8,
    pub processor_id: U32,
    pub core_id: U32,
    pub flags: U32,
}

/// A legacy I/O interrupt controller (LIOINTC).
#[derive(Clone, Copy, Debug, FromBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct LioPic {
    pub header: SubtableHeader,
    pub version: u8,
    pub address: U64,
    pub size: U16,
    /// Core interrupt lines the controller drives; 0 if unused.
    pub cascade: [u8; 2],
    /// Lines routed to each cascade pin.
    pub cascade_map: [U32; 2],
}

/// A HyperTransport vector controller.
#[derive(Clone, Copy, Debug, FromBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct HtPic {
    pub header: SubtableHeader,
    pub version: u8,
    pub address: U64,
    pub size: U16,
    /// LIOINTC lines of the status registers; 0 if unused.
    pub cascade: [u8; 8],
}

/// An extended I/O interrupt controller.
#[derive(Clone, Copy, Debug, FromBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct EioPic {
    pub header: SubtableHeader,
    pub version: u8,
    /// The core interrupt line the controller drives.
    pub cascade: u8,
    pub node: u8,
    pub node_map: U64,
}

/// The MSI window of the south bridge.
#[derive(Clone, Copy, Debug, FromBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct MsiPic {
    pub header: SubtableHeader,
    pub version: u8,
    pub msg_address: U64,
    pub start: U32,
    pub count: U32,
}

/// A south-bridge pin controller (PCH-PIC).
#[derive(Clone, Copy, Debug, FromBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct BioPic {
    pub header: SubtableHeader,
    pub version: u8,
    pub address: U64,
    pub size: U16,
    pub id: U16,
    pub gsi_base: U16,
}

/// A decoded subtable.
#[derive(Clone, Copy, Debug)]
pub enum MadtEntry {
    CorePic(CorePic),
    LioPic(LioPic),
    HtPic(HtPic),
    EioPic(EioPic),
    MsiPic(MsiPic),
    BioPic(BioPic),
    /// A subtable this crate does not use.
    Other(u8),
}

impl MadtEntry {
    /// Returns the subtable type.
    pub fn kind(&self) -> u8 {
        match self {
            Self::CorePic(_) => MadtType::CorePic as u8,
            Self::LioPic(_) => MadtType::LioPic as u8,
            Self::HtPic(_) => MadtType::HtPic as u8,
            Self::EioPic(_) => MadtType::EioPic as u8,
            Self::MsiPic(_) => MadtType::MsiPic as u8,
            Self::BioPic(_) => MadtType::BioPic as u8,
            Self::Other(kind) => *kind,
        }
    }
}

fn decode<T: FromBytes + KnownLayout + Immutable>(entry: &[u8]) -> Result<T> {
    if entry.len() < size_of::<T>() {
        return Err(Error::InvalidArgs);
    }
    T::read_from_prefix(entry)
        .map(|(decoded, _)| decoded)
        .map_err(|_| Error::InvalidArgs)
}

/// A MADT held in memory.
#[derive(Clone, Copy, Debug)]
pub struct Madt<'a> {
    subtables: &'a [u8],
}

impl<'a> Madt<'a> {
    /// Checks the signature and the length of `table`.
    pub fn new(table: &'a [u8]) -> Result<Self> {
        if table.len() < MADT_HEADER_LEN || &table[..SIGNATURE.len()] != SIGNATURE {
            return Err(Error::InvalidArgs);
        }
        let length = U32::read_from_prefix(&table[LENGTH_OFFSET..])
            .map_err(|_| Error::InvalidArgs)?
            .0
            .get() as usize;
        if length < MADT_HEADER_LEN || length > table.len() {
            return Err(Error::InvalidArgs);
        }
        Ok(Self {
            subtables: &table[MADT_HEADER_LEN..length],
        })
    }

    /// Walks the subtables in table order.
    pub fn entries(&self) -> MadtEntries<'a> {
        MadtEntries {
            rest: self.subtables,
            failed: false,
        }
    }

    /// Decodes every subtable of type `kind`, at most `max` of them.
    ///
    /// Fails on the first invalid subtable, of any type.
    pub fn collect(&self, kind: MadtType, max: usize) -> Result<Vec<MadtEntry>> {
        let mut found = Vec::new();
        for entry in self.entries() {
            let entry = entry?;
            if entry.kind() == kind as u8 && found.len() < max {
                found.push(entry);
            }
        }
        Ok(found)
    }
}

/// The iterator returned by [`Madt::entries`].
pub struct MadtEntries<'a> {
    rest: &'a [u8],
    failed: bool,
}

impl MadtEntries<'_> {
    fn next_entry(&mut self) -> Result<MadtEntry> {
        let (header, _) = SubtableHeader::read_from_prefix(self.rest).map_err(|_| Error::InvalidArgs)?;
        let length = header.length as usize;
        if length < size_of::<SubtableHeader>() || length > self.rest.len() {
            return Err(Error::InvalidArgs);
        }
        let (bytes, rest) = self.rest.split_at(length);
        self.rest = rest;

        let entry = match header.kind {
            17 => MadtEntry::CorePic(decode(bytes)?),
            18 => MadtEntry::LioPic(decode(bytes)?),
            19 => MadtEntry::HtPic(decode(bytes)?),
            20 => MadtEntry::EioPic(decode(bytes)?),
            21 => MadtEntry::MsiPic(decode(bytes)?),
            22 => MadtEntry::BioPic(decode(bytes)?),
            kind => MadtEntry::Other(kind),
        };
        Ok(entry)
    }
}

impl Iterator for MadtEntries<'_> {
    type Item = Result<MadtEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.rest.is_empty() {
            return None;
        }
        let entry = self.next_entry();
        if let Err(err) = entry {
            warn!("ACPI: bad MADT entry: {}", err);
            self.failed = true;
        }
        Some(entry)
    }
}

/// Builders of raw subtables, shared by the tests of the ACPI consumers.
#[cfg(test)]
pub(crate) mod build {
    use super::*;

    pub struct MadtBuilder {
        bytes: Vec<u8>,
    }

    impl MadtBuilder {
        pub fn new() -> Self {
            let mut bytes = vec![0u8; MADT_HEADER_LEN];
            bytes[..4].copy_from_slice(SIGNATURE);
            Self { bytes }
        }

        pub fn raw(mut self, kind: u8, body: &[u8]) -> Self {
            self.bytes.push(kind);
            self.bytes.push((body.len() + 2) as u8);
            self.bytes.extend_from_slice(body);
            self
        }

        pub fn core_pic(self, core_id: u32, flags: u32) -> Self {
            let mut body = vec![1];
            body.extend_from_slice(&core_id.to_le_bytes());
            body.extend_from_slice(&core_id.to_le_bytes());
            body.extend_from_slice(&flags.to_le_bytes());
            self.raw(MadtType::CorePic as u8, &body)
        }

        pub fn lio_pic(self, address: u64, cascade: [u8; 2], cascade_map: [u32; 2]) -> Self {
            let mut body = vec![1];
            body.extend_from_slice(&address.to_le_bytes());
            body.extend_from_slice(&0x80u16.to_le_bytes());
            body.extend_from_slice(&cascade);
            body.extend_from_slice(&cascade_map[0].to_le_bytes());
            body.extend_from_slice(&cascade_map[1].to_le_bytes());
            self.raw(MadtType::LioPic as u8, &body)
        }

        pub fn ht_pic(self, address: u64, cascade: [u8; 8]) -> Self {
            let mut body = vec![1];
            body.extend_from_slice(&address.to_le_bytes());
            body.extend_from_slice(&0x40u16.to_le_bytes());
            body.extend_from_slice(&cascade);
            self.raw(MadtType::HtPic as u8, &body)
        }

        pub fn eio_pic(self, cascade: u8, node: u8, node_map: u64) -> Self {
            let mut body = vec![1, cascade, node];
            body.extend_from_slice(&node_map.to_le_bytes());
            self.raw(MadtType::EioPic as u8, &body)
        }

        pub fn msi_pic(self, msg_address: u64, start: u32, count: u32) -> Self {
            let mut body = vec![1];
            body.extend_from_slice(&msg_address.to_le_bytes());
            body.extend_from_slice(&start.to_le_bytes());
            body.extend_from_slice(&count.to_le_bytes());
            self.raw(MadtType::MsiPic as u8, &body)
        }

        pub fn bio_pic(self, address: u64, id: u16, gsi_base: u16) -> Self {
            let mut body = vec![1];
            body.extend_from_slice(&address.to_le_bytes());
            body.extend_from_slice(&0x400u16.to_le_bytes());
            body.extend_from_slice(&id.to_le_bytes());
            body.extend_from_slice(&gsi_base.to_le_bytes());
            self.raw(MadtType::BioPic as u8, &body)
        }

        pub fn finish(mut self) -> Vec<u8> {
            let len = self.bytes.len() as u32;
            self.bytes[LENGTH_OFFSET..LENGTH_OFFSET + 4].copy_from_slice(&len.to_le_bytes());
            self.bytes
        }
    }
}

#[cfg(test)]
mod test {
    use super::{build::MadtBuilder, *};

    #[test]
    fn subtable_sizes_match_the_firmware_layout() {
        assert_eq!(size_of::<CorePic>(), 15);
        assert_eq!(size_of::<LioPic>(), 23);
        assert_eq!(size_of::<HtPic>(), 21);
        assert_eq!(size_of::<EioPic>(), 13);
        assert_eq!(size_of::<MsiPic>(), 19);
        assert_eq!(size_of::<BioPic>(), 17);
    }

    #[test]
    fn entries_decode_in_table_order() {
        let table = MadtBuilder::new()
            .core_pic(0, ACPI_MADT_ENABLED)
            .raw(0x7f, &[1, 2, 3])
            .msi_pic(0x2ff0_0000, 64, 192)
            .bio_pic(0x1000_0000, 0, 64)
            .finish();
        let madt = Madt::new(&table).unwrap();
        let entries: Vec<_> = madt.entries().collect::<Result<_>>().unwrap();
        assert_eq!(entries.len(), 4);

        let MadtEntry::CorePic(core) = entries[0] else {
            panic!("expected a core entry");
        };
        assert_eq!(core.core_id.get(), 0);
        assert_eq!(core.flags.get(), ACPI_MADT_ENABLED);
        assert_eq!(entries[1].kind(), 0x7f);
        let MadtEntry::MsiPic(msi) = entries[2] else {
            panic!("expected an MSI entry");
        };
        assert_eq!((msi.msg_address.get(), msi.start.get(), msi.count.get()), (0x2ff0_0000, 64, 192));
        let MadtEntry::BioPic(bio) = entries[3] else {
            panic!("expected a PCH-PIC entry");
        };
        assert_eq!((bio.address.get(), bio.gsi_base.get()), (0x1000_0000, 64));
    }

    #[test]
    fn short_entry_stops_the_walk() {
        let table = MadtBuilder::new()
            .core_pic(0, ACPI_MADT_ENABLED)
            // A core entry two bytes short.
            .raw(MadtType::CorePic as u8, &[1, 0, 0, 0, 0, 1, 0, 0, 0, 1, 0])
            .core_pic(2, ACPI_MADT_ENABLED)
            .finish();
        let madt = Madt::new(&table).unwrap();
        let results: Vec<_> = madt.entries().collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert_eq!(results[1].as_ref().err(), Some(&Error::InvalidArgs));
        assert_eq!(madt.collect(MadtType::CorePic, 256).err(), Some(Error::InvalidArgs));
    }

    #[test]
    fn zero_length_entry_is_invalid() {
        let mut table = MadtBuilder::new().core_pic(0, ACPI_MADT_ENABLED).finish();
        table[MADT_HEADER_LEN + 1] = 0;
        let madt = Madt::new(&table).unwrap();
        assert_eq!(madt.entries().count(), 1);
        assert!(madt.collect(MadtType::CorePic, 256).is_err());
    }

    #[test]
    fn table_header_is_checked() {
        let mut table = MadtBuilder::new().finish();
        assert!(Madt::new(&table).is_ok());
        assert!(Madt::new(&table[..20]).is_err());
        table[0] = b'X';
        assert!(Madt::new(&table).is_err());
    }

    #[test]
    fn collect_honors_the_limit() {
        let table = MadtBuilder::new()
            .bio_pic(0x1000_0000, 0, 64)
            .bio_pic(0x1001_0000, 1, 128)
            .finish();
        let madt = Madt::new(&table).unwrap();
        assert_eq!(madt.collect(MadtType::BioPic, 1).unwrap().len(), 1);
        assert!(madt.collect(MadtType::EioPic, 4).unwrap().is_empty());
    }
}
