use std::fmt;

use serde::{Serialize, Serializer};
use tracing::{debug, info};

use crate::blocks::{BlockReader, Extent};
use crate::error::{CoreError, Result};
use crate::traits::BlockSource;

pub const GPT_SIGNATURE: &[u8; 8] = b"EFI PART";
pub const GPT_HEADER_LBA: u64 = 1;
const GPT_MIN_HEADER_SIZE: usize = 92;
const GPT_MIN_ENTRY_SIZE: usize = 128;
const GPT_MAX_TABLE_BYTES: u64 = 16 * 1024 * 1024;
const HEADER_CRC_RANGE: std::ops::Range<usize> = 16..20;
const ENTRY_NAME_OFFSET: usize = 56;

/// A 16-byte GUID as stored on disk (first three fields little-endian).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Guid([u8; 16]);

impl Guid {
    pub const ZERO: Guid = Guid([0; 16]);

    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0 == [0; 16]
    }

    pub fn parse_str(text: &str) -> Option<Self> {
        let layout_ok = text.len() == 36
            && text.bytes().enumerate().all(|(i, b)| match i {
                8 | 13 | 18 | 23 => b == b'-',
                _ => b.is_ascii_hexdigit(),
            });
        if !layout_ok {
            return None;
        }
        let hex_digits: String = text.chars().filter(|c| *c != '-').collect();
        let raw = hex::decode(hex_digits).ok()?;
        let mut bytes = [0u8; 16];
        bytes[0..4].copy_from_slice(&[raw[3], raw[2], raw[1], raw[0]]);
        bytes[4..6].copy_from_slice(&[raw[5], raw[4]]);
        bytes[6..8].copy_from_slice(&[raw[7], raw[6]]);
        bytes[8..16].copy_from_slice(&raw[8..16]);
        Some(Self(bytes))
    }

    pub fn type_name(&self) -> Option<&'static str> {
        KNOWN_TYPES
            .iter()
            .find(|(guid, _)| Guid::parse_str(guid).as_ref() == Some(self))
            .map(|(_, name)| *name)
    }
}

const KNOWN_TYPES: &[(&str, &str)] = &[
    ("C12A7328-F81F-11D2-BA4B-00A0C93EC93B", "EFI System"),
    ("21686148-6449-6E6F-744E-656564454649", "BIOS boot"),
    ("E3C9E316-0B5C-4DB8-817D-F92DF00215AE", "Microsoft reserved"),
    ("EBD0A0A2-B9E5-4433-87C0-68B6B72699C7", "Microsoft basic data"),
    ("DE94BBA4-06D1-4D40-A16A-BFD50179D6AC", "Windows recovery"),
    ("0FC63DAF-8483-4772-8E79-3D69D8477DE4", "Linux filesystem"),
    ("0657FD6D-A4AB-43C4-84E5-0933C84B4F4F", "Linux swap"),
    ("E6D6D379-F507-44C2-A23C-238F2A3DF928", "Linux LVM"),
    ("CA7D7CCB-63ED-4C53-861C-1742536059CC", "Linux LUKS"),
    ("7FFEC5C9-2D00-49B7-8941-3EA10A5586B7", "Linux dm-crypt"),
    ("48465300-0000-11AA-AA11-00306543ECAC", "Apple HFS+"),
    ("7C3457EF-0000-11AA-AA11-00306543ECAC", "Apple APFS"),
];

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02X}{:02X}{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{}",
            b[3],
            b[2],
            b[1],
            b[0],
            b[5],
            b[4],
            b[7],
            b[6],
            b[8],
            b[9],
            hex::encode_upper(&b[10..16])
        )
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({self})")
    }
}

impl Serialize for Guid {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionTableHeader {
    pub revision: u32,
    pub header_size: u32,
    pub header_crc32: u32,
    pub current_lba: u64,
    pub backup_lba: u64,
    pub first_usable_lba: u64,
    pub last_usable_lba: u64,
    pub disk_guid: Guid,
    pub entries_lba: u64,
    pub entry_count: u32,
    pub entry_size: u32,
    pub entries_crc32: u32,
}

impl PartitionTableHeader {
    pub fn parse(sector: &[u8], verify_checksum: bool) -> Result<Self> {
        if sector.len() < GPT_MIN_HEADER_SIZE {
            return Err(CoreError::Format(format!(
                "header sector is {} bytes, need at least {GPT_MIN_HEADER_SIZE}",
                sector.len()
            )));
        }
        if &sector[..8] != GPT_SIGNATURE {
            return Err(CoreError::Format(format!(
                "bad GPT signature {}",
                hex::encode(&sector[..8])
            )));
        }

        let header = Self {
            revision: u32_at(sector, 8)?,
            header_size: u32_at(sector, 12)?,
            header_crc32: u32_at(sector, 16)?,
            current_lba: u64_at(sector, 24)?,
            backup_lba: u64_at(sector, 32)?,
            first_usable_lba: u64_at(sector, 40)?,
            last_usable_lba: u64_at(sector, 48)?,
            disk_guid: guid_at(sector, 56)?,
            entries_lba: u64_at(sector, 72)?,
            entry_count: u32_at(sector, 80)?,
            entry_size: u32_at(sector, 84)?,
            entries_crc32: u32_at(sector, 88)?,
        };

        let header_size = header.header_size as usize;
        if header_size < GPT_MIN_HEADER_SIZE || header_size > sector.len() {
            return Err(CoreError::Format(format!(
                "header size {header_size} outside [{GPT_MIN_HEADER_SIZE}, {}]",
                sector.len()
            )));
        }

        if verify_checksum {
            let mut hasher = crc32fast::Hasher::new();
            hasher.update(&sector[..HEADER_CRC_RANGE.start]);
            hasher.update(&[0u8; 4]);
            hasher.update(&sector[HEADER_CRC_RANGE.end..header_size]);
            let computed = hasher.finalize();
            if computed != header.header_crc32 {
                return Err(CoreError::Format(format!(
                    "header CRC mismatch: stored {:#010x}, computed {computed:#010x}",
                    header.header_crc32
                )));
            }
        }

        let entry_size = header.entry_size as usize;
        if entry_size < GPT_MIN_ENTRY_SIZE || entry_size % 8 != 0 {
            return Err(CoreError::Format(format!(
                "entry size {entry_size} must be a multiple of 8 and at least {GPT_MIN_ENTRY_SIZE}"
            )));
        }

        Ok(header)
    }

    pub fn entry_array_len(&self, sector_size: u64) -> Result<u64> {
        let table_bytes = u64::from(self.entry_count) * u64::from(self.entry_size);
        if table_bytes > GPT_MAX_TABLE_BYTES {
            return Err(CoreError::Format(format!(
                "entry array of {table_bytes} bytes exceeds {GPT_MAX_TABLE_BYTES}"
            )));
        }

        // The primary array sits between the header and the first usable LBA.
        if self.entries_lba < self.first_usable_lba {
            let region = (self.first_usable_lba - self.entries_lba)
                .checked_mul(sector_size)
                .ok_or_else(|| CoreError::Format("entry array region overflows".into()))?;
            if table_bytes > region {
                return Err(CoreError::Format(format!(
                    "{} entries of {} bytes overflow the {region}-byte entry array region",
                    self.entry_count, self.entry_size
                )));
            }
        }

        Ok(table_bytes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionEntry {
    pub index: u32,
    pub type_guid: Guid,
    pub unique_guid: Guid,
    pub first_lba: u64,
    pub last_lba: u64,
    pub attributes: u64,
    pub name: String,
}

impl PartitionEntry {
    pub fn parse(index: u32, raw: &[u8]) -> Result<Self> {
        let name_bytes = raw.get(ENTRY_NAME_OFFSET..).unwrap_or_default();
        let units: Vec<u16> = name_bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .take_while(|unit| *unit != 0)
            .collect();

        Ok(Self {
            index,
            type_guid: guid_at(raw, 0)?,
            unique_guid: guid_at(raw, 16)?,
            first_lba: u64_at(raw, 32)?,
            last_lba: u64_at(raw, 40)?,
            attributes: u64_at(raw, 48)?,
            name: String::from_utf16_lossy(&units),
        })
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        !self.type_guid.is_zero() && self.first_lba <= self.last_lba
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Partition {
    pub index: u32,
    pub id: Guid,
    pub type_guid: Guid,
    pub name: String,
    pub extent: Extent,
    pub byte_offset: u64,
    pub byte_len: u64,
}

impl Partition {
    fn from_entry(entry: &PartitionEntry, sector_size: u64) -> Result<Self> {
        let overflow = || {
            CoreError::Format(format!(
                "partition {} range [{}, {}] overflows",
                entry.index, entry.first_lba, entry.last_lba
            ))
        };
        let block_count = (entry.last_lba - entry.first_lba)
            .checked_add(1)
            .ok_or_else(overflow)?;
        let byte_offset = entry.first_lba.checked_mul(sector_size).ok_or_else(overflow)?;
        let byte_len = block_count.checked_mul(sector_size).ok_or_else(overflow)?;
        byte_offset.checked_add(byte_len).ok_or_else(overflow)?;

        Ok(Self {
            index: entry.index,
            id: entry.unique_guid,
            type_guid: entry.type_guid,
            name: entry.name.clone(),
            extent: Extent::Sectors {
                first: entry.first_lba,
                count: block_count,
            },
            byte_offset,
            byte_len,
        })
    }

    pub fn whole(name: impl Into<String>, len: u64) -> Self {
        Self {
            index: 0,
            id: Guid::ZERO,
            type_guid: Guid::ZERO,
            name: name.into(),
            extent: Extent::Bytes { offset: 0, len },
            byte_offset: 0,
            byte_len: len,
        }
    }

    pub fn label(&self) -> String {
        if self.name.is_empty() {
            format!("#{}", self.index)
        } else {
            self.name.clone()
        }
    }
}

#[derive(Debug, Clone)]
pub struct PartitionTable {
    header: PartitionTableHeader,
    entries: Vec<PartitionEntry>,
    sector_size: u64,
}

impl PartitionTable {
    pub fn parse<S: BlockSource>(reader: &mut BlockReader<S>) -> Result<Self> {
        Self::parse_with(reader, true)
    }

    pub fn parse_with<S: BlockSource>(
        reader: &mut BlockReader<S>,
        verify_checksums: bool,
    ) -> Result<Self> {
        let sector_size = reader.sector_size();
        let sector_len = usize::try_from(sector_size)
            .map_err(|_| CoreError::InvalidConfig(format!("sector size {sector_size}")))?;

        let sector = reader.read_exact_at(GPT_HEADER_LBA * sector_size, sector_len)?;
        let header = PartitionTableHeader::parse(&sector, verify_checksums)?;

        let array_len = header.entry_array_len(sector_size)?;
        let array_offset = header
            .entries_lba
            .checked_mul(sector_size)
            .filter(|offset| offset.checked_add(array_len).is_some())
            .ok_or_else(|| {
                CoreError::Format(format!("entry array LBA {} overflows", header.entries_lba))
            })?;
        let array = reader.read_exact_at(array_offset, array_len as usize)?;

        if verify_checksums {
            let computed = crc32fast::hash(&array);
            if computed != header.entries_crc32 {
                return Err(CoreError::Format(format!(
                    "entry array CRC mismatch: stored {:#010x}, computed {computed:#010x}",
                    header.entries_crc32
                )));
            }
        }

        let entries = array
            .chunks_exact(header.entry_size as usize)
            .enumerate()
            .map(|(index, raw)| PartitionEntry::parse(index as u32, raw))
            .collect::<Result<Vec<_>>>()?;

        info!(
            disk = %header.disk_guid,
            entries = entries.len(),
            valid = entries.iter().filter(|e| e.is_valid()).count(),
            "parsed GPT"
        );

        Ok(Self {
            header,
            entries,
            sector_size,
        })
    }

    #[inline]
    pub fn header(&self) -> &PartitionTableHeader {
        &self.header
    }

    #[inline]
    pub fn entries(&self) -> &[PartitionEntry] {
        &self.entries
    }

    #[inline]
    pub fn sector_size(&self) -> u64 {
        self.sector_size
    }

    pub fn valid_entries(&self) -> impl Iterator<Item = &PartitionEntry> + Clone + '_ {
        self.entries.iter().filter(|entry| entry.is_valid())
    }

    pub fn partitions(&self) -> Result<Vec<Partition>> {
        let partitions = self
            .valid_entries()
            .map(|entry| Partition::from_entry(entry, self.sector_size))
            .collect::<Result<Vec<_>>>()?;

        if partitions.is_empty() {
            return Err(CoreError::NoValidPartitions);
        }
        for p in &partitions {
            debug!(index = p.index, id = %p.id, offset = p.byte_offset, len = p.byte_len, "partition");
        }
        Ok(partitions)
    }
}

fn field<const N: usize>(buf: &[u8], at: usize) -> Result<[u8; N]> {
    buf.get(at..at + N)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or_else(|| CoreError::Format(format!("field at offset {at} runs past {} bytes", buf.len())))
}

fn u32_at(buf: &[u8], at: usize) -> Result<u32> {
    field::<4>(buf, at).map(u32::from_le_bytes)
}

fn u64_at(buf: &[u8], at: usize) -> Result<u64> {
    field::<8>(buf, at).map(u64::from_le_bytes)
}

fn guid_at(buf: &[u8], at: usize) -> Result<Guid> {
    field::<16>(buf, at).map(Guid::from_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    const LINUX_FS: &str = "0FC63DAF-8483-4772-8E79-3D69D8477DE4";

    fn entry_bytes(type_guid: Guid, unique: Guid, first: u64, last: u64, name: &str) -> Vec<u8> {
        let mut raw = vec![0u8; 128];
        raw[0..16].copy_from_slice(type_guid.as_bytes());
        raw[16..32].copy_from_slice(unique.as_bytes());
        raw[32..40].copy_from_slice(&first.to_le_bytes());
        raw[40..48].copy_from_slice(&last.to_le_bytes());
        for (i, unit) in name.encode_utf16().enumerate() {
            raw[56 + i * 2..58 + i * 2].copy_from_slice(&unit.to_le_bytes());
        }
        raw
    }

    /// 64-sector image, 4 entries at LBA 2, usable area from LBA 6.
    fn image_with(entries: &[Vec<u8>]) -> Vec<u8> {
        let mut image = vec![0u8; 64 * 512];
        let mut array = vec![0u8; 4 * 128];
        for (i, e) in entries.iter().enumerate() {
            array[i * 128..(i + 1) * 128].copy_from_slice(e);
        }
        image[1024..1024 + array.len()].copy_from_slice(&array);

        let h = &mut image[512..1024];
        h[0..8].copy_from_slice(GPT_SIGNATURE);
        h[8..12].copy_from_slice(&0x0001_0000u32.to_le_bytes());
        h[12..16].copy_from_slice(&92u32.to_le_bytes());
        h[24..32].copy_from_slice(&1u64.to_le_bytes());
        h[32..40].copy_from_slice(&63u64.to_le_bytes());
        h[40..48].copy_from_slice(&6u64.to_le_bytes());
        h[48..56].copy_from_slice(&62u64.to_le_bytes());
        h[72..80].copy_from_slice(&2u64.to_le_bytes());
        h[80..84].copy_from_slice(&4u32.to_le_bytes());
        h[84..88].copy_from_slice(&128u32.to_le_bytes());
        h[88..92].copy_from_slice(&crc32fast::hash(&array).to_le_bytes());
        let crc = crc32fast::hash(&h[..92]);
        h[16..20].copy_from_slice(&crc.to_le_bytes());
        image
    }

    fn reader(image: Vec<u8>) -> BlockReader<MemorySource> {
        BlockReader::new(MemorySource::from(image), 512, 4096).unwrap()
    }

    fn linux() -> Guid {
        Guid::parse_str(LINUX_FS).unwrap()
    }

    #[test]
    fn test_guid_text_form_round_trips() {
        let guid = linux();
        assert_eq!(guid.as_bytes()[0], 0xAF);
        assert_eq!(guid.to_string(), LINUX_FS);
        assert_eq!(guid.type_name(), Some("Linux filesystem"));
        assert!(Guid::parse_str("not-a-guid").is_none());
    }

    #[test]
    fn test_guid_requires_dash_layout() {
        assert_eq!(
            Guid::parse_str("0fc63daf-8483-4772-8e79-3d69d8477de4"),
            Some(linux())
        );
        // Right length and digit count, dashes in the wrong places.
        assert!(Guid::parse_str("0FC63DAF8-483-4772-8E79-3D69D8477DE4").is_none());
        assert!(Guid::parse_str("0FC63DAF-84834772-8E79-3D69D8477DE-4").is_none());
        assert!(Guid::parse_str("-0FC63DAF84834772-8E79-3D69D8477DE4-").is_none());
        assert!(Guid::parse_str("0FC63DAF-8483-4772-8E79-3D69D8477DEG").is_none());
    }

    #[test]
    fn test_parse_valid_table() {
        let unique = Guid::from_bytes([7; 16]);
        let image = image_with(&[
            entry_bytes(linux(), unique, 8, 23, "root"),
            entry_bytes(Guid::ZERO, Guid::ZERO, 0, 0, ""),
            entry_bytes(linux(), unique, 40, 30, "backwards"),
        ]);

        let table = PartitionTable::parse(&mut reader(image)).unwrap();
        assert_eq!(table.entries().len(), 4);
        assert_eq!(table.valid_entries().count(), 1);
        assert_eq!(table.valid_entries().count(), 1);

        let partitions = table.partitions().unwrap();
        assert_eq!(partitions.len(), 1);
        let p = &partitions[0];
        assert_eq!(p.name, "root");
        assert_eq!(p.id, unique);
        assert_eq!(p.byte_offset, 8 * 512);
        assert_eq!(p.byte_len, 16 * 512);
    }

    #[test]
    fn test_bad_magic_is_format_error() {
        let mut image = image_with(&[entry_bytes(linux(), linux(), 8, 9, "")]);
        image[512] = b'X';
        let result = PartitionTable::parse(&mut reader(image));
        assert!(matches!(result, Err(CoreError::Format(_))));
    }

    #[test]
    fn test_header_crc_mismatch_is_format_error() {
        let mut image = image_with(&[entry_bytes(linux(), linux(), 8, 9, "")]);
        image[512 + 40] ^= 0xFF;
        assert!(matches!(
            PartitionTable::parse(&mut reader(image.clone())),
            Err(CoreError::Format(_))
        ));
        assert!(PartitionTable::parse_with(&mut reader(image), false).is_ok());
    }

    #[test]
    fn test_entry_array_crc_mismatch_is_format_error() {
        let mut image = image_with(&[entry_bytes(linux(), linux(), 8, 9, "")]);
        image[1024 + 32] = 9;
        assert!(matches!(
            PartitionTable::parse(&mut reader(image)),
            Err(CoreError::Format(_))
        ));
    }

    #[test]
    fn test_short_image_is_truncated() {
        let image = image_with(&[entry_bytes(linux(), linux(), 8, 9, "")]);
        let result = PartitionTable::parse(&mut reader(image[..700].to_vec()));
        assert!(matches!(result, Err(CoreError::Truncated { offset: 512, .. })));

        let result = PartitionTable::parse(&mut reader(image[..1100].to_vec()));
        assert!(matches!(result, Err(CoreError::Truncated { offset: 1024, .. })));
    }

    #[test]
    fn test_no_valid_entries() {
        let image = image_with(&[entry_bytes(Guid::ZERO, linux(), 8, 9, "")]);
        let table = PartitionTable::parse(&mut reader(image)).unwrap();
        assert!(matches!(table.partitions(), Err(CoreError::NoValidPartitions)));
    }

    #[test]
    fn test_entry_array_larger_than_region() {
        let h = PartitionTableHeader {
            revision: 0x0001_0000,
            header_size: 92,
            header_crc32: 0,
            current_lba: 1,
            backup_lba: 0,
            first_usable_lba: 34,
            last_usable_lba: 100,
            disk_guid: Guid::ZERO,
            entries_lba: 2,
            entry_count: 129,
            entry_size: 128,
            entries_crc32: 0,
        };
        assert!(matches!(h.entry_array_len(512), Err(CoreError::Format(_))));

        let fits = PartitionTableHeader {
            entry_count: 128,
            ..h.clone()
        };
        assert_eq!(fits.entry_array_len(512).unwrap(), 16384);

        let huge = PartitionTableHeader {
            entry_count: u32::MAX,
            entry_size: 1024,
            entries_lba: 40,
            ..h
        };
        assert!(matches!(huge.entry_array_len(512), Err(CoreError::Format(_))));
    }

    #[test]
    fn test_tiny_entry_size_rejected() {
        let mut sector = vec![0u8; 512];
        sector[0..8].copy_from_slice(GPT_SIGNATURE);
        sector[12..16].copy_from_slice(&92u32.to_le_bytes());
        sector[84..88].copy_from_slice(&16u32.to_le_bytes());
        assert!(matches!(
            PartitionTableHeader::parse(&sector, false),
            Err(CoreError::Format(_))
        ));
    }

    #[test]
    fn test_overflowing_entry_range_is_format_error() {
        let image = image_with(&[entry_bytes(linux(), linux(), 0, u64::MAX, "")]);
        let table = PartitionTable::parse(&mut reader(image)).unwrap();
        assert!(matches!(table.partitions(), Err(CoreError::Format(_))));
    }
}
