#![allow(dead_code)]

use cryptsift_core::Guid;
use sha2::{Digest, Sha256};

pub const SECTOR: usize = 512;
pub const LINUX_FS: &str = "0FC63DAF-8483-4772-8E79-3D69D8477DE4";

/// Deterministic, cryptographically strong bytes: SHA-256 in counter mode.
pub fn pseudorandom(seed: &[u8], len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len + 32);
    let mut counter = 0u64;
    while out.len() < len {
        let mut hasher = Sha256::new();
        hasher.update(seed);
        hasher.update(counter.to_le_bytes());
        out.extend_from_slice(&hasher.finalize());
        counter += 1;
    }
    out.truncate(len);
    out
}

pub struct PartitionSpec {
    pub name: &'static str,
    pub unique: Guid,
    pub first_lba: u64,
    pub data: Vec<u8>,
}

/// Builds a GPT disk image: protective area, header at LBA 1, 128 entries at
/// LBA 2, usable space from LBA 34. Every partition's data is written at
/// its first LBA and padded up to whole sectors.
pub fn gpt_image(partitions: &[PartitionSpec]) -> Vec<u8> {
    let type_guid = Guid::parse_str(LINUX_FS).expect("valid guid");
    let end_lba = partitions
        .iter()
        .map(|p| p.first_lba + sectors(p.data.len()))
        .max()
        .unwrap_or(34)
        .max(34);
    let total_sectors = end_lba as usize + 34;
    let mut image = vec![0u8; total_sectors * SECTOR];

    let mut array = vec![0u8; 128 * 128];
    for (i, p) in partitions.iter().enumerate() {
        let entry = &mut array[i * 128..(i + 1) * 128];
        entry[0..16].copy_from_slice(type_guid.as_bytes());
        entry[16..32].copy_from_slice(p.unique.as_bytes());
        entry[32..40].copy_from_slice(&p.first_lba.to_le_bytes());
        let last = p.first_lba + sectors(p.data.len()) - 1;
        entry[40..48].copy_from_slice(&last.to_le_bytes());
        for (j, unit) in p.name.encode_utf16().enumerate() {
            entry[56 + j * 2..58 + j * 2].copy_from_slice(&unit.to_le_bytes());
        }

        let start = p.first_lba as usize * SECTOR;
        image[start..start + p.data.len()].copy_from_slice(&p.data);
    }
    image[2 * SECTOR..2 * SECTOR + array.len()].copy_from_slice(&array);

    let header = &mut image[SECTOR..2 * SECTOR];
    header[0..8].copy_from_slice(b"EFI PART");
    header[8..12].copy_from_slice(&0x0001_0000u32.to_le_bytes());
    header[12..16].copy_from_slice(&92u32.to_le_bytes());
    header[24..32].copy_from_slice(&1u64.to_le_bytes());
    header[32..40].copy_from_slice(&(total_sectors as u64 - 1).to_le_bytes());
    header[40..48].copy_from_slice(&34u64.to_le_bytes());
    header[48..56].copy_from_slice(&(total_sectors as u64 - 34).to_le_bytes());
    header[56..72].copy_from_slice(&[0x42; 16]);
    header[72..80].copy_from_slice(&2u64.to_le_bytes());
    header[80..84].copy_from_slice(&128u32.to_le_bytes());
    header[84..88].copy_from_slice(&128u32.to_le_bytes());
    header[88..92].copy_from_slice(&crc32fast::hash(&array).to_le_bytes());
    let crc = crc32fast::hash(&header[..92]);
    header[16..20].copy_from_slice(&crc.to_le_bytes());

    image
}

fn sectors(len: usize) -> u64 {
    len.div_ceil(SECTOR).max(1) as u64
}
