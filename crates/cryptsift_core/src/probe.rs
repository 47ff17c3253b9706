use crate::traits::FilesystemProbe;

pub const PROBE_LEN: usize = 128 * 1024;

const MAGICS: &[(&str, usize, &[u8])] = &[
    ("ext2/3/4", 1080, &[0x53, 0xEF]),
    ("xfs", 0, b"XFSB"),
    ("btrfs", 0x10040, b"_BHRfS_M"),
    ("ntfs", 3, b"NTFS    "),
    ("exfat", 3, b"EXFAT   "),
    ("fat32", 82, b"FAT32   "),
    ("fat12", 54, b"FAT12   "),
    ("fat16", 54, b"FAT16   "),
    ("apfs", 32, b"NXSB"),
    ("iso9660", 0x8001, b"CD001"),
    ("linux-swap", 4086, b"SWAPSPACE2"),
    ("luks", 0, b"LUKS\xba\xbe"),
    ("bitlocker", 3, b"-FVE-FS-"),
];

#[derive(Debug, Clone, Copy, Default)]
pub struct SuperblockProbe;

impl FilesystemProbe for SuperblockProbe {
    fn probe(&self, head: &[u8]) -> Vec<String> {
        MAGICS
            .iter()
            .filter(|(_, offset, magic)| {
                head.get(*offset..*offset + magic.len()) == Some(*magic)
            })
            .map(|(name, _, _)| (*name).to_string())
            .collect()
    }
}
