//! Buffered positional reads from block devices and image files.

use cryptsift_core::{BlockSource, Result};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;

/// A read-only source over a block device (`/dev/sda`, `/dev/nvme0n1`) or a
/// raw image file.
///
/// The handle is opened read-only and never written. Sequential access is
/// announced to the kernel on Linux since partitions are streamed front to
/// back.
///
/// # Example
///
/// ```ignore
/// use cryptsift_io::DiskReader;
/// use cryptsift_core::BlockSource;
///
/// let mut reader = DiskReader::open("/dev/sda")?;
/// let mut header = vec![0u8; 512];
/// reader.read_chunk(512, &mut header)?;
/// ```
pub struct DiskReader {
    file: File,
    size: u64,
    block_device: bool,
}

impl DiskReader {
    /// Opens `path` read-only and measures it.
    ///
    /// Fails when the path does not exist, permission is denied, or the
    /// size cannot be determined.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut file = OpenOptions::new().read(true).write(false).open(path)?;

        #[cfg(target_os = "linux")]
        {
            use rustix::fs::{Advice, fadvise};

            let _ = fadvise(&file, 0, None, Advice::Sequential);
            let _ = fadvise(&file, 0, None, Advice::NoReuse);
        }

        let block_device = is_block_device(&file)?;
        // Block devices report a zero metadata length; seeking to the end
        // yields their real capacity.
        let size = file.seek(SeekFrom::End(0))?;
        file.seek(SeekFrom::Start(0))?;

        tracing::debug!(path = %path.display(), size, block_device, "opened disk reader");
        Ok(Self {
            file,
            size,
            block_device,
        })
    }

    #[inline]
    pub fn is_block_device(&self) -> bool {
        self.block_device
    }
}

#[cfg(unix)]
fn is_block_device(file: &File) -> Result<bool> {
    use rustix::fs::{FileType, fstat};

    let stat = fstat(file).map_err(std::io::Error::from)?;
    Ok(FileType::from_raw_mode(stat.st_mode) == FileType::BlockDevice)
}

#[cfg(not(unix))]
fn is_block_device(_file: &File) -> Result<bool> {
    Ok(false)
}

impl BlockSource for DiskReader {
    fn read_chunk(&mut self, offset: u64, buffer: &mut [u8]) -> Result<usize> {
        if offset >= self.size {
            return Ok(0);
        }
        self.file.seek(SeekFrom::Start(offset))?;
        loop {
            match self.file.read(buffer) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn size(&self) -> u64 {
        self.size
    }

    #[cfg(target_os = "linux")]
    fn prefetch(&self, offset: u64, len: u64) {
        use rustix::fs::{Advice, fadvise};

        if offset < self.size {
            let _ = fadvise(&self.file, offset, std::num::NonZeroU64::new(len), Advice::WillNeed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_reads_at_offsets() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"EFI PART and then the entry array").unwrap();
        temp_file.flush().unwrap();

        let mut reader = DiskReader::open(temp_file.path()).unwrap();
        assert_eq!(reader.size(), 33);
        assert!(!reader.is_block_device());

        let mut buffer = vec![0u8; 8];
        assert_eq!(reader.read_chunk(0, &mut buffer).unwrap(), 8);
        assert_eq!(&buffer, b"EFI PART");

        let mut buffer = vec![0u8; 5];
        assert_eq!(reader.read_chunk(28, &mut buffer).unwrap(), 5);
        assert_eq!(&buffer, b"array");
    }

    #[test]
    fn test_short_read_at_end() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"Short").unwrap();
        temp_file.flush().unwrap();

        let mut reader = DiskReader::open(temp_file.path()).unwrap();
        let mut buffer = vec![0u8; 100];
        assert_eq!(reader.read_chunk(0, &mut buffer).unwrap(), 5);
        assert_eq!(reader.read_chunk(5, &mut buffer).unwrap(), 0);
        assert_eq!(reader.read_chunk(500, &mut buffer).unwrap(), 0);
    }

    #[test]
    fn test_prefetch_leaves_reads_unchanged() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(&[7u8; 4096]).unwrap();
        temp_file.flush().unwrap();

        let mut reader = DiskReader::open(temp_file.path()).unwrap();
        reader.prefetch(1024, 2048);
        reader.prefetch(1 << 40, 512);
        let mut buffer = vec![0u8; 2048];
        assert_eq!(reader.read_chunk(1024, &mut buffer).unwrap(), 2048);
        assert!(buffer.iter().all(|&b| b == 7));
    }

    #[test]
    fn test_missing_path_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = DiskReader::open(dir.path().join("absent.img"));
        assert!(matches!(result, Err(cryptsift_core::CoreError::Io(_))));
    }
}
