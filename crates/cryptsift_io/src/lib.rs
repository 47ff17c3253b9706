mod disk;
mod mapped;

pub use disk::DiskReader;
pub use mapped::MmapReader;

use cryptsift_core::{BlockSource, Result};
use std::path::Path;

pub enum ImageReader {
    Mmap(MmapReader),
    Disk(DiskReader),
}

impl ImageReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match MmapReader::open(path) {
            Ok(reader) => Ok(ImageReader::Mmap(reader)),
            Err(e) => {
                tracing::debug!(path = %path.display(), reason = %e, "mmap unavailable, using buffered reads");
                Ok(ImageReader::Disk(DiskReader::open(path)?))
            }
        }
    }

    pub fn open_buffered(path: impl AsRef<Path>) -> Result<Self> {
        Ok(ImageReader::Disk(DiskReader::open(path)?))
    }

    #[inline]
    pub fn is_mmap(&self) -> bool {
        matches!(self, ImageReader::Mmap(_))
    }

    pub fn is_block_device(&self) -> bool {
        match self {
            ImageReader::Mmap(_) => false,
            ImageReader::Disk(r) => r.is_block_device(),
        }
    }
}

impl BlockSource for ImageReader {
    fn read_chunk(&mut self, offset: u64, buffer: &mut [u8]) -> Result<usize> {
        match self {
            ImageReader::Mmap(r) => r.read_chunk(offset, buffer),
            ImageReader::Disk(r) => r.read_chunk(offset, buffer),
        }
    }

    fn size(&self) -> u64 {
        match self {
            ImageReader::Mmap(r) => r.size(),
            ImageReader::Disk(r) => r.size(),
        }
    }

    fn prefetch(&self, offset: u64, len: u64) {
        match self {
            ImageReader::Mmap(r) => r.prefetch(offset, len),
            ImageReader::Disk(r) => r.prefetch(offset, len),
        }
    }
}
