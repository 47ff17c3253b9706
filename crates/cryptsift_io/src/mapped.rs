use cryptsift_core::{BlockSource, CoreError, Result};
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;

pub struct MmapReader {
    mmap: Mmap,
}

impl MmapReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let metadata = file.metadata()?;
        if !metadata.is_file() {
            return Err(CoreError::Format(format!(
                "{} is not a regular file",
                path.as_ref().display()
            )));
        }
        if metadata.len() == 0 {
            return Err(CoreError::Format("cannot map an empty file".to_string()));
        }

        // SAFETY: the mapping is read-only. Concurrent truncation of the
        // image by another process is outside what this tool supports.
        let mmap = unsafe { Mmap::map(&file) }?;

        #[cfg(target_os = "linux")]
        {
            use memmap2::Advice;
            let _ = mmap.advise(Advice::Sequential);
        }

        Ok(Self { mmap })
    }

    #[inline]
    pub fn slice(&self, offset: u64, len: usize) -> Option<&[u8]> {
        let start = usize::try_from(offset).ok()?;
        if start >= self.mmap.len() {
            return None;
        }
        let end = start.saturating_add(len).min(self.mmap.len());
        Some(&self.mmap[start..end])
    }
}

impl BlockSource for MmapReader {
    fn read_chunk(&mut self, offset: u64, buffer: &mut [u8]) -> Result<usize> {
        match self.slice(offset, buffer.len()) {
            Some(slice) => {
                buffer[..slice.len()].copy_from_slice(slice);
                Ok(slice.len())
            }
            None => Ok(0),
        }
    }

    fn size(&self) -> u64 {
        self.mmap.len() as u64
    }

    #[cfg(target_os = "linux")]
    fn prefetch(&self, offset: u64, len: u64) {
        let (Ok(start), Ok(len)) = (usize::try_from(offset), usize::try_from(len)) else {
            return;
        };
        if start >= self.mmap.len() {
            return;
        }
        let end = start.saturating_add(len).min(self.mmap.len());
        let _ = self
            .mmap
            .advise_range(memmap2::Advice::WillNeed, start, end - start);
    }
}
