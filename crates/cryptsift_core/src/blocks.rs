use serde::Serialize;

use crate::error::{CoreError, Result};
use crate::traits::BlockSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "unit", rename_all = "snake_case")]
pub enum Extent {
    Sectors { first: u64, count: u64 },
    /// Byte-granular, for inputs that are not sector aligned.
    Bytes { offset: u64, len: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub offset: u64,
    pub data: Vec<u8>,
}

pub struct BlockReader<S> {
    source: S,
    sector_size: u64,
    chunk_size: usize,
}

impl<S: BlockSource> BlockReader<S> {
    pub fn new(source: S, sector_size: u32, chunk_size: usize) -> Result<Self> {
        if sector_size == 0 {
            return Err(CoreError::InvalidConfig("sector size must be non-zero".into()));
        }
        if chunk_size == 0 || chunk_size % sector_size as usize != 0 {
            return Err(CoreError::InvalidConfig(format!(
                "chunk size {chunk_size} is not a positive multiple of sector size {sector_size}"
            )));
        }
        Ok(Self {
            source,
            sector_size: u64::from(sector_size),
            chunk_size,
        })
    }

    #[inline]
    pub fn sector_size(&self) -> u64 {
        self.sector_size
    }

    #[inline]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn source_size(&self) -> u64 {
        self.source.size()
    }

    pub fn into_inner(self) -> S {
        self.source
    }

    /// Reads exactly `len` bytes at `offset`, retrying short reads.
    pub fn read_exact_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; len];
        let filled = fill(&mut self.source, offset, &mut buffer)?;
        if filled < len {
            return Err(CoreError::Truncated {
                offset,
                expected: len as u64,
                actual: filled as u64,
            });
        }
        Ok(buffer)
    }

    pub fn blocks_in_extent(&mut self, extent: Extent) -> Result<Blocks<'_, S>> {
        match extent {
            Extent::Sectors { first, count } => self.blocks_in_range(first, count),
            Extent::Bytes { offset, len } => Ok(self.bytes_in_range(offset, len)),
        }
    }

    pub fn blocks_in_range(&mut self, first_block: u64, block_count: u64) -> Result<Blocks<'_, S>> {
        let offset = first_block
            .checked_mul(self.sector_size)
            .ok_or_else(|| CoreError::Format(format!("block {first_block} overflows")))?;
        let len = block_count
            .checked_mul(self.sector_size)
            .filter(|len| offset.checked_add(*len).is_some())
            .ok_or_else(|| CoreError::Format(format!("block count {block_count} overflows")))?;
        Ok(self.bytes_in_range(offset, len))
    }

    pub fn bytes_in_range(&mut self, offset: u64, len: u64) -> Blocks<'_, S> {
        Blocks {
            source: &mut self.source,
            chunk_size: self.chunk_size,
            next_offset: offset,
            remaining: len,
            failed: false,
        }
    }
}

pub struct Blocks<'a, S> {
    source: &'a mut S,
    chunk_size: usize,
    next_offset: u64,
    remaining: u64,
    failed: bool,
}

impl<S> Blocks<'_, S> {
    #[inline]
    pub fn remaining(&self) -> u64 {
        self.remaining
    }
}

impl<S: BlockSource> Iterator for Blocks<'_, S> {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.remaining == 0 {
            return None;
        }

        let want = self.remaining.min(self.chunk_size as u64) as usize;
        let offset = self.next_offset;
        let ahead = (self.remaining - want as u64).min(self.chunk_size as u64);
        if ahead > 0 {
            self.source.prefetch(offset + want as u64, ahead);
        }
        let mut data = vec![0u8; want];

        let filled = match fill(self.source, offset, &mut data) {
            Ok(filled) => filled,
            Err(e) => {
                self.failed = true;
                return Some(Err(e));
            }
        };

        if filled < want {
            self.failed = true;
            return Some(Err(CoreError::Truncated {
                offset,
                expected: want as u64,
                actual: filled as u64,
            }));
        }

        self.next_offset += want as u64;
        self.remaining -= want as u64;
        Some(Ok(Block { offset, data }))
    }
}

fn fill<S: BlockSource + ?Sized>(source: &mut S, offset: u64, buffer: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        let n = source.read_chunk(offset + filled as u64, &mut buffer[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
