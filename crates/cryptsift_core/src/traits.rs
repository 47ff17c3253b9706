//! Ports through which the analysis engine reaches the outside world.
//!
//! The engine never touches files, compressors or bit-level test suites
//! directly. Everything it consumes arrives through one of these traits so
//! adapters can be swapped without touching the statistics.

use std::collections::BTreeMap;

use crate::battery::BitSequence;
use crate::error::Result;

/// A source of raw block data, typically a disk image file.
///
/// Offsets are absolute byte positions in the image. Implementations are
/// free to return short reads; callers that need an exact amount keep
/// reading until they get it or the source reports zero bytes.
///
/// # Example
///
/// ```ignore
/// struct ImageFile { /* ... */ }
///
/// impl BlockSource for ImageFile {
///     fn read_chunk(&mut self, offset: u64, buffer: &mut [u8]) -> Result<usize> {
///         // Read from the image at offset
///     }
///
///     fn size(&self) -> u64 {
///         // Return total size in bytes
///     }
/// }
/// ```
pub trait BlockSource {
    /// Reads a chunk of data from the source at the specified offset.
    ///
    /// # Arguments
    ///
    /// * `offset` - The byte offset to start reading from
    /// * `buffer` - The buffer to read data into
    ///
    /// # Returns
    ///
    /// The number of bytes actually read, which may be less than `buffer.len()`
    /// if the end of the source is reached. Zero means end of source.
    fn read_chunk(&mut self, offset: u64, buffer: &mut [u8]) -> Result<usize>;

    /// Returns the total size of the source in bytes.
    fn size(&self) -> u64;

    /// Hints that `[offset, offset + len)` will be read next. Sources that
    /// cannot act on the hint ignore it.
    fn prefetch(&self, _offset: u64, _len: u64) {}
}

impl<S: BlockSource + ?Sized> BlockSource for Box<S> {
    fn read_chunk(&mut self, offset: u64, buffer: &mut [u8]) -> Result<usize> {
        (**self).read_chunk(offset, buffer)
    }

    fn size(&self) -> u64 {
        (**self).size()
    }

    fn prefetch(&self, offset: u64, len: u64) {
        (**self).prefetch(offset, len)
    }
}

/// A general-purpose byte compressor, used only for its output length.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` because one compressor set is
/// shared by every partition task in the worker pool.
pub trait Compressor: Send + Sync {
    /// Short stable name used in reports, e.g. `"zlib"`.
    fn name(&self) -> &str;

    /// Compresses `data` and returns the length of the compressed output.
    ///
    /// # Arguments
    ///
    /// * `data` - The bytes to compress
    ///
    /// # Returns
    ///
    /// The compressed length in bytes, including any container framing the
    /// algorithm emits.
    fn compressed_len(&self, data: &[u8]) -> Result<usize>;
}

/// An opaque bit-level randomness test battery.
///
/// Each entry of the returned map is one named test and whether the input
/// passed it. The aggregator folds the whole map into a single vote.
pub trait RandomnessBattery: Send + Sync {
    fn name(&self) -> &str;

    /// Runs every test of the battery over `bits`.
    ///
    /// # Returns
    ///
    /// `{test name: passed}`. Tests that cannot run on an input this short
    /// are left out of the map rather than reported as failures.
    fn run(&self, bits: &BitSequence<'_>) -> Result<BTreeMap<String, bool>>;
}

/// Recognizes filesystem or container superblocks at the start of a partition.
///
/// Results are corroborating evidence only and never change a verdict.
pub trait FilesystemProbe: Send + Sync {
    /// Returns the names of every format whose magic is present in `head`,
    /// the first bytes of a partition.
    fn probe(&self, head: &[u8]) -> Vec<String>;
}
