use std::io::{Cursor, Write};

use bzip2::write::BzEncoder;
use flate2::Compression;
use flate2::write::{GzEncoder, ZlibEncoder};
use xz2::write::XzEncoder;

use crate::config::CompressorKind;
use crate::error::{CoreError, Result};
use crate::traits::Compressor;

pub struct ZlibCompressor {
    level: Compression,
}

impl Default for ZlibCompressor {
    fn default() -> Self {
        Self {
            level: Compression::default(),
        }
    }
}

impl Compressor for ZlibCompressor {
    fn name(&self) -> &str {
        "zlib"
    }

    fn compressed_len(&self, data: &[u8]) -> Result<usize> {
        let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), self.level);
        encoder.write_all(data)?;
        Ok(encoder.finish()?.len())
    }
}

pub struct GzipCompressor {
    level: Compression,
}

impl Default for GzipCompressor {
    fn default() -> Self {
        Self {
            level: Compression::default(),
        }
    }
}

impl Compressor for GzipCompressor {
    fn name(&self) -> &str {
        "gzip"
    }

    fn compressed_len(&self, data: &[u8]) -> Result<usize> {
        let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), self.level);
        encoder.write_all(data)?;
        Ok(encoder.finish()?.len())
    }
}

pub struct Bzip2Compressor {
    level: bzip2::Compression,
}

impl Default for Bzip2Compressor {
    fn default() -> Self {
        Self {
            level: bzip2::Compression::best(),
        }
    }
}

impl Compressor for Bzip2Compressor {
    fn name(&self) -> &str {
        "bzip2"
    }

    fn compressed_len(&self, data: &[u8]) -> Result<usize> {
        let mut encoder = BzEncoder::new(Vec::with_capacity(data.len() / 2), self.level);
        encoder.write_all(data)?;
        Ok(encoder.finish()?.len())
    }
}

pub struct XzCompressor {
    preset: u32,
}

impl Default for XzCompressor {
    fn default() -> Self {
        Self { preset: 6 }
    }
}

impl Compressor for XzCompressor {
    fn name(&self) -> &str {
        "xz"
    }

    fn compressed_len(&self, data: &[u8]) -> Result<usize> {
        let mut encoder = XzEncoder::new(Vec::with_capacity(data.len() / 2), self.preset);
        encoder.write_all(data)?;
        Ok(encoder.finish()?.len())
    }
}

pub struct ZstdCompressor {
    level: i32,
}

impl Default for ZstdCompressor {
    fn default() -> Self {
        Self {
            level: zstd::DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

impl Compressor for ZstdCompressor {
    fn name(&self) -> &str {
        "zstd"
    }

    fn compressed_len(&self, data: &[u8]) -> Result<usize> {
        Ok(zstd::encode_all(Cursor::new(data), self.level)?.len())
    }
}

impl CompressorKind {
    pub fn build(self) -> Box<dyn Compressor> {
        match self {
            CompressorKind::Zlib => Box::new(ZlibCompressor::default()),
            CompressorKind::Gzip => Box::new(GzipCompressor::default()),
            CompressorKind::Bzip2 => Box::new(Bzip2Compressor::default()),
            CompressorKind::Xz => Box::new(XzCompressor::default()),
            CompressorKind::Zstd => Box::new(ZstdCompressor::default()),
        }
    }
}

pub fn build_compressors(kinds: &[CompressorKind]) -> Vec<Box<dyn Compressor>> {
    kinds.iter().map(|kind| kind.build()).collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompressionOutcome {
    pub ratio: f64,
    pub per_compressor: Vec<(String, f64)>,
    pub sampled_bytes: usize,
}

pub fn compression_ratio(
    windows: &[Vec<u8>],
    compressors: &[Box<dyn Compressor>],
) -> Result<CompressionOutcome> {
    if compressors.len() < 2 {
        return Err(CoreError::InvalidConfig(format!(
            "compression test needs at least two compressors, got {}",
            compressors.len()
        )));
    }
    let sampled_bytes: usize = windows.iter().map(Vec::len).sum();
    if sampled_bytes == 0 {
        return Err(CoreError::DegenerateInput("no bytes sampled".into()));
    }

    let mut per_compressor = Vec::with_capacity(compressors.len());
    for compressor in compressors {
        let mut compressed = 0usize;
        for window in windows.iter().filter(|w| !w.is_empty()) {
            compressed += compressor.compressed_len(window)?;
        }
        per_compressor.push((
            compressor.name().to_string(),
            compressed as f64 / sampled_bytes as f64,
        ));
    }

    let ratio = per_compressor.iter().map(|(_, r)| r).sum::<f64>() / per_compressor.len() as f64;
    Ok(CompressionOutcome {
        ratio,
        per_compressor,
        sampled_bytes,
    })
}
