use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::statistics::TestKind;

pub const DEFAULT_SECTOR_SIZE: u32 = 512;
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KsAlpha {
    OnePercent,
    FivePercent,
}

impl KsAlpha {
    pub fn coefficient(self) -> f64 {
        match self {
            KsAlpha::OnePercent => 1.63,
            KsAlpha::FivePercent => 1.36,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressorKind {
    Zlib,
    Gzip,
    Bzip2,
    Xz,
    Zstd,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub entropy_min: f64,
    pub chi_square_critical: f64,
    pub ks_alpha: KsAlpha,
    pub compression_epsilon: f64,
    pub autocorrelation_max: f64,
    /// A signature overrides only if random data would produce at least as
    /// many matches with probability below this. 1 disables the check.
    pub signature_alpha: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            entropy_min: 7.9,
            chi_square_critical: 293.25,
            ks_alpha: KsAlpha::FivePercent,
            compression_epsilon: 0.05,
            autocorrelation_max: 0.1,
            signature_alpha: 1e-4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub window_size: usize,
    pub window_count: usize,
    pub autocorrelation_block: usize,
    pub max_lag: usize,
    pub battery_max_bytes: usize,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            window_size: 64 * 1024,
            window_count: 16,
            autocorrelation_block: 512,
            max_lag: 50,
            battery_max_bytes: 128 * 1024,
        }
    }
}

impl SamplingConfig {
    pub fn budget(&self) -> usize {
        self.window_size.saturating_mul(self.window_count)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureSpec {
    pub name: String,
    pub hex: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub sector_size: u32,
    pub chunk_size: usize,
    /// Worker threads for partition analysis; 0 uses every CPU.
    pub workers: usize,
    pub verify_checksums: bool,
    pub hash_partitions: bool,
    pub probe_filesystems: bool,
    pub tests: Vec<TestKind>,
    pub thresholds: Thresholds,
    pub sampling: SamplingConfig,
    pub compressors: Vec<CompressorKind>,
    /// Replaces the built-in signature list when set.
    pub signatures: Option<Vec<SignatureSpec>>,
    /// Shorter signatures are reported but never override.
    pub min_signature_len: usize,
    pub max_recorded_offsets: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            sector_size: DEFAULT_SECTOR_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            workers: 0,
            verify_checksums: true,
            hash_partitions: false,
            probe_filesystems: true,
            tests: TestKind::ALL.to_vec(),
            thresholds: Thresholds::default(),
            sampling: SamplingConfig::default(),
            compressors: vec![
                CompressorKind::Zlib,
                CompressorKind::Gzip,
                CompressorKind::Bzip2,
                CompressorKind::Xz,
                CompressorKind::Zstd,
            ],
            signatures: None,
            min_signature_len: 4,
            max_recorded_offsets: 64,
        }
    }
}

impl AnalysisConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| CoreError::InvalidConfig(format!("malformed configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    #[inline]
    pub fn is_enabled(&self, kind: TestKind) -> bool {
        self.tests.contains(&kind)
    }

    pub fn validate(&self) -> Result<()> {
        fn invalid(message: String) -> Result<()> {
            Err(CoreError::InvalidConfig(message))
        }

        if self.sector_size < 512 || !self.sector_size.is_power_of_two() {
            return invalid(format!(
                "sector_size {} must be a power of two >= 512",
                self.sector_size
            ));
        }
        if self.chunk_size == 0 || self.chunk_size % self.sector_size as usize != 0 {
            return invalid(format!(
                "chunk_size {} must be a positive multiple of sector_size {}",
                self.chunk_size, self.sector_size
            ));
        }
        if self.tests.is_empty() {
            return invalid("at least one test must be enabled".into());
        }

        let t = &self.thresholds;
        if !(0.0..=8.0).contains(&t.entropy_min) {
            return invalid(format!("entropy_min {} outside [0, 8]", t.entropy_min));
        }
        if !(t.chi_square_critical.is_finite() && t.chi_square_critical > 0.0) {
            return invalid(format!(
                "chi_square_critical {} must be positive",
                t.chi_square_critical
            ));
        }
        if !(0.0..1.0).contains(&t.compression_epsilon) {
            return invalid(format!(
                "compression_epsilon {} outside [0, 1)",
                t.compression_epsilon
            ));
        }
        if !(t.autocorrelation_max > 0.0 && t.autocorrelation_max <= 1.0) {
            return invalid(format!(
                "autocorrelation_max {} outside (0, 1]",
                t.autocorrelation_max
            ));
        }

        if !(t.signature_alpha > 0.0 && t.signature_alpha <= 1.0) {
            return invalid(format!(
                "signature_alpha {} outside (0, 1]",
                t.signature_alpha
            ));
        }
        if self.min_signature_len == 0 {
            return invalid("min_signature_len must be at least 1".into());
        }

        let s = &self.sampling;
        if s.window_size == 0 || s.window_count == 0 {
            return invalid("sampling windows must be non-empty".into());
        }
        if s.autocorrelation_block < 2 {
            return invalid("autocorrelation_block must be at least 2".into());
        }
        if s.max_lag < 2 || s.max_lag > s.autocorrelation_block {
            return invalid(format!(
                "max_lag {} must lie in [2, autocorrelation_block]",
                s.max_lag
            ));
        }

        if self.is_enabled(TestKind::Compression) {
            let mut kinds = self.compressors.clone();
            kinds.sort_by_key(|k| *k as u8);
            kinds.dedup();
            if kinds.len() < 2 {
                return invalid("compression test needs at least two distinct compressors".into());
            }
        }

        if let Some(specs) = &self.signatures {
            for spec in specs {
                match hex::decode(spec.hex.trim()) {
                    Ok(bytes) if !bytes.is_empty() => {}
                    Ok(_) => return invalid(format!("signature '{}' is empty", spec.name)),
                    Err(e) => {
                        return invalid(format!("signature '{}' is not valid hex: {e}", spec.name));
                    }
                }
            }
        }

        Ok(())
    }
}
