mod autocorrelation;
mod compression;
mod distribution;

pub use autocorrelation::{AutocorrelationOutcome, autocorrelation, block_autocorrelation};
pub use compression::{
    Bzip2Compressor, CompressionOutcome, GzipCompressor, XzCompressor, ZlibCompressor,
    ZstdCompressor, build_compressors, compression_ratio,
};
pub use distribution::{KsOutcome, chi_square, entropy, ks_statistic};

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::battery::BitSequence;
use crate::config::AnalysisConfig;
use crate::error::{CoreError, Result};
use crate::histogram::ByteHistogram;
use crate::sampling::Sample;
use crate::signatures::SignatureReport;
use crate::traits::{Compressor, RandomnessBattery};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestKind {
    Entropy,
    ChiSquare,
    KolmogorovSmirnov,
    Compression,
    Autocorrelation,
    Battery,
    Signatures,
}

impl TestKind {
    pub const ALL: [TestKind; 7] = [
        TestKind::Entropy,
        TestKind::ChiSquare,
        TestKind::KolmogorovSmirnov,
        TestKind::Compression,
        TestKind::Autocorrelation,
        TestKind::Battery,
        TestKind::Signatures,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TestKind::Entropy => "entropy",
            TestKind::ChiSquare => "chi_square",
            TestKind::KolmogorovSmirnov => "kolmogorov_smirnov",
            TestKind::Compression => "compression",
            TestKind::Autocorrelation => "autocorrelation",
            TestKind::Battery => "battery",
            TestKind::Signatures => "signatures",
        }
    }
}

impl fmt::Display for TestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "encrypted", rename_all = "snake_case")]
pub enum TestVerdict {
    Vote(bool),
    Override,
    Abstain,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestResult {
    pub kind: TestKind,
    pub statistic: f64,
    pub verdict: TestVerdict,
    pub metadata: BTreeMap<String, Value>,
}

impl TestResult {
    pub fn new(kind: TestKind, statistic: f64, verdict: TestVerdict) -> Self {
        Self {
            kind,
            statistic,
            verdict,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedTest {
    pub kind: TestKind,
    pub reason: String,
}

pub struct Evidence<'a> {
    pub histogram: &'a ByteHistogram,
    pub sample: &'a Sample,
    pub signatures: &'a SignatureReport,
}

pub struct TestSuite<'a> {
    config: &'a AnalysisConfig,
    compressors: &'a [Box<dyn Compressor>],
    battery: &'a dyn RandomnessBattery,
}

impl<'a> TestSuite<'a> {
    pub fn new(
        config: &'a AnalysisConfig,
        compressors: &'a [Box<dyn Compressor>],
        battery: &'a dyn RandomnessBattery,
    ) -> Self {
        Self {
            config,
            compressors,
            battery,
        }
    }

    pub fn run(&self, evidence: &Evidence<'_>) -> (Vec<TestResult>, Vec<SkippedTest>) {
        let mut results = Vec::with_capacity(self.config.tests.len());
        let mut skipped = Vec::new();

        for &kind in &self.config.tests {
            match self.run_one(kind, evidence) {
                Ok(result) => {
                    debug!(test = %kind, statistic = result.statistic, verdict = ?result.verdict, "test finished");
                    results.push(result);
                }
                Err(e) => {
                    warn!(test = %kind, reason = %e, "test skipped");
                    skipped.push(SkippedTest {
                        kind,
                        reason: e.to_string(),
                    });
                }
            }
        }

        (results, skipped)
    }

    fn run_one(&self, kind: TestKind, evidence: &Evidence<'_>) -> Result<TestResult> {
        let thresholds = &self.config.thresholds;
        let sampling = &self.config.sampling;

        match kind {
            TestKind::Entropy => {
                let value = entropy(evidence.histogram)?;
                Ok(
                    TestResult::new(kind, value, TestVerdict::Vote(value >= thresholds.entropy_min))
                        .with("threshold", thresholds.entropy_min),
                )
            }
            TestKind::ChiSquare => {
                let value = chi_square(evidence.histogram)?;
                let critical = thresholds.chi_square_critical;
                Ok(TestResult::new(kind, value, TestVerdict::Vote(value <= critical))
                    .with("critical_value", critical)
                    .with("degrees_of_freedom", 255))
            }
            TestKind::KolmogorovSmirnov => {
                let ks = ks_statistic(evidence.histogram)?;
                let critical = ks.critical(thresholds.ks_alpha);
                Ok(TestResult::new(kind, ks.statistic, TestVerdict::Vote(ks.statistic <= critical))
                    .with("position", ks.position)
                    .with("critical_value", critical)
                    .with("critical_1pct", ks.critical_1pct)
                    .with("critical_5pct", ks.critical_5pct))
            }
            TestKind::Compression => {
                let outcome = compression_ratio(evidence.sample.windows(), self.compressors)?;
                let floor = 1.0 - thresholds.compression_epsilon;
                let per_compressor: BTreeMap<String, f64> =
                    outcome.per_compressor.iter().cloned().collect();
                Ok(TestResult::new(kind, outcome.ratio, TestVerdict::Vote(outcome.ratio >= floor))
                    .with("threshold", floor)
                    .with("sampled_bytes", outcome.sampled_bytes)
                    .with("per_compressor", json!(per_compressor)))
            }
            TestKind::Autocorrelation => {
                let outcome = autocorrelation(
                    evidence.sample.windows(),
                    sampling.autocorrelation_block,
                    sampling.max_lag,
                )?;
                Ok(TestResult::new(
                    kind,
                    outcome.mean,
                    TestVerdict::Vote(outcome.mean < thresholds.autocorrelation_max),
                )
                .with("threshold", thresholds.autocorrelation_max)
                .with("blocks_used", outcome.blocks_used)
                .with("blocks_excluded", outcome.blocks_excluded))
            }
            TestKind::Battery => self.run_battery(evidence.sample),
            TestKind::Signatures => {
                let report = evidence.signatures;
                let min_len = self.config.min_signature_len;
                let overriding: Vec<&str> = report
                    .overriding(min_len, thresholds.signature_alpha)
                    .map(|m| m.name.as_str())
                    .collect();
                let verdict = if overriding.is_empty() {
                    TestVerdict::Abstain
                } else {
                    TestVerdict::Override
                };
                let found: BTreeMap<&str, Value> = report
                    .found()
                    .map(|m| {
                        let expected = m.expected_by_chance(report.bytes_scanned);
                        let entry = json!({
                            "count": m.count,
                            "offsets": m.offsets,
                            "expected_by_chance": expected,
                        });
                        (m.name.as_str(), entry)
                    })
                    .collect();
                Ok(TestResult::new(kind, report.total_matches() as f64, verdict)
                    .with("matches", json!(found))
                    .with("overriding", json!(overriding))
                    .with("min_length", min_len)
                    .with("alpha", thresholds.signature_alpha))
            }
        }
    }

    fn run_battery(&self, sample: &Sample) -> Result<TestResult> {
        let bytes = sample.prefix(self.config.sampling.battery_max_bytes);
        let outcomes = self.battery.run(&BitSequence::new(&bytes))?;
        if outcomes.is_empty() {
            return Err(CoreError::DegenerateInput(format!(
                "{} ran no tests on {} bits",
                self.battery.name(),
                bytes.len() * 8
            )));
        }

        let passed = outcomes.values().filter(|passed| **passed).count();
        let failed = outcomes.len() - passed;
        Ok(TestResult::new(
            TestKind::Battery,
            passed as f64 / outcomes.len() as f64,
            TestVerdict::Vote(passed > failed),
        )
        .with("battery", self.battery.name())
        .with("bits", bytes.len() * 8)
        .with("tests", json!(outcomes)))
    }
}
