use crate::config::KsAlpha;
use crate::error::Result;
use crate::histogram::ByteHistogram;

pub fn entropy(histogram: &ByteHistogram) -> Result<f64> {
    let n = histogram.require_samples()? as f64;
    let mut entropy = 0.0;
    for &count in histogram.counts() {
        if count > 0 {
            let p = count as f64 / n;
            entropy -= p * p.log2();
        }
    }
    Ok(entropy.clamp(0.0, 8.0))
}

pub fn chi_square(histogram: &ByteHistogram) -> Result<f64> {
    let n = histogram.require_samples()? as f64;
    let expected = n / 256.0;
    Ok(histogram
        .counts()
        .iter()
        .map(|&observed| {
            let diff = observed as f64 - expected;
            diff * diff / expected
        })
        .sum())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KsOutcome {
    pub statistic: f64,
    pub position: u8,
    pub critical_1pct: f64,
    pub critical_5pct: f64,
}

impl KsOutcome {
    pub fn critical(&self, alpha: KsAlpha) -> f64 {
        match alpha {
            KsAlpha::OnePercent => self.critical_1pct,
            KsAlpha::FivePercent => self.critical_5pct,
        }
    }
}

pub fn ks_statistic(histogram: &ByteHistogram) -> Result<KsOutcome> {
    let n = histogram.require_samples()? as f64;

    let mut statistic = 0.0;
    let mut position = 0u8;
    for (value, &cumulative) in histogram.cumulative().iter().enumerate() {
        let empirical = cumulative as f64 / n;
        let theoretical = (value + 1) as f64 / 256.0;
        let gap = (empirical - theoretical).abs();
        if gap > statistic {
            statistic = gap;
            position = value as u8;
        }
    }

    let root_n = n.sqrt();
    Ok(KsOutcome {
        statistic,
        position,
        critical_1pct: KsAlpha::OnePercent.coefficient() / root_n,
        critical_5pct: KsAlpha::FivePercent.coefficient() / root_n,
    })
}
