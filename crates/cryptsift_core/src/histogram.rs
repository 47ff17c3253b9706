use crate::error::{CoreError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteHistogram {
    counts: [u64; 256],
    total: u64,
}

impl Default for ByteHistogram {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteHistogram {
    pub fn new() -> Self {
        Self {
            counts: [0; 256],
            total: 0,
        }
    }

    pub fn from_bytes(data: &[u8]) -> Self {
        let mut histogram = Self::new();
        histogram.feed(data);
        histogram
    }

    pub fn feed(&mut self, data: &[u8]) {
        for &byte in data {
            self.counts[byte as usize] += 1;
        }
        self.total += data.len() as u64;
    }

    pub fn merge(&mut self, other: &ByteHistogram) {
        for (mine, theirs) in self.counts.iter_mut().zip(other.counts.iter()) {
            *mine += theirs;
        }
        self.total += other.total;
    }

    #[inline]
    pub fn count(&self, value: u8) -> u64 {
        self.counts[value as usize]
    }

    #[inline]
    pub fn counts(&self) -> &[u64; 256] {
        &self.counts
    }

    #[inline]
    pub fn total(&self) -> u64 {
        self.total
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn probability(&self, value: u8) -> Result<f64> {
        let n = self.require_samples()?;
        Ok(self.count(value) as f64 / n as f64)
    }

    /// Running sums: entry `v` counts the bytes with value `<= v`.
    pub fn cumulative(&self) -> [u64; 256] {
        let mut cumulative = [0u64; 256];
        let mut running = 0;
        for (slot, count) in cumulative.iter_mut().zip(self.counts.iter()) {
            running += count;
            *slot = running;
        }
        cumulative
    }

    pub(crate) fn require_samples(&self) -> Result<u64> {
        if self.total == 0 {
            return Err(CoreError::DegenerateInput(
                "histogram has not been fed any bytes".into(),
            ));
        }
        Ok(self.total)
    }
}
