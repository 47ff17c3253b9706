use aho_corasick::AhoCorasick;
use serde::Serialize;

use crate::battery::igam;
use crate::config::SignatureSpec;
use crate::error::{CoreError, Result};

// "ID3" and "TAG" turn up in random data about once per 16 MiB; see
// `SignatureReport::overriding`.
const BUILTIN_SIGNATURES: &[(&str, &[u8])] = &[
    ("ZIP archive", b"\x50\x4b\x03\x04"),
    ("Empty ZIP archive", b"\x50\x4b\x05\x06"),
    ("Spanned ZIP archive", b"\x50\x4b\x07\x08"),
    ("RAR archive", b"\x52\x61\x72\x21\x1a\x07"),
    ("Portable Network Graphics", b"\x89\x50\x4e\x47\x0d\x0a\x1a\x0a"),
    ("JPEG quantization table", b"\xff\xd8\xff\xdb"),
    ("JPEG file start", b"\xff\xd8\xff\xe0"),
    ("JPEG Exif data", b"\xff\xd8\xff\xe1"),
    ("GIF version 87a", b"GIF87a"),
    ("GIF version 89a", b"GIF89a"),
    ("Portable Document Format", b"%PDF-"),
    ("Microsoft WAVE/BWF", b"WAVE"),
    ("Audio-Video Interleave container", b"AVI "),
    ("Generic RIFF file", b"RIFF"),
    ("MP3 ID3v2 tag", b"ID3"),
    ("MP3 ID3v1 tag", b"TAG"),
    ("OGG file", b"OggS"),
    ("Free Lossless Audio Codec", b"fLaC"),
    ("MIDI track", b"MThd"),
    ("TAR archive", b"ustar"),
    ("MPEG-4 mdat atom", b"mdat"),
    ("MPEG-4 ftyp atom", b"ftyp"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub name: String,
    pub pattern: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct SignatureSet {
    signatures: Vec<Signature>,
    matcher: AhoCorasick,
    max_len: usize,
}

impl SignatureSet {
    pub fn new(signatures: Vec<Signature>) -> Result<Self> {
        if let Some(empty) = signatures.iter().find(|s| s.pattern.is_empty()) {
            return Err(CoreError::InvalidConfig(format!(
                "signature '{}' has an empty pattern",
                empty.name
            )));
        }
        let matcher = AhoCorasick::new(signatures.iter().map(|s| &s.pattern))
            .map_err(|e| CoreError::InvalidConfig(format!("cannot build signature matcher: {e}")))?;
        let max_len = signatures.iter().map(|s| s.pattern.len()).max().unwrap_or(0);

        Ok(Self {
            signatures,
            matcher,
            max_len,
        })
    }

    pub fn builtin() -> Result<Self> {
        Self::new(
            BUILTIN_SIGNATURES
                .iter()
                .map(|(name, pattern)| Signature {
                    name: (*name).to_string(),
                    pattern: pattern.to_vec(),
                })
                .collect(),
        )
    }

    pub fn from_config(specs: Option<&[SignatureSpec]>) -> Result<Self> {
        let Some(specs) = specs else {
            return Self::builtin();
        };
        let signatures = specs
            .iter()
            .map(|spec| {
                let pattern = hex::decode(spec.hex.trim()).map_err(|e| {
                    CoreError::InvalidConfig(format!("signature '{}': {e}", spec.name))
                })?;
                Ok(Signature {
                    name: spec.name.clone(),
                    pattern,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(signatures)
    }

    #[inline]
    pub fn signatures(&self) -> &[Signature] {
        &self.signatures
    }

    #[inline]
    pub fn max_len(&self) -> usize {
        self.max_len
    }

    pub fn scanner(&self, max_recorded_offsets: usize) -> SignatureScanner<'_> {
        SignatureScanner::new(self, max_recorded_offsets)
    }
}

pub struct SignatureScanner<'a> {
    set: &'a SignatureSet,
    carry: Vec<u8>,
    position: u64,
    counts: Vec<u64>,
    offsets: Vec<Vec<u64>>,
    max_recorded_offsets: usize,
}

impl<'a> SignatureScanner<'a> {
    pub fn new(set: &'a SignatureSet, max_recorded_offsets: usize) -> Self {
        let n = set.signatures.len();
        Self {
            set,
            carry: Vec::with_capacity(set.max_len.saturating_sub(1)),
            position: 0,
            counts: vec![0; n],
            offsets: vec![Vec::new(); n],
            max_recorded_offsets,
        }
    }

    pub fn feed(&mut self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }
        let keep = self.set.max_len.saturating_sub(1);
        let carry_len = self.carry.len();

        // Matches straddling the previous boundary: they start in the carry
        // and end past it. Ones wholly inside the carry were already counted.
        if carry_len > 0 {
            let mut seam = self.carry.clone();
            seam.extend_from_slice(&chunk[..keep.min(chunk.len())]);
            let base = self.position - carry_len as u64;
            for m in self.set.matcher.find_overlapping_iter(&seam) {
                if m.start() < carry_len && m.end() > carry_len {
                    self.record(m.pattern().as_usize(), base + m.start() as u64);
                }
            }
        }

        for m in self.set.matcher.find_overlapping_iter(chunk) {
            self.record(m.pattern().as_usize(), self.position + m.start() as u64);
        }

        if chunk.len() >= keep {
            self.carry.clear();
            self.carry.extend_from_slice(&chunk[chunk.len() - keep..]);
        } else {
            self.carry.extend_from_slice(chunk);
            let excess = self.carry.len().saturating_sub(keep);
            self.carry.drain(..excess);
        }
        self.position += chunk.len() as u64;
    }

    fn record(&mut self, index: usize, offset: u64) {
        self.counts[index] += 1;
        if self.offsets[index].len() < self.max_recorded_offsets {
            self.offsets[index].push(offset);
        }
    }

    pub fn finish(self) -> SignatureReport {
        let matches = self
            .set
            .signatures
            .iter()
            .zip(self.counts)
            .zip(self.offsets)
            .map(|((signature, count), mut offsets)| {
                offsets.sort_unstable();
                SignatureMatches {
                    name: signature.name.clone(),
                    pattern_len: signature.pattern.len(),
                    count,
                    offsets,
                }
            })
            .collect();
        SignatureReport {
            matches,
            bytes_scanned: self.position,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignatureMatches {
    pub name: String,
    pub pattern_len: usize,
    pub count: u64,
    /// First recorded match offsets, ascending; capped by configuration.
    pub offsets: Vec<u64>,
}

impl SignatureMatches {
    pub fn expected_by_chance(&self, bytes_scanned: u64) -> f64 {
        let positions = (bytes_scanned + 1).saturating_sub(self.pattern_len as u64);
        positions as f64 * 256f64.powi(-(self.pattern_len as i32))
    }

    pub fn chance_probability(&self, bytes_scanned: u64) -> f64 {
        if self.count == 0 {
            return 1.0;
        }
        igam(self.count as f64, self.expected_by_chance(bytes_scanned))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SignatureReport {
    pub matches: Vec<SignatureMatches>,
    pub bytes_scanned: u64,
}

impl SignatureReport {
    pub fn total_matches(&self) -> u64 {
        self.matches.iter().map(|m| m.count).sum()
    }

    pub fn count(&self, name: &str) -> Option<u64> {
        self.matches.iter().find(|m| m.name == name).map(|m| m.count)
    }

    pub fn found(&self) -> impl Iterator<Item = &SignatureMatches> {
        self.matches.iter().filter(|m| m.count > 0)
    }

    /// Matches strong enough to rule out encryption: the pattern is at least
    /// `min_len` bytes and chance explains the count with probability below
    /// `alpha`. An `alpha` of 1 accepts every match.
    pub fn overriding(&self, min_len: usize, alpha: f64) -> impl Iterator<Item = &SignatureMatches> {
        self.found().filter(move |m| {
            m.pattern_len >= min_len
                && (alpha >= 1.0 || m.chance_probability(self.bytes_scanned) < alpha)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG: &[u8] = b"\x89\x50\x4e\x47\x0d\x0a\x1a\x0a";

    fn scan(set: &SignatureSet, data: &[u8], chunk: usize) -> SignatureReport {
        let mut scanner = set.scanner(64);
        for piece in data.chunks(chunk.max(1)) {
            scanner.feed(piece);
        }
        scanner.finish()
    }

    #[test]
    fn test_png_at_offset_100() {
        let set = SignatureSet::builtin().unwrap();
        let mut data = vec![0u8; 4096];
        data[100..108].copy_from_slice(PNG);

        let report = scan(&set, &data, 4096);
        let png = report
            .matches
            .iter()
            .find(|m| m.name == "Portable Network Graphics")
            .unwrap();
        assert_eq!(png.count, 1);
        assert_eq!(png.offsets, vec![100]);
        assert_eq!(report.total_matches(), 1);
        assert_eq!(report.found().count(), 1);
    }

    #[test]
    fn test_match_straddling_every_boundary_found_once() {
        let set = SignatureSet::builtin().unwrap();
        let mut data = vec![0u8; 300];
        data[61..69].copy_from_slice(PNG);

        for chunk in 1..=70 {
            let report = scan(&set, &data, chunk);
            assert_eq!(
                report.count("Portable Network Graphics"),
                Some(1),
                "chunk size {chunk}"
            );
            assert_eq!(report.matches[4].offsets, vec![61], "chunk size {chunk}");
            assert_eq!(report.total_matches(), 1, "chunk size {chunk}");
        }
    }

    #[test]
    fn test_overlapping_matches_counted() {
        let set = SignatureSet::new(vec![Signature {
            name: "aa".into(),
            pattern: b"aa".to_vec(),
        }])
        .unwrap();
        let report = scan(&set, b"aaaa", 3);
        assert_eq!(report.count("aa"), Some(3));
        assert_eq!(report.matches[0].offsets, vec![0, 1, 2]);
    }

    #[test]
    fn test_nested_signatures_both_reported() {
        // "RIFF....WAVE" carries two signatures.
        let set = SignatureSet::builtin().unwrap();
        let report = scan(&set, b"RIFF\x24\x08\x00\x00WAVEfmt ", 5);
        assert_eq!(report.count("Generic RIFF file"), Some(1));
        assert_eq!(report.count("Microsoft WAVE/BWF"), Some(1));
    }

    #[test]
    fn test_recorded_offsets_are_capped() {
        let set = SignatureSet::from_config(Some(&[SignatureSpec {
            name: "ff".into(),
            hex: "ff".into(),
        }]))
        .unwrap();
        let mut scanner = set.scanner(4);
        scanner.feed(&[0xff; 10]);
        let report = scanner.finish();
        assert_eq!(report.matches[0].count, 10);
        assert_eq!(report.matches[0].offsets, vec![0, 1, 2, 3]);
    }

    fn matches(pattern_len: usize, count: u64) -> SignatureMatches {
        SignatureMatches {
            name: "m".into(),
            pattern_len,
            count,
            offsets: Vec::new(),
        }
    }

    #[test]
    fn test_expected_by_chance() {
        // A 3-byte pattern has 2^24 - 2 candidate positions in 16 MiB.
        let m = matches(3, 1);
        let expected = m.expected_by_chance(1 << 24);
        assert!((expected - 1.0).abs() < 1e-6, "{expected}");
        assert_eq!(matches(8, 1).expected_by_chance(4), 0.0);
    }

    #[test]
    fn test_chance_probability_follows_poisson_tail() {
        let m = matches(3, 1);
        let lambda = m.expected_by_chance(1 << 20);
        assert!((m.chance_probability(1 << 20) - (1.0 - (-lambda).exp())).abs() < 1e-12);
        assert_eq!(matches(3, 0).chance_probability(1 << 20), 1.0);
    }

    #[test]
    fn test_overriding_filters_short_and_chance_matches() {
        let report = SignatureReport {
            matches: vec![matches(3, 2), matches(4, 1), matches(8, 1), matches(5, 0)],
            bytes_scanned: 64 << 20,
        };
        let lens = |min_len, alpha| -> Vec<usize> {
            report
                .overriding(min_len, alpha)
                .map(|m| m.pattern_len)
                .collect()
        };
        // One 4-byte hit in 64 MiB happens by chance ~1.6% of the time.
        assert_eq!(lens(4, 1e-4), vec![8]);
        assert_eq!(lens(4, 1.0), vec![4, 8]);
        assert_eq!(lens(3, 1.0), vec![3, 4, 8]);
        assert_eq!(lens(3, 0.05), vec![4, 8]);
    }

    #[test]
    fn test_report_records_scanned_length_and_pattern_len() {
        let set = SignatureSet::builtin().unwrap();
        let mut data = vec![0u8; 4096];
        data[100..108].copy_from_slice(PNG);
        let report = scan(&set, &data, 1000);
        assert_eq!(report.bytes_scanned, 4096);
        let png = report.found().next().unwrap();
        assert_eq!(png.pattern_len, 8);
        assert_eq!(report.overriding(4, 1e-4).count(), 1);
    }

    #[test]
    fn test_config_rejects_empty_pattern() {
        let result = SignatureSet::from_config(Some(&[SignatureSpec {
            name: "nothing".into(),
            hex: "".into(),
        }]));
        assert!(matches!(result, Err(CoreError::InvalidConfig(_))));
    }
}
