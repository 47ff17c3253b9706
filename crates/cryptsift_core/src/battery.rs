use std::collections::BTreeMap;

use crate::error::Result;
use crate::traits::RandomnessBattery;

pub const ALPHA: f64 = 0.01;
const MIN_BITS: usize = 100;
const BLOCK_FREQUENCY_M: usize = 128;
const MIN_EXCURSION_CYCLES: usize = 500;
const MIN_LONGEST_RUN_BITS: usize = 128;
const MAX_SERIAL_M: usize = 16;
const MAX_APEN_M: usize = 10;

struct LongestRunTable {
    block: usize,
    min_class: usize,
    probabilities: &'static [f64],
}

static LONGEST_RUN_TABLES: [LongestRunTable; 3] = [
    LongestRunTable {
        block: 8,
        min_class: 1,
        probabilities: &[0.21484375, 0.3671875, 0.23046875, 0.1875],
    },
    LongestRunTable {
        block: 128,
        min_class: 4,
        probabilities: &[
            0.1174035788,
            0.242955959,
            0.249363483,
            0.17517706,
            0.102701071,
            0.112398847,
        ],
    },
    LongestRunTable {
        block: 10_000,
        min_class: 10,
        probabilities: &[0.0882, 0.2092, 0.2483, 0.1933, 0.1208, 0.0675, 0.0727],
    },
];

/// A byte buffer viewed as bits, most significant bit of each byte first.
#[derive(Debug, Clone, Copy)]
pub struct BitSequence<'a> {
    bytes: &'a [u8],
}

impl<'a> BitSequence<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len() * 8
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[inline]
    pub fn bit(&self, index: usize) -> u8 {
        (self.bytes[index / 8] >> (7 - index % 8)) & 1
    }

    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        self.bytes
            .iter()
            .flat_map(|&byte| (0..8).rev().map(move |shift| (byte >> shift) & 1))
    }

    pub fn to_bits(&self) -> Vec<u8> {
        self.iter().collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FrequencyBattery;

impl RandomnessBattery for FrequencyBattery {
    fn name(&self) -> &str {
        "frequency"
    }

    fn run(&self, bits: &BitSequence<'_>) -> Result<BTreeMap<String, bool>> {
        let mut outcomes = BTreeMap::new();
        if bits.len() < MIN_BITS {
            return Ok(outcomes);
        }
        let bits = bits.to_bits();
        let mut record = |name: &str, p_value: f64| {
            outcomes.insert(name.to_string(), p_value >= ALPHA);
        };

        record("monobit", monobit(&bits));
        if let Some(p) = block_frequency(&bits, BLOCK_FREQUENCY_M) {
            record("block_frequency", p);
        }
        record("runs", runs(&bits));
        record("cumulative_sums_forward", cumulative_sums(&bits, false));
        record("cumulative_sums_backward", cumulative_sums(&bits, true));
        if let Some(p) = longest_run_of_ones(&bits) {
            record("longest_run", p);
        }

        let log2_n = bits.len().ilog2() as usize;
        if let Some((p1, p2)) = serial(&bits, log2_n.saturating_sub(3).min(MAX_SERIAL_M)) {
            outcomes.insert("serial".into(), p1 >= ALPHA && p2 >= ALPHA);
        }
        let apen_m = log2_n.saturating_sub(7).min(MAX_APEN_M);
        if let Some(p) = approximate_entropy(&bits, apen_m).filter(|_| apen_m >= 2) {
            outcomes.insert("approximate_entropy".into(), p >= ALPHA);
        }

        // Excursion verdicts pass only if every state passes.
        if let Some(p_values) = random_excursions(&bits) {
            outcomes.insert(
                "random_excursions".into(),
                p_values.iter().all(|p| *p >= ALPHA),
            );
        }
        if let Some(p_values) = random_excursions_variant(&bits) {
            outcomes.insert(
                "random_excursions_variant".into(),
                p_values.iter().all(|p| *p >= ALPHA),
            );
        }

        Ok(outcomes)
    }
}

pub fn monobit(bits: &[u8]) -> f64 {
    let n = bits.len() as f64;
    let sum: i64 = bits.iter().map(|&b| 2 * i64::from(b) - 1).sum();
    let s_obs = (sum.abs() as f64) / n.sqrt();
    libm::erfc(s_obs / std::f64::consts::SQRT_2)
}

pub fn block_frequency(bits: &[u8], m: usize) -> Option<f64> {
    let blocks = bits.len() / m;
    if blocks == 0 {
        return None;
    }
    let chi: f64 = bits
        .chunks_exact(m)
        .map(|block| {
            let ones = block.iter().filter(|&&b| b == 1).count();
            let pi = ones as f64 / m as f64 - 0.5;
            pi * pi
        })
        .sum::<f64>()
        * 4.0
        * m as f64;
    Some(igamc(blocks as f64 / 2.0, chi / 2.0))
}

pub fn runs(bits: &[u8]) -> f64 {
    let n = bits.len() as f64;
    let pi = bits.iter().filter(|&&b| b == 1).count() as f64 / n;
    if (pi - 0.5).abs() >= 2.0 / n.sqrt() {
        return 0.0;
    }
    let v_obs = 1 + bits.windows(2).filter(|pair| pair[0] != pair[1]).count();
    let expected = 2.0 * n * pi * (1.0 - pi);
    libm::erfc((v_obs as f64 - expected).abs() / (2.0 * (2.0 * n).sqrt() * pi * (1.0 - pi)))
}

pub fn cumulative_sums(bits: &[u8], backward: bool) -> f64 {
    let n = bits.len() as f64;
    let mut sum = 0i64;
    let mut z = 0i64;
    let mut step = |b: u8| {
        sum += 2 * i64::from(b) - 1;
        z = z.max(sum.abs());
    };
    if backward {
        bits.iter().rev().for_each(|&b| step(b));
    } else {
        bits.iter().for_each(|&b| step(b));
    }

    let z = z as f64;
    let root_n = n.sqrt();
    let upper = ((n / z - 1.0) / 4.0).floor() as i64;

    let mut first = 0.0;
    for k in ((-n / z + 1.0) / 4.0).floor() as i64..=upper {
        let k = k as f64;
        first += normal_cdf((4.0 * k + 1.0) * z / root_n) - normal_cdf((4.0 * k - 1.0) * z / root_n);
    }
    let mut second = 0.0;
    for k in ((-n / z - 3.0) / 4.0).floor() as i64..=upper {
        let k = k as f64;
        second +=
            normal_cdf((4.0 * k + 3.0) * z / root_n) - normal_cdf((4.0 * k + 1.0) * z / root_n);
    }

    (1.0 - first + second).clamp(0.0, 1.0)
}

pub fn longest_run_of_ones(bits: &[u8]) -> Option<f64> {
    let n = bits.len();
    if n < MIN_LONGEST_RUN_BITS {
        return None;
    }
    let table = match n {
        0..6272 => &LONGEST_RUN_TABLES[0],
        6272..750_000 => &LONGEST_RUN_TABLES[1],
        _ => &LONGEST_RUN_TABLES[2],
    };
    let classes = table.probabilities.len();
    let mut counts = vec![0u64; classes];
    for block in bits.chunks_exact(table.block) {
        let mut run = 0usize;
        let mut longest = 0usize;
        for &b in block {
            run = if b == 1 { run + 1 } else { 0 };
            longest = longest.max(run);
        }
        let class = longest.saturating_sub(table.min_class).min(classes - 1);
        counts[class] += 1;
    }

    let blocks = (n / table.block) as f64;
    let chi: f64 = counts
        .iter()
        .zip(table.probabilities)
        .map(|(&observed, &p)| {
            let expected = blocks * p;
            (observed as f64 - expected).powi(2) / expected
        })
        .sum();
    Some(igamc((classes - 1) as f64 / 2.0, chi / 2.0))
}

fn pattern_counts(bits: &[u8], m: usize) -> Vec<u64> {
    let mask = (1usize << m) - 1;
    let mut counts = vec![0u64; 1 << m];
    let mut window = 0usize;
    for (i, &b) in bits.iter().chain(bits.iter().take(m - 1)).enumerate() {
        window = ((window << 1) | usize::from(b)) & mask;
        if i + 1 >= m {
            counts[window] += 1;
        }
    }
    counts
}

fn psi_squared(bits: &[u8], m: usize) -> f64 {
    if m == 0 {
        return 0.0;
    }
    let n = bits.len() as f64;
    let sum: f64 = pattern_counts(bits, m).iter().map(|&c| (c * c) as f64).sum();
    (1u64 << m) as f64 / n * sum - n
}

pub fn serial(bits: &[u8], m: usize) -> Option<(f64, f64)> {
    if m < 2 || m >= bits.len() {
        return None;
    }
    let psi_m = psi_squared(bits, m);
    let psi_m1 = psi_squared(bits, m - 1);
    let psi_m2 = psi_squared(bits, m - 2);
    let delta = psi_m - psi_m1;
    let delta2 = psi_m - 2.0 * psi_m1 + psi_m2;
    let p1 = igamc(2f64.powi(m as i32 - 2), delta / 2.0);
    let p2 = igamc(2f64.powi(m as i32 - 3), delta2 / 2.0);
    Some((p1, p2))
}

fn phi(bits: &[u8], m: usize) -> f64 {
    let n = bits.len() as f64;
    pattern_counts(bits, m)
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / n;
            p * p.ln()
        })
        .sum()
}

pub fn approximate_entropy(bits: &[u8], m: usize) -> Option<f64> {
    if m == 0 || m + 1 >= bits.len() {
        return None;
    }
    let n = bits.len() as f64;
    let apen = phi(bits, m) - phi(bits, m + 1);
    let chi = 2.0 * n * (std::f64::consts::LN_2 - apen);
    Some(igamc(2f64.powi(m as i32 - 1), chi / 2.0))
}

fn excursion_cycles(bits: &[u8]) -> Vec<[u32; 19]> {
    let mut cycles = Vec::new();
    let mut current = [0u32; 19];
    let mut walk = 0i64;
    for &b in bits {
        walk += 2 * i64::from(b) - 1;
        if walk == 0 {
            cycles.push(current);
            current = [0; 19];
        } else if walk.abs() <= 9 {
            current[(walk + 9) as usize] += 1;
        }
    }
    if walk != 0 {
        cycles.push(current);
    }
    cycles
}

pub fn random_excursions(bits: &[u8]) -> Option<Vec<f64>> {
    let cycles = excursion_cycles(bits);
    let j = cycles.len();
    if j < MIN_EXCURSION_CYCLES {
        return None;
    }
    let j = j as f64;

    let states = [-4i64, -3, -2, -1, 1, 2, 3, 4];
    let p_values = states
        .iter()
        .map(|&x| {
            let mut nu = [0f64; 6];
            for cycle in &cycles {
                let visits = cycle[(x + 9) as usize].min(5) as usize;
                nu[visits] += 1.0;
            }
            let ax = x.abs() as f64;
            let q = 1.0 - 1.0 / (2.0 * ax);
            let mut pi = [0f64; 6];
            pi[0] = q;
            for (k, slot) in pi.iter_mut().enumerate().take(5).skip(1) {
                *slot = 1.0 / (4.0 * ax * ax) * q.powi(k as i32 - 1);
            }
            pi[5] = 1.0 / (2.0 * ax) * q.powi(4);

            let chi: f64 = nu
                .iter()
                .zip(pi.iter())
                .map(|(observed, p)| {
                    let expected = j * p;
                    (observed - expected).powi(2) / expected
                })
                .sum();
            igamc(2.5, chi / 2.0)
        })
        .collect();
    Some(p_values)
}

pub fn random_excursions_variant(bits: &[u8]) -> Option<Vec<f64>> {
    let cycles = excursion_cycles(bits);
    let j = cycles.len();
    if j < MIN_EXCURSION_CYCLES {
        return None;
    }
    let j = j as f64;

    let p_values = (-9i64..=9)
        .filter(|x| *x != 0)
        .map(|x| {
            let total: f64 = cycles.iter().map(|c| f64::from(c[(x + 9) as usize])).sum();
            let denominator = (2.0 * j * (4.0 * x.abs() as f64 - 2.0)).sqrt();
            libm::erfc((total - j).abs() / denominator)
        })
        .collect();
    Some(p_values)
}

fn normal_cdf(x: f64) -> f64 {
    0.5 * libm::erfc(-x / std::f64::consts::SQRT_2)
}

/// Upper regularized incomplete gamma function `Q(a, x)`.
pub fn igamc(a: f64, x: f64) -> f64 {
    if x <= 0.0 || a <= 0.0 {
        return 1.0;
    }
    if x < a + 1.0 {
        (1.0 - gamma_series(a, x)).clamp(0.0, 1.0)
    } else {
        gamma_continued_fraction(a, x).clamp(0.0, 1.0)
    }
}

/// Lower regularized incomplete gamma function `P(a, x)`.
pub fn igam(a: f64, x: f64) -> f64 {
    if x <= 0.0 || a <= 0.0 {
        return 0.0;
    }
    if x < a + 1.0 {
        gamma_series(a, x).clamp(0.0, 1.0)
    } else {
        (1.0 - gamma_continued_fraction(a, x)).clamp(0.0, 1.0)
    }
}

const GAMMA_EPS: f64 = 1e-15;
const GAMMA_FPMIN: f64 = 1e-300;
const GAMMA_MAX_ITER: usize = 100_000;

fn gamma_prefactor(a: f64, x: f64) -> f64 {
    (-x + a * x.ln() - libm::lgamma(a)).exp()
}

fn gamma_series(a: f64, x: f64) -> f64 {
    let mut ap = a;
    let mut sum = 1.0 / a;
    let mut term = sum;
    for _ in 0..GAMMA_MAX_ITER {
        ap += 1.0;
        term *= x / ap;
        sum += term;
        if term.abs() < sum.abs() * GAMMA_EPS {
            break;
        }
    }
    sum * gamma_prefactor(a, x)
}

// Modified Lentz evaluation.
fn gamma_continued_fraction(a: f64, x: f64) -> f64 {
    let mut b = x + 1.0 - a;
    let mut c = 1.0 / GAMMA_FPMIN;
    let mut d = 1.0 / b;
    let mut h = d;
    for i in 1..GAMMA_MAX_ITER {
        let i = i as f64;
        let an = -i * (i - a);
        b += 2.0;
        d = an * d + b;
        if d.abs() < GAMMA_FPMIN {
            d = GAMMA_FPMIN;
        }
        c = b + an / c;
        if c.abs() < GAMMA_FPMIN {
            c = GAMMA_FPMIN;
        }
        d = 1.0 / d;
        let delta = d * c;
        h *= delta;
        if (delta - 1.0).abs() < GAMMA_EPS {
            break;
        }
    }
    gamma_prefactor(a, x) * h
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reference sequence from NIST SP 800-22 rev 1a, sections 2.1.8 onwards.
    const NIST_EPSILON: &str = "1100100100001111110110101010001000100001011010001100001000110100110001001100011001100010100010111000";

    fn epsilon() -> Vec<u8> {
        NIST_EPSILON.bytes().map(|c| c - b'0').collect()
    }

    fn close(actual: f64, expected: f64) -> bool {
        (actual - expected).abs() < 1e-6
    }

    #[test]
    fn test_nist_reference_p_values() {
        let bits = epsilon();
        assert!(close(monobit(&bits), 0.109599));
        assert!(close(block_frequency(&bits, 10).unwrap(), 0.706438));
        assert!(close(runs(&bits), 0.500798));
        assert!(close(cumulative_sums(&bits, false), 0.219194));
        assert!(close(cumulative_sums(&bits, true), 0.114866));
    }

    #[test]
    fn test_longest_run_reference() {
        // NIST SP 800-22 section 2.4.8: class counts 4, 9, 3, 0.
        let bits: Vec<u8> = "11001100000101010110110001001100111000000000001001001101010100010001001111010110100000001101011111001100111001101101100010110010"
            .bytes()
            .map(|c| c - b'0')
            .collect();
        assert!(close(longest_run_of_ones(&bits).unwrap(), 0.180609));
        assert!(longest_run_of_ones(&bits[..127]).is_none());
    }

    #[test]
    fn test_serial_reference() {
        // Section 2.11.4, m = 3.
        let bits: Vec<u8> = "0011011101".bytes().map(|c| c - b'0').collect();
        let (p1, p2) = serial(&bits, 3).unwrap();
        assert!(close(p1, 0.808792));
        assert!(close(p2, 0.670320));
        assert!(serial(&bits, 1).is_none());
    }

    #[test]
    fn test_approximate_entropy_reference() {
        // Section 2.12.4, m = 3.
        let bits: Vec<u8> = "0100110101".bytes().map(|c| c - b'0').collect();
        assert!(close(approximate_entropy(&bits, 3).unwrap(), 0.261961));
        // Section 2.12.8, m = 2.
        assert!(close(approximate_entropy(&epsilon(), 2).unwrap(), 0.235301));
    }

    #[test]
    fn test_igamc_large_shape() {
        // Serial test at m = 16 evaluates Q(16384, x) near x = a.
        let q = igamc(16384.0, 16384.0);
        assert!((q - 0.49896).abs() < 1e-4, "{q}");
    }

    #[test]
    fn test_igamc_known_values() {
        // Q(1, x) = exp(-x)
        assert!((igamc(1.0, 2.0) - (-2.0f64).exp()).abs() < 1e-12);
        assert!((igamc(1.0, 0.5) - (-0.5f64).exp()).abs() < 1e-12);
        assert_eq!(igamc(3.0, 0.0), 1.0);
        assert!((igam(1.0, 0.01) - (1.0 - (-0.01f64).exp())).abs() < 1e-15);
        assert!((igam(2.5, 4.0) + igamc(2.5, 4.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_bits_are_msb_first() {
        let bytes = [0b1000_0001u8, 0x0F];
        let seq = BitSequence::new(&bytes);
        assert_eq!(seq.len(), 16);
        assert_eq!(seq.to_bits(), vec![1, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 0, 1, 1, 1, 1]);
        assert_eq!(seq.bit(0), 1);
        assert_eq!(seq.bit(12), 1);
    }

    #[test]
    fn test_constant_input_fails_everything() {
        let zeros = [0u8; 512];
        let outcomes = FrequencyBattery.run(&BitSequence::new(&zeros)).unwrap();
        for name in ["longest_run", "serial", "approximate_entropy"] {
            assert!(outcomes.contains_key(name), "{name} did not run");
        }
        assert!(outcomes.values().all(|passed| !passed), "{outcomes:?}");
    }

    #[test]
    fn test_alternating_bits_fail_runs() {
        let pattern = [0x55u8; 512];
        let outcomes = FrequencyBattery.run(&BitSequence::new(&pattern)).unwrap();
        assert!(outcomes["monobit"]);
        assert!(outcomes["block_frequency"]);
        assert!(!outcomes["runs"]);
    }

    #[test]
    fn test_short_input_runs_nothing() {
        let outcomes = FrequencyBattery.run(&BitSequence::new(&[0xA5; 12])).unwrap();
        assert!(outcomes.is_empty());
    }

    #[test]
    fn test_excursions_need_enough_cycles() {
        assert!(random_excursions(&epsilon()).is_none());
        assert!(random_excursions_variant(&epsilon()).is_none());

        // 0101... returns to zero every two steps.
        let alternating: Vec<u8> = (0..2000).map(|i| (i % 2) as u8).collect();
        let p_values = random_excursions(&alternating).unwrap();
        assert_eq!(p_values.len(), 8);
        assert!(p_values.iter().all(|p| *p < ALPHA));
    }
}
