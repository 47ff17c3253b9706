use crate::error::{CoreError, Result};

/// A block where any lag has a zero-variance side is excluded.
pub fn block_autocorrelation(block: &[u8], max_lag: usize) -> Option<f64> {
    if block.is_empty() {
        return None;
    }
    let mean = block.iter().map(|&b| b as f64).sum::<f64>() / block.len() as f64;
    let centred: Vec<f64> = block.iter().map(|&b| b as f64 - mean).collect();

    let mut sum = 0.0;
    let mut lags = 0usize;
    for lag in 1..max_lag {
        if centred.len() < lag + 2 {
            break;
        }
        let r = pearson(&centred[..centred.len() - lag], &centred[lag..])?;
        sum += r.abs();
        lags += 1;
    }

    (lags > 0).then(|| sum / lags as f64)
}

fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    let n = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (a, b) in x.iter().zip(y) {
        let dx = a - mean_x;
        let dy = b - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    if var_x <= f64::EPSILON || var_y <= f64::EPSILON {
        return None;
    }
    Some(cov / (var_x * var_y).sqrt())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutocorrelationOutcome {
    pub mean: f64,
    pub blocks_used: usize,
    pub blocks_excluded: usize,
}

pub fn autocorrelation(
    windows: &[Vec<u8>],
    block_size: usize,
    max_lag: usize,
) -> Result<AutocorrelationOutcome> {
    let mut sum = 0.0;
    let mut blocks_used = 0;
    let mut blocks_excluded = 0;

    for block in windows.iter().flat_map(|w| w.chunks(block_size.max(1))) {
        match block_autocorrelation(block, max_lag) {
            Some(mean) => {
                sum += mean;
                blocks_used += 1;
            }
            None => blocks_excluded += 1,
        }
    }

    if blocks_used == 0 {
        return Err(CoreError::DegenerateInput(format!(
            "no block with computable autocorrelation ({blocks_excluded} excluded)"
        )));
    }

    Ok(AutocorrelationOutcome {
        mean: sum / blocks_used as f64,
        blocks_used,
        blocks_excluded,
    })
}
