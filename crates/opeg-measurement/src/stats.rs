// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// O PEG - GAUSSIAN STATISTICS
//
// Outlier-resistant averaging over micro-unit samples.
//
// **MAINNET DETERMINISM:**
// NO floating-point arithmetic. Mean is floor(sum / n); the std-deviation
// comparison is done in squares so no square root enters a decision:
//
//     |x - mean| <= k * s   <=>   d^2 * (n - 1) * 10^6 <= k_milli^2 * S
//
// where S = sum((x_i - mean)^2) and s is the sample (n - 1) deviation.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use opeg_core::{isqrt, BPS};

use crate::types::{AverageWithConfidence, ConfidenceLevel};

/// First and second moments of a sample set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Moments {
    pub count: usize,
    pub mean: u64,
    /// Sum of squared deviations from `mean`
    pub sum_sq_dev: u128,
}

impl Moments {
    pub fn of(values: &[u64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let sum: u128 = values.iter().map(|&v| v as u128).sum();
        let mean = (sum / values.len() as u128) as u64;
        let sum_sq_dev = values
            .iter()
            .map(|&v| {
                let d = v.abs_diff(mean) as u128;
                d * d
            })
            .fold(0u128, |acc, sq| acc.saturating_add(sq));
        Some(Self {
            count: values.len(),
            mean,
            sum_sq_dev,
        })
    }

    /// Sample standard deviation, floor of the integer root
    pub fn std_dev(&self) -> u64 {
        if self.count < 2 {
            return 0;
        }
        isqrt(self.sum_sq_dev / (self.count as u128 - 1)) as u64
    }

    /// True when `value` lies within `k_milli / 1000` standard deviations
    /// of the mean. Fewer than two samples have no spread: always true.
    pub fn within(&self, value: u64, k_milli: u64) -> bool {
        if self.count < 2 {
            return true;
        }
        let d = value.abs_diff(self.mean) as u128;
        let lhs = (d * d)
            .saturating_mul(self.count as u128 - 1)
            .saturating_mul(1_000_000);
        let k = k_milli as u128;
        let rhs = (k * k).saturating_mul(self.sum_sq_dev);
        lhs <= rhs
    }

    /// Coefficient of variation in basis points (std / mean)
    pub fn cv_bps(&self) -> u64 {
        if self.mean == 0 {
            return 0;
        }
        (self.std_dev() as u128 * BPS as u128 / self.mean as u128) as u64
    }
}

/// Samples within `k_milli / 1000` std deviations of the raw mean
pub fn filter_outliers(values: &[u64], k_milli: u64) -> Vec<u64> {
    match Moments::of(values) {
        Some(m) => values.iter().copied().filter(|&v| m.within(v, k_milli)).collect(),
        None => Vec::new(),
    }
}

/// Mean after outlier filtering. Falls back to the raw mean if the
/// filter would leave nothing.
pub fn gaussian_average(values: &[u64], k_milli: u64) -> Option<u64> {
    let raw = Moments::of(values)?;
    let kept = filter_outliers(values, k_milli);
    match Moments::of(&kept) {
        Some(filtered) => Some(filtered.mean),
        None => Some(raw.mean),
    }
}

/// Full summary of a sample set. `None` only for an empty set.
pub fn summarize(values: &[u64], k_milli: u64, min_significant: usize) -> Option<AverageWithConfidence> {
    let raw = Moments::of(values)?;
    let kept = filter_outliers(values, k_milli);
    let value_micro = Moments::of(&kept).map(|m| m.mean).unwrap_or(raw.mean);
    Some(AverageWithConfidence {
        value_micro,
        raw_mean_micro: raw.mean,
        std_dev_micro: raw.std_dev(),
        sample_count: raw.count,
        filtered_count: kept.len(),
        confidence: ConfidenceLevel::from_count(raw.count),
        is_significant: raw.count >= min_significant,
    })
}

/// Submission-time range check against a trailing window.
///
/// Returns `Ok(moments)` when accepted. Windows smaller than `min_history`
/// always pass. A zero-variance window accepts values within
/// `zero_variance_tolerance_bps` of its mean.
pub fn acceptance_check(
    history: &[u64],
    value: u64,
    k_milli: u64,
    min_history: usize,
    zero_variance_tolerance_bps: u64,
) -> Result<Option<Moments>, Moments> {
    let moments = match Moments::of(history) {
        Some(m) => m,
        None => return Ok(None),
    };
    if moments.count < min_history {
        return Ok(Some(moments));
    }
    let accepted = if moments.sum_sq_dev == 0 {
        let tolerance = moments.mean as u128 * zero_variance_tolerance_bps as u128 / BPS as u128;
        (value.abs_diff(moments.mean) as u128) <= tolerance
    } else {
        moments.within(value, k_milli)
    };
    if accepted {
        Ok(Some(moments))
    } else {
        Err(moments)
    }
}
