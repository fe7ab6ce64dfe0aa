//! Per-currency stability state.

use opeg_core::PPM;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StabilityStatus {
    Stable,
    Unstable,
    Inactive,
}

impl fmt::Display for StabilityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StabilityStatus::Stable => "stable",
            StabilityStatus::Unstable => "unstable",
            StabilityStatus::Inactive => "inactive",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyStabilityInfo {
    pub currency: String,
    /// Peg price of one liter, micro units
    pub expected_water_price_micro: u64,
    pub observed_water_price_micro: u64,
    pub observed_exchange_rate_micro: u64,
    /// |expected - observed| / expected
    pub stability_ratio_ppm: u64,
    pub status: StabilityStatus,
    /// Height the current unstable run began. `None` unless unstable.
    pub unstable_since_height: Option<u64>,
    pub last_check_height: u64,
    /// Fresh averages folded into this record since it was first tracked
    pub measurement_count: u64,
}

impl CurrencyStabilityInfo {
    pub fn new(currency: &str) -> Self {
        Self {
            currency: currency.to_string(),
            expected_water_price_micro: 0,
            observed_water_price_micro: 0,
            observed_exchange_rate_micro: 0,
            stability_ratio_ppm: 0,
            status: StabilityStatus::Stable,
            unstable_since_height: None,
            last_check_height: 0,
            measurement_count: 0,
        }
    }

    pub fn is_stable(&self) -> bool {
        self.status == StabilityStatus::Stable
    }

    pub fn is_unstable(&self) -> bool {
        self.status == StabilityStatus::Unstable
    }

    pub fn is_inactive(&self) -> bool {
        self.status == StabilityStatus::Inactive
    }

    /// Continuously unstable for at least `min_blocks` as of `height`
    pub fn meets_instability_threshold(&self, height: u64, min_blocks: u64) -> bool {
        match (self.status, self.unstable_since_height) {
            (StabilityStatus::Unstable, Some(since)) => height.saturating_sub(since) >= min_blocks,
            _ => false,
        }
    }

    /// No fresh data for more than `max_gap` blocks as of `height`
    pub fn is_stale(&self, height: u64, max_gap: u64) -> bool {
        height.saturating_sub(self.last_check_height) > max_gap
    }
}

/// Relative deviation of `observed` from `expected`, ppm. 0 when
/// `expected` is 0.
pub fn stability_ratio_ppm(expected_micro: u64, observed_micro: u64) -> u64 {
    if expected_micro == 0 {
        return 0;
    }
    let ratio = expected_micro.abs_diff(observed_micro) as u128 * PPM as u128 / expected_micro as u128;
    ratio.min(u64::MAX as u128) as u64
}
