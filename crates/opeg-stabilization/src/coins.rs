//! Issuance arithmetic. Integer ppm throughout.

use opeg_core::{StabilizationParams, PPM};

/// Rate deviation used for issuance: |1 - ratio|, ppm.
///
/// The stability ratio stands in for the observed exchange rate here, so
/// a currency 15% off peg yields a deviation of 85%. A zero ratio yields 0.
pub fn rate_deviation_ppm(stability_ratio_ppm: u64) -> u64 {
    if stability_ratio_ppm == 0 {
        return 0;
    }
    PPM.abs_diff(stability_ratio_ppm)
}

/// `volume * deviation * factor` in minor units. `None` on overflow.
pub fn coins_for_volume(volume: u128, stability_ratio_ppm: u64, coin_factor_ppm: u64) -> Option<u128> {
    let deviation = rate_deviation_ppm(stability_ratio_ppm) as u128;
    let scale = PPM as u128 * PPM as u128;
    volume
        .checked_mul(deviation)?
        .checked_mul(coin_factor_ppm as u128)
        .map(|v| v / scale)
}

/// One recipient per `minor_units_per_recipient`, clamped to
/// `[min_recipients, max_recipients]`
pub fn optimal_recipient_count(total_coins: u128, params: &StabilizationParams) -> usize {
    let per = params.minor_units_per_recipient.max(1);
    let base = (total_coins / per).min(usize::MAX as u128) as usize;
    base.clamp(params.min_recipients, params.max_recipients.max(params.min_recipients))
}

/// Per-recipient reward, clamped to `[min_reward, max_reward]`
pub fn per_recipient_amount(total_coins: u128, recipients: usize, params: &StabilizationParams) -> u128 {
    if recipients == 0 {
        return 0;
    }
    (total_coins / recipients as u128).clamp(params.min_reward, params.max_reward.max(params.min_reward))
}
