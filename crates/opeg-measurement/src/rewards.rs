//! Measurement reward schedule.
//!
//! Base rewards in minor units (2 decimals), scaled by the contributor's
//! reputation: factor = 0.5 + 0.5 * reputation, clamped to [0.5, 1.5].

use opeg_core::{MeasurementType, PPM};

pub const WATER_PRICE_MEASUREMENT_REWARD: u128 = 5_000;
pub const EXCHANGE_RATE_MEASUREMENT_REWARD: u128 = 5_000;
pub const OFFLINE_VALIDATION_REWARD: u128 = 3_000;
pub const URL_SUBMISSION_REWARD: u128 = 2_000;
pub const ONLINE_VALIDATION_REWARD: u128 = 1_000;

const MIN_FACTOR_PPM: u64 = 500_000;
const MAX_FACTOR_PPM: u64 = 1_500_000;

pub fn base_reward(measurement_type: MeasurementType) -> u128 {
    match measurement_type {
        MeasurementType::WaterPrice => WATER_PRICE_MEASUREMENT_REWARD,
        MeasurementType::ExchangeRate => EXCHANGE_RATE_MEASUREMENT_REWARD,
        MeasurementType::WaterPriceOfflineValidation
        | MeasurementType::ExchangeRateOfflineValidation => OFFLINE_VALIDATION_REWARD,
        MeasurementType::UrlSubmission => URL_SUBMISSION_REWARD,
        MeasurementType::OnlineValidation => ONLINE_VALIDATION_REWARD,
    }
}

/// Reward in minor units for a contributor with `reputation_ppm` (1.0 = 1_000_000)
pub fn calculate_reward(measurement_type: MeasurementType, reputation_ppm: u64) -> u128 {
    let factor = (MIN_FACTOR_PPM + reputation_ppm / 2).clamp(MIN_FACTOR_PPM, MAX_FACTOR_PPM);
    base_reward(measurement_type) * factor as u128 / PPM as u128
}
