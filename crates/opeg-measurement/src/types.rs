use chrono::NaiveDate;
use opeg_core::{Hash256, MeasurementSource, MeasurementType};
use serde::{Deserialize, Serialize};

use crate::volume::ContainerVolume;

// ─────────────────────────────────────────────────────────────────
// OBSERVATIONS
// ─────────────────────────────────────────────────────────────────

/// Result of the automated checks run at submission time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomatedValidation {
    pub passed: bool,
    /// Mean of the trailing window the value was compared against
    pub window_mean_micro: Option<u64>,
    pub window_std_dev_micro: Option<u64>,
    pub window_samples: usize,
    pub validated_at: u64,
}

/// Raw water-price submission as received from the API layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaterPriceSubmission {
    pub submitter: String,
    pub currency: String,
    /// Price of the whole container, micro units of `currency`
    pub price_micro: u64,
    /// Labelled container size; the price is pro-rated to one liter
    pub volume: ContainerVolume,
    pub proof: String,
    pub source: MeasurementSource,
    pub timestamp: u64,
    pub block_height: u64,
    pub invite_id: Hash256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaterPriceObservation {
    pub id: Hash256,
    pub submitter: String,
    pub currency: String,
    /// Normalized price of one liter
    pub price_micro: u64,
    /// Price as submitted, for the container in `volume`
    pub container_price_micro: u64,
    pub volume: ContainerVolume,
    pub proof: String,
    pub source: MeasurementSource,
    pub timestamp: u64,
    pub block_height: u64,
    /// Peer validators, append-only
    pub validators: Vec<String>,
    pub is_validated: bool,
    pub confidence_ppm: u64,
    pub automated: AutomatedValidation,
    pub invite_id: Hash256,
}

/// Raw exchange-rate submission (`from_currency` per `to_currency`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRateSubmission {
    pub submitter: String,
    pub from_currency: String,
    pub to_currency: String,
    pub rate_micro: u64,
    pub proof: String,
    pub source: MeasurementSource,
    pub timestamp: u64,
    pub block_height: u64,
    pub invite_id: Hash256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRateObservation {
    pub id: Hash256,
    pub submitter: String,
    pub from_currency: String,
    pub to_currency: String,
    pub rate_micro: u64,
    pub proof: String,
    pub source: MeasurementSource,
    pub timestamp: u64,
    pub block_height: u64,
    pub validators: Vec<String>,
    pub is_validated: bool,
    pub confidence_ppm: u64,
    pub automated: AutomatedValidation,
    pub invite_id: Hash256,
}

// ─────────────────────────────────────────────────────────────────
// INVITES
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasurementInvite {
    pub id: Hash256,
    pub invited_user: String,
    pub measurement_type: MeasurementType,
    pub currency: Option<String>,
    pub created_at: u64,
    pub expires_at: u64,
    pub block_height: u64,
    /// Issuance counter value the id was derived from
    pub sequence: u64,
    /// Monotonic: never reset once set
    pub is_used: bool,
    pub is_expired: bool,
}

impl MeasurementInvite {
    /// Usable by its owner at `now`
    pub fn is_valid_at(&self, now: u64) -> bool {
        !self.is_used && !self.is_expired && now < self.expires_at
    }
}

// ─────────────────────────────────────────────────────────────────
// AVERAGES
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConfidenceLevel {
    InsufficientData,
    Low,
    High,
    VeryHigh,
}

impl ConfidenceLevel {
    /// <5 insufficient, <10 low, <20 high, otherwise very high
    pub fn from_count(count: usize) -> Self {
        match count {
            0..=4 => ConfidenceLevel::InsufficientData,
            5..=9 => ConfidenceLevel::Low,
            10..=19 => ConfidenceLevel::High,
            _ => ConfidenceLevel::VeryHigh,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AverageWithConfidence {
    /// Gaussian-filtered mean
    pub value_micro: u64,
    pub raw_mean_micro: u64,
    pub std_dev_micro: u64,
    pub sample_count: usize,
    /// Samples left after outlier filtering
    pub filtered_count: usize,
    pub confidence: ConfidenceLevel,
    pub is_significant: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DailyKey {
    pub currency: String,
    pub date: NaiveDate,
}

impl DailyKey {
    pub fn new(currency: &str, date: NaiveDate) -> Self {
        Self {
            currency: currency.to_string(),
            date,
        }
    }

    /// Store id: currency, NUL, ISO date. NUL never appears in a currency code.
    pub fn store_id(&self) -> Vec<u8> {
        let mut id = self.currency.as_bytes().to_vec();
        id.push(0);
        id.extend_from_slice(self.date.format("%Y-%m-%d").to_string().as_bytes());
        id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyAverage {
    pub currency: String,
    pub date: NaiveDate,
    pub avg_water_price_micro: Option<u64>,
    pub avg_exchange_rate_micro: Option<u64>,
    pub measurement_count: usize,
    pub std_deviation_micro: u64,
    pub confidence: ConfidenceLevel,
    pub is_significant: bool,
    pub is_stable: bool,
    pub block_height: u64,
}

// ─────────────────────────────────────────────────────────────────
// URL REGISTRY
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedUrl {
    pub id: Hash256,
    pub url: String,
    pub measurement_type: MeasurementType,
    pub currency: Option<String>,
    pub submitter: String,
    pub validators: Vec<String>,
    pub last_checked: u64,
    pub is_active: bool,
    /// Exponential moving average of check outcomes, ppm
    pub reliability_ppm: u64,
    pub validation_count: u64,
    pub block_height: u64,
}

// ─────────────────────────────────────────────────────────────────
// STATISTICS
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasurementStatistics {
    pub water_observations: usize,
    pub exchange_observations: usize,
    pub validated_observations: usize,
    pub open_invites: usize,
    pub used_invites: usize,
    pub expired_invites: usize,
    pub active_urls: usize,
    pub daily_averages: usize,
    pub currencies: usize,
}
