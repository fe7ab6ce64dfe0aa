// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// O PEG - CORE TYPES
//
// Shared vocabulary for the water-price peg engine: fixed-point units,
// measurement kinds, 256-bit ids, block context, and the collaborator
// seams (user directory, price feed) used by measurement and stabilization.
//
// MAINNET DETERMINISM: every consensus value is an integer.
//   prices/rates  -> micro units (1.0 = 1_000_000)
//   amounts       -> minor units (1.00 = 100)
//   ratios        -> parts-per-million or basis points
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub mod config;
pub mod directory;
pub mod feed;
pub mod rng;

pub use config::{ConfigError, MeasurementParams, PegConfig, StabilizationParams, TargetParams};
pub use directory::{StaticDirectory, UserDirectory};
pub use feed::PriceFeed;
pub use rng::DeterministicRng;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

// ─────────────────────────────────────────────────────────────────
// UNITS
// ─────────────────────────────────────────────────────────────────

/// 1.0 price unit = 1,000,000 micro units (6 decimal places)
pub const MICRO_PER_UNIT: u64 = 1_000_000;

/// 1.00 currency unit = 100 minor units (2 decimal places)
pub const MINOR_PER_UNIT: u128 = 100;

/// Parts-per-million denominator for ratios
pub const PPM: u64 = 1_000_000;

/// Basis-point denominator (10000 = 100%)
pub const BPS: u64 = 10_000;

pub const SECS_PER_DAY: u64 = 86_400;

/// Upper bound on a single observation: 1,000,000.0 units of currency per
/// liter or per exchange unit. Anything above is treated as garbage input.
pub const MAX_OBSERVATION_MICRO: u64 = 1_000_000 * MICRO_PER_UNIT;

/// Convert an API-side decimal into micro units.
/// Rejects NaN, infinities, non-positive values, and values above
/// `MAX_OBSERVATION_MICRO`. This is the only place f64 is accepted.
pub fn micro_from_f64(value: f64) -> Option<u64> {
    if !value.is_finite() || value <= 0.0 {
        return None;
    }
    let scaled = (value * MICRO_PER_UNIT as f64).round();
    if scaled < 1.0 || scaled > MAX_OBSERVATION_MICRO as f64 {
        return None;
    }
    Some(scaled as u64)
}

/// Display helper: micro units as a decimal (never used in consensus math)
pub fn micro_to_f64(micro: u64) -> f64 {
    micro as f64 / MICRO_PER_UNIT as f64
}

/// Integer square root (Newton's method)
pub fn isqrt(n: u128) -> u128 {
    if n == 0 {
        return 0;
    }
    let mut x = n;
    let mut y = x.div_ceil(2);
    while y < x {
        x = y;
        y = (x + n / x) / 2;
    }
    x
}

// ─────────────────────────────────────────────────────────────────
// IDS
// ─────────────────────────────────────────────────────────────────

/// 256-bit content hash used for observation, invite, URL and
/// stabilization transaction ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, String> {
        let bytes = hex::decode(s).map_err(|e| format!("Invalid hex id: {}", e))?;
        if bytes.len() != 32 {
            return Err(format!("Invalid id length: {} bytes (expected 32)", bytes.len()));
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Ok(Hash256(out))
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

// ─────────────────────────────────────────────────────────────────
// MEASUREMENT KINDS
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MeasurementType {
    WaterPrice,
    ExchangeRate,
    WaterPriceOfflineValidation,
    ExchangeRateOfflineValidation,
    UrlSubmission,
    OnlineValidation,
}

impl MeasurementType {
    /// Types an invite for a water-price observation may carry
    pub fn is_water_family(self) -> bool {
        matches!(
            self,
            MeasurementType::WaterPrice | MeasurementType::WaterPriceOfflineValidation
        )
    }

    /// Types an invite for an exchange-rate observation may carry
    pub fn is_exchange_family(self) -> bool {
        matches!(
            self,
            MeasurementType::ExchangeRate | MeasurementType::ExchangeRateOfflineValidation
        )
    }

    /// Stable one-byte tag for hashing and store keys
    pub fn tag(self) -> u8 {
        match self {
            MeasurementType::WaterPrice => 0,
            MeasurementType::ExchangeRate => 1,
            MeasurementType::WaterPriceOfflineValidation => 2,
            MeasurementType::ExchangeRateOfflineValidation => 3,
            MeasurementType::UrlSubmission => 4,
            MeasurementType::OnlineValidation => 5,
        }
    }
}

impl fmt::Display for MeasurementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MeasurementType::WaterPrice => "water_price",
            MeasurementType::ExchangeRate => "exchange_rate",
            MeasurementType::WaterPriceOfflineValidation => "water_price_offline_validation",
            MeasurementType::ExchangeRateOfflineValidation => "exchange_rate_offline_validation",
            MeasurementType::UrlSubmission => "url_submission",
            MeasurementType::OnlineValidation => "online_validation",
        };
        f.write_str(s)
    }
}

/// Who produced an observation and how
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeasurementSource {
    UserOnline,
    UserOffline,
    BotOnline,
    BotOffline,
}

impl MeasurementSource {
    /// Offline sources carry a GPS + photo-hash proof instead of a URL
    pub fn is_offline(self) -> bool {
        matches!(self, MeasurementSource::UserOffline | MeasurementSource::BotOffline)
    }
}

// ─────────────────────────────────────────────────────────────────
// CURRENCIES
// ─────────────────────────────────────────────────────────────────

/// O currencies are "O" followed by an uppercase fiat code (OUSD, OEUR, ...)
pub fn is_o_currency(code: &str) -> bool {
    let mut chars = code.chars();
    matches!(chars.next(), Some('O'))
        && matches!(chars.next(), Some(c) if c.is_ascii_uppercase())
        && code.len() >= 3
}

/// Fiat currency an O currency is measured against (OUSD -> USD)
pub fn fiat_for(o_currency: &str) -> Option<&str> {
    if is_o_currency(o_currency) {
        Some(&o_currency[1..])
    } else {
        None
    }
}

// ─────────────────────────────────────────────────────────────────
// BLOCK CONTEXT
// ─────────────────────────────────────────────────────────────────

/// Block data the ledger hands to stabilization for production and
/// validation. Per-currency volume is computed by the ledger in minor units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockContext {
    pub height: u64,
    pub timestamp: u64,
    pub block_hash: Hash256,
    pub currency_volumes: BTreeMap<String, u128>,
}

impl BlockContext {
    pub fn new(height: u64, timestamp: u64, block_hash: Hash256) -> Self {
        Self {
            height,
            timestamp,
            block_hash,
            currency_volumes: BTreeMap::new(),
        }
    }

    pub fn with_volume(mut self, currency: &str, volume: u128) -> Self {
        self.currency_volumes.insert(currency.to_string(), volume);
        self
    }

    pub fn volume(&self, currency: &str) -> u128 {
        self.currency_volumes.get(currency).copied().unwrap_or(0)
    }
}

// ─────────────────────────────────────────────────────────────────
// LOCKING
// ─────────────────────────────────────────────────────────────────

/// Lock a mutex, recovering the inner value if a previous holder panicked.
pub fn safe_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log::warn!("⚠️ Mutex was poisoned, recovering...");
            poisoned.into_inner()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isqrt() {
        assert_eq!(isqrt(0), 0);
        assert_eq!(isqrt(1), 1);
        assert_eq!(isqrt(15), 3);
        assert_eq!(isqrt(16), 4);
        assert_eq!(isqrt(1_000_000_000_000), 1_000_000);
    }

    #[test]
    fn test_micro_from_f64_bounds() {
        assert_eq!(micro_from_f64(1.0), Some(1_000_000));
        assert_eq!(micro_from_f64(0.99), Some(990_000));
        assert_eq!(micro_from_f64(0.0), None);
        assert_eq!(micro_from_f64(-1.5), None);
        assert_eq!(micro_from_f64(f64::NAN), None);
        assert_eq!(micro_from_f64(f64::INFINITY), None);
        assert_eq!(micro_from_f64(2_000_000.0), None, "Above MAX_OBSERVATION_MICRO");
    }

    #[test]
    fn test_o_currency_detection() {
        assert!(is_o_currency("OUSD"));
        assert!(is_o_currency("OEUR"));
        assert!(!is_o_currency("USD"));
        assert!(!is_o_currency("Ousd"));
        assert!(!is_o_currency("O"));
        assert_eq!(fiat_for("OUSD"), Some("USD"));
        assert_eq!(fiat_for("USD"), None);
    }

    #[test]
    fn test_hash256_hex_roundtrip() {
        let h = Hash256([0xab; 32]);
        let parsed = Hash256::from_hex(&h.to_hex()).unwrap();
        assert_eq!(h, parsed);
        assert!(Hash256::from_hex("abcd").is_err(), "Short ids must be rejected");
    }

    #[test]
    fn test_measurement_families() {
        assert!(MeasurementType::WaterPrice.is_water_family());
        assert!(MeasurementType::WaterPriceOfflineValidation.is_water_family());
        assert!(!MeasurementType::ExchangeRate.is_water_family());
        assert!(MeasurementType::ExchangeRate.is_exchange_family());
        assert!(!MeasurementType::UrlSubmission.is_exchange_family());
    }

    #[test]
    fn test_block_volume_defaults_to_zero() {
        let block = BlockContext::new(10, 1_700_000_000, Hash256::default()).with_volume("OUSD", 500);
        assert_eq!(block.volume("OUSD"), 500);
        assert_eq!(block.volume("OEUR"), 0);
    }
}
