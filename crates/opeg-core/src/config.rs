// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// O PEG - ENGINE CONFIGURATION
//
// Every tunable of the measurement and stabilization subsystems, loadable
// from TOML or environment variables. Defaults are the mainnet values; all
// nodes on a network must run identical stabilization parameters.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fs;
use std::path::Path;

use crate::{MAX_OBSERVATION_MICRO, MINOR_PER_UNIT, SECS_PER_DAY};

/// Serde adapter for u128 ↔ TOML: serialize as string, deserialize from string or integer.
/// TOML has no 128-bit integers.
mod u128_toml {
    use super::*;

    pub fn serialize<S: Serializer>(val: &u128, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&val.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u128, D::Error> {
        use serde::de::{self, Visitor};
        struct U128Visitor;

        impl<'de> Visitor<'de> for U128Visitor {
            type Value = u128;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a u128 as a string or integer")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<u128, E> {
                v.parse().map_err(E::custom)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<u128, E> {
                Ok(v as u128)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<u128, E> {
                if v >= 0 {
                    Ok(v as u128)
                } else {
                    Err(E::custom("negative value for u128"))
                }
            }
        }

        d.deserialize_any(U128Visitor)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid value for {var}: {value}")]
    Env { var: String, value: String },
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ─────────────────────────────────────────────────────────────────
// MEASUREMENT
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasurementParams {
    /// Invitation lifetime (7 days)
    pub invite_expiry_secs: u64,
    /// Peer validators needed before an observation counts as validated
    pub min_validators: usize,
    /// Outlier filter for averaging, in thousandths of a std deviation (2.0)
    pub gaussian_std_threshold_milli: u64,
    /// Acceptance band at submission, in thousandths of a std deviation (3.0)
    pub gaussian_acceptance_threshold_milli: u64,
    /// Samples required before an average is reported at all
    pub min_significant_samples: usize,
    /// Trailing window for the submission range check
    pub acceptance_window_days: u64,
    /// Zero-variance fallback: accept within this many bps of the mean (10%)
    pub zero_variance_tolerance_bps: u64,
    /// Maximum age of an offline observation at submission (60 min)
    pub offline_tolerance_secs: u64,
    /// How far an online observation may be stamped ahead of acceptance time
    pub max_future_drift_secs: u64,
    /// Accepted container size for water prices, in micro-liters (0.9 L to 1.1 L)
    pub min_volume_micro_liters: u64,
    pub max_volume_micro_liters: u64,
    pub max_observation_micro: u64,
    /// Only peer-validated observations feed averages when set
    pub require_peer_validation: bool,
    /// Conversion rate assumed for an unseen (currency, type) pair (0.5)
    pub default_conversion_rate_ppm: u64,
    /// Floor applied to the conversion rate when sizing invites (0.10)
    pub min_conversion_rate_ppm: u64,
    /// Invite over-provisioning, in percent (120 = x1.2)
    pub invite_overhead_pct: u64,
    /// URLs with reliability below this are deactivated (0.3)
    pub url_min_reliability_ppm: u64,
    /// Price/rate deviation still counted as stable in daily rollups (10%)
    pub daily_stability_tolerance_ppm: u64,
    /// Native users a currency needs before target-driven invites are sent
    pub readiness_min_users: usize,
    /// Relaxed user threshold below `bootstrap_height`
    pub bootstrap_min_users: usize,
    pub bootstrap_height: u64,
    /// Coin supply (minor units) required before exchange-rate invites (100,000 O)
    #[serde(with = "u128_toml")]
    pub readiness_min_supply: u128,
}

impl Default for MeasurementParams {
    fn default() -> Self {
        Self {
            invite_expiry_secs: 7 * SECS_PER_DAY,
            min_validators: 3,
            gaussian_std_threshold_milli: 2_000,
            gaussian_acceptance_threshold_milli: 3_000,
            min_significant_samples: 5,
            acceptance_window_days: 7,
            zero_variance_tolerance_bps: 1_000,
            offline_tolerance_secs: 3_600,
            max_future_drift_secs: 300,
            min_volume_micro_liters: 900_000,
            max_volume_micro_liters: 1_100_000,
            max_observation_micro: MAX_OBSERVATION_MICRO,
            require_peer_validation: false,
            default_conversion_rate_ppm: 500_000,
            min_conversion_rate_ppm: 100_000,
            invite_overhead_pct: 120,
            url_min_reliability_ppm: 300_000,
            daily_stability_tolerance_ppm: 100_000,
            readiness_min_users: 100,
            bootstrap_min_users: 10,
            bootstrap_height: 10_000,
            readiness_min_supply: 100_000 * MINOR_PER_UNIT,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// DYNAMIC TARGETS
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetParams {
    pub min_daily: u64,
    pub max_daily: u64,
    pub early_stage_target: u64,
    pub early_stage_days: u64,
    pub volatile_target: u64,
    pub stable_target: u64,
    /// Coefficient of variation at or above which the volatile target applies (15%)
    pub volatile_cv_bps: u64,
    /// Coefficient of variation at or below which the stable target applies (5%)
    pub stable_cv_bps: u64,
    pub cv_window_days: u64,
}

impl Default for TargetParams {
    fn default() -> Self {
        Self {
            min_daily: 50,
            max_daily: 300,
            early_stage_target: 200,
            early_stage_days: 30,
            volatile_target: 150,
            stable_target: 75,
            volatile_cv_bps: 1_500,
            stable_cv_bps: 500,
            cv_window_days: 7,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// STABILIZATION
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilizationParams {
    /// Relative deviation from peg above which a currency is unstable (10%)
    pub stability_threshold_ppm: u64,
    /// Blocks a currency must stay unstable before it issues (~24h)
    pub unstable_time_range: u64,
    /// Blocks without fresh data before a currency goes inactive (~30 days)
    pub inactive_time_range: u64,
    /// Share of the deviation-weighted volume issued as coins (0.10)
    pub coin_factor_ppm: u64,
    #[serde(with = "u128_toml")]
    pub min_reward: u128,
    #[serde(with = "u128_toml")]
    pub max_reward: u128,
    pub min_recipients: usize,
    pub max_recipients: usize,
    /// One recipient per this many minor units issued
    #[serde(with = "u128_toml")]
    pub minor_units_per_recipient: u128,
    pub water_window_days: u64,
    pub exchange_window_days: u64,
}

impl Default for StabilizationParams {
    fn default() -> Self {
        Self {
            stability_threshold_ppm: 100_000,
            unstable_time_range: 144,
            inactive_time_range: 144 * 30,
            coin_factor_ppm: 100_000,
            min_reward: 100,
            max_reward: 10_000,
            min_recipients: 10,
            max_recipients: 50_000,
            minor_units_per_recipient: 100,
            water_window_days: 30,
            exchange_window_days: 7,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// TOP-LEVEL CONFIG
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PegConfig {
    pub measurement: MeasurementParams,
    pub targets: TargetParams,
    pub stabilization: StabilizationParams,
}

impl PegConfig {
    /// Load config from a TOML file. Missing sections fall back to defaults.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: PegConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `OPEG_*` environment variables.
    /// Useful for containerized deployments.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        let mut config = PegConfig::default();
        let m = &mut config.measurement;
        let s = &mut config.stabilization;

        env_override("OPEG_INVITE_EXPIRY_SECS", &mut m.invite_expiry_secs)?;
        env_override("OPEG_MIN_VALIDATORS", &mut m.min_validators)?;
        env_override("OPEG_REQUIRE_PEER_VALIDATION", &mut m.require_peer_validation)?;
        env_override("OPEG_OFFLINE_TOLERANCE_SECS", &mut m.offline_tolerance_secs)?;
        env_override("OPEG_STABILITY_THRESHOLD_PPM", &mut s.stability_threshold_ppm)?;
        env_override("OPEG_UNSTABLE_TIME_RANGE", &mut s.unstable_time_range)?;
        env_override("OPEG_INACTIVE_TIME_RANGE", &mut s.inactive_time_range)?;

        config.validate()?;
        Ok(config)
    }

    /// Save config to a TOML file
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let m = &self.measurement;
        let t = &self.targets;
        let s = &self.stabilization;

        if m.invite_expiry_secs == 0 {
            return Err(ConfigError::Invalid("invite_expiry_secs must be > 0".to_string()));
        }
        if m.min_validators == 0 {
            return Err(ConfigError::Invalid("min_validators must be > 0".to_string()));
        }
        if m.gaussian_std_threshold_milli == 0 || m.gaussian_acceptance_threshold_milli == 0 {
            return Err(ConfigError::Invalid("gaussian thresholds must be > 0".to_string()));
        }
        if m.min_significant_samples < 2 {
            return Err(ConfigError::Invalid(
                "min_significant_samples must be >= 2".to_string(),
            ));
        }
        if m.min_conversion_rate_ppm == 0 || m.min_conversion_rate_ppm > crate::PPM {
            return Err(ConfigError::Invalid(
                "min_conversion_rate_ppm must be in (0, 1_000_000]".to_string(),
            ));
        }
        if m.min_volume_micro_liters == 0 || m.min_volume_micro_liters > m.max_volume_micro_liters {
            return Err(ConfigError::Invalid(
                "0 < min_volume_micro_liters <= max_volume_micro_liters required".to_string(),
            ));
        }
        if m.bootstrap_min_users > m.readiness_min_users {
            return Err(ConfigError::Invalid(
                "bootstrap_min_users must not exceed readiness_min_users".to_string(),
            ));
        }
        if m.invite_overhead_pct < 100 {
            return Err(ConfigError::Invalid("invite_overhead_pct must be >= 100".to_string()));
        }
        if t.min_daily == 0 || t.min_daily > t.max_daily {
            return Err(ConfigError::Invalid(
                "targets: 0 < min_daily <= max_daily required".to_string(),
            ));
        }
        if t.stable_cv_bps >= t.volatile_cv_bps {
            return Err(ConfigError::Invalid(
                "targets: stable_cv_bps must be below volatile_cv_bps".to_string(),
            ));
        }
        if s.min_reward == 0 || s.min_reward > s.max_reward {
            return Err(ConfigError::Invalid(
                "stabilization: 0 < min_reward <= max_reward required".to_string(),
            ));
        }
        if s.min_recipients == 0 || s.min_recipients > s.max_recipients {
            return Err(ConfigError::Invalid(
                "stabilization: 0 < min_recipients <= max_recipients required".to_string(),
            ));
        }
        if s.minor_units_per_recipient == 0 {
            return Err(ConfigError::Invalid(
                "stabilization: minor_units_per_recipient must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_override<T: std::str::FromStr>(var: &str, slot: &mut T) -> Result<(), ConfigError> {
    if let Ok(value) = std::env::var(var) {
        *slot = value.parse().map_err(|_| ConfigError::Env {
            var: var.to_string(),
            value,
        })?;
    }
    Ok(())
}
