//! Invitation conversion-rate bookkeeping.
//!
//! Counters accumulate over the lifetime of the system and are never
//! recomputed from scratch. The derived rate sizes future invite batches.

use opeg_core::{MeasurementType, PPM};
use serde::{Deserialize, Serialize};

/// Structured (currency, type) key. `None` currency covers invites that
/// were not bound to a currency.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConversionKey {
    pub currency: Option<String>,
    pub measurement_type: MeasurementType,
}

impl ConversionKey {
    pub fn new(currency: Option<&str>, measurement_type: MeasurementType) -> Self {
        Self {
            currency: currency.map(str::to_string),
            measurement_type,
        }
    }

    /// Store id: type tag, then the currency code (empty for none)
    pub fn store_id(&self) -> Vec<u8> {
        let mut id = vec![self.measurement_type.tag()];
        if let Some(currency) = &self.currency {
            id.extend_from_slice(currency.as_bytes());
        }
        id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionRate {
    pub key: ConversionKey,
    pub invites_sent: u64,
    pub measurements_completed: u64,
    /// completed / sent, ppm. Holds the default until the first invite.
    pub rate_ppm: u64,
    pub last_updated: u64,
}

impl ConversionRate {
    pub fn new(key: ConversionKey, default_rate_ppm: u64) -> Self {
        Self {
            key,
            invites_sent: 0,
            measurements_completed: 0,
            rate_ppm: default_rate_ppm,
            last_updated: 0,
        }
    }

    pub fn record_sent(&mut self, count: u64, now: u64) {
        self.invites_sent = self.invites_sent.saturating_add(count);
        self.recompute(now);
    }

    pub fn record_completed(&mut self, now: u64) {
        self.measurements_completed = self.measurements_completed.saturating_add(1);
        self.recompute(now);
    }

    fn recompute(&mut self, now: u64) {
        if self.invites_sent > 0 {
            let rate = self.measurements_completed as u128 * PPM as u128 / self.invites_sent as u128;
            self.rate_ppm = rate.min(PPM as u128) as u64;
        }
        self.last_updated = now;
    }
}
