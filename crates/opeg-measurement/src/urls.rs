//! Registry of price-source URLs that bots and users may cite.
//!
//! Reliability is an exponential moving average of reachability checks
//! (alpha = 0.1). Checks happen off the consensus path; only their
//! outcomes are recorded here.

use log::{info, warn};
use opeg_core::{safe_lock, Hash256, MeasurementType, PPM};
use opeg_store::{codec, KvStore, RecordKind};
use sha3::{Digest, Sha3_256};

use crate::error::{MeasurementError, RejectReason};
use crate::proof::validate_url_format;
use crate::system::MeasurementSystem;
use crate::types::ValidatedUrl;

/// EMA weight of the newest check, ppm (0.1)
const RELIABILITY_ALPHA_PPM: u64 = 100_000;

pub fn compute_url_id(url: &str, measurement_type: MeasurementType, currency: Option<&str>) -> Hash256 {
    let mut hasher = Sha3_256::new();
    hasher.update(b"OPEG_URL_V1");
    hasher.update([measurement_type.tag()]);
    let currency = currency.unwrap_or("");
    hasher.update((currency.len() as u64).to_le_bytes());
    hasher.update(currency.as_bytes());
    hasher.update(url.as_bytes());
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    Hash256(out)
}

/// r' = (1 - alpha) * r + alpha * outcome
pub fn next_reliability(current_ppm: u64, success: bool) -> u64 {
    let outcome = if success { PPM } else { 0 };
    ((PPM - RELIABILITY_ALPHA_PPM) * current_ppm + RELIABILITY_ALPHA_PPM * outcome) / PPM
}

impl<S: KvStore> MeasurementSystem<S> {
    /// Register a new source URL. Starts active with full reliability.
    pub fn submit_url(
        &self,
        url: &str,
        measurement_type: MeasurementType,
        currency: Option<&str>,
        submitter: &str,
        now: u64,
        block_height: u64,
    ) -> Result<Hash256, MeasurementError> {
        validate_url_format(url)?;
        let id = compute_url_id(url, measurement_type, currency);

        let mut state = safe_lock(&self.state);
        if state.urls.contains_key(&id) {
            return Err(RejectReason::DuplicateUrl.into());
        }
        let record = ValidatedUrl {
            id,
            url: url.to_string(),
            measurement_type,
            currency: currency.map(str::to_string),
            submitter: submitter.to_string(),
            validators: Vec::new(),
            last_checked: now,
            is_active: true,
            reliability_ppm: PPM,
            validation_count: 0,
            block_height,
        };
        codec::put(&self.store, RecordKind::ValidatedUrl, id.as_bytes(), &record)?;
        state.urls.insert(id, record);
        info!("🔗 Source URL registered: {}", url);
        Ok(id)
    }

    /// Record a peer endorsement of a URL
    pub fn validate_url(&self, id: &Hash256, validator: &str) -> Result<(), MeasurementError> {
        let mut state = safe_lock(&self.state);
        let mut record = state.urls.get(id).cloned().ok_or(RejectReason::UnknownUrl)?;
        if record.submitter == validator {
            return Err(RejectReason::SelfValidation.into());
        }
        if record.validators.iter().any(|v| v == validator) {
            return Err(RejectReason::AlreadyValidated.into());
        }
        record.validators.push(validator.to_string());
        codec::put(&self.store, RecordKind::ValidatedUrl, id.as_bytes(), &record)?;
        state.urls.insert(*id, record);
        Ok(())
    }

    /// Fold one reachability check into the URL's reliability.
    /// Drops below the configured floor deactivate the URL.
    pub fn update_url_reliability(&self, id: &Hash256, success: bool, now: u64) -> Result<u64, MeasurementError> {
        let mut state = safe_lock(&self.state);
        let mut record = state.urls.get(id).cloned().ok_or(RejectReason::UnknownUrl)?;
        record.reliability_ppm = next_reliability(record.reliability_ppm, success);
        record.validation_count += 1;
        record.last_checked = now;
        if record.is_active && record.reliability_ppm < self.params.url_min_reliability_ppm {
            record.is_active = false;
            warn!(
                "🔌 Source URL deactivated (reliability {} ppm): {}",
                record.reliability_ppm, record.url
            );
        }
        codec::put(&self.store, RecordKind::ValidatedUrl, id.as_bytes(), &record)?;
        let reliability = record.reliability_ppm;
        state.urls.insert(*id, record);
        Ok(reliability)
    }

    /// Active URLs for (type, currency). URLs registered without a
    /// currency match every currency.
    pub fn active_urls(&self, measurement_type: MeasurementType, currency: Option<&str>) -> Vec<ValidatedUrl> {
        safe_lock(&self.state)
            .urls
            .values()
            .filter(|u| u.is_active && u.measurement_type == measurement_type)
            .filter(|u| u.currency.is_none() || u.currency.as_deref() == currency)
            .cloned()
            .collect()
    }
}
