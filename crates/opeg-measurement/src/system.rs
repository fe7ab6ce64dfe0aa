// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// O PEG - MEASUREMENT SYSTEM
//
// Invitation-driven collection of water-price and exchange-rate
// observations.
//
// **Submission pipeline (all under one lock):**
// 1. Invite exists, belongs to the submitter, matches type and currency,
//    is unused and unexpired
// 2. Proof is well formed (URL online, "lat,lon,photohash" offline)
// 3. Timestamp is near acceptance time (offline) or inside the acceptance
//    window and not in the future (online)
// 4. Water prices: container volume in range, price pro-rated to 1 L
// 5. Value is positive and bounded
// 6. Gaussian range check against the trailing window of the same series
// 7. Write-through: observation + used invite + conversion counters are
//    persisted as one batch before memory is touched
//
// A rejected submission never consumes its invite.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use log::{debug, info, warn};
use opeg_core::{
    fiat_for, is_o_currency, safe_lock, Hash256, MeasurementParams, MeasurementSource,
    MeasurementType, PegConfig, TargetParams, UserDirectory, PPM, SECS_PER_DAY,
};
use opeg_store::{codec, record_key, KvStore, RecordKind, StoreError, WriteBatch};
use serde::Serialize;
use sha3::{Digest, Sha3_256};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use crate::conversion::{ConversionKey, ConversionRate};
use crate::error::{MeasurementError, RejectReason};
use crate::invites::{compute_invite_id, select_candidates, selection_rng};
use crate::proof::validate_proof;
use crate::stats;
use crate::volume::price_per_liter;
use crate::types::{
    AutomatedValidation, DailyAverage, DailyKey, ExchangeRateObservation, ExchangeRateSubmission,
    MeasurementInvite, MeasurementStatistics, ValidatedUrl, WaterPriceObservation,
    WaterPriceSubmission,
};

/// In-memory mirror of everything the store holds
#[derive(Debug, Default)]
pub(crate) struct MeasurementState {
    pub(crate) water: BTreeMap<Hash256, WaterPriceObservation>,
    pub(crate) exchange: BTreeMap<Hash256, ExchangeRateObservation>,
    pub(crate) invites: BTreeMap<Hash256, MeasurementInvite>,
    pub(crate) conversion: BTreeMap<ConversionKey, ConversionRate>,
    pub(crate) daily: BTreeMap<DailyKey, DailyAverage>,
    pub(crate) urls: BTreeMap<Hash256, ValidatedUrl>,
    /// Acceptance time of each currency's first observation
    pub(crate) first_seen: BTreeMap<String, u64>,
    pub(crate) next_sequence: u64,
}

impl MeasurementState {
    /// Water prices for `currency` with timestamp in [from, to]
    pub(crate) fn water_values(&self, currency: &str, from: u64, to: u64, validated_only: bool) -> Vec<u64> {
        self.water
            .values()
            .filter(|o| o.currency == currency)
            .filter(|o| o.timestamp >= from && o.timestamp <= to)
            .filter(|o| !validated_only || o.is_validated)
            .map(|o| o.price_micro)
            .collect()
    }

    /// Exchange rates `from_currency`/`to_currency` with timestamp in [from, to]
    pub(crate) fn exchange_values(
        &self,
        from_currency: &str,
        to_currency: &str,
        from: u64,
        to: u64,
        validated_only: bool,
    ) -> Vec<u64> {
        self.exchange
            .values()
            .filter(|o| o.from_currency == from_currency && o.to_currency == to_currency)
            .filter(|o| o.timestamp >= from && o.timestamp <= to)
            .filter(|o| !validated_only || o.is_validated)
            .map(|o| o.rate_micro)
            .collect()
    }

    /// Every currency with at least one observation
    pub(crate) fn currencies(&self) -> BTreeSet<String> {
        self.water
            .values()
            .map(|o| o.currency.clone())
            .chain(self.exchange.values().map(|o| o.from_currency.clone()))
            .collect()
    }
}

pub(crate) fn batch_put<T: Serialize>(
    batch: &mut WriteBatch,
    kind: RecordKind,
    id: &[u8],
    record: &T,
) -> Result<(), StoreError> {
    batch.push((record_key(kind, id), Some(codec::encode(record)?)));
    Ok(())
}

pub(crate) fn batch_erase(batch: &mut WriteBatch, kind: RecordKind, id: &[u8]) {
    batch.push((record_key(kind, id), None));
}

/// Content id of an observation
fn observation_id(
    domain: &[u8],
    submitter: &str,
    currencies: &[&str],
    value_micro: u64,
    timestamp: u64,
    invite_id: &Hash256,
) -> Hash256 {
    let mut hasher = Sha3_256::new();
    hasher.update(domain);
    hasher.update((submitter.len() as u64).to_le_bytes());
    hasher.update(submitter.as_bytes());
    for currency in currencies {
        hasher.update((currency.len() as u64).to_le_bytes());
        hasher.update(currency.as_bytes());
    }
    hasher.update(value_micro.to_le_bytes());
    hasher.update(timestamp.to_le_bytes());
    hasher.update(invite_id.as_bytes());
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    Hash256(out)
}

/// Append a distinct peer validator. Returns the new (validated, confidence).
fn add_validator(
    validators: &mut Vec<String>,
    submitter: &str,
    validator: &str,
    min_validators: usize,
) -> Result<(bool, u64), RejectReason> {
    if validator == submitter {
        return Err(RejectReason::SelfValidation);
    }
    if validators.iter().any(|v| v == validator) {
        return Err(RejectReason::AlreadyValidated);
    }
    validators.push(validator.to_string());
    let confidence = (validators.len() as u64 * PPM / 10).min(PPM);
    Ok((validators.len() >= min_validators, confidence))
}

pub struct MeasurementSystem<S: KvStore> {
    pub(crate) store: S,
    pub(crate) directory: Arc<dyn UserDirectory>,
    pub(crate) params: MeasurementParams,
    pub(crate) targets: TargetParams,
    pub(crate) state: Mutex<MeasurementState>,
}

impl<S: KvStore> MeasurementSystem<S> {
    /// Open the system over `store`, rebuilding in-memory state from it
    pub fn open(
        store: S,
        directory: Arc<dyn UserDirectory>,
        config: &PegConfig,
    ) -> Result<Self, MeasurementError> {
        let mut state = MeasurementState::default();

        for obs in codec::scan::<_, WaterPriceObservation>(&store, RecordKind::WaterPrice)? {
            state.water.insert(obs.id, obs);
        }
        for obs in codec::scan::<_, ExchangeRateObservation>(&store, RecordKind::ExchangeRate)? {
            state.exchange.insert(obs.id, obs);
        }
        for invite in codec::scan::<_, MeasurementInvite>(&store, RecordKind::Invite)? {
            state.invites.insert(invite.id, invite);
        }
        for rate in codec::scan::<_, ConversionRate>(&store, RecordKind::ConversionRate)? {
            state.conversion.insert(rate.key.clone(), rate);
        }
        for avg in codec::scan::<_, DailyAverage>(&store, RecordKind::DailyAverage)? {
            state.daily.insert(DailyKey::new(&avg.currency, avg.date), avg);
        }
        for url in codec::scan::<_, ValidatedUrl>(&store, RecordKind::ValidatedUrl)? {
            state.urls.insert(url.id, url);
        }
        for (currency, ts) in codec::scan::<_, (String, u64)>(&store, RecordKind::CurrencyFirstSeen)? {
            state.first_seen.insert(currency, ts);
        }
        state.next_sequence = state
            .invites
            .values()
            .map(|i| i.sequence + 1)
            .max()
            .unwrap_or(0);

        info!(
            "📊 Measurement system loaded: {} water, {} exchange, {} invites, {} urls",
            state.water.len(),
            state.exchange.len(),
            state.invites.len(),
            state.urls.len()
        );

        Ok(Self {
            store,
            directory,
            params: config.measurement.clone(),
            targets: config.targets.clone(),
            state: Mutex::new(state),
        })
    }

    pub fn params(&self) -> &MeasurementParams {
        &self.params
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub(crate) fn window_start(now: u64, days: u64) -> u64 {
        now.saturating_sub(days.saturating_mul(SECS_PER_DAY))
    }

    // ─────────────────────────────────────────────────────────────────
    // SUBMISSION CHECKS
    // ─────────────────────────────────────────────────────────────────

    fn check_invite(
        state: &MeasurementState,
        invite_id: &Hash256,
        submitter: &str,
        family: fn(MeasurementType) -> bool,
        currency: &str,
        now: u64,
    ) -> Result<MeasurementInvite, RejectReason> {
        let invite = state.invites.get(invite_id).ok_or(RejectReason::UnknownInvite)?;
        if invite.invited_user != submitter {
            return Err(RejectReason::InviteNotOwned);
        }
        if !family(invite.measurement_type) {
            return Err(RejectReason::InviteTypeMismatch(invite.measurement_type));
        }
        if let Some(bound) = &invite.currency {
            if bound != currency {
                return Err(RejectReason::InviteCurrencyMismatch(bound.clone()));
            }
        }
        if invite.is_used {
            return Err(RejectReason::InviteUsed);
        }
        if invite.is_expired || now >= invite.expires_at {
            return Err(RejectReason::InviteExpired);
        }
        Ok(invite.clone())
    }

    fn check_value(&self, value_micro: u64) -> Result<(), RejectReason> {
        if value_micro == 0 {
            return Err(RejectReason::NonPositiveValue);
        }
        if value_micro > self.params.max_observation_micro {
            return Err(RejectReason::ValueTooLarge(value_micro));
        }
        Ok(())
    }

    /// Offline observations must be within the offline tolerance of `now`
    /// either way. Online ones may be at most `max_future_drift_secs` ahead
    /// and no older than the acceptance window.
    fn check_timestamp(&self, source: MeasurementSource, timestamp: u64, now: u64) -> Result<(), RejectReason> {
        if source.is_offline() {
            let age_secs = now.abs_diff(timestamp);
            if age_secs > self.params.offline_tolerance_secs {
                return Err(RejectReason::StaleObservation { age_secs });
            }
            return Ok(());
        }
        if timestamp > now {
            let ahead_secs = timestamp - now;
            if ahead_secs > self.params.max_future_drift_secs {
                return Err(RejectReason::FutureTimestamp { ahead_secs });
            }
        } else if timestamp < Self::window_start(now, self.params.acceptance_window_days) {
            return Err(RejectReason::StaleObservation {
                age_secs: now - timestamp,
            });
        }
        Ok(())
    }

    /// Range-check the container and pro-rate its price to one liter
    fn normalize_water_price(&self, sub: &WaterPriceSubmission) -> Result<u64, RejectReason> {
        self.check_value(sub.price_micro)?;
        let volume_micro_liters = sub.volume.micro_liters();
        if volume_micro_liters < self.params.min_volume_micro_liters
            || volume_micro_liters > self.params.max_volume_micro_liters
        {
            return Err(RejectReason::VolumeOutOfRange { volume_micro_liters });
        }
        let per_liter = price_per_liter(sub.price_micro, volume_micro_liters)
            .ok_or(RejectReason::VolumeOutOfRange { volume_micro_liters })?;
        self.check_value(per_liter)?;
        Ok(per_liter)
    }

    fn range_check(&self, history: &[u64], value: u64, now: u64) -> Result<AutomatedValidation, RejectReason> {
        match stats::acceptance_check(
            history,
            value,
            self.params.gaussian_acceptance_threshold_milli,
            self.params.min_significant_samples,
            self.params.zero_variance_tolerance_bps,
        ) {
            Ok(moments) => Ok(AutomatedValidation {
                passed: true,
                window_mean_micro: moments.map(|m| m.mean),
                window_std_dev_micro: moments.map(|m| m.std_dev()),
                window_samples: moments.map_or(0, |m| m.count),
                validated_at: now,
            }),
            Err(moments) => Err(RejectReason::OutOfRange {
                value_micro: value,
                mean_micro: moments.mean,
            }),
        }
    }

    /// Conversion record for `invite` with one more completion
    fn completed_rate(&self, state: &MeasurementState, invite: &MeasurementInvite, now: u64) -> ConversionRate {
        let key = ConversionKey::new(invite.currency.as_deref(), invite.measurement_type);
        let mut rate = state
            .conversion
            .get(&key)
            .cloned()
            .unwrap_or_else(|| ConversionRate::new(key, self.params.default_conversion_rate_ppm));
        rate.record_completed(now);
        rate
    }

    // ─────────────────────────────────────────────────────────────────
    // SUBMISSION
    // ─────────────────────────────────────────────────────────────────

    /// Submit a water-price observation. Returns its id.
    pub fn submit_water_price(
        &self,
        submission: WaterPriceSubmission,
        now: u64,
    ) -> Result<Hash256, MeasurementError> {
        let mut state = safe_lock(&self.state);
        let result = self.accept_water_price(&mut state, submission, now);
        if let Err(MeasurementError::Rejected(reason)) = &result {
            warn!("🚫 Water price rejected: {}", reason);
        }
        result
    }

    fn accept_water_price(
        &self,
        state: &mut MeasurementState,
        sub: WaterPriceSubmission,
        now: u64,
    ) -> Result<Hash256, MeasurementError> {
        let mut invite = Self::check_invite(
            state,
            &sub.invite_id,
            &sub.submitter,
            MeasurementType::is_water_family,
            &sub.currency,
            now,
        )?;
        validate_proof(sub.source, &sub.proof)?;
        self.check_timestamp(sub.source, sub.timestamp, now)?;
        let per_liter = self.normalize_water_price(&sub)?;

        let id = observation_id(
            b"OPEG_WATER_OBS_V1",
            &sub.submitter,
            &[&sub.currency],
            per_liter,
            sub.timestamp,
            &sub.invite_id,
        );
        if state.water.contains_key(&id) {
            return Err(RejectReason::Duplicate.into());
        }

        let window_from = Self::window_start(now, self.params.acceptance_window_days);
        let history = state.water_values(&sub.currency, window_from, now, false);
        let automated = self.range_check(&history, per_liter, now)?;

        let observation = WaterPriceObservation {
            id,
            submitter: sub.submitter,
            currency: sub.currency,
            price_micro: per_liter,
            container_price_micro: sub.price_micro,
            volume: sub.volume,
            proof: sub.proof,
            source: sub.source,
            timestamp: sub.timestamp,
            block_height: sub.block_height,
            validators: Vec::new(),
            is_validated: false,
            confidence_ppm: 0,
            automated,
            invite_id: sub.invite_id,
        };
        invite.is_used = true;
        let rate = self.completed_rate(state, &invite, now);
        let first_seen = (!state.first_seen.contains_key(&observation.currency))
            .then(|| (observation.currency.clone(), now));

        let mut batch = WriteBatch::new();
        batch_put(&mut batch, RecordKind::WaterPrice, id.as_bytes(), &observation)?;
        batch_put(&mut batch, RecordKind::Invite, invite.id.as_bytes(), &invite)?;
        batch_put(&mut batch, RecordKind::ConversionRate, &rate.key.store_id(), &rate)?;
        if let Some(entry) = &first_seen {
            batch_put(&mut batch, RecordKind::CurrencyFirstSeen, entry.0.as_bytes(), entry)?;
        }
        self.store.apply_batch(batch)?;

        info!(
            "💧 Water price accepted: {} = {} micro/L ({} for {}, id {})",
            observation.currency, observation.price_micro, observation.container_price_micro, observation.volume, id
        );
        if let Some((currency, ts)) = first_seen {
            state.first_seen.insert(currency, ts);
        }
        state.conversion.insert(rate.key.clone(), rate);
        state.invites.insert(invite.id, invite);
        state.water.insert(id, observation);
        Ok(id)
    }

    /// Submit an exchange-rate observation (O currency against its fiat).
    pub fn submit_exchange_rate(
        &self,
        submission: ExchangeRateSubmission,
        now: u64,
    ) -> Result<Hash256, MeasurementError> {
        let mut state = safe_lock(&self.state);
        let result = self.accept_exchange_rate(&mut state, submission, now);
        if let Err(MeasurementError::Rejected(reason)) = &result {
            warn!("🚫 Exchange rate rejected: {}", reason);
        }
        result
    }

    fn accept_exchange_rate(
        &self,
        state: &mut MeasurementState,
        sub: ExchangeRateSubmission,
        now: u64,
    ) -> Result<Hash256, MeasurementError> {
        let mut invite = Self::check_invite(
            state,
            &sub.invite_id,
            &sub.submitter,
            MeasurementType::is_exchange_family,
            &sub.from_currency,
            now,
        )?;
        if !is_o_currency(&sub.from_currency) || fiat_for(&sub.from_currency) != Some(sub.to_currency.as_str()) {
            return Err(RejectReason::InvalidCurrencyPair {
                from: sub.from_currency,
                to: sub.to_currency,
            }
            .into());
        }
        validate_proof(sub.source, &sub.proof)?;
        self.check_timestamp(sub.source, sub.timestamp, now)?;
        self.check_value(sub.rate_micro)?;

        let id = observation_id(
            b"OPEG_EXCHANGE_OBS_V1",
            &sub.submitter,
            &[&sub.from_currency, &sub.to_currency],
            sub.rate_micro,
            sub.timestamp,
            &sub.invite_id,
        );
        if state.exchange.contains_key(&id) {
            return Err(RejectReason::Duplicate.into());
        }

        let window_from = Self::window_start(now, self.params.acceptance_window_days);
        let history = state.exchange_values(&sub.from_currency, &sub.to_currency, window_from, now, false);
        let automated = self.range_check(&history, sub.rate_micro, now)?;

        let observation = ExchangeRateObservation {
            id,
            submitter: sub.submitter,
            from_currency: sub.from_currency,
            to_currency: sub.to_currency,
            rate_micro: sub.rate_micro,
            proof: sub.proof,
            source: sub.source,
            timestamp: sub.timestamp,
            block_height: sub.block_height,
            validators: Vec::new(),
            is_validated: false,
            confidence_ppm: 0,
            automated,
            invite_id: sub.invite_id,
        };
        invite.is_used = true;
        let rate = self.completed_rate(state, &invite, now);
        let first_seen = (!state.first_seen.contains_key(&observation.from_currency))
            .then(|| (observation.from_currency.clone(), now));

        let mut batch = WriteBatch::new();
        batch_put(&mut batch, RecordKind::ExchangeRate, id.as_bytes(), &observation)?;
        batch_put(&mut batch, RecordKind::Invite, invite.id.as_bytes(), &invite)?;
        batch_put(&mut batch, RecordKind::ConversionRate, &rate.key.store_id(), &rate)?;
        if let Some(entry) = &first_seen {
            batch_put(&mut batch, RecordKind::CurrencyFirstSeen, entry.0.as_bytes(), entry)?;
        }
        self.store.apply_batch(batch)?;

        info!(
            "💱 Exchange rate accepted: {}/{} = {} micro (id {})",
            observation.from_currency, observation.to_currency, observation.rate_micro, id
        );
        if let Some((currency, ts)) = first_seen {
            state.first_seen.insert(currency, ts);
        }
        state.conversion.insert(rate.key.clone(), rate);
        state.invites.insert(invite.id, invite);
        state.exchange.insert(id, observation);
        Ok(id)
    }

    /// Record a peer validation of a stored observation
    pub fn validate_observation(&self, id: &Hash256, validator: &str) -> Result<(), MeasurementError> {
        let mut state = safe_lock(&self.state);
        let min = self.params.min_validators;

        if let Some(existing) = state.water.get(id) {
            let mut obs = existing.clone();
            let (validated, confidence) = add_validator(&mut obs.validators, &obs.submitter, validator, min)?;
            obs.is_validated |= validated;
            obs.confidence_ppm = confidence;
            codec::put(&self.store, RecordKind::WaterPrice, id.as_bytes(), &obs)?;
            debug!("✅ Water observation {} validated by {} ({} validators)", id, validator, obs.validators.len());
            state.water.insert(*id, obs);
            return Ok(());
        }

        if let Some(existing) = state.exchange.get(id) {
            let mut obs = existing.clone();
            let (validated, confidence) = add_validator(&mut obs.validators, &obs.submitter, validator, min)?;
            obs.is_validated |= validated;
            obs.confidence_ppm = confidence;
            codec::put(&self.store, RecordKind::ExchangeRate, id.as_bytes(), &obs)?;
            debug!("✅ Exchange observation {} validated by {} ({} validators)", id, validator, obs.validators.len());
            state.exchange.insert(*id, obs);
            return Ok(());
        }

        Err(RejectReason::UnknownObservation.into())
    }

    pub fn water_observation(&self, id: &Hash256) -> Option<WaterPriceObservation> {
        safe_lock(&self.state).water.get(id).cloned()
    }

    pub fn exchange_observation(&self, id: &Hash256) -> Option<ExchangeRateObservation> {
        safe_lock(&self.state).exchange.get(id).cloned()
    }

    // ─────────────────────────────────────────────────────────────────
    // INVITES
    // ─────────────────────────────────────────────────────────────────

    /// Issue up to `count` invites. Fewer are issued only when the
    /// directory has no candidates at all.
    pub fn create_invites(
        &self,
        count: usize,
        measurement_type: MeasurementType,
        currency: Option<&str>,
        now: u64,
        block_height: u64,
    ) -> Result<Vec<MeasurementInvite>, MeasurementError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let mut state = safe_lock(&self.state);

        let mut rng = selection_rng(currency, measurement_type, now, state.next_sequence);
        let users = select_candidates(self.directory.as_ref(), currency, count, &mut rng);
        if users.is_empty() {
            warn!(
                "⚠️ No candidates for {} invites ({})",
                measurement_type,
                currency.unwrap_or("any currency")
            );
            return Ok(Vec::new());
        }

        let invites: Vec<MeasurementInvite> = users
            .into_iter()
            .enumerate()
            .map(|(i, user)| {
                let sequence = state.next_sequence + i as u64;
                MeasurementInvite {
                    id: compute_invite_id(&user, now, sequence),
                    invited_user: user,
                    measurement_type,
                    currency: currency.map(str::to_string),
                    created_at: now,
                    expires_at: now.saturating_add(self.params.invite_expiry_secs),
                    block_height,
                    sequence,
                    is_used: false,
                    is_expired: false,
                }
            })
            .collect();

        let key = ConversionKey::new(currency, measurement_type);
        let mut rate = state
            .conversion
            .get(&key)
            .cloned()
            .unwrap_or_else(|| ConversionRate::new(key, self.params.default_conversion_rate_ppm));
        rate.record_sent(invites.len() as u64, now);

        let mut batch = WriteBatch::new();
        for invite in &invites {
            batch_put(&mut batch, RecordKind::Invite, invite.id.as_bytes(), invite)?;
        }
        batch_put(&mut batch, RecordKind::ConversionRate, &rate.key.store_id(), &rate)?;
        self.store.apply_batch(batch)?;

        state.next_sequence += invites.len() as u64;
        state.conversion.insert(rate.key.clone(), rate);
        for invite in &invites {
            state.invites.insert(invite.id, invite.clone());
        }

        info!(
            "📨 Issued {} {} invites for {}",
            invites.len(),
            measurement_type,
            currency.unwrap_or("any currency")
        );
        Ok(invites)
    }

    /// Whether `currency` is large enough for target-driven invites:
    /// enough native users (relaxed before `bootstrap_height`), and for
    /// exchange rates, enough coin in circulation. The general pool
    /// (`None`) is always ready.
    pub fn is_measurement_ready(
        &self,
        measurement_type: MeasurementType,
        currency: Option<&str>,
        block_height: u64,
    ) -> bool {
        let Some(currency) = currency else {
            return true;
        };
        let min_users = if block_height < self.params.bootstrap_height {
            self.params.bootstrap_min_users
        } else {
            self.params.readiness_min_users
        };
        if self.directory.native_users(currency).len() < min_users {
            return false;
        }
        if measurement_type.is_exchange_family() {
            return self.directory.coin_supply(currency) >= self.params.readiness_min_supply;
        }
        true
    }

    /// Issue enough invites to expect `target` completed measurements,
    /// sized by the observed conversion rate. Issues nothing until the
    /// currency passes `is_measurement_ready`.
    pub fn create_invites_for_target(
        &self,
        target: u64,
        measurement_type: MeasurementType,
        currency: Option<&str>,
        now: u64,
        block_height: u64,
    ) -> Result<Vec<MeasurementInvite>, MeasurementError> {
        if !self.is_measurement_ready(measurement_type, currency, block_height) {
            info!(
                "⏳ {} not ready for {} measurements at height {}, no invites sent",
                currency.unwrap_or("any currency"),
                measurement_type,
                block_height
            );
            return Ok(Vec::new());
        }
        let rate_ppm = self.conversion_rate(currency, measurement_type).rate_ppm;
        let count = crate::invites::invite_count_for_target(
            target,
            rate_ppm,
            self.params.min_conversion_rate_ppm,
            self.params.invite_overhead_pct,
        );
        debug!(
            "🎯 Target {} at conversion {} ppm -> {} invites",
            target, rate_ppm, count
        );
        self.create_invites(count as usize, measurement_type, currency, now, block_height)
    }

    /// Flag unused invites past their expiry. Returns how many were flagged.
    pub fn expire_old_invites(&self, now: u64) -> Result<usize, MeasurementError> {
        let mut state = safe_lock(&self.state);
        let expired: Vec<MeasurementInvite> = state
            .invites
            .values()
            .filter(|i| !i.is_used && !i.is_expired && now >= i.expires_at)
            .map(|i| MeasurementInvite {
                is_expired: true,
                ..i.clone()
            })
            .collect();
        if expired.is_empty() {
            return Ok(0);
        }

        let mut batch = WriteBatch::new();
        for invite in &expired {
            batch_put(&mut batch, RecordKind::Invite, invite.id.as_bytes(), invite)?;
        }
        self.store.apply_batch(batch)?;

        let count = expired.len();
        for invite in expired {
            state.invites.insert(invite.id, invite);
        }
        info!("⌛ Expired {} unused invites", count);
        Ok(count)
    }

    pub fn get_invite(&self, id: &Hash256) -> Option<MeasurementInvite> {
        safe_lock(&self.state).invites.get(id).cloned()
    }

    pub fn is_invite_valid(&self, id: &Hash256, now: u64) -> bool {
        safe_lock(&self.state)
            .invites
            .get(id)
            .is_some_and(|i| i.is_valid_at(now))
    }

    pub fn invites_for_user(&self, user: &str) -> Vec<MeasurementInvite> {
        safe_lock(&self.state)
            .invites
            .values()
            .filter(|i| i.invited_user == user)
            .cloned()
            .collect()
    }

    /// Conversion record for (currency, type); a fresh default record if unseen
    pub fn conversion_rate(&self, currency: Option<&str>, measurement_type: MeasurementType) -> ConversionRate {
        let key = ConversionKey::new(currency, measurement_type);
        safe_lock(&self.state)
            .conversion
            .get(&key)
            .cloned()
            .unwrap_or_else(|| ConversionRate::new(key, self.params.default_conversion_rate_ppm))
    }

    // ─────────────────────────────────────────────────────────────────
    // MAINTENANCE
    // ─────────────────────────────────────────────────────────────────

    /// Drop observations older than `cutoff` and settled invites that
    /// expired before it. Daily averages are kept.
    pub fn prune_old_data(&self, cutoff: u64) -> Result<usize, MeasurementError> {
        let mut state = safe_lock(&self.state);

        let water: Vec<Hash256> = state
            .water
            .values()
            .filter(|o| o.timestamp < cutoff)
            .map(|o| o.id)
            .collect();
        let exchange: Vec<Hash256> = state
            .exchange
            .values()
            .filter(|o| o.timestamp < cutoff)
            .map(|o| o.id)
            .collect();
        let invites: Vec<Hash256> = state
            .invites
            .values()
            .filter(|i| (i.is_used || i.is_expired) && i.expires_at < cutoff)
            .map(|i| i.id)
            .collect();

        let mut batch = WriteBatch::new();
        for id in &water {
            batch_erase(&mut batch, RecordKind::WaterPrice, id.as_bytes());
        }
        for id in &exchange {
            batch_erase(&mut batch, RecordKind::ExchangeRate, id.as_bytes());
        }
        for id in &invites {
            batch_erase(&mut batch, RecordKind::Invite, id.as_bytes());
        }
        let removed = batch.len();
        if removed == 0 {
            return Ok(0);
        }
        self.store.apply_batch(batch)?;

        for id in &water {
            state.water.remove(id);
        }
        for id in &exchange {
            state.exchange.remove(id);
        }
        for id in &invites {
            state.invites.remove(id);
        }
        info!("🧹 Pruned {} measurement records older than {}", removed, cutoff);
        Ok(removed)
    }

    pub fn statistics(&self, now: u64) -> MeasurementStatistics {
        let state = safe_lock(&self.state);
        MeasurementStatistics {
            water_observations: state.water.len(),
            exchange_observations: state.exchange.len(),
            validated_observations: state.water.values().filter(|o| o.is_validated).count()
                + state.exchange.values().filter(|o| o.is_validated).count(),
            open_invites: state.invites.values().filter(|i| i.is_valid_at(now)).count(),
            used_invites: state.invites.values().filter(|i| i.is_used).count(),
            expired_invites: state
                .invites
                .values()
                .filter(|i| !i.is_used && (i.is_expired || now >= i.expires_at))
                .count(),
            active_urls: state.urls.values().filter(|u| u.is_active).count(),
            daily_averages: state.daily.len(),
            currencies: state.currencies().len(),
        }
    }
}
