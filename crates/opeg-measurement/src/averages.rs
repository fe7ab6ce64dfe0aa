// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// O PEG - AVERAGES, TARGETS & DAILY ROLLUPS
//
// Read side of the measurement system. Averages are recomputed on demand
// from the windowed observation set; daily rollups are persisted so they
// survive pruning of the raw observations.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use chrono::{DateTime, NaiveDate};
use log::{debug, info};
use opeg_core::{fiat_for, is_o_currency, safe_lock, MeasurementType, PriceFeed, MICRO_PER_UNIT, PPM, SECS_PER_DAY};
use opeg_store::{KvStore, RecordKind, WriteBatch};
use std::collections::BTreeSet;

use crate::error::MeasurementError;
use crate::stats::{self, Moments};
use crate::system::{batch_put, MeasurementState, MeasurementSystem};
use crate::targets::dynamic_target;
use crate::types::{AverageWithConfidence, ConfidenceLevel, DailyAverage, DailyKey};

/// UTC calendar date of a unix timestamp
pub fn utc_date(timestamp: u64) -> Option<NaiveDate> {
    let secs = i64::try_from(timestamp).ok()?;
    DateTime::from_timestamp(secs, 0).map(|dt| dt.date_naive())
}

/// [start, end] unix seconds of a UTC day
pub fn day_bounds(date: NaiveDate) -> Option<(u64, u64)> {
    let start = date.and_hms_opt(0, 0, 0)?.and_utc().timestamp();
    let start = u64::try_from(start).ok()?;
    Some((start, start + SECS_PER_DAY - 1))
}

impl<S: KvStore> MeasurementSystem<S> {
    fn summarize_values(&self, values: &[u64]) -> Option<AverageWithConfidence> {
        stats::summarize(
            values,
            self.params.gaussian_std_threshold_milli,
            self.params.min_significant_samples,
        )
    }

    fn water_window(&self, state: &MeasurementState, currency: &str, days: u64, now: u64) -> Vec<u64> {
        state.water_values(
            currency,
            Self::window_start(now, days),
            now,
            self.params.require_peer_validation,
        )
    }

    fn exchange_window(&self, state: &MeasurementState, from: &str, to: &str, days: u64, now: u64) -> Vec<u64> {
        state.exchange_values(
            from,
            to,
            Self::window_start(now, days),
            now,
            self.params.require_peer_validation,
        )
    }

    // ─────────────────────────────────────────────────────────────────
    // AVERAGES
    // ─────────────────────────────────────────────────────────────────

    /// Gaussian summary of the trailing window. `None` when the window is
    /// empty; check `is_significant` before using the value.
    pub fn average_water_price_with_confidence(
        &self,
        currency: &str,
        days: u64,
        now: u64,
    ) -> Option<AverageWithConfidence> {
        let state = safe_lock(&self.state);
        self.summarize_values(&self.water_window(&state, currency, days, now))
    }

    pub fn average_exchange_rate_with_confidence(
        &self,
        from: &str,
        to: &str,
        days: u64,
        now: u64,
    ) -> Option<AverageWithConfidence> {
        let state = safe_lock(&self.state);
        self.summarize_values(&self.exchange_window(&state, from, to, days, now))
    }

    /// Gaussian-filtered water price, or `None` below significance
    pub fn average_water_price(&self, currency: &str, days: u64, now: u64) -> Option<u64> {
        self.average_water_price_with_confidence(currency, days, now)
            .filter(|avg| avg.is_significant)
            .map(|avg| avg.value_micro)
    }

    /// Gaussian-filtered exchange rate, or `None` below significance
    pub fn average_exchange_rate(&self, from: &str, to: &str, days: u64, now: u64) -> Option<u64> {
        self.average_exchange_rate_with_confidence(from, to, days, now)
            .filter(|avg| avg.is_significant)
            .map(|avg| avg.value_micro)
    }

    /// Rate an O currency should trade at: the 7-day water price in its fiat.
    /// Falls back to the 1.0 peg when the fiat has no significant average.
    pub fn theoretical_exchange_rate(&self, o_currency: &str, now: u64) -> u64 {
        fiat_for(o_currency)
            .and_then(|fiat| self.average_water_price(fiat, 7, now))
            .unwrap_or(MICRO_PER_UNIT)
    }

    /// |measured - theoretical| / theoretical, ppm
    pub fn stability_deviation_ppm(&self, o_currency: &str, measured_micro: u64, now: u64) -> u64 {
        let theoretical = self.theoretical_exchange_rate(o_currency, now);
        deviation_ppm(measured_micro, theoretical)
    }

    // ─────────────────────────────────────────────────────────────────
    // DYNAMIC TARGET
    // ─────────────────────────────────────────────────────────────────

    /// Measurements wanted per day for (type, currency)
    pub fn current_measurement_target(
        &self,
        measurement_type: MeasurementType,
        currency: &str,
        now: u64,
    ) -> u64 {
        let state = safe_lock(&self.state);
        let days = self.targets.cv_window_days;
        let values = if measurement_type.is_exchange_family() {
            match fiat_for(currency) {
                Some(fiat) => self.exchange_window(&state, currency, fiat, days, now),
                None => Vec::new(),
            }
        } else {
            self.water_window(&state, currency, days, now)
        };
        let cv_bps = Moments::of(&values)
            .filter(|m| m.count >= self.params.min_significant_samples)
            .map(|m| m.cv_bps());
        let target = dynamic_target(&self.targets, state.first_seen.get(currency).copied(), now, cv_bps);
        debug!(
            "🎯 {} {} target: {} (cv {:?} bps, {} samples)",
            currency,
            measurement_type,
            target,
            cv_bps,
            values.len()
        );
        target
    }

    // ─────────────────────────────────────────────────────────────────
    // DAILY ROLLUPS
    // ─────────────────────────────────────────────────────────────────

    /// Compute, persist and return the rollup of every currency with
    /// observations on `date`.
    pub fn calculate_daily_averages(
        &self,
        date: NaiveDate,
        block_height: u64,
    ) -> Result<Vec<DailyAverage>, MeasurementError> {
        let (start, end) = day_bounds(date).ok_or(MeasurementError::InvalidDate(date))?;
        let mut state = safe_lock(&self.state);
        let validated_only = self.params.require_peer_validation;

        let currencies: BTreeSet<String> = state
            .water
            .values()
            .filter(|o| o.timestamp >= start && o.timestamp <= end)
            .map(|o| o.currency.clone())
            .chain(
                state
                    .exchange
                    .values()
                    .filter(|o| o.timestamp >= start && o.timestamp <= end)
                    .map(|o| o.from_currency.clone()),
            )
            .collect();

        let mut rollups = Vec::with_capacity(currencies.len());
        for currency in &currencies {
            let water = state.water_values(currency, start, end, validated_only);
            let exchange = match fiat_for(currency) {
                Some(fiat) => state.exchange_values(currency, fiat, start, end, validated_only),
                None => Vec::new(),
            };
            let water_summary = self.summarize_values(&water);
            let exchange_summary = self.summarize_values(&exchange);

            let count = water.len() + exchange.len();
            let std_deviation_micro = water_summary
                .as_ref()
                .or(exchange_summary.as_ref())
                .map_or(0, |s| s.std_dev_micro);

            // Theoretical rate from the fiat's trailing week of water prices
            let is_stable = if is_o_currency(currency) {
                match (&exchange_summary, fiat_for(currency)) {
                    (Some(ex), Some(fiat)) => {
                        let fiat_water = self.water_window(&state, fiat, 7, end);
                        let theoretical = self
                            .summarize_values(&fiat_water)
                            .filter(|s| s.is_significant)
                            .map_or(MICRO_PER_UNIT, |s| s.value_micro);
                        deviation_ppm(ex.value_micro, theoretical) <= self.params.daily_stability_tolerance_ppm
                    }
                    _ => false,
                }
            } else {
                true
            };

            rollups.push(DailyAverage {
                currency: currency.clone(),
                date,
                avg_water_price_micro: water_summary.map(|s| s.value_micro),
                avg_exchange_rate_micro: exchange_summary.map(|s| s.value_micro),
                measurement_count: count,
                std_deviation_micro,
                confidence: ConfidenceLevel::from_count(count),
                is_significant: count >= self.params.min_significant_samples,
                is_stable,
                block_height,
            });
        }

        let mut batch = WriteBatch::new();
        for avg in &rollups {
            batch_put(
                &mut batch,
                RecordKind::DailyAverage,
                &DailyKey::new(&avg.currency, avg.date).store_id(),
                avg,
            )?;
        }
        if !batch.is_empty() {
            self.store.apply_batch(batch)?;
        }
        for avg in &rollups {
            state.daily.insert(DailyKey::new(&avg.currency, avg.date), avg.clone());
        }

        info!("📅 Daily averages for {}: {} currencies", date, rollups.len());
        Ok(rollups)
    }

    pub fn daily_average(&self, currency: &str, date: NaiveDate) -> Option<DailyAverage> {
        safe_lock(&self.state)
            .daily
            .get(&DailyKey::new(currency, date))
            .cloned()
    }

    /// Rollups for `currency` with `from <= date <= to`, oldest first
    pub fn daily_averages_in_range(&self, currency: &str, from: NaiveDate, to: NaiveDate) -> Vec<DailyAverage> {
        if from > to {
            return Vec::new();
        }
        safe_lock(&self.state)
            .daily
            .range(DailyKey::new(currency, from)..=DailyKey::new(currency, to))
            .map(|(_, avg)| avg.clone())
            .collect()
    }
}

/// |measured - reference| / reference in ppm. A zero reference is 100%.
fn deviation_ppm(measured: u64, reference: u64) -> u64 {
    if reference == 0 {
        return PPM;
    }
    (measured.abs_diff(reference) as u128 * PPM as u128 / reference as u128) as u64
}

impl<S: KvStore> PriceFeed for MeasurementSystem<S> {
    fn currencies(&self) -> Vec<String> {
        safe_lock(&self.state).currencies().into_iter().collect()
    }

    fn average_water_price(&self, currency: &str, days: u64, now: u64) -> Option<u64> {
        MeasurementSystem::<S>::average_water_price(self, currency, days, now)
    }

    fn average_exchange_rate(&self, from: &str, to: &str, days: u64, now: u64) -> Option<u64> {
        MeasurementSystem::<S>::average_exchange_rate(self, from, to, days, now)
    }
}
