// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// O PEG - STABILIZATION MINING
//
// Stateful manager owned by the node context. Block production calls
// `create_stabilization_transactions`; block validation recomputes the
// same plan with `validate_stabilization_transactions` and rejects any
// difference.
//
// **Issuance per block:**
// 1. Currency UNSTABLE for >= unstable_time_range blocks
// 2. coins = volume * |1 - ratio| * coin_factor
// 3. recipients = coins / 100, clamped to [10, 50000], capped by pool
// 4. amount = coins / recipients, clamped to [min_reward, max_reward]
//
// The manager itself holds no store. The node context persists the
// status table, audit trail and lifetime totals and hands them back
// through `restore` on restart, so the instability debounce survives.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use log::{debug, info, warn};
use opeg_core::{
    fiat_for, BlockContext, Hash256, PriceFeed, StabilizationParams, UserDirectory, MICRO_PER_UNIT,
};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::coins::{coins_for_volume, optimal_recipient_count, per_recipient_amount};
use crate::error::StabilizationError;
use crate::recipients::{recipient_pool, select_recipients};
use crate::status::{stability_ratio_ppm, CurrencyStabilityInfo, StabilityStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardOutput {
    pub recipient: String,
    /// Minor units
    pub amount: u128,
}

/// One reward transaction per issuing currency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StabilizationTransaction {
    pub tx_id: Hash256,
    pub currency: String,
    pub outputs: Vec<RewardOutput>,
    /// Sum of all outputs
    pub coins_created: u128,
    /// Stability ratio the issuance was computed from
    pub deviation_ppm: u64,
    pub block_height: u64,
    pub timestamp: u64,
}

impl StabilizationTransaction {
    pub fn recipients(&self) -> impl Iterator<Item = &str> {
        self.outputs.iter().map(|o| o.recipient.as_str())
    }
}

/// Audit entry for one stabilization transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StabilizationRecord {
    pub tx_id: Hash256,
    pub currency: String,
    pub coins_created: u128,
    pub recipients: Vec<String>,
    pub block_height: u64,
    pub timestamp: u64,
    pub deviation_ppm: u64,
}

impl From<&StabilizationTransaction> for StabilizationRecord {
    fn from(tx: &StabilizationTransaction) -> Self {
        Self {
            tx_id: tx.tx_id,
            currency: tx.currency.clone(),
            coins_created: tx.coins_created,
            recipients: tx.recipients().map(str::to_string).collect(),
            block_height: tx.block_height,
            timestamp: tx.timestamp,
            deviation_ppm: tx.deviation_ppm,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StabilizationStatistics {
    pub stable_currencies: usize,
    pub unstable_currencies: usize,
    pub inactive_currencies: usize,
    /// Lifetime totals, unaffected by pruning
    pub total_coins_created: u128,
    pub total_transactions: u64,
    pub total_recipients: u64,
}

/// Cumulative issuance counters, kept across pruning
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifetimeTotals {
    pub coins_created: u128,
    pub transactions: u64,
    pub recipients: u64,
}

fn compute_tx_id(block: &BlockContext, currency: &str, amount: u128, recipients: &[String]) -> Hash256 {
    let mut hasher = Sha3_256::new();
    hasher.update(b"OPEG_STAB_TX_V1");
    hasher.update(block.block_hash.as_bytes());
    hasher.update(block.height.to_le_bytes());
    hasher.update((currency.len() as u64).to_le_bytes());
    hasher.update(currency.as_bytes());
    hasher.update(amount.to_le_bytes());
    for recipient in recipients {
        hasher.update((recipient.len() as u64).to_le_bytes());
        hasher.update(recipient.as_bytes());
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    Hash256(out)
}

#[derive(Clone)]
pub struct StabilizationMining {
    params: StabilizationParams,
    directory: Arc<dyn UserDirectory>,
    status: BTreeMap<String, CurrencyStabilityInfo>,
    history: BTreeMap<Hash256, StabilizationRecord>,
    totals: LifetimeTotals,
}

impl StabilizationMining {
    pub fn new(params: StabilizationParams, directory: Arc<dyn UserDirectory>) -> Self {
        Self {
            params,
            directory,
            status: BTreeMap::new(),
            history: BTreeMap::new(),
            totals: LifetimeTotals::default(),
        }
    }

    pub fn params(&self) -> &StabilizationParams {
        &self.params
    }

    /// Reload persisted state, replacing whatever is held in memory
    pub fn restore(
        &mut self,
        status: impl IntoIterator<Item = CurrencyStabilityInfo>,
        history: impl IntoIterator<Item = StabilizationRecord>,
        totals: LifetimeTotals,
    ) {
        self.status = status.into_iter().map(|i| (i.currency.clone(), i)).collect();
        self.history = history.into_iter().map(|r| (r.tx_id, r)).collect();
        self.totals = totals;
        debug!(
            "♻️ Restored {} currency statuses and {} stabilization records",
            self.status.len(),
            self.history.len()
        );
    }

    pub fn lifetime_totals(&self) -> LifetimeTotals {
        self.totals
    }

    // ─────────────────────────────────────────────────────────────────
    // STABILITY STATE MACHINE
    // ─────────────────────────────────────────────────────────────────

    /// Untracked currencies count as stable
    pub fn is_currency_stable(&self, currency: &str) -> bool {
        self.status.get(currency).map(|i| i.is_stable()).unwrap_or(true)
    }

    /// Fold fresh averages into the currency's status
    pub fn update_stability_status(
        &mut self,
        currency: &str,
        expected_micro: u64,
        observed_micro: u64,
        exchange_rate_micro: u64,
        height: u64,
    ) -> StabilityStatus {
        let threshold = self.params.stability_threshold_ppm;
        let info = self
            .status
            .entry(currency.to_string())
            .or_insert_with(|| CurrencyStabilityInfo::new(currency));

        info.expected_water_price_micro = expected_micro;
        info.observed_water_price_micro = observed_micro;
        info.observed_exchange_rate_micro = exchange_rate_micro;
        info.last_check_height = height;
        info.measurement_count += 1;
        info.stability_ratio_ppm = stability_ratio_ppm(expected_micro, observed_micro);

        if info.stability_ratio_ppm > threshold {
            if info.status != StabilityStatus::Unstable {
                info.status = StabilityStatus::Unstable;
                info.unstable_since_height = Some(height);
                warn!(
                    "📉 {} became UNSTABLE at height {} (deviation {} ppm)",
                    currency, height, info.stability_ratio_ppm
                );
            }
        } else {
            if info.status == StabilityStatus::Unstable {
                info!("📈 {} is STABLE again at height {}", currency, height);
            }
            info.status = StabilityStatus::Stable;
            info.unstable_since_height = None;
        }
        info.status
    }

    pub fn stability_status(&self, currency: &str) -> Option<CurrencyStabilityInfo> {
        self.status.get(currency).cloned()
    }

    pub fn all_stability_status(&self) -> BTreeMap<String, CurrencyStabilityInfo> {
        self.status.clone()
    }

    pub fn unstable_currencies(&self) -> Vec<String> {
        self.with_status(StabilityStatus::Unstable)
    }

    pub fn stable_currencies(&self) -> Vec<String> {
        self.with_status(StabilityStatus::Stable)
    }

    fn with_status(&self, status: StabilityStatus) -> Vec<String> {
        self.status
            .values()
            .filter(|i| i.status == status)
            .map(|i| i.currency.clone())
            .collect()
    }

    /// Tracked and either flagged inactive or without fresh data for too long
    pub fn is_currency_inactive(&self, currency: &str, height: u64) -> bool {
        self.status
            .get(currency)
            .map(|i| i.is_inactive() || i.is_stale(height, self.params.inactive_time_range))
            .unwrap_or(false)
    }

    pub fn mark_currency_inactive(&mut self, currency: &str, height: u64) {
        let info = self
            .status
            .entry(currency.to_string())
            .or_insert_with(|| CurrencyStabilityInfo::new(currency));
        info.status = StabilityStatus::Inactive;
        info.unstable_since_height = None;
        info.last_check_height = height;
        info!("💤 {} marked INACTIVE at height {}", currency, height);
    }

    /// Flag every stale currency inactive. Returns the newly flagged ones.
    pub fn refresh_inactive(&mut self, height: u64) -> Vec<String> {
        let max_gap = self.params.inactive_time_range;
        let mut flagged = Vec::new();
        for info in self.status.values_mut() {
            if !info.is_inactive() && info.is_stale(height, max_gap) {
                info.status = StabilityStatus::Inactive;
                info.unstable_since_height = None;
                flagged.push(info.currency.clone());
            }
        }
        if !flagged.is_empty() {
            info!("💤 {} currencies went INACTIVE at height {}", flagged.len(), height);
        }
        flagged
    }

    pub fn meets_instability_threshold(&self, info: &CurrencyStabilityInfo, height: u64) -> bool {
        info.meets_instability_threshold(height, self.params.unstable_time_range)
    }

    /// Re-derive every currency's status from the feed. Currencies without
    /// both averages keep their status unless they have gone stale.
    /// Returns how many currencies received fresh data.
    pub fn re_evaluate_all_currencies(&mut self, height: u64, now: u64, feed: &dyn PriceFeed) -> usize {
        let mut currencies: BTreeSet<String> = self.status.keys().cloned().collect();
        currencies.extend(feed.currencies());

        let mut updated = 0;
        for currency in currencies {
            let Some(fiat) = fiat_for(&currency) else {
                debug!("Skipping non-O currency {}", currency);
                continue;
            };
            let water = feed.average_water_price(&currency, self.params.water_window_days, now);
            let exchange = feed.average_exchange_rate(&currency, fiat, self.params.exchange_window_days, now);
            match (water, exchange) {
                (Some(water), Some(exchange)) => {
                    self.update_stability_status(&currency, MICRO_PER_UNIT, water, exchange, height);
                    updated += 1;
                }
                _ => {
                    debug!("No significant averages for {} at height {}", currency, height);
                    if let Some(info) = self.status.get(&currency) {
                        if !info.is_inactive() && info.is_stale(height, self.params.inactive_time_range) {
                            self.mark_inactive_keep_height(&currency);
                        }
                    }
                }
            }
        }
        updated
    }

    fn mark_inactive_keep_height(&mut self, currency: &str) {
        if let Some(info) = self.status.get_mut(currency) {
            info.status = StabilityStatus::Inactive;
            info.unstable_since_height = None;
            info!("💤 {} went INACTIVE (no fresh data since height {})", currency, info.last_check_height);
        }
    }

    // ─────────────────────────────────────────────────────────────────
    // ISSUANCE
    // ─────────────────────────────────────────────────────────────────

    /// Coins the block's volume in `currency` justifies. 0 unless the
    /// currency has met the instability threshold.
    pub fn calculate_coins_for_currency(
        &self,
        currency: &str,
        block: &BlockContext,
    ) -> Result<u128, StabilizationError> {
        let Some(info) = self.status.get(currency) else {
            return Ok(0);
        };
        if !self.meets_instability_threshold(info, block.height) {
            return Ok(0);
        }
        let volume = block.volume(currency);
        let coins = coins_for_volume(volume, info.stability_ratio_ppm, self.params.coin_factor_ppm).ok_or_else(
            || StabilizationError::Overflow {
                currency: currency.to_string(),
            },
        )?;
        debug!(
            "🪙 {}: volume {}, ratio {} ppm -> {} coins",
            currency, volume, info.stability_ratio_ppm, coins
        );
        Ok(coins)
    }

    /// Total issuance over every qualifying currency
    pub fn calculate_stabilization_coins(&self, block: &BlockContext) -> Result<u128, StabilizationError> {
        let mut total: u128 = 0;
        for currency in self.unstable_currencies() {
            let coins = self.calculate_coins_for_currency(&currency, block)?;
            total = total
                .checked_add(coins)
                .ok_or(StabilizationError::Overflow { currency })?;
        }
        Ok(total)
    }

    pub fn calculate_optimal_recipient_count(&self, total_coins: u128) -> usize {
        optimal_recipient_count(total_coins, &self.params)
    }

    /// Deterministic sample of up to `count` users from the stable
    /// currencies other than `exclude`
    pub fn select_reward_recipients(&self, count: usize, exclude: &str, block: &BlockContext) -> Vec<String> {
        let stable = self.stable_currencies();
        let pool = recipient_pool(self.directory.as_ref(), stable.iter().map(String::as_str), exclude);
        select_recipients(&pool, count, &block.block_hash, exclude)
    }

    /// Transactions this block must carry. Pure: state is not touched.
    pub fn plan_stabilization_transactions(
        &self,
        block: &BlockContext,
    ) -> Result<Vec<StabilizationTransaction>, StabilizationError> {
        let mut txs = Vec::new();
        for currency in self.unstable_currencies() {
            let coins = self.calculate_coins_for_currency(&currency, block)?;
            if coins == 0 {
                continue;
            }
            let count = self.calculate_optimal_recipient_count(coins);
            let recipients = self.select_reward_recipients(count, &currency, block);
            if recipients.is_empty() {
                warn!("⚠️ No stable recipients for {} issuance at height {}", currency, block.height);
                continue;
            }

            let amount = per_recipient_amount(coins, recipients.len(), &self.params);
            let coins_created = amount
                .checked_mul(recipients.len() as u128)
                .ok_or_else(|| StabilizationError::Overflow {
                    currency: currency.clone(),
                })?;
            let deviation_ppm = self
                .status
                .get(&currency)
                .map(|i| i.stability_ratio_ppm)
                .unwrap_or(0);

            txs.push(StabilizationTransaction {
                tx_id: compute_tx_id(block, &currency, amount, &recipients),
                outputs: recipients
                    .into_iter()
                    .map(|recipient| RewardOutput { recipient, amount })
                    .collect(),
                currency,
                coins_created,
                deviation_ppm,
                block_height: block.height,
                timestamp: block.timestamp,
            });
        }
        Ok(txs)
    }

    /// Plan this block's transactions and append them to the audit trail
    pub fn create_stabilization_transactions(
        &mut self,
        block: &BlockContext,
    ) -> Result<Vec<StabilizationTransaction>, StabilizationError> {
        let txs = self.plan_stabilization_transactions(block)?;
        for tx in &txs {
            self.record_stabilization_transaction(tx);
            info!(
                "🏦 Stabilization for {} at height {}: {} coins to {} recipients",
                tx.currency,
                tx.block_height,
                tx.coins_created,
                tx.outputs.len()
            );
        }
        Ok(txs)
    }

    /// Append to the audit trail. Re-recording a known tx is a no-op and
    /// returns false.
    pub fn record_stabilization_transaction(&mut self, tx: &StabilizationTransaction) -> bool {
        if self.history.contains_key(&tx.tx_id) {
            return false;
        }
        self.totals.coins_created = self.totals.coins_created.saturating_add(tx.coins_created);
        self.totals.transactions += 1;
        self.totals.recipients += tx.outputs.len() as u64;
        self.history.insert(tx.tx_id, StabilizationRecord::from(tx));
        true
    }

    /// Recompute the plan and require `txs` to match it exactly
    pub fn validate_stabilization_transactions(
        &self,
        block: &BlockContext,
        txs: &[StabilizationTransaction],
    ) -> Result<(), StabilizationError> {
        let expected = self.plan_stabilization_transactions(block)?;
        if expected.len() != txs.len() {
            return Err(StabilizationError::CountMismatch {
                expected: expected.len(),
                found: txs.len(),
            });
        }
        for (want, got) in expected.iter().zip(txs) {
            if want != got {
                return Err(StabilizationError::TransactionMismatch {
                    currency: got.currency.clone(),
                    tx_id: got.tx_id,
                });
            }
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────
    // HISTORY & STATISTICS
    // ─────────────────────────────────────────────────────────────────

    /// Records for `currency` with height in [from_height, to_height],
    /// ordered by height
    pub fn stabilization_history(&self, currency: &str, from_height: u64, to_height: u64) -> Vec<StabilizationRecord> {
        let mut records: Vec<StabilizationRecord> = self
            .history
            .values()
            .filter(|r| r.currency == currency && r.block_height >= from_height && r.block_height <= to_height)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.block_height.cmp(&b.block_height).then(a.tx_id.cmp(&b.tx_id)));
        records
    }

    /// Coins created for `currency` across the retained history
    pub fn total_coins_created(&self, currency: &str) -> u128 {
        self.history
            .values()
            .filter(|r| r.currency == currency)
            .fold(0u128, |acc, r| acc.saturating_add(r.coins_created))
    }

    pub fn statistics(&self) -> StabilizationStatistics {
        let mut stats = StabilizationStatistics {
            total_coins_created: self.totals.coins_created,
            total_transactions: self.totals.transactions,
            total_recipients: self.totals.recipients,
            ..Default::default()
        };
        for info in self.status.values() {
            match info.status {
                StabilityStatus::Stable => stats.stable_currencies += 1,
                StabilityStatus::Unstable => stats.unstable_currencies += 1,
                StabilityStatus::Inactive => stats.inactive_currencies += 1,
            }
        }
        stats
    }

    /// Drop audit records below `cutoff_height`. Returns how many.
    pub fn prune_old_data(&mut self, cutoff_height: u64) -> usize {
        let before = self.history.len();
        self.history.retain(|_, r| r.block_height >= cutoff_height);
        let pruned = before - self.history.len();
        if pruned > 0 {
            info!("🧹 Pruned {} stabilization records below height {}", pruned, cutoff_height);
        }
        pruned
    }
}
