// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// O PEG - ENGINE
//
// Node context that owns one measurement system and one stabilization
// manager. Block paths go through `process_block` / `validate_block`;
// RPC paths borrow `measurement()` directly.
//
// **Per block (process_block):**
// 1. Flag expired invites
// 2. On a UTC day change, roll up the day that just ended
// 3. Re-evaluate every currency from the measurement averages
// 4. Create and record this block's stabilization transactions
// 5. Persist the stability table, new audit records and lifetime totals
//    to the measurement store, so a restart resumes the same debounce
//
// Lock order: stabilization, then measurement (taken inside its methods).
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use chrono::NaiveDate;
use log::{debug, info};
use opeg_core::{
    safe_lock, BlockContext, ConfigError, MeasurementType, PegConfig, UserDirectory,
};
use opeg_measurement::{utc_date, MeasurementError, MeasurementSystem};
use opeg_stabilization::{
    CurrencyStabilityInfo, LifetimeTotals, StabilizationError, StabilizationMining, StabilizationRecord,
    StabilizationStatistics, StabilizationTransaction,
};
use opeg_store::{codec, record_key, KvStore, RecordKind, SledStore, StoreError, WriteBatch};
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Measurement(#[from] MeasurementError),
    #[error(transparent)]
    Stabilization(#[from] StabilizationError),
    #[error("block timestamp {0} has no calendar date")]
    InvalidTimestamp(u64),
}

/// What one `process_block` call did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockReport {
    pub expired_invites: usize,
    /// Date rolled up by this block, if the UTC day changed
    pub rolled_up: Option<NaiveDate>,
    pub currencies_evaluated: usize,
    pub transactions: Vec<StabilizationTransaction>,
}

const TOTALS_ID: &[u8] = b"lifetime";

/// Reload the stabilization manager's persisted state from `store`
fn load_stabilization<S: KvStore>(store: &S, mining: &mut StabilizationMining) -> Result<(), StoreError> {
    let status: Vec<CurrencyStabilityInfo> = codec::scan(store, RecordKind::StabilityStatus)?;
    let history: Vec<StabilizationRecord> = codec::scan(store, RecordKind::StabilizationRecord)?;
    let totals: LifetimeTotals = codec::get(store, RecordKind::StabilizationTotals, TOTALS_ID)?.unwrap_or_default();
    if !status.is_empty() {
        info!(
            "♻️ Stabilization state loaded: {} currencies, {} records",
            status.len(),
            history.len()
        );
    }
    mining.restore(status, history, totals);
    Ok(())
}

fn put(batch: &mut WriteBatch, kind: RecordKind, id: &[u8], record: &impl serde::Serialize) -> Result<(), StoreError> {
    batch.push((record_key(kind, id), Some(codec::encode(record)?)));
    Ok(())
}

pub struct PegEngine<S: KvStore> {
    config: PegConfig,
    directory: Arc<dyn UserDirectory>,
    measurement: MeasurementSystem<S>,
    stabilization: Mutex<StabilizationMining>,
    last_block_date: Mutex<Option<NaiveDate>>,
}

impl PegEngine<SledStore> {
    /// Open a node-local engine backed by sled at `path`
    pub fn open_sled<P: AsRef<Path>>(
        path: P,
        directory: Arc<dyn UserDirectory>,
        config: PegConfig,
    ) -> Result<Self, EngineError> {
        let store = SledStore::open(path)?;
        Self::open(store, directory, config)
    }
}

impl<S: KvStore> PegEngine<S> {
    pub fn open(store: S, directory: Arc<dyn UserDirectory>, config: PegConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let measurement = MeasurementSystem::open(store, Arc::clone(&directory), &config)?;
        let mut stabilization = StabilizationMining::new(config.stabilization.clone(), Arc::clone(&directory));
        load_stabilization(measurement.store(), &mut stabilization)?;
        info!("⚙️ Peg engine ready");
        Ok(Self {
            config,
            directory,
            measurement,
            stabilization: Mutex::new(stabilization),
            last_block_date: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &PegConfig {
        &self.config
    }

    pub fn directory(&self) -> &Arc<dyn UserDirectory> {
        &self.directory
    }

    /// RPC-side access: submissions, invites, URL registry, averages
    pub fn measurement(&self) -> &MeasurementSystem<S> {
        &self.measurement
    }

    // ─────────────────────────────────────────────────────────────────
    // BLOCK PATH
    // ─────────────────────────────────────────────────────────────────

    /// Periodic driver, called once per connected block
    pub fn process_block(&self, block: &BlockContext) -> Result<BlockReport, EngineError> {
        let today = utc_date(block.timestamp).ok_or(EngineError::InvalidTimestamp(block.timestamp))?;
        let expired_invites = self.measurement.expire_old_invites(block.timestamp)?;

        let rolled_up = {
            let mut last = safe_lock(&self.last_block_date);
            let finished = match *last {
                Some(previous) if previous < today => Some(previous),
                _ => None,
            };
            if let Some(date) = finished {
                self.measurement.calculate_daily_averages(date, block.height)?;
            }
            if last.map_or(true, |previous| previous < today) {
                *last = Some(today);
            }
            finished
        };

        let mut stabilization = safe_lock(&self.stabilization);
        let currencies_evaluated =
            stabilization.re_evaluate_all_currencies(block.height, block.timestamp, &self.measurement);
        let transactions = stabilization.create_stabilization_transactions(block)?;
        self.persist_stabilization(&stabilization, &transactions)?;

        debug!(
            "⛓️ Block {}: {} invites expired, {} currencies evaluated, {} stabilization txs",
            block.height,
            expired_invites,
            currencies_evaluated,
            transactions.len()
        );
        Ok(BlockReport {
            expired_invites,
            rolled_up,
            currencies_evaluated,
            transactions,
        })
    }

    /// Consensus check for a received block. Runs the same re-evaluation
    /// as `process_block` on a scratch copy, so call it before the block
    /// is processed. Leaves engine state untouched.
    pub fn validate_block(&self, block: &BlockContext, txs: &[StabilizationTransaction]) -> Result<(), EngineError> {
        let mut scratch = safe_lock(&self.stabilization).clone();
        scratch.re_evaluate_all_currencies(block.height, block.timestamp, &self.measurement);
        scratch.validate_stabilization_transactions(block, txs)?;
        Ok(())
    }

    fn persist_stabilization(
        &self,
        mining: &StabilizationMining,
        transactions: &[StabilizationTransaction],
    ) -> Result<(), StoreError> {
        let mut batch = WriteBatch::new();
        for (currency, info) in mining.all_stability_status() {
            put(&mut batch, RecordKind::StabilityStatus, currency.as_bytes(), &info)?;
        }
        for tx in transactions {
            put(
                &mut batch,
                RecordKind::StabilizationRecord,
                tx.tx_id.as_bytes(),
                &StabilizationRecord::from(tx),
            )?;
        }
        put(&mut batch, RecordKind::StabilizationTotals, TOTALS_ID, &mining.lifetime_totals())?;
        self.measurement.store().apply_batch(batch)
    }

    pub fn calculate_stabilization_coins(&self, block: &BlockContext) -> Result<u128, EngineError> {
        Ok(safe_lock(&self.stabilization).calculate_stabilization_coins(block)?)
    }

    // ─────────────────────────────────────────────────────────────────
    // QUERIES
    // ─────────────────────────────────────────────────────────────────

    pub fn is_currency_stable(&self, currency: &str) -> bool {
        safe_lock(&self.stabilization).is_currency_stable(currency)
    }

    pub fn stability_status(&self, currency: &str) -> Option<CurrencyStabilityInfo> {
        safe_lock(&self.stabilization).stability_status(currency)
    }

    pub fn stabilization_history(&self, currency: &str, from_height: u64, to_height: u64) -> Vec<StabilizationRecord> {
        safe_lock(&self.stabilization).stabilization_history(currency, from_height, to_height)
    }

    pub fn stabilization_statistics(&self) -> StabilizationStatistics {
        safe_lock(&self.stabilization).statistics()
    }

    /// Run `f` against the stabilization manager under its lock. Changes
    /// reach the store with the next processed block.
    pub fn with_stabilization<R>(&self, f: impl FnOnce(&mut StabilizationMining) -> R) -> R {
        f(&mut safe_lock(&self.stabilization))
    }

    // ─────────────────────────────────────────────────────────────────
    // MAINTENANCE
    // ─────────────────────────────────────────────────────────────────

    /// Issue today's water-price and exchange-rate invites for `currency`,
    /// sized by the dynamic target and the observed conversion rate.
    /// A currency below the readiness thresholds gets none.
    pub fn issue_daily_invites(&self, currency: &str, now: u64, block_height: u64) -> Result<usize, EngineError> {
        let mut issued = 0;
        for measurement_type in [MeasurementType::WaterPrice, MeasurementType::ExchangeRate] {
            let target = self.measurement.current_measurement_target(measurement_type, currency, now);
            issued += self
                .measurement
                .create_invites_for_target(target, measurement_type, Some(currency), now, block_height)?
                .len();
        }
        Ok(issued)
    }

    /// Drop observations older than `cutoff_timestamp` and audit records
    /// below `cutoff_height`
    pub fn prune_old_data(&self, cutoff_timestamp: u64, cutoff_height: u64) -> Result<(usize, usize), EngineError> {
        let observations = self.measurement.prune_old_data(cutoff_timestamp)?;
        let records = safe_lock(&self.stabilization).prune_old_data(cutoff_height);

        let store = self.measurement.store();
        let mut batch = WriteBatch::new();
        for record in codec::scan::<_, StabilizationRecord>(store, RecordKind::StabilizationRecord)? {
            if record.block_height < cutoff_height {
                batch.push((record_key(RecordKind::StabilizationRecord, record.tx_id.as_bytes()), None));
            }
        }
        if !batch.is_empty() {
            store.apply_batch(batch)?;
        }
        Ok((observations, records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opeg_core::{fiat_for, Hash256, MeasurementSource, StaticDirectory};
    use opeg_measurement::{ContainerVolume, ExchangeRateSubmission, WaterPriceSubmission};
    use opeg_store::MemoryStore;

    const NOW: u64 = 1_750_000_000;
    const BLOCK_SECS: u64 = 600;

    fn test_directory() -> Arc<dyn UserDirectory> {
        Arc::new(
            StaticDirectory::new()
                .with_population("OUSD", 50)
                .with_population("OEUR", 300)
                .with_population("OJPY", 300)
                .with_supply("OEUR", 50_000_000),
        )
    }

    fn engine() -> PegEngine<MemoryStore> {
        PegEngine::open(MemoryStore::new(), test_directory(), PegConfig::default()).unwrap()
    }

    fn block(height: u64, timestamp: u64) -> BlockContext {
        let mut hash = [0u8; 32];
        hash[..8].copy_from_slice(&height.to_le_bytes());
        BlockContext::new(height, timestamp, Hash256(hash)).with_volume("OUSD", 1_000_000)
    }

    fn feed_prices<S: KvStore>(engine: &PegEngine<S>, currency: &str, water: u64, rate: u64) {
        let m = engine.measurement();
        for _ in 0..5 {
            let invite = m
                .create_invites(1, MeasurementType::WaterPrice, Some(currency), NOW, 1)
                .unwrap()
                .remove(0);
            m.submit_water_price(
                WaterPriceSubmission {
                    submitter: invite.invited_user.clone(),
                    currency: currency.to_string(),
                    price_micro: water,
                    volume: ContainerVolume::liter(),
                    proof: "https://shop.example/water".to_string(),
                    source: MeasurementSource::UserOnline,
                    timestamp: NOW,
                    block_height: 1,
                    invite_id: invite.id,
                },
                NOW,
            )
            .unwrap();

            let invite = m
                .create_invites(1, MeasurementType::ExchangeRate, Some(currency), NOW, 1)
                .unwrap()
                .remove(0);
            m.submit_exchange_rate(
                ExchangeRateSubmission {
                    submitter: invite.invited_user.clone(),
                    from_currency: currency.to_string(),
                    to_currency: fiat_for(currency).unwrap().to_string(),
                    rate_micro: rate,
                    proof: "https://fx.example/rates".to_string(),
                    source: MeasurementSource::BotOnline,
                    timestamp: NOW,
                    block_height: 1,
                    invite_id: invite.id,
                },
                NOW,
            )
            .unwrap();
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = PegConfig::default();
        config.stabilization.min_reward = 20_000;
        let result = PegEngine::open(MemoryStore::new(), Arc::new(StaticDirectory::new()), config);
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[test]
    fn test_stabilization_after_one_unstable_day() {
        let engine = engine();
        feed_prices(&engine, "OUSD", 1_500_000, 1_000_000);
        feed_prices(&engine, "OEUR", 1_000_000, 1_000_000);
        feed_prices(&engine, "OJPY", 1_050_000, 1_000_000);

        let start = 1_000;
        let report = engine.process_block(&block(start, NOW + 60)).unwrap();
        assert_eq!(report.currencies_evaluated, 3);
        assert!(!engine.is_currency_stable("OUSD"));
        assert!(engine.is_currency_stable("OEUR"));
        assert!(report.transactions.is_empty(), "Instability must persist before issuing");

        for height in start + 1..start + 144 {
            let report = engine.process_block(&block(height, NOW + 60 + (height - start) * 10)).unwrap();
            assert!(report.transactions.is_empty(), "No issuance at height {}", height);
        }

        let issuing = block(start + 144, NOW + 60 + 1_440);
        let planned = {
            let scratch = engine.with_stabilization(|m| m.clone());
            scratch.plan_stabilization_transactions(&issuing).unwrap()
        };
        engine.validate_block(&issuing, &planned).unwrap();

        let report = engine.process_block(&issuing).unwrap();
        assert_eq!(report.transactions, planned, "Producer and validator agree");
        let tx = &report.transactions[0];
        // 1,000,000 * |1 - 0.5| * 0.10
        assert_eq!(tx.coins_created, 50_000);
        assert_eq!(tx.outputs.len(), 500);
        assert!(tx.recipients().all(|r| !r.starts_with("OUSD_")));
        assert_eq!(engine.stabilization_history("OUSD", 0, u64::MAX).len(), 1);
        assert_eq!(engine.stabilization_statistics().total_coins_created, 50_000);
    }

    #[test]
    fn test_validate_rejects_forged_transactions() {
        let engine = engine();
        feed_prices(&engine, "OUSD", 1_500_000, 1_000_000);
        feed_prices(&engine, "OEUR", 1_000_000, 1_000_000);
        engine.process_block(&block(1, NOW)).unwrap();

        let issuing = block(145, NOW + 1_000);
        let mut txs = engine.with_stabilization(|m| m.plan_stabilization_transactions(&issuing)).unwrap();
        assert_eq!(txs.len(), 1);
        txs[0].outputs[0].recipient = "attacker".to_string();
        assert!(matches!(
            engine.validate_block(&issuing, &txs),
            Err(EngineError::Stabilization(StabilizationError::TransactionMismatch { .. }))
        ));
        assert!(engine.stabilization_history("OUSD", 0, u64::MAX).is_empty(), "Validation is read-only");
    }

    #[test]
    fn test_restart_resumes_instability_debounce() {
        let store = Arc::new(MemoryStore::new());
        let reopen = || PegEngine::open(Arc::clone(&store), test_directory(), PegConfig::default()).unwrap();

        {
            let engine = reopen();
            feed_prices(&engine, "OUSD", 1_500_000, 1_000_000);
            feed_prices(&engine, "OEUR", 1_000_000, 1_000_000);
            feed_prices(&engine, "OJPY", 1_050_000, 1_000_000);
            for height in 1..=100 {
                engine.process_block(&block(height, NOW + height * 10)).unwrap();
            }
        }

        let engine = reopen();
        assert_eq!(
            engine.stability_status("OUSD").unwrap().unstable_since_height,
            Some(1),
            "Debounce start is restored, not restarted"
        );
        for height in 101..145 {
            let report = engine.process_block(&block(height, NOW + height * 10)).unwrap();
            assert!(report.transactions.is_empty(), "No issuance at height {}", height);
        }
        let report = engine.process_block(&block(145, NOW + 1_450)).unwrap();
        assert_eq!(report.transactions.len(), 1, "Issues on schedule after a restart");
        drop(engine);

        let engine = reopen();
        assert_eq!(engine.stabilization_history("OUSD", 0, u64::MAX).len(), 1);
        assert_eq!(engine.stabilization_statistics().total_coins_created, 50_000);

        assert_eq!(engine.prune_old_data(0, 1_000).unwrap(), (0, 1));
        drop(engine);
        let engine = reopen();
        assert!(engine.stabilization_history("OUSD", 0, u64::MAX).is_empty());
        assert_eq!(
            engine.stabilization_statistics().total_coins_created,
            50_000,
            "Lifetime totals outlive pruning"
        );
    }

    #[test]
    fn test_daily_rollup_on_day_change() {
        let engine = engine();
        feed_prices(&engine, "OEUR", 1_000_000, 1_000_000);
        let day = utc_date(NOW).unwrap();

        let first = engine.process_block(&block(1, NOW)).unwrap();
        assert_eq!(first.rolled_up, None, "First block only records the date");
        let same_day = engine.process_block(&block(2, NOW + BLOCK_SECS)).unwrap();
        assert_eq!(same_day.rolled_up, None);

        let next_day = engine.process_block(&block(3, NOW + 86_400)).unwrap();
        assert_eq!(next_day.rolled_up, Some(day));
        let rollup = engine.measurement().daily_average("OEUR", day).unwrap();
        assert_eq!(rollup.avg_water_price_micro, Some(1_000_000));
        assert_eq!(rollup.measurement_count, 10);
    }

    #[test]
    fn test_issue_daily_invites_uses_target() {
        let engine = engine();
        // early-stage target 200 at the default 50% conversion, +20% overhead
        let issued = engine.issue_daily_invites("OEUR", NOW, 1).unwrap();
        assert_eq!(issued, 960);
    }

    #[test]
    fn test_daily_invites_skip_unready_currency() {
        let engine = engine();
        // 50 users pass the bootstrap gate for water, but OUSD has no supply
        assert_eq!(engine.issue_daily_invites("OUSD", NOW, 1).unwrap(), 480);
        assert_eq!(
            engine.issue_daily_invites("OUSD", NOW, 20_000).unwrap(),
            0,
            "Too few users once bootstrap ends"
        );
    }

    #[test]
    fn test_sled_engine_recovers_measurements() {
        let dir = tempfile::tempdir().unwrap();
        let directory: Arc<dyn UserDirectory> = Arc::new(StaticDirectory::new().with_population("OEUR", 20));
        {
            let engine = PegEngine::open_sled(dir.path(), Arc::clone(&directory), PegConfig::default()).unwrap();
            feed_prices(&engine, "OEUR", 1_000_000, 1_000_000);
            engine.measurement().store().flush().unwrap();
        }
        let engine = PegEngine::open_sled(dir.path(), directory, PegConfig::default()).unwrap();
        assert_eq!(
            engine.measurement().average_water_price("OEUR", 30, NOW),
            Some(1_000_000),
            "Observations survive a restart"
        );
    }
}
